//! Executes parsed documents against a read-locked [`DataStore`].

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use wfrt_common::{IdParts, IdPattern, Privilege};

use super::filters::{Candidate, NodeFilter, LIST_ARGS};
use super::mutator::Mutation;
use super::parser::{self, Document, Field, Literal, OperationKind};
use crate::queue::CommandQueue;
use crate::registry::MethodId;
use crate::state::data_store::{DataStore, Family, FamilyProxy, Task, TaskProxy, Workflow, ROOT_FAMILY};
use crate::state::job_pool::Job;

/// Who is asking, and where mutations go.
pub struct QueryEnv<'a> {
    pub store: &'a DataStore,
    pub queue: &'a CommandQueue,
    pub user: &'a str,
    pub privilege: Privilege,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub message: String,
    pub path: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Data(Value),
    Errors(Vec<FieldError>),
    /// The document could not be run at all.
    Failed(String),
}

impl QueryOutcome {
    pub fn into_value(self) -> Value {
        match self {
            QueryOutcome::Data(data) => data,
            QueryOutcome::Errors(errors) => Value::Array(
                errors
                    .into_iter()
                    .map(|err| json!({"error": {"message": err.message, "path": err.path}}))
                    .collect(),
            ),
            QueryOutcome::Failed(detail) => {
                Value::String(format!("ERROR: query execution error \n{detail}"))
            }
        }
    }
}

pub fn execute(request: &str, variables: Option<&Map<String, Value>>, env: &QueryEnv<'_>) -> QueryOutcome {
    let document = match parser::parse(request) {
        Ok(document) => document,
        Err(err) => return QueryOutcome::Failed(err.to_string()),
    };
    let variables = match bind_variables(&document, variables) {
        Ok(variables) => variables,
        Err(message) => {
            return QueryOutcome::Errors(vec![FieldError {
                message,
                path: Vec::new(),
            }])
        }
    };
    let mut executor = Executor {
        env,
        variables,
        errors: Vec::new(),
    };
    let data = match document.kind {
        OperationKind::Query => executor.run(&document.selections, Executor::root_query),
        OperationKind::Mutation => executor.run(&document.selections, Executor::root_mutation),
    };
    if executor.errors.is_empty() {
        QueryOutcome::Data(data)
    } else {
        debug!(errors = executor.errors.len(), "query resolved with errors");
        QueryOutcome::Errors(executor.errors)
    }
}

fn bind_variables(
    document: &Document,
    provided: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>, String> {
    let mut bound = Map::new();
    for definition in &document.variables {
        let value = match provided.and_then(|p| p.get(&definition.name)) {
            Some(value) => value.clone(),
            None => match &definition.default {
                Some(default) => literal_value(default, &Map::new())?,
                None if definition.type_name.ends_with('!') => {
                    return Err(format!(
                        "Variable \"${}\" of required type \"{}\" was not provided.",
                        definition.name, definition.type_name
                    ))
                }
                None => Value::Null,
            },
        };
        bound.insert(definition.name.clone(), value);
    }
    Ok(bound)
}

fn literal_value(literal: &Literal, variables: &Map<String, Value>) -> Result<Value, String> {
    Ok(match literal {
        Literal::Null => Value::Null,
        Literal::Bool(value) => Value::Bool(*value),
        Literal::Int(value) => json!(value),
        Literal::Float(value) => json!(value),
        Literal::String(value) | Literal::Enum(value) => Value::String(value.clone()),
        Literal::List(items) => Value::Array(
            items
                .iter()
                .map(|item| literal_value(item, variables))
                .collect::<Result<_, _>>()?,
        ),
        Literal::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), literal_value(item, variables)?)))
                .collect::<Result<_, String>>()?,
        ),
        Literal::Variable(name) => variables
            .get(name)
            .cloned()
            .ok_or_else(|| format!("Variable \"${name}\" is not defined."))?,
    })
}

#[derive(Clone, Copy)]
enum Node<'a> {
    Workflow(&'a Workflow),
    Task(&'a Task),
    Family(&'a Family),
    TaskProxy(&'a TaskProxy),
    FamilyProxy(&'a FamilyProxy),
    Job(&'a Job),
    MutationResult(bool),
}

enum Relation<'a> {
    One(Option<Node<'a>>),
    Many(Vec<Node<'a>>),
}

impl<'a> Node<'a> {
    fn type_name(&self) -> &'static str {
        match self {
            Node::Workflow(_) => "Workflow",
            Node::Task(_) => "Task",
            Node::Family(_) => "Family",
            Node::TaskProxy(_) => "TaskProxy",
            Node::FamilyProxy(_) => "FamilyProxy",
            Node::Job(_) => "Job",
            Node::MutationResult(_) => "MutationResult",
        }
    }

    fn id(&self) -> &'a str {
        match *self {
            Node::Workflow(item) => &item.id,
            Node::Task(item) => &item.id,
            Node::Family(item) => &item.id,
            Node::TaskProxy(item) => &item.id,
            Node::FamilyProxy(item) => &item.id,
            Node::Job(item) => &item.id,
            Node::MutationResult(_) => "",
        }
    }

    fn to_value(self) -> Result<Value, serde_json::Error> {
        match self {
            Node::Workflow(item) => serde_json::to_value(item),
            Node::Task(item) => serde_json::to_value(item),
            Node::Family(item) => serde_json::to_value(item),
            Node::TaskProxy(item) => serde_json::to_value(item),
            Node::FamilyProxy(item) => serde_json::to_value(item),
            Node::Job(item) => serde_json::to_value(item),
            Node::MutationResult(queued) => Ok(json!({ "command_queued": queued })),
        }
    }

    fn candidate(&self, workflow: &'a str) -> Candidate<'a> {
        let parts = |point: Option<&'a str>, name: &'a str, state: Option<&'a str>| IdParts {
            workflow,
            point,
            name,
            submit_num: None,
            state,
        };
        match *self {
            Node::Workflow(item) => Candidate {
                parts: parts(None, &item.name, Some(item.status.as_str())),
                ..Candidate::default()
            },
            Node::Task(item) => Candidate {
                parts: parts(None, &item.name, None),
                depth: Some(item.depth),
                is_held: None,
            },
            Node::Family(item) => Candidate {
                parts: parts(None, &item.name, None),
                depth: Some(item.depth),
                is_held: None,
            },
            Node::TaskProxy(item) => Candidate {
                parts: parts(Some(item.cycle_point.as_str()), &item.name, Some(item.state.as_str())),
                depth: Some(item.depth),
                is_held: Some(item.is_held),
            },
            Node::FamilyProxy(item) => Candidate {
                parts: parts(
                    Some(item.cycle_point.as_str()),
                    &item.name,
                    Some(item.state.as_str()).filter(|s| !s.is_empty()),
                ),
                depth: Some(item.depth),
                is_held: Some(item.is_held),
            },
            Node::Job(item) => Candidate {
                parts: IdParts {
                    submit_num: Some(item.submit_num),
                    ..parts(Some(item.cycle_point.as_str()), &item.name, Some(item.state.as_str()))
                },
                ..Candidate::default()
            },
            Node::MutationResult(_) => Candidate::default(),
        }
    }
}

type RootResolver<'a> =
    fn(&mut Executor<'a>, &Field, &[Value]) -> Result<Value, FieldError>;

struct Executor<'a> {
    env: &'a QueryEnv<'a>,
    variables: Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Executor<'a> {
    fn run(&mut self, fields: &[Field], resolve: RootResolver<'a>) -> Value {
        let mut data = Map::new();
        for field in fields {
            let path = vec![Value::String(field.response_key().to_string())];
            let value = match resolve(self, field, &path) {
                Ok(value) => value,
                Err(err) => {
                    self.errors.push(err);
                    Value::Null
                }
            };
            data.insert(field.response_key().to_string(), value);
        }
        Value::Object(data)
    }

    fn error(&self, message: impl Into<String>, path: &[Value]) -> FieldError {
        FieldError {
            message: message.into(),
            path: path.to_vec(),
        }
    }

    fn arguments(&self, field: &Field, path: &[Value]) -> Result<Map<String, Value>, FieldError> {
        field
            .arguments
            .iter()
            .map(|(key, literal)| {
                literal_value(literal, &self.variables)
                    .map(|value| (key.clone(), value))
                    .map_err(|message| self.error(message, path))
            })
            .collect()
    }

    fn check_arguments(&self, field: &Field, allowed: &[&str], path: &[Value]) -> Result<(), FieldError> {
        match field.arguments.iter().find(|(key, _)| !allowed.contains(&key.as_str())) {
            Some((key, _)) => Err(self.error(
                format!("Unknown argument \"{key}\" on field \"{}\".", field.name),
                path,
            )),
            None => Ok(()),
        }
    }

    fn store(&self) -> &'a DataStore {
        self.env.store
    }

    fn root_query(&mut self, field: &Field, path: &[Value]) -> Result<Value, FieldError> {
        let store = self.store();
        let many = root_nodes(store, field.name.as_str());
        if let Some(nodes) = many {
            return self.resolve_many(nodes, field, path);
        }

        if field.name == "suite_info" {
            self.check_arguments(field, &[], path)?;
            return self.resolve_one(Some(Node::Workflow(store.workflow())), field, path);
        }

        let plural = match field.name.as_str() {
            "task" => "tasks",
            "family" => "families",
            "task_proxy" => "task_proxies",
            "family_proxy" => "family_proxies",
            "job" => "jobs",
            other => {
                return Err(self.error(
                    format!("Cannot query field \"{other}\" on type \"Query\"."),
                    path,
                ))
            }
        };
        self.check_arguments(field, &["id"], path)?;
        let args = self.arguments(field, path)?;
        let id = args
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| self.error(format!("Field \"{}\" argument \"id\" is required.", field.name), path))?;
        let nodes = root_nodes(store, plural).unwrap_or_default();
        let node = match nodes.iter().find(|node| node.id() == id) {
            Some(node) => Some(*node),
            None => {
                let pattern = IdPattern::parse(id).map_err(|err| self.error(err.to_string(), path))?;
                let workflow = store.workflow().name.as_str();
                nodes
                    .into_iter()
                    .find(|node| pattern.matches(&node.candidate(workflow).parts))
            }
        };
        self.resolve_one(node, field, path)
    }

    fn root_mutation(&mut self, field: &Field, path: &[Value]) -> Result<Value, FieldError> {
        let method = MethodId::from_name(&field.name)
            .filter(MethodId::is_mutation)
            .ok_or_else(|| {
                self.error(
                    format!("Cannot query field \"{}\" on type \"Mutations\".", field.name),
                    path,
                )
            })?;
        if !self.env.privilege.satisfies(method.required_privilege()) {
            return Err(self.error(
                format!(
                    "Not authorized: {method} requires {} privilege",
                    method.required_privilege()
                ),
                path,
            ));
        }
        let args = self.arguments(field, path)?;
        let mutation = Mutation::from_args(method, args).map_err(|err| self.error(err.to_string(), path))?;
        let queued = self.env.queue.put(mutation.into_command());
        info!(user = %self.env.user, command = %method, queued, "mutation queued");
        self.resolve_one(Some(Node::MutationResult(queued)), field, path)
    }

    fn resolve_one(&mut self, node: Option<Node<'a>>, field: &Field, path: &[Value]) -> Result<Value, FieldError> {
        let Some(node) = node else {
            return Ok(Value::Null);
        };
        if field.selections.is_empty() {
            return Err(self.error(
                format!(
                    "Field \"{}\" of type \"{}\" must have a selection of subfields.",
                    field.name,
                    node.type_name()
                ),
                path,
            ));
        }
        Ok(self.select(node, &field.selections, path))
    }

    fn resolve_many(&mut self, nodes: Vec<Node<'a>>, field: &Field, path: &[Value]) -> Result<Value, FieldError> {
        self.check_arguments(field, &LIST_ARGS, path)?;
        if field.selections.is_empty() {
            let type_name = nodes.first().map_or("Node", Node::type_name);
            return Err(self.error(
                format!(
                    "Field \"{}\" of type \"[{type_name}]\" must have a selection of subfields.",
                    field.name
                ),
                path,
            ));
        }
        let args = self.arguments(field, path)?;
        let filter = NodeFilter::from_args(&args).map_err(|message| self.error(message, path))?;
        let workflow = self.store().workflow().name.as_str();
        let mut items = Vec::new();
        for node in nodes {
            if !filter.matches(&node.candidate(workflow)) {
                continue;
            }
            let mut item_path = path.to_vec();
            item_path.push(json!(items.len()));
            items.push(self.select(node, &field.selections, &item_path));
        }
        Ok(Value::Array(items))
    }

    /// Build the object for `node`, nulling any field that fails.
    fn select(&mut self, node: Node<'a>, selections: &[Field], path: &[Value]) -> Value {
        let mut object = Map::new();
        let mut scalars: Option<Value> = None;
        for field in selections {
            let mut field_path = path.to_vec();
            field_path.push(Value::String(field.response_key().to_string()));
            let value = match self.resolve_field(node, field, &field_path, &mut scalars) {
                Ok(value) => value,
                Err(err) => {
                    self.errors.push(err);
                    Value::Null
                }
            };
            object.insert(field.response_key().to_string(), value);
        }
        Value::Object(object)
    }

    fn resolve_field(
        &mut self,
        node: Node<'a>,
        field: &Field,
        path: &[Value],
        scalars: &mut Option<Value>,
    ) -> Result<Value, FieldError> {
        if field.name == "__typename" {
            return Ok(Value::String(node.type_name().to_string()));
        }
        match self.relation(node, &field.name) {
            Some(Relation::Many(nodes)) => return self.resolve_many(nodes, field, path),
            Some(Relation::One(target)) => {
                self.check_arguments(field, &[], path)?;
                return self.resolve_one(target, field, path);
            }
            None => {}
        }

        self.check_arguments(field, &[], path)?;
        if scalars.is_none() {
            let value = node
                .to_value()
                .map_err(|err| self.error(format!("failed to serialise {}: {err}", node.type_name()), path))?;
            *scalars = Some(value);
        }
        let value = scalars
            .as_ref()
            .and_then(|object| object.get(&field.name))
            .ok_or_else(|| {
                self.error(
                    format!(
                        "Cannot query field \"{}\" on type \"{}\".",
                        field.name,
                        node.type_name()
                    ),
                    path,
                )
            })?;
        if field.selections.is_empty() {
            return Ok(value.clone());
        }
        match value {
            Value::Object(_) | Value::Null => Ok(select_json(value, &field.selections)),
            _ => Err(self.error(
                format!(
                    "Field \"{}\" must not have a selection since it has no subfields.",
                    field.name
                ),
                path,
            )),
        }
    }

    fn relation(&self, node: Node<'a>, name: &str) -> Option<Relation<'a>> {
        let store = self.store();
        let proxy_ids = |ids: &'a [String]| -> Vec<Node<'a>> {
            ids.iter()
                .filter_map(|id| store.family_proxy(id).map(Node::FamilyProxy))
                .collect()
        };
        let relation = match (node, name) {
            (Node::Workflow(_), "tasks") => Relation::Many(store.tasks().map(Node::Task).collect()),
            (Node::Workflow(_), "families") => {
                Relation::Many(store.families().map(Node::Family).collect())
            }
            (Node::Workflow(_), "task_proxies") => {
                Relation::Many(store.task_proxies().map(Node::TaskProxy).collect())
            }
            (Node::Workflow(_), "family_proxies") => {
                Relation::Many(store.family_proxies().map(Node::FamilyProxy).collect())
            }
            (Node::Workflow(_), "jobs") => Relation::Many(store.jobs().iter().map(Node::Job).collect()),
            (Node::Workflow(_), "cycle_points") => Relation::Many(
                store
                    .family_proxies()
                    .filter(|fp| fp.name == ROOT_FAMILY)
                    .map(Node::FamilyProxy)
                    .collect(),
            ),
            (Node::Task(task), "proxies") => Relation::Many(
                store
                    .task_proxies()
                    .filter(|tp| tp.task == task.id)
                    .map(Node::TaskProxy)
                    .collect(),
            ),
            (Node::Family(family), "proxies") => Relation::Many(
                store
                    .family_proxies()
                    .filter(|fp| fp.family == family.id)
                    .map(Node::FamilyProxy)
                    .collect(),
            ),
            (Node::Family(family), "child_tasks") => Relation::Many(
                store
                    .tasks()
                    .filter(|task| task.namespace.get(1) == Some(&family.name))
                    .map(Node::Task)
                    .collect(),
            ),
            (Node::Family(family), "child_families") => Relation::Many(
                store
                    .families()
                    .filter(|child| child.first_parent.as_ref() == Some(&family.id))
                    .map(Node::Family)
                    .collect(),
            ),
            (Node::Family(family), "parents") => {
                let mut parents = Vec::new();
                let mut next = family.first_parent.as_deref();
                while let Some(parent) = next.and_then(|id| store.family(id)) {
                    parents.push(Node::Family(parent));
                    next = parent.first_parent.as_deref();
                }
                Relation::Many(parents)
            }
            (Node::TaskProxy(proxy), "task") => Relation::One(store.task(&proxy.task).map(Node::Task)),
            (Node::TaskProxy(proxy), "first_parent") => Relation::One(
                proxy
                    .first_parent
                    .as_deref()
                    .and_then(|id| store.family_proxy(id))
                    .map(Node::FamilyProxy),
            ),
            (Node::TaskProxy(proxy), "ancestors") => Relation::Many(proxy_ids(&proxy.ancestors)),
            (Node::TaskProxy(proxy), "jobs") => Relation::Many(
                store.jobs().jobs_of(&proxy.id).into_iter().map(Node::Job).collect(),
            ),
            (Node::FamilyProxy(proxy), "family") => {
                Relation::One(store.family(&proxy.family).map(Node::Family))
            }
            (Node::FamilyProxy(proxy), "first_parent") => Relation::One(
                proxy
                    .first_parent
                    .as_deref()
                    .and_then(|id| store.family_proxy(id))
                    .map(Node::FamilyProxy),
            ),
            (Node::FamilyProxy(proxy), "ancestors") => Relation::Many(proxy_ids(&proxy.ancestors)),
            (Node::FamilyProxy(proxy), "child_tasks") => Relation::Many(
                proxy
                    .child_tasks
                    .iter()
                    .filter_map(|id| store.task_proxy(id).map(Node::TaskProxy))
                    .collect(),
            ),
            (Node::FamilyProxy(proxy), "child_families") => Relation::Many(proxy_ids(&proxy.child_families)),
            (Node::Job(job), "task_proxy") => {
                Relation::One(store.task_proxy(&job.task_proxy).map(Node::TaskProxy))
            }
            _ => return None,
        };
        Some(relation)
    }
}

fn root_nodes<'a>(store: &'a DataStore, name: &str) -> Option<Vec<Node<'a>>> {
    Some(match name {
        "workflows" => vec![Node::Workflow(store.workflow())],
        "tasks" => store.tasks().map(Node::Task).collect(),
        "families" => store.families().map(Node::Family).collect(),
        "task_proxies" => store.task_proxies().map(Node::TaskProxy).collect(),
        "family_proxies" => store.family_proxies().map(Node::FamilyProxy).collect(),
        "jobs" => store.jobs().iter().map(Node::Job).collect(),
        _ => return None,
    })
}

/// Pick sub-keys out of a JSON-valued field.
fn select_json(value: &Value, selections: &[Field]) -> Value {
    let mut object = Map::new();
    for field in selections {
        let inner = value.get(&field.name).cloned().unwrap_or(Value::Null);
        let picked = if field.selections.is_empty() {
            inner
        } else {
            select_json(&inner, &field.selections)
        };
        object.insert(field.response_key().to_string(), picked);
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data_store::tests::sample_store;

    fn run(request: &str, variables: Value, privilege: Privilege) -> (QueryOutcome, Vec<crate::queue::QueuedCommand>) {
        let store = sample_store();
        let (queue, mut receiver) = CommandQueue::channel();
        let env = QueryEnv {
            store: &store,
            queue: &queue,
            user: "tester",
            privilege,
        };
        let outcome = execute(request, variables.as_object(), &env);
        let mut queued = Vec::new();
        while let Ok(command) = receiver.try_recv() {
            queued.push(command);
        }
        (outcome, queued)
    }

    fn data(request: &str, variables: Value) -> Value {
        match run(request, variables, Privilege::Read).0 {
            QueryOutcome::Data(data) => data,
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn nested_proxies_with_filters() {
        let result = data(
            r#"query ($states: [String]) {
                workflows {
                  name
                  task_proxies(states: $states) {
                    id
                    first_parent { id name }
                    jobs { id submit_num }
                  }
                }
              }"#,
            json!({"states": ["running"]}),
        );
        let proxies = &result["workflows"][0]["task_proxies"];
        assert_eq!(proxies.as_array().unwrap().len(), 1);
        assert_eq!(proxies[0]["id"], json!("flow//1/foo"));
        assert_eq!(proxies[0]["first_parent"], json!({"id": "flow//1/FAM", "name": "FAM"}));
        assert_eq!(proxies[0]["jobs"][0]["submit_num"], json!(1));
    }

    #[test]
    fn family_proxies_exclude_roots_and_depth() {
        let result = data(
            r#"{
                family_proxies(exids: ["*/root"], maxdepth: 1) { id __typename }
                cycles: family_proxies(ids: ["*/root"]) { cycle_point child_families { name } }
            }"#,
            json!({}),
        );
        let ids: Vec<&str> = result["family_proxies"]
            .as_array()
            .unwrap()
            .iter()
            .map(|fp| fp["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["flow//1/FAM", "flow//2/FAM"]);
        assert_eq!(result["family_proxies"][0]["__typename"], json!("FamilyProxy"));
        assert_eq!(result["cycles"].as_array().unwrap().len(), 2);
        assert_eq!(result["cycles"][0]["child_families"][0]["name"], json!("FAM"));
    }

    #[test]
    fn suite_info_and_json_sub_selection() {
        let result = data(
            "{ suite_info { name state_totals { waiting running } time_zone_info { string_basic } } }",
            json!({}),
        );
        assert_eq!(result["suite_info"]["state_totals"], json!({"waiting": 2, "running": 1}));
        assert_eq!(result["suite_info"]["time_zone_info"]["string_basic"], json!("Z"));
    }

    #[test]
    fn field_errors_carry_paths() {
        let (outcome, _) = run(
            "{ task_proxies(ids: [\"1/foo\"]) { id colour } bogus { id } }",
            json!({}),
            Privilege::Read,
        );
        let QueryOutcome::Errors(errors) = outcome else {
            panic!("expected errors");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].path, vec![json!("task_proxies"), json!(0), json!("colour")]);
        assert!(errors[1].message.contains("bogus"));

        let rendered = QueryOutcome::Errors(errors).into_value();
        assert!(rendered[0]["error"]["message"].is_string());
    }

    #[test]
    fn relation_without_selection_and_unknown_argument() {
        let (outcome, _) = run("{ workflows { task_proxies } }", json!({}), Privilege::Read);
        assert!(matches!(outcome, QueryOutcome::Errors(_)));
        let (outcome, _) = run("{ jobs(sort: true) { id } }", json!({}), Privilege::Read);
        assert!(matches!(outcome, QueryOutcome::Errors(_)));
    }

    #[test]
    fn parse_failures_are_string_errors() {
        let (outcome, _) = run("{ workflows { ...F } }", json!({}), Privilege::Read);
        let value = outcome.into_value();
        let text = value.as_str().unwrap();
        assert!(text.starts_with("ERROR: query execution error \n"));
    }

    #[test]
    fn mutations_queue_commands_when_authorised() {
        let (outcome, queued) = run(
            r#"mutation { stop_suite(stop_type: now) { command_queued } }"#,
            json!({}),
            Privilege::Control,
        );
        assert_eq!(
            outcome,
            QueryOutcome::Data(json!({"stop_suite": {"command_queued": true}}))
        );
        assert_eq!(queued[0].as_tuple(), json!(["stop_now", [], {}]));

        let (outcome, queued) = run(
            r#"mutation { hold_tasks(task_globs: ["foo.1"]) { command_queued } }"#,
            json!({}),
            Privilege::Read,
        );
        assert!(matches!(outcome, QueryOutcome::Errors(_)));
        assert!(queued.is_empty());
    }

    #[test]
    fn singular_lookups() {
        let result = data(
            r#"{ job(id: "flow//1/foo/01") { state task_proxy { name } } task(id: "nothing") { id } }"#,
            json!({}),
        );
        assert_eq!(result["job"]["task_proxy"]["name"], json!("foo"));
        assert_eq!(result["task"], Value::Null);
    }
}
