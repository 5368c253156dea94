//! Turns a flat `workflows { ... }` query result into the display tree.
//!
//! Each pass starts from an empty arena: nodes are created on first
//! mention and wired to their parents by index, so query results may
//! reference a family before it is listed. Optional pruning drops empty
//! families and cycles, then children are put in natural order.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use wfrt_common::{idpop, IdError};

use crate::natural_sort::natural_cmp;

pub const ROOT_FAMILY: &str = "root";
pub const SPRING_ID: &str = "#spring";
const SPRING_LABEL: &str = "Loading ...";

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("query result has no `{0}` list")]
    MissingField(&'static str),
    #[error("workflow entry without an id")]
    MissingId,
    #[error("bad id '{id}': {source}")]
    BadId { id: String, source: IdError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Workflow,
    Cycle,
    Family,
    Task,
    Job,
    JobInfo,
    Spring,
}

/// One node of the finished tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub id: String,
    pub data: Value,
    pub children: Vec<Node>,
}

impl Node {
    fn leaf(kind: NodeKind, id: &str, data: Value) -> Self {
        Self {
            kind,
            id: id.to_string(),
            data,
            children: Vec::new(),
        }
    }

    /// Depth-first search for the node with this kind and id.
    pub fn find(&self, kind: NodeKind, id: &str) -> Option<&Node> {
        if self.kind == kind && self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(kind, id))
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Idx(usize);

#[derive(Debug)]
struct Slot {
    kind: NodeKind,
    id: String,
    data: Value,
    parent: Option<Idx>,
    children: Vec<Idx>,
}

/// Arena of one workflow's nodes, unique per `(kind, id)`.
#[derive(Debug, Default)]
struct NodeStore {
    slots: Vec<Slot>,
    index: HashMap<(NodeKind, String), Idx>,
}

impl NodeStore {
    /// Return the node for `(kind, id)`, creating it if needed. Data given
    /// later fills in a node first created as a forward reference.
    fn add(&mut self, kind: NodeKind, id: &str, data: Option<Value>) -> Idx {
        if let Some(&idx) = self.index.get(&(kind, id.to_string())) {
            if let Some(data) = data {
                let slot = &mut self.slots[idx.0];
                if slot.data.is_null() {
                    slot.data = data;
                }
            }
            return idx;
        }
        let idx = Idx(self.slots.len());
        self.slots.push(Slot {
            kind,
            id: id.to_string(),
            data: data.unwrap_or(Value::Null),
            parent: None,
            children: Vec::new(),
        });
        self.index.insert((kind, id.to_string()), idx);
        idx
    }

    fn attach(&mut self, parent: Idx, child: Idx) {
        if self.slots[child.0].parent == Some(parent) {
            return;
        }
        if let Some(old) = self.slots[child.0].parent {
            self.slots[old.0].children.retain(|&c| c != child);
        }
        self.slots[child.0].parent = Some(parent);
        self.slots[parent.0].children.push(child);
    }

    fn detach(&mut self, child: Idx) -> Option<Idx> {
        let parent = self.slots[child.0].parent.take()?;
        self.slots[parent.0].children.retain(|&c| c != child);
        Some(parent)
    }

    fn of_kind(&self, kind: NodeKind) -> impl Iterator<Item = Idx> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.kind == kind)
            .map(|(i, _)| Idx(i))
    }

    /// Drop childless families and cycles, re-examining the parent of each
    /// removed node. Workflows are never removed.
    fn prune_empty_families(&mut self) {
        let mut stack: BTreeSet<usize> = self
            .of_kind(NodeKind::Family)
            .chain(self.of_kind(NodeKind::Cycle))
            .map(|idx| idx.0)
            .collect();
        while let Some(next) = stack.pop_first() {
            let idx = Idx(next);
            if !self.slots[idx.0].children.is_empty() {
                continue;
            }
            let Some(parent) = self.detach(idx) else {
                continue;
            };
            debug!(id = %self.slots[idx.0].id, "pruned empty {:?}", self.slots[idx.0].kind);
            if matches!(self.slots[parent.0].kind, NodeKind::Family | NodeKind::Cycle) {
                stack.insert(parent.0);
            }
        }
    }

    /// Natural order by id, except a task's jobs which keep query order.
    fn sort_children(&mut self) {
        for i in 0..self.slots.len() {
            if self.slots[i].kind == NodeKind::Task {
                continue;
            }
            let mut children = std::mem::take(&mut self.slots[i].children);
            children.sort_by(|a, b| natural_cmp(&self.slots[a.0].id, &self.slots[b.0].id));
            self.slots[i].children = children;
        }
    }

    fn build(&self, idx: Idx) -> Node {
        let slot = &self.slots[idx.0];
        Node {
            kind: slot.kind,
            id: slot.id.clone(),
            data: slot.data.clone(),
            children: slot.children.iter().map(|&child| self.build(child)).collect(),
        }
    }
}

fn list<'a>(object: &'a Value, key: &str) -> &'a [Value] {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

fn pop(id: &str) -> Result<String, TreeError> {
    idpop(id).map_err(|source| TreeError::BadId {
        id: id.to_string(),
        source,
    })
}

/// Parent reference of a proxy: `(kind, id)` of the node it hangs under,
/// or `None` when the parent has gone away.
fn parent_of(proxy: &Value) -> Result<Option<(NodeKind, String)>, TreeError> {
    let Some(first_parent) = proxy.get("first_parent").filter(|p| p.is_object()) else {
        return Ok(None);
    };
    let Some(parent_id) = str_field(first_parent, "id") else {
        return Ok(None);
    };
    if str_field(first_parent, "name") == Some(ROOT_FAMILY) {
        Ok(Some((NodeKind::Cycle, pop(parent_id)?)))
    } else {
        Ok(Some((NodeKind::Family, parent_id.to_string())))
    }
}

fn is_connected(flow: &Value) -> bool {
    flow.get("port").is_some_and(|port| !port.is_null())
}

/// Build the tree for every workflow in `data` (`{"workflows": [...]}`).
///
/// Set `prune_families` when task state filters are active, since family
/// states are aggregates the query cannot filter on.
pub fn compute_tree(data: &Value, prune_families: bool) -> Result<Node, TreeError> {
    let flows = data
        .get("workflows")
        .and_then(Value::as_array)
        .ok_or(TreeError::MissingField("workflows"))?;
    let mut root = Node::leaf(NodeKind::Root, "root", json!({}));
    for flow in flows {
        root.children.push(workflow_tree(flow, prune_families)?);
    }
    Ok(root)
}

fn workflow_tree(flow: &Value, prune_families: bool) -> Result<Node, TreeError> {
    let flow_id = str_field(flow, "id").ok_or(TreeError::MissingId)?;
    let mut nodes = NodeStore::default();
    let flow_idx = nodes.add(NodeKind::Workflow, flow_id, Some(flow.clone()));

    for cycle in list(flow, "cycle_points") {
        let Some(raw) = str_field(cycle, "id") else {
            continue;
        };
        let cycle_id = pop(raw)?;
        let mut data = cycle.clone();
        data["id"] = Value::String(cycle_id.clone());
        let idx = nodes.add(NodeKind::Cycle, &cycle_id, Some(data));
        nodes.attach(flow_idx, idx);
    }

    let families = list(flow, "family_proxies");
    for family in families {
        if let Some(id) = str_field(family, "id") {
            nodes.add(NodeKind::Family, id, Some(family.clone()));
        }
    }
    for family in families {
        let Some(id) = str_field(family, "id") else {
            continue;
        };
        let idx = nodes.add(NodeKind::Family, id, None);
        let (kind, parent_id) = match parent_of(family)? {
            Some(parent) => parent,
            None => (NodeKind::Cycle, pop(id)?),
        };
        let parent = nodes.add(kind, &parent_id, None);
        nodes.attach(parent, idx);
    }

    for task in list(flow, "task_proxies") {
        let Some(id) = str_field(task, "id") else {
            continue;
        };
        // removed between query resolution and now
        let Some((kind, parent_id)) = parent_of(task)? else {
            debug!(task = id, "skipping task without a parent");
            continue;
        };
        let task_idx = nodes.add(NodeKind::Task, id, Some(task.clone()));
        let parent = nodes.add(kind, &parent_id, None);
        nodes.attach(parent, task_idx);
        for job in list(task, "jobs") {
            let Some(job_id) = str_field(job, "id") else {
                continue;
            };
            let job_idx = nodes.add(NodeKind::Job, job_id, Some(job.clone()));
            let info_idx = nodes.add(NodeKind::JobInfo, &format!("{job_id}_info"), Some(job.clone()));
            nodes.attach(job_idx, info_idx);
            nodes.attach(task_idx, job_idx);
        }
    }

    if prune_families {
        nodes.prune_empty_families();
    }
    nodes.sort_children();

    let mut tree = nodes.build(flow_idx);
    if !is_connected(flow) {
        let label = str_field(flow, "status_msg")
            .filter(|msg| !msg.is_empty())
            .unwrap_or(SPRING_LABEL);
        tree.children = vec![Node::leaf(NodeKind::Spring, SPRING_ID, json!({ "id": label }))];
    }
    Ok(tree)
}

/// Stand-in entry for a workflow we have not (yet) reached.
pub fn unreachable_workflow(id: &str, status: &str, message: &str) -> Value {
    let mut flow = Map::new();
    flow.insert("id".into(), json!(id));
    flow.insert("name".into(), json!(id));
    flow.insert("status".into(), json!(status));
    flow.insert("status_msg".into(), json!(message));
    Value::Object(flow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(id: &str, name: &str) -> Value {
        json!({"id": id, "name": name})
    }

    fn sample() -> Value {
        json!({
            "workflows": [{
                "id": "flow",
                "port": 1234,
                "cycle_points": [{"id": "flow//1/root", "point": "1"}],
                "family_proxies": [
                    {"id": "flow//1/FOOT", "name": "FOOT", "first_parent": parent("flow//1/FOO", "FOO")},
                    {"id": "flow//1/FOO", "name": "FOO", "first_parent": parent("flow//1/root", "root")},
                ],
                "task_proxies": [
                    {"id": "flow//1/worker", "name": "worker", "first_parent": parent("flow//1/root", "root"),
                     "jobs": [{"id": "flow//1/worker/03"}, {"id": "flow//1/worker/02"}, {"id": "flow//1/worker/01"}]},
                    {"id": "flow//1/pub", "name": "pub", "first_parent": parent("flow//1/root", "root"), "jobs": []},
                    {"id": "flow//1/fool", "name": "fool", "first_parent": parent("flow//1/FOOT", "FOOT"), "jobs": []},
                    {"id": "flow//1/gone", "name": "gone", "first_parent": null, "jobs": []},
                ],
            }]
        })
    }

    fn ids(node: &Node) -> Vec<&str> {
        node.children.iter().map(|child| child.id.as_str()).collect()
    }

    #[test]
    fn builds_the_hierarchy() {
        let tree = compute_tree(&sample(), false).unwrap();
        assert_eq!(tree.kind, NodeKind::Root);
        let flow = &tree.children[0];
        assert_eq!(flow.kind, NodeKind::Workflow);
        assert_eq!(ids(flow), vec!["flow//1"]);

        let cycle = &flow.children[0];
        assert_eq!(cycle.kind, NodeKind::Cycle);
        assert_eq!(cycle.data["point"], json!("1"));
        assert_eq!(ids(cycle), vec!["flow//1/FOO", "flow//1/pub", "flow//1/worker"]);

        let foo = &cycle.children[0];
        assert_eq!(ids(foo), vec!["flow//1/FOOT"]);
        assert_eq!(ids(&foo.children[0]), vec!["flow//1/fool"]);
        assert_eq!(foo.data["name"], json!("FOO"));

        // jobs keep submission order
        let worker = &cycle.children[2];
        assert_eq!(
            ids(worker),
            vec!["flow//1/worker/03", "flow//1/worker/02", "flow//1/worker/01"]
        );
        let job = &worker.children[0];
        assert_eq!(job.children.len(), 1);
        assert_eq!(job.children[0].kind, NodeKind::JobInfo);
        assert_eq!(job.children[0].id, "flow//1/worker/03_info");

        assert!(tree.find(NodeKind::Task, "flow//1/gone").is_none());
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let data = sample();
        assert_eq!(compute_tree(&data, true).unwrap(), compute_tree(&data, true).unwrap());
        assert_eq!(compute_tree(&data, false).unwrap(), compute_tree(&data, false).unwrap());
    }

    #[test]
    fn pruning_is_transitive() {
        let mut data = sample();
        // drop `fool`, leaving FOOT empty, which leaves FOO empty
        data["workflows"][0]["task_proxies"]
            .as_array_mut()
            .unwrap()
            .retain(|task| task["name"] != "fool");

        let kept = compute_tree(&data, false).unwrap();
        assert!(kept.find(NodeKind::Family, "flow//1/FOOT").is_some());

        let pruned = compute_tree(&data, true).unwrap();
        assert!(pruned.find(NodeKind::Family, "flow//1/FOOT").is_none());
        assert!(pruned.find(NodeKind::Family, "flow//1/FOO").is_none());
        let cycle = pruned.find(NodeKind::Cycle, "flow//1").unwrap();
        assert_eq!(ids(cycle), vec!["flow//1/pub", "flow//1/worker"]);
    }

    #[test]
    fn empty_cycles_are_pruned_but_workflows_stay() {
        let with_task = json!({
            "workflows": [{
                "id": "flow",
                "port": 1234,
                "cycle_points": [{"id": "flow//1/root"}],
                "family_proxies": [
                    {"id": "flow//1/FAM", "name": "FAM", "first_parent": parent("flow//1/root", "root")},
                ],
                "task_proxies": [
                    {"id": "flow//1/foo", "name": "foo", "first_parent": parent("flow//1/FAM", "FAM"), "jobs": []},
                ],
            }]
        });
        let tree = compute_tree(&with_task, true).unwrap();
        let cycle = tree.find(NodeKind::Cycle, "flow//1").unwrap();
        assert_eq!(ids(cycle), vec!["flow//1/FAM"]);
        assert_eq!(ids(&cycle.children[0]), vec!["flow//1/foo"]);

        let mut filtered = with_task.clone();
        filtered["workflows"][0]["task_proxies"] = json!([]);
        let unpruned = compute_tree(&filtered, false).unwrap();
        assert!(unpruned.find(NodeKind::Family, "flow//1/FAM").is_some());

        let tree = compute_tree(&filtered, true).unwrap();
        let flow = &tree.children[0];
        assert_eq!(flow.kind, NodeKind::Workflow);
        assert!(flow.children.is_empty());
        assert_eq!(tree.count(), 2);
    }

    #[test]
    fn unconnected_workflows_get_a_spring() {
        let data = json!({"workflows": [
            unreachable_workflow("quiet", "stopped", ""),
            unreachable_workflow("broken", "error", "connection refused"),
        ]});
        let tree = compute_tree(&data, false).unwrap();
        let quiet = &tree.children[0];
        assert_eq!(quiet.children.len(), 1);
        assert_eq!(quiet.children[0].kind, NodeKind::Spring);
        assert_eq!(quiet.children[0].data["id"], json!("Loading ..."));
        assert_eq!(tree.children[1].children[0].data["id"], json!("connection refused"));
    }

    #[test]
    fn forward_references_and_missing_lists() {
        let data = json!({"workflows": [{
            "id": "flow",
            "port": 1,
            "cycle_points": [{"id": "flow//2/root"}],
            "family_proxies": [
                {"id": "flow//2/B", "name": "B", "first_parent": parent("flow//2/A", "A")},
                {"id": "flow//2/A", "name": "A", "first_parent": parent("flow//2/root", "root")},
            ],
            "task_proxies": [
                {"id": "flow//2/t", "name": "t", "first_parent": parent("flow//2/B", "B")},
            ],
        }]});
        let tree = compute_tree(&data, false).unwrap();
        let b = tree.find(NodeKind::Family, "flow//2/B").unwrap();
        assert_eq!(b.data["name"], json!("B"));
        assert_eq!(ids(b), vec!["flow//2/t"]);
        let cycle = tree.find(NodeKind::Cycle, "flow//2").unwrap();
        assert_eq!(ids(cycle), vec!["flow//2/A"]);

        assert!(matches!(
            compute_tree(&json!({}), false),
            Err(TreeError::MissingField("workflows"))
        ));
    }
}
