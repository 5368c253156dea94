//! Handlers behind every exposed operation.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::bridge::{self, Mutation, QueryEnv};
use crate::registry::{CallContext, MethodId, MethodRegistry, Output, RegistryBuilder, RegistryError};
use crate::state::{read_store, ElementKind};

pub fn build_registry() -> Result<MethodRegistry, RegistryError> {
    let builder = RegistryBuilder::new()
        .register(MethodId::Api, api, false)
        .register(MethodId::Query, query, true)
        .register(MethodId::PbEntireWorkflow, pb_entire_workflow, true)
        .register(MethodId::PbDataElements, pb_data_elements, true);
    MethodId::ALL
        .into_iter()
        .filter(MethodId::is_mutation)
        .fold(builder, |builder, id| builder.register(id, mutate, true))
        .build()
}

/// Decode handler arguments, ignoring the injected `user` and `meta`.
fn parse_args<T: DeserializeOwned>(method: MethodId, mut args: Map<String, Value>) -> Result<T> {
    args.remove("user");
    args.remove("meta");
    serde_json::from_value(Value::Object(args))
        .with_context(|| format!("invalid arguments for {method}"))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiArgs {
    #[serde(default)]
    endpoint: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryArgs {
    request_string: String,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ElementArgs {
    element_type: String,
}

fn api(call: &CallContext<'_>, args: Map<String, Value>) -> Result<Output> {
    let args: ApiArgs = parse_args(call.method, args)?;
    let value = match args.endpoint {
        None => json!(call.registry.names()),
        Some(endpoint) => match call.registry.resolve(&endpoint) {
            Some(exposed) => Value::String(exposed.id.doc().to_string()),
            None => Value::String(format!("No method by name \"{endpoint}\"")),
        },
    };
    Ok(Output::Json(value))
}

fn query(call: &CallContext<'_>, args: Map<String, Value>) -> Result<Output> {
    let args: QueryArgs = parse_args(call.method, args)?;
    let store = read_store(&call.server.store);
    let env = QueryEnv {
        store: &store,
        queue: &call.server.queue,
        user: call.user,
        privilege: call.privilege,
    };
    let outcome = bridge::execute(&args.request_string, args.variables.as_ref(), &env);
    Ok(Output::Json(outcome.into_value()))
}

fn pb_entire_workflow(call: &CallContext<'_>, args: Map<String, Value>) -> Result<Output> {
    let NoArgs {} = parse_args(call.method, args)?;
    let bytes = read_store(&call.server.store).entire_workflow()?;
    Ok(Output::Bytes(bytes))
}

fn pb_data_elements(call: &CallContext<'_>, args: Map<String, Value>) -> Result<Output> {
    let args: ElementArgs = parse_args(call.method, args)?;
    let kind: ElementKind = args.element_type.parse()?;
    let bytes = read_store(&call.server.store).data_elements(kind)?;
    Ok(Output::Bytes(bytes))
}

/// Shared by every operation that only enqueues a scheduler command.
fn mutate(call: &CallContext<'_>, args: Map<String, Value>) -> Result<Output> {
    let command = Mutation::from_args(call.method, args)?.into_command();
    let name = command.name.clone();
    let queued = call.server.queue.put(command);
    info!(user = %call.user, method = %call.method, command = %name, queued, "command received");
    Ok(Output::Json(json!({ "command_queued": queued })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServerContext;
    use crate::queue::{CommandQueue, QueuedCommand};
    use crate::state::{data_store::tests::sample_store, shared, ElementKind};
    use base64::{engine::general_purpose, Engine as _};
    use tokio::sync::mpsc::UnboundedReceiver;
    use wfrt_common::{GlobalConfig, Privilege};

    fn server() -> (ServerContext, UnboundedReceiver<QueuedCommand>) {
        let (queue, receiver) = CommandQueue::channel();
        let ctx = ServerContext {
            workflow: "flow".into(),
            owner: "owner".into(),
            config: GlobalConfig::default(),
            store: shared(sample_store()),
            queue,
        };
        (ctx, receiver)
    }

    fn call(method: MethodId, args: Value) -> Result<Value> {
        let (ctx, _rx) = server();
        let registry = build_registry()?;
        let call = CallContext {
            method,
            server: &ctx,
            registry: &registry,
            user: "owner",
            privilege: Privilege::Control,
        };
        let exposed = registry.resolve(method.name()).context("registered")?;
        let mut args = args.as_object().cloned().unwrap_or_default();
        args.insert("user".into(), json!("owner"));
        (exposed.handler)(&call, args).map(Output::into_value)
    }

    #[test]
    fn registry_covers_every_operation() {
        let registry = build_registry().unwrap();
        assert_eq!(registry.names().len(), MethodId::ALL.len());
        assert!(!registry.resolve("api").unwrap().requires_auth);
        assert!(registry.resolve("hold_tasks").unwrap().requires_auth);
    }

    #[test]
    fn api_lists_and_documents() {
        let names = call(MethodId::Api, json!({})).unwrap();
        assert!(names.as_array().unwrap().contains(&json!("pb_entire_workflow")));

        let doc = call(MethodId::Api, json!({"endpoint": "stop_suite"})).unwrap();
        assert!(doc.as_str().unwrap().starts_with("Stop the workflow."));

        let missing = call(MethodId::Api, json!({"endpoint": "fly"})).unwrap();
        assert_eq!(missing, json!("No method by name \"fly\""));
    }

    #[test]
    fn query_returns_data() {
        let data = call(
            MethodId::Query,
            json!({"request_string": "{ workflows { name port } }", "variables": null}),
        )
        .unwrap();
        assert_eq!(data, json!({"workflows": [{"name": "flow", "port": null}]}));
    }

    #[test]
    fn unexpected_arguments_are_rejected() {
        let err = call(MethodId::Query, json!({"request_string": "{}", "extra": 1})).unwrap_err();
        assert!(err.to_string().contains("invalid arguments for query"));
        assert!(call(MethodId::PbEntireWorkflow, json!({"full": true})).is_err());
    }

    #[test]
    fn element_data_is_base64_msgpack() {
        let encoded = call(MethodId::PbDataElements, json!({"element_type": "jobs"})).unwrap();
        let bytes = general_purpose::STANDARD
            .decode(encoded.as_str().unwrap())
            .unwrap();
        let batch: crate::state::data_store::ElementBatch = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(batch.kind, ElementKind::Jobs);
        assert_eq!(batch.updated.len(), 1);
    }

    #[test]
    fn mutations_report_queueing() {
        let (ctx, mut rx) = server();
        let registry = build_registry().unwrap();
        let call = CallContext {
            method: MethodId::HoldTasks,
            server: &ctx,
            registry: &registry,
            user: "owner",
            privilege: Privilege::Control,
        };
        let mut args = Map::new();
        args.insert("task_globs".into(), json!(["foo.1"]));
        let out = mutate(&call, args).unwrap().into_value();
        assert_eq!(out, json!({"command_queued": true}));
        assert_eq!(
            rx.try_recv().unwrap().as_tuple(),
            json!(["hold_tasks", [["foo.1"]], {}])
        );
    }
}
