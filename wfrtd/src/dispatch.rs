//! Turns one decoded request into one reply envelope.

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, warn};
use wfrt_common::protocol::MALFORMED_REQUEST;
use wfrt_common::{Privilege, ReplyEnvelope, RequestEnvelope};

use crate::context::ServerContext;
use crate::registry::{CallContext, MethodId, MethodRegistry};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{}", MALFORMED_REQUEST)]
    Malformed,
    #[error("No method by the name \"{0}\"")]
    NotFound(String),
    #[error("Not authorized: {user} may not call {command} (requires {required} privilege)")]
    Unauthorized {
        user: String,
        command: MethodId,
        required: Privilege,
    },
    #[error("{0}")]
    Execution(anyhow::Error),
    #[error("handler panicked")]
    Panicked,
}

impl DispatchError {
    pub fn into_reply(self) -> ReplyEnvelope {
        match self {
            DispatchError::Execution(err) => {
                ReplyEnvelope::error_with_trace(err.to_string(), format!("{err:?}"))
            }
            other => ReplyEnvelope::error(other.to_string()),
        }
    }
}

/// Run `request` on behalf of `user`. Never fails: every problem becomes an
/// error envelope.
pub fn dispatch(
    server: &ServerContext,
    registry: &MethodRegistry,
    user: &str,
    request: &Value,
) -> ReplyEnvelope {
    match try_dispatch(server, registry, user, request) {
        Ok(data) => ReplyEnvelope::Data(data),
        Err(err) => {
            match &err {
                DispatchError::Execution(inner) => warn!(%user, "request failed: {:#}", inner),
                DispatchError::Panicked => warn!(%user, "request handler panicked"),
                other => debug!(%user, "request rejected: {}", other),
            }
            err.into_reply()
        }
    }
}

fn try_dispatch(
    server: &ServerContext,
    registry: &MethodRegistry,
    user: &str,
    request: &Value,
) -> Result<Value, DispatchError> {
    let envelope: RequestEnvelope =
        serde_json::from_value(request.clone()).map_err(|_| DispatchError::Malformed)?;
    let exposed = registry
        .resolve(&envelope.command)
        .ok_or_else(|| DispatchError::NotFound(envelope.command.clone()))?;

    let privilege = server.privilege_for(user);
    if exposed.requires_auth {
        let required = exposed.id.required_privilege();
        if !privilege.satisfies(required) {
            return Err(DispatchError::Unauthorized {
                user: user.to_string(),
                command: exposed.id,
                required,
            });
        }
    }

    let mut args = envelope.args;
    args.insert("user".into(), Value::String(user.to_string()));
    if let Some(meta) = envelope.meta {
        args.insert("meta".into(), Value::Object(meta));
    }

    let call = CallContext {
        method: exposed.id,
        server,
        registry,
        user,
        privilege,
    };
    debug!(%user, command = %exposed.id, "dispatching request");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (exposed.handler)(&call, args)))
        .map_err(|_| DispatchError::Panicked)?;
    outcome
        .map(|output| output.into_value())
        .map_err(DispatchError::Execution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::build_registry;
    use crate::queue::CommandQueue;
    use crate::state::{data_store::tests::sample_store, shared};
    use serde_json::json;
    use wfrt_common::GlobalConfig;

    fn context() -> (ServerContext, tokio::sync::mpsc::UnboundedReceiver<crate::queue::QueuedCommand>) {
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

    fn error_message(reply: ReplyEnvelope) -> String {
        match reply {
            ReplyEnvelope::Error(err) => err.message,
            ReplyEnvelope::Data(data) => panic!("expected error, got {data}"),
        }
    }

    #[test]
    fn malformed_and_unknown_requests() {
        let (ctx, _rx) = context();
        let registry = build_registry().unwrap();
        let reply = dispatch(&ctx, &registry, "owner", &json!({"args": {}}));
        assert_eq!(error_message(reply), MALFORMED_REQUEST);

        let reply = dispatch(&ctx, &registry, "owner", &json!({"command": "fly", "args": {}}));
        assert_eq!(error_message(reply), "No method by the name \"fly\"");
    }

    #[test]
    fn owner_can_stop_and_others_cannot() {
        let (ctx, mut rx) = context();
        let registry = build_registry().unwrap();
        let request = json!({"command": "stop_suite", "args": {"stop_type": "now"}});

        let reply = dispatch(&ctx, &registry, "mallory", &request);
        assert!(error_message(reply).starts_with("Not authorized"));
        assert!(rx.try_recv().is_err());

        let reply = dispatch(&ctx, &registry, "owner", &request);
        assert_eq!(reply, ReplyEnvelope::Data(json!({"command_queued": true})));
        assert_eq!(rx.try_recv().unwrap().as_tuple(), json!(["stop_now", [], {}]));
    }

    #[test]
    fn handler_errors_carry_a_trace() {
        let (ctx, _rx) = context();
        let registry = build_registry().unwrap();
        let request = json!({"command": "pb_data_elements", "args": {"element_type": "nodes"}});
        match dispatch(&ctx, &registry, "owner", &request) {
            ReplyEnvelope::Error(err) => {
                assert!(err.message.contains("nodes"));
                assert!(err.traceback.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn api_needs_no_privilege() {
        let (ctx, _rx) = context();
        let registry = build_registry().unwrap();
        let reply = dispatch(&ctx, &registry, "mallory", &json!({"command": "api", "args": {}}));
        let ReplyEnvelope::Data(Value::Array(names)) = reply else {
            panic!("expected a list of names");
        };
        assert!(names.contains(&json!("stop_suite")));
    }
}
