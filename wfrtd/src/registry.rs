//! The fixed table of operations the command channel exposes.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Value};
use wfrt_common::Privilege;

use crate::context::ServerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodId {
    Api,
    Query,
    PbEntireWorkflow,
    PbDataElements,
    Broadcast,
    StopSuite,
    HoldSuite,
    ReleaseSuite,
    ReloadSuite,
    SetVerbosity,
    TakeCheckpoint,
    PutExtTrigger,
    HoldTasks,
    KillTasks,
    PollTasks,
    ReleaseTasks,
    RemoveTasks,
    ResetTaskStates,
    SpawnTasks,
    TriggerTasks,
}

impl MethodId {
    pub const ALL: [MethodId; 20] = [
        MethodId::Api,
        MethodId::Query,
        MethodId::PbEntireWorkflow,
        MethodId::PbDataElements,
        MethodId::Broadcast,
        MethodId::StopSuite,
        MethodId::HoldSuite,
        MethodId::ReleaseSuite,
        MethodId::ReloadSuite,
        MethodId::SetVerbosity,
        MethodId::TakeCheckpoint,
        MethodId::PutExtTrigger,
        MethodId::HoldTasks,
        MethodId::KillTasks,
        MethodId::PollTasks,
        MethodId::ReleaseTasks,
        MethodId::RemoveTasks,
        MethodId::ResetTaskStates,
        MethodId::SpawnTasks,
        MethodId::TriggerTasks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MethodId::Api => "api",
            MethodId::Query => "query",
            MethodId::PbEntireWorkflow => "pb_entire_workflow",
            MethodId::PbDataElements => "pb_data_elements",
            MethodId::Broadcast => "broadcast",
            MethodId::StopSuite => "stop_suite",
            MethodId::HoldSuite => "hold_suite",
            MethodId::ReleaseSuite => "release_suite",
            MethodId::ReloadSuite => "reload_suite",
            MethodId::SetVerbosity => "set_verbosity",
            MethodId::TakeCheckpoint => "take_checkpoint",
            MethodId::PutExtTrigger => "put_ext_trigger",
            MethodId::HoldTasks => "hold_tasks",
            MethodId::KillTasks => "kill_tasks",
            MethodId::PollTasks => "poll_tasks",
            MethodId::ReleaseTasks => "release_tasks",
            MethodId::RemoveTasks => "remove_tasks",
            MethodId::ResetTaskStates => "reset_task_states",
            MethodId::SpawnTasks => "spawn_tasks",
            MethodId::TriggerTasks => "trigger_tasks",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        MethodId::ALL.into_iter().find(|id| id.name() == name)
    }

    pub fn required_privilege(&self) -> Privilege {
        match self {
            MethodId::Api => Privilege::Identity,
            MethodId::Query | MethodId::PbEntireWorkflow | MethodId::PbDataElements => {
                Privilege::Read
            }
            MethodId::StopSuite => Privilege::Shutdown,
            _ => Privilege::Control,
        }
    }

    /// Operations that only enqueue a scheduler command.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            MethodId::Api | MethodId::Query | MethodId::PbEntireWorkflow | MethodId::PbDataElements
        )
    }

    pub fn doc(&self) -> &'static str {
        match self {
            MethodId::Api => {
                "Return information about this API.\n\
                 \n\
                 With no `endpoint`, list every callable operation; otherwise\n\
                 return the documentation of the named operation."
            }
            MethodId::Query => {
                "Execute a query or mutation document.\n\
                 \n\
                 Args: request_string, variables (optional mapping).\n\
                 Returns the result data or a list of errors."
            }
            MethodId::PbEntireWorkflow => {
                "Return a MessagePack snapshot of the whole workflow, base64 encoded."
            }
            MethodId::PbDataElements => {
                "Return MessagePack data for one element type, base64 encoded.\n\
                 \n\
                 Args: element_type (workflow, tasks, families, task_proxies,\n\
                 family_proxies or jobs)."
            }
            MethodId::Broadcast => {
                "Put, clear or expire broadcast settings.\n\
                 \n\
                 Args: mode (put|clear|expire), cycle_points, namespaces,\n\
                 settings, cutoff."
            }
            MethodId::StopSuite => {
                "Stop the workflow.\n\
                 \n\
                 Args: stop_type (clean|kill|now|now_now), or one of\n\
                 cycle_point, clock_time, task."
            }
            MethodId::HoldSuite => {
                "Hold the workflow, or hold it after point_string if given."
            }
            MethodId::ReleaseSuite => "Release a held workflow.",
            MethodId::ReloadSuite => "Reload the workflow definition.",
            MethodId::SetVerbosity => {
                "Set the scheduler log level.\n\
                 \n\
                 Args: level (debug|info|warning|error|critical)."
            }
            MethodId::TakeCheckpoint => "Write a named checkpoint of the workflow state.",
            MethodId::PutExtTrigger => {
                "Satisfy an external trigger.\n\
                 \n\
                 Args: message, id."
            }
            MethodId::HoldTasks => "Hold tasks matching task_globs.",
            MethodId::KillTasks => "Kill the active jobs of tasks matching task_globs.",
            MethodId::PollTasks => {
                "Poll the jobs of tasks matching task_globs.\n\
                 \n\
                 Args: task_globs, poll_succeeded."
            }
            MethodId::ReleaseTasks => "Release held tasks matching task_globs.",
            MethodId::RemoveTasks => {
                "Remove tasks matching task_globs from the pool.\n\
                 \n\
                 Args: task_globs, spawn."
            }
            MethodId::ResetTaskStates => {
                "Reset the state or outputs of tasks matching task_globs.\n\
                 \n\
                 Args: task_globs, state, outputs."
            }
            MethodId::SpawnTasks => "Spawn task proxies for task_globs.",
            MethodId::TriggerTasks => {
                "Trigger tasks matching task_globs.\n\
                 \n\
                 Args: task_globs, back_out."
            }
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a handler hands back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Json(Value),
    /// Pre-serialised payload, sent as base64 text.
    Bytes(Vec<u8>),
}

impl Output {
    pub fn into_value(self) -> Value {
        match self {
            Output::Json(value) => value,
            Output::Bytes(bytes) => Value::String(general_purpose::STANDARD.encode(bytes)),
        }
    }
}

pub struct CallContext<'a> {
    pub method: MethodId,
    pub server: &'a ServerContext,
    pub registry: &'a MethodRegistry,
    pub user: &'a str,
    pub privilege: Privilege,
}

pub type Handler = fn(&CallContext<'_>, Map<String, Value>) -> anyhow::Result<Output>;

#[derive(Clone, Copy)]
pub struct Exposed {
    pub id: MethodId,
    pub handler: Handler,
    pub requires_auth: bool,
}

impl fmt::Debug for Exposed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exposed")
            .field("id", &self.id)
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no handler registered for '{0}'")]
    Missing(MethodId),
    #[error("handler for '{0}' registered twice")]
    Duplicate(MethodId),
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<MethodId, Exposed>,
    duplicate: Option<MethodId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, id: MethodId, handler: Handler, requires_auth: bool) -> Self {
        let exposed = Exposed {
            id,
            handler,
            requires_auth,
        };
        if self.entries.insert(id, exposed).is_some() && self.duplicate.is_none() {
            self.duplicate = Some(id);
        }
        self
    }

    pub fn build(self) -> Result<MethodRegistry, RegistryError> {
        if let Some(id) = self.duplicate {
            return Err(RegistryError::Duplicate(id));
        }
        if let Some(missing) = MethodId::ALL
            .into_iter()
            .find(|id| !self.entries.contains_key(id))
        {
            return Err(RegistryError::Missing(missing));
        }
        Ok(MethodRegistry {
            entries: self.entries,
        })
    }
}

/// Immutable once built.
#[derive(Debug)]
pub struct MethodRegistry {
    entries: BTreeMap<MethodId, Exposed>,
}

impl MethodRegistry {
    pub fn resolve(&self, name: &str) -> Option<Exposed> {
        MethodId::from_name(name).and_then(|id| self.entries.get(&id).copied())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.keys().map(MethodId::name).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_: &CallContext<'_>, _: Map<String, Value>) -> anyhow::Result<Output> {
        Ok(Output::Json(Value::Null))
    }

    fn full_builder() -> RegistryBuilder {
        MethodId::ALL
            .into_iter()
            .fold(RegistryBuilder::new(), |builder, id| builder.register(id, noop, true))
    }

    #[test]
    fn incomplete_table_is_rejected() {
        let builder = MethodId::ALL
            .into_iter()
            .filter(|id| *id != MethodId::KillTasks)
            .fold(RegistryBuilder::new(), |builder, id| builder.register(id, noop, true));
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::Missing(MethodId::KillTasks)
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let builder = full_builder().register(MethodId::Api, noop, false);
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::Duplicate(MethodId::Api)
        );
    }

    #[test]
    fn resolves_by_name_and_lists_sorted() {
        let registry = full_builder().build().unwrap();
        assert_eq!(registry.resolve("stop_suite").unwrap().id, MethodId::StopSuite);
        assert!(registry.resolve("shutdown_everything").is_none());
        let names = registry.names();
        assert_eq!(names.len(), 20);
        assert_eq!(names.first(), Some(&"api"));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn privileges_and_binary_output() {
        assert_eq!(MethodId::StopSuite.required_privilege(), Privilege::Shutdown);
        assert_eq!(MethodId::Query.required_privilege(), Privilege::Read);
        assert!(!MethodId::Query.is_mutation());
        assert!(MethodId::HoldTasks.is_mutation());
        assert_eq!(Output::Bytes(vec![1, 2, 3]).into_value(), json!("AQID"));
    }
}
