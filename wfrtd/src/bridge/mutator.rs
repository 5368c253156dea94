//! Typed mutation arguments and their scheduler command tuples.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use wfrt_common::IdPattern;

use crate::logging::level_directive;
use crate::queue::QueuedCommand;
use crate::registry::MethodId;
use crate::state::is_task_status;

/// Keys injected by the transport that mutation handlers never take.
const IDENTITY_KEYS: [&str; 2] = ["user", "meta"];

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("'{0}' is not a mutation")]
    NotAMutation(MethodId),
    #[error("invalid arguments for {method}: {source}")]
    Arguments {
        method: MethodId,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(
        Option::<OneOrMany<T>>::deserialize(deserializer)?.map(|value| match value {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }),
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastMode {
    #[default]
    Put,
    Clear,
    Expire,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastArgs {
    #[serde(default)]
    pub mode: BroadcastMode,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cycle_points: Option<Vec<String>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub namespaces: Option<Vec<String>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub settings: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    pub cutoff: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    Clean,
    Kill,
    Now,
    NowNow,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopArgs {
    #[serde(default)]
    pub stop_type: Option<StopType>,
    #[serde(default)]
    pub cycle_point: Option<String>,
    #[serde(default)]
    pub clock_time: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoldSuiteArgs {
    #[serde(default)]
    pub point_string: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelArgs {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointArgs {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtTriggerArgs {
    pub message: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskActionArgs {
    #[serde(default, deserialize_with = "one_or_many")]
    pub task_globs: Option<Vec<String>>,
    #[serde(default)]
    pub poll_succeeded: Option<bool>,
    #[serde(default)]
    pub spawn: Option<bool>,
    #[serde(default)]
    pub back_out: Option<bool>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub outputs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Broadcast(BroadcastArgs),
    StopSuite(StopArgs),
    HoldSuite(HoldSuiteArgs),
    ReleaseSuite,
    ReloadSuite,
    SetVerbosity(LevelArgs),
    TakeCheckpoint(CheckpointArgs),
    PutExtTrigger(ExtTriggerArgs),
    TaskAction(MethodId, TaskActionArgs),
}

impl Mutation {
    /// Validate `args` for `method`. Transport-injected `user` and `meta`
    /// keys are ignored.
    pub fn from_args(method: MethodId, mut args: Map<String, Value>) -> Result<Self, MutationError> {
        for key in IDENTITY_KEYS {
            args.remove(key);
        }
        let mutation = match method {
            MethodId::Broadcast => Mutation::Broadcast(typed(method, args)?),
            MethodId::StopSuite => Mutation::StopSuite(typed(method, args)?),
            MethodId::HoldSuite => Mutation::HoldSuite(typed(method, args)?),
            MethodId::ReleaseSuite => {
                typed::<NoArgs>(method, args)?;
                Mutation::ReleaseSuite
            }
            MethodId::ReloadSuite => {
                typed::<NoArgs>(method, args)?;
                Mutation::ReloadSuite
            }
            MethodId::SetVerbosity => Mutation::SetVerbosity(typed(method, args)?),
            MethodId::TakeCheckpoint => Mutation::TakeCheckpoint(typed(method, args)?),
            MethodId::PutExtTrigger => Mutation::PutExtTrigger(typed(method, args)?),
            MethodId::HoldTasks
            | MethodId::KillTasks
            | MethodId::PollTasks
            | MethodId::ReleaseTasks
            | MethodId::RemoveTasks
            | MethodId::ResetTaskStates
            | MethodId::SpawnTasks
            | MethodId::TriggerTasks => Mutation::TaskAction(method, typed(method, args)?),
            other => return Err(MutationError::NotAMutation(other)),
        };
        mutation.validate()?;
        Ok(mutation)
    }

    pub fn method(&self) -> MethodId {
        match self {
            Mutation::Broadcast(_) => MethodId::Broadcast,
            Mutation::StopSuite(_) => MethodId::StopSuite,
            Mutation::HoldSuite(_) => MethodId::HoldSuite,
            Mutation::ReleaseSuite => MethodId::ReleaseSuite,
            Mutation::ReloadSuite => MethodId::ReloadSuite,
            Mutation::SetVerbosity(_) => MethodId::SetVerbosity,
            Mutation::TakeCheckpoint(_) => MethodId::TakeCheckpoint,
            Mutation::PutExtTrigger(_) => MethodId::PutExtTrigger,
            Mutation::TaskAction(method, _) => *method,
        }
    }

    fn validate(&self) -> Result<(), MutationError> {
        match self {
            Mutation::Broadcast(args) => match args.mode {
                BroadcastMode::Put if args.settings.as_ref().map_or(true, Vec::is_empty) => Err(
                    MutationError::Invalid("broadcast put requires settings".into()),
                ),
                BroadcastMode::Expire if args.cutoff.is_none() => Err(MutationError::Invalid(
                    "broadcast expire requires a cutoff".into(),
                )),
                _ => Ok(()),
            },
            Mutation::StopSuite(args) => {
                let given = [
                    args.stop_type.is_some(),
                    args.cycle_point.is_some(),
                    args.clock_time.is_some(),
                    args.task.is_some(),
                ];
                if given.iter().filter(|g| **g).count() > 1 {
                    return Err(MutationError::Invalid(
                        "stop_type, cycle_point, clock_time and task are mutually exclusive".into(),
                    ));
                }
                if let Some(clock_time) = &args.clock_time {
                    chrono::DateTime::parse_from_rfc3339(clock_time).map_err(|err| {
                        MutationError::Invalid(format!("invalid clock_time '{clock_time}': {err}"))
                    })?;
                }
                if let Some(task) = &args.task {
                    IdPattern::parse(task)
                        .map_err(|err| MutationError::Invalid(format!("invalid task '{task}': {err}")))?;
                }
                Ok(())
            }
            Mutation::SetVerbosity(args) => match level_directive(&args.level) {
                Some(_) => Ok(()),
                None => Err(MutationError::Invalid(format!(
                    "unknown verbosity level '{}'",
                    args.level
                ))),
            },
            Mutation::TakeCheckpoint(args) if args.name.trim().is_empty() => Err(
                MutationError::Invalid("checkpoint name must not be empty".into()),
            ),
            Mutation::TaskAction(method, args) => validate_task_action(*method, args),
            _ => Ok(()),
        }
    }

    /// The `(name, args, kwargs)` tuple handed to the scheduler.
    pub fn into_command(self) -> QueuedCommand {
        match self {
            Mutation::Broadcast(args) => broadcast_command(args),
            Mutation::StopSuite(args) => stop_command(args),
            Mutation::HoldSuite(HoldSuiteArgs {
                point_string: Some(point),
            }) => QueuedCommand::new("hold_after_point_string").arg(point),
            Mutation::HoldSuite(_) => QueuedCommand::new("hold_suite"),
            Mutation::ReleaseSuite => QueuedCommand::new("release_suite"),
            Mutation::ReloadSuite => QueuedCommand::new("reload_suite"),
            Mutation::SetVerbosity(args) => QueuedCommand::new("set_verbosity").arg(args.level),
            Mutation::TakeCheckpoint(args) => QueuedCommand::new("take_checkpoints").arg(args.name),
            Mutation::PutExtTrigger(args) => {
                QueuedCommand::new("put_ext_trigger").arg(args.message).arg(args.id)
            }
            Mutation::TaskAction(method, args) => task_command(method, args),
        }
    }
}

fn typed<T: DeserializeOwned>(method: MethodId, args: Map<String, Value>) -> Result<T, MutationError> {
    serde_json::from_value(Value::Object(args))
        .map_err(|source| MutationError::Arguments { method, source })
}

fn validate_task_action(method: MethodId, args: &TaskActionArgs) -> Result<(), MutationError> {
    let globs = args.task_globs.as_deref().unwrap_or_default();
    if globs.is_empty() {
        return Err(MutationError::Invalid(format!("{method} requires task_globs")));
    }
    for glob in globs {
        IdPattern::parse(glob)
            .map_err(|err| MutationError::Invalid(format!("invalid task glob '{glob}': {err}")))?;
    }

    let extras = [
        ("poll_succeeded", args.poll_succeeded.is_some(), MethodId::PollTasks),
        ("spawn", args.spawn.is_some(), MethodId::RemoveTasks),
        ("back_out", args.back_out.is_some(), MethodId::TriggerTasks),
        ("state", args.state.is_some(), MethodId::ResetTaskStates),
        ("outputs", args.outputs.is_some(), MethodId::ResetTaskStates),
    ];
    if let Some((name, _, _)) = extras
        .iter()
        .find(|(_, given, owner)| *given && *owner != method)
    {
        return Err(MutationError::Invalid(format!(
            "{method} does not take argument '{name}'"
        )));
    }

    if method == MethodId::ResetTaskStates {
        match &args.state {
            Some(state) if !is_task_status(state) => {
                return Err(MutationError::Invalid(format!("unknown task state '{state}'")))
            }
            None if args.outputs.as_ref().map_or(true, Vec::is_empty) => {
                return Err(MutationError::Invalid(
                    "reset_task_states requires state or outputs".into(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn strings(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

fn broadcast_command(args: BroadcastArgs) -> QueuedCommand {
    let settings = Value::Array(
        args.settings
            .unwrap_or_default()
            .into_iter()
            .map(Value::Object)
            .collect(),
    );
    match args.mode {
        BroadcastMode::Put => QueuedCommand::new("put_broadcast")
            .kwarg(
                "point_strings",
                strings(args.cycle_points.unwrap_or_else(|| vec!["*".into()])),
            )
            .kwarg(
                "namespaces",
                strings(args.namespaces.unwrap_or_else(|| vec!["root".into()])),
            )
            .kwarg("settings", settings),
        BroadcastMode::Clear => QueuedCommand::new("clear_broadcast")
            .kwarg("point_strings", strings(args.cycle_points.unwrap_or_default()))
            .kwarg("namespaces", strings(args.namespaces.unwrap_or_default()))
            .kwarg("cancel_settings", settings),
        BroadcastMode::Expire => {
            QueuedCommand::new("expire_broadcast").kwarg("cutoff", args.cutoff.unwrap_or_default())
        }
    }
}

fn stop_command(args: StopArgs) -> QueuedCommand {
    if let Some(point) = args.cycle_point {
        return QueuedCommand::new("set_stop_after_point").arg(point);
    }
    if let Some(clock_time) = args.clock_time {
        return QueuedCommand::new("set_stop_after_clock_time").arg(clock_time);
    }
    if let Some(task) = args.task {
        return QueuedCommand::new("set_stop_after_task").arg(task);
    }
    match args.stop_type.unwrap_or(StopType::Clean) {
        StopType::Now => QueuedCommand::new("stop_now"),
        StopType::NowNow => QueuedCommand::new("stop_now").kwarg("terminate", true),
        StopType::Clean => QueuedCommand::new("set_stop_cleanly").kwarg("kill_active_tasks", false),
        StopType::Kill => QueuedCommand::new("set_stop_cleanly").kwarg("kill_active_tasks", true),
    }
}

fn task_command(method: MethodId, args: TaskActionArgs) -> QueuedCommand {
    let command = QueuedCommand::new(method.name()).arg(strings(args.task_globs.unwrap_or_default()));
    match method {
        MethodId::PollTasks => {
            command.kwarg("poll_succeeded", args.poll_succeeded.unwrap_or(false))
        }
        MethodId::RemoveTasks => command.kwarg("spawn", args.spawn.unwrap_or(false)),
        MethodId::TriggerTasks => command.kwarg("back_out", args.back_out.unwrap_or(false)),
        MethodId::ResetTaskStates => command
            .kwarg("state", args.state.map_or(Value::Null, Value::String))
            .kwarg("outputs", args.outputs.map_or(Value::Null, strings)),
        _ => command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(method: MethodId, args: Value) -> Result<QueuedCommand, MutationError> {
        let args = args.as_object().cloned().unwrap_or_default();
        Mutation::from_args(method, args).map(Mutation::into_command)
    }

    #[test]
    fn stop_types_map_to_scheduler_commands() {
        let now = command(MethodId::StopSuite, json!({"stop_type": "now", "user": "me"})).unwrap();
        assert_eq!(now.as_tuple(), json!(["stop_now", [], {}]));

        let now_now = command(MethodId::StopSuite, json!({"stop_type": "now_now"})).unwrap();
        assert_eq!(now_now.as_tuple(), json!(["stop_now", [], {"terminate": true}]));

        let clean = command(MethodId::StopSuite, json!({})).unwrap();
        assert_eq!(
            clean.as_tuple(),
            json!(["set_stop_cleanly", [], {"kill_active_tasks": false}])
        );

        let clock = command(MethodId::StopSuite, json!({"clock_time": "2030-01-01T00:00:00Z"})).unwrap();
        assert_eq!(clock.name, "set_stop_after_clock_time");
    }

    #[test]
    fn stop_rejects_conflicts_and_bad_times() {
        assert!(command(MethodId::StopSuite, json!({"stop_type": "now", "task": "foo.1"})).is_err());
        assert!(command(MethodId::StopSuite, json!({"clock_time": "tomorrow"})).is_err());
        assert!(matches!(
            command(MethodId::StopSuite, json!({"stop_type": "later"})),
            Err(MutationError::Arguments { .. })
        ));
    }

    #[test]
    fn broadcast_defaults_and_modes() {
        let put = command(
            MethodId::Broadcast,
            json!({"settings": {"environment": {"A": "1"}}}),
        )
        .unwrap();
        assert_eq!(
            put.as_tuple(),
            json!(["put_broadcast", [], {
                "point_strings": ["*"],
                "namespaces": ["root"],
                "settings": [{"environment": {"A": "1"}}]
            }])
        );

        let clear = command(MethodId::Broadcast, json!({"mode": "clear", "namespaces": "foo"})).unwrap();
        assert_eq!(clear.kwargs["namespaces"], json!(["foo"]));
        assert_eq!(clear.kwargs["point_strings"], json!([]));

        assert!(command(MethodId::Broadcast, json!({"mode": "expire"})).is_err());
        assert!(command(MethodId::Broadcast, json!({"mode": "put"})).is_err());
    }

    #[test]
    fn task_actions_validate_globs_and_extras() {
        let hold = command(MethodId::HoldTasks, json!({"task_globs": ["foo.1", "*/BAR"]})).unwrap();
        assert_eq!(hold.as_tuple(), json!(["hold_tasks", [["foo.1", "*/BAR"]], {}]));

        let poll = command(MethodId::PollTasks, json!({"task_globs": "foo.1"})).unwrap();
        assert_eq!(poll.kwargs["poll_succeeded"], json!(false));

        assert!(command(MethodId::KillTasks, json!({"task_globs": []})).is_err());
        assert!(command(MethodId::HoldTasks, json!({"task_globs": ["foo"], "spawn": true})).is_err());
        assert!(command(MethodId::ResetTaskStates, json!({"task_globs": ["foo"]})).is_err());
        assert!(command(
            MethodId::ResetTaskStates,
            json!({"task_globs": ["foo"], "state": "exploded"})
        )
        .is_err());

        let reset = command(
            MethodId::ResetTaskStates,
            json!({"task_globs": ["foo"], "state": "succeeded"}),
        )
        .unwrap();
        assert_eq!(reset.kwargs["state"], json!("succeeded"));
        assert_eq!(reset.kwargs["outputs"], Value::Null);
    }

    #[test]
    fn suite_level_commands() {
        let hold = command(MethodId::HoldSuite, json!({"point_string": "5"})).unwrap();
        assert_eq!(hold.as_tuple(), json!(["hold_after_point_string", ["5"], {}]));
        assert!(command(MethodId::ReleaseSuite, json!({"force": true})).is_err());
        assert!(command(MethodId::SetVerbosity, json!({"level": "loud"})).is_err());
        let trigger = command(
            MethodId::PutExtTrigger,
            json!({"message": "data ready", "id": "abc"}),
        )
        .unwrap();
        assert_eq!(trigger.args, vec![json!("data ready"), json!("abc")]);
        assert!(matches!(
            Mutation::from_args(MethodId::Query, Map::new()),
            Err(MutationError::NotAMutation(MethodId::Query))
        ));
    }
}
