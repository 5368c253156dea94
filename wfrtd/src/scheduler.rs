//! A minimal scheduler loop: the sole writer of workflow state.
//!
//! It drains the command queue one command at a time, applies each to the
//! data store, and publishes the resulting deltas on the event channel.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use wfrt_common::{IdParts, IdPattern};

use crate::logging::{self, LogHandle};
use crate::publisher::EventHub;
use crate::queue::QueuedCommand;
use crate::state::broadcast::Settings;
use crate::state::job_pool::JobConf;
use crate::state::{compare_points, read_store, write_store, BroadcastMgr, DataStore, SharedStore, ACTIVE_STATUSES};

const PUBLISH_INTERVAL: Duration = Duration::from_millis(500);

/// Why the loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopRequest {
    /// Stop cleanly, optionally killing active tasks first.
    Clean { kill_active: bool },
    Now { terminate: bool },
    /// A stop-after condition was met.
    Reached(String),
    Signal,
    QueueClosed,
}

impl StopRequest {
    pub fn reason(&self) -> String {
        match self {
            StopRequest::Clean { kill_active: false } => "stopped cleanly by request".into(),
            StopRequest::Clean { kill_active: true } => "stopped by request, active tasks killed".into(),
            StopRequest::Now { terminate: false } => "stopped immediately by request".into(),
            StopRequest::Now { terminate: true } => "terminated by request".into(),
            StopRequest::Reached(condition) => format!("stop condition reached: {condition}"),
            StopRequest::Signal => "stopped by signal".into(),
            StopRequest::QueueClosed => "command queue closed".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtTrigger {
    pub message: String,
    pub id: String,
}

pub struct Scheduler {
    store: SharedStore,
    commands: mpsc::UnboundedReceiver<QueuedCommand>,
    hub: EventHub,
    broadcasts: BroadcastMgr,
    checkpoint_dir: PathBuf,
    log_handle: Option<LogHandle>,
    ext_triggers: Vec<ExtTrigger>,
}

impl Scheduler {
    pub fn new(
        store: SharedStore,
        commands: mpsc::UnboundedReceiver<QueuedCommand>,
        hub: EventHub,
        checkpoint_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            commands,
            hub,
            broadcasts: BroadcastMgr::new(),
            checkpoint_dir,
            log_handle: None,
            ext_triggers: Vec::new(),
        }
    }

    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    pub fn ext_triggers(&self) -> &[ExtTrigger] {
        &self.ext_triggers
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> StopRequest {
        let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
        info!("scheduler loop started");
        let stop = loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break StopRequest::QueueClosed;
                    };
                    if let Some(stop) = self.apply(command) {
                        break stop;
                    }
                }
                _ = ticker.tick() => {
                    self.publish_deltas();
                    if let Some(stop) = self.check_stop_conditions(Utc::now()) {
                        break stop;
                    }
                }
                _ = shutdown.changed() => break StopRequest::Signal,
            }
        };
        self.publish_deltas();
        info!(reason = %stop.reason(), "scheduler loop finished");
        stop
    }

    /// Apply one command. Failures are logged; commands are fire-and-forget.
    pub fn apply(&mut self, command: QueuedCommand) -> Option<StopRequest> {
        debug!(command = %command.name, "applying command");
        match self.try_apply(&command) {
            Ok(stop) => {
                write_store(&self.store).refresh_derived();
                stop
            }
            Err(err) => {
                warn!(command = %command.name, "command failed: {:#}", err);
                None
            }
        }
    }

    fn try_apply(&mut self, command: &QueuedCommand) -> Result<Option<StopRequest>> {
        match command.name.as_str() {
            "stop_now" => {
                return Ok(Some(StopRequest::Now {
                    terminate: command.bool_kwarg("terminate"),
                }))
            }
            "set_stop_cleanly" => {
                let kill_active = command.bool_kwarg("kill_active_tasks");
                if kill_active {
                    let mut store = write_store(&self.store);
                    let active: Vec<String> = store
                        .task_proxies()
                        .filter(|tp| ACTIVE_STATUSES.contains(&tp.state.as_str()))
                        .map(|tp| tp.id.clone())
                        .collect();
                    kill(&mut store, &active)?;
                }
                return Ok(Some(StopRequest::Clean { kill_active }));
            }
            "set_stop_after_point" => {
                let point = required_str(command, 0)?;
                write_store(&self.store).workflow_mut().stop_point = Some(point.to_string());
            }
            "set_stop_after_clock_time" => {
                let time = required_str(command, 0)?;
                DateTime::parse_from_rfc3339(time).with_context(|| format!("invalid clock time '{time}'"))?;
                write_store(&self.store).workflow_mut().stop_clock_time = Some(time.to_string());
            }
            "set_stop_after_task" => {
                let task = required_str(command, 0)?;
                write_store(&self.store).workflow_mut().stop_task = Some(task.to_string());
            }
            "hold_suite" => {
                let mut store = write_store(&self.store);
                store.workflow_mut().is_held = true;
                for id in all_proxies(&store) {
                    store.set_task_held(&id, true);
                }
            }
            "hold_after_point_string" => {
                let point = required_str(command, 0)?;
                let mut store = write_store(&self.store);
                store.workflow_mut().hold_point = Some(point.to_string());
                let later: Vec<String> = store
                    .task_proxies()
                    .filter(|tp| compare_points(&tp.cycle_point, point).is_gt())
                    .map(|tp| tp.id.clone())
                    .collect();
                for id in later {
                    store.set_task_held(&id, true);
                }
            }
            "release_suite" => {
                let mut store = write_store(&self.store);
                let workflow = store.workflow_mut();
                workflow.is_held = false;
                workflow.hold_point = None;
                for id in all_proxies(&store) {
                    store.set_task_held(&id, false);
                }
            }
            "reload_suite" => {
                info!("workflow definition reload requested");
                write_store(&self.store).workflow_mut().status_msg = "definition reloaded".into();
            }
            "set_verbosity" => {
                let level = required_str(command, 0)?;
                match &self.log_handle {
                    Some(handle) => logging::set_level(handle, level)?,
                    None => bail!("log level cannot be changed: no reloadable subscriber"),
                }
                info!(%level, "log level changed");
            }
            "take_checkpoints" => {
                let name = required_str(command, 0)?;
                let path = self.take_checkpoint(name)?;
                info!(path = %path.display(), "checkpoint written");
            }
            "put_ext_trigger" => {
                let message = required_str(command, 0)?.to_string();
                let id = required_str(command, 1)?.to_string();
                info!(%message, %id, "external trigger received");
                self.ext_triggers.push(ExtTrigger { message, id });
            }
            "put_broadcast" => {
                let points = string_list(command.kwargs.get("point_strings"));
                let namespaces = string_list(command.kwargs.get("namespaces"));
                let settings = settings_list(command.kwargs.get("settings"))?;
                let modified = self.broadcasts.put(&points, &namespaces, &settings);
                info!(changes = modified.len(), "broadcast put");
                self.refresh_broadcasts();
            }
            "clear_broadcast" => {
                let points = string_list(command.kwargs.get("point_strings"));
                let namespaces = string_list(command.kwargs.get("namespaces"));
                let cancel = settings_list(command.kwargs.get("cancel_settings"))?;
                let cleared = self.broadcasts.clear(&points, &namespaces, &cancel);
                info!(changes = cleared.len(), "broadcast cleared");
                self.refresh_broadcasts();
            }
            "expire_broadcast" => {
                let cutoff = command
                    .kwargs
                    .get("cutoff")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let expired = self.broadcasts.expire(cutoff);
                info!(changes = expired.len(), %cutoff, "broadcast expired");
                self.refresh_broadcasts();
            }
            "hold_tasks" | "release_tasks" => {
                let held = command.name == "hold_tasks";
                let mut store = write_store(&self.store);
                for id in matching(&store, &globs(command)?, false) {
                    store.set_task_held(&id, held);
                }
            }
            "kill_tasks" => {
                let mut store = write_store(&self.store);
                let targets: Vec<String> = matching(&store, &globs(command)?, false)
                    .into_iter()
                    .filter(|id| {
                        store
                            .task_proxy(id)
                            .is_some_and(|tp| ACTIVE_STATUSES.contains(&tp.state.as_str()))
                    })
                    .collect();
                kill(&mut store, &targets)?;
            }
            "poll_tasks" => {
                let poll_succeeded = command.bool_kwarg("poll_succeeded");
                let mut store = write_store(&self.store);
                let targets = matching(&store, &globs(command)?, poll_succeeded);
                let mut polled = 0;
                for id in targets {
                    let latest = store.jobs().jobs_of(&id).first().map(|job| job.id.clone());
                    if let Some(job_id) = latest {
                        store.mark_job_updated(&job_id);
                        polled += 1;
                    }
                }
                info!(polled, "polled jobs");
            }
            "remove_tasks" => {
                let spawn = command.bool_kwarg("spawn");
                let mut store = write_store(&self.store);
                for id in matching(&store, &globs(command)?, true) {
                    let Some(removed) = store.remove_task_proxy(&id) else {
                        continue;
                    };
                    if spawn {
                        if let Some(next) = next_point(&removed.cycle_point) {
                            store.add_task_proxy(&next, &removed.name, "waiting")?;
                        }
                    }
                }
            }
            "reset_task_states" => {
                let state = command.kwargs.get("state").and_then(Value::as_str);
                let outputs = string_list(command.kwargs.get("outputs"));
                let mut store = write_store(&self.store);
                for id in matching(&store, &globs(command)?, true) {
                    if let Some(state) = state {
                        store.set_task_state(&id, state)?;
                    }
                    if let Some(proxy) = store.task_proxy_mut(&id) {
                        for output in &outputs {
                            match output.strip_prefix('!') {
                                Some(unset) => proxy.outputs.insert(unset.to_string(), false),
                                None => proxy.outputs.insert(output.clone(), true),
                            };
                        }
                    }
                }
            }
            "spawn_tasks" => {
                let mut store = write_store(&self.store);
                for glob in globs(command)? {
                    spawn(&mut store, &glob)?;
                }
            }
            "trigger_tasks" => {
                let back_out = command.bool_kwarg("back_out");
                let mut store = write_store(&self.store);
                for id in matching(&store, &globs(command)?, false) {
                    if back_out {
                        store.set_task_state(&id, "waiting")?;
                        continue;
                    }
                    let Some((point, name)) = store
                        .task_proxy(&id)
                        .map(|tp| (tp.cycle_point.clone(), tp.name.clone()))
                    else {
                        continue;
                    };
                    store.add_job(JobConf {
                        point,
                        name,
                        state: Some("submitted".into()),
                        ..JobConf::default()
                    });
                    store.set_task_state(&id, "submitted")?;
                }
            }
            other => bail!("unknown scheduler command '{other}'"),
        }
        Ok(None)
    }

    /// Push every pending delta batch to subscribers.
    pub fn publish_deltas(&mut self) {
        let batches = match write_store(&self.store).flush_deltas() {
            Ok(batches) => batches,
            Err(err) => {
                warn!("failed to encode deltas: {}", err);
                return;
            }
        };
        for (kind, bytes) in batches {
            debug!(topic = %kind, bytes = bytes.len(), "publishing delta");
            self.hub.publish(kind.as_str(), bytes);
        }
    }

    fn check_stop_conditions(&self, now: DateTime<Utc>) -> Option<StopRequest> {
        let store = read_store(&self.store);
        let workflow = store.workflow();
        if let Some(clock) = &workflow.stop_clock_time {
            if DateTime::parse_from_rfc3339(clock).is_ok_and(|at| at.with_timezone(&Utc) <= now) {
                return Some(StopRequest::Reached(format!("clock time {clock}")));
            }
        }
        if let Some(task) = &workflow.stop_task {
            let done = IdPattern::parse(task).is_ok_and(|pattern| {
                store.task_proxies().any(|tp| {
                    tp.state == "succeeded" && pattern.matches(&proxy_parts(&workflow.name, tp, &tp.name))
                })
            });
            if done {
                return Some(StopRequest::Reached(format!("task {task}")));
            }
        }
        if let Some(point) = &workflow.stop_point {
            let pending = store
                .task_proxies()
                .any(|tp| compare_points(&tp.cycle_point, point).is_le() && tp.state != "succeeded");
            if !pending {
                return Some(StopRequest::Reached(format!("cycle point {point}")));
            }
        }
        None
    }

    fn refresh_broadcasts(&mut self) {
        let mut store = write_store(&self.store);
        store.workflow_mut().broadcasts = self.broadcasts.snapshot();
        for id in all_proxies(&store) {
            let Some((point, name)) = store
                .task_proxy(&id)
                .map(|tp| (tp.cycle_point.clone(), tp.name.clone()))
            else {
                continue;
            };
            let mut namespaces = store.namespace_chain(&name);
            namespaces.reverse();
            let effective = Value::Object(self.broadcasts.get(&point, &namespaces));
            let changed = store.task_proxy(&id).is_some_and(|tp| tp.broadcasts != effective);
            if changed {
                if let Some(proxy) = store.task_proxy_mut(&id) {
                    proxy.broadcasts = effective;
                }
            }
        }
    }

    fn take_checkpoint(&self, name: &str) -> Result<PathBuf> {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if safe.is_empty() {
            bail!("checkpoint name is empty");
        }
        fs::create_dir_all(&self.checkpoint_dir)
            .with_context(|| format!("failed to create {}", self.checkpoint_dir.display()))?;
        let bytes = read_store(&self.store).entire_workflow()?;
        let path = self.checkpoint_dir.join(format!("{safe}.msgpack"));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn required_str(command: &QueuedCommand, index: usize) -> Result<&str> {
    command
        .str_arg(index)
        .ok_or_else(|| anyhow!("{} expects a string argument at position {index}", command.name))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

fn settings_list(value: Option<&Value>) -> Result<Vec<Settings>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map.clone()),
                other => Err(anyhow!("broadcast setting must be a mapping, got {other}")),
            })
            .collect(),
        Some(Value::Object(map)) => Ok(vec![map.clone()]),
        Some(other) => Err(anyhow!("broadcast settings must be a list, got {other}")),
    }
}

fn globs(command: &QueuedCommand) -> Result<Vec<String>> {
    let globs = string_list(command.args.first());
    if globs.is_empty() {
        bail!("{} expects a list of task globs", command.name);
    }
    Ok(globs)
}

fn all_proxies(store: &DataStore) -> Vec<String> {
    store.task_proxies().map(|tp| tp.id.clone()).collect()
}

fn proxy_parts<'a>(workflow: &'a str, tp: &'a crate::state::data_store::TaskProxy, name: &'a str) -> IdParts<'a> {
    IdParts {
        workflow,
        point: Some(tp.cycle_point.as_str()),
        name,
        submit_num: None,
        state: Some(tp.state.as_str()),
    }
}

/// Task proxies matching any glob by task name or by one of the task's
/// families. Finished tasks are skipped unless `include_finished`.
fn matching(store: &DataStore, raw_globs: &[String], include_finished: bool) -> Vec<String> {
    let patterns: Vec<IdPattern> = raw_globs
        .iter()
        .filter_map(|raw| match IdPattern::parse(raw) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!(glob = %raw, "ignoring invalid task glob: {}", err);
                None
            }
        })
        .collect();
    let workflow = store.workflow().name.as_str();
    store
        .task_proxies()
        .filter(|tp| include_finished || tp.state != "succeeded")
        .filter(|tp| {
            let namespace = store.namespace_chain(&tp.name);
            patterns.iter().any(|pattern| {
                namespace
                    .iter()
                    .any(|name| pattern.matches(&proxy_parts(workflow, tp, name)))
            })
        })
        .map(|tp| tp.id.clone())
        .collect()
}

fn kill(store: &mut DataStore, proxies: &[String]) -> Result<()> {
    for id in proxies {
        let latest = store.jobs().jobs_of(id).first().map(|job| job.id.clone());
        if let Some(job_id) = latest {
            store.job_pool_mut().set_job_state(&job_id, "failed");
        }
        store.set_task_state(id, "failed")?;
        info!(task = %id, "killed");
    }
    Ok(())
}

fn next_point(point: &str) -> Option<String> {
    point.parse::<i64>().ok().map(|p| (p + 1).to_string())
}

/// Spawn `glob` as a waiting proxy. The point must be concrete; the name may
/// be a wildcard over task definitions.
fn spawn(store: &mut DataStore, glob: &str) -> Result<()> {
    let item = crate::state::JobPool::parse_job_item(glob);
    let point = item
        .point
        .filter(|p| !p.contains(['*', '?']))
        .ok_or_else(|| anyhow!("cannot spawn '{glob}': a concrete cycle point is required"))?;
    let pattern = IdPattern::parse(&item.name)?;
    let names: Vec<String> = store
        .tasks()
        .filter(|task| {
            pattern.matches(&IdParts {
                name: &task.name,
                ..IdParts::default()
            })
        })
        .map(|task| task.name.clone())
        .collect();
    if names.is_empty() {
        bail!("no task matches '{glob}'");
    }
    for name in names {
        let state = item.state.as_deref().unwrap_or("waiting");
        store.add_task_proxy(&point, &name, state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::CommandQueue;
    use crate::state::data_store::tests::sample_store;
    use crate::state::shared;
    use serde_json::json;
    use tempfile::tempdir;

    fn scheduler(dir: &std::path::Path) -> (Scheduler, SharedStore, EventHub) {
        let store = shared(sample_store());
        let (_queue, receiver) = CommandQueue::channel();
        let hub = EventHub::new(16);
        let scheduler = Scheduler::new(store.clone(), receiver, hub.clone(), dir.join("checkpoints"));
        (scheduler, store, hub)
    }

    fn tasks(globs: &[&str]) -> Value {
        json!(globs)
    }

    #[test]
    fn hold_and_release_by_family_glob() {
        let dir = tempdir().unwrap();
        let (mut scheduler, store, _hub) = scheduler(dir.path());
        scheduler.apply(QueuedCommand::new("hold_tasks").arg(tasks(&["FAM.1"])));
        {
            let store = read_store(&store);
            assert!(store.task_proxy("flow//1/foo").unwrap().is_held);
            assert!(store.task_proxy("flow//1/bar").unwrap().is_held);
            assert!(!store.task_proxy("flow//2/foo").unwrap().is_held);
        }
        scheduler.apply(QueuedCommand::new("release_tasks").arg(tasks(&["*"])));
        assert!(!read_store(&store).task_proxy("flow//1/foo").unwrap().is_held);
    }

    #[test]
    fn kill_fails_active_tasks_and_their_jobs() {
        let dir = tempdir().unwrap();
        let (mut scheduler, store, _hub) = scheduler(dir.path());
        scheduler.apply(QueuedCommand::new("kill_tasks").arg(tasks(&["*.1"])));
        let store = read_store(&store);
        assert_eq!(store.task_proxy("flow//1/foo").unwrap().state, "failed");
        assert_eq!(store.jobs().get("flow//1/foo/01").unwrap().state, "failed");
        assert_eq!(store.task_proxy("flow//1/bar").unwrap().state, "waiting");
    }

    #[test]
    fn trigger_submits_a_new_job() {
        let dir = tempdir().unwrap();
        let (mut scheduler, store, _hub) = scheduler(dir.path());
        scheduler.apply(
            QueuedCommand::new("trigger_tasks")
                .arg(tasks(&["foo.1"]))
                .kwarg("back_out", false),
        );
        let store = read_store(&store);
        assert_eq!(store.task_proxy("flow//1/foo").unwrap().state, "submitted");
        assert!(store.jobs().get("flow//1/foo/02").is_some());
    }

    #[test]
    fn reset_remove_and_spawn() {
        let dir = tempdir().unwrap();
        let (mut scheduler, store, _hub) = scheduler(dir.path());
        scheduler.apply(
            QueuedCommand::new("reset_task_states")
                .arg(tasks(&["bar.1"]))
                .kwarg("state", "failed")
                .kwarg("outputs", json!(["custom", "!started"])),
        );
        {
            let store = read_store(&store);
            let bar = store.task_proxy("flow//1/bar").unwrap();
            assert_eq!(bar.state, "failed");
            assert_eq!(bar.outputs.get("custom"), Some(&true));
            assert_eq!(bar.outputs.get("started"), Some(&false));
        }

        scheduler.apply(QueuedCommand::new("remove_tasks").arg(tasks(&["baz.1"])).kwarg("spawn", true));
        scheduler.apply(QueuedCommand::new("spawn_tasks").arg(tasks(&["ba?.5"])));
        let store = read_store(&store);
        assert!(store.task_proxy("flow//1/baz").is_none());
        assert!(store.task_proxy("flow//2/baz").is_some());
        assert!(store.task_proxy("flow//5/bar").is_some());
        assert!(store.task_proxy("flow//5/baz").is_some());
    }

    #[test]
    fn broadcasts_reach_matching_proxies() {
        let dir = tempdir().unwrap();
        let (mut scheduler, store, _hub) = scheduler(dir.path());
        scheduler.apply(
            QueuedCommand::new("put_broadcast")
                .kwarg("point_strings", json!(["1"]))
                .kwarg("namespaces", json!(["FAM"]))
                .kwarg("settings", json!([{"environment": {"X": "1"}}])),
        );
        {
            let store = read_store(&store);
            assert_eq!(
                store.task_proxy("flow//1/bar").unwrap().broadcasts,
                json!({"environment": {"X": "1"}})
            );
            assert_eq!(store.task_proxy("flow//1/baz").unwrap().broadcasts, json!({}));
        }
        scheduler.apply(QueuedCommand::new("expire_broadcast").kwarg("cutoff", "2"));
        assert_eq!(read_store(&store).task_proxy("flow//1/bar").unwrap().broadcasts, json!({}));
    }

    #[test]
    fn stop_commands_end_the_loop() {
        let dir = tempdir().unwrap();
        let (mut scheduler, store, _hub) = scheduler(dir.path());
        assert_eq!(
            scheduler.apply(QueuedCommand::new("stop_now").kwarg("terminate", true)),
            Some(StopRequest::Now { terminate: true })
        );
        assert_eq!(scheduler.apply(QueuedCommand::new("set_stop_after_point").arg("1")), None);
        assert_eq!(read_store(&store).workflow().stop_point.as_deref(), Some("1"));
        assert!(scheduler.check_stop_conditions(Utc::now()).is_none());

        scheduler.apply(QueuedCommand::new("set_stop_after_clock_time").arg("2000-01-01T00:00:00Z"));
        assert!(matches!(
            scheduler.check_stop_conditions(Utc::now()),
            Some(StopRequest::Reached(_))
        ));
    }

    #[test]
    fn checkpoints_and_external_triggers() {
        let dir = tempdir().unwrap();
        let (mut scheduler, _store, _hub) = scheduler(dir.path());
        scheduler.apply(QueuedCommand::new("take_checkpoints").arg("before upgrade"));
        assert!(dir.path().join("checkpoints/before_upgrade.msgpack").exists());

        scheduler.apply(QueuedCommand::new("put_ext_trigger").arg("data ready").arg("ext-1"));
        assert_eq!(scheduler.ext_triggers()[0].id, "ext-1");

        assert_eq!(scheduler.apply(QueuedCommand::new("fly_to_moon")), None);
    }

    #[tokio::test]
    async fn deltas_are_published_by_kind() {
        let dir = tempdir().unwrap();
        let (mut scheduler, _store, hub) = scheduler(dir.path());
        scheduler.publish_deltas();
        let mut events = hub.subscribe();
        scheduler.apply(QueuedCommand::new("hold_tasks").arg(tasks(&["baz.1"])));
        scheduler.publish_deltas();
        let first = events.recv().await.unwrap();
        let mut topics = vec![first.topic.clone()];
        while let Ok(event) = events.try_recv() {
            topics.push(event.topic.clone());
        }
        assert!(topics.contains(&b"task_proxies".to_vec()));
    }
}
