//! In-memory workflow state. The scheduler loop is the only writer.

pub mod broadcast;
pub mod data_store;
pub mod job_pool;

use std::cmp::Ordering;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use broadcast::BroadcastMgr;
pub use data_store::{DataStore, ElementKind, StoreError, WorkflowDescription};
pub use job_pool::JobPool;

pub const TASK_STATUSES: [&str; 13] = [
    "runahead",
    "waiting",
    "held",
    "queued",
    "ready",
    "expired",
    "submitted",
    "submit-failed",
    "submit-retrying",
    "running",
    "succeeded",
    "failed",
    "retrying",
];

/// Group state precedence, most significant first.
const GROUP_STATE_ORDER: [&str; 13] = [
    "submit-failed",
    "failed",
    "expired",
    "submit-retrying",
    "retrying",
    "running",
    "submitted",
    "ready",
    "queued",
    "waiting",
    "held",
    "succeeded",
    "runahead",
];

pub const ACTIVE_STATUSES: [&str; 3] = ["ready", "submitted", "running"];

pub type SharedStore = Arc<RwLock<DataStore>>;

pub fn shared(store: DataStore) -> SharedStore {
    Arc::new(RwLock::new(store))
}

pub fn read_store(store: &SharedStore) -> RwLockReadGuard<'_, DataStore> {
    store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn write_store(store: &SharedStore) -> RwLockWriteGuard<'_, DataStore> {
    store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn is_task_status(state: &str) -> bool {
    TASK_STATUSES.contains(&state)
}

/// Summarise member states the way a family displays them.
pub fn group_state<'a>(states: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    let present: Vec<&str> = states.into_iter().collect();
    GROUP_STATE_ORDER
        .iter()
        .find(|candidate| present.contains(candidate))
        .copied()
}

/// Integer cycle points compare numerically, anything else lexically.
pub fn compare_points(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}
