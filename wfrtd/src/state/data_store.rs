//! Arena of workflow elements keyed by universal id.
//!
//! Definitions (`Task`, `Family`) use the `workflow//$namespace/<name>` id
//! space; proxies and jobs use real cycle points. Updates are tracked per
//! element kind and drained by [`DataStore::flush_deltas`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use wfrt_common::id;

use super::job_pool::{Job, JobConf, JobPool};
use super::{compare_points, group_state, is_task_status};

pub const SCHEMA_VERSION: u32 = 1;
pub const ROOT_FAMILY: &str = "root";
const DEFINITION_POINT: &str = "$namespace";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown element type '{0}'")]
    UnknownKind(String),
    #[error("no task definition named '{0}'")]
    UnknownTask(String),
    #[error("no family definition named '{0}'")]
    UnknownFamily(String),
    #[error("invalid task state '{0}'")]
    BadState(String),
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        source: rmp_serde::encode::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Workflow,
    Tasks,
    Families,
    TaskProxies,
    FamilyProxies,
    Jobs,
}

impl ElementKind {
    pub const ALL: [ElementKind; 6] = [
        ElementKind::Workflow,
        ElementKind::Tasks,
        ElementKind::Families,
        ElementKind::TaskProxies,
        ElementKind::FamilyProxies,
        ElementKind::Jobs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Workflow => "workflow",
            ElementKind::Tasks => "tasks",
            ElementKind::Families => "families",
            ElementKind::TaskProxies => "task_proxies",
            ElementKind::FamilyProxies => "family_proxies",
            ElementKind::Jobs => "jobs",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ElementKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| StoreError::UnknownKind(raw.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub host: String,
    pub port: Option<u16>,
    pub pub_port: Option<u16>,
    pub api_version: u32,
    pub status: String,
    pub status_msg: String,
    pub is_held: bool,
    pub hold_point: Option<String>,
    pub stop_point: Option<String>,
    pub stop_clock_time: Option<String>,
    pub stop_task: Option<String>,
    pub run_mode: String,
    pub oldest_cycle_point: Option<String>,
    pub newest_cycle_point: Option<String>,
    pub state_totals: BTreeMap<String, u32>,
    pub time_zone_info: Value,
    pub meta: Value,
    pub broadcasts: Value,
    pub last_updated: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub meta: Value,
    pub mean_elapsed_time: f64,
    pub depth: u32,
    /// Namespace chain from the task up to `root`.
    pub namespace: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub id: String,
    pub name: String,
    pub meta: Value,
    pub depth: u32,
    pub first_parent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProxy {
    pub id: String,
    pub name: String,
    pub cycle_point: String,
    pub state: String,
    pub is_held: bool,
    pub depth: u32,
    pub task: String,
    pub first_parent: Option<String>,
    pub ancestors: Vec<String>,
    pub job_submits: u32,
    pub latest_message: String,
    pub outputs: BTreeMap<String, bool>,
    pub broadcasts: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyProxy {
    pub id: String,
    pub name: String,
    pub cycle_point: String,
    pub state: String,
    pub is_held: bool,
    pub depth: u32,
    pub family: String,
    pub first_parent: Option<String>,
    pub ancestors: Vec<String>,
    pub child_tasks: Vec<String>,
    pub child_families: Vec<String>,
}

/// Seed description loaded by `wfrtd --state`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowDescription {
    pub meta: Value,
    pub families: BTreeMap<String, NamespaceDef>,
    pub tasks: BTreeMap<String, NamespaceDef>,
    pub cycles: Vec<String>,
    pub proxies: Option<Vec<ProxyDef>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NamespaceDef {
    pub parent: Option<String>,
    pub meta: Value,
    pub mean_elapsed_time: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyDef {
    pub point: String,
    pub name: String,
    pub state: Option<String>,
    pub is_held: bool,
    pub jobs: Vec<JobConf>,
}

#[derive(Debug, Serialize)]
struct EntireWorkflow<'a> {
    schema_version: u32,
    workflow: &'a Workflow,
    tasks: Vec<&'a Task>,
    families: Vec<&'a Family>,
    task_proxies: Vec<&'a TaskProxy>,
    family_proxies: Vec<&'a FamilyProxy>,
    jobs: Vec<&'a Job>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ElementBatch {
    pub schema_version: u32,
    pub kind: ElementKind,
    pub time: f64,
    pub updated: Vec<Value>,
    pub pruned: Vec<String>,
}

#[derive(Debug)]
pub struct DataStore {
    workflow: Workflow,
    tasks: BTreeMap<String, Task>,
    families: BTreeMap<String, Family>,
    task_proxies: BTreeMap<String, TaskProxy>,
    family_proxies: BTreeMap<String, FamilyProxy>,
    job_pool: JobPool,
    updated: BTreeMap<ElementKind, BTreeSet<String>>,
    pruned: BTreeMap<ElementKind, BTreeSet<String>>,
}

impl DataStore {
    pub fn new(workflow: &str, owner: &str, host: &str) -> Self {
        let mut store = Self {
            workflow: Workflow {
                id: id::workflow_id(workflow),
                name: workflow.to_string(),
                owner: owner.to_string(),
                host: host.to_string(),
                api_version: wfrt_common::API_VERSION,
                status: "running".to_string(),
                run_mode: "live".to_string(),
                time_zone_info: json!({
                    "hours": 0,
                    "minutes": 0,
                    "string_basic": "Z",
                    "string_extended": "Z",
                }),
                meta: json!({}),
                broadcasts: json!({}),
                ..Workflow::default()
            },
            tasks: BTreeMap::new(),
            families: BTreeMap::new(),
            task_proxies: BTreeMap::new(),
            family_proxies: BTreeMap::new(),
            job_pool: JobPool::new(workflow),
            updated: BTreeMap::new(),
            pruned: BTreeMap::new(),
        };
        store.insert_family_def(ROOT_FAMILY, None, json!({}));
        store.touch_workflow();
        store
    }

    pub fn from_description(
        workflow: &str,
        owner: &str,
        host: &str,
        desc: WorkflowDescription,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new(workflow, owner, host);
        if !desc.meta.is_null() {
            store.workflow.meta = desc.meta;
        }

        // parents may be declared after their children
        let mut pending: Vec<(String, NamespaceDef)> = desc.families.into_iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|(name, def)| {
                let parent = def.parent.as_deref().unwrap_or(ROOT_FAMILY);
                if !store.families.contains_key(&store.definition_id(parent)) {
                    return true;
                }
                store.insert_family_def(name, Some(parent), def.meta.clone());
                false
            });
            if pending.len() == before {
                let (_, def) = &pending[0];
                let parent = def.parent.clone().unwrap_or_default();
                return Err(StoreError::UnknownFamily(parent));
            }
        }

        for (name, def) in desc.tasks {
            let parent = def.parent.as_deref().unwrap_or(ROOT_FAMILY);
            store.add_task_def(&name, parent, def.meta, def.mean_elapsed_time)?;
        }

        match desc.proxies {
            Some(proxies) => {
                for proxy in proxies {
                    let state = proxy.state.as_deref().unwrap_or("waiting");
                    let proxy_id = store.add_task_proxy(&proxy.point, &proxy.name, state)?;
                    store.set_task_held(&proxy_id, proxy.is_held);
                    for mut job in proxy.jobs {
                        job.point = proxy.point.clone();
                        job.name = proxy.name.clone();
                        store.add_job(job);
                    }
                }
            }
            None => {
                let names: Vec<String> = store.tasks.values().map(|t| t.name.clone()).collect();
                for point in &desc.cycles {
                    for name in &names {
                        store.add_task_proxy(point, name, "waiting")?;
                    }
                }
            }
        }
        store.refresh_derived();
        Ok(store)
    }

    pub fn definition_id(&self, name: &str) -> String {
        id::proxy_id(&self.workflow.name, DEFINITION_POINT, name)
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn workflow_mut(&mut self) -> &mut Workflow {
        self.touch_workflow();
        &mut self.workflow
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn families(&self) -> impl Iterator<Item = &Family> {
        self.families.values()
    }

    pub fn family(&self, family_id: &str) -> Option<&Family> {
        self.families.get(family_id)
    }

    pub fn task_proxies(&self) -> impl Iterator<Item = &TaskProxy> {
        self.task_proxies.values()
    }

    pub fn task_proxy(&self, proxy_id: &str) -> Option<&TaskProxy> {
        self.task_proxies.get(proxy_id)
    }

    pub fn task_proxy_mut(&mut self, proxy_id: &str) -> Option<&mut TaskProxy> {
        let proxy = self.task_proxies.get_mut(proxy_id)?;
        self.updated
            .entry(ElementKind::TaskProxies)
            .or_default()
            .insert(proxy_id.to_string());
        Some(proxy)
    }

    pub fn family_proxies(&self) -> impl Iterator<Item = &FamilyProxy> {
        self.family_proxies.values()
    }

    pub fn family_proxy(&self, proxy_id: &str) -> Option<&FamilyProxy> {
        self.family_proxies.get(proxy_id)
    }

    pub fn jobs(&self) -> &JobPool {
        &self.job_pool
    }

    pub fn job_pool_mut(&mut self) -> &mut JobPool {
        &mut self.job_pool
    }

    /// Family definition names from the task up to `root`.
    pub fn namespace_chain(&self, name: &str) -> Vec<String> {
        match self.tasks.get(&self.definition_id(name)) {
            Some(task) => task.namespace.clone(),
            None => vec![name.to_string()],
        }
    }

    pub fn add_task_def(
        &mut self,
        name: &str,
        parent: &str,
        meta: Value,
        mean_elapsed_time: f64,
    ) -> Result<String, StoreError> {
        let parent_id = self.definition_id(parent);
        let Some(parent_def) = self.families.get(&parent_id) else {
            return Err(StoreError::UnknownFamily(parent.to_string()));
        };
        let mut namespace = vec![name.to_string()];
        namespace.extend(self.family_chain(parent_def));
        let task = Task {
            id: self.definition_id(name),
            name: name.to_string(),
            meta: if meta.is_null() { json!({}) } else { meta },
            mean_elapsed_time,
            depth: parent_def.depth + 1,
            namespace,
        };
        let task_id = task.id.clone();
        self.tasks.insert(task_id.clone(), task);
        self.mark(ElementKind::Tasks, &task_id);
        Ok(task_id)
    }

    /// Create a task proxy plus any missing ancestor family proxies.
    pub fn add_task_proxy(&mut self, point: &str, name: &str, state: &str) -> Result<String, StoreError> {
        if !is_task_status(state) {
            return Err(StoreError::BadState(state.to_string()));
        }
        let def_id = self.definition_id(name);
        let task = self
            .tasks
            .get(&def_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownTask(name.to_string()))?;
        let proxy_id = id::proxy_id(&self.workflow.name, point, name);
        if self.task_proxies.contains_key(&proxy_id) {
            return Ok(proxy_id);
        }

        let family_names = &task.namespace[1..];
        let ancestors: Vec<String> = family_names
            .iter()
            .map(|family| id::proxy_id(&self.workflow.name, point, family))
            .collect();
        self.ensure_family_proxies(point, family_names);

        if let Some(parent) = ancestors.first() {
            if let Some(family) = self.family_proxies.get_mut(parent) {
                family.child_tasks.push(proxy_id.clone());
            }
            self.mark(ElementKind::FamilyProxies, parent);
        }

        let proxy = TaskProxy {
            id: proxy_id.clone(),
            name: name.to_string(),
            cycle_point: point.to_string(),
            state: state.to_string(),
            depth: task.depth,
            task: def_id,
            first_parent: ancestors.first().cloned(),
            ancestors,
            broadcasts: json!({}),
            ..TaskProxy::default()
        };
        self.task_proxies.insert(proxy_id.clone(), proxy);
        self.mark(ElementKind::TaskProxies, &proxy_id);
        debug!(proxy = %proxy_id, state, "task proxy added");
        Ok(proxy_id)
    }

    /// Remove a task proxy and its jobs, then any family proxies left empty.
    pub fn remove_task_proxy(&mut self, proxy_id: &str) -> Option<TaskProxy> {
        let proxy = self.task_proxies.remove(proxy_id)?;
        self.unmark(ElementKind::TaskProxies, proxy_id);
        self.job_pool.remove_task_jobs(proxy_id);

        let mut child = proxy_id.to_string();
        let mut parent = proxy.first_parent.clone();
        let mut child_is_task = true;
        while let Some(parent_id) = parent.take() {
            let Some(family) = self.family_proxies.get_mut(&parent_id) else {
                break;
            };
            if child_is_task {
                family.child_tasks.retain(|c| c != &child);
            } else {
                family.child_families.retain(|c| c != &child);
            }
            let emptied = family.child_tasks.is_empty() && family.child_families.is_empty();
            let next = family.first_parent.clone();
            self.mark(ElementKind::FamilyProxies, &parent_id);
            if !emptied {
                break;
            }
            self.family_proxies.remove(&parent_id);
            self.unmark(ElementKind::FamilyProxies, &parent_id);
            child = parent_id;
            child_is_task = false;
            parent = next;
        }
        Some(proxy)
    }

    pub fn set_task_state(&mut self, proxy_id: &str, state: &str) -> Result<bool, StoreError> {
        if !is_task_status(state) {
            return Err(StoreError::BadState(state.to_string()));
        }
        Ok(match self.task_proxy_mut(proxy_id) {
            Some(proxy) => {
                proxy.state = state.to_string();
                true
            }
            None => false,
        })
    }

    pub fn set_task_held(&mut self, proxy_id: &str, held: bool) -> bool {
        match self.task_proxy_mut(proxy_id) {
            Some(proxy) => {
                proxy.is_held = held;
                true
            }
            None => false,
        }
    }

    /// Record a new submission of a task proxy.
    pub fn add_job(&mut self, mut conf: JobConf) -> String {
        let proxy_id = id::proxy_id(&self.workflow.name, &conf.point, &conf.name);
        if let Some(proxy) = self.task_proxy_mut(&proxy_id) {
            if conf.submit_num == 0 {
                conf.submit_num = proxy.job_submits + 1;
            }
            proxy.job_submits = proxy.job_submits.max(conf.submit_num);
        } else if conf.submit_num == 0 {
            conf.submit_num = 1;
        }
        self.job_pool.insert_job(conf)
    }

    pub fn delta_workflow_ports(&mut self, port: u16, pub_port: u16) {
        let workflow = self.workflow_mut();
        workflow.port = Some(port);
        workflow.pub_port = Some(pub_port);
    }

    /// Recompute family states, state totals and the cycle point bounds.
    pub fn refresh_derived(&mut self) {
        let mut member_states: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut member_held: BTreeMap<String, bool> = BTreeMap::new();
        let mut totals: BTreeMap<String, u32> = BTreeMap::new();
        let mut points: Vec<&str> = Vec::new();
        for proxy in self.task_proxies.values() {
            *totals.entry(proxy.state.clone()).or_default() += 1;
            points.push(&proxy.cycle_point);
            for ancestor in &proxy.ancestors {
                member_states
                    .entry(ancestor.clone())
                    .or_default()
                    .push(proxy.state.clone());
                let held = member_held.entry(ancestor.clone()).or_insert(true);
                *held &= proxy.is_held;
            }
        }
        points.sort_by(|a, b| compare_points(a, b));
        let oldest = points.first().map(|p| p.to_string());
        let newest = points.last().map(|p| p.to_string());

        let mut changed = Vec::new();
        for (family_id, family) in self.family_proxies.iter_mut() {
            let state = member_states
                .get(family_id)
                .and_then(|states| group_state(states.iter().map(String::as_str)))
                .unwrap_or("")
                .to_string();
            let held = member_held.get(family_id).copied().unwrap_or(false);
            if family.state != state || family.is_held != held {
                family.state = state;
                family.is_held = held;
                changed.push(family_id.clone());
            }
        }
        for family_id in changed {
            self.mark(ElementKind::FamilyProxies, &family_id);
        }

        if self.workflow.state_totals != totals
            || self.workflow.oldest_cycle_point != oldest
            || self.workflow.newest_cycle_point != newest
        {
            let workflow = self.workflow_mut();
            workflow.state_totals = totals;
            workflow.oldest_cycle_point = oldest;
            workflow.newest_cycle_point = newest;
        }
    }

    pub fn entire_workflow(&self) -> Result<Vec<u8>, StoreError> {
        let snapshot = EntireWorkflow {
            schema_version: SCHEMA_VERSION,
            workflow: &self.workflow,
            tasks: self.tasks.values().collect(),
            families: self.families.values().collect(),
            task_proxies: self.task_proxies.values().collect(),
            family_proxies: self.family_proxies.values().collect(),
            jobs: self.job_pool.iter().collect(),
        };
        rmp_serde::to_vec_named(&snapshot).map_err(|source| StoreError::Encode {
            kind: "entire workflow",
            source,
        })
    }

    /// Every element of one kind, encoded like a delta with nothing pruned.
    pub fn data_elements(&self, kind: ElementKind) -> Result<Vec<u8>, StoreError> {
        let updated = self.element_values(kind, None);
        encode_batch(kind, updated, Vec::new())
    }

    /// Drain pending changes into one encoded batch per changed kind.
    pub fn flush_deltas(&mut self) -> Result<Vec<(ElementKind, Vec<u8>)>, StoreError> {
        let (jobs_updated, jobs_pruned) = self.job_pool.take_deltas();
        if !jobs_updated.is_empty() {
            self.updated.entry(ElementKind::Jobs).or_default().extend(jobs_updated);
        }
        if !jobs_pruned.is_empty() {
            self.pruned.entry(ElementKind::Jobs).or_default().extend(jobs_pruned);
        }
        let mut updated = std::mem::take(&mut self.updated);
        let mut pruned = std::mem::take(&mut self.pruned);

        let mut batches = Vec::new();
        for kind in ElementKind::ALL {
            let ids = updated.remove(&kind).unwrap_or_default();
            let gone = pruned.remove(&kind).unwrap_or_default();
            if ids.is_empty() && gone.is_empty() {
                continue;
            }
            let values = self.element_values(kind, Some(&ids));
            batches.push((kind, encode_batch(kind, values, gone.into_iter().collect())?));
        }
        Ok(batches)
    }

    fn element_values(&self, kind: ElementKind, only: Option<&BTreeSet<String>>) -> Vec<Value> {
        fn collect<'a, T: Serialize + 'a>(
            items: impl Iterator<Item = (&'a String, &'a T)>,
            only: Option<&BTreeSet<String>>,
        ) -> Vec<Value> {
            items
                .filter(|(id, _)| only.map_or(true, |ids| ids.contains(*id)))
                .filter_map(|(_, item)| serde_json::to_value(item).ok())
                .collect()
        }
        match kind {
            ElementKind::Workflow => serde_json::to_value(&self.workflow).into_iter().collect(),
            ElementKind::Tasks => collect(self.tasks.iter(), only),
            ElementKind::Families => collect(self.families.iter(), only),
            ElementKind::TaskProxies => collect(self.task_proxies.iter(), only),
            ElementKind::FamilyProxies => collect(self.family_proxies.iter(), only),
            ElementKind::Jobs => self
                .job_pool
                .iter()
                .filter(|job| only.map_or(true, |ids| ids.contains(&job.id)))
                .filter_map(|job| serde_json::to_value(job).ok())
                .collect(),
        }
    }

    fn insert_family_def(&mut self, name: &str, parent: Option<&str>, meta: Value) {
        let first_parent = parent.map(|p| self.definition_id(p));
        let depth = first_parent
            .as_ref()
            .and_then(|p| self.families.get(p))
            .map_or(0, |p| p.depth + 1);
        let family = Family {
            id: self.definition_id(name),
            name: name.to_string(),
            meta: if meta.is_null() { json!({}) } else { meta },
            depth,
            first_parent,
        };
        let family_id = family.id.clone();
        self.families.insert(family_id.clone(), family);
        self.mark(ElementKind::Families, &family_id);
    }

    /// Family names from `family` up to `root`.
    fn family_chain(&self, family: &Family) -> Vec<String> {
        let mut chain = vec![family.name.clone()];
        let mut next = family.first_parent.clone();
        while let Some(parent_id) = next {
            let Some(parent) = self.families.get(&parent_id) else {
                break;
            };
            chain.push(parent.name.clone());
            next = parent.first_parent.clone();
        }
        chain
    }

    /// `families` runs from the first parent up to `root`.
    fn ensure_family_proxies(&mut self, point: &str, families: &[String]) {
        let workflow = self.workflow.name.clone();
        for (index, name) in families.iter().enumerate() {
            let proxy_id = id::proxy_id(&workflow, point, name);
            let parent_id = families.get(index + 1).map(|p| id::proxy_id(&workflow, point, p));
            if !self.family_proxies.contains_key(&proxy_id) {
                let family_id = self.definition_id(name);
                let depth = self.families.get(&family_id).map_or(0, |f| f.depth);
                let ancestors = families[index + 1..]
                    .iter()
                    .map(|p| id::proxy_id(&workflow, point, p))
                    .collect();
                self.family_proxies.insert(
                    proxy_id.clone(),
                    FamilyProxy {
                        id: proxy_id.clone(),
                        name: name.clone(),
                        cycle_point: point.to_string(),
                        depth,
                        family: family_id,
                        first_parent: parent_id.clone(),
                        ancestors,
                        ..FamilyProxy::default()
                    },
                );
                self.mark(ElementKind::FamilyProxies, &proxy_id);
            }
            if let Some(parent_id) = parent_id {
                if let Some(parent) = self.family_proxies.get_mut(&parent_id) {
                    if !parent.child_families.contains(&proxy_id) {
                        parent.child_families.push(proxy_id.clone());
                        self.mark(ElementKind::FamilyProxies, &parent_id);
                    }
                }
            }
        }
    }

    fn touch_workflow(&mut self) {
        self.workflow.last_updated = Utc::now().timestamp_millis() as f64 / 1000.0;
        let workflow_id = self.workflow.id.clone();
        self.mark(ElementKind::Workflow, &workflow_id);
    }

    fn mark(&mut self, kind: ElementKind, element_id: &str) {
        if let Some(pruned) = self.pruned.get_mut(&kind) {
            pruned.remove(element_id);
        }
        self.updated.entry(kind).or_default().insert(element_id.to_string());
    }

    fn unmark(&mut self, kind: ElementKind, element_id: &str) {
        if let Some(updated) = self.updated.get_mut(&kind) {
            updated.remove(element_id);
        }
        self.pruned.entry(kind).or_default().insert(element_id.to_string());
    }

    pub(crate) fn mark_job_updated(&mut self, job_id: &str) {
        self.job_pool.mark_updated(job_id);
    }
}

fn encode_batch(
    kind: ElementKind,
    updated: Vec<Value>,
    pruned: Vec<String>,
) -> Result<Vec<u8>, StoreError> {
    let batch = ElementBatch {
        schema_version: SCHEMA_VERSION,
        kind,
        time: Utc::now().timestamp_millis() as f64 / 1000.0,
        updated,
        pruned,
    };
    rmp_serde::to_vec_named(&batch).map_err(|source| StoreError::Encode {
        kind: kind.as_str(),
        source,
    })
}
