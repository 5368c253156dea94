//! Job elements, keyed by job id.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use wfrt_common::id::{self, JobItem};

pub const JOB_STATUSES: [&str; 5] = ["submitted", "submit-failed", "running", "succeeded", "failed"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub submit_num: u32,
    pub state: String,
    pub task_proxy: String,
    pub name: String,
    pub cycle_point: String,
    pub submitted_time: Option<String>,
    pub started_time: Option<String>,
    pub finished_time: Option<String>,
    pub batch_sys_name: String,
    pub batch_sys_job_id: String,
    pub host: String,
    pub messages: Vec<String>,
}

/// What the submission layer knows about a new job.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobConf {
    pub point: String,
    pub name: String,
    pub submit_num: u32,
    pub state: Option<String>,
    pub batch_sys_name: String,
    pub host: String,
}

#[derive(Debug, Clone, Default)]
pub struct JobPool {
    workflow: String,
    pool: BTreeMap<String, Job>,
    updated: BTreeSet<String>,
    pruned: BTreeSet<String>,
}

impl JobPool {
    pub fn new(workflow: &str) -> Self {
        Self {
            workflow: workflow.to_string(),
            ..Self::default()
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.pool.get(job_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.pool.values()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Jobs of one task proxy, latest submission first.
    pub fn jobs_of(&self, task_proxy: &str) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .pool
            .values()
            .filter(|job| job.task_proxy == task_proxy)
            .collect();
        jobs.sort_by(|a, b| b.submit_num.cmp(&a.submit_num));
        jobs
    }

    pub fn insert_job(&mut self, conf: JobConf) -> String {
        let job_id = id::job_id(&self.workflow, &conf.point, &conf.name, conf.submit_num);
        let state = conf
            .state
            .filter(|state| JOB_STATUSES.contains(&state.as_str()))
            .unwrap_or_else(|| "submitted".to_string());
        let job = Job {
            id: job_id.clone(),
            submit_num: conf.submit_num,
            state,
            task_proxy: id::proxy_id(&self.workflow, &conf.point, &conf.name),
            name: conf.name,
            cycle_point: conf.point,
            batch_sys_name: conf.batch_sys_name,
            host: conf.host,
            ..Job::default()
        };
        self.pool.insert(job_id.clone(), job);
        self.pruned.remove(&job_id);
        self.updated.insert(job_id.clone());
        job_id
    }

    pub fn remove_job(&mut self, job_d: &str) -> bool {
        let Some(job_id) = self.job_id_from_item(job_d) else {
            return false;
        };
        self.remove_by_id(&job_id)
    }

    /// Drop every job of a task proxy, returning their ids.
    pub fn remove_task_jobs(&mut self, task_proxy: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .pool
            .values()
            .filter(|job| job.task_proxy == task_proxy)
            .map(|job| job.id.clone())
            .collect();
        for job_id in &ids {
            self.remove_by_id(job_id);
        }
        ids
    }

    pub fn set_job_attr(&mut self, job_d: &str, attr: &str, value: &Value) -> bool {
        let text = match value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let Some(job) = self.job_mut(job_d) else {
            return false;
        };
        match attr {
            "batch_sys_name" => job.batch_sys_name = text,
            "batch_sys_job_id" => job.batch_sys_job_id = text,
            "host" => job.host = text,
            other => {
                warn!(job = %job_d, attr = other, "ignoring unknown job attribute");
                return false;
            }
        }
        true
    }

    /// Unknown states and jobs that are not in the pool are ignored.
    pub fn set_job_state(&mut self, job_d: &str, status: &str) -> bool {
        if !JOB_STATUSES.contains(&status) {
            debug!(job = %job_d, status, "ignoring unknown job state");
            return false;
        }
        match self.job_mut(job_d) {
            Some(job) => {
                job.state = status.to_string();
                true
            }
            None => false,
        }
    }

    /// `event_key` is one of `submitted`, `started` or `finished`.
    pub fn set_job_time(&mut self, job_d: &str, event_key: &str, time: Option<&str>) -> bool {
        let time = time.map(str::to_string);
        let Some(job) = self.job_mut(job_d) else {
            return false;
        };
        match event_key {
            "submitted" => job.submitted_time = time,
            "started" => job.started_time = time,
            "finished" => job.finished_time = time,
            _ => return false,
        }
        true
    }

    pub fn add_job_msg(&mut self, job_d: &str, msg: &str) -> bool {
        match self.job_mut(job_d) {
            Some(job) => {
                job.messages.push(msg.to_string());
                true
            }
            None => false,
        }
    }

    pub fn parse_job_item(item: &str) -> JobItem {
        id::parse_job_item(item)
    }

    /// Ids updated and pruned since the last call.
    pub fn take_deltas(&mut self) -> (BTreeSet<String>, BTreeSet<String>) {
        (
            std::mem::take(&mut self.updated),
            std::mem::take(&mut self.pruned),
        )
    }

    pub(crate) fn mark_updated(&mut self, job_id: &str) {
        if self.pool.contains_key(job_id) {
            self.updated.insert(job_id.to_string());
        }
    }

    fn remove_by_id(&mut self, job_id: &str) -> bool {
        if self.pool.remove(job_id).is_none() {
            return false;
        }
        self.updated.remove(job_id);
        self.pruned.insert(job_id.to_string());
        true
    }

    /// Accepts full ids as well as either relative spelling.
    fn job_id_from_item(&self, job_d: &str) -> Option<String> {
        let relative = job_d.split_once("//").map_or(job_d, |(_, rest)| rest);
        let item = Self::parse_job_item(relative);
        let point = item.point?;
        let submit_num = item.submit_num?.parse::<u32>().ok()?;
        Some(id::job_id(&self.workflow, &point, &item.name, submit_num))
    }

    fn job_mut(&mut self, job_d: &str) -> Option<&mut Job> {
        let job_id = self.job_id_from_item(job_d)?;
        let job = self.pool.get_mut(&job_id)?;
        self.updated.insert(job_id);
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_job() -> JobPool {
        let mut pool = JobPool::new("flow");
        pool.insert_job(JobConf {
            point: "1".into(),
            name: "foo".into(),
            submit_num: 1,
            batch_sys_name: "background".into(),
            host: "localhost".into(),
            ..JobConf::default()
        });
        pool
    }

    #[test]
    fn insert_uses_universal_job_id() {
        let pool = pool_with_job();
        let job = pool.get("flow//1/foo/01").expect("job present");
        assert_eq!(job.state, "submitted");
        assert_eq!(job.task_proxy, "flow//1/foo");
    }

    #[test]
    fn set_job_state_ignores_unknown_state_and_missing_job() {
        let mut pool = pool_with_job();
        assert!(!pool.set_job_state("1/foo/01", "exploded"));
        assert!(!pool.set_job_state("1/bar/01", "running"));
        assert!(pool.set_job_state("foo.1.01", "running"));
        assert_eq!(pool.get("flow//1/foo/01").unwrap().state, "running");
    }

    #[test]
    fn attrs_times_and_messages() {
        let mut pool = pool_with_job();
        assert!(pool.set_job_attr("1/foo/01", "batch_sys_job_id", &Value::from("4242")));
        assert!(!pool.set_job_attr("1/foo/01", "colour", &Value::from("red")));
        assert!(pool.set_job_time("1/foo/01", "started", Some("2020-01-01T00:00:00Z")));
        assert!(pool.add_job_msg("1/foo/01", "started"));
        let job = pool.get("flow//1/foo/01").unwrap();
        assert_eq!(job.batch_sys_job_id, "4242");
        assert_eq!(job.started_time.as_deref(), Some("2020-01-01T00:00:00Z"));
        assert_eq!(job.messages, vec!["started".to_string()]);
    }

    #[test]
    fn removal_records_pruned_ids() {
        let mut pool = pool_with_job();
        pool.insert_job(JobConf {
            point: "1".into(),
            name: "foo".into(),
            submit_num: 2,
            ..JobConf::default()
        });
        pool.take_deltas();

        assert_eq!(pool.jobs_of("flow//1/foo")[0].submit_num, 2);
        assert!(pool.remove_job("1/foo/01"));
        assert!(!pool.remove_job("1/foo"));
        assert_eq!(pool.remove_task_jobs("flow//1/foo"), vec!["flow//1/foo/02"]);
        let (updated, pruned) = pool.take_deltas();
        assert!(updated.is_empty());
        assert_eq!(pruned.len(), 2);
        assert!(pool.is_empty());
    }
}
