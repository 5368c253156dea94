//! Discover workflows under a run directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use wfrt_common::service::SERVICE_DIR;
use wfrt_common::{ContactFile, ServiceDir};

/// Workflow names may be nested (`group/flow`); stop looking below this.
const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowEntry {
    pub name: String,
    /// Present only while the workflow is running with valid contact info.
    pub contact: Option<ContactFile>,
}

impl WorkflowEntry {
    pub fn is_running(&self) -> bool {
        self.contact.is_some()
    }
}

/// Every workflow directory (one holding `.service/`) below `run_dir`,
/// sorted by name. An unreadable run directory yields nothing.
pub fn scan(run_dir: &Path) -> Vec<WorkflowEntry> {
    let mut found = Vec::new();
    walk(run_dir, run_dir, 0, &mut found);
    found.sort_by(|a, b| a.name.cmp(&b.name));
    found
}

fn walk(run_dir: &Path, dir: &Path, depth: usize, found: &mut Vec<WorkflowEntry>) {
    if depth > 0 && dir.join(SERVICE_DIR).is_dir() {
        if let Some(name) = workflow_name(run_dir, dir) {
            let contact = ContactFile::load(&ServiceDir::new(run_dir, &name).contact())
                .map_err(|err| debug!(workflow = %name, "no contact: {}", err))
                .ok();
            found.push(WorkflowEntry { name, contact });
        }
        return;
    }
    if depth >= MAX_DEPTH {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), "cannot scan: {}", err);
            return;
        }
    };
    let mut children: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.'))
        })
        .collect();
    children.sort();
    for child in children {
        walk(run_dir, &child, depth + 1, found);
    }
}

fn workflow_name(run_dir: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(run_dir).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|part| part.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wfrt_common::API_VERSION;

    fn running(run_dir: &Path, name: &str, port: u16) {
        let service = ServiceDir::new(run_dir, name);
        fs::create_dir_all(service.root()).unwrap();
        ContactFile {
            workflow: name.to_string(),
            host: "localhost".to_string(),
            port,
            pub_port: port + 1,
            api_version: API_VERSION,
            owner: "owner".to_string(),
            pid: 1,
            server_version: "0.1.0".to_string(),
        }
        .write(&service.contact())
        .unwrap();
    }

    #[test]
    fn finds_running_stopped_and_nested_workflows() {
        let run_dir = tempdir().unwrap();
        running(run_dir.path(), "beta", 43001);
        running(run_dir.path(), "group/alpha", 43010);
        fs::create_dir_all(run_dir.path().join("stopped").join(SERVICE_DIR)).unwrap();
        fs::create_dir_all(run_dir.path().join("not-a-workflow").join("log")).unwrap();

        let entries = scan(run_dir.path());
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "group/alpha", "stopped"]);
        assert_eq!(entries[0].contact.as_ref().map(|c| c.port), Some(43001));
        assert!(entries[1].is_running());
        assert!(!entries[2].is_running());
    }

    #[test]
    fn missing_run_dir_is_empty() {
        let run_dir = tempdir().unwrap();
        assert!(scan(&run_dir.path().join("absent")).is_empty());
    }
}
