//! Directory-backed set of authorised client keys.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};
use wfrt_common::protocol::ProtocolError;
use wfrt_common::PublicKey;

/// Domain whose keys are accepted on every channel.
pub const ANY_DOMAIN: &str = "*";
pub const COMMAND_DOMAIN: &str = "command";
pub const EVENTS_DOMAIN: &str = "events";

/// Unknown keys force a full rescan at most this often unless a key
/// directory has changed since the last one.
const RESCAN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unknown client key {0}")]
    UnknownKey(String),
    #[error("authentication has been shut down")]
    Closed,
    #[error("client speaks api version {got}, server speaks {expected}")]
    Version { expected: u32, got: u32 },
    #[error("proof nonce does not match the challenge")]
    NonceMismatch,
    #[error("handshake timed out")]
    Timeout,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Default)]
struct GateState {
    dirs: BTreeMap<String, PathBuf>,
    keys: BTreeMap<String, HashMap<PublicKey, String>>,
    modified: BTreeMap<String, Option<SystemTime>>,
    last_scan: Option<Instant>,
    scans: u64,
    closed: bool,
}

impl GateState {
    fn stale(&self) -> bool {
        let recent = self
            .last_scan
            .is_some_and(|at| at.elapsed() < RESCAN_INTERVAL);
        !recent
            || self
                .dirs
                .iter()
                .any(|(domain, dir)| self.modified.get(domain).copied().flatten() != dir_mtime(dir))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthGate {
    inner: Arc<RwLock<GateState>>,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept keys found in `dir` for `domain`; `*` covers all domains.
    pub fn configure(&self, domain: &str, dir: &Path) {
        let modified = dir_mtime(dir);
        let keys = scan_dir(dir);
        info!(domain, dir = %dir.display(), keys = keys.len(), "auth domain configured");
        let mut state = self.write();
        state.dirs.insert(domain.to_string(), dir.to_path_buf());
        state.keys.insert(domain.to_string(), keys);
        state.modified.insert(domain.to_string(), modified);
        state.last_scan = Some(Instant::now());
        state.scans += 1;
    }

    /// User label for `key`, or `None` if the key is not authorised.
    pub fn authorize(&self, domain: &str, key: &PublicKey) -> Option<String> {
        if let Some(user) = self.lookup(domain, key) {
            return Some(user);
        }
        {
            let state = self.read();
            if state.closed || !state.stale() {
                return None;
            }
        }
        debug!(domain, key = %key.fingerprint(), "key not known; rescanning");
        self.reload();
        self.lookup(domain, key)
    }

    pub fn reload(&self) {
        let dirs = {
            let state = self.read();
            if state.closed {
                return;
            }
            state.dirs.clone()
        };
        let modified: BTreeMap<String, Option<SystemTime>> = dirs
            .iter()
            .map(|(domain, dir)| (domain.clone(), dir_mtime(dir)))
            .collect();
        let scanned: BTreeMap<String, HashMap<PublicKey, String>> = dirs
            .iter()
            .map(|(domain, dir)| (domain.clone(), scan_dir(dir)))
            .collect();
        let mut state = self.write();
        if !state.closed {
            state.keys = scanned;
            state.modified = modified;
            state.last_scan = Some(Instant::now());
            state.scans += 1;
        }
    }

    pub fn close(&self) {
        let mut state = self.write();
        state.closed = true;
        state.keys.clear();
        info!("authentication closed");
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    #[cfg(test)]
    fn scans(&self) -> u64 {
        self.read().scans
    }

    fn lookup(&self, domain: &str, key: &PublicKey) -> Option<String> {
        let state = self.read();
        if state.closed {
            return None;
        }
        [domain, ANY_DOMAIN]
            .iter()
            .filter_map(|d| state.keys.get(*d))
            .find_map(|keys| keys.get(key).cloned())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GateState> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, GateState> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn dir_mtime(dir: &Path) -> Option<SystemTime> {
    fs::metadata(dir).and_then(|meta| meta.modified()).ok()
}

/// Read every `<user>.pub` file in `dir`.
fn scan_dir(dir: &Path) -> HashMap<PublicKey, String> {
    let mut keys = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "key directory does not exist yet");
            return keys;
        }
        Err(err) => {
            warn!(dir = %dir.display(), "failed to read key directory: {}", err);
            return keys;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("pub") {
            continue;
        }
        let Some(user) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match PublicKey::load(&path) {
            Ok(key) => {
                keys.insert(key, user.to_string());
            }
            Err(err) => warn!(path = %path.display(), "skipping unreadable key: {}", err),
        }
    }
    keys
}
