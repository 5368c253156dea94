//! Global configuration (`global.toml`).
//!
//! Lookup order for the file: explicit path, `WFRT_CONF_PATH`, then
//! `~/.wfrt/global.toml`. A missing file yields defaults.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::privilege::Privilege;

pub const ENV_CONF_PATH: &str = "WFRT_CONF_PATH";
pub const ENV_RUN_DIR: &str = "WFRT_RUN_DIR";

const DEFAULT_MIN_PORT: u16 = 43001;
const DEFAULT_MAX_PORT: u16 = 43100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid port range {min}..={max}")]
    PortRange { min: u16, max: u16 },
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Inclusive port range shared by the command and event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u16; 2]", into = "[u16; 2]")]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Result<Self, ConfigError> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::PortRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.min..=self.max
    }
}

impl From<[u16; 2]> for PortRange {
    fn from(raw: [u16; 2]) -> Self {
        Self {
            min: raw[0],
            max: raw[1],
        }
    }
}

impl From<PortRange> for [u16; 2] {
    fn from(range: PortRange) -> Self {
        [range.min, range.max]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerCfg {
    pub host: String,
    pub ports: PortRange,
    pub startup_timeout_secs: u64,
    pub event_buffer: usize,
    pub run_dir: Option<PathBuf>,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports: PortRange {
                min: DEFAULT_MIN_PORT,
                max: DEFAULT_MAX_PORT,
            },
            startup_timeout_secs: 10,
            event_buffer: 1024,
            run_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessCfg {
    pub default: Privilege,
    pub users: BTreeMap<String, Privilege>,
}

impl Default for AccessCfg {
    fn default() -> Self {
        Self {
            default: Privilege::Identity,
            users: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub scheduler: SchedulerCfg,
    pub access: AccessCfg,
}

impl GlobalConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicitly named file must exist; the default location may not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() && !required {
            tracing::debug!(path = %path.display(), "no global config, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.clone(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded global config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: GlobalConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.ports.validate()?;
        if self.scheduler.host.trim().is_empty() {
            return Err(ConfigError::Invalid("scheduler.host is empty".into()));
        }
        if self.scheduler.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.event_buffer must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Root directory holding one sub-directory per workflow.
    pub fn run_dir(&self) -> PathBuf {
        if let Ok(raw) = env::var(ENV_RUN_DIR) {
            if !raw.trim().is_empty() {
                return expand_tilde(PathBuf::from(raw.trim()));
            }
        }
        match &self.scheduler.run_dir {
            Some(dir) => expand_tilde(dir.clone()),
            None => expand_tilde(PathBuf::from("~/.wfrt/run")),
        }
    }

    /// Privilege granted to `user`; the workflow owner always has control.
    pub fn privilege_for(&self, user: &str, owner: &str) -> Privilege {
        if user == owner {
            return Privilege::Control;
        }
        self.access
            .users
            .get(user)
            .copied()
            .unwrap_or(self.access.default)
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(raw) = env::var(ENV_CONF_PATH) {
        if !raw.trim().is_empty() {
            return Some(expand_tilde(PathBuf::from(raw.trim())));
        }
    }
    env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".wfrt").join("global.toml"))
}

pub fn expand_tilde(path: PathBuf) -> PathBuf {
    if !path.starts_with("~") {
        return path;
    }

    if path == PathBuf::from("~") {
        return env::var("HOME").map(PathBuf::from).unwrap_or(path);
    }

    if let Ok(home) = env::var("HOME") {
        if let Some(rest) = path.to_string_lossy().strip_prefix("~/") {
            let mut expanded = PathBuf::from(home);
            expanded.push(rest);
            return expanded;
        }
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.scheduler.ports, PortRange { min: 43001, max: 43100 });
        assert_eq!(config.scheduler.startup_timeout_secs, 10);
        assert_eq!(config.access.default, Privilege::Identity);
    }

    #[test]
    fn parses_sections_and_privileges() {
        let config = GlobalConfig::from_toml(
            r#"
            [scheduler]
            ports = [5000, 5010]
            startup_timeout_secs = 3

            [access]
            default = "state-totals"
            [access.users]
            alice = "read"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.scheduler.ports, PortRange { min: 5000, max: 5010 });
        assert_eq!(config.scheduler.host, "127.0.0.1");
        assert_eq!(config.privilege_for("alice", "owner"), Privilege::Read);
        assert_eq!(config.privilege_for("bob", "owner"), Privilege::StateTotals);
        assert_eq!(config.privilege_for("owner", "owner"), Privilege::Control);
    }

    #[test]
    fn rejects_inverted_port_range() {
        let err = GlobalConfig::from_toml("[scheduler]\nports = [6000, 5000]\n").unwrap_err();
        assert!(matches!(err, ConfigError::PortRange { min: 6000, max: 5000 }));
    }

    #[test]
    fn rejects_unknown_privilege() {
        let err = GlobalConfig::from_toml("[access]\ndefault = \"admin\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            GlobalConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("global.toml");
        fs::write(&path, "[scheduler]\nhost = \"0.0.0.0\"\n").unwrap();
        let config = GlobalConfig::load(Some(&path)).expect("load");
        assert_eq!(config.scheduler.host, "0.0.0.0");
    }
}
