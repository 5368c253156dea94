//! The contact file advertising where a running workflow listens.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::keys::write_atomic;

#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error("contact file not found")]
    Missing,
    #[error("failed to read contact file: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt contact file: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFile {
    pub workflow: String,
    pub host: String,
    pub port: u16,
    pub pub_port: u16,
    pub api_version: u32,
    pub owner: String,
    pub pid: u32,
    pub server_version: String,
}

impl ContactFile {
    pub fn load(path: &Path) -> Result<Self, ContactError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(ContactError::Missing),
            Err(err) => return Err(err.into()),
        };
        let contact: ContactFile =
            toml::from_str(&raw).map_err(|err| ContactError::Corrupt(err.to_string()))?;
        if contact.workflow.is_empty() || contact.host.is_empty() || contact.port == 0 {
            return Err(ContactError::Corrupt("required field is empty".into()));
        }
        Ok(contact)
    }

    pub fn write(&self, path: &Path) -> Result<(), ContactError> {
        let body = toml::to_string(self).map_err(|err| ContactError::Corrupt(err.to_string()))?;
        write_atomic(path, body.as_bytes(), 0o600).map_err(|err| match err {
            crate::keys::KeyError::Io { source, .. } => ContactError::Io(source),
            other => ContactError::Corrupt(other.to_string()),
        })
    }

    /// Remove the file; a file that is already gone is not an error.
    pub fn remove(path: &Path) -> Result<(), ContactError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
