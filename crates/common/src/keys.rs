//! Ed25519 key material for the command and event channels.
//!
//! Keys live on disk as base64 text. Secret keys are written with mode 0600
//! through a temp file and an atomic rename.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

#[cfg(target_family = "unix")]
use std::os::unix::fs::OpenOptionsExt;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to access key file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed key: {0}")]
    Malformed(String),
}

impl KeyError {
    fn io(path: &Path, source: io::Error) -> Self {
        KeyError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A public key presented by a peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_b64(raw: &str) -> Result<Self, KeyError> {
        let bytes = general_purpose::STANDARD
            .decode(raw.trim().as_bytes())
            .map_err(|err| KeyError::Malformed(err.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Malformed("public key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes).map_err(|err| KeyError::Malformed(err.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_b64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    /// Check a base64 signature over `body`.
    pub fn verify(&self, body: &[u8], sig_b64: &str) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(raw) = general_purpose::STANDARD.decode(sig_b64.as_bytes()) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&raw) else {
            return false;
        };
        key.verify_strict(body, &sig).is_ok()
    }

    /// Short hex digest for log lines.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let raw = fs::read_to_string(path).map_err(|err| KeyError::io(path, err))?;
        Self::from_b64(&raw)
    }

    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        write_atomic(path, self.to_b64().as_bytes(), 0o644)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PublicKey::from_b64(&raw).map_err(serde::de::Error::custom)
    }
}

pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// Sign `body`, returning the base64 signature.
    pub fn sign(&self, body: &[u8]) -> String {
        let sig = self.signing.sign(body);
        general_purpose::STANDARD.encode(sig.to_bytes())
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let raw = fs::read_to_string(path).map_err(|err| KeyError::io(path, err))?;
        let bytes = general_purpose::STANDARD
            .decode(raw.trim().as_bytes())
            .map_err(|err| KeyError::Malformed(err.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Malformed("secret key must be 32 bytes".into()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        let encoded = general_purpose::STANDARD.encode(self.signing.to_bytes());
        write_atomic(path, encoded.as_bytes(), 0o600)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

/// Write through `<path>.tmp`, fsync, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), KeyError> {
    let temp_path = path.with_extension("tmp");
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(target_family = "unix")]
    options.mode(mode);
    #[cfg(not(target_family = "unix"))]
    let _ = mode;

    let mut file = options
        .open(&temp_path)
        .map_err(|err| KeyError::io(&temp_path, err))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(|err| KeyError::io(&temp_path, err))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|err| KeyError::io(path, err))?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
