//! Layout of a workflow's `.service` directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::keys::{KeyError, KeyPair, PublicKey};

#[cfg(target_family = "unix")]
use std::os::unix::fs::DirBuilderExt;

pub const SERVICE_DIR: &str = ".service";
pub const CLIENT_KEYS_DIR: &str = "client_public_keys";

#[derive(Debug, Clone)]
pub struct ServiceDir {
    root: PathBuf,
}

impl ServiceDir {
    pub fn new(run_dir: &Path, workflow: &str) -> Self {
        Self {
            root: run_dir.join(workflow).join(SERVICE_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_key(&self) -> PathBuf {
        self.root.join("server.key")
    }

    pub fn server_pub(&self) -> PathBuf {
        self.root.join("server.pub")
    }

    pub fn client_key(&self) -> PathBuf {
        self.root.join("client.key")
    }

    pub fn client_public_keys(&self) -> PathBuf {
        self.root.join(CLIENT_KEYS_DIR)
    }

    pub fn client_pub(&self, user: &str) -> PathBuf {
        self.client_public_keys().join(format!("{user}.pub"))
    }

    pub fn contact(&self) -> PathBuf {
        self.root.join("contact")
    }

    /// Generate fresh server keys and an owner client key pair, authorising
    /// the owner's public key. Existing keys of other users are left alone.
    pub fn provision(&self, owner: &str) -> Result<KeyPair, KeyError> {
        create_private_dir(&self.root)?;
        create_private_dir(&self.client_public_keys())?;

        let server = KeyPair::generate();
        server.save(&self.server_key())?;
        server.public().save(&self.server_pub())?;

        let client = KeyPair::generate();
        client.save(&self.client_key())?;
        client.public().save(&self.client_pub(owner))?;

        tracing::debug!(
            dir = %self.root.display(),
            server = %server.public().fingerprint(),
            owner,
            "provisioned service keys"
        );
        Ok(server)
    }

    /// Authorise an additional client key for `user`.
    pub fn authorize_client(&self, user: &str, key: &PublicKey) -> Result<(), KeyError> {
        create_private_dir(&self.client_public_keys())?;
        key.save(&self.client_pub(user))
    }

    pub fn load_server_pub(&self) -> Result<PublicKey, KeyError> {
        PublicKey::load(&self.server_pub())
    }

    pub fn load_client_key(&self) -> Result<KeyPair, KeyError> {
        KeyPair::load(&self.client_key())
    }
}

fn create_private_dir(path: &Path) -> Result<(), KeyError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(target_family = "unix")]
    builder.mode(0o700);
    builder.create(path).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn provision_lays_out_keys() {
        let run_dir = tempdir().unwrap();
        let service = ServiceDir::new(run_dir.path(), "flow");
        let server = service.provision("owner").unwrap();

        assert_eq!(service.load_server_pub().unwrap(), server.public());
        let client = service.load_client_key().unwrap();
        assert_eq!(
            PublicKey::load(&service.client_pub("owner")).unwrap(),
            client.public()
        );
        assert!(service.root().ends_with("flow/.service"));
    }

    #[test]
    fn reprovision_keeps_other_users() {
        let run_dir = tempdir().unwrap();
        let service = ServiceDir::new(run_dir.path(), "flow");
        service.provision("owner").unwrap();
        let guest = KeyPair::generate();
        service.authorize_client("guest", &guest.public()).unwrap();

        service.provision("owner").unwrap();
        assert_eq!(
            PublicKey::load(&service.client_pub("guest")).unwrap(),
            guest.public()
        );
    }
}
