// # -----------------------------
// # crates/common/src/lib.rs
// # -----------------------------
pub mod config;
pub mod contact;
pub mod id;
pub mod keys;
pub mod privilege;
pub mod protocol;
pub mod service;

pub use config::{expand_tilde, ConfigError, GlobalConfig, PortRange};
pub use contact::{ContactError, ContactFile};
pub use id::{idpop, IdError, IdParts, IdPattern, Tokens};
pub use keys::{KeyError, KeyPair, PublicKey};
pub use privilege::Privilege;
pub use protocol::{Frame, FrameKind, ReplyEnvelope, ReplyError, RequestEnvelope, API_VERSION};
pub use service::ServiceDir;

/// Version advertised in contact files and handshakes.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Login name of the current user, used as the workflow owner.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "owner".to_string())
}
