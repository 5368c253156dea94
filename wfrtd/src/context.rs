use wfrt_common::{GlobalConfig, Privilege};

use crate::queue::CommandQueue;
use crate::state::SharedStore;

/// Everything request handlers may touch. Built once before the channels
/// start and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub workflow: String,
    pub owner: String,
    pub config: GlobalConfig,
    pub store: SharedStore,
    pub queue: CommandQueue,
}

impl ServerContext {
    pub fn privilege_for(&self, user: &str) -> Privilege {
        self.config.privilege_for(user, &self.owner)
    }
}
