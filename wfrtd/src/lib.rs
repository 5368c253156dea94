//! Workflow runtime daemon library.
//!
//! Two authenticated channels front a running workflow: a request/reply
//! command channel and a topic-tagged event channel. Commands reach the
//! scheduler loop only through its queue.

pub mod auth;
pub mod bridge;
pub mod context;
pub mod dispatch;
pub mod endpoints;
pub mod handshake;
pub mod logging;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod replier;
pub mod scheduler;
pub mod server;
pub mod startup;
pub mod state;

pub use context::ServerContext;
pub use scheduler::{Scheduler, StopRequest};
pub use server::WorkflowServer;
