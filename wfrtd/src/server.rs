//! Owns both network channels for one running workflow.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use wfrt_common::{ContactError, ContactFile, KeyPair, ServiceDir};

use crate::auth::{AuthGate, ANY_DOMAIN};
use crate::context::ServerContext;
use crate::endpoints::build_registry;
use crate::handshake::HANDSHAKE_TIMEOUT;
use crate::publisher::{EventHub, EventShared, Publisher};
use crate::replier::{CommandShared, Replier};
use crate::startup::{Channel, Rendezvous, StartupError};
use crate::state::write_store;

pub struct WorkflowServer {
    port: u16,
    pub_port: u16,
    gate: AuthGate,
    replier: Replier,
    publisher: Publisher,
}

impl WorkflowServer {
    /// Start both channels and return once both are bound, or fail with
    /// neither left running.
    pub async fn start(
        ctx: ServerContext,
        service: &ServiceDir,
        server_key: Arc<KeyPair>,
    ) -> Result<Self, StartupError> {
        let gate = AuthGate::new();
        gate.configure(ANY_DOMAIN, &service.client_public_keys());

        let registry = build_registry()?;
        let scheduler = ctx.config.scheduler.clone();
        let ports: Vec<u16> = scheduler.ports.iter().collect();
        let store = ctx.store.clone();

        let (rendezvous, mut participants) = Rendezvous::new(&[Channel::Command, Channel::Events]);
        let (Some(events), Some(command)) = (participants.pop(), participants.pop()) else {
            return Err(StartupError::Aborted);
        };

        let command_shared = Arc::new(CommandShared {
            ctx,
            registry,
            gate: gate.clone(),
            key: server_key.clone(),
        });
        let event_shared = Arc::new(EventShared {
            hub: EventHub::new(scheduler.event_buffer),
            gate: gate.clone(),
            key: server_key,
            subscribe_timeout: HANDSHAKE_TIMEOUT,
        });
        let replier = Replier::spawn(command_shared, scheduler.host.clone(), ports.clone(), command);
        let publisher = Publisher::spawn(event_shared, scheduler.host.clone(), ports, events);

        let timeout = Duration::from_secs(scheduler.startup_timeout_secs);
        let bound = match rendezvous.wait(timeout).await {
            Ok(bound) => bound,
            Err(err) => {
                replier.stop().await;
                publisher.stop("startup failed").await;
                gate.close();
                return Err(err);
            }
        };
        let (Some(&port), Some(&pub_port)) = (bound.get(&Channel::Command), bound.get(&Channel::Events)) else {
            return Err(StartupError::Aborted);
        };

        write_store(&store).delta_workflow_ports(port, pub_port);
        info!(port, pub_port, "workflow server started");
        Ok(Self {
            port,
            pub_port,
            gate,
            replier,
            publisher,
        })
    }

    /// Write the contact file. If that fails the server is stopped, so
    /// subscribers still get a shutdown notice.
    pub async fn advertise(self, contact: &ContactFile, path: &Path) -> Result<Self, ContactError> {
        match contact.write(path) {
            Ok(()) => Ok(self),
            Err(err) => {
                self.stop("failed to write contact file").await;
                Err(err)
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pub_port(&self) -> u16 {
        self.pub_port
    }

    pub fn hub(&self) -> &EventHub {
        self.publisher.hub()
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// Close the command channel, announce shutdown to subscribers, then
    /// refuse any further handshakes.
    pub async fn stop(self, reason: &str) {
        info!(%reason, "stopping workflow server");
        self.replier.stop().await;
        self.publisher.stop(reason).await;
        self.gate.close();
    }
}
