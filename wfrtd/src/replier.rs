//! The authenticated request/reply channel.
//!
//! Connections are served concurrently but requests are dispatched one at a
//! time, in arrival order, by a single loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use wfrt_common::protocol::MALFORMED_REQUEST;
use wfrt_common::{FrameKind, KeyPair, ReplyEnvelope};

use crate::auth::{AuthGate, COMMAND_DOMAIN};
use crate::context::ServerContext;
use crate::dispatch::dispatch;
use crate::handshake::{accept_session, HANDSHAKE_TIMEOUT};
use crate::registry::MethodRegistry;
use crate::startup::Participant;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("no free port on {host} in {min}..={max}")]
    NoFreePort { host: String, min: u16, max: u16 },
}

/// Bind the first free port `ports` yields.
pub async fn bind_in_range(
    host: &str,
    ports: impl IntoIterator<Item = u16>,
) -> Result<TcpListener, BindError> {
    let mut tried = (u16::MAX, 0u16);
    for port in ports {
        tried = (tried.0.min(port), tried.1.max(port));
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) => debug!(%host, port, "port unavailable: {}", err),
        }
    }
    Err(BindError::NoFreePort {
        host: host.to_string(),
        min: tried.0,
        max: tried.1,
    })
}

/// State every command connection shares.
pub struct CommandShared {
    pub ctx: ServerContext,
    pub registry: MethodRegistry,
    pub gate: AuthGate,
    pub key: Arc<KeyPair>,
}

struct Pending {
    request: Value,
    user: String,
    reply: oneshot::Sender<ReplyEnvelope>,
}

pub struct Replier {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Replier {
    /// Bind within `ports` (lowest first), report to the rendezvous, and
    /// serve once released.
    pub fn spawn(shared: Arc<CommandShared>, host: String, ports: Vec<u16>, participant: Participant) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let listener = match bind_in_range(&host, ports).await {
                Ok(listener) => listener,
                Err(err) => {
                    participant.failed(err.to_string()).await;
                    return;
                }
            };
            let port = match listener.local_addr() {
                Ok(addr) => addr.port(),
                Err(err) => {
                    participant.failed(err.to_string()).await;
                    return;
                }
            };
            if !participant.bound(port).await {
                debug!(port, "command channel released without starting");
                return;
            }
            info!(%host, port, "command channel listening");
            serve(listener, shared, shutdown_rx).await;
        });
        Self { shutdown, task }
    }

    /// Stop accepting, let connections finish their current request, and
    /// wait for the worker to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(DRAIN_TIMEOUT * 2, self.task).await.is_err() {
            warn!("command channel did not stop in time");
        }
    }
}

async fn serve(listener: TcpListener, shared: Arc<CommandShared>, mut shutdown: watch::Receiver<bool>) {
    let (requests, pending) = mpsc::channel(64);
    let dispatcher = tokio::spawn(dispatch_loop(shared.clone(), pending));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let shared = shared.clone();
                    let requests = requests.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        if let Err(err) = handle_connection(stream, addr, shared, requests, shutdown).await {
                            warn!(%addr, "command connection error: {:#}", err);
                        }
                    });
                }
                Err(err) => warn!("accept failed: {}", err),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);
    drop(requests);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        connections.abort_all();
    }
    let _ = dispatcher.await;
    debug!("command channel stopped");
}

async fn dispatch_loop(shared: Arc<CommandShared>, mut pending: mpsc::Receiver<Pending>) {
    while let Some(item) = pending.recv().await {
        let reply = dispatch(&shared.ctx, &shared.registry, &item.user, &item.request);
        let _ = item.reply.send(reply);
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<CommandShared>,
    requests: mpsc::Sender<Pending>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let (read, write) = stream.into_split();
    let mut session = match accept_session(
        read,
        write,
        COMMAND_DOMAIN,
        &shared.gate,
        shared.key.clone(),
        HANDSHAKE_TIMEOUT,
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            warn!(%addr, "rejected command connection: {}", err);
            return Ok(());
        }
    };
    debug!(%addr, user = %session.user, "command session established");

    loop {
        let frame = tokio::select! {
            frame = session.reader.next() => frame?,
            _ = shutdown.changed() => break,
        };
        let Some(frame) = frame else {
            break;
        };
        let reply = if frame.msg_type == FrameKind::Request {
            let (reply, receipt) = oneshot::channel();
            let item = Pending {
                request: frame.payload,
                user: session.user.clone(),
                reply,
            };
            if requests.send(item).await.is_err() {
                break;
            }
            match receipt.await {
                Ok(reply) => reply,
                Err(_) => break,
            }
        } else {
            ReplyEnvelope::error(MALFORMED_REQUEST)
        };
        session
            .writer
            .send(FrameKind::Reply, serde_json::to_value(&reply)?)
            .await?;
    }
    let _ = session.writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_the_next_free_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy = taken.local_addr().unwrap().port();
        let listener = bind_in_range("127.0.0.1", [busy, 0]).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), busy);
    }

    #[tokio::test]
    async fn exhausted_range_is_an_error() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy = taken.local_addr().unwrap().port();
        let err = bind_in_range("127.0.0.1", [busy]).await.unwrap_err();
        assert!(err.to_string().contains(&busy.to_string()));
    }
}
