//! The authenticated event channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use wfrt_common::protocol::{Event, Subscribe, SHUTDOWN_TOPIC};
use wfrt_common::{FrameKind, KeyPair};

use crate::auth::{AuthGate, EVENTS_DOMAIN};
use crate::handshake::{accept_session, HANDSHAKE_TIMEOUT};
use crate::replier::bind_in_range;
use crate::startup::Participant;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Fan-out of published events. Publishing never waits on subscribers; a
/// subscriber that falls more than the buffer behind skips ahead.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Arc<Event>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn publish(&self, topic: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) {
        let event = Arc::new(Event::new(topic, payload));
        if let Err(err) = self.sender.send(event) {
            debug!("no subscribers for event broadcast: {}", err);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventShared {
    pub hub: EventHub,
    pub gate: AuthGate,
    pub key: Arc<KeyPair>,
    /// How long an authenticated subscriber has to send `SUBSCRIBE`.
    pub subscribe_timeout: Duration,
}

pub struct Publisher {
    hub: EventHub,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Publisher {
    /// Bind within `ports` (highest first), report to the rendezvous, and
    /// serve once released.
    pub fn spawn(shared: Arc<EventShared>, host: String, ports: Vec<u16>, participant: Participant) -> Self {
        let hub = shared.hub.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let listener = match bind_in_range(&host, ports.into_iter().rev()).await {
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
                debug!(port, "event channel released without starting");
                return;
            }
            info!(%host, port, "event channel listening");
            serve(listener, shared, shutdown_rx).await;
        });
        Self {
            hub,
            shutdown,
            task,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Tell every subscriber why we are going away, then close.
    pub async fn stop(self, reason: &str) {
        self.hub.publish(SHUTDOWN_TOPIC, reason);
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(DRAIN_TIMEOUT * 2, self.task).await.is_err() {
            warn!("event channel did not stop in time");
        }
    }
}

async fn serve(listener: TcpListener, shared: Arc<EventShared>, mut shutdown: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let shared = shared.clone();
                    connections.spawn(async move {
                        if let Err(err) = handle_subscriber(stream, addr, shared).await {
                            debug!(%addr, "subscriber connection ended: {:#}", err);
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

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        connections.abort_all();
    }
    debug!("event channel stopped");
}

fn decode_topics(subscribe: &Subscribe) -> Vec<Vec<u8>> {
    subscribe
        .topics
        .iter()
        .filter_map(|topic| match general_purpose::STANDARD.decode(topic) {
            Ok(prefix) => Some(prefix),
            Err(err) => {
                warn!(%topic, "ignoring undecodable topic: {}", err);
                None
            }
        })
        .collect()
}

fn wanted(prefixes: &[Vec<u8>], event: &Event) -> bool {
    event.is_shutdown()
        || prefixes.is_empty()
        || prefixes.iter().any(|prefix| event.topic.starts_with(prefix))
}

async fn handle_subscriber(stream: TcpStream, addr: SocketAddr, shared: Arc<EventShared>) -> anyhow::Result<()> {
    let (read, write) = stream.into_split();
    let session = match accept_session(
        read,
        write,
        EVENTS_DOMAIN,
        &shared.gate,
        shared.key.clone(),
        HANDSHAKE_TIMEOUT,
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            warn!(%addr, "rejected event subscriber: {}", err);
            return Ok(());
        }
    };
    let mut reader = session.reader;
    let mut writer = session.writer;

    let wait = tokio::time::timeout(shared.subscribe_timeout, reader.expect(FrameKind::Subscribe));
    let subscribe: Subscribe = match wait.await {
        Ok(frame) => frame?.payload_as()?,
        Err(_) => {
            warn!(%addr, user = %session.user, "no subscription sent; closing");
            return Ok(());
        }
    };
    let prefixes = decode_topics(&subscribe);
    let mut events = shared.hub.subscribe();
    info!(%addr, user = %session.user, topics = prefixes.len(), "subscriber attached");

    // Anything further from the client is ignored; EOF ends the session.
    let hangup = async move {
        while let Ok(Some(_)) = reader.next().await {}
    };
    tokio::pin!(hangup);

    loop {
        let event = tokio::select! {
            received = events.recv() => received,
            _ = &mut hangup => break,
        };
        match event {
            Ok(event) => {
                if !wanted(&prefixes, &event) {
                    continue;
                }
                writer.send(FrameKind::Event, event.to_value()).await?;
                if event.is_shutdown() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%addr, skipped, "subscriber lagging; dropped events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    let _ = writer.shutdown().await;
    debug!(%addr, "subscriber detached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_prefixes_select_events() {
        let subscribe = Subscribe {
            topics: vec![general_purpose::STANDARD.encode("task_"), "%%%".into()],
        };
        let prefixes = decode_topics(&subscribe);
        assert_eq!(prefixes, vec![b"task_".to_vec()]);
        assert!(wanted(&prefixes, &Event::new("task_proxies", "x")));
        assert!(!wanted(&prefixes, &Event::new("jobs", "x")));
        assert!(wanted(&prefixes, &Event::new(SHUTDOWN_TOPIC, "bye")));
        assert!(wanted(&[], &Event::new("jobs", "x")));
    }

    #[tokio::test]
    async fn silent_subscribers_are_closed() {
        let keys = tempfile::tempdir().unwrap();
        let client_key = KeyPair::generate();
        client_key.public().save(&keys.path().join("alice.pub")).unwrap();
        let gate = AuthGate::new();
        gate.configure(crate::auth::ANY_DOMAIN, keys.path());
        let server_key = Arc::new(KeyPair::generate());
        let shared = Arc::new(EventShared {
            hub: EventHub::new(8),
            gate,
            key: server_key.clone(),
            subscribe_timeout: Duration::from_millis(200),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let serving = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let (stream, addr) = listener.accept().await.unwrap();
                handle_subscriber(stream, addr, shared).await
            })
        };

        // handshake only; SUBSCRIBE never follows
        let creds = wfrtd_client::Credentials::new(client_key, server_key.public());
        let _idle = wfrtd_client::WorkflowClient::connect_to("127.0.0.1", port, &creds, Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("subscriber task outlived the subscribe timeout")
            .unwrap()
            .unwrap();
        assert_eq!(shared.hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_receivers_lag_instead_of_blocking() {
        let hub = EventHub::new(2);
        let mut slow = hub.subscribe();
        for n in 0..10u8 {
            hub.publish("jobs", vec![n]);
        }
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(8))
        ));
        assert_eq!(slow.recv().await.unwrap().payload, vec![8]);
    }
}
