//! Startup rendezvous between the server and its two channel workers.
//!
//! Each worker binds its socket, reports the outcome, then parks until the
//! coordinator either releases every worker or aborts them all. The server
//! never reports ports for a half-started channel pair.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Channel {
    Command,
    Events,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Command => "command",
            Channel::Events => "events",
        })
    }
}

#[derive(Debug)]
enum Report {
    Bound { channel: Channel, port: u16 },
    Failed { channel: Channel, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Pending,
    Go,
    Abort,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("channels did not start within {0:?}")]
    Timeout(Duration),
    #[error("{channel} channel failed to start: {reason}")]
    Bind { channel: Channel, reason: String },
    #[error("a channel worker exited before reporting")]
    Aborted,
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
}

/// One worker's end of the rendezvous.
#[derive(Debug)]
pub struct Participant {
    channel: Channel,
    reports: mpsc::Sender<Report>,
    release: watch::Receiver<Release>,
}

impl Participant {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Report a bound port and wait for the go signal. `false` means the
    /// worker should close its socket and exit.
    pub async fn bound(mut self, port: u16) -> bool {
        let channel = self.channel;
        if self.reports.send(Report::Bound { channel, port }).await.is_err() {
            return false;
        }
        loop {
            match *self.release.borrow_and_update() {
                Release::Go => return true,
                Release::Abort => return false,
                Release::Pending => {}
            }
            if self.release.changed().await.is_err() {
                return false;
            }
        }
    }

    pub async fn failed(self, reason: impl Into<String>) {
        let report = Report::Failed {
            channel: self.channel,
            reason: reason.into(),
        };
        let _ = self.reports.send(report).await;
    }
}

/// Coordinator side; consumed by [`Rendezvous::wait`].
#[derive(Debug)]
pub struct Rendezvous {
    expected: Vec<Channel>,
    reports: mpsc::Receiver<Report>,
    release: watch::Sender<Release>,
}

impl Rendezvous {
    pub fn new(channels: &[Channel]) -> (Self, Vec<Participant>) {
        let (report_tx, report_rx) = mpsc::channel(channels.len().max(1));
        let (release_tx, release_rx) = watch::channel(Release::Pending);
        let participants = channels
            .iter()
            .map(|channel| Participant {
                channel: *channel,
                reports: report_tx.clone(),
                release: release_rx.clone(),
            })
            .collect();
        let rendezvous = Self {
            expected: channels.to_vec(),
            reports: report_rx,
            release: release_tx,
        };
        (rendezvous, participants)
    }

    /// Collect every worker's port, then release them together. Any failure
    /// or a timeout aborts all of them.
    pub async fn wait(mut self, timeout: Duration) -> Result<BTreeMap<Channel, u16>, StartupError> {
        let outcome = tokio::time::timeout(timeout, self.collect()).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(StartupError::Timeout(timeout)),
        };
        match &result {
            Ok(ports) => {
                debug!(?ports, "all channels bound");
                let _ = self.release.send(Release::Go);
            }
            Err(err) => {
                warn!("aborting startup: {}", err);
                let _ = self.release.send(Release::Abort);
            }
        }
        result
    }

    async fn collect(&mut self) -> Result<BTreeMap<Channel, u16>, StartupError> {
        let mut ports = BTreeMap::new();
        while ports.len() < self.expected.len() {
            match self.reports.recv().await {
                Some(Report::Bound { channel, port }) => {
                    ports.insert(channel, port);
                }
                Some(Report::Failed { channel, reason }) => {
                    return Err(StartupError::Bind { channel, reason })
                }
                None => return Err(StartupError::Aborted),
            }
        }
        Ok(ports)
    }
}
