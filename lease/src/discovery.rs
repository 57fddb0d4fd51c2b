use crate::{table::CapacityEvent, PeerId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Resource classes a node can advertise capacity for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    HasGpuCapacity,
}

impl Topic {
    pub fn key(&self) -> &'static str {
        match self {
            Topic::HasGpuCapacity => "has-gpu-capacity",
        }
    }
}

/// A node advertising capacity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub addr: String,
}

/// Peer-discovery primitives.
#[async_trait]
pub trait Discovery: Send + Sync + std::fmt::Debug {
    async fn announce(&self, topic: Topic) -> Result<()>;

    async fn revoke(&self, topic: Topic) -> Result<()>;

    /// Up to `max` peers advertising `topic` that answered within `timeout`.
    async fn query(&self, topic: Topic, max: usize, timeout: Duration) -> Result<Vec<Peer>>;
}

/// Forwards the local table's free/full transitions to peer discovery.
///
/// Holds no capacity state of its own beyond the last transition forwarded.
#[derive(Debug, Clone)]
pub struct CapacityAnnouncer {
    discovery: Arc<dyn Discovery>,
    topic: Topic,
    query_timeout: Duration,
}

impl CapacityAnnouncer {
    pub fn new(discovery: Arc<dyn Discovery>, topic: Topic, query_timeout: Duration) -> Self {
        Self {
            discovery,
            topic,
            query_timeout,
        }
    }

    pub async fn announce(&self) -> Result<()> {
        info!(topic = self.topic.key(), "announcing capacity");
        self.discovery.announce(self.topic).await
    }

    pub async fn revoke(&self) -> Result<()> {
        info!(topic = self.topic.key(), "revoking capacity");
        self.discovery.revoke(self.topic).await
    }

    /// Peers currently advertising capacity. Discovery failures are logged and
    /// reported as no peers.
    pub async fn query(&self, max: usize) -> Vec<Peer> {
        match self.discovery.query(self.topic, max, self.query_timeout).await {
            Ok(peers) => {
                debug!(topic = self.topic.key(), found = peers.len(), "capacity query");
                peers
            }
            Err(e) => {
                warn!(topic = self.topic.key(), error = %e, "capacity query failed");
                Vec::new()
            }
        }
    }

    /// Applies capacity transitions until the event stream closes.
    pub fn spawn(self, mut events: mpsc::UnboundedReceiver<CapacityEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut applied: Option<u64> = None;
            while let Some(event) = events.recv().await {
                if applied.is_some_and(|epoch| event.epoch <= epoch) {
                    debug!(epoch = event.epoch, "skipping superseded capacity event");
                    continue;
                }
                applied = Some(event.epoch);

                let result = if event.available {
                    self.announce().await
                } else {
                    self.revoke().await
                };
                if let Err(e) = result {
                    warn!(
                        epoch = event.epoch,
                        error = %e,
                        "failed to update capacity advertisement"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Discovery for Recorder {
        async fn announce(&self, _topic: Topic) -> Result<()> {
            self.calls.lock().push("announce");
            Ok(())
        }

        async fn revoke(&self, _topic: Topic) -> Result<()> {
            self.calls.lock().push("revoke");
            Ok(())
        }

        async fn query(&self, _topic: Topic, _max: usize, _timeout: Duration) -> Result<Vec<Peer>> {
            Err(crate::Error::Transport("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_events_forwarded_in_epoch_order() {
        let recorder = Arc::new(Recorder::default());
        let announcer =
            CapacityAnnouncer::new(recorder.clone(), Topic::HasGpuCapacity, Duration::from_secs(1));

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(CapacityEvent { epoch: 0, available: true }).unwrap();
        tx.send(CapacityEvent { epoch: 2, available: true }).unwrap();
        tx.send(CapacityEvent { epoch: 1, available: false }).unwrap();
        tx.send(CapacityEvent { epoch: 3, available: false }).unwrap();
        drop(tx);

        announcer.spawn(rx).await.unwrap();
        assert_eq!(*recorder.calls.lock(), vec!["announce", "announce", "revoke"]);
    }

    #[tokio::test]
    async fn test_failed_query_yields_no_peers() {
        let announcer = CapacityAnnouncer::new(
            Arc::new(Recorder::default()),
            Topic::HasGpuCapacity,
            Duration::from_secs(1),
        );
        assert!(announcer.query(4).await.is_empty());
    }
}
