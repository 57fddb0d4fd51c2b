use crate::{
    discovery::{Discovery, Peer, Topic},
    message::DISCOVERY_TOPIC,
    pubsub::{self, PubSub},
    Error, PeerId, Result,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMessage {
    Query {
        from: PeerId,
        topic: Topic,
        nonce: u64,
    },
    Advert {
        to: PeerId,
        nonce: u64,
        topic: Topic,
        peer: Peer,
    },
}

/// Peer discovery carried over the broadcast layer.
///
/// A node answers queries for the topics it currently advertises; a querier
/// collects the answers addressed to it until it has enough or time runs out.
#[derive(Debug)]
pub struct GossipDiscovery {
    local: Peer,
    bus: Arc<dyn PubSub>,
    advertised: Mutex<HashSet<Topic>>,
    pending: DashMap<u64, mpsc::UnboundedSender<Peer>>,
}

impl GossipDiscovery {
    pub fn new(local: Peer, bus: Arc<dyn PubSub>) -> Arc<Self> {
        Arc::new(Self {
            local,
            bus,
            advertised: Mutex::new(HashSet::new()),
            pending: DashMap::new(),
        })
    }

    /// Starts answering queries and routing adverts to pending queries.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let id = self.local.id.clone();
        let relevant = move |msg: &DiscoveryMessage| match msg {
            DiscoveryMessage::Query { from, .. } => *from != id,
            DiscoveryMessage::Advert { to, .. } => *to == id,
        };
        let mut inbound = pubsub::subscribe(&*self.bus, DISCOVERY_TOPIC, relevant)?;

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                this.handle(msg).await;
            }
        }))
    }

    pub fn is_advertising(&self, topic: Topic) -> bool {
        self.advertised.lock().contains(&topic)
    }

    async fn handle(&self, msg: DiscoveryMessage) {
        match msg {
            DiscoveryMessage::Query { from, topic, nonce } => {
                if !self.is_advertising(topic) {
                    return;
                }
                let advert = DiscoveryMessage::Advert {
                    to: from.clone(),
                    nonce,
                    topic,
                    peer: self.local.clone(),
                };
                if let Err(e) = pubsub::publish(&*self.bus, DISCOVERY_TOPIC, &advert).await {
                    warn!(to = %from, error = %e, "failed to answer discovery query");
                }
            }
            DiscoveryMessage::Advert { nonce, peer, .. } => {
                if let Some(waiter) = self.pending.get(&nonce) {
                    let _ = waiter.send(peer);
                } else {
                    debug!(peer = %peer.id, nonce, "late discovery advert");
                }
            }
        }
    }
}

#[async_trait]
impl Discovery for GossipDiscovery {
    async fn announce(&self, topic: Topic) -> Result<()> {
        self.advertised.lock().insert(topic);
        Ok(())
    }

    async fn revoke(&self, topic: Topic) -> Result<()> {
        self.advertised.lock().remove(&topic);
        Ok(())
    }

    async fn query(&self, topic: Topic, max: usize, timeout: Duration) -> Result<Vec<Peer>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let Some(deadline) = tokio::time::Instant::now().checked_add(timeout) else {
            return Err(Error::InvalidConfig(format!("query timeout {timeout:?} is out of range")));
        };

        let nonce = rand::rng().random::<u64>();
        let (tx, mut answers) = mpsc::unbounded_channel();
        self.pending.insert(nonce, tx);

        let query = DiscoveryMessage::Query {
            from: self.local.id.clone(),
            topic,
            nonce,
        };
        if let Err(e) = pubsub::publish(&*self.bus, DISCOVERY_TOPIC, &query).await {
            self.pending.remove(&nonce);
            return Err(e);
        }

        let mut peers: Vec<Peer> = Vec::new();
        while peers.len() < max {
            match tokio::time::timeout_at(deadline, answers.recv()).await {
                Ok(Some(peer)) => {
                    if !peers.contains(&peer) {
                        peers.push(peer);
                    }
                }
                _ => break,
            }
        }

        self.pending.remove(&nonce);
        Ok(peers)
    }
}
