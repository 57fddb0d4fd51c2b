use crate::{pubsub::PubSub, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process bus shared by every node that holds a clone.
///
/// Publications are delivered to all subscribers of the topic, including the
/// publisher's own subscriptions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    topics: Arc<DashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSub for InMemoryBus {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        if let Some(mut subs) = self.topics.get_mut(topic) {
            subs.retain(|tx| tx.send(data.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
