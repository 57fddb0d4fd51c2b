use crate::{message, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Fan-out broadcast over named topics.
///
/// Delivery is at most once per subscriber with no ordering across
/// publishers. Implementations may loop a node's own publications back to it;
/// listeners filter on identity rather than relying on loopback suppression.
#[async_trait]
pub trait PubSub: Send + Sync + std::fmt::Debug {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()>;

    fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>>;
}

/// Encodes `message` and publishes it on `topic`.
pub async fn publish<T: Serialize>(bus: &dyn PubSub, topic: &str, message: &T) -> Result<()> {
    bus.publish(topic, message::encode(message)?).await
}

/// Subscribes to `topic`, yielding decoded messages accepted by `filter`.
///
/// Undecodable payloads are dropped. The pump task ends when either the
/// transport subscription or the returned receiver is closed.
pub fn subscribe<T, F>(
    bus: &dyn PubSub,
    topic: &str,
    filter: F,
) -> Result<mpsc::UnboundedReceiver<T>>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let mut raw = bus.subscribe(topic)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let topic = topic.to_string();

    tokio::spawn(async move {
        while let Some(data) = raw.recv().await {
            let msg: T = match message::decode(&data) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(topic = %topic, error = %e, "dropping malformed message");
                    continue;
                }
            };

            if filter(&msg) && tx.send(msg).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
