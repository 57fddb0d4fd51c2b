use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use governor_lease::{Error, InMemoryBus, PubSub, Result};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    payload: Vec<u8>,
}

/// Broadcast over UDP to a fixed peer list.
///
/// Every publication is delivered to local subscribers and sent as one
/// datagram to each peer. Frames from peers are fanned out to local
/// subscribers of their topic.
#[derive(Debug, Clone)]
pub struct UdpBus {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    local: InMemoryBus,
}

impl UdpBus {
    pub async fn bind(addr: SocketAddr, peers: Vec<SocketAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let peers: Vec<_> = peers.into_iter().filter(|p| *p != local_addr).collect();
        info!(%local_addr, peers = peers.len(), "udp bus bound");

        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                peers,
                local: InMemoryBus::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Starts delivering frames received from peers.
    pub fn spawn_receiver(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match inner.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "udp receive failed");
                        continue;
                    }
                };
                let frame: Frame = match bincode::deserialize(&buf[..len]) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(%from, error = %e, "dropping malformed frame");
                        continue;
                    }
                };
                trace!(%from, topic = %frame.topic, bytes = len, "received frame");
                if let Err(e) = inner.local.publish(&frame.topic, frame.payload).await {
                    warn!(%from, error = %e, "local delivery failed");
                }
            }
        })
    }
}

#[async_trait]
impl PubSub for UdpBus {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        let frame = bincode::serialize(&Frame {
            topic: topic.to_string(),
            payload: data.clone(),
        })?;
        if frame.len() > MAX_DATAGRAM {
            return Err(Error::Transport(format!(
                "frame of {} bytes exceeds datagram limit",
                frame.len()
            )));
        }

        self.inner.local.publish(topic, data).await?;
        for peer in &self.inner.peers {
            if let Err(e) = self.inner.socket.send_to(&frame, peer).await {
                warn!(%peer, topic, error = %e, "failed to send frame");
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.inner.local.subscribe(topic)
    }
}
