use crate::{
    cache::ResponseCache,
    config::LeaseConfig,
    discovery::CapacityAnnouncer,
    lease::{Lease, Token},
    message::{LeaseRequest, LeaseResponse, LEASE_REQUEST_TOPIC},
    pubsub::{self, PubSub},
    table::LeaseTable,
    Error, PeerId, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Requester side of the leasing protocol.
///
/// Serves a lease from the local table when it can, otherwise broadcasts a
/// request and waits for a fulfillment correlated by token.
#[derive(Debug)]
pub struct Allocator {
    id: PeerId,
    table: LeaseTable,
    bus: Arc<dyn PubSub>,
    responses: ResponseCache,
    announcer: Option<CapacityAnnouncer>,
    config: LeaseConfig,
}

impl Allocator {
    pub fn new(id: PeerId, table: LeaseTable, bus: Arc<dyn PubSub>, config: LeaseConfig) -> Self {
        Self {
            id,
            table,
            bus,
            responses: ResponseCache::new("responses"),
            announcer: None,
            config,
        }
    }

    /// Enables the capacity probe configured in [`LeaseConfig::capacity_probe`].
    pub fn with_announcer(mut self, announcer: CapacityAnnouncer) -> Self {
        self.announcer = Some(announcer);
        self
    }

    /// Records a fulfillment addressed to this node. Duplicates for a token
    /// already answered are discarded.
    pub fn accept(&self, response: LeaseResponse) -> bool {
        debug_assert_eq!(response.requestor, self.id);
        self.responses.insert(response)
    }

    /// Leases a resource for `duration`, locally if possible, else from the
    /// network.
    pub async fn lease(&self, duration: Duration) -> Result<Lease> {
        match self.table.reserve(duration) {
            Ok(lease) => {
                debug!(resource = %lease.resource.id, "served lease locally");
                return Ok(lease);
            }
            Err(Error::NoCapacity) => {}
            Err(e) => return Err(e),
        }

        if let (Some(max), Some(announcer)) = (self.config.capacity_probe, &self.announcer) {
            let peers = announcer.query(max).await;
            if peers.is_empty() {
                info!("no peer advertises capacity, skipping broadcast");
                return Err(Error::NoRemoteFulfillment);
            }
            debug!(candidates = peers.len(), "peers advertise capacity");
        }

        let request = LeaseRequest {
            requestor: self.id.clone(),
            token: Token::generate(),
            duration,
        };
        self.request_remote(&request).await
    }

    /// Broadcasts `request` and waits for its fulfillment.
    pub async fn request_remote(&self, request: &LeaseRequest) -> Result<Lease> {
        let deadline = Instant::now()
            .checked_add(self.config.request_timeout)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "request timeout {:?} is out of range",
                    self.config.request_timeout
                ))
            })?;
        let publish_timeout = self.config.publish_timeout;
        match tokio::time::timeout(
            publish_timeout,
            pubsub::publish(&*self.bus, LEASE_REQUEST_TOPIC, request),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::RequestPublishTimeout {
                    timeout_ms: publish_timeout.as_millis(),
                })
            }
        }
        info!(token = %request.token, duration = ?request.duration, "broadcast lease request");

        loop {
            if let Some(response) = self.responses.get(&request.token) {
                info!(
                    token = %request.token,
                    host = %response.lease.resource.host,
                    resource = %response.lease.resource.id,
                    "lease fulfilled remotely"
                );
                return Ok(response.lease);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }

        info!(token = %request.token, "lease request timed out");
        Err(Error::NoRemoteFulfillment)
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn responses(&self) -> &ResponseCache {
        &self.responses
    }
}
