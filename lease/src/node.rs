use crate::{
    allocator::Allocator,
    config::LeaseConfig,
    discovery::{CapacityAnnouncer, Discovery, Peer, Topic},
    lease::Lease,
    message::{
        LeaseRelease, LeaseRequest, LeaseResponse, LEASE_RELEASE_TOPIC, LEASE_REQUEST_TOPIC,
        LEASE_RESPONSE_TOPIC,
    },
    pubsub::{self, PubSub},
    remote::RemoteFulfiller,
    resource::Resource,
    table::{CapacityEvent, LeaseTable},
    PeerId, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot of a node for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub id: PeerId,
    pub host: String,
    pub resources: usize,
    pub free: usize,
    pub active_leases: Vec<Lease>,
    pub pending_responses: usize,
    pub observed_fulfillments: usize,
}

/// One node of the leasing network.
///
/// Owns the local lease table and runs the listener tasks that connect it to
/// the rest of the fleet: the request listener feeding the remote fulfiller,
/// the response listener feeding the allocator, the ambient listener feeding
/// the fulfiller's dedup cache, the release listener and the capacity
/// announcer.
#[derive(Debug)]
pub struct Governor {
    id: PeerId,
    host: String,
    config: LeaseConfig,
    table: LeaseTable,
    allocator: Arc<Allocator>,
    fulfiller: RemoteFulfiller,
    announcer: CapacityAnnouncer,
    bus: Arc<dyn PubSub>,
    capacity_events: Mutex<Option<mpsc::UnboundedReceiver<CapacityEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Governor {
    /// Builds a node over `resources`. Fails fast on an invalid `config`.
    ///
    /// Must be called from within a Tokio runtime. Nothing is heard from the
    /// network until [`Governor::start`].
    pub fn new(
        id: PeerId,
        host: impl Into<String>,
        resources: Vec<Resource>,
        bus: Arc<dyn PubSub>,
        discovery: Arc<dyn Discovery>,
        config: LeaseConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (table, capacity_events) = LeaseTable::with_capacity_events(resources, config.grace);
        let announcer =
            CapacityAnnouncer::new(discovery, Topic::HasGpuCapacity, config.query_timeout);
        let allocator = Allocator::new(id.clone(), table.clone(), bus.clone(), config.clone())
            .with_announcer(announcer.clone());
        let fulfiller = RemoteFulfiller::new(table.clone(), config.fuzz);

        Ok(Self {
            id,
            host: host.into(),
            config,
            table,
            allocator: Arc::new(allocator),
            fulfiller,
            announcer,
            bus,
            capacity_events: Mutex::new(Some(capacity_events)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Subscribes to the protocol topics and spawns the listener tasks.
    ///
    /// Calling `start` more than once is a no-op.
    pub fn start(&self) -> Result<()> {
        let Some(capacity_events) = self.capacity_events.lock().take() else {
            return Ok(());
        };

        let id = self.id.clone();
        let from_others = move |r: &LeaseRequest| r.requestor != id;
        let requests = pubsub::subscribe(&*self.bus, LEASE_REQUEST_TOPIC, from_others)?;

        let id = self.id.clone();
        let to_me = move |r: &LeaseResponse| r.requestor == id;
        let responses = pubsub::subscribe(&*self.bus, LEASE_RESPONSE_TOPIC, to_me)?;

        let id = self.id.clone();
        let to_others = move |r: &LeaseResponse| r.requestor != id;
        let ambient = pubsub::subscribe(&*self.bus, LEASE_RESPONSE_TOPIC, to_others)?;

        let host = self.host.clone();
        let held_here = move |r: &LeaseRelease| r.lease.resource.host == host;
        let releases = pubsub::subscribe(&*self.bus, LEASE_RELEASE_TOPIC, held_here)?;

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(serve_requests(
            requests,
            self.fulfiller.clone(),
            self.bus.clone(),
            self.config.publish_timeout,
        )));
        tasks.push(tokio::spawn(collect_responses(responses, self.allocator.clone())));
        tasks.push(tokio::spawn(observe_ambient(ambient, self.fulfiller.clone())));
        tasks.push(tokio::spawn(apply_releases(releases, self.table.clone())));
        tasks.push(self.announcer.clone().spawn(capacity_events));

        info!(
            id = %self.id,
            host = %self.host,
            resources = self.table.resources().len(),
            "governor started"
        );
        Ok(())
    }

    /// Aborts all listener tasks. Leases already granted run out normally.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!(id = %self.id, "governor stopped");
    }

    /// Leases a resource for `duration`, from this node or another.
    pub async fn lease(&self, duration: Duration) -> Result<Lease> {
        self.allocator.lease(duration).await
    }

    /// Returns a lease early.
    ///
    /// Leases on local resources are released in place; leases on remote
    /// resources are sent to their owner. Returns whether a local entry was
    /// removed, which is always `false` for remote leases.
    pub async fn release(&self, lease: &Lease) -> Result<bool> {
        if lease.resource.host == self.host {
            return Ok(self.table.release(lease));
        }

        let release = LeaseRelease { lease: lease.clone() };
        tokio::time::timeout(
            self.config.publish_timeout,
            pubsub::publish(&*self.bus, LEASE_RELEASE_TOPIC, &release),
        )
        .await
        .map_err(|_| crate::Error::RequestPublishTimeout {
            timeout_ms: self.config.publish_timeout.as_millis(),
        })??;
        debug!(host = %lease.resource.host, token = %lease.token, "sent remote release");
        Ok(false)
    }

    /// Peers currently advertising free capacity.
    pub async fn candidates(&self, max: usize) -> Vec<Peer> {
        self.announcer.query(max).await
    }

    pub fn status(&self) -> GovernorStatus {
        GovernorStatus {
            id: self.id.clone(),
            host: self.host.clone(),
            resources: self.table.resources().len(),
            free: self.table.free_count(),
            active_leases: self.table.active_leases(),
            pending_responses: self.allocator.responses().len(),
            observed_fulfillments: self.fulfiller.fulfilled().len(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn table(&self) -> &LeaseTable {
        &self.table
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_requests(
    mut requests: mpsc::UnboundedReceiver<LeaseRequest>,
    fulfiller: RemoteFulfiller,
    bus: Arc<dyn PubSub>,
    publish_timeout: Duration,
) {
    while let Some(request) = requests.recv().await {
        debug!(requestor = %request.requestor, token = %request.token, "heard lease request");
        let fulfiller = fulfiller.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            let Some(response) = fulfiller.fulfil(&request).await else {
                return;
            };
            let published = tokio::time::timeout(
                publish_timeout,
                pubsub::publish(&*bus, LEASE_RESPONSE_TOPIC, &response),
            )
            .await;
            match published {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    requestor = %response.requestor,
                    error = %e,
                    "failed to publish fulfillment"
                ),
                Err(_) => {
                    warn!(requestor = %response.requestor, "timed out publishing fulfillment")
                }
            }
        });
    }
}

async fn collect_responses(
    mut responses: mpsc::UnboundedReceiver<LeaseResponse>,
    allocator: Arc<Allocator>,
) {
    while let Some(response) = responses.recv().await {
        allocator.accept(response);
    }
}

async fn observe_ambient(
    mut ambient: mpsc::UnboundedReceiver<LeaseResponse>,
    fulfiller: RemoteFulfiller,
) {
    while let Some(response) = ambient.recv().await {
        fulfiller.observe(response);
    }
}

async fn apply_releases(mut releases: mpsc::UnboundedReceiver<LeaseRelease>, table: LeaseTable) {
    while let Some(LeaseRelease { lease }) = releases.recv().await {
        table.release(&lease);
    }
}
