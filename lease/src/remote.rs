use crate::{
    cache::ResponseCache,
    message::{LeaseRequest, LeaseResponse},
    table::LeaseTable,
    Error,
};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Serves lease requests broadcast by other nodes out of the local table.
///
/// Fulfillers that hear the same request stagger their attempts with a random
/// backoff, then abstain if ambient traffic shows someone already answered.
/// This makes duplicate grants unlikely, not impossible; a wasted grant is
/// reclaimed by its own expiry.
#[derive(Debug, Clone)]
pub struct RemoteFulfiller {
    table: LeaseTable,
    fulfilled: ResponseCache,
    fuzz: Duration,
}

impl RemoteFulfiller {
    pub fn new(table: LeaseTable, fuzz: Duration) -> Self {
        Self {
            table,
            fulfilled: ResponseCache::new("ambient"),
            fuzz,
        }
    }

    /// Records a fulfillment seen on the network that was not addressed to us.
    pub fn observe(&self, response: LeaseResponse) -> bool {
        self.fulfilled.insert(response)
    }

    /// A backoff drawn uniformly from `[1, 2) × fuzz`.
    pub fn backoff(&self) -> Duration {
        let factor = 1.0 + rand::rng().random::<f64>();
        Duration::try_from_secs_f64(self.fuzz.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }

    /// Backs off, then tries to grant `request` from the local table.
    ///
    /// Returns `None` when this node cannot or should not help.
    pub async fn fulfil(&self, request: &LeaseRequest) -> Option<LeaseResponse> {
        tokio::time::sleep(self.backoff()).await;
        self.try_fulfil(request)
    }

    /// The post-backoff half of [`RemoteFulfiller::fulfil`].
    pub fn try_fulfil(&self, request: &LeaseRequest) -> Option<LeaseResponse> {
        // The reservation runs under the dedup cache's lock so that two
        // deliveries of one request cannot both reserve.
        let granted = self.fulfilled.insert_with(&request.token, || {
            match self.table.reserve_for(request) {
                Ok(lease) => Some(LeaseResponse {
                    requestor: request.requestor.clone(),
                    lease,
                }),
                Err(Error::NoCapacity) => {
                    debug!(requestor = %request.requestor, "no local capacity for remote request");
                    None
                }
                Err(e) => {
                    warn!(
                        requestor = %request.requestor,
                        error = %e,
                        "failed to reserve for remote request"
                    );
                    None
                }
            }
        })?;

        info!(
            requestor = %request.requestor,
            resource = %granted.lease.resource.id,
            token = %granted.lease.token,
            "granted remote lease"
        );
        Some(granted)
    }

    pub fn fulfilled(&self) -> &ResponseCache {
        &self.fulfilled
    }
}
