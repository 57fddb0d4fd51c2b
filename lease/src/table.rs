use crate::{
    error::{Error, Result},
    lease::{self, Lease, Token},
    message::LeaseRequest,
    resource::{Resource, ResourceId},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A free/full transition of a [`LeaseTable`].
///
/// Epochs increase strictly with every transition so consumers can discard
/// events that arrive out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityEvent {
    pub epoch: u64,
    pub available: bool,
}

/// Authoritative lease state for the resources physically on this node.
///
/// Cloning is cheap and yields a handle onto the same table.
#[derive(Debug, Clone)]
pub struct LeaseTable {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    // Scan order for reservations; immutable after construction.
    resources: Vec<Resource>,
    grace: Duration,
    state: Mutex<State>,
    returns: mpsc::UnboundedSender<Lease>,
    capacity_tx: Option<mpsc::UnboundedSender<CapacityEvent>>,
}

#[derive(Debug)]
struct State {
    leases: HashMap<ResourceId, Lease>,
    available: bool,
    epoch: u64,
}

impl LeaseTable {
    /// Creates a table over `resources`. Every lease is held for its requested
    /// duration plus `grace`.
    ///
    /// Must be called from within a Tokio runtime; the expiry reconciler runs
    /// as a background task for as long as any handle to the table exists.
    pub fn new(resources: Vec<Resource>, grace: Duration) -> Self {
        Self::build(resources, grace, None)
    }

    /// Like [`LeaseTable::new`], additionally reporting free/full transitions.
    ///
    /// A non-empty table reports its initial availability as epoch 0.
    pub fn with_capacity_events(
        resources: Vec<Resource>,
        grace: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<CapacityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(resources, grace, Some(tx)), rx)
    }

    fn build(
        resources: Vec<Resource>,
        grace: Duration,
        capacity_tx: Option<mpsc::UnboundedSender<CapacityEvent>>,
    ) -> Self {
        let (returns, returns_rx) = mpsc::unbounded_channel();
        let available = !resources.is_empty();

        if available {
            if let Some(tx) = &capacity_tx {
                let _ = tx.send(CapacityEvent { epoch: 0, available });
            }
        }

        let inner = Arc::new(Inner {
            resources,
            grace,
            state: Mutex::new(State {
                leases: HashMap::new(),
                available,
                epoch: 0,
            }),
            returns,
            capacity_tx,
        });

        tokio::spawn(reclaim(Arc::downgrade(&inner), returns_rx));

        Self { inner }
    }

    /// Claims the first free resource under a freshly generated token.
    ///
    /// Never waits for a release: fails with [`Error::NoCapacity`] when every
    /// resource is held.
    pub fn reserve(&self, duration: Duration) -> Result<Lease> {
        self.claim(Token::generate(), duration)
    }

    /// Claims a resource on behalf of `request`, issuing the lease under the
    /// request's own token so both ends correlate on it.
    pub fn reserve_for(&self, request: &LeaseRequest) -> Result<Lease> {
        self.claim(request.token.clone(), request.duration)
    }

    fn claim(&self, token: Token, duration: Duration) -> Result<Lease> {
        let hold = duration
            .checked_add(self.inner.grace)
            .and_then(|hold| chrono::Duration::from_std(hold).ok())
            .ok_or(Error::DurationOutOfRange(duration))?;

        let (lease, event) = {
            let mut state = self.inner.state.lock();
            let now = Utc::now();
            let expiration = now
                .checked_add_signed(hold)
                .ok_or(Error::DurationOutOfRange(duration))?;

            let resource = self
                .inner
                .resources
                .iter()
                .find(|r| is_free(&state.leases, r.id, now))
                .ok_or(Error::NoCapacity)?;

            let lease = Lease {
                token,
                resource: resource.clone(),
                expiration,
            };
            state.leases.insert(resource.id, lease.clone());

            let event = self.inner.transition(&mut state, now);
            (lease, event)
        };

        self.inner.emit(event);
        debug!(
            resource = %lease.resource.id,
            token = %lease.token,
            expiration = %lease.expiration,
            "reserved resource"
        );

        let returns = self.inner.returns.clone();
        let expired = lease.clone();
        tokio::spawn(async move {
            lease::sleep_until(expired.expiration).await;
            let _ = returns.send(expired);
        });

        Ok(lease)
    }

    /// Releases the lease iff the table still holds it under the same token.
    ///
    /// A mismatched or unknown token is stale and ignored. Returns whether an
    /// entry was removed.
    pub fn release(&self, lease: &Lease) -> bool {
        self.inner.release(lease)
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.inner.resources.iter().find(|r| r.id == id)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.inner.resources
    }

    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// Leases currently in force, in resource scan order.
    pub fn active_leases(&self) -> Vec<Lease> {
        let state = self.inner.state.lock();
        let now = Utc::now();
        self.inner
            .resources
            .iter()
            .filter_map(|r| state.leases.get(&r.id))
            .filter(|l| l.is_valid(now))
            .cloned()
            .collect()
    }

    pub fn free_count(&self) -> usize {
        let state = self.inner.state.lock();
        let now = Utc::now();
        self.inner
            .resources
            .iter()
            .filter(|r| is_free(&state.leases, r.id, now))
            .count()
    }

    pub fn has_capacity(&self) -> bool {
        self.free_count() > 0
    }
}

impl Inner {
    fn release(&self, lease: &Lease) -> bool {
        let id = lease.resource.id;
        let (released, event) = {
            let mut state = self.state.lock();
            match state.leases.get(&id) {
                Some(held) if held.token == lease.token => {
                    state.leases.remove(&id);
                    let event = self.transition(&mut state, Utc::now());
                    (true, event)
                }
                _ => (false, None),
            }
        };

        if released {
            debug!(resource = %id, token = %lease.token, "released resource");
        } else {
            debug!(resource = %id, token = %lease.token, "ignoring stale release");
        }

        self.emit(event);
        released
    }

    fn transition(&self, state: &mut State, now: DateTime<Utc>) -> Option<CapacityEvent> {
        let available = self
            .resources
            .iter()
            .any(|r| is_free(&state.leases, r.id, now));
        if available == state.available {
            return None;
        }

        state.available = available;
        state.epoch += 1;
        Some(CapacityEvent {
            epoch: state.epoch,
            available,
        })
    }

    fn emit(&self, event: Option<CapacityEvent>) {
        if let (Some(event), Some(tx)) = (event, &self.capacity_tx) {
            trace!(epoch = event.epoch, available = event.available, "capacity transition");
            let _ = tx.send(event);
        }
    }
}

fn is_free(leases: &HashMap<ResourceId, Lease>, id: ResourceId, now: DateTime<Utc>) -> bool {
    leases.get(&id).map_or(true, |l| l.is_expired(now))
}

/// Applies expiry signals through the token-guarded release path.
async fn reclaim(table: Weak<Inner>, mut returns: mpsc::UnboundedReceiver<Lease>) {
    while let Some(lease) = returns.recv().await {
        let Some(inner) = table.upgrade() else {
            break;
        };
        if inner.release(&lease) {
            debug!(resource = %lease.resource.id, "lease expired");
        }
    }
}
