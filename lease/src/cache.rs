use crate::{
    lease::{self, Token},
    message::LeaseResponse,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Token-keyed cache of fulfillments, each evicted once its lease expires.
///
/// The first response recorded for a token wins; later responses for the same
/// token are discarded until the entry is evicted.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: &'static str,
    entries: Mutex<HashMap<Token, LeaseResponse>>,
    evictions: mpsc::UnboundedSender<LeaseResponse>,
}

impl ResponseCache {
    /// Must be called from within a Tokio runtime.
    pub fn new(name: &'static str) -> Self {
        let (evictions, evictions_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            name,
            entries: Mutex::new(HashMap::new()),
            evictions,
        });

        tokio::spawn(clean(Arc::downgrade(&inner), evictions_rx));

        Self { inner }
    }

    /// Records `response` unless its token is already present.
    ///
    /// Returns `true` if the response was recorded.
    pub fn insert(&self, response: LeaseResponse) -> bool {
        let token = response.token().clone();
        self.insert_with(&token, || Some(response)).is_some()
    }

    /// Records the response built by `grant` unless `token` is already
    /// present.
    ///
    /// The presence check and `grant` run under the cache lock, so concurrent
    /// callers for one token run `grant` at most once between evictions.
    pub fn insert_with<F>(&self, token: &Token, grant: F) -> Option<LeaseResponse>
    where
        F: FnOnce() -> Option<LeaseResponse>,
    {
        let response = {
            let mut entries = self.inner.entries.lock();
            if entries.contains_key(token) {
                debug!(cache = self.inner.name, %token, "discarding duplicate fulfillment");
                return None;
            }
            let response = grant()?;
            debug_assert_eq!(response.token(), token);
            entries.insert(token.clone(), response.clone());
            response
        };

        let evictions = self.inner.evictions.clone();
        let scheduled = response.clone();
        tokio::spawn(async move {
            lease::sleep_until(scheduled.lease.expiration).await;
            let _ = evictions.send(scheduled);
        });

        Some(response)
    }

    pub fn get(&self, token: &Token) -> Option<LeaseResponse> {
        self.inner.entries.lock().get(token).cloned()
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.inner.entries.lock().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn clean(cache: Weak<Inner>, mut evictions: mpsc::UnboundedReceiver<LeaseResponse>) {
    while let Some(response) = evictions.recv().await {
        let Some(inner) = cache.upgrade() else {
            break;
        };

        let mut entries = inner.entries.lock();
        // Only evict the exact grant this timer was scheduled for.
        if entries.get(response.token()) == Some(&response) {
            entries.remove(response.token());
            trace!(cache = inner.name, token = %response.token(), "evicted fulfillment");
        }
    }
}
