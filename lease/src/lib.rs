#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

//! Distributed GPU leasing.
//!
//! A node owns a [`LeaseTable`] over its local accelerators. When the table is
//! exhausted, the [`Allocator`] broadcasts a [`LeaseRequest`] and waits for
//! some other node's [`RemoteFulfiller`] to grant a lease on its behalf.
//! [`CapacityAnnouncer`] advertises free capacity through peer discovery so
//! requesters can find candidate fulfillers.

pub mod allocator;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod lease;
pub mod memory;
pub mod message;
pub mod node;
pub mod pubsub;
pub mod remote;
pub mod resource;
pub mod table;

pub mod test_utils;

pub use allocator::Allocator;
pub use cache::ResponseCache;
pub use config::LeaseConfig;
pub use discovery::{CapacityAnnouncer, Discovery, Peer, Topic};
pub use error::{Error, Result};
pub use gossip::GossipDiscovery;
pub use lease::{Lease, Token};
pub use memory::InMemoryBus;
pub use message::{LeaseRelease, LeaseRequest, LeaseResponse};
pub use node::{Governor, GovernorStatus};
pub use pubsub::PubSub;
pub use remote::RemoteFulfiller;
pub use resource::{DeviceInventory, Resource, ResourceId};
pub use table::{CapacityEvent, LeaseTable};

use serde::{Deserialize, Serialize};

/// Identity of a node on the leasing network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::random()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
