use crate::{
    lease::{Lease, Token},
    PeerId, Result,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

pub const LEASE_REQUEST_TOPIC: &str = "GPU_REQUEST";
pub const LEASE_RESPONSE_TOPIC: &str = "GPU_FULFILLMENT";
pub const LEASE_RELEASE_TOPIC: &str = "GPU_RELEASE";
pub const DISCOVERY_TOPIC: &str = "GPU_DISCOVERY";

/// Broadcast by a node whose own table is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub requestor: PeerId,
    /// Correlation id chosen by the requestor, unique per outstanding request.
    pub token: Token,
    pub duration: Duration,
}

/// A grant made by some fulfiller on behalf of `requestor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub requestor: PeerId,
    pub lease: Lease,
}

impl LeaseResponse {
    pub fn token(&self) -> &Token {
        &self.lease.token
    }
}

/// Early return of a lease to the node owning its resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRelease {
    pub lease: Lease,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}
