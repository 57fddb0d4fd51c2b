use crate::resource::{Resource, ResourceId};
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TOKEN_LENGTH: usize = 64;

/// Opaque correlation and authentication string for a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub String);

impl Token {
    /// Generates a fresh 64 character alphanumeric token.
    pub fn generate() -> Self {
        let token = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens double as release credentials, keep them out of logs.
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "{prefix}…")
    }
}

/// A time-bounded claim on exactly one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: Token,
    pub resource: Resource,
    pub expiration: DateTime<Utc>,
}

impl Lease {
    pub fn resource_id(&self) -> ResourceId {
        self.resource.id
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now <= self.expiration
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid(now)
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        until(self.expiration, now)
    }
}

/// Wall-clock distance from `now` to `deadline`, zero if already passed.
pub(crate) fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    deadline
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Sleeps until `deadline` has passed on the wall clock.
pub(crate) async fn sleep_until(deadline: DateTime<Utc>) {
    let wait = until(deadline, Utc::now());
    // Round up by a millisecond so the deadline is strictly behind us on wake.
    tokio::time::sleep(wait + Duration::from_millis(1)).await;
}
