use crate::{Error, Result};
use std::time::Duration;

/// Upper bound on every protocol timing.
pub const MAX_TIMING: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Timing parameters of the leasing protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Added to every lease's requested duration before it is reclaimed.
    pub grace: Duration,
    /// Base of the fulfiller backoff; each fulfiller waits `[1, 2) × fuzz`.
    pub fuzz: Duration,
    /// How long a requester waits for a remote fulfillment.
    pub request_timeout: Duration,
    /// Bound on handing a request to the transport.
    pub publish_timeout: Duration,
    /// Interval at which a requester re-checks its response cache.
    pub poll_interval: Duration,
    /// Bound on a peer-discovery query.
    pub query_timeout: Duration,
    /// Query up to this many advertising peers before broadcasting, and skip
    /// the broadcast when none answer.
    pub capacity_probe: Option<usize>,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            fuzz: Duration::from_secs(15),
            request_timeout: Duration::from_secs(45),
            publish_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            query_timeout: Duration::from_secs(30),
            capacity_probe: None,
        }
    }
}

impl LeaseConfig {
    /// Rejects configurations under which fulfillers could still be backing
    /// off when the requester gives up.
    pub fn validate(&self) -> Result<()> {
        let timings = [
            ("grace", self.grace),
            ("fuzz", self.fuzz),
            ("request timeout", self.request_timeout),
            ("publish timeout", self.publish_timeout),
            ("poll interval", self.poll_interval),
            ("query timeout", self.query_timeout),
        ];
        for (name, value) in timings {
            if value > MAX_TIMING {
                return Err(Error::InvalidConfig(format!(
                    "{name} {value:?} exceeds the maximum of {MAX_TIMING:?}"
                )));
            }
        }

        let backoff = self.fuzz.checked_mul(2).ok_or_else(|| {
            Error::InvalidConfig(format!("backoff fuzzing time {:?} is out of range", self.fuzz))
        })?;
        if self.request_timeout < backoff {
            return Err(Error::InvalidConfig(format!(
                "request timeout {:?} does not account for backoff fuzzing time {:?}",
                self.request_timeout, backoff
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll interval must be non-zero".into()));
        }
        if self.publish_timeout.is_zero() {
            return Err(Error::InvalidConfig("publish timeout must be non-zero".into()));
        }
        if self.capacity_probe == Some(0) {
            return Err(Error::InvalidConfig(
                "capacity probe must ask for at least one peer".into(),
            ));
        }
        Ok(())
    }
}
