use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use governor_lease::{LeaseConfig, PeerId};
use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

/// Node configuration as read from disk. Absent fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Random per process when unset.
    pub node_id: Option<String>,
    /// UDP bind address for protocol traffic.
    pub listen: SocketAddr,
    /// Address stamped on local resources; defaults to `listen`.
    pub advertise: Option<String>,
    pub api: SocketAddr,
    pub peers: Vec<SocketAddr>,
    pub inventory: Option<PathBuf>,
    pub lease: LeaseTimings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            listen: SocketAddr::from(([0, 0, 0, 0], 4000)),
            advertise: None,
            api: SocketAddr::from(([127, 0, 0, 1], 7000)),
            peers: Vec::new(),
            inventory: None,
            lease: LeaseTimings::default(),
        }
    }
}

/// Protocol timings in file-friendly units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseTimings {
    pub grace_secs: u64,
    pub fuzz_secs: u64,
    pub request_timeout_secs: u64,
    pub publish_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub query_timeout_secs: u64,
    pub capacity_probe: Option<usize>,
}

impl Default for LeaseTimings {
    fn default() -> Self {
        LeaseConfig::default().into()
    }
}

impl From<LeaseConfig> for LeaseTimings {
    fn from(c: LeaseConfig) -> Self {
        Self {
            grace_secs: c.grace.as_secs(),
            fuzz_secs: c.fuzz.as_secs(),
            request_timeout_secs: c.request_timeout.as_secs(),
            publish_timeout_ms: c.publish_timeout.as_millis() as u64,
            poll_interval_ms: c.poll_interval.as_millis() as u64,
            query_timeout_secs: c.query_timeout.as_secs(),
            capacity_probe: c.capacity_probe,
        }
    }
}

impl From<&LeaseTimings> for LeaseConfig {
    fn from(t: &LeaseTimings) -> Self {
        Self {
            grace: Duration::from_secs(t.grace_secs),
            fuzz: Duration::from_secs(t.fuzz_secs),
            request_timeout: Duration::from_secs(t.request_timeout_secs),
            publish_timeout: Duration::from_millis(t.publish_timeout_ms),
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            query_timeout: Duration::from_secs(t.query_timeout_secs),
            capacity_probe: t.capacity_probe,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Loads `path` if given, otherwise starts from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn with_overrides(mut self, args: &RunArgs) -> Self {
        if let Some(id) = &args.node_id {
            self.node_id = Some(id.clone());
        }
        if let Some(listen) = args.listen {
            self.listen = listen;
        }
        if let Some(advertise) = &args.advertise {
            self.advertise = Some(advertise.clone());
        }
        if let Some(api) = args.api {
            self.api = api;
        }
        if !args.peers.is_empty() {
            self.peers = args.peers.clone();
        }
        if let Some(inventory) = &args.inventory {
            self.inventory = Some(inventory.clone());
        }
        self
    }

    pub fn peer_id(&self) -> PeerId {
        self.node_id.clone().map_or_else(PeerId::random, PeerId::new)
    }

    pub fn host(&self) -> String {
        self.advertise.clone().unwrap_or_else(|| self.listen.to_string())
    }

    pub fn lease_config(&self) -> LeaseConfig {
        (&self.lease).into()
    }
}
