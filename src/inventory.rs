use std::collections::HashSet;
use std::path::{Path, PathBuf};

use governor_lease::{resource::StaticInventory, DeviceInventory, Resource};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One device as listed in an inventory file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// kHz
    #[serde(default)]
    pub clock_rate: u32,
    #[serde(default)]
    pub memory_bytes: u64,
}

/// Inventory read from a JSON array of [`DeviceEntry`].
///
/// The file is re-read on every listing. An unreadable or malformed file
/// lists no devices; repeated ids keep their first entry.
#[derive(Debug, Clone)]
pub struct JsonInventory {
    path: PathBuf,
}

impl JsonInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> anyhow::Result<Vec<DeviceEntry>> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl DeviceInventory for JsonInventory {
    fn list_resources(&self, host: &str) -> Vec<Resource> {
        let entries = match self.read() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read device inventory");
                return Vec::new();
            }
        };
        debug!(path = %self.path.display(), devices = entries.len(), "loaded device inventory");

        let mut seen = HashSet::new();
        entries
            .into_iter()
            .filter(|d| {
                let fresh = seen.insert(d.id);
                if !fresh {
                    warn!(id = d.id, "skipping duplicate device id");
                }
                fresh
            })
            .map(|d| {
                Resource::new(host, d.id)
                    .with_name(d.name)
                    .with_clock_rate(d.clock_rate)
                    .with_memory(d.memory_bytes)
            })
            .collect()
    }
}

/// The inventory for a node: the file at `path`, or no devices at all.
pub fn load(path: Option<&Path>) -> Box<dyn DeviceInventory> {
    match path {
        Some(path) => Box::new(JsonInventory::new(path)),
        None => Box::new(StaticInventory::default()),
    }
}
