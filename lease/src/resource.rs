use serde::{Deserialize, Serialize};

/// Device index of a resource, unique within its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u32);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A leasable accelerator.
///
/// Resources are handed to the leasing layer once at startup and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Network address of the owning node.
    pub host: String,
    pub id: ResourceId,
    pub name: String,
    /// Core clock rate in kHz, as reported by the driver.
    pub clock_rate: u32,
    pub memory_bytes: u64,
}

impl Resource {
    pub fn new(host: impl Into<String>, id: u32) -> Self {
        Self {
            host: host.into(),
            id: ResourceId(id),
            name: String::new(),
            clock_rate: 0,
            memory_bytes: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = clock_rate;
        self
    }

    pub fn with_memory(mut self, memory_bytes: u64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }
}

/// Enumerates the accelerators physically attached to a host.
///
/// Implementations report failures by returning an empty list; a node without
/// devices still participates in the network as a pure requester.
pub trait DeviceInventory: Send + Sync {
    fn list_resources(&self, host: &str) -> Vec<Resource>;
}

/// Inventory backed by a fixed list, stamped with the requesting host.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    resources: Vec<Resource>,
}

impl StaticInventory {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }
}

impl DeviceInventory for StaticInventory {
    fn list_resources(&self, host: &str) -> Vec<Resource> {
        self.resources
            .iter()
            .cloned()
            .map(|mut r| {
                r.host = host.to_string();
                r
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_inventory_stamps_host() {
        let inventory = StaticInventory::new(vec![
            Resource::new("", 0).with_name("A100"),
            Resource::new("elsewhere", 1).with_memory(80 << 30),
        ]);

        let listed = inventory.list_resources("10.0.0.7:4000");
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.host == "10.0.0.7:4000"));
        assert_eq!(listed[0].name, "A100");
        assert_eq!(listed[1].memory_bytes, 80 << 30);
    }
}
