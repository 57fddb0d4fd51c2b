use crate::{
    config::LeaseConfig,
    discovery::Peer,
    gossip::GossipDiscovery,
    memory::InMemoryBus,
    node::Governor,
    resource::Resource,
    PeerId,
};
use std::{sync::Arc, time::Duration};

/// Protocol timings scaled down for in-process clusters.
pub fn fast_config() -> LeaseConfig {
    LeaseConfig {
        grace: Duration::from_millis(100),
        fuzz: Duration::from_millis(50),
        request_timeout: Duration::from_millis(1000),
        publish_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        query_timeout: Duration::from_millis(200),
        capacity_probe: None,
    }
}

/// Resources for a host named `host` with device ids `0..count`.
pub fn gpus(host: &str, count: u32) -> Vec<Resource> {
    (0..count)
        .map(|id| {
            Resource::new(host, id)
                .with_name(format!("test-gpu-{id}"))
                .with_clock_rate(1_410_000)
                .with_memory(40 << 30)
        })
        .collect()
}

/// Starts one governor per entry of `capacities` on a shared in-memory bus.
///
/// Node `i` is named `node-i`, listens on host `node-i:4000` and owns
/// `capacities[i]` resources.
pub fn create_test_cluster(
    capacities: &[u32],
    config: LeaseConfig,
) -> (Vec<Arc<Governor>>, InMemoryBus) {
    let bus = InMemoryBus::new();
    let nodes = capacities
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let id = PeerId::new(format!("node-{i}"));
            let host = format!("node-{i}:4000");

            let discovery = GossipDiscovery::new(
                Peer {
                    id: id.clone(),
                    addr: host.clone(),
                },
                Arc::new(bus.clone()),
            );
            discovery.start().expect("in-memory subscribe cannot fail");

            let node = Governor::new(
                id,
                host.clone(),
                gpus(&host, count),
                Arc::new(bus.clone()),
                discovery,
                config.clone(),
            )
            .expect("test config must be valid");
            node.start().expect("in-memory subscribe cannot fail");
            Arc::new(node)
        })
        .collect();

    (nodes, bus)
}

#[derive(Debug)]
pub struct LatencyMeasurement {
    pub operation: String,
    pub start_time: std::time::Instant,
    pub end_time: std::time::Instant,
    pub latency_ms: u128,
}

impl LatencyMeasurement {
    pub fn start(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start_time: std::time::Instant::now(),
            end_time: std::time::Instant::now(),
            latency_ms: 0,
        }
    }

    pub fn stop(&mut self) {
        self.end_time = std::time::Instant::now();
        self.latency_ms = self.end_time.duration_since(self.start_time).as_millis();
    }

    pub fn assert_within(&self, budget: Duration) {
        assert!(
            self.latency_ms <= budget.as_millis(),
            "{} took {}ms, expected <= {}ms",
            self.operation,
            self.latency_ms,
            budget.as_millis()
        );
    }
}
