use governor_lease::{
    test_utils::{create_test_cluster, fast_config, LatencyMeasurement},
    Error, LeaseConfig, PeerId,
};
use std::time::Duration;

fn probing_config() -> LeaseConfig {
    LeaseConfig {
        capacity_probe: Some(4),
        ..fast_config()
    }
}

/// Lets capacity events reach the announcer.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_candidates_follow_free_capacity() {
    let (nodes, _bus) = create_test_cluster(&[0, 1], fast_config());
    let (a, b) = (&nodes[0], &nodes[1]);
    settle().await;

    let peers = a.candidates(8).await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, PeerId::new("node-1"));
    assert_eq!(peers[0].addr, "node-1:4000");

    let lease = b.lease(Duration::from_secs(30)).await.unwrap();
    settle().await;
    assert!(a.candidates(8).await.is_empty());

    assert!(b.release(&lease).await.unwrap());
    settle().await;
    assert_eq!(a.candidates(8).await.len(), 1);
}

#[tokio::test]
async fn test_candidates_reappear_after_expiry() {
    let (nodes, _bus) = create_test_cluster(&[0, 1], fast_config());
    let (a, b) = (&nodes[0], &nodes[1]);
    settle().await;

    b.lease(Duration::from_millis(100)).await.unwrap();
    settle().await;
    assert!(a.candidates(8).await.is_empty());

    // Duration plus grace, with room for the reclaimer.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.candidates(8).await.len(), 1);
}

#[tokio::test]
async fn test_probe_fails_fast_without_advertisers() {
    let config = probing_config();
    let (nodes, _bus) = create_test_cluster(&[0, 0], config.clone());
    settle().await;

    let mut measurement = LatencyMeasurement::start("probed_lease");
    let result = nodes[0].lease(Duration::from_secs(1)).await;
    measurement.stop();

    assert!(matches!(result, Err(Error::NoRemoteFulfillment)));
    measurement.assert_within(config.query_timeout + Duration::from_millis(100));
    assert!(measurement.latency_ms < config.request_timeout.as_millis());
}

#[tokio::test]
async fn test_probe_proceeds_when_a_peer_advertises() {
    let (nodes, _bus) = create_test_cluster(&[0, 1], probing_config());
    settle().await;

    let lease = nodes[0].lease(Duration::from_secs(1)).await.unwrap();
    assert_eq!(lease.resource.host, "node-1:4000");
}

#[tokio::test]
async fn test_status_reports_table_state() {
    let (nodes, _bus) = create_test_cluster(&[2], fast_config());
    let node = &nodes[0];

    let lease = node.lease(Duration::from_secs(30)).await.unwrap();
    let status = node.status();
    assert_eq!(status.id, PeerId::new("node-0"));
    assert_eq!(status.resources, 2);
    assert_eq!(status.free, 1);
    assert_eq!(status.active_leases, vec![lease]);
    assert_eq!(status.pending_responses, 0);
}
