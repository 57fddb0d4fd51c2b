use governor_lease::{
    message::{LeaseRequest, LEASE_REQUEST_TOPIC},
    pubsub,
    test_utils::{create_test_cluster, fast_config, gpus, LatencyMeasurement},
    Allocator, Error, InMemoryBus, LeaseConfig, LeaseTable, PeerId, RemoteFulfiller, Token,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_exhausted_node_borrows_from_peer() {
    let config = fast_config();
    let (nodes, _bus) = create_test_cluster(&[0, 1], config.clone());
    let (a, b) = (&nodes[0], &nodes[1]);

    let mut measurement = LatencyMeasurement::start("remote_lease");
    let lease = a.lease(Duration::from_secs(1)).await.unwrap();
    measurement.stop();
    measurement.assert_within(config.publish_timeout + config.request_timeout);

    assert_eq!(lease.resource.host, b.host());
    assert_eq!(lease.resource.id.0, 0);

    // Both ends hold the grant under the token A broadcast.
    let granted = b.table().active_leases();
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].token, lease.token);
    assert_eq!(a.status().pending_responses, 1);
}

#[tokio::test]
async fn test_no_fulfiller_times_out() {
    let config = fast_config();
    let (nodes, _bus) = create_test_cluster(&[0, 0], config.clone());

    let mut measurement = LatencyMeasurement::start("unfulfilled_lease");
    let result = nodes[0].lease(Duration::from_secs(1)).await;
    measurement.stop();

    assert!(matches!(result, Err(Error::NoRemoteFulfillment)));
    assert!(measurement.latency_ms >= config.request_timeout.as_millis());
}

#[tokio::test]
async fn test_node_never_fulfils_its_own_request() {
    let (nodes, bus) = create_test_cluster(&[1], fast_config());
    let node = &nodes[0];

    let own = LeaseRequest {
        requestor: node.id().clone(),
        token: Token::generate(),
        duration: Duration::from_secs(1),
    };
    pubsub::publish(&bus, LEASE_REQUEST_TOPIC, &own).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node.table().free_count(), 1);
}

#[tokio::test]
async fn test_oversized_remote_request_is_refused() {
    let (nodes, bus) = create_test_cluster(&[1], fast_config());
    let node = &nodes[0];

    for duration in [Duration::MAX, Duration::from_secs(10_000_000_000_000)] {
        let request = LeaseRequest {
            requestor: PeerId::new("remote"),
            token: Token::generate(),
            duration,
        };
        pubsub::publish(&bus, LEASE_REQUEST_TOPIC, &request).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node.table().free_count(), 1);

    // The request listener is still serving.
    let ordinary = LeaseRequest {
        requestor: PeerId::new("remote"),
        token: Token::generate(),
        duration: Duration::from_secs(1),
    };
    pubsub::publish(&bus, LEASE_REQUEST_TOPIC, &ordinary).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node.table().active_leases()[0].token, ordinary.token);
}

#[tokio::test]
async fn test_oversized_lease_fails_before_broadcast() {
    let (nodes, _bus) = create_test_cluster(&[0, 1], fast_config());

    let mut measurement = LatencyMeasurement::start("oversized_lease");
    let result = nodes[0].lease(Duration::MAX).await;
    measurement.stop();

    assert!(matches!(result, Err(Error::DurationOutOfRange(_))));
    measurement.assert_within(Duration::from_millis(100));
    assert_eq!(nodes[1].table().free_count(), 1);
}

#[tokio::test]
async fn test_duplicate_grants_accepted_once_and_both_expire() {
    let grace = Duration::from_millis(50);
    let left = LeaseTable::new(gpus("left:4000", 1), grace);
    let right = LeaseTable::new(gpus("right:4000", 1), grace);
    let left_fulfiller = RemoteFulfiller::new(left.clone(), Duration::ZERO);
    let right_fulfiller = RemoteFulfiller::new(right.clone(), Duration::ZERO);

    let requester = PeerId::new("requester");
    let allocator = Allocator::new(
        requester.clone(),
        LeaseTable::new(Vec::new(), grace),
        Arc::new(InMemoryBus::new()),
        fast_config(),
    );

    let request = LeaseRequest {
        requestor: requester,
        token: Token::generate(),
        duration: Duration::from_millis(150),
    };

    // Neither fulfiller has heard of the other's grant yet.
    let first = left_fulfiller.try_fulfil(&request).unwrap();
    let second = right_fulfiller.try_fulfil(&request).unwrap();

    assert!(allocator.accept(first.clone()));
    assert!(!allocator.accept(second));

    let lease = allocator.request_remote(&request).await.unwrap();
    assert_eq!(lease, first.lease);
    assert_eq!(allocator.responses().len(), 1);

    // The wasted grant is reclaimed by its own expiry.
    assert_eq!(right.free_count(), 0);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(left.free_count(), 1);
    assert_eq!(right.free_count(), 1);
    assert!(allocator.responses().is_empty());
}

#[tokio::test]
async fn test_competing_fulfillers_serve_one_request() {
    let (nodes, _bus) = create_test_cluster(&[0, 1, 1, 1], fast_config());

    let lease = nodes[0].lease(Duration::from_millis(200)).await.unwrap();
    let winner = nodes
        .iter()
        .find(|n| n.host() == lease.resource.host)
        .unwrap();
    assert!(winner
        .table()
        .active_leases()
        .iter()
        .any(|l| l.token == lease.token));

    // Every fulfiller has finished backing off by now.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let granted: usize = nodes[1..]
        .iter()
        .map(|n| n.table().active_leases().len())
        .sum();
    assert!((1..=3).contains(&granted));

    // Losers heard the winner's response as ambient traffic.
    for node in &nodes[1..] {
        assert!(node.status().observed_fulfillments >= 1);
    }
}

#[tokio::test]
async fn test_remote_release_frees_owner() {
    let (nodes, _bus) = create_test_cluster(&[0, 1], fast_config());
    let (a, b) = (&nodes[0], &nodes[1]);

    let lease = a.lease(Duration::from_secs(30)).await.unwrap();
    assert_eq!(b.table().free_count(), 0);

    let mut forged = lease.clone();
    forged.token = Token::from("forged");
    assert!(!a.release(&forged).await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(b.table().free_count(), 0);

    assert!(!a.release(&lease).await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(b.table().free_count(), 1);
}

#[tokio::test]
async fn test_local_release_is_immediate() {
    let (nodes, _bus) = create_test_cluster(&[1], fast_config());
    let node = &nodes[0];

    let lease = node.lease(Duration::from_secs(30)).await.unwrap();
    assert_eq!(lease.resource.host, node.host());
    assert!(node.release(&lease).await.unwrap());
    assert_eq!(node.table().free_count(), 1);
}

#[tokio::test]
async fn test_invalid_config_rejected_at_construction() {
    let config = LeaseConfig {
        fuzz: Duration::from_secs(15),
        request_timeout: Duration::from_secs(20),
        ..LeaseConfig::default()
    };
    let bus = InMemoryBus::new();
    let discovery = governor_lease::GossipDiscovery::new(
        governor_lease::Peer {
            id: PeerId::new("n"),
            addr: "n:4000".into(),
        },
        Arc::new(bus.clone()),
    );

    let result = governor_lease::Governor::new(
        PeerId::new("n"),
        "n:4000",
        Vec::new(),
        Arc::new(bus),
        discovery,
        config,
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
