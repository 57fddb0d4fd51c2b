use governor_lease::{
    test_utils::gpus, Error, Lease, LeaseTable, Resource, ResourceId, Token,
};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Barrier;
use std::sync::Arc;

#[tokio::test]
async fn test_single_gpu_reserve_twice() {
    let table = LeaseTable::new(vec![Resource::new("local", 100)], Duration::from_secs(60));

    let lease = table.reserve(Duration::from_secs(60)).unwrap();
    assert_eq!(lease.resource_id(), ResourceId(100));

    let second = table.reserve(Duration::from_secs(60));
    assert!(matches!(second, Err(Error::NoCapacity)));
}

#[tokio::test]
async fn test_reuse_after_expiration() {
    let table = LeaseTable::new(vec![Resource::new("local", 100)], Duration::ZERO);

    let first = table.reserve(Duration::from_secs(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let second = table.reserve(Duration::from_secs(1)).unwrap();
    assert_eq!(second.resource_id(), ResourceId(100));
    assert_ne!(second.token, first.token);
}

#[tokio::test]
async fn test_wrong_token_release_is_noop() {
    let table = LeaseTable::new(vec![Resource::new("local", 100)], Duration::ZERO);
    let held = table.reserve(Duration::from_secs(60)).unwrap();

    let forged = Lease {
        token: Token::from("wrong"),
        ..held.clone()
    };
    assert!(!table.release(&forged));
    assert_eq!(table.active_leases(), vec![held.clone()]);

    assert!(table.release(&held));
    assert!(table.reserve(Duration::from_secs(60)).is_ok());
}

#[tokio::test]
async fn test_n_plus_one_reservations() {
    let table = LeaseTable::new(gpus("local", 3), Duration::ZERO);
    for _ in 0..3 {
        table.reserve(Duration::from_secs(60)).unwrap();
    }
    assert!(matches!(
        table.reserve(Duration::from_secs(60)),
        Err(Error::NoCapacity)
    ));
    assert_eq!(table.free_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mutual_exclusion_under_contention() {
    const GPUS: u32 = 5;
    const CALLERS: usize = 64;

    let table = LeaseTable::new(gpus("local", GPUS), Duration::ZERO);
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let table = table.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                // Short leases churn through expiry while others contend.
                let duration = Duration::from_millis(if i % 2 == 0 { 20 } else { 60_000 });
                table.reserve(duration).ok()
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
        let active = table.active_leases();
        assert!(active.len() <= GPUS as usize);
        let ids: HashSet<_> = active.iter().map(Lease::resource_id).collect();
        assert_eq!(ids.len(), active.len());
    }
}

#[tokio::test]
async fn test_get_is_pure_lookup() {
    let table = LeaseTable::new(gpus("local", 2), Duration::ZERO);
    assert_eq!(table.get(ResourceId(1)).unwrap().name, "test-gpu-1");
    assert!(table.get(ResourceId(9)).is_none());
    assert_eq!(table.free_count(), 2);
}
