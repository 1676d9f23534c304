//! End-to-end scenario runs against an in-memory workload.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use recyclable_pool::{ActionWeights, BoxError, ScenarioConfiguration, ScenarioDriver, WorkloadOperations};

#[derive(Default)]
struct Ledger {
    factories_created: AtomicU64,
    live_factories: AtomicI64,
    live_objects: AtomicI64,
    opens: AtomicU64,
}

struct CountingWorkload {
    ledger: Arc<Ledger>,
    factories_available: bool,
}

#[async_trait]
impl WorkloadOperations for CountingWorkload {
    type Factory = u64;
    type Object = AtomicU64;

    fn create_factory(&self) -> Result<u64, BoxError> {
        if !self.factories_available {
            return Err("no endpoint".into());
        }
        self.ledger.live_factories.fetch_add(1, Ordering::SeqCst);
        Ok(self.ledger.factories_created.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy_factory(&self, _factory: Arc<u64>) -> Result<(), BoxError> {
        tokio::task::yield_now().await;
        self.ledger.live_factories.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_object(&self, _factory: &u64) -> Option<AtomicU64> {
        self.ledger.live_objects.fetch_add(1, Ordering::SeqCst);
        Some(AtomicU64::new(0))
    }

    async fn destroy_object(&self, _object: Arc<AtomicU64>) -> Result<(), BoxError> {
        self.ledger.live_objects.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open(&self, _object: Arc<AtomicU64>) -> Result<(), BoxError> {
        self.ledger.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(())
    }

    async fn use_object(&self, object: &AtomicU64) -> Result<u64, BoxError> {
        object.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
        Ok(1)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recycling_scenario_releases_everything() {
    let ledger = Arc::new(Ledger::default());
    let config = ScenarioConfiguration::new()
        .with_workers(8)
        .with_duration(Duration::from_millis(300))
        .with_factory_slots(3)
        .with_objects_per_factory(4)
        .with_weights(ActionWeights {
            use_object: 100,
            recycle_objects: 10,
            recycle_factories: 5,
        })
        .with_operation_timeout(Some(Duration::from_secs(5)))
        .with_seed(42);
    let driver = ScenarioDriver::new(
        CountingWorkload {
            ledger: Arc::clone(&ledger),
            factories_available: true,
        },
        config,
    )
    .unwrap();

    let summary = driver.run().await.unwrap();
    assert!(summary.requests > 0);
    assert!(summary.object_recycles + summary.factory_recycles > 0);
    assert_eq!(summary.timeouts_reported, 0);
    assert!(summary.factories.created >= 1);
    assert!(ledger.opens.load(Ordering::SeqCst) >= 1);

    // Race losers are destroyed on detached tasks; let them drain.
    for _ in 0..1000 {
        if ledger.live_factories.load(Ordering::SeqCst) == 0 && ledger.live_objects.load(Ordering::SeqCst) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(ledger.live_factories.load(Ordering::SeqCst), 0);
    assert_eq!(ledger.live_objects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unavailable_factories_count_as_failures() {
    let config = ScenarioConfiguration::new()
        .with_workers(2)
        .with_duration(Duration::from_millis(50))
        .with_factory_slots(2)
        .with_objects_per_factory(2)
        .with_operation_timeout(None)
        .with_seed(3);
    let driver = ScenarioDriver::new(
        CountingWorkload {
            ledger: Arc::new(Ledger::default()),
            factories_available: false,
        },
        config,
    )
    .unwrap();

    let summary = driver.run().await.unwrap();
    assert_eq!(summary.requests, 0);
    assert!(summary.failures > 0);
    assert_eq!(summary.factories.created, 0);
    assert!(summary.factories.creation_absent > 0);
}
