//! Weighted-random stress scenarios over nested factory and object pools

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::{PoolConfiguration, ScenarioConfiguration, TrackerConfiguration};
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::factory::AsyncFactoryPool;
use crate::health::HealthStatus;
use crate::lifecycle::AsyncLifecycle;
use crate::metrics::PoolMetrics;
use crate::open_once::AsyncOpenOnce;
use crate::pool::{AsyncSlotPool, RecycleOutcome};
use crate::stats::{RequestStatistics, StatisticsSnapshot};
use crate::timeout::OperationTimeoutTracker;

/// Operations a scenario drives; supplied by the service layer under test
#[async_trait]
pub trait WorkloadOperations: Send + Sync + 'static {
    type Factory: Send + Sync + 'static;
    type Object: Send + Sync + 'static;

    fn create_factory(&self) -> Result<Self::Factory, BoxError>;

    async fn destroy_factory(&self, factory: Arc<Self::Factory>) -> Result<(), BoxError>;

    /// `None` when the factory cannot produce objects right now
    fn create_object(&self, factory: &Self::Factory) -> Option<Self::Object>;

    async fn destroy_object(&self, object: Arc<Self::Object>) -> Result<(), BoxError>;

    /// One-time activation of a fresh object
    async fn open(&self, object: Arc<Self::Object>) -> Result<(), BoxError>;

    /// Issue requests on an open object; returns how many were made
    async fn use_object(&self, object: &Self::Object) -> Result<u64, BoxError>;

    fn validate(&self, _object: &Self::Object) -> bool {
        true
    }
}

/// What a worker does on one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UseObject,
    RecycleObjects,
    RecycleFactories,
}

const ACTIONS: [Action; 3] = [Action::UseObject, Action::RecycleObjects, Action::RecycleFactories];

/// Identifies a use that is being watched for timeouts
#[derive(Debug, Clone)]
pub struct RequestToken {
    pub worker: usize,
    pub sequence: u64,
    pub started_at: Instant,
}

/// Totals of a finished run
#[derive(Debug, Clone)]
pub struct ScenarioSummary {
    pub requests: u64,
    pub failures: u64,
    pub object_recycles: u64,
    pub factory_recycles: u64,
    pub timeouts_reported: u64,
    pub statistics: StatisticsSnapshot,
    /// Outer factory pool, measured before the final dispose
    pub factories: PoolMetrics,
    pub health: HealthStatus,
}

type Channel<W> = AsyncOpenOnce<<W as WorkloadOperations>::Object>;
type Pair<W> = AsyncFactoryPool<<W as WorkloadOperations>::Factory, Channel<W>>;

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    object_recycles: AtomicU64,
    factory_recycles: AtomicU64,
    timeouts_reported: AtomicU64,
}

struct Shared<W: WorkloadOperations> {
    ops: Arc<W>,
    config: ScenarioConfiguration,
    factories: AsyncSlotPool<Pair<W>>,
    tracker: Option<OperationTimeoutTracker<RequestToken>>,
    stats: RequestStatistics,
    counters: Arc<Counters>,
}

/// Drives concurrent workers against a pool of factory/object pool pairs
///
/// Workers pick weighted-random actions until the configured duration runs
/// out: use an object (opening it once first), recycle one factory's
/// objects, or recycle every factory.
pub struct ScenarioDriver<W: WorkloadOperations> {
    shared: Arc<Shared<W>>,
}

impl<W: WorkloadOperations> ScenarioDriver<W> {
    /// Build the pools; must be called inside a Tokio runtime
    pub fn new(ops: W, config: ScenarioConfiguration) -> PoolResult<Self> {
        config.validate()?;
        let ops = Arc::new(ops);
        let counters = Arc::new(Counters::default());

        let tracker = match config.operation_timeout {
            Some(timeout) => {
                let counters = Arc::clone(&counters);
                Some(OperationTimeoutTracker::new(
                    TrackerConfiguration::new(timeout),
                    move |stuck: Vec<Arc<RequestToken>>| {
                        if stuck.is_empty() {
                            return;
                        }
                        counters.timeouts_reported.fetch_add(stuck.len() as u64, Ordering::Relaxed);
                        for token in &stuck {
                            tracing::warn!(
                                worker = token.worker,
                                sequence = token.sequence,
                                elapsed_ms = token.started_at.elapsed().as_millis() as u64,
                                "Operation exceeded its timeout"
                            );
                        }
                    },
                )?)
            }
            None => None,
        };

        let factories = AsyncSlotPool::new(
            PoolConfiguration::new(config.factory_slots).with_name("factories"),
            Self::factory_lifecycle(&ops, config.objects_per_factory),
        )?;

        Ok(Self {
            shared: Arc::new(Shared {
                ops,
                config,
                factories,
                tracker,
                stats: RequestStatistics::default(),
                counters,
            }),
        })
    }

    fn factory_lifecycle(ops: &Arc<W>, objects: usize) -> AsyncLifecycle<Pair<W>> {
        let create_ops = Arc::clone(ops);
        let create = move || {
            let destroy_factory = {
                let ops = Arc::clone(&create_ops);
                move |factory: Arc<W::Factory>| {
                    let ops = Arc::clone(&ops);
                    async move { ops.destroy_factory(factory).await }
                }
            };
            let create_object = {
                let ops = Arc::clone(&create_ops);
                move |factory: &W::Factory| {
                    ops.create_object(factory)
                        .map(|object| AsyncOpenOnce::new(Some(Arc::new(object))))
                }
            };
            let destroy_object = {
                let ops = Arc::clone(&create_ops);
                move |channel: Arc<Channel<W>>| {
                    let ops = Arc::clone(&ops);
                    async move {
                        match channel.resource() {
                            Some(object) => ops.destroy_object(Arc::clone(object)).await,
                            None => Ok(()),
                        }
                    }
                }
            };

            match AsyncFactoryPool::new(
                || create_ops.create_factory(),
                destroy_factory,
                PoolConfiguration::new(objects).with_name("objects"),
                create_object,
                destroy_object,
            ) {
                Ok(pair) => Some(pair),
                Err(err) => {
                    tracing::debug!(error = %err, "Factory unavailable");
                    None
                }
            }
        };

        // Factory first, so nothing new is derived while the objects go.
        let destroy = |pair: Arc<Pair<W>>| async move {
            let destroyed = pair.destroy().await;
            pair.objects().dispose().await;
            destroyed.map_err(|e| Box::new(e) as BoxError)
        };

        AsyncLifecycle::new(create, destroy).with_validation(|pair: &Pair<W>| !pair.is_destroyed())
    }

    /// Run every worker to the deadline, then dispose the pools
    pub async fn run(&self) -> PoolResult<ScenarioSummary> {
        let config = &self.shared.config;
        let deadline = Instant::now() + config.duration;

        let mut workers = JoinSet::new();
        for worker in 0..config.workers {
            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
                None => StdRng::from_entropy(),
            };
            workers.spawn(run_worker(Arc::clone(&self.shared), worker, rng, deadline));
        }
        while let Some(joined) = workers.join_next().await {
            joined.map_err(|e| PoolError::Workload(e.to_string()))??;
        }

        let shared = &self.shared;
        let factories = shared.factories.get_metrics();
        let health = shared.factories.get_health_status();
        shared.factories.dispose().await;

        let summary = ScenarioSummary {
            requests: shared.counters.requests.load(Ordering::Relaxed),
            failures: shared.stats.failures(),
            object_recycles: shared.counters.object_recycles.load(Ordering::Relaxed),
            factory_recycles: shared.counters.factory_recycles.load(Ordering::Relaxed),
            timeouts_reported: shared.counters.timeouts_reported.load(Ordering::Relaxed),
            statistics: shared.stats.snapshot(),
            factories,
            health,
        };
        tracing::info!(
            requests = summary.requests,
            failures = summary.failures,
            object_recycles = summary.object_recycles,
            factory_recycles = summary.factory_recycles,
            "Scenario finished"
        );
        Ok(summary)
    }

    pub fn config(&self) -> &ScenarioConfiguration {
        &self.shared.config
    }
}

async fn run_worker<W: WorkloadOperations>(
    shared: Arc<Shared<W>>,
    worker: usize,
    mut rng: StdRng,
    deadline: Instant,
) -> PoolResult<()> {
    let weights = shared.config.weights;
    let actions = WeightedIndex::new([weights.use_object, weights.recycle_objects, weights.recycle_factories])
        .map_err(|e| PoolError::InvalidConfiguration(e.to_string()))?;

    let mut sequence = 0u64;
    while Instant::now() < deadline {
        let factory = rng.gen_range(0..shared.config.factory_slots);
        match ACTIONS[actions.sample(&mut rng)] {
            Action::UseObject => {
                let object = rng.gen_range(0..shared.config.objects_per_factory);
                sequence += 1;
                let token = RequestToken {
                    worker,
                    sequence,
                    started_at: Instant::now(),
                };
                shared.use_object(factory, object, token).await;
            }
            Action::RecycleObjects => {
                if let Some(pair) = shared.factories.acquire(factory) {
                    if let RecycleOutcome::Swept(_) = pair.objects().recycle_all().await {
                        shared.counters.object_recycles.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Action::RecycleFactories => {
                if let RecycleOutcome::Swept(_) = shared.factories.recycle_all().await {
                    shared.counters.factory_recycles.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}

impl<W: WorkloadOperations> Shared<W> {
    async fn use_object(&self, factory: usize, object: usize, token: RequestToken) {
        let Some(pair) = self.factories.acquire(factory) else {
            self.stats.record_failure();
            return;
        };
        let Some(channel) = pair.objects().acquire(object) else {
            self.stats.record_failure();
            return;
        };
        let Some(resource) = channel.resource() else {
            self.stats.record_failure();
            return;
        };

        let _tracking = self
            .tracker
            .as_ref()
            .map(|tracker| tracker.start_tracking(Arc::new(token)));

        let ops = Arc::clone(&self.ops);
        if let Err(err) = channel
            .activate_once(|object| async move { ops.open(object).await })
            .await
        {
            tracing::debug!(error = %err, "Open failed");
            self.stats.record_failure();
            return;
        }

        if !self.ops.validate(resource) {
            tracing::warn!(factory, object, "Pooled object failed validation");
        }

        let started = Instant::now();
        match self.ops.use_object(resource).await {
            Ok(requests) => {
                self.counters.requests.fetch_add(requests, Ordering::Relaxed);
                self.stats.record(started.elapsed());
            }
            Err(err) => {
                tracing::debug!(error = %err, "Use failed");
                self.stats.record_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl WorkloadOperations for Echo {
        type Factory = ();
        type Object = u8;

        fn create_factory(&self) -> Result<(), BoxError> {
            Ok(())
        }

        async fn destroy_factory(&self, _factory: Arc<()>) -> Result<(), BoxError> {
            Ok(())
        }

        fn create_object(&self, _factory: &()) -> Option<u8> {
            Some(1)
        }

        async fn destroy_object(&self, _object: Arc<u8>) -> Result<(), BoxError> {
            Ok(())
        }

        async fn open(&self, _object: Arc<u8>) -> Result<(), BoxError> {
            Ok(())
        }

        async fn use_object(&self, object: &u8) -> Result<u64, BoxError> {
            Ok(u64::from(*object))
        }
    }

    #[tokio::test]
    async fn test_use_only_scenario_counts_requests() {
        let config = ScenarioConfiguration::new()
            .with_workers(2)
            .with_duration(Duration::from_millis(50))
            .with_factory_slots(1)
            .with_objects_per_factory(2)
            .with_weights(crate::config::ActionWeights {
                use_object: 1,
                recycle_objects: 0,
                recycle_factories: 0,
            })
            .with_seed(1);
        let driver = ScenarioDriver::new(Echo, config).unwrap();

        let summary = driver.run().await.unwrap();
        assert!(summary.requests > 0);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.factory_recycles, 0);
        assert_eq!(summary.statistics.requests, summary.requests);
        assert!(summary.health.is_healthy());
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let config = ScenarioConfiguration::new().with_workers(0);
        assert!(matches!(
            ScenarioDriver::new(Echo, config),
            Err(PoolError::InvalidConfiguration(_))
        ));
    }
}
