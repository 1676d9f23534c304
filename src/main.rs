// Recyclable Pool - stress scenario demo
// Runs a short in-memory scenario against nested factory/object pools

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use recyclable_pool::{BoxError, ScenarioConfiguration, ScenarioDriver, WorkloadOperations};
use tracing_subscriber::EnvFilter;

/// Stand-in for a connection factory
struct Endpoint {
    id: u64,
}

/// Stand-in for a channel derived from an endpoint
struct Channel {
    endpoint: u64,
    opened: AtomicBool,
    calls: AtomicU64,
}

#[derive(Default)]
struct SimulatedWorkload {
    endpoints: AtomicU64,
    live_endpoints: AtomicU64,
    live_channels: AtomicU64,
}

#[async_trait]
impl WorkloadOperations for SimulatedWorkload {
    type Factory = Endpoint;
    type Object = Channel;

    fn create_factory(&self) -> Result<Endpoint, BoxError> {
        self.live_endpoints.fetch_add(1, Ordering::Relaxed);
        Ok(Endpoint {
            id: self.endpoints.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn destroy_factory(&self, _endpoint: Arc<Endpoint>) -> Result<(), BoxError> {
        self.live_endpoints.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn create_object(&self, endpoint: &Endpoint) -> Option<Channel> {
        self.live_channels.fetch_add(1, Ordering::Relaxed);
        Some(Channel {
            endpoint: endpoint.id,
            opened: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        })
    }

    async fn destroy_object(&self, _channel: Arc<Channel>) -> Result<(), BoxError> {
        self.live_channels.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    async fn open(&self, channel: Arc<Channel>) -> Result<(), BoxError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        channel.opened.store(true, Ordering::Release);
        Ok(())
    }

    async fn use_object(&self, channel: &Channel) -> Result<u64, BoxError> {
        let call = channel.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(Duration::from_micros(200)).await;
        if call % 101 == 0 {
            return Err(format!("endpoint {} dropped call {call}", channel.endpoint).into());
        }
        Ok(1)
    }

    fn validate(&self, channel: &Channel) -> bool {
        channel.opened.load(Ordering::Acquire)
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Recyclable Pool - Stress Scenario ===");

    let config = ScenarioConfiguration::new()
        .with_workers(8)
        .with_duration(Duration::from_secs(2))
        .with_operation_timeout(Some(Duration::from_millis(500)));
    let driver = ScenarioDriver::new(SimulatedWorkload::default(), config)?;
    let summary = driver.run().await?;

    println!();
    println!("Requests:          {}", summary.requests);
    println!("Failures:          {}", summary.failures);
    println!("Object recycles:   {}", summary.object_recycles);
    println!("Factory recycles:  {}", summary.factory_recycles);
    println!("Timeouts reported: {}", summary.timeouts_reported);
    println!(
        "Latency p50/p90/p99/max: {:?} / {:?} / {:?} / {:?}",
        summary.statistics.p50, summary.statistics.p90, summary.statistics.p99, summary.statistics.max
    );
    println!(
        "Factories: created={} destroyed={} race_losses={} healthy={}",
        summary.factories.created,
        summary.factories.destroyed,
        summary.factories.race_losses,
        summary.health.is_healthy()
    );

    Ok(())
}
