//! # Recyclable Pool
//!
//! Lock-free, fixed-capacity resource pools that can be recycled as a whole
//! while readers are still using the old handles, plus the pieces a stress
//! harness builds on top of them.
//!
//! ## Features
//!
//! - Lazily filled slots with at most one winner per slot and epoch
//! - Atomic whole-pool recycle; every handle is destroyed exactly once
//! - Sync and async pools (`SlotPool`, `AsyncSlotPool`)
//! - Factory/object pool pairs with ordered teardown
//! - Open-once activation wrappers
//! - Windowed operation timeout tracking over a growable ring of slots
//! - Health monitoring and metrics
//! - Prometheus metrics export
//! - Weighted-random scenario driver
//!
//! ## Quick Start
//!
//! ```rust
//! use recyclable_pool::{Lifecycle, PoolConfiguration, SlotPool};
//!
//! let pool = SlotPool::new(
//!     PoolConfiguration::new(3).with_name("channels"),
//!     Lifecycle::new(|| Some(String::from("channel")), |_channel| Ok(())),
//! )
//! .unwrap();
//!
//! let channel = pool.acquire(0).unwrap();
//! println!("Got: {}", *channel);
//!
//! // Old handles stay usable; the pool destroys them and starts empty.
//! pool.recycle_all();
//! assert_eq!(pool.iter().count(), 0);
//! ```

mod pool;
mod slots;
mod config;
mod metrics;
mod health;
mod lifecycle;
mod factory;
mod open_once;
mod slot_list;
mod timeout;
mod stats;
mod scenario;
mod errors;

pub use pool::{SlotPool, AsyncSlotPool, Iter, RecycleOutcome, RecycleReport};
pub use config::{PoolConfiguration, TrackerConfiguration, ScenarioConfiguration, ActionWeights};
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use health::HealthStatus;
pub use lifecycle::{Lifecycle, AsyncLifecycle, DestroyFuture, FailureReporter, TracingReporter};
pub use factory::{FactoryPool, AsyncFactoryPool};
pub use open_once::{OpenOnce, AsyncOpenOnce};
pub use slot_list::{CircularSlotList, SlotListTuning};
pub use timeout::{OperationTimeoutTracker, TrackingGuard};
pub use stats::{RequestStatistics, StatisticsSnapshot};
pub use scenario::{Action, RequestToken, ScenarioDriver, ScenarioSummary, WorkloadOperations};
pub use errors::{BoxError, PoolError, PoolResult};
