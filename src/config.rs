//! Pool, tracker and scenario configuration

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::lifecycle::{FailureReporter, TracingReporter};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a slot pool
///
/// # Examples
///
/// ```
/// use recyclable_pool::PoolConfiguration;
///
/// let config = PoolConfiguration::new(16).with_name("channels");
///
/// assert_eq!(config.capacity, 16);
/// assert_eq!(config.name, "channels");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Number of slots; fixed for the lifetime of the pool
    pub capacity: usize,

    /// Name used in log fields and metric labels
    pub name: String,

    /// Receives destroy failures the pool swallows
    pub reporter: Arc<dyn FailureReporter>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            capacity: 16,
            name: "pool".to_string(),
            reporter: Arc::new(TracingReporter::default()),
        }
    }
}

impl PoolConfiguration {
    /// Create a configuration with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the failure reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidConfiguration(
                "capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for an operation timeout tracker
///
/// # Examples
///
/// ```
/// use recyclable_pool::TrackerConfiguration;
/// use std::time::Duration;
///
/// let config = TrackerConfiguration::new(Duration::from_secs(5))
///     .with_slot_baseline(64)
///     .with_slot_ceiling(4096);
///
/// assert_eq!(config.timeout, Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackerConfiguration {
    /// Expected upper bound of a single operation
    pub timeout: Duration,

    /// Initial slot-list capacity of a window
    pub slot_baseline: usize,

    /// Hard limit on slot-list capacity
    pub slot_ceiling: usize,
}

impl Default for TrackerConfiguration {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            slot_baseline: 256,
            slot_ceiling: 1 << 20,
        }
    }
}

impl TrackerConfiguration {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_slot_baseline(mut self, baseline: usize) -> Self {
        self.slot_baseline = baseline;
        self
    }

    pub fn with_slot_ceiling(mut self, ceiling: usize) -> Self {
        self.slot_ceiling = ceiling;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.timeout.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.slot_baseline == 0 {
            return Err(PoolError::InvalidConfiguration(
                "slot_baseline must be greater than 0".to_string(),
            ));
        }
        if self.slot_baseline > self.slot_ceiling {
            return Err(PoolError::InvalidConfiguration(format!(
                "slot_baseline ({}) must not exceed slot_ceiling ({})",
                self.slot_baseline, self.slot_ceiling
            )));
        }
        Ok(())
    }
}

/// Relative weights of the actions a scenario worker picks from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActionWeights {
    pub use_object: u32,
    pub recycle_objects: u32,
    pub recycle_factories: u32,
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            use_object: 1000,
            recycle_objects: 10,
            recycle_factories: 1,
        }
    }
}

/// Configuration for a stress scenario run
///
/// # Examples
///
/// ```
/// use recyclable_pool::ScenarioConfiguration;
/// use std::time::Duration;
///
/// let config = ScenarioConfiguration::new()
///     .with_workers(4)
///     .with_duration(Duration::from_millis(200))
///     .with_seed(7);
///
/// assert_eq!(config.workers, 4);
/// assert_eq!(config.seed, Some(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScenarioConfiguration {
    /// Number of concurrent worker tasks
    pub workers: usize,

    /// How long workers keep issuing actions
    pub duration: Duration,

    /// Capacity of the outer pool of factories
    pub factory_slots: usize,

    /// Capacity of each factory's nested object pool
    pub objects_per_factory: usize,

    pub weights: ActionWeights,

    /// Report uses that have not completed within this bound
    pub operation_timeout: Option<Duration>,

    /// Seed for reproducible action choices
    pub seed: Option<u64>,
}

impl Default for ScenarioConfiguration {
    fn default() -> Self {
        Self {
            workers: 8,
            duration: Duration::from_secs(5),
            factory_slots: 4,
            objects_per_factory: 16,
            weights: ActionWeights::default(),
            operation_timeout: Some(Duration::from_secs(10)),
            seed: None,
        }
    }
}

impl ScenarioConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_factory_slots(mut self, slots: usize) -> Self {
        self.factory_slots = slots;
        self
    }

    pub fn with_objects_per_factory(mut self, objects: usize) -> Self {
        self.objects_per_factory = objects;
        self
    }

    pub fn with_weights(mut self, weights: ActionWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfiguration(
                "workers must be greater than 0".to_string(),
            ));
        }
        if self.factory_slots == 0 || self.objects_per_factory == 0 {
            return Err(PoolError::InvalidConfiguration(
                "factory_slots and objects_per_factory must be greater than 0".to_string(),
            ));
        }
        let w = &self.weights;
        if w.use_object == 0 && w.recycle_objects == 0 && w.recycle_factories == 0 {
            return Err(PoolError::InvalidConfiguration(
                "at least one action weight must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
