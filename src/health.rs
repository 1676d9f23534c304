//! Health snapshots for slot pools

#[cfg(feature = "serde")]
use serde::Serialize;

/// Health of the current generation of a pool
///
/// # Examples
///
/// ```
/// use recyclable_pool::{Lifecycle, PoolConfiguration, SlotPool};
///
/// let pool = SlotPool::new(PoolConfiguration::new(4), Lifecycle::new(|| Some(1), |_| Ok(()))).unwrap();
/// pool.acquire(0);
///
/// let health = pool.get_health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.present, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Fraction of slots currently filled (0.0 to 1.0)
    pub occupancy: f64,

    /// Filled slots
    pub present: usize,

    /// Filled slots whose handle failed validation
    pub invalid: usize,

    pub capacity: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn new(present: usize, invalid: usize, capacity: usize, destroy_failures: u64) -> Self {
        let occupancy = if capacity > 0 {
            present as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        if invalid > 0 {
            warnings.push(format!("{invalid} of {present} handles failed validation"));
        }
        if destroy_failures > 0 {
            warnings.push(format!("{destroy_failures} destroy failures since creation"));
        }

        Self {
            is_healthy: warnings.is_empty(),
            occupancy,
            present,
            invalid,
            capacity,
            warnings,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}
