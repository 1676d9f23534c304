//! Metrics collection and export for slot pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "metrics")]
use crate::errors::{PoolError, PoolResult};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use recyclable_pool::{Lifecycle, PoolConfiguration, SlotPool};
///
/// let pool = SlotPool::new(PoolConfiguration::new(4), Lifecycle::new(|| Some(1), |_| Ok(()))).unwrap();
/// pool.acquire(0);
/// pool.acquire(0);
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.present_objects, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Handles produced by the create function
    pub created: u64,

    /// Create calls that yielded nothing
    pub creation_absent: u64,

    /// Fresh handles discarded after losing an install race
    pub race_losses: u64,

    /// Successful destroy calls
    pub destroyed: u64,

    /// Destroy calls that failed
    pub destroy_failures: u64,

    /// Recycles this pool swept
    pub recycles: u64,

    /// Recycle calls that lost the swap to a concurrent recycle
    pub recycles_superseded: u64,

    /// Filled slots in the current generation
    pub present_objects: usize,

    /// Occupancy ratio (0.0 to 1.0)
    pub occupancy: f64,

    pub capacity: usize,

    /// Epoch of the current generation
    pub epoch: u64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("creation_absent".to_string(), self.creation_absent.to_string());
        metrics.insert("race_losses".to_string(), self.race_losses.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("destroy_failures".to_string(), self.destroy_failures.to_string());
        metrics.insert("recycles".to_string(), self.recycles.to_string());
        metrics.insert("recycles_superseded".to_string(), self.recycles_superseded.to_string());
        metrics.insert("present_objects".to_string(), self.present_objects.to_string());
        metrics.insert("occupancy".to_string(), format!("{:.2}", self.occupancy));
        metrics.insert("capacity".to_string(), self.capacity.to_string());
        metrics.insert("epoch".to_string(), self.epoch.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use recyclable_pool::{Lifecycle, MetricsExporter, PoolConfiguration, SlotPool};
    /// use std::collections::HashMap;
    ///
    /// let pool = SlotPool::new(PoolConfiguration::new(2), Lifecycle::new(|| Some(1), |_| Ok(()))).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.get_metrics(), "channels", Some(&tags)).unwrap();
    /// assert!(output.contains("slotpool_objects_present"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let registry = Registry::new();
        let labels = Self::labels(pool_name, tags);
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let counters = [
            ("slotpool_objects_created_total", "Handles created", metrics.created),
            ("slotpool_creation_absent_total", "Create calls that yielded nothing", metrics.creation_absent),
            ("slotpool_race_losses_total", "Handles discarded after losing an install race", metrics.race_losses),
            ("slotpool_objects_destroyed_total", "Handles destroyed", metrics.destroyed),
            ("slotpool_destroy_failures_total", "Failed destroy calls", metrics.destroy_failures),
            ("slotpool_recycles_total", "Generations swept", metrics.recycles),
            ("slotpool_recycles_superseded_total", "Recycles lost to a concurrent recycle", metrics.recycles_superseded),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help)).map_err(Self::export_error)?;
            counter.inc_by(value);
            registry.register(Box::new(counter)).map_err(Self::export_error)?;
        }

        let present = IntGauge::with_opts(opts("slotpool_objects_present", "Filled slots"))
            .map_err(Self::export_error)?;
        present.set(metrics.present_objects as i64);
        registry.register(Box::new(present)).map_err(Self::export_error)?;

        let epoch = IntGauge::with_opts(opts("slotpool_epoch", "Current generation"))
            .map_err(Self::export_error)?;
        epoch.set(metrics.epoch as i64);
        registry.register(Box::new(epoch)).map_err(Self::export_error)?;

        let occupancy = Gauge::with_opts(opts("slotpool_occupancy", "Slot occupancy ratio"))
            .map_err(Self::export_error)?;
        occupancy.set(metrics.occupancy);
        registry.register(Box::new(occupancy)).map_err(Self::export_error)?;

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(Self::export_error)?;
        String::from_utf8(buffer).map_err(|e| PoolError::MetricsExport(e.to_string()))
    }

    fn labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.insert(key.clone(), value.clone());
            }
        }
        labels
    }

    fn export_error(err: prometheus::Error) -> PoolError {
        PoolError::MetricsExport(err.to_string())
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicU64,
    pub creation_absent: AtomicU64,
    pub race_losses: AtomicU64,
    pub destroyed: AtomicU64,
    pub destroy_failures: AtomicU64,
    pub recycles: AtomicU64,
    pub recycles_superseded: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destroy_failures(&self) -> u64 {
        self.destroy_failures.load(Ordering::Relaxed)
    }

    pub fn record_destroy(&self, failed: bool) {
        if failed {
            self.destroy_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.destroyed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_metrics(&self, present: usize, capacity: usize, epoch: u64) -> PoolMetrics {
        let occupancy = if capacity > 0 {
            present as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            creation_absent: self.creation_absent.load(Ordering::Relaxed),
            race_losses: self.race_losses.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            recycles_superseded: self.recycles_superseded.load(Ordering::Relaxed),
            present_objects: present,
            occupancy,
            capacity,
            epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_every_counter() {
        let tracker = MetricsTracker::new();
        tracker.created.fetch_add(3, Ordering::Relaxed);
        let metrics = tracker.get_metrics(2, 4, 1);

        let exported = metrics.export();
        assert_eq!(exported["created"], "3");
        assert_eq!(exported["occupancy"], "0.50");
        assert_eq!(exported.len(), 11);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_export_labels() {
        let metrics = MetricsTracker::new().get_metrics(1, 2, 0);
        let output = MetricsExporter::export_prometheus(&metrics, "factories", None).unwrap();
        assert!(output.contains("slotpool_objects_present{pool=\"factories\"} 1"));
        assert!(output.contains("# TYPE slotpool_recycles_total counter"));
    }
}
