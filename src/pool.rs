//! Fixed-capacity slot pools with lazy fill and atomic whole-pool recycle

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinSet;

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::lifecycle::{AsyncLifecycle, Lifecycle};
use crate::metrics::PoolMetrics;
use crate::slots::{Generation, Probe, SlotCore};

/// Result of a `recycle_all` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleOutcome {
    /// This caller swapped the generation out and swept it
    Swept(RecycleReport),
    /// A concurrent caller won the swap and owns the sweep
    Superseded,
    /// The pool was disposed; nothing is left to recycle
    Closed,
}

impl RecycleOutcome {
    pub fn report(&self) -> Option<RecycleReport> {
        match self {
            RecycleOutcome::Swept(report) => Some(*report),
            RecycleOutcome::Superseded | RecycleOutcome::Closed => None,
        }
    }
}

/// What a winning sweep did to the displaced generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecycleReport {
    /// Epoch of the generation that was swept
    pub epoch: u64,
    pub destroyed: usize,
    pub failed: usize,
}

/// Lazy, non-restartable iterator over the present handles of one generation
///
/// The generation is captured when the iterator is created; a concurrent
/// recycle does not disturb it, though slots already sealed by the sweep
/// read as absent.
pub struct Iter<T> {
    generation: Arc<Generation<T>>,
    next: usize,
}

impl<T> Iterator for Iter<T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.generation.capacity() {
            let index = self.next;
            self.next += 1;
            if let Probe::Present(handle) = self.generation.probe(index) {
                return Some(handle);
            }
        }
        None
    }
}

fn health_of<T>(generation: &Generation<T>, destroy_failures: u64, is_valid: impl Fn(&T) -> bool) -> HealthStatus {
    let mut present = 0;
    let mut invalid = 0;
    for index in 0..generation.capacity() {
        if let Probe::Present(handle) = generation.probe(index) {
            present += 1;
            if !is_valid(&*handle) {
                invalid += 1;
            }
        }
    }
    HealthStatus::new(present, invalid, generation.capacity(), destroy_failures)
}

/// Thread-safe pool of lazily created handles, recycled as a unit
///
/// # Examples
///
/// ```
/// use recyclable_pool::{Lifecycle, PoolConfiguration, SlotPool};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let next = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&next);
/// let lifecycle = Lifecycle::new(move || Some(counter.fetch_add(1, Ordering::SeqCst)), |_| Ok(()));
/// let pool = SlotPool::new(PoolConfiguration::new(2), lifecycle).unwrap();
///
/// assert_eq!(*pool.acquire(1).unwrap(), 0);
/// assert_eq!(*pool.acquire(1).unwrap(), 0);
///
/// pool.recycle_all();
/// assert_eq!(pool.iter().count(), 0);
/// assert_eq!(*pool.acquire(1).unwrap(), 1);
/// ```
pub struct SlotPool<T> {
    core: SlotCore<T>,
    lifecycle: Lifecycle<T>,
}

impl<T: Send + Sync + 'static> SlotPool<T> {
    pub fn new(config: PoolConfiguration, lifecycle: Lifecycle<T>) -> PoolResult<Self> {
        config.validate()?;
        Ok(Self {
            core: SlotCore::new(config),
            lifecycle,
        })
    }

    /// Get the handle at `index`, creating it if the slot is empty.
    ///
    /// Returns `None` while creation yields nothing.
    ///
    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    pub fn acquire(&self, index: usize) -> Option<Arc<T>> {
        self.core.acquire(index, &*self.lifecycle.create, |fresh, epoch| {
            // A handle nobody has seen; its failure is reported, never thrown.
            if let Err(err) = (self.lifecycle.destroy)(fresh) {
                self.core.record_destroy(true);
                self.report_failure(&PoolError::destroy(epoch, Some(index), &err));
            } else {
                self.core.record_destroy(false);
            }
        })
    }

    /// Iterate the present handles of the current generation
    pub fn iter(&self) -> Iter<T> {
        Iter {
            generation: self.core.generation(),
            next: 0,
        }
    }

    /// Replace the backing array with an empty one and destroy every
    /// handle the winner displaced.
    pub fn recycle_all(&self) -> RecycleOutcome {
        self.sweep(false)
    }

    /// Final recycle. The pool stays closed afterwards: `acquire` yields
    /// `None` and handles created by racing fillers are destroyed.
    pub fn dispose(&self) -> RecycleOutcome {
        self.sweep(true)
    }

    pub fn is_closed(&self) -> bool {
        self.core.generation().is_closed()
    }

    fn sweep(&self, close: bool) -> RecycleOutcome {
        let (epoch, handles) = match self.core.begin_recycle(close) {
            Ok(displaced) => displaced,
            Err(outcome) => return outcome,
        };

        let report = self.destroy_displaced(epoch, handles);
        tracing::debug!(
            pool = %self.core.config.name,
            epoch,
            destroyed = report.destroyed,
            failed = report.failed,
            closed = close,
            "Recycled pool generation"
        );
        RecycleOutcome::Swept(report)
    }

    pub fn capacity(&self) -> usize {
        self.core.config.capacity
    }

    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    /// Epoch of the current generation; bumps on every successful recycle
    pub fn epoch(&self) -> u64 {
        self.core.generation().epoch()
    }

    pub fn is_valid(&self, item: &T) -> bool {
        self.lifecycle.is_valid(item)
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        let generation = self.core.generation();
        self.core
            .metrics
            .get_metrics(generation.present(), generation.capacity(), generation.epoch())
    }

    pub fn get_health_status(&self) -> HealthStatus {
        health_of(&self.core.generation(), self.core.metrics.destroy_failures(), |item| {
            self.lifecycle.is_valid(item)
        })
    }
}

impl<T> SlotPool<T> {
    fn destroy_displaced(&self, epoch: u64, handles: Vec<(usize, Arc<T>)>) -> RecycleReport {
        let mut report = RecycleReport {
            epoch,
            destroyed: 0,
            failed: 0,
        };
        for (slot, handle) in handles {
            match (self.lifecycle.destroy)(handle) {
                Ok(()) => {
                    report.destroyed += 1;
                    self.core.record_destroy(false);
                }
                Err(err) => {
                    report.failed += 1;
                    self.core.record_destroy(true);
                    self.report_failure(&PoolError::destroy(epoch, Some(slot), &err));
                }
            }
        }
        report
    }

    pub(crate) fn report_failure(&self, failure: &PoolError) {
        self.core.config.reporter.report(&self.core.config.name, failure);
    }
}

/// Dropping an open pool sweeps it like `dispose`.
impl<T> Drop for SlotPool<T> {
    fn drop(&mut self) {
        if let Ok((epoch, handles)) = self.core.begin_recycle(true) {
            let report = self.destroy_displaced(epoch, handles);
            tracing::debug!(
                pool = %self.core.config.name,
                epoch,
                destroyed = report.destroyed,
                failed = report.failed,
                "Swept pool on drop"
            );
        }
    }
}

/// Slot pool whose handles are destroyed asynchronously
///
/// Acquisition and the generation swap never suspend. A creator that loses
/// an install race hands its handle to a detached destroy task; the
/// outcome is counted in the metrics but never reported.
pub struct AsyncSlotPool<T> {
    core: SlotCore<T>,
    lifecycle: AsyncLifecycle<T>,
    runtime: Handle,
}

impl<T: Send + Sync + 'static> AsyncSlotPool<T> {
    /// Create a pool bound to the current Tokio runtime
    pub fn new(config: PoolConfiguration, lifecycle: AsyncLifecycle<T>) -> PoolResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        Ok(Self {
            core: SlotCore::new(config),
            lifecycle,
            runtime,
        })
    }

    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    pub fn acquire(&self, index: usize) -> Option<Arc<T>> {
        self.core.acquire(index, &*self.lifecycle.create, |fresh, _epoch| {
            let destroyed = (self.lifecycle.destroy)(fresh);
            let metrics = Arc::clone(&self.core.metrics);
            self.runtime.spawn(async move {
                metrics.record_destroy(destroyed.await.is_err());
            });
        })
    }

    pub fn iter(&self) -> Iter<T> {
        Iter {
            generation: self.core.generation(),
            next: 0,
        }
    }

    /// Swap the generation out and destroy its handles concurrently
    pub async fn recycle_all(&self) -> RecycleOutcome {
        self.sweep(false).await
    }

    /// Final recycle; the pool stays closed afterwards
    pub async fn dispose(&self) -> RecycleOutcome {
        self.sweep(true).await
    }

    pub fn is_closed(&self) -> bool {
        self.core.generation().is_closed()
    }

    async fn sweep(&self, close: bool) -> RecycleOutcome {
        let (epoch, handles) = match self.core.begin_recycle(close) {
            Ok(displaced) => displaced,
            Err(outcome) => return outcome,
        };

        let mut sweep = JoinSet::new();
        for (slot, handle) in handles {
            let destroy = Arc::clone(&self.lifecycle.destroy);
            sweep.spawn_on(async move { (slot, destroy(handle).await) }, &self.runtime);
        }

        let mut report = RecycleReport {
            epoch,
            destroyed: 0,
            failed: 0,
        };
        while let Some(joined) = sweep.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => None,
                Ok((slot, Err(err))) => Some(PoolError::destroy(epoch, Some(slot), &err)),
                Err(join_err) => Some(PoolError::Destroy {
                    epoch,
                    slot: None,
                    message: join_err.to_string(),
                }),
            };
            match failure {
                None => {
                    report.destroyed += 1;
                    self.core.record_destroy(false);
                }
                Some(failure) => {
                    report.failed += 1;
                    self.core.record_destroy(true);
                    self.core.config.reporter.report(&self.core.config.name, &failure);
                }
            }
        }

        tracing::debug!(
            pool = %self.core.config.name,
            epoch,
            destroyed = report.destroyed,
            failed = report.failed,
            closed = close,
            "Recycled pool generation"
        );
        RecycleOutcome::Swept(report)
    }

    pub fn capacity(&self) -> usize {
        self.core.config.capacity
    }

    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    pub fn epoch(&self) -> u64 {
        self.core.generation().epoch()
    }

    pub fn is_valid(&self, item: &T) -> bool {
        self.lifecycle.is_valid(item)
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        let generation = self.core.generation();
        self.core
            .metrics
            .get_metrics(generation.present(), generation.capacity(), generation.epoch())
    }

    pub fn get_health_status(&self) -> HealthStatus {
        health_of(&self.core.generation(), self.core.metrics.destroy_failures(), |item| {
            self.lifecycle.is_valid(item)
        })
    }
}

impl<T> AsyncSlotPool<T> {
    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn config(&self) -> &PoolConfiguration {
        &self.core.config
    }
}

/// Dropping an open pool hands its live handles to detached destroy tasks.
impl<T> Drop for AsyncSlotPool<T> {
    fn drop(&mut self) {
        let Ok((epoch, handles)) = self.core.begin_recycle(true) else {
            return;
        };
        tracing::debug!(pool = %self.core.config.name, epoch, handles = handles.len(), "Sweeping pool on drop");
        for (_, handle) in handles {
            let destroyed = (self.lifecycle.destroy)(handle);
            let metrics = Arc::clone(&self.core.metrics);
            self.runtime.spawn(async move {
                metrics.record_destroy(destroyed.await.is_err());
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BoxError;
    use crate::lifecycle::FailureReporter;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CollectingReporter {
        failures: Mutex<Vec<PoolError>>,
    }

    impl FailureReporter for CollectingReporter {
        fn report(&self, _pool: &str, failure: &PoolError) {
            self.failures.lock().push(failure.clone());
        }
    }

    fn counting_pool(capacity: usize) -> (SlotPool<usize>, Arc<AtomicUsize>, Arc<Mutex<Vec<usize>>>) {
        let next = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::clone(&next);
        let sink = Arc::clone(&destroyed);
        let lifecycle = Lifecycle::new(
            move || Some(counter.fetch_add(1, Ordering::SeqCst)),
            move |item: Arc<usize>| {
                sink.lock().push(*item);
                Ok(())
            },
        );
        let pool = SlotPool::new(PoolConfiguration::new(capacity), lifecycle).unwrap();
        (pool, next, destroyed)
    }

    #[test]
    fn test_acquire_fills_once() {
        let (pool, next, _) = counting_pool(4);
        let first = pool.acquire(2).unwrap();
        let second = pool.acquire(2).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(next.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_absent_creation_leaves_slot_empty() {
        let available = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let gate = Arc::clone(&available);
        let lifecycle = Lifecycle::new(
            move || gate.load(Ordering::SeqCst).then_some("conn"),
            |_| Ok(()),
        );
        let pool = SlotPool::new(PoolConfiguration::new(1), lifecycle).unwrap();

        assert!(pool.acquire(0).is_none());
        assert!(pool.acquire(0).is_none());
        assert_eq!(pool.get_metrics().creation_absent, 2);

        available.store(true, Ordering::SeqCst);
        assert_eq!(*pool.acquire(0).unwrap(), "conn");
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_index_beyond_capacity_panics() {
        let (pool, _, _) = counting_pool(2);
        let _ = pool.acquire(2);
    }

    #[test]
    fn test_iter_yields_present_in_index_order() {
        let (pool, _, _) = counting_pool(4);
        pool.acquire(3);
        pool.acquire(1);
        let seen: Vec<usize> = pool.iter().map(|h| *h).collect();
        // slot 1 holds handle 1, slot 3 holds handle 0
        assert_eq!(seen, vec![1, 0]);
    }

    #[test]
    fn test_iter_snapshot_survives_recycle() {
        let (pool, _, _) = counting_pool(2);
        pool.acquire(0);
        let mut iter = pool.iter();
        let first = iter.next().unwrap();
        pool.recycle_all();
        assert_eq!(*first, 0);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_recycle_destroys_each_handle_once() {
        let (pool, _, destroyed) = counting_pool(3);
        for i in 0..3 {
            pool.acquire(i);
        }
        let outcome = pool.recycle_all();
        assert_eq!(
            outcome.report().map(|r| (r.destroyed, r.failed)),
            Some((3, 0))
        );

        let mut seen = destroyed.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(pool.iter().count(), 0);
        assert_eq!(pool.epoch(), 1);

        // A second recycle finds nothing left to destroy.
        assert_eq!(pool.recycle_all().report().unwrap().destroyed, 0);
        assert_eq!(destroyed.lock().len(), 3);
    }

    #[test]
    fn test_dispose_closes_pool() {
        let (pool, next, destroyed) = counting_pool(2);
        pool.acquire(0);

        assert_eq!(pool.dispose().report().map(|r| r.destroyed), Some(1));
        assert!(pool.is_closed());
        assert!(pool.acquire(1).is_none());
        assert_eq!(next.load(Ordering::SeqCst), 1);
        assert_eq!(pool.recycle_all(), RecycleOutcome::Closed);
        assert_eq!(pool.dispose(), RecycleOutcome::Closed);
        assert_eq!(destroyed.lock().len(), 1);
    }

    #[test]
    fn test_drop_sweeps_live_handles() {
        let destroyed = {
            let (pool, _, destroyed) = counting_pool(3);
            for i in 0..3 {
                pool.acquire(i);
            }
            destroyed
        };
        let mut seen = destroyed.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_drop_after_dispose_destroys_nothing_twice() {
        let destroyed = {
            let (pool, _, destroyed) = counting_pool(2);
            pool.acquire(0);
            pool.dispose();
            destroyed
        };
        assert_eq!(*destroyed.lock(), vec![0]);
    }

    #[test]
    fn test_destroy_failure_does_not_stop_sweep() {
        let reporter = Arc::new(CollectingReporter::default());
        let destroyed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&destroyed);
        let next = Arc::new(AtomicUsize::new(0));
        let lifecycle = Lifecycle::new(
            move || Some(next.fetch_add(1, Ordering::SeqCst)),
            move |item: Arc<usize>| {
                count.fetch_add(1, Ordering::SeqCst);
                if *item == 1 {
                    return Err::<(), BoxError>("close failed".into());
                }
                Ok(())
            },
        );
        let config = PoolConfiguration::new(3).with_reporter(reporter.clone());
        let pool = SlotPool::new(config, lifecycle).unwrap();
        for i in 0..3 {
            pool.acquire(i);
        }

        let report = pool.recycle_all().report().unwrap();
        assert_eq!((report.destroyed, report.failed), (2, 1));
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);

        let failures = reporter.failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], PoolError::Destroy { slot: Some(1), .. }));
        assert!(!pool.get_health_status().is_healthy());
    }

    #[test]
    fn test_health_counts_invalid_handles() {
        let next = Arc::new(AtomicUsize::new(0));
        let lifecycle = Lifecycle::new(move || Some(next.fetch_add(1, Ordering::SeqCst)), |_| Ok(()))
            .with_validation(|v: &usize| v % 2 == 0);
        let pool = SlotPool::new(PoolConfiguration::new(4), lifecycle).unwrap();
        for i in 0..3 {
            pool.acquire(i);
        }

        let health = pool.get_health_status();
        assert_eq!(health.present, 3);
        assert_eq!(health.invalid, 1);
        assert!(!health.is_healthy());
    }

    #[tokio::test]
    async fn test_async_pool_recycle() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&destroyed);
        let lifecycle = AsyncLifecycle::new(
            || Some(String::from("channel")),
            move |_item| {
                let count = Arc::clone(&count);
                async move {
                    tokio::task::yield_now().await;
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );
        let pool = AsyncSlotPool::new(PoolConfiguration::new(4), lifecycle).unwrap();
        for i in 0..4 {
            assert_eq!(pool.acquire(i).as_deref().map(String::as_str), Some("channel"));
        }

        let report = pool.recycle_all().await.report().unwrap();
        assert_eq!(report.destroyed, 4);
        assert_eq!(destroyed.load(Ordering::SeqCst), 4);
        assert_eq!(pool.get_metrics().present_objects, 0);
    }

    fn counting_async_pool(capacity: usize, destroyed: &Arc<AtomicUsize>) -> AsyncSlotPool<usize> {
        let next = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(destroyed);
        let lifecycle = AsyncLifecycle::new(
            move || Some(next.fetch_add(1, Ordering::SeqCst)),
            move |_item| {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );
        AsyncSlotPool::new(PoolConfiguration::new(capacity), lifecycle).unwrap()
    }

    async fn settle(done: impl Fn() -> bool) {
        for _ in 0..1000 {
            if done() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_loser_destroys_are_counted() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(counting_async_pool(1, &destroyed));

        let mut racers = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            racers.spawn(async move { *pool.acquire(0).unwrap() });
        }
        let mut winners = Vec::new();
        while let Some(joined) = racers.join_next().await {
            winners.push(joined.unwrap());
        }
        assert!(winners.windows(2).all(|pair| pair[0] == pair[1]));

        let metrics = pool.get_metrics();
        let losses = metrics.race_losses as usize;
        assert_eq!(metrics.created as usize, losses + 1);
        settle(|| pool.get_metrics().destroyed as usize == losses).await;

        assert_eq!(destroyed.load(Ordering::SeqCst), losses);
        assert_eq!(pool.get_metrics().destroyed as usize, losses);
    }

    #[tokio::test]
    async fn test_async_drop_spawns_destroys() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        {
            let pool = counting_async_pool(3, &destroyed);
            for i in 0..3 {
                pool.acquire(i);
            }
        }
        settle(|| destroyed.load(Ordering::SeqCst) == 3).await;
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_async_pool_requires_runtime() {
        let lifecycle = AsyncLifecycle::new(|| Some(1u8), |_| async move { Ok(()) });
        assert!(matches!(
            AsyncSlotPool::new(PoolConfiguration::new(1), lifecycle),
            Err(PoolError::NoRuntime)
        ));
    }
}
