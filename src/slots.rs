//! Generation arrays and the lock-free slot protocol shared by both pools

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam::utils::Backoff;

use crate::config::PoolConfiguration;
use crate::metrics::MetricsTracker;
use crate::pool::RecycleOutcome;

/// Contents of an occupied slot.
///
/// `Sealed` marks a slot of a generation that has been swapped out;
/// nothing can be installed over it.
pub(crate) enum Entry<T> {
    Live(Arc<T>),
    Sealed,
}

pub(crate) enum Probe<T> {
    Present(Arc<T>),
    Vacant,
    Sealed,
}

pub(crate) enum Install<T> {
    Installed,
    Occupied(Arc<T>),
    Sealed,
}

/// One backing array of a pool
pub(crate) struct Generation<T> {
    epoch: u64,
    closed: bool,
    slots: Box<[ArcSwapOption<Entry<T>>]>,
    sealed: Arc<Entry<T>>,
}

impl<T> Generation<T> {
    pub fn new(epoch: u64, capacity: usize) -> Self {
        Self {
            epoch,
            closed: false,
            slots: (0..capacity).map(|_| ArcSwapOption::empty()).collect(),
            sealed: Arc::new(Entry::Sealed),
        }
    }

    /// Terminal generation installed by `dispose`; never filled
    pub fn closed(epoch: u64, capacity: usize) -> Self {
        Self {
            closed: true,
            ..Self::new(epoch, capacity)
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn probe(&self, index: usize) -> Probe<T> {
        match &*self.slots[index].load() {
            None => Probe::Vacant,
            Some(entry) => match &**entry {
                Entry::Live(handle) => Probe::Present(Arc::clone(handle)),
                Entry::Sealed => Probe::Sealed,
            },
        }
    }

    /// Install `handle` if the slot is still vacant
    pub fn install(&self, index: usize, handle: Arc<T>) -> Install<T> {
        let vacant: Option<Arc<Entry<T>>> = None;
        let previous = self.slots[index].compare_and_swap(&vacant, Some(Arc::new(Entry::Live(handle))));
        match &*previous {
            None => Install::Installed,
            Some(entry) => match &**entry {
                Entry::Live(winner) => Install::Occupied(Arc::clone(winner)),
                Entry::Sealed => Install::Sealed,
            },
        }
    }

    /// Seal every slot and hand back the live handles with their indices.
    ///
    /// Must only be called by the caller that swapped this generation out.
    pub fn seal(&self) -> Vec<(usize, Arc<T>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let previous = slot.swap(Some(Arc::clone(&self.sealed)));
                match previous.as_deref() {
                    Some(Entry::Live(handle)) => Some((index, Arc::clone(handle))),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn present(&self) -> usize {
        (0..self.capacity())
            .filter(|&index| matches!(self.probe(index), Probe::Present(_)))
            .count()
    }
}

/// State shared by `SlotPool` and `AsyncSlotPool`
pub(crate) struct SlotCore<T> {
    current: ArcSwap<Generation<T>>,
    epochs: AtomicU64,
    pub config: PoolConfiguration,
    pub metrics: Arc<MetricsTracker>,
}

impl<T> SlotCore<T> {
    pub fn new(config: PoolConfiguration) -> Self {
        let capacity = config.capacity;
        Self {
            current: ArcSwap::from_pointee(Generation::new(0, capacity)),
            epochs: AtomicU64::new(0),
            config,
            metrics: Arc::new(MetricsTracker::new()),
        }
    }

    pub fn generation(&self) -> Arc<Generation<T>> {
        self.current.load_full()
    }

    /// Return the handle at `index`, filling the slot on demand.
    ///
    /// `discard` receives freshly created handles that lost an install race.
    pub fn acquire<D>(&self, index: usize, create: &(dyn Fn() -> Option<T> + Send + Sync), discard: D) -> Option<Arc<T>>
    where
        D: Fn(Arc<T>, u64),
    {
        let backoff = Backoff::new();
        loop {
            let generation = self.generation();
            assert!(
                index < generation.capacity(),
                "slot index {index} out of range for pool '{}' of capacity {}",
                self.config.name,
                generation.capacity()
            );
            if generation.is_closed() {
                return None;
            }

            match generation.probe(index) {
                Probe::Present(handle) => return Some(handle),
                // Already swapped out; the next load sees the replacement.
                Probe::Sealed => {
                    backoff.snooze();
                    continue;
                }
                Probe::Vacant => {}
            }

            let Some(created) = create() else {
                self.metrics.creation_absent.fetch_add(1, Ordering::Relaxed);
                return None;
            };
            let fresh = Arc::new(created);
            self.metrics.created.fetch_add(1, Ordering::Relaxed);

            match generation.install(index, Arc::clone(&fresh)) {
                Install::Installed => return Some(fresh),
                Install::Occupied(winner) => {
                    self.metrics.race_losses.fetch_add(1, Ordering::Relaxed);
                    discard(fresh, generation.epoch());
                    return Some(winner);
                }
                Install::Sealed => {
                    self.metrics.race_losses.fetch_add(1, Ordering::Relaxed);
                    discard(fresh, generation.epoch());
                    backoff.snooze();
                }
            }
        }
    }

    /// Swap in an empty generation of the same capacity, or a closed one
    /// when `close` is set.
    ///
    /// On success returns the displaced generation's epoch and live handles,
    /// which the caller alone must destroy.
    pub fn begin_recycle(&self, close: bool) -> Result<(u64, Vec<(usize, Arc<T>)>), RecycleOutcome> {
        let current = self.generation();
        if current.is_closed() {
            return Err(RecycleOutcome::Closed);
        }

        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let next = if close {
            Generation::closed(epoch, current.capacity())
        } else {
            Generation::new(epoch, current.capacity())
        };
        let previous = self.current.compare_and_swap(&current, Arc::new(next));
        if !Arc::ptr_eq(&*previous, &current) {
            self.metrics.recycles_superseded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(pool = %self.config.name, "Recycle superseded by concurrent recycle");
            return Err(RecycleOutcome::Superseded);
        }
        drop(previous);

        self.metrics.recycles.fetch_add(1, Ordering::Relaxed);
        Ok((current.epoch(), current.seal()))
    }

    pub fn record_destroy(&self, failed: bool) {
        self.metrics.record_destroy(failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_into_vacant_slot() {
        let generation = Generation::new(0, 2);
        assert!(matches!(generation.install(1, Arc::new("a")), Install::Installed));
        assert!(matches!(generation.probe(1), Probe::Present(h) if *h == "a"));
        assert!(matches!(generation.probe(0), Probe::Vacant));
    }

    #[test]
    fn test_second_install_reports_winner() {
        let generation = Generation::new(0, 1);
        let _ = generation.install(0, Arc::new(1));
        match generation.install(0, Arc::new(2)) {
            Install::Occupied(winner) => assert_eq!(*winner, 1),
            _ => panic!("expected occupied slot"),
        }
    }

    #[test]
    fn test_seal_returns_live_handles_and_blocks_installs() {
        let generation = Generation::new(3, 3);
        let _ = generation.install(0, Arc::new('x'));
        let _ = generation.install(2, Arc::new('z'));

        let sealed = generation.seal();
        let indices: Vec<usize> = sealed.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 2]);

        assert!(matches!(generation.install(1, Arc::new('y')), Install::Sealed));
        assert!(matches!(generation.probe(0), Probe::Sealed));
        assert_eq!(generation.present(), 0);
    }

    #[test]
    fn test_begin_recycle_bumps_epoch() {
        let core: SlotCore<u8> = SlotCore::new(PoolConfiguration::new(2));
        assert_eq!(core.generation().epoch(), 0);

        let (epoch, handles) = core.begin_recycle(false).unwrap();
        assert_eq!(epoch, 0);
        assert!(handles.is_empty());
        assert_eq!(core.generation().epoch(), 1);
    }

    #[test]
    fn test_closed_generation_stops_fills_and_recycles() {
        let core: SlotCore<u8> = SlotCore::new(PoolConfiguration::new(1));
        assert!(core.begin_recycle(true).is_ok());
        assert!(core.generation().is_closed());

        let created = core.acquire(0, &|| Some(1), |_, _| panic!("nothing to discard"));
        assert!(created.is_none());
        assert!(matches!(core.begin_recycle(false), Err(RecycleOutcome::Closed)));
    }
}
