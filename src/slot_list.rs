//! Lock-free, ring-indexed slot list for in-flight operation tokens

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::Mutex;

use crate::config::TrackerConfiguration;

/// Sizing hints shared by every list created from it
///
/// When a list has to lap its whole ring to find a free slot the
/// multiplier doubles, so lists created afterwards start larger. Sharing
/// is explicit: give each tracker its own tuning to keep them independent.
#[derive(Debug)]
pub struct SlotListTuning {
    baseline: usize,
    ceiling: usize,
    multiplier: AtomicUsize,
}

impl SlotListTuning {
    pub fn new(baseline: usize, ceiling: usize) -> Self {
        Self {
            baseline: baseline.max(1),
            ceiling: ceiling.max(baseline).max(1),
            multiplier: AtomicUsize::new(1),
        }
    }

    pub fn from_config(config: &TrackerConfiguration) -> Self {
        Self::new(config.slot_baseline, config.slot_ceiling)
    }

    pub fn multiplier(&self) -> usize {
        self.multiplier.load(Ordering::Relaxed)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Capacity a newly created list starts with
    pub fn initial_capacity(&self) -> usize {
        self.baseline.saturating_mul(self.multiplier()).min(self.ceiling)
    }

    /// A list of `observed` capacity ran out of free slots
    pub(crate) fn record_undersized(&self, observed: usize) {
        let _ = self
            .multiplier
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |multiplier| {
                let initial = self.baseline.saturating_mul(multiplier);
                (initial <= observed && initial < self.ceiling).then(|| multiplier.saturating_mul(2))
            });
    }
}

impl Default for SlotListTuning {
    fn default() -> Self {
        Self::from_config(&TrackerConfiguration::default())
    }
}

struct Segment<T> {
    start: usize,
    slots: Box<[ArcSwapOption<T>]>,
}

impl<T> Segment<T> {
    fn new(start: usize, len: usize) -> Self {
        Self {
            start,
            slots: (0..len).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    fn get(&self, index: usize) -> Option<&ArcSwapOption<T>> {
        index.checked_sub(self.start).and_then(|offset| self.slots.get(offset))
    }
}

/// Growable ring of optional tokens.
///
/// `add` hands back the slot index, which `remove` later clears in O(1).
/// Growth appends a segment, so indices already handed out stay valid.
pub struct CircularSlotList<T> {
    segments: ArcSwap<Vec<Arc<Segment<T>>>>,
    capacity: AtomicUsize,
    cursor: CachePadded<AtomicUsize>,
    grow_lock: Mutex<()>,
    tuning: Arc<SlotListTuning>,
}

impl<T> CircularSlotList<T> {
    pub fn new(tuning: Arc<SlotListTuning>) -> Self {
        let capacity = tuning.initial_capacity();
        Self {
            segments: ArcSwap::from_pointee(vec![Arc::new(Segment::new(0, capacity))]),
            capacity: AtomicUsize::new(capacity),
            cursor: CachePadded::new(AtomicUsize::new(0)),
            grow_lock: Mutex::new(()),
            tuning,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Store `token` in a free slot and return its index.
    ///
    /// Returns `None` only when the list is full at the tuning ceiling.
    pub fn add(&self, token: Arc<T>) -> Option<usize> {
        let backoff = Backoff::new();
        loop {
            // Capacity is published after its segments, never before.
            let capacity = self.capacity();
            let segments = self.segments.load();

            for _ in 0..capacity {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % capacity;
                if Self::try_install(&segments, index, &token) {
                    return Some(index);
                }
            }

            self.tuning.record_undersized(capacity);
            if !self.grow(capacity) {
                return None;
            }
            backoff.spin();
        }
    }

    /// Clear the slot at `index`, returning what it held
    pub fn remove(&self, index: usize) -> Option<Arc<T>> {
        let segments = self.segments.load();
        Self::locate(&segments, index).and_then(|slot| slot.swap(None))
    }

    /// Clear the slot at `index` only if it still holds `token`
    pub fn remove_token(&self, index: usize, token: &Arc<T>) -> bool {
        let segments = self.segments.load();
        let Some(slot) = Self::locate(&segments, index) else {
            return false;
        };
        let expected = Some(Arc::clone(token));
        let vacant: Option<Arc<T>> = None;
        let previous = slot.compare_and_swap(&expected, vacant);
        matches!(&*previous, Some(held) if Arc::ptr_eq(held, token))
    }

    /// Take every token present, leaving the list empty
    pub fn drain(&self) -> Vec<Arc<T>> {
        self.segments
            .load()
            .iter()
            .flat_map(|segment| segment.slots.iter().filter_map(|slot| slot.swap(None)))
            .collect()
    }

    /// Copy of every token currently present
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.segments
            .load()
            .iter()
            .flat_map(|segment| segment.slots.iter().filter_map(|slot| slot.load_full()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.segments
            .load()
            .iter()
            .map(|segment| segment.slots.iter().filter(|slot| slot.load().is_some()).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn locate(segments: &[Arc<Segment<T>>], index: usize) -> Option<&ArcSwapOption<T>> {
        segments.iter().rev().find(|s| s.start <= index).and_then(|s| s.get(index))
    }

    fn try_install(segments: &[Arc<Segment<T>>], index: usize, token: &Arc<T>) -> bool {
        let Some(slot) = Self::locate(segments, index) else {
            return false;
        };
        if slot.load().is_some() {
            return false;
        }
        let vacant: Option<Arc<T>> = None;
        slot.compare_and_swap(&vacant, Some(Arc::clone(token))).is_none()
    }

    /// Double the capacity, bounded by the ceiling. Returns `false` when
    /// the list cannot grow any further.
    fn grow(&self, observed: usize) -> bool {
        let _guard = self.grow_lock.lock();
        let capacity = self.capacity();
        if capacity != observed {
            return true;
        }
        let ceiling = self.tuning.ceiling();
        if capacity >= ceiling {
            return false;
        }

        let added = capacity.min(ceiling - capacity);
        let mut segments: Vec<_> = self.segments.load().iter().cloned().collect();
        segments.push(Arc::new(Segment::new(capacity, added)));
        self.segments.store(Arc::new(segments));
        self.capacity.store(capacity + added, Ordering::Release);

        tracing::debug!(from = capacity, to = capacity + added, "Grew circular slot list");
        true
    }
}
