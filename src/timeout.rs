//! Windowed tracking of in-flight operations that may be stuck

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::config::TrackerConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::slot_list::{CircularSlotList, SlotListTuning};

type TimeoutCallback<T> = Arc<dyn Fn(Vec<Arc<T>>) + Send + Sync>;

/// One registration window.
///
/// Accepts registrations for `timeout` after creation and reports whatever
/// is still registered at `2 * timeout`, so every token gets at least one
/// full timeout before it can be reported.
struct Window<T> {
    id: u64,
    created_at: Instant,
    accept_until: Instant,
    list: CircularSlotList<T>,
    disposed: AtomicBool,
}

impl<T> Window<T> {
    fn new(id: u64, now: Instant, timeout: std::time::Duration, tuning: &Arc<SlotListTuning>) -> Self {
        Self {
            id,
            created_at: now,
            accept_until: now + timeout,
            list: CircularSlotList::new(Arc::clone(tuning)),
            disposed: AtomicBool::new(false),
        }
    }

    fn accepts(&self, now: Instant) -> bool {
        now < self.accept_until
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Idempotent; `true` only for the call that disposed the window
    fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    /// Report and clear whatever is still registered. A registration that
    /// lands after the drain withdraws itself; one the drain took stays
    /// reported here.
    fn fire(&self, callback: &TimeoutCallback<T>) {
        if !self.dispose() {
            return;
        }
        let stuck = self.list.drain();
        if !stuck.is_empty() {
            tracing::debug!(window = self.id, stuck = stuck.len(), "Timeout window elapsed with operations in flight");
        }
        callback(stuck);
    }
}

struct TrackerInner<T> {
    config: TrackerConfiguration,
    callback: TimeoutCallback<T>,
    current: ArcSwap<Window<T>>,
    tuning: Arc<SlotListTuning>,
    runtime: Handle,
    windows: AtomicU64,
}

impl<T: Send + Sync + 'static> TrackerInner<T> {
    fn arm(&self, window: Arc<Window<T>>) {
        let callback = Arc::clone(&self.callback);
        let deadline = window.created_at + self.config.timeout * 2;
        self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            window.fire(&callback);
        });
    }

    /// The window registrations made at `now` belong to, opening a new one
    /// if the current window stopped accepting.
    fn window_at(&self, now: Instant) -> Arc<Window<T>> {
        let window = self.current.load_full();
        if window.accepts(now) {
            return window;
        }

        let id = self.windows.fetch_add(1, Ordering::Relaxed) + 1;
        let candidate = Arc::new(Window::new(id, now, self.config.timeout, &self.tuning));
        let previous = self.current.compare_and_swap(&window, Arc::clone(&candidate));
        if Arc::ptr_eq(&*previous, &window) {
            tracing::debug!(window = id, "Opened timeout window");
            self.arm(Arc::clone(&candidate));
            candidate
        } else {
            // Never armed, so there is no timer to cancel.
            candidate.dispose();
            Arc::clone(&*previous)
        }
    }
}

/// Reports operations that stay registered for roughly twice the timeout
///
/// Each registration returns a [`TrackingGuard`]; dropping it marks the
/// operation finished. Windows rotate on demand and each fires its callback
/// exactly once with the tokens still registered in it, possibly none.
///
/// # Examples
///
/// ```
/// use recyclable_pool::{OperationTimeoutTracker, TrackerConfiguration};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = TrackerConfiguration::new(Duration::from_secs(5));
/// let tracker = OperationTimeoutTracker::new(config, |stuck: Vec<Arc<&str>>| {
///     for op in stuck {
///         eprintln!("operation {op} is taking too long");
///     }
/// })
/// .unwrap();
///
/// let guard = tracker.start_tracking(Arc::new("GetData"));
/// assert!(guard.is_tracked());
/// drop(guard);
/// # }
/// ```
pub struct OperationTimeoutTracker<T> {
    inner: Arc<TrackerInner<T>>,
}

impl<T> Clone for OperationTimeoutTracker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> OperationTimeoutTracker<T> {
    /// Create a tracker with its own slot-list tuning
    pub fn new<C>(config: TrackerConfiguration, callback: C) -> PoolResult<Self>
    where
        C: Fn(Vec<Arc<T>>) + Send + Sync + 'static,
    {
        let tuning = Arc::new(SlotListTuning::from_config(&config));
        Self::with_tuning(config, tuning, callback)
    }

    /// Create a tracker whose windows size themselves from `tuning`
    pub fn with_tuning<C>(config: TrackerConfiguration, tuning: Arc<SlotListTuning>, callback: C) -> PoolResult<Self>
    where
        C: Fn(Vec<Arc<T>>) + Send + Sync + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let first = Arc::new(Window::new(0, Instant::now(), config.timeout, &tuning));
        let inner = Arc::new(TrackerInner {
            config,
            callback: Arc::new(callback),
            current: ArcSwap::new(Arc::clone(&first)),
            tuning,
            runtime,
            windows: AtomicU64::new(0),
        });
        inner.arm(first);

        Ok(Self { inner })
    }

    /// Register `token` as in flight until the returned guard is dropped
    pub fn start_tracking(&self, mut token: Arc<T>) -> TrackingGuard<T> {
        loop {
            let window = self.inner.window_at(Instant::now());
            let Some(index) = window.list.add(Arc::clone(&token)) else {
                tracing::warn!(
                    window = window.id,
                    capacity = window.list.capacity(),
                    "Timeout tracker is saturated; operation not tracked"
                );
                return TrackingGuard {
                    token,
                    registration: Registration::Untracked,
                };
            };
            match Self::settle(window, index, token) {
                Ok(guard) => return guard,
                Err(withdrawn) => token = withdrawn,
            }
        }
    }

    /// Confirm a registration at `index`. Hands the token back when the
    /// window began reporting first and the token was withdrawn from it.
    fn settle(window: Arc<Window<T>>, index: usize, token: Arc<T>) -> Result<TrackingGuard<T>, Arc<T>> {
        if !window.is_disposed() {
            return Ok(TrackingGuard {
                token,
                registration: Registration::Held(window, index),
            });
        }
        if window.list.remove_token(index, &token) {
            return Err(token);
        }
        // The window's report already carried it.
        Ok(TrackingGuard {
            token,
            registration: Registration::Reported(window.id),
        })
    }

    pub fn config(&self) -> &TrackerConfiguration {
        &self.inner.config
    }

    pub fn tuning(&self) -> &Arc<SlotListTuning> {
        &self.inner.tuning
    }

    /// Id of the window currently taking registrations
    pub fn current_window(&self) -> u64 {
        self.inner.current.load().id
    }
}

enum Registration<T> {
    Held(Arc<Window<T>>, usize),
    /// Taken by the window's report while registering
    Reported(u64),
    Untracked,
}

/// Scoped registration; dropping it stops tracking the operation
pub struct TrackingGuard<T> {
    token: Arc<T>,
    registration: Registration<T>,
}

impl<T> TrackingGuard<T> {
    /// `false` when the tracker was saturated and dropped the registration
    pub fn is_tracked(&self) -> bool {
        !matches!(self.registration, Registration::Untracked)
    }

    /// Window the operation was registered in
    pub fn window(&self) -> Option<u64> {
        match &self.registration {
            Registration::Held(window, _) => Some(window.id),
            Registration::Reported(id) => Some(*id),
            Registration::Untracked => None,
        }
    }
}

impl<T> Drop for TrackingGuard<T> {
    fn drop(&mut self) {
        if let Registration::Held(window, index) = &self.registration {
            // The slot may have been drained and reused since.
            window.list.remove_token(*index, &self.token);
        }
    }
}
