//! Wrappers that run a resource's activation step exactly once

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

use crate::errors::{BoxError, PoolError, PoolResult};

/// Runs an activation step on the wrapped resource at most once; callers
/// that race the first one block until its outcome is known. Failures,
/// panics included, are sticky.
///
/// # Examples
///
/// ```
/// use recyclable_pool::OpenOnce;
/// use std::sync::Arc;
///
/// let channel = OpenOnce::new(Some(Arc::new("channel")));
/// channel.activate_once(|_| Ok(())).unwrap();
/// assert!(channel.is_activated());
/// ```
pub struct OpenOnce<T> {
    resource: Option<Arc<T>>,
    outcome: OnceLock<PoolResult<()>>,
}

impl<T> OpenOnce<T> {
    /// Wrap a resource; `None` makes activation a no-op
    pub fn new(resource: Option<Arc<T>>) -> Self {
        Self {
            resource,
            outcome: OnceLock::new(),
        }
    }

    /// Run `activate` if no caller has yet; every caller sees its outcome
    pub fn activate_once<F>(&self, activate: F) -> PoolResult<()>
    where
        F: FnOnce(&T) -> Result<(), BoxError>,
    {
        let Some(resource) = &self.resource else {
            return Ok(());
        };
        self.outcome
            .get_or_init(|| match panic::catch_unwind(AssertUnwindSafe(|| activate(resource))) {
                Ok(result) => result.map_err(|e| PoolError::Activation(e.to_string())),
                Err(_) => Err(PoolError::Activation("activation panicked".to_string())),
            })
            .clone()
    }

    pub fn is_activated(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }

    pub fn resource(&self) -> Option<&Arc<T>> {
        self.resource.as_ref()
    }
}

/// Async open-once wrapper.
///
/// The first caller claims the activation with a compare-and-swap and runs
/// it; everyone else awaits the published outcome instead of blocking a
/// thread. A failed or cancelled activation is never retried.
pub struct AsyncOpenOnce<T> {
    resource: Option<Arc<T>>,
    claimed: AtomicBool,
    outcome: watch::Sender<Option<PoolResult<()>>>,
}

/// Publishes `Cancelled` if the claiming future is dropped mid-activation
struct Publisher<'a> {
    outcome: &'a watch::Sender<Option<PoolResult<()>>>,
    published: bool,
}

impl Publisher<'_> {
    fn publish(mut self, result: PoolResult<()>) {
        self.outcome.send_replace(Some(result));
        self.published = true;
    }
}

impl Drop for Publisher<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.outcome.send_replace(Some(Err(PoolError::Cancelled)));
        }
    }
}

impl<T> AsyncOpenOnce<T> {
    pub fn new(resource: Option<Arc<T>>) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            resource,
            claimed: AtomicBool::new(false),
            outcome,
        }
    }

    pub async fn activate_once<F, Fut>(&self, activate: F) -> PoolResult<()>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        let Some(resource) = &self.resource else {
            return Ok(());
        };

        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let publisher = Publisher {
                outcome: &self.outcome,
                published: false,
            };
            let result = activate(Arc::clone(resource))
                .await
                .map_err(|e| PoolError::Activation(e.to_string()));
            publisher.publish(result.clone());
            return result;
        }

        let mut receiver = self.outcome.subscribe();
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PoolError::Cancelled)?
            .clone();
        outcome.unwrap_or(Err(PoolError::Cancelled))
    }

    pub fn is_activated(&self) -> bool {
        matches!(*self.outcome.borrow(), Some(Ok(())))
    }

    pub fn resource(&self) -> Option<&Arc<T>> {
        self.resource.as_ref()
    }
}
