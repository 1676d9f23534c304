//! Resource lifecycle capabilities and failure reporting

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::{BoxError, PoolError};

pub(crate) type CreateFn<T> = Arc<dyn Fn() -> Option<T> + Send + Sync>;
pub(crate) type DestroyFn<T> = Arc<dyn Fn(Arc<T>) -> Result<(), BoxError> + Send + Sync>;
pub(crate) type ValidateFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Boxed future returned by asynchronous destroy functions
pub type DestroyFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;

pub(crate) type AsyncDestroyFn<T> = Arc<dyn Fn(Arc<T>) -> DestroyFuture + Send + Sync>;

/// The `{create, destroy, validate}` capability set of a synchronous pool
///
/// `create` returning `None` means the resource is currently unavailable;
/// the slot stays empty and the next `acquire` tries again.
///
/// # Examples
///
/// ```
/// use recyclable_pool::Lifecycle;
///
/// let lifecycle = Lifecycle::new(|| Some(String::from("conn")), |_conn| Ok(()))
///     .with_validation(|conn: &String| !conn.is_empty());
///
/// assert!(lifecycle.is_valid(&"conn".to_string()));
/// ```
pub struct Lifecycle<T> {
    pub(crate) create: CreateFn<T>,
    pub(crate) destroy: DestroyFn<T>,
    pub(crate) validate: Option<ValidateFn<T>>,
}

impl<T> Clone for Lifecycle<T> {
    fn clone(&self) -> Self {
        Self {
            create: Arc::clone(&self.create),
            destroy: Arc::clone(&self.destroy),
            validate: self.validate.clone(),
        }
    }
}

impl<T> Lifecycle<T> {
    pub fn new<C, D>(create: C, destroy: D) -> Self
    where
        C: Fn() -> Option<T> + Send + Sync + 'static,
        D: Fn(Arc<T>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
            destroy: Arc::new(destroy),
            validate: None,
        }
    }

    /// Attach a validity predicate used by health checks
    pub fn with_validation<V>(mut self, validate: V) -> Self
    where
        V: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// Handles are valid unless a predicate says otherwise
    pub fn is_valid(&self, item: &T) -> bool {
        self.validate.as_ref().is_none_or(|validate| validate(item))
    }
}

/// Capability set of an asynchronous pool: creation is synchronous,
/// destruction suspends.
///
/// # Examples
///
/// ```
/// use recyclable_pool::AsyncLifecycle;
///
/// let lifecycle = AsyncLifecycle::new(|| Some(7u32), |_value| async move { Ok(()) });
/// assert!(lifecycle.is_valid(&7));
/// ```
pub struct AsyncLifecycle<T> {
    pub(crate) create: CreateFn<T>,
    pub(crate) destroy: AsyncDestroyFn<T>,
    pub(crate) validate: Option<ValidateFn<T>>,
}

impl<T> Clone for AsyncLifecycle<T> {
    fn clone(&self) -> Self {
        Self {
            create: Arc::clone(&self.create),
            destroy: Arc::clone(&self.destroy),
            validate: self.validate.clone(),
        }
    }
}

impl<T> AsyncLifecycle<T> {
    pub fn new<C, D, Fut>(create: C, destroy: D) -> Self
    where
        C: Fn() -> Option<T> + Send + Sync + 'static,
        D: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            create: Arc::new(create),
            destroy: Arc::new(move |item| Box::pin(destroy(item)) as DestroyFuture),
            validate: None,
        }
    }

    pub fn with_validation<V>(mut self, validate: V) -> Self
    where
        V: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    pub fn is_valid(&self, item: &T) -> bool {
        self.validate.as_ref().is_none_or(|validate| validate(item))
    }
}

/// Sink for failures a pool tolerates instead of propagating
pub trait FailureReporter: Send + Sync + fmt::Debug {
    fn report(&self, pool: &str, failure: &PoolError);
}

/// Logs failures through `tracing`; optionally breaks debug builds
#[derive(Debug, Clone, Default)]
pub struct TracingReporter {
    /// Fail a debug assertion after logging
    pub break_on_failure: bool,
}

impl TracingReporter {
    pub fn breaking() -> Self {
        Self {
            break_on_failure: true,
        }
    }
}

impl FailureReporter for TracingReporter {
    fn report(&self, pool: &str, failure: &PoolError) {
        tracing::error!(pool, error = %failure, "Tolerated pool failure");
        debug_assert!(!self.break_on_failure, "pool {pool}: {failure}");
    }
}
