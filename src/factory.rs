//! A factory handle paired with a pool of objects derived from it

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::lifecycle::{AsyncDestroyFn, AsyncLifecycle, DestroyFn, DestroyFuture, Lifecycle};
use crate::pool::{AsyncSlotPool, SlotPool};

/// One factory plus a slot pool of objects it produced
///
/// Objects are derived from whatever factory is current when a slot is
/// filled; once the factory is destroyed, fills yield nothing. Destroying
/// the factory does not recycle the object pool.
///
/// # Examples
///
/// ```
/// use recyclable_pool::{FactoryPool, PoolConfiguration};
///
/// let pair = FactoryPool::new(
///     || Ok(String::from("endpoint")),
///     |_factory| Ok(()),
///     PoolConfiguration::new(2),
///     |factory: &String| Some(format!("{factory}/channel")),
///     |_object| Ok(()),
/// )
/// .unwrap();
///
/// assert_eq!(pair.objects().acquire(0).unwrap().as_str(), "endpoint/channel");
/// pair.destroy().unwrap();
/// assert!(pair.objects().acquire(1).is_none());
/// ```
pub struct FactoryPool<F, O> {
    factory: Arc<ArcSwapOption<F>>,
    destroy_factory: DestroyFn<F>,
    objects: SlotPool<O>,
}

impl<F, O> FactoryPool<F, O>
where
    F: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Create the factory immediately and build the object pool around it
    pub fn new<CF, DF, CO, DO>(
        create_factory: CF,
        destroy_factory: DF,
        objects: PoolConfiguration,
        create_object: CO,
        destroy_object: DO,
    ) -> PoolResult<Self>
    where
        CF: FnOnce() -> Result<F, BoxError>,
        DF: Fn(Arc<F>) -> Result<(), BoxError> + Send + Sync + 'static,
        CO: Fn(&F) -> Option<O> + Send + Sync + 'static,
        DO: Fn(Arc<O>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let factory = create_factory().map_err(|e| PoolError::FactoryCreation(e.to_string()))?;
        let factory = Arc::new(ArcSwapOption::from_pointee(factory));

        let current = Arc::clone(&factory);
        let lifecycle = Lifecycle::new(
            move || current.load_full().and_then(|factory| create_object(&*factory)),
            destroy_object,
        );

        Ok(Self {
            factory,
            destroy_factory: Arc::new(destroy_factory),
            objects: SlotPool::new(objects, lifecycle)?,
        })
    }

    /// Destroy the factory; later fills of the object pool yield nothing.
    ///
    /// # Panics
    ///
    /// Panics if the factory was already destroyed.
    pub fn destroy(&self) -> PoolResult<()> {
        let Some(factory) = self.factory.swap(None) else {
            panic!("factory of pool '{}' destroyed twice", self.objects.name());
        };
        (self.destroy_factory)(factory).map_err(|e| PoolError::FactoryDestroy(e.to_string()))
    }

    pub fn factory(&self) -> Option<Arc<F>> {
        self.factory.load_full()
    }

    pub fn is_destroyed(&self) -> bool {
        self.factory.load().is_none()
    }

    pub fn objects(&self) -> &SlotPool<O> {
        &self.objects
    }
}

/// Dropping a pair whose factory is still live destroys the factory first;
/// the object pool then sweeps itself.
impl<F, O> Drop for FactoryPool<F, O> {
    fn drop(&mut self) {
        if let Some(factory) = self.factory.swap(None) {
            if let Err(err) = (self.destroy_factory)(factory) {
                self.objects
                    .report_failure(&PoolError::FactoryDestroy(err.to_string()));
            }
        }
    }
}

/// Asynchronous counterpart of [`FactoryPool`]
pub struct AsyncFactoryPool<F, O> {
    factory: Arc<ArcSwapOption<F>>,
    destroy_factory: AsyncDestroyFn<F>,
    objects: AsyncSlotPool<O>,
}

impl<F, O> AsyncFactoryPool<F, O>
where
    F: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new<CF, DF, DFut, CO, DO, DOFut>(
        create_factory: CF,
        destroy_factory: DF,
        objects: PoolConfiguration,
        create_object: CO,
        destroy_object: DO,
    ) -> PoolResult<Self>
    where
        CF: FnOnce() -> Result<F, BoxError>,
        DF: Fn(Arc<F>) -> DFut + Send + Sync + 'static,
        DFut: Future<Output = Result<(), BoxError>> + Send + 'static,
        CO: Fn(&F) -> Option<O> + Send + Sync + 'static,
        DO: Fn(Arc<O>) -> DOFut + Send + Sync + 'static,
        DOFut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let factory = create_factory().map_err(|e| PoolError::FactoryCreation(e.to_string()))?;
        let factory = Arc::new(ArcSwapOption::from_pointee(factory));

        let current = Arc::clone(&factory);
        let lifecycle = AsyncLifecycle::new(
            move || current.load_full().and_then(|factory| create_object(&*factory)),
            destroy_object,
        );

        Ok(Self {
            factory,
            destroy_factory: Arc::new(move |factory| Box::pin(destroy_factory(factory)) as DestroyFuture),
            objects: AsyncSlotPool::new(objects, lifecycle)?,
        })
    }

    /// # Panics
    ///
    /// Panics if the factory was already destroyed.
    pub async fn destroy(&self) -> PoolResult<()> {
        let Some(factory) = self.factory.swap(None) else {
            panic!("factory of pool '{}' destroyed twice", self.objects.name());
        };
        (self.destroy_factory)(factory)
            .await
            .map_err(|e| PoolError::FactoryDestroy(e.to_string()))
    }

    pub fn factory(&self) -> Option<Arc<F>> {
        self.factory.load_full()
    }

    pub fn is_destroyed(&self) -> bool {
        self.factory.load().is_none()
    }

    pub fn objects(&self) -> &AsyncSlotPool<O> {
        &self.objects
    }
}

impl<F, O> Drop for AsyncFactoryPool<F, O> {
    fn drop(&mut self) {
        let Some(factory) = self.factory.swap(None) else {
            return;
        };
        let destroyed = (self.destroy_factory)(factory);
        let reporter = Arc::clone(&self.objects.config().reporter);
        let name = self.objects.config().name.clone();
        self.objects.runtime().spawn(async move {
            if let Err(err) = destroyed.await {
                reporter.report(&name, &PoolError::FactoryDestroy(err.to_string()));
            }
        });
    }
}
