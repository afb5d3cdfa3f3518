//! Controller runtime: watch -> work queue -> workers
//!
//! A [`Controller`] feeds the names reported by its store's watch into a
//! [`WorkQueue`] and runs a fixed pool of workers that reconcile one key at a
//! time. When the stop token fires the watch ends, idle workers exit and busy
//! workers finish their current key first. A [`Manager`] runs several
//! controllers and waits for all of them to drain.

use crate::reconciler::{Outcome, Reconciler};
use crate::resource::ManagedResource;
use crate::store::Store;
use crate::workqueue::{WorkQueue, WorkQueueConfig};
use futures::future::BoxFuture;
use futures::StreamExt;
use kube::Resource;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs the reconciler for one kind
pub struct Controller<K: ManagedResource> {
    reconciler: Arc<Reconciler<K>>,
    store: Arc<dyn Store<K>>,
    queue: WorkQueue,
    workers: usize,
}

impl<K: ManagedResource> Controller<K> {
    pub fn new(reconciler: Reconciler<K>, store: Arc<dyn Store<K>>) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            store,
            queue: WorkQueue::new(WorkQueueConfig::default()),
            workers: 5,
        }
    }

    pub fn with_queue_config(mut self, config: WorkQueueConfig) -> Self {
        self.queue = WorkQueue::new(config);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Handle to the queue, e.g. to enqueue keys from elsewhere
    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    /// Run until `shutdown` fires and every worker has finished its key
    pub async fn run(self, shutdown: CancellationToken) {
        let kind = K::kind(&()).to_string();
        info!(kind = %kind, workers = self.workers, "Starting controller");

        let mut tasks = JoinSet::new();
        tasks.spawn(watch_into_queue(
            self.store.clone(),
            self.queue.clone(),
            shutdown.clone(),
        ));
        for worker in 0..self.workers {
            tasks.spawn(work(
                worker,
                self.reconciler.clone(),
                self.queue.clone(),
                shutdown.clone(),
            ));
        }

        shutdown.cancelled().await;
        self.queue.shut_down();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(kind = %kind, error = %e, "Controller task failed");
            }
        }
        info!(kind = %kind, "Controller stopped");
    }
}

async fn watch_into_queue<K: ManagedResource>(
    store: Arc<dyn Store<K>>,
    queue: WorkQueue,
    shutdown: CancellationToken,
) {
    let mut events = store.watch();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.next() => match event {
                Some(Ok(name)) => queue.add(name),
                Some(Err(e)) => warn!(kind = %K::kind(&()), error = %e, "Watch error"),
                None => {
                    warn!(kind = %K::kind(&()), "Watch stream ended");
                    break;
                }
            },
        }
    }
}

async fn work<K: ManagedResource>(
    worker: usize,
    reconciler: Arc<Reconciler<K>>,
    queue: WorkQueue,
    shutdown: CancellationToken,
) {
    loop {
        let key = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            key = queue.get() => match key {
                Some(key) => key,
                None => break,
            },
        };

        let outcome = reconciler.reconcile(&key).await;
        match outcome {
            Outcome::RequeueAfter(delay) => {
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Outcome::RateLimited => {
                let delay = queue.add_rate_limited(key.clone());
                debug!(
                    worker,
                    key = %key,
                    retries = queue.num_requeues(&key),
                    delay_ms = delay.as_millis() as u64,
                    "Requeued with back-off"
                );
            }
            Outcome::Forget => queue.forget(&key),
        }
        queue.done(&key);
    }
    debug!(worker, "Worker stopped");
}

/// Runs several controllers under one stop token
pub struct Manager {
    shutdown: CancellationToken,
    controllers: Vec<BoxFuture<'static, ()>>,
}

impl Manager {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            controllers: Vec::new(),
        }
    }

    pub fn add<K: ManagedResource>(&mut self, controller: Controller<K>) {
        let shutdown = self.shutdown.clone();
        self.controllers
            .push(Box::pin(async move { controller.run(shutdown).await }));
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Run all controllers until the stop token fires and they have drained
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        for controller in self.controllers {
            tasks.spawn(controller);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Controller panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{is_condition_true, TYPE_READY};
    use crate::error::Result;
    use crate::external::{
        Connector, ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation,
        ExternalUpdate,
    };
    use crate::reconciler::ReconcilerConfig;
    use crate::resource::external_name;
    use crate::resource::testing::{widget, Widget};
    use crate::store::StoreSet;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[derive(Default)]
    struct Cloud {
        objects: Mutex<BTreeSet<String>>,
    }

    #[async_trait]
    impl ExternalClient<Widget> for Arc<Cloud> {
        async fn observe(&self, obj: &mut Widget) -> Result<ExternalObservation> {
            let exists = external_name(obj).is_some_and(|n| self.objects.lock().contains(n));
            Ok(if exists {
                ExternalObservation::exists(true)
            } else {
                ExternalObservation::absent()
            })
        }

        async fn create(&self, obj: &mut Widget) -> Result<ExternalCreation> {
            self.objects
                .lock()
                .insert(external_name(obj).unwrap_or_default().to_string());
            Ok(ExternalCreation::default())
        }

        async fn update(&self, _obj: &mut Widget) -> Result<ExternalUpdate> {
            Ok(ExternalUpdate::default())
        }

        async fn delete(&self, obj: &mut Widget) -> Result<ExternalDeletion> {
            self.objects
                .lock()
                .remove(external_name(obj).unwrap_or_default());
            Ok(ExternalDeletion {
                completed: true,
                operation_id: None,
            })
        }
    }

    #[async_trait]
    impl Connector<Widget> for Arc<Cloud> {
        async fn connect(&self, _obj: &Widget) -> Result<Box<dyn ExternalClient<Widget>>> {
            Ok(Box::new(self.clone()))
        }
    }

    fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            short_wait: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_controller_converges_and_stops() {
        let stores = StoreSet::memory();
        let StoreSet::Memory(registry) = &stores else {
            unreachable!()
        };
        let store = registry.memory_store::<Widget>();
        let cloud = Arc::new(Cloud::default());

        let reconciler = Reconciler::new(stores.clone(), Arc::new(cloud.clone()))
            .with_config(fast_config());
        let controller = Controller::new(reconciler, stores.store::<Widget>()).with_workers(2);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(controller.run(shutdown.clone()));

        store.create(widget("a")).unwrap();
        store.create(widget("b")).unwrap();

        eventually(|| {
            ["a", "b"].iter().all(|n| {
                store
                    .snapshot(n)
                    .is_some_and(|w| is_condition_true(w.conditions(), TYPE_READY))
            })
        })
        .await;
        assert_eq!(cloud.objects.lock().len(), 2);

        // Deletion goes through the finalizer
        store.delete("a").unwrap();
        eventually(|| store.snapshot("a").is_none()).await;
        assert!(!cloud.objects.lock().contains("a"));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_manager_runs_until_cancelled() {
        let stores = StoreSet::memory();
        let cloud = Arc::new(Cloud::default());
        let shutdown = CancellationToken::new();

        let mut manager = Manager::new(shutdown.clone());
        manager.add(Controller::new(
            Reconciler::<Widget>::new(stores.clone(), Arc::new(cloud)),
            stores.store::<Widget>(),
        ));
        assert_eq!(manager.len(), 1);

        let handle = tokio::spawn(manager.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
