//! Periodic reconcile driver.
//!
//! A [`Worker`] owns one reconciler and the store of its kind. On every
//! resync tick it lists all keys and reconciles each one in its own task.
//! A pass finishes before the next tick is taken, so reconciles of the same
//! key never overlap.
//!
//! `Requeue::Immediate` is honoured within the pass, up to a bound; anything
//! else waits for the next resync.

use std::sync::Arc;
use std::time::Duration;

use capi_incus_reconcile::{
    Context, ObjectKey, Requeue, Resource, DEFAULT_RESYNC_INTERVAL, MAX_IMMEDIATE_REQUEUES,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::controller::Reconciler;
use crate::error::ReconcileError;
use crate::store::{ObjectStore, StoreError};

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between full passes over the store.
    pub resync_interval: Duration,

    /// Deadline applied to each single reconcile.
    pub reconcile_timeout: Duration,

    /// Immediate requeues allowed per key per pass.
    pub max_immediate_requeues: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            reconcile_timeout: Duration::from_secs(600),
            max_immediate_requeues: MAX_IMMEDIATE_REQUEUES,
        }
    }
}

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Keys whose last reconcile succeeded.
    pub reconciled: usize,
    /// Keys whose last reconcile returned an error.
    pub failed: usize,
    /// Keys that still asked for a follow-up when the pass ended.
    pub requeued: usize,
}

/// Drives a [`Reconciler`] over every object of its kind.
pub struct Worker<R: Reconciler> {
    store: Arc<dyn ObjectStore<R::Object>>,
    reconciler: Arc<R>,
    config: WorkerConfig,
}

impl<R: Reconciler> Worker<R> {
    pub fn new(
        store: Arc<dyn ObjectStore<R::Object>>,
        reconciler: Arc<R>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            config,
        }
    }

    /// Run passes until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            kind = R::Object::KIND,
            resync_interval_secs = self.config.resync_interval.as_secs(),
            reconcile_timeout_secs = self.config.reconcile_timeout.as_secs(),
            "Starting reconcile worker"
        );

        let ctx = Context::with_cancel(shutdown.clone());
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = resync.tick() => {
                    match self.sync_all(&ctx).await {
                        Ok(summary) => debug!(
                            kind = R::Object::KIND,
                            reconciled = summary.reconciled,
                            failed = summary.failed,
                            requeued = summary.requeued,
                            "Reconcile pass complete"
                        ),
                        Err(e) => error!(kind = R::Object::KIND, error = %e, "Failed to list objects"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(kind = R::Object::KIND, "Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Reconcile every stored key once, concurrently across keys.
    pub async fn sync_all(&self, ctx: &Context) -> Result<PassSummary, StoreError> {
        let keys = self.store.list().await?;
        let mut tasks = JoinSet::new();

        for key in keys {
            let reconciler = Arc::clone(&self.reconciler);
            let ctx = ctx.clone();
            let config = self.config.clone();
            tasks.spawn(async move { sync_key(reconciler.as_ref(), &ctx, &key, &config).await });
        }

        let mut summary = PassSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(requeue)) => {
                    summary.reconciled += 1;
                    if !requeue.is_done() {
                        summary.requeued += 1;
                    }
                }
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    error!(kind = R::Object::KIND, error = %e, "Reconcile task panicked");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Reconcile a single key, following immediate requeues.
    pub async fn sync_one(&self, ctx: &Context, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        sync_key(self.reconciler.as_ref(), ctx, key, &self.config).await
    }
}

async fn sync_key<R: Reconciler>(
    reconciler: &R,
    ctx: &Context,
    key: &ObjectKey,
    config: &WorkerConfig,
) -> Result<Requeue, ReconcileError> {
    let mut attempts = 0;
    loop {
        let reconcile_ctx = ctx.with_timeout(config.reconcile_timeout);
        let requeue = match reconciler.reconcile(&reconcile_ctx, key).await {
            Ok(requeue) => requeue,
            Err(e) if !e.is_retryable() => {
                debug!(kind = R::Object::KIND, key = %key, "Reconcile cancelled");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    kind = R::Object::KIND,
                    key = %key,
                    reason = e.reason(),
                    error = %e,
                    "Reconcile failed, will retry on next resync"
                );
                return Err(e);
            }
        };

        if !requeue.is_immediate() || attempts >= config.max_immediate_requeues {
            return Ok(requeue);
        }
        if ctx.err().is_some() {
            return Ok(requeue);
        }
        attempts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::api::{IncusCluster, IncusClusterSpec};
    use crate::store::MemoryStore;

    /// Asks for an immediate requeue a fixed number of times.
    struct Countdown {
        remaining: AtomicU32,
        calls: AtomicU32,
    }

    impl Countdown {
        fn new(requeues: u32) -> Self {
            Self {
                remaining: AtomicU32::new(requeues),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Reconciler for Countdown {
        type Object = IncusCluster;

        async fn reconcile(&self, _ctx: &Context, _key: &ObjectKey) -> Result<Requeue, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.remaining.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(Requeue::Never);
            }
            self.remaining.store(left - 1, Ordering::SeqCst);
            Ok(Requeue::Immediate)
        }
    }

    async fn store_with(names: &[&str]) -> Arc<dyn ObjectStore<IncusCluster>> {
        let store: Arc<MemoryStore<IncusCluster>> = Arc::new(MemoryStore::new());
        for name in names {
            store
                .create(&IncusCluster::new("default", name, IncusClusterSpec::default()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_immediate_requeue_followed_within_pass() {
        let store = store_with(&["c1"]).await;
        let reconciler = Arc::new(Countdown::new(2));
        let worker = Worker::new(store, reconciler.clone(), WorkerConfig::default());

        let summary = worker.sync_all(&Context::background()).await.unwrap();
        assert_eq!(summary.reconciled, 1);
        assert_eq!(summary.requeued, 0);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_immediate_requeue_is_bounded() {
        let store = store_with(&["c1"]).await;
        let reconciler = Arc::new(Countdown::new(100));
        let config = WorkerConfig {
            max_immediate_requeues: 3,
            ..WorkerConfig::default()
        };
        let worker = Worker::new(store, reconciler.clone(), config);

        let summary = worker.sync_all(&Context::background()).await.unwrap();
        assert_eq!(summary.requeued, 1);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_every_key_visited() {
        let store = store_with(&["a", "b", "c"]).await;
        let reconciler = Arc::new(Countdown::new(0));
        let worker = Worker::new(store, reconciler.clone(), WorkerConfig::default());

        let summary = worker.sync_all(&Context::background()).await.unwrap();
        assert_eq!(summary.reconciled, 3);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = store_with(&["c1"]).await;
        let reconciler = Arc::new(Countdown::new(0));
        let worker = Worker::new(
            store,
            reconciler.clone(),
            WorkerConfig {
                resync_interval: Duration::from_millis(10),
                ..WorkerConfig::default()
            },
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(reconciler.calls.load(Ordering::SeqCst) >= 1);
    }
}
