//! Fixed-interval driver for the reconciliation loop

use crate::error::CycleError;
use crate::health::{components, HealthRegistry};
use crate::reconcile::ReconciliationLoop;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Runs one reconciliation cycle per tick until shutdown
pub struct Scheduler {
    reconciler: ReconciliationLoop,
    interval: Duration,
    health: HealthRegistry,
}

impl Scheduler {
    pub fn new(reconciler: ReconciliationLoop, interval: Duration, health: HealthRegistry) -> Self {
        Self {
            reconciler,
            interval,
            health,
        }
    }

    /// Poll until shutdown is signalled or a cycle fails fatally.
    ///
    /// The first tick fires immediately and seeds the label schema. A seed
    /// that cannot list containers is retried on the next tick. A cycle that
    /// is already running when shutdown arrives is allowed to finish.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), CycleError> {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            "Starting reconciliation scheduler"
        );
        self.health.register(components::POLLER).await;

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Shutdown wins over a tick that is already due
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    let result = if self.reconciler.is_frozen() {
                        self.reconciler.run_cycle().await.map(|_| ())
                    } else {
                        self.reconciler.seed().await.map(|_| ())
                    };

                    if let Err(e) = result {
                        if !e.is_recoverable() {
                            error!(error = %e, "Reconciliation failed, stopping scheduler");
                            self.health
                                .set_unhealthy(components::POLLER, e.to_string())
                                .await;
                            return Err(e);
                        }
                        warn!(error = %e, "Reconciliation cycle aborted, retrying next tick");
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::models::{Entity, EntitySummary, NodeInfo, RawSnapshot};
    use crate::reconcile::ReconciliationLoopBuilder;
    use crate::runtime::RuntimeClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Runtime with no containers that counts list calls
    struct CountingRuntime {
        lists: AtomicUsize,
        lists_finished: AtomicUsize,
        fail_first_list: AtomicBool,
        list_delay: Duration,
    }

    impl CountingRuntime {
        fn new(fail_first_list: bool) -> Arc<Self> {
            Self::slow(fail_first_list, Duration::ZERO)
        }

        fn slow(fail_first_list: bool, list_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                lists: AtomicUsize::new(0),
                lists_finished: AtomicUsize::new(0),
                fail_first_list: AtomicBool::new(fail_first_list),
                list_delay,
            })
        }
    }

    #[async_trait]
    impl RuntimeClient for CountingRuntime {
        async fn list_entities(&self) -> Result<Vec<EntitySummary>, RuntimeError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if !self.list_delay.is_zero() {
                tokio::time::sleep(self.list_delay).await;
            }
            self.lists_finished.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_list.swap(false, Ordering::SeqCst) {
                return Err(RuntimeError::Transport("engine starting".into()));
            }
            Ok(Vec::new())
        }

        async fn inspect(&self, id: &str) -> Result<Entity, RuntimeError> {
            Err(RuntimeError::NotFound(id.to_string()))
        }

        async fn stats(&self, id: &str) -> Result<RawSnapshot, RuntimeError> {
            Err(RuntimeError::NotFound(id.to_string()))
        }

        async fn node_info(&self) -> Result<NodeInfo, RuntimeError> {
            Ok(NodeInfo::default())
        }
    }

    fn scheduler(runtime: Arc<CountingRuntime>, health: HealthRegistry) -> Scheduler {
        scheduler_every(runtime, health, Duration::from_millis(20))
    }

    fn scheduler_every(
        runtime: Arc<CountingRuntime>,
        health: HealthRegistry,
        interval: Duration,
    ) -> Scheduler {
        let reconciler = ReconciliationLoopBuilder::new()
            .runtime(runtime)
            .health(health.clone())
            .build()
            .unwrap();
        Scheduler::new(reconciler, interval, health)
    }

    #[tokio::test]
    async fn test_scheduler_polls_until_shutdown() {
        let runtime = CountingRuntime::new(false);
        let health = HealthRegistry::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(scheduler(runtime.clone(), health.clone()).run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(110)).await;
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(runtime.lists.load(Ordering::SeqCst) >= 2);
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_seed_retried_after_list_failure() {
        let runtime = CountingRuntime::new(true);
        let health = HealthRegistry::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(scheduler(runtime.clone(), health.clone()).run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(80)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(runtime.lists.load(Ordering::SeqCst) >= 2);
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_not_ready_before_first_seed() {
        let runtime = CountingRuntime::new(false);
        let health = HealthRegistry::new();
        let _scheduler = scheduler(runtime, health.clone());

        assert!(!health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_no_cycle_starts_after_shutdown() {
        // Cycles outlast the interval, so a tick is always due when one ends
        for _ in 0..10 {
            let runtime = CountingRuntime::slow(false, Duration::from_millis(60));
            let health = HealthRegistry::new();
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

            let handle = tokio::spawn(
                scheduler_every(runtime.clone(), health, Duration::from_millis(10))
                    .run(shutdown_rx),
            );

            // Shut down while the first cycle is still listing
            tokio::time::sleep(Duration::from_millis(30)).await;
            let started = runtime.lists.load(Ordering::SeqCst);
            assert_eq!(started, 1);
            shutdown_tx.send(()).unwrap();

            handle.await.unwrap().unwrap();

            assert_eq!(runtime.lists.load(Ordering::SeqCst), started);
            // The cycle in flight was allowed to finish
            assert_eq!(runtime.lists_finished.load(Ordering::SeqCst), started);
        }
    }
}
