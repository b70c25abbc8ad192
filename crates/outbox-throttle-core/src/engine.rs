//! `Engine`: owns the pacer/window/breaker/controller and the dispatcher
//! task, and exposes the observability snapshot (spec.md §3 "Ownership",
//! §6 "Observability").
//!
//! Grounded in how `activity_queue.rs`'s `create_activity_queue` wires a
//! worker pool plus a periodic stats task around a shared `Stats`
//! structure, generalized here to also own the control-loop task.

use crate::breaker::{Breaker, BreakerState};
use crate::config::EngineConfig;
use crate::controller::{self, Controller};
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::pacer::Pacer;
use crate::transport::Transport;
use crate::window::Window;
use crate::workstore::WorkStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[cfg(feature = "tracing")]
use tracing::info;

/// Point-in-time read of the engine's health and throughput, the payload
/// behind spec.md §6's periodic stats emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub queue_depth: Option<usize>,
    pub rate_per_sec: u32,
    pub p95_latency_ms: u64,
    pub error_rate_percent: f64,
    pub breaker_state: BreakerState,
    pub sent_total: u64,
    pub failed_total: u64,
    pub dead_lettered_total: u64,
}

/// The running engine: one pacer, one window, one breaker, one controller,
/// and the dispatcher/control-loop tasks draining a single `WorkStore`
/// through a single `Transport`.
pub struct Engine {
    pacer: Arc<Pacer>,
    window: Arc<Window>,
    breaker: Arc<Breaker>,
    controller: Arc<Controller>,
    stats: Arc<DispatchStats>,
    store: Arc<dyn WorkStore>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Builds the engine's components and spawns its dispatcher, control
    /// loop, and periodic stats-logging tasks. Call `shutdown` to request a
    /// graceful stop, then `join` to wait for in-flight work to drain.
    ///
    /// Listeners must be registered before the engine starts (pass them via
    /// `configure`, which runs while `Breaker`/`Controller` are still
    /// exclusively owned) since both types only expose `add_listener` on
    /// `&mut self` and become shared across tasks once the engine is
    /// running.
    pub fn start<S, T>(config: EngineConfig, store: Arc<S>, transport: Arc<T>) -> Self
    where
        S: WorkStore + 'static,
        T: Transport + 'static,
    {
        Self::start_with(config, store, transport, |_, _| {})
    }

    pub fn start_with<S, T>(
        config: EngineConfig,
        store: Arc<S>,
        transport: Arc<T>,
        configure: impl FnOnce(&mut Breaker, &mut Controller),
    ) -> Self
    where
        S: WorkStore + 'static,
        T: Transport + 'static,
    {
        let pacer = Arc::new(Pacer::new(config.initial_rate));
        let window = Arc::new(Window::new(config.window_duration()));
        let mut breaker = Breaker::new(config.breaker_config());
        let mut controller = Controller::new(config.controller_config());
        configure(&mut breaker, &mut controller);
        let breaker = Arc::new(breaker);
        let controller = Arc::new(controller);
        let stats = Arc::new(DispatchStats::default());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&pacer),
            Arc::clone(&breaker),
            Arc::clone(&window),
            Arc::clone(&controller),
            config.retry_config(),
            config.batch_size,
            config.concurrency,
            Duration::from_millis(config.dispatcher_idle_sleep_ms),
            Arc::clone(&stats),
        );

        let dispatcher_handle = {
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
        };

        let control_loop_handle = {
            let controller = Arc::clone(&controller);
            let window = Arc::clone(&window);
            let breaker = Arc::clone(&breaker);
            let pacer = Arc::clone(&pacer);
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                controller::run_control_loop(controller, window, breaker, pacer, shutdown_rx).await
            })
        };

        let stats_handle = {
            let window = Arc::clone(&window);
            let breaker = Arc::clone(&breaker);
            let controller = Arc::clone(&controller);
            let stats = Arc::clone(&stats);
            let store = Arc::clone(&store);
            let interval = Duration::from_millis(config.stats_interval_ms);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    let snapshot = build_snapshot(&window, &breaker, &controller, &stats, store.as_ref()).await;
                    #[cfg(feature = "tracing")]
                    info!(
                        queue_depth = ?snapshot.queue_depth,
                        rate_per_sec = snapshot.rate_per_sec,
                        p95_latency_ms = snapshot.p95_latency_ms,
                        error_rate_percent = snapshot.error_rate_percent,
                        sent_total = snapshot.sent_total,
                        "engine stats"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = &snapshot;

                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            })
        };

        Self {
            pacer,
            window,
            breaker,
            controller,
            stats,
            store,
            shutdown_tx,
            tasks: vec![dispatcher_handle, control_loop_handle, stats_handle],
        }
    }

    /// Point-in-time read of the engine's current health (spec.md §6).
    pub async fn stats(&self) -> StatsSnapshot {
        build_snapshot(
            &self.window,
            &self.breaker,
            &self.controller,
            &self.stats,
            self.store.as_ref(),
        )
        .await
    }

    /// Signals all background tasks to stop claiming new work. In-flight
    /// sends still run to completion (spec.md §5 "Cancellation").
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits for the dispatcher, control loop, and stats task to exit.
    /// Call after `shutdown`.
    pub async fn join(mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

async fn build_snapshot(
    window: &Window,
    breaker: &Breaker,
    controller: &Controller,
    stats: &DispatchStats,
    store: &dyn WorkStore,
) -> StatsSnapshot {
    let window_snapshot = window.snapshot();
    StatsSnapshot {
        queue_depth: store.queue_depth_hint().await,
        rate_per_sec: controller.current_rate(),
        p95_latency_ms: window_snapshot.p95_ms,
        error_rate_percent: window_snapshot.error_rate * 100.0,
        breaker_state: breaker.state(),
        sent_total: stats.sent_total.load(Ordering::Relaxed),
        failed_total: stats.failed_total.load(Ordering::Relaxed),
        dead_lettered_total: stats.dead_lettered_total.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workstore::{InMemoryWorkStore, Outcome, WorkItem};
    use async_trait::async_trait;

    struct AlwaysSucceeds;

    #[async_trait]
    impl Transport for AlwaysSucceeds {
        async fn send(&self, _item: &WorkItem) -> Outcome {
            Outcome::Success { latency_ms: 1 }
        }
    }

    #[tokio::test]
    async fn engine_drains_a_small_backlog() {
        let store = Arc::new(InMemoryWorkStore::new());
        store.seed((0..5).map(|i| WorkItem::new(format!("item-{i}"), vec![])));

        let config = EngineConfig::builder()
            .initial_rate(50)
            .warmup_duration(Duration::from_millis(0))
            .build();
        let engine = Engine::start(config, Arc::clone(&store), Arc::new(AlwaysSucceeds));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.snapshot().iter().all(|item| item.is_terminal()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("backlog should drain within timeout");

        let snapshot = engine.stats().await;
        assert_eq!(snapshot.sent_total, 5);

        engine.shutdown();
        engine.join().await;
    }
}
