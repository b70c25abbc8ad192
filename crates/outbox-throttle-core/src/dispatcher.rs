//! Dispatcher: bounded worker pool over the work-store (spec.md §4.6).
//!
//! Grounded in the worker-pool shape of `activity_queue.rs` (an
//! `mpsc`/`JoinSet` pool draining an outbound queue with shared atomic
//! stats) but adapted to pull from an abstract `WorkStore` instead of a
//! channel, and to run each send through the breaker/pacer/retry pipeline
//! rather than a flat retry loop.

use crate::breaker::{Breaker, BreakerState};
use crate::controller::Controller;
use crate::pacer::Pacer;
use crate::retry::{self, RetryConfig};
use crate::transport::Transport;
use crate::window::Window;
use crate::workstore::{WorkItem, WorkStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

/// Interval the dispatcher spins on `breaker.should_block()` before
/// retrying, per spec.md §5's named suspension points.
const BREAKER_BLOCK_SPIN_INTERVAL: Duration = Duration::from_millis(50);

/// Lifetime counters surfaced on the observability snapshot (spec.md §6).
#[derive(Default)]
pub struct DispatchStats {
    pub sent_total: AtomicU64,
    pub failed_total: AtomicU64,
    pub dead_lettered_total: AtomicU64,
}

pub struct Dispatcher<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    pacer: Arc<Pacer>,
    breaker: Arc<Breaker>,
    window: Arc<Window>,
    controller: Arc<Controller>,
    retry_config: RetryConfig,
    batch_size: usize,
    concurrency: usize,
    idle_sleep: Duration,
    stats: Arc<DispatchStats>,
}

impl<S, T> Dispatcher<S, T>
where
    S: WorkStore + 'static,
    T: Transport + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        pacer: Arc<Pacer>,
        breaker: Arc<Breaker>,
        window: Arc<Window>,
        controller: Arc<Controller>,
        retry_config: RetryConfig,
        batch_size: usize,
        concurrency: usize,
        idle_sleep: Duration,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            store,
            transport,
            pacer,
            breaker,
            window,
            controller,
            retry_config,
            batch_size,
            concurrency,
            idle_sleep,
            stats,
        }
    }

    /// Drains the work-store until every item is terminal or `shutdown`
    /// fires. On shutdown, stops claiming new batches and waits for
    /// in-flight workers to finish (spec.md §5 "Cancellation").
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency));
        let half_open_semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.breaker.half_open_probe_rate().max(1) as usize,
        ));
        let mut join_set = tokio::task::JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let claimed = match self.store.claim(self.batch_size).await {
                Ok(items) => items,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    warn!(error = ?_err, "claim failed");
                    Vec::new()
                }
            };

            if claimed.is_empty() {
                if join_set.is_empty() && self.store.all_terminal().await {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_sleep) => {}
                    _ = shutdown.changed() => {}
                    Some(_) = join_set.join_next() => {}
                }
                continue;
            }

            for item in claimed {
                let permit = Arc::clone(&semaphore).acquire_owned().await.unwrap();
                let store = Arc::clone(&self.store);
                let transport = Arc::clone(&self.transport);
                let pacer = Arc::clone(&self.pacer);
                let breaker = Arc::clone(&self.breaker);
                let window = Arc::clone(&self.window);
                let controller = Arc::clone(&self.controller);
                let retry_config = self.retry_config;
                let half_open_semaphore = Arc::clone(&half_open_semaphore);
                let stats = Arc::clone(&self.stats);

                join_set.spawn(async move {
                    let _permit = permit;
                    process_item(
                        item,
                        store.as_ref(),
                        transport.as_ref(),
                        &pacer,
                        &breaker,
                        &window,
                        &controller,
                        &retry_config,
                        &half_open_semaphore,
                        &stats,
                    )
                    .await;
                });
            }

            // Drain any tasks that have already finished without blocking.
            while join_set.try_join_next().is_some() {}
        }

        while join_set.join_next().await.is_some() {}
    }
}

/// Runs the full per-item sequence: breaker check, pacer acquire, send,
/// outcome recording, breaker update, finalize — looping for in-flight
/// retries (spec.md §4.4(a)) before falling back to a rescheduled retry or
/// dead-lettering.
#[allow(clippy::too_many_arguments)]
async fn process_item<S: WorkStore, T: Transport>(
    mut item: WorkItem,
    store: &S,
    transport: &T,
    pacer: &Pacer,
    breaker: &Breaker,
    window: &Window,
    controller: &Controller,
    retry_config: &RetryConfig,
    half_open_semaphore: &tokio::sync::Semaphore,
    stats: &DispatchStats,
) {
    loop {
        while breaker.should_block() {
            tokio::time::sleep(BREAKER_BLOCK_SPIN_INTERVAL).await;
        }

        let probing = breaker.state() == BreakerState::HalfOpen;
        let _probe_permit = if probing {
            Some(half_open_semaphore.acquire().await.unwrap())
        } else {
            None
        };

        pacer.acquire().await;
        let _ = controller; // controller drives the pacer independently; kept for future per-attempt signals.

        let outcome = transport.send(&item).await;
        window.record(outcome.latency_ms(), outcome.is_success());

        match outcome.is_success() {
            true => breaker.on_success(),
            false => breaker.on_failure(),
        }

        if outcome.is_success() {
            let _ = store.mark_sent(&item.id).await;
            stats.sent_total.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            debug!(item = %item.id, "item sent");
            return;
        }

        if !outcome.is_retriable() {
            let _ = store.move_to_dead_letter(&item.id).await;
            stats.dead_lettered_total.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            warn!(item = %item.id, "non-retriable rejection, dead-lettered");
            return;
        }

        item.attempt += 1;

        if retry::is_retry_exhausted(retry_config, item.attempt) {
            let _ = store.move_to_dead_letter(&item.id).await;
            stats.dead_lettered_total.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            warn!(item = %item.id, attempts = item.attempt, "retry budget exhausted, dead-lettered");
            return;
        }

        // In-flight retry while attempts remain within RETRY_MAX; keep the
        // worker slot and retry immediately after the backoff delay.
        let delay = retry::next_delay(retry_config, item.attempt, outcome.retry_after());
        stats.failed_total.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::controller::ControllerConfig;
    use crate::workstore::{InMemoryWorkStore, Outcome, WorkItem, WorkStatus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysSucceeds;

    #[async_trait]
    impl Transport for AlwaysSucceeds {
        async fn send(&self, _item: &WorkItem) -> Outcome {
            Outcome::Success { latency_ms: 1 }
        }
    }

    struct FailThenSucceed {
        remaining_failures: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FailThenSucceed {
        async fn send(&self, _item: &WorkItem) -> Outcome {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                Outcome::TransportError { latency_ms: 1 }
            } else {
                Outcome::Success { latency_ms: 1 }
            }
        }
    }

    struct AlwaysRejects;

    #[async_trait]
    impl Transport for AlwaysRejects {
        async fn send(&self, _item: &WorkItem) -> Outcome {
            Outcome::ClientReject { latency_ms: 1 }
        }
    }

    fn make_parts() -> (
        Arc<Pacer>,
        Arc<Breaker>,
        Arc<Window>,
        Arc<Controller>,
        RetryConfig,
        Arc<DispatchStats>,
    ) {
        (
            Arc::new(Pacer::new(1000)),
            Arc::new(Breaker::new(BreakerConfig::default())),
            Arc::new(Window::new(Duration::from_secs(30))),
            Arc::new(Controller::new(ControllerConfig::default())),
            RetryConfig {
                base_delay_ms: 1,
                jitter_ms: 1,
                ..Default::default()
            },
            Arc::new(DispatchStats::default()),
        )
    }

    #[tokio::test]
    async fn successful_item_is_marked_sent() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![])]);
        let item = store.claim(1).await.unwrap().remove(0);

        let (pacer, breaker, window, controller, retry_config, stats) = make_parts();
        let semaphore = tokio::sync::Semaphore::new(3);

        process_item(
            item,
            &store,
            &AlwaysSucceeds,
            &pacer,
            &breaker,
            &window,
            &controller,
            &retry_config,
            &semaphore,
            &stats,
        )
        .await;

        assert_eq!(store.snapshot()[0].status, WorkStatus::Sent);
        assert_eq!(stats.sent_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_reject_dead_letters_without_retry() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![])]);
        let item = store.claim(1).await.unwrap().remove(0);

        let (pacer, breaker, window, controller, retry_config, stats) = make_parts();
        let semaphore = tokio::sync::Semaphore::new(3);

        process_item(
            item,
            &store,
            &AlwaysRejects,
            &pacer,
            &breaker,
            &window,
            &controller,
            &retry_config,
            &semaphore,
            &stats,
        )
        .await;

        assert_eq!(store.snapshot()[0].status, WorkStatus::DeadLettered);
        assert_eq!(stats.dead_lettered_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_retries_in_flight_then_succeeds() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![])]);
        let item = store.claim(1).await.unwrap().remove(0);

        let (pacer, breaker, window, controller, retry_config, stats) = make_parts();
        let semaphore = tokio::sync::Semaphore::new(3);
        let transport = FailThenSucceed {
            remaining_failures: AtomicUsize::new(2),
        };

        process_item(
            item,
            &store,
            &transport,
            &pacer,
            &breaker,
            &window,
            &controller,
            &retry_config,
            &semaphore,
            &stats,
        )
        .await;

        assert_eq!(store.snapshot()[0].status, WorkStatus::Sent);
        assert_eq!(stats.sent_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_moves_to_dead_letter() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![])]);
        let item = store.claim(1).await.unwrap().remove(0);

        let (pacer, breaker, window, controller, mut retry_config, stats) = make_parts();
        retry_config.retry_max = 2;
        let semaphore = tokio::sync::Semaphore::new(3);
        let transport = FailThenSucceed {
            remaining_failures: AtomicUsize::new(100),
        };

        process_item(
            item,
            &store,
            &transport,
            &pacer,
            &breaker,
            &window,
            &controller,
            &retry_config,
            &semaphore,
            &stats,
        )
        .await;

        assert_eq!(store.snapshot()[0].status, WorkStatus::DeadLettered);
        assert_eq!(stats.dead_lettered_total.load(Ordering::SeqCst), 1);
    }
}
