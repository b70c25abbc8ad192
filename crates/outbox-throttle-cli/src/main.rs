//! Demo binary: drains a synthetic in-memory backlog through a chaos
//! transport, so the throttling/retry/breaker pipeline can be observed end
//! to end without a real downstream dependency.

use clap::Parser;
use outbox_throttle_core::{
    Engine, EngineConfig, InMemoryWorkStore, Outcome, Transport, WorkItem,
};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "outbox-throttle", about = "Adaptive throttling demo over a synthetic backlog")]
struct Cli {
    /// Number of synthetic work items to seed the backlog with.
    #[arg(long, default_value_t = 2000)]
    items: usize,

    /// Starting probability (0-100) that a send fails with a transient error.
    #[arg(long, default_value_t = 15)]
    chaos_failure_percent: u32,

    /// Simulated per-send latency in milliseconds.
    #[arg(long, default_value_t = 40)]
    latency_ms: u64,

    /// Maximum concurrent sends.
    #[arg(long, default_value_t = 6)]
    concurrency: usize,

    /// Starting send rate (tokens/sec).
    #[arg(long, default_value_t = 5)]
    initial_rate: u32,
}

/// Fake transport that injects server-busy, client-reject, and
/// transport-error outcomes at configurable rates, the way the kv-store
/// demo's `chaos_failure_rate` knob drives circuit-breaker trips.
struct ChaosTransport {
    failure_percent: AtomicU32,
    latency_ms: u64,
}

impl ChaosTransport {
    fn new(failure_percent: u32, latency_ms: u64) -> Self {
        Self {
            failure_percent: AtomicU32::new(failure_percent),
            latency_ms,
        }
    }
}

#[async_trait::async_trait]
impl Transport for ChaosTransport {
    async fn send(&self, _item: &WorkItem) -> Outcome {
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        let roll = rand::rng().random_range(0..100);
        let failure_percent = self.failure_percent.load(Ordering::Relaxed);

        if roll >= failure_percent {
            return Outcome::Success {
                latency_ms: self.latency_ms,
            };
        }

        match rand::rng().random_range(0..3) {
            0 => Outcome::ServerBusy {
                latency_ms: self.latency_ms,
                retry_after: Some(Duration::from_millis(500)),
            },
            1 => Outcome::ClientReject {
                latency_ms: self.latency_ms,
            },
            _ => Outcome::TransportError {
                latency_ms: self.latency_ms,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let store = Arc::new(InMemoryWorkStore::new());
    store.seed((0..cli.items).map(|i| WorkItem::new(format!("item-{i}"), vec![])));

    let transport = Arc::new(ChaosTransport::new(cli.chaos_failure_percent, cli.latency_ms));

    let config = EngineConfig::builder()
        .concurrency(cli.concurrency)
        .initial_rate(cli.initial_rate)
        .build();

    tracing::info!(items = cli.items, "starting backlog drain");
    let engine = Engine::start(config, Arc::clone(&store), transport);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = wait_for_drain(&store) => {
            tracing::info!("backlog drained");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, printing final tallies");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, draining in-flight work before exit");
        }
    }

    engine.shutdown();
    engine.join().await;

    let (sent, failed, dead_lettered, pending) = store.counts();
    tracing::info!(sent, failed, dead_lettered, pending, "final tallies");
}

async fn wait_for_drain(store: &InMemoryWorkStore) {
    loop {
        if store.snapshot().iter().all(|item| item.is_terminal()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
