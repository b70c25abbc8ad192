//! AIMD rate controller with warmup (spec.md §4.5).
//!
//! Ticks at a fixed cadence, reading `errorRate`/`p95` from the window and
//! `state()` from the breaker, and drives the pacer's rate. Integer rate
//! math (the multiplicative decrease floors) follows
//! `tower_resilience_core::aimd::AimdController`, the crate this is
//! grounded on, which also stores its limit as a whole number for
//! deterministic tests.

use crate::breaker::{Breaker, BreakerState};
use crate::events::{EventListeners, RateChange, RateChangeReason};
use crate::pacer::Pacer;
use crate::window::Window;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub min_rate: u32,
    pub max_rate: u32,
    pub warmup_rate: u32,
    pub initial_rate: u32,
    pub warmup_duration: Duration,
    pub ramp_interval: Duration,
    pub additive_step: u32,
    pub multiplicative_factor: f64,
    pub error_threshold: f64,
    pub latency_threshold_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_rate: 1,
            max_rate: 100,
            warmup_rate: 1,
            initial_rate: 5,
            warmup_duration: Duration::from_secs(60),
            ramp_interval: Duration::from_secs(30),
            additive_step: 1,
            multiplicative_factor: 0.5,
            error_threshold: 0.05,
            latency_threshold_ms: 400,
        }
    }
}

/// Owns the current target rate and emits `RateChange` events when it
/// actually moves. Does not itself own a background task — `Engine` drives
/// `tick`/`maybe_pin_warmup` on its own cadence loop, keeping all
/// suspension points centralized per spec.md §5.
pub struct Controller {
    config: ControllerConfig,
    current_rate: AtomicU32,
    warmup_done: AtomicBool,
    started_at: Instant,
    listeners: EventListeners<RateChange>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        let initial = config.initial_rate.clamp(config.min_rate, config.max_rate);
        Self {
            config,
            current_rate: AtomicU32::new(initial),
            warmup_done: AtomicBool::new(false),
            started_at: Instant::now(),
            listeners: EventListeners::new(),
        }
    }

    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: crate::events::EventListener<RateChange> + 'static,
    {
        self.listeners.add(listener);
    }

    pub fn current_rate(&self) -> u32 {
        self.current_rate.load(Ordering::Relaxed)
    }

    fn in_warmup(&self) -> bool {
        !self.warmup_done.load(Ordering::Relaxed)
            && self.started_at.elapsed() < self.config.warmup_duration
    }

    /// Pins the pacer to `warmup_rate` while warmup is active, and performs
    /// the one-time `warmup_complete` transition once it elapses. Returns
    /// `true` while warmup is still in effect (the controller must not tick
    /// during warmup, per spec.md §4.5).
    pub fn apply_warmup(&self, pacer: &Pacer) -> bool {
        if self.in_warmup() {
            pacer.set_rate(self.config.warmup_rate);
            return true;
        }

        if !self.warmup_done.swap(true, Ordering::Relaxed) {
            let old_rate = self.config.warmup_rate;
            let new_rate = self.current_rate();
            pacer.set_rate(new_rate);
            self.listeners.emit(&RateChange {
                old_rate,
                new_rate,
                reason: RateChangeReason::WarmupComplete,
                error_rate: 0.0,
                p95_ms: 0,
                at: Instant::now(),
            });
        }
        false
    }

    /// Runs one control-loop tick: reads window signals, applies AIMD, and
    /// pushes the (possibly breaker-clamped) effective rate to the pacer.
    /// Returns the effective rate applied.
    ///
    /// Additive increase always applies on healthy signals regardless of
    /// backlog size (the "production variant" chosen for the open question
    /// in spec.md §9 — see DESIGN.md).
    pub fn tick(&self, window: &Window, breaker: &Breaker, pacer: &Pacer) -> u32 {
        let snapshot = window.snapshot();
        let old_rate = self.current_rate();

        let bad_signals = snapshot.error_rate > self.config.error_threshold
            || snapshot.p95_ms > self.config.latency_threshold_ms;

        let new_rate = if bad_signals {
            let decreased = (old_rate as f64 * self.config.multiplicative_factor).floor() as u32;
            decreased.max(self.config.min_rate)
        } else {
            (old_rate + self.config.additive_step).min(self.config.max_rate)
        };

        if new_rate != old_rate {
            self.current_rate.store(new_rate, Ordering::Relaxed);
            self.listeners.emit(&RateChange {
                old_rate,
                new_rate,
                reason: if bad_signals {
                    RateChangeReason::Decrease
                } else {
                    RateChangeReason::Increase
                },
                error_rate: snapshot.error_rate,
                p95_ms: snapshot.p95_ms,
                at: Instant::now(),
            });
        }

        let effective = self.effective_rate(breaker);
        pacer.set_rate(effective);
        effective
    }

    /// Forces the rate to `rate`, clamped to `[min_rate, max_rate]`.
    pub fn set_rate(&self, rate: u32, pacer: &Pacer, breaker: &Breaker) {
        let old_rate = self.current_rate();
        let new_rate = rate.clamp(self.config.min_rate, self.config.max_rate);
        self.current_rate.store(new_rate, Ordering::Relaxed);
        if new_rate != old_rate {
            self.listeners.emit(&RateChange {
                old_rate,
                new_rate,
                reason: RateChangeReason::Forced,
                error_rate: 0.0,
                p95_ms: 0,
                at: Instant::now(),
            });
        }
        pacer.set_rate(self.effective_rate(breaker));
    }

    /// Clamps the pacer rate to `halfOpenProbeRate` while the breaker is
    /// probing (spec.md §4.5 "Breaker interlock").
    fn effective_rate(&self, breaker: &Breaker) -> u32 {
        let rate = self.current_rate();
        if breaker.state() == BreakerState::HalfOpen {
            rate.min(breaker.half_open_probe_rate())
        } else {
            rate
        }
    }

    pub fn ramp_interval(&self) -> Duration {
        self.config.ramp_interval
    }
}

/// Runs the controller's cadence loop until `shutdown` resolves. Lives
/// outside `Controller` itself so the controller type stays free of task
/// lifecycle concerns (mirrors how `Pacer`/`Breaker` are passive and the
/// dispatcher drives them).
pub async fn run_control_loop(
    controller: Arc<Controller>,
    window: Arc<Window>,
    breaker: Arc<Breaker>,
    pacer: Arc<Pacer>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        if controller.apply_warmup(&pacer) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        controller.tick(&window, &breaker, &pacer);

        tokio::select! {
            _ = tokio::time::sleep(controller.ramp_interval()) => {}
            _ = shutdown.changed() => {}
        }
    }
}
