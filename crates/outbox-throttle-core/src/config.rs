//! Engine configuration (spec.md §6 "Configuration").
//!
//! A plain builder struct, not a config-file loader (the loader stays an
//! external collaborator per spec.md §1) — the schema is first-party so a
//! host can deserialize it from whatever source it likes behind the
//! `serde` feature, the way `tower-resilience-circuitbreaker`'s config
//! types are optionally `serde`-enabled.

use crate::breaker::BreakerConfig;
use crate::controller::ControllerConfig;
use crate::retry::{JitterType, RetryConfig};
use std::time::Duration;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub initial_rate: u32,
    pub min_rate: u32,
    pub max_rate: u32,
    pub warmup_rate: u32,
    pub warmup_duration_ms: u64,
    pub ramp_interval_ms: u64,
    pub additive_step: u32,
    pub multiplicative_factor: f64,
    pub error_threshold: f64,
    pub latency_threshold_ms: u64,
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub half_open_duration_ms: u64,
    pub half_open_probe_rate: u32,
    pub retry_max: u32,
    pub backoff_cap_seconds: u64,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
    pub jitter_type: JitterType,
    pub window_ms: u64,
    pub dispatcher_idle_sleep_ms: u64,
    pub stats_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            concurrency: 6,
            initial_rate: 5,
            min_rate: 1,
            max_rate: 100,
            warmup_rate: 1,
            warmup_duration_ms: 60_000,
            ramp_interval_ms: 30_000,
            additive_step: 1,
            multiplicative_factor: 0.5,
            error_threshold: 0.05,
            latency_threshold_ms: 400,
            failure_threshold: 10,
            open_duration_ms: 30_000,
            half_open_duration_ms: 10_000,
            half_open_probe_rate: 3,
            retry_max: 8,
            backoff_cap_seconds: 300,
            base_delay_ms: 1000,
            jitter_ms: 1000,
            jitter_type: JitterType::Random,
            window_ms: 30_000,
            dispatcher_idle_sleep_ms: 300,
            stats_interval_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub(crate) fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            min_rate: self.min_rate,
            max_rate: self.max_rate,
            warmup_rate: self.warmup_rate,
            initial_rate: self.initial_rate,
            warmup_duration: Duration::from_millis(self.warmup_duration_ms),
            ramp_interval: Duration::from_millis(self.ramp_interval_ms),
            additive_step: self.additive_step,
            multiplicative_factor: self.multiplicative_factor,
            error_threshold: self.error_threshold,
            latency_threshold_ms: self.latency_threshold_ms,
        }
    }

    pub(crate) fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            open_duration: Duration::from_millis(self.open_duration_ms),
            half_open_duration: Duration::from_millis(self.half_open_duration_ms),
            half_open_probe_rate: self.half_open_probe_rate,
        }
    }

    pub(crate) fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retry_max: self.retry_max,
            backoff_cap_seconds: self.backoff_cap_seconds,
            base_delay_ms: self.base_delay_ms,
            jitter_ms: self.jitter_ms,
            jitter_type: self.jitter_type,
        }
    }

    pub(crate) fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Builder mirroring `CircuitBreakerConfigBuilder`'s `with_*`-free,
/// direct-setter style.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn batch_size(mut self, value: usize) -> Self {
        self.config.batch_size = value;
        self
    }

    pub fn concurrency(mut self, value: usize) -> Self {
        self.config.concurrency = value;
        self
    }

    pub fn initial_rate(mut self, value: u32) -> Self {
        self.config.initial_rate = value;
        self
    }

    pub fn min_rate(mut self, value: u32) -> Self {
        self.config.min_rate = value;
        self
    }

    pub fn max_rate(mut self, value: u32) -> Self {
        self.config.max_rate = value;
        self
    }

    pub fn warmup_rate(mut self, value: u32) -> Self {
        self.config.warmup_rate = value;
        self
    }

    pub fn warmup_duration(mut self, value: Duration) -> Self {
        self.config.warmup_duration_ms = value.as_millis() as u64;
        self
    }

    pub fn ramp_interval(mut self, value: Duration) -> Self {
        self.config.ramp_interval_ms = value.as_millis() as u64;
        self
    }

    pub fn additive_step(mut self, value: u32) -> Self {
        self.config.additive_step = value;
        self
    }

    pub fn multiplicative_factor(mut self, value: f64) -> Self {
        self.config.multiplicative_factor = value;
        self
    }

    pub fn error_threshold(mut self, value: f64) -> Self {
        self.config.error_threshold = value;
        self
    }

    pub fn latency_threshold(mut self, value: Duration) -> Self {
        self.config.latency_threshold_ms = value.as_millis() as u64;
        self
    }

    pub fn failure_threshold(mut self, value: u32) -> Self {
        self.config.failure_threshold = value;
        self
    }

    pub fn open_duration(mut self, value: Duration) -> Self {
        self.config.open_duration_ms = value.as_millis() as u64;
        self
    }

    pub fn half_open_duration(mut self, value: Duration) -> Self {
        self.config.half_open_duration_ms = value.as_millis() as u64;
        self
    }

    pub fn half_open_probe_rate(mut self, value: u32) -> Self {
        self.config.half_open_probe_rate = value;
        self
    }

    pub fn retry_max(mut self, value: u32) -> Self {
        self.config.retry_max = value;
        self
    }

    pub fn backoff_cap(mut self, value: Duration) -> Self {
        self.config.backoff_cap_seconds = value.as_secs();
        self
    }

    pub fn base_delay(mut self, value: Duration) -> Self {
        self.config.base_delay_ms = value.as_millis() as u64;
        self
    }

    pub fn jitter(mut self, jitter_type: JitterType, amount: Duration) -> Self {
        self.config.jitter_type = jitter_type;
        self.config.jitter_ms = amount.as_millis() as u64;
        self
    }

    pub fn window(mut self, value: Duration) -> Self {
        self.config.window_ms = value.as_millis() as u64;
        self
    }

    pub fn dispatcher_idle_sleep(mut self, value: Duration) -> Self {
        self.config.dispatcher_idle_sleep_ms = value.as_millis() as u64;
        self
    }

    pub fn stats_interval(mut self, value: Duration) -> Self {
        self.config.stats_interval_ms = value.as_millis() as u64;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.initial_rate, 5);
        assert_eq!(config.retry_max, 8);
        assert_eq!(config.failure_threshold, 10);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = EngineConfig::builder()
            .concurrency(12)
            .initial_rate(20)
            .retry_max(3)
            .build();
        assert_eq!(config.concurrency, 12);
        assert_eq!(config.initial_rate, 20);
        assert_eq!(config.retry_max, 3);
        // untouched fields keep their defaults
        assert_eq!(config.batch_size, 200);
    }
}
