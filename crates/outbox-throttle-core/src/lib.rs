//! Adaptive throttling and retry pipeline for draining an outbound work
//! backlog: a token-bucket pacer, sliding-window signal collector, AIMD
//! rate controller, circuit breaker, and bounded worker-pool dispatcher,
//! composed behind [`Engine`].
//!
//! A host plugs in its own backlog and transport by implementing
//! [`WorkStore`] and [`Transport`]; everything else — pacing, retry
//! scheduling, backpressure, and circuit breaking — is handled internally.

pub mod breaker;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod pacer;
pub mod retry;
pub mod transport;
pub mod window;
pub mod workstore;

pub use breaker::{Breaker, BreakerConfig, BreakerState};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use controller::{Controller, ControllerConfig};
pub use engine::{Engine, StatsSnapshot};
pub use error::{EngineError, TransportError, WorkStoreError};
pub use events::{
    BreakerPhase, BreakerTransition, EngineEvent, EventListener, EventListeners, FnListener,
    RateChange, RateChangeReason,
};
pub use pacer::Pacer;
pub use retry::{execute, ExecuteResult, JitterType, RetryConfig};
pub use transport::Transport;
pub use window::{Window, WindowSnapshot};
pub use workstore::{InMemoryWorkStore, Outcome, WorkItem, WorkItemId, WorkStatus, WorkStore};
