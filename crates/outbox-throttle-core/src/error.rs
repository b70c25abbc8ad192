//! Error taxonomy for the drain pipeline.
//!
//! Per-attempt failures (`ServerBusy`, `ClientReject`, `TransportError`) are
//! never represented as `Err` here — they are `Outcome` variants that flow
//! through the window/breaker/finalizer (spec.md §7 "Propagation"). The
//! types in this module cover the *fatal* path: invariant violations and
//! collaborator failures that should stop the dispatcher.

use thiserror::Error;

/// Errors raised by the work-store adapter boundary.
#[derive(Debug, Error)]
pub enum WorkStoreError {
    #[error("work item {0} not found")]
    NotFound(String),
    #[error("work item {0} is not claimable (wrong status)")]
    NotClaimable(String),
    #[error("work store backend failed: {0}")]
    Backend(String),
}

/// Errors raised by the transport boundary that are not already modeled as
/// a retriable `Outcome`. Implementations should prefer returning
/// `Outcome::TransportError` from `Transport::send` over this type; this
/// exists for truly unexpected failures (e.g. the transport itself panicked
/// or was misconfigured).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport misconfigured: {0}")]
    Misconfigured(String),
}

/// Top-level error for unrecoverable engine conditions (spec.md §7 "Fatal").
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("work store error: {0}")]
    WorkStore(#[from] WorkStoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("pacer rate must be >= 1, got {0}")]
    InvalidRate(u32),
}
