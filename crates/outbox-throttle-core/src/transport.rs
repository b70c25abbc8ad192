//! The transport boundary (spec.md §6): sends one `WorkItem` and reports
//! the resulting `Outcome`. A per-attempt timeout is the caller's
//! responsibility to configure on whatever client a `Transport`
//! implementation wraps; a timeout should surface as
//! `Outcome::TransportError`.

use crate::workstore::{Outcome, WorkItem};
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, item: &WorkItem) -> Outcome;
}
