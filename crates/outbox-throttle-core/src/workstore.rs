//! Work item model and the `WorkStore` adapter boundary (spec.md §3, §6).
//!
//! `WorkStore` is the external collaborator a host process plugs in (a
//! durable queue in production); this module also ships `InMemoryWorkStore`
//! for tests and the CLI demo, the way `tower-resilience-retry`'s budget
//! module ships concrete `RetryBudget` impls alongside the trait.

use crate::error::WorkStoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Stable, opaque identifier for a `WorkItem`, unique within one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItemId(pub String);

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Status of a `WorkItem`. `Sent` and `DeadLettered` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Pending,
    InFlight,
    Sent,
    Failed,
    DeadLettered,
}

/// One unit of deliverable work (spec.md §3).
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub payload: Vec<u8>,
    pub status: WorkStatus,
    pub attempt: u32,
    /// Unix-epoch seconds; `0` means immediately eligible.
    pub earliest_next_attempt_at: u64,
}

impl WorkItem {
    pub fn new(id: impl Into<WorkItemId>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            status: WorkStatus::Pending,
            attempt: 0,
            earliest_next_attempt_at: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, WorkStatus::Sent | WorkStatus::DeadLettered)
    }
}

/// Outcome of one send attempt (spec.md §3). Ephemeral: never stored.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success { latency_ms: u64 },
    ServerBusy {
        latency_ms: u64,
        retry_after: Option<Duration>,
    },
    ClientReject { latency_ms: u64 },
    TransportError { latency_ms: u64 },
}

impl Outcome {
    pub fn latency_ms(&self) -> u64 {
        match self {
            Outcome::Success { latency_ms }
            | Outcome::ServerBusy { latency_ms, .. }
            | Outcome::ClientReject { latency_ms }
            | Outcome::TransportError { latency_ms } => *latency_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// `ServerBusy`/`TransportError` are retriable; `ClientReject` is not
    /// (spec.md §4.4 "Retriability rules").
    pub fn is_retriable(&self) -> bool {
        matches!(self, Outcome::ServerBusy { .. } | Outcome::TransportError { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Outcome::ServerBusy { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Abstract claim/finalize boundary over a (possibly durable) backlog of
/// work items.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Atomically marks up to `limit` eligible items (`Pending` or `Failed`
    /// with `earliest_next_attempt_at <= now`) as `InFlight` and returns
    /// them.
    async fn claim(&self, limit: usize) -> Result<Vec<WorkItem>, WorkStoreError>;

    async fn mark_sent(&self, id: &WorkItemId) -> Result<(), WorkStoreError>;

    async fn schedule_retry(
        &self,
        id: &WorkItemId,
        attempt: u32,
        delay: Duration,
    ) -> Result<(), WorkStoreError>;

    async fn move_to_dead_letter(&self, id: &WorkItemId) -> Result<(), WorkStoreError>;

    /// Used only by the dispatcher's termination check; optional in
    /// production stores (defaults to `false`, i.e. "never known to be
    /// fully drained", which simply disables the shutdown-on-drain path).
    async fn all_terminal(&self) -> bool {
        false
    }

    /// Optional introspection hint for the observability surface
    /// (spec.md §6 `queueDepth`). Stores that can't cheaply answer this
    /// return `None`.
    async fn queue_depth_hint(&self) -> Option<usize> {
        None
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// In-memory `WorkStore`, suitable for tests and the CLI demo.
pub struct InMemoryWorkStore {
    items: Mutex<HashMap<WorkItemId, WorkItem>>,
}

impl InMemoryWorkStore {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed(&self, items: impl IntoIterator<Item = WorkItem>) {
        let mut store = self.items.lock().unwrap();
        for item in items {
            store.insert(item.id.clone(), item);
        }
    }

    pub fn snapshot(&self) -> Vec<WorkItem> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    pub fn queue_depth(&self) -> usize {
        let now = now_epoch_secs();
        self.items
            .lock()
            .unwrap()
            .values()
            .filter(|item| {
                matches!(item.status, WorkStatus::Pending)
                    || (matches!(item.status, WorkStatus::Failed)
                        && item.earliest_next_attempt_at <= now)
            })
            .count()
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let items = self.items.lock().unwrap();
        let mut sent = 0;
        let mut failed = 0;
        let mut dlq = 0;
        let mut pending = 0;
        for item in items.values() {
            match item.status {
                WorkStatus::Sent => sent += 1,
                WorkStatus::Failed => failed += 1,
                WorkStatus::DeadLettered => dlq += 1,
                WorkStatus::Pending | WorkStatus::InFlight => pending += 1,
            }
        }
        (sent, failed, dlq, pending)
    }
}

impl Default for InMemoryWorkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkStore for InMemoryWorkStore {
    async fn claim(&self, limit: usize) -> Result<Vec<WorkItem>, WorkStoreError> {
        let now = now_epoch_secs();
        let mut store = self.items.lock().unwrap();
        let mut claimed = Vec::new();

        for item in store.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            let eligible = matches!(item.status, WorkStatus::Pending)
                || (matches!(item.status, WorkStatus::Failed)
                    && item.earliest_next_attempt_at <= now);
            if eligible {
                item.status = WorkStatus::InFlight;
                claimed.push(item.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_sent(&self, id: &WorkItemId) -> Result<(), WorkStoreError> {
        let mut store = self.items.lock().unwrap();
        let item = store
            .get_mut(id)
            .ok_or_else(|| WorkStoreError::NotFound(id.to_string()))?;
        item.status = WorkStatus::Sent;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: &WorkItemId,
        attempt: u32,
        delay: Duration,
    ) -> Result<(), WorkStoreError> {
        let mut store = self.items.lock().unwrap();
        let item = store
            .get_mut(id)
            .ok_or_else(|| WorkStoreError::NotFound(id.to_string()))?;
        item.status = WorkStatus::Failed;
        item.attempt = attempt;
        item.earliest_next_attempt_at = now_epoch_secs() + delay.as_secs().max(1);
        Ok(())
    }

    async fn move_to_dead_letter(&self, id: &WorkItemId) -> Result<(), WorkStoreError> {
        let mut store = self.items.lock().unwrap();
        let item = store
            .get_mut(id)
            .ok_or_else(|| WorkStoreError::NotFound(id.to_string()))?;
        item.status = WorkStatus::DeadLettered;
        Ok(())
    }

    async fn all_terminal(&self) -> bool {
        self.items.lock().unwrap().values().all(|item| item.is_terminal())
    }

    async fn queue_depth_hint(&self) -> Option<usize> {
        Some(self.queue_depth())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_marks_items_in_flight() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![1])]);

        let claimed = store.claim(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, WorkStatus::InFlight);

        // a second claim should find nothing eligible
        let claimed_again = store.claim(10).await.unwrap();
        assert!(claimed_again.is_empty());
    }

    #[tokio::test]
    async fn claim_respects_limit() {
        let store = InMemoryWorkStore::new();
        store.seed((0..5).map(|i| WorkItem::new(format!("item-{i}"), vec![])));
        let claimed = store.claim(2).await.unwrap();
        assert_eq!(claimed.len(), 2);
    }

    #[tokio::test]
    async fn mark_sent_is_terminal() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![])]);
        store.claim(10).await.unwrap();
        store.mark_sent(&"a".into()).await.unwrap();

        let item = &store.snapshot()[0];
        assert_eq!(item.status, WorkStatus::Sent);
        assert!(store.all_terminal().await);
    }

    #[tokio::test]
    async fn schedule_retry_sets_future_eligibility() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![])]);
        store.claim(10).await.unwrap();
        store
            .schedule_retry(&"a".into(), 1, Duration::from_secs(60))
            .await
            .unwrap();

        // not eligible yet
        let claimed = store.claim(10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn dead_letter_is_terminal_and_not_claimable() {
        let store = InMemoryWorkStore::new();
        store.seed([WorkItem::new("a", vec![])]);
        store.claim(10).await.unwrap();
        store.move_to_dead_letter(&"a".into()).await.unwrap();

        assert!(store.all_terminal().await);
        let claimed = store.claim(10).await.unwrap();
        assert!(claimed.is_empty());
    }
}
