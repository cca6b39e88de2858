/// Optimistic-intent reconciliation
///
/// Every outbound mark command carries a correlation id; the pre-mutation
/// state is retained here under that id until the intent is resolved:
/// committed (ack received, or the ack timeout passes with the frame on the
/// wire) or taken back for rollback (the send was dropped).
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Pre-mutation state for a single optimistic intent.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentSnapshot {
    /// `(notification id, is_read before the mutation)` for every touched entry
    pub read_flags: Vec<(i64, bool)>,
    /// Unread counter before the mutation
    pub unread_count: u32,
}

#[derive(Clone, Default)]
pub struct PendingIntents {
    inner: Arc<RwLock<HashMap<Uuid, IntentSnapshot>>>,
}

impl PendingIntents {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, correlation_id: Uuid, snapshot: IntentSnapshot) {
        self.inner.write().await.insert(correlation_id, snapshot);
    }

    /// Resolve an intent in favour of the optimistic state. Returns whether
    /// the id was still pending.
    pub async fn commit(&self, correlation_id: Uuid) -> bool {
        self.inner.write().await.remove(&correlation_id).is_some()
    }

    /// Remove and return the snapshot so the caller can restore it.
    pub async fn take(&self, correlation_id: Uuid) -> Option<IntentSnapshot> {
        self.inner.write().await.remove(&correlation_id)
    }

    /// Drop every pending intent. Called when a snapshot arrives: server
    /// truth supersedes anything still in flight.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> IntentSnapshot {
        IntentSnapshot {
            read_flags: vec![(1, false)],
            unread_count: 3,
        }
    }

    #[tokio::test]
    async fn commit_discards_the_snapshot() {
        let pending = PendingIntents::new();
        let id = Uuid::new_v4();
        pending.insert(id, snapshot()).await;

        assert!(pending.commit(id).await);
        assert_eq!(pending.len().await, 0);
        // A second resolution is a no-op
        assert!(!pending.commit(id).await);
    }

    #[tokio::test]
    async fn take_returns_the_retained_state() {
        let pending = PendingIntents::new();
        let id = Uuid::new_v4();
        pending.insert(id, snapshot()).await;

        let restored = pending.take(id).await.unwrap();
        assert_eq!(restored.unread_count, 3);
        assert_eq!(restored.read_flags, vec![(1, false)]);
        assert!(pending.take(id).await.is_none());
    }

    #[tokio::test]
    async fn clear_flushes_everything() {
        let pending = PendingIntents::new();
        pending.insert(Uuid::new_v4(), snapshot()).await;
        pending.insert(Uuid::new_v4(), snapshot()).await;
        assert_eq!(pending.len().await, 2);

        pending.clear().await;
        assert_eq!(pending.len().await, 0);
    }
}
