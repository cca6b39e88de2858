/// Client-visible notification state
///
/// Holds the recent-notification cache and the unread counter, applies
/// server events from the push channel and local optimistic mark commands,
/// and publishes the combined state through a watch channel so any number of
/// UI surfaces (badge, dropdown, full page) can observe one connection.
///
/// The unread counter is a cache of server truth, not a source of it: the
/// snapshot and the absolute count frames are the resynchronization points;
/// everything in between is incremental and may drift across a disconnect
/// window.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::Result;
use crate::models::Notification;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::reconcile::{IntentSnapshot, PendingIntents};
use crate::rest::NotificationApi;

/// Consumer-facing snapshot of the subsystem.
#[derive(Debug, Clone, Default)]
pub struct NotificationState {
    pub connected: bool,
    pub unread_count: u32,
    /// Ordered newest-first, capped at the configured cache capacity
    pub notifications: Vec<Notification>,
}

#[derive(Default)]
struct Cache {
    entries: Vec<Notification>,
    unread: u32,
}

/// The shared notification store.
///
/// Cheap to clone; all clones observe and mutate the same cache.
#[derive(Clone)]
pub struct NotificationStore {
    pub(crate) inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) connection: ConnectionManager,
    pub(crate) rest: Option<NotificationApi>,
    cache_capacity: usize,
    ack_timeout: Duration,
    cache: RwLock<Cache>,
    pub(crate) pending: PendingIntents,
    state_tx: watch::Sender<NotificationState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum RestCall {
    MarkRead(i64),
    MarkAll,
}

impl RestCall {
    async fn invoke(&self, api: &NotificationApi) -> Result<()> {
        match self {
            RestCall::MarkRead(id) => api.mark_read(*id).await,
            RestCall::MarkAll => api.mark_all_read().await,
        }
    }
}

impl NotificationStore {
    pub fn new(config: &Config, connection: ConnectionManager) -> Self {
        Self::build(config, connection, None)
    }

    /// Attach the REST collaborator used when the push channel is down.
    pub fn with_rest_fallback(
        config: &Config,
        connection: ConnectionManager,
        api: NotificationApi,
    ) -> Self {
        Self::build(config, connection, Some(api))
    }

    fn build(config: &Config, connection: ConnectionManager, rest: Option<NotificationApi>) -> Self {
        let (state_tx, _) = watch::channel(NotificationState::default());
        let inner = Arc::new(StoreInner {
            connection,
            rest,
            cache_capacity: config.cache_capacity,
            ack_timeout: config.ack_timeout(),
            cache: RwLock::new(Cache::default()),
            pending: PendingIntents::new(),
            state_tx,
            tasks: Mutex::new(Vec::new()),
        });
        StoreInner::spawn_tasks(&inner);
        Self { inner }
    }

    /// Observe state changes; the receiver always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<NotificationState> {
        self.inner.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> NotificationState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
        self.inner.publish().await;
    }

    /// Ask the server for an authoritative unread count. Silently dropped
    /// while the channel is down, like every wire command.
    pub async fn refresh_unread_count(&self) {
        self.inner
            .connection
            .send(ClientFrame::get_unread_count())
            .await;
    }

    /// Optimistically mark one notification read, then tell the server.
    ///
    /// The cache flips before any confirmation exists. The pre-mutation
    /// state is retained under a correlation id: a dropped command (and a
    /// failed REST fallback, if one is configured) rolls the flip back; an
    /// ack or the ack timeout commits it. A REST fallback failure is the one
    /// error surfaced to the caller.
    pub async fn mark_as_read(&self, notification_id: i64) -> Result<()> {
        let correlation_id = Uuid::new_v4();
        {
            let mut cache = self.inner.cache.write().await;
            let snapshot = IntentSnapshot {
                read_flags: cache
                    .entries
                    .iter()
                    .filter(|n| n.id == notification_id)
                    .map(|n| (n.id, n.is_read))
                    .collect(),
                unread_count: cache.unread,
            };
            if let Some(entry) = cache.entries.iter_mut().find(|n| n.id == notification_id) {
                if !entry.is_read {
                    entry.is_read = true;
                    cache.unread = cache.unread.saturating_sub(1);
                }
            }
            self.inner.pending.insert(correlation_id, snapshot).await;
        }
        self.inner.publish().await;

        self.resolve_intent(
            correlation_id,
            ClientFrame::mark_as_read(notification_id, correlation_id),
            RestCall::MarkRead(notification_id),
        )
        .await
    }

    /// Optimistically mark everything read and zero the counter, then tell
    /// the server. Same reconciliation contract as [`mark_as_read`](Self::mark_as_read).
    pub async fn mark_all_as_read(&self) -> Result<()> {
        let correlation_id = Uuid::new_v4();
        {
            let mut cache = self.inner.cache.write().await;
            let snapshot = IntentSnapshot {
                read_flags: cache.entries.iter().map(|n| (n.id, n.is_read)).collect(),
                unread_count: cache.unread,
            };
            for entry in cache.entries.iter_mut() {
                entry.is_read = true;
            }
            cache.unread = 0;
            self.inner.pending.insert(correlation_id, snapshot).await;
        }
        self.inner.publish().await;

        self.resolve_intent(
            correlation_id,
            ClientFrame::mark_all_as_read(correlation_id),
            RestCall::MarkAll,
        )
        .await
    }

    /// Tear the subsystem down: close the channel and drop cached state.
    /// The owning scope calls this on unmount.
    pub async fn shutdown(&self) {
        self.inner.connection.disconnect().await;
        self.inner.clear().await;
    }

    async fn resolve_intent(
        &self,
        correlation_id: Uuid,
        frame: ClientFrame,
        fallback: RestCall,
    ) -> Result<()> {
        if self.inner.connection.try_send(frame).await {
            self.arm_ack_timeout(correlation_id);
            return Ok(());
        }

        // Real-time path unavailable; try REST before giving the mutation up
        if let Some(api) = &self.inner.rest {
            match fallback.invoke(api).await {
                Ok(()) => {
                    self.inner.pending.commit(correlation_id).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("rest fallback failed: {e}");
                    self.inner.rollback(correlation_id).await;
                    return Err(e);
                }
            }
        }

        self.inner.rollback(correlation_id).await;
        Ok(())
    }

    fn arm_ack_timeout(&self, correlation_id: Uuid) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.ack_timeout).await;
            if inner.pending.commit(correlation_id).await {
                debug!("intent {correlation_id} committed on ack timeout");
            }
        });
    }

    #[cfg(test)]
    pub(crate) async fn apply(&self, frame: ServerFrame) {
        self.inner.apply(frame).await;
    }
}

impl StoreInner {
    fn spawn_tasks(inner: &Arc<Self>) {
        // Pump: apply every routed frame to the cache. Subscribing here,
        // before any connect can happen, means no frame is ever missed.
        let mut subscription = inner.connection.router().subscribe();
        let pump_inner = inner.clone();
        let pump = tokio::spawn(async move {
            while let Some(frame) = subscription.recv().await {
                pump_inner.apply(frame).await;
            }
        });

        // Relay: mirror connection state into the consumer snapshot and
        // request a count correction after every recovered connection
        let relay_inner = inner.clone();
        let relay = tokio::spawn(async move {
            let mut state_rx = relay_inner.connection.watch_state();
            let mut was_reconnecting = false;
            loop {
                if state_rx.changed().await.is_err() {
                    break;
                }
                let state = *state_rx.borrow();
                relay_inner.publish().await;
                match state {
                    ConnectionState::Reconnecting(_) => was_reconnecting = true,
                    ConnectionState::Connected if was_reconnecting => {
                        was_reconnecting = false;
                        // The drift window was open; ask for the real count
                        relay_inner
                            .connection
                            .send(ClientFrame::get_unread_count())
                            .await;
                    }
                    _ => {}
                }
            }
        });

        *lock(&inner.tasks) = vec![pump, relay];
    }

    async fn apply(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::InitialNotifications {
                mut notifications,
                unread_count,
            } => {
                notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                notifications.truncate(self.cache_capacity);
                {
                    let mut cache = self.cache.write().await;
                    cache.entries = notifications;
                    cache.unread = unread_count;
                }
                // Server truth supersedes anything still in flight
                self.pending.clear().await;
                self.publish().await;
            }
            ServerFrame::NewNotification { notification } => {
                {
                    let mut cache = self.cache.write().await;
                    // Ids stay unique in the cache; a re-pushed id replaces
                    // the cached entry, last writer wins
                    if let Some(pos) = cache.entries.iter().position(|n| n.id == notification.id) {
                        let prior = cache.entries.remove(pos);
                        if !prior.is_read {
                            cache.unread = cache.unread.saturating_sub(1);
                        }
                    }
                    if !notification.is_read {
                        cache.unread += 1;
                    }
                    cache.entries.insert(0, notification);
                    cache.entries.truncate(self.cache_capacity);
                }
                self.publish().await;
            }
            ServerFrame::UnreadCount { unread_count } => {
                self.cache.write().await.unread = unread_count;
                self.publish().await;
            }
            ServerFrame::Ack { correlation_id } => {
                if self.pending.commit(correlation_id).await {
                    debug!("intent {correlation_id} acknowledged");
                }
            }
        }
    }

    async fn rollback(&self, correlation_id: Uuid) {
        let Some(snapshot) = self.pending.take(correlation_id).await else {
            return;
        };
        {
            let mut cache = self.cache.write().await;
            for (id, was_read) in snapshot.read_flags {
                if let Some(entry) = cache.entries.iter_mut().find(|n| n.id == id) {
                    entry.is_read = was_read;
                }
            }
            cache.unread = snapshot.unread_count;
        }
        self.publish().await;
        debug!("rolled back optimistic intent {correlation_id}");
    }

    pub(crate) async fn clear(&self) {
        {
            let mut cache = self.cache.write().await;
            cache.entries.clear();
            cache.unread = 0;
        }
        self.pending.clear().await;
        self.publish().await;
    }

    async fn publish(&self) {
        let cache = self.cache.read().await;
        let state = NotificationState {
            connected: self.connection.is_connected(),
            unread_count: cache.unread,
            notifications: cache.entries.clone(),
        };
        self.state_tx.send_replace(state);
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}
