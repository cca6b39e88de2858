/// Inbound frame routing
///
/// Parses every frame off the push channel, validates its discriminator and
/// fans the parsed event out to all registered subscribers. A frame that
/// fails to parse is logged and dropped; it never terminates the connection.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::ServerFrame;

type ListenerMap = Arc<RwLock<HashMap<Uuid, UnboundedSender<ServerFrame>>>>;

/// Routes parsed server frames to any number of simultaneous subscribers.
///
/// Each `subscribe` call gets its own channel and handle; dropping the
/// handle detaches only that subscriber. The registry lock is never held
/// across an await, so registration and dispatch cannot interleave badly.
#[derive(Clone, Default)]
pub struct MessageRouter {
    listeners: ListenerMap,
}

/// A live subscription to routed frames.
///
/// Receives every frame dispatched while the subscription is alive. Dropping
/// it unsubscribes.
pub struct Subscription {
    id: Uuid,
    rx: UnboundedReceiver<ServerFrame>,
    listeners: ListenerMap,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded_channel();
        let id = Uuid::new_v4();
        write(&self.listeners).insert(id, tx);
        Subscription {
            id,
            rx,
            listeners: self.listeners.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Parse a raw text frame and dispatch it. Malformed frames and unknown
    /// discriminators are dropped with a warning.
    pub fn route_text(&self, raw: &str) {
        match ServerFrame::from_json(raw) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => {
                warn!("dropping malformed frame: {e}");
            }
        }
    }

    pub fn dispatch(&self, frame: ServerFrame) {
        let mut listeners = write(&self.listeners);
        // Prune subscribers whose receiving end is gone
        listeners.retain(|id, tx| {
            let alive = tx.send(frame.clone()).is_ok();
            if !alive {
                debug!("removing dead listener {id}");
            }
            alive
        });
    }
}

fn write(
    listeners: &ListenerMap,
) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, UnboundedSender<ServerFrame>>> {
    listeners.write().unwrap_or_else(PoisonError::into_inner)
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.rx.recv().await
    }

    /// Explicit unsubscribe; equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        write(&self.listeners).remove(&self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        write(&self.listeners).remove(&self.id);
    }
}
