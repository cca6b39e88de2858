/// Push channel lifecycle
///
/// Owns the single WebSocket to the notification endpoint and drives the
/// connect / retry / disconnect state machine:
///
/// ```text
/// Disconnected --connect()--> Connecting --open--> Connected
/// Connected --manual close--> Disconnected
/// Connected --abnormal close--> Reconnecting(1)
/// Reconnecting(n) --delay elapses--> Connecting
/// Reconnecting(n > max_attempts)  --> Disconnected
/// ```
///
/// UI consumers never hold the socket; they observe `watch_state()` and go
/// through [`crate::store::NotificationStore`] for commands.
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use backoff::BackoffPolicy;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::protocol::ClientFrame;
use crate::router::MessageRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting(u32),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Manages the persistent push connection.
///
/// Cheap to clone; all clones share one channel handle. Constructed by the
/// application's composition root and handed to whatever needs it, so tests
/// can run any number of independent instances.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    ws_url: String,
    backoff: BackoffPolicy,
    router: MessageRouter,
    token: RwLock<Option<String>>,
    state_tx: watch::Sender<ConnectionState>,
    writer: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    attempts: AtomicU32,
    // Connection epoch. disconnect() bumps it; tasks tagged with an older
    // epoch must not touch shared state or schedule retries when they wake.
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    pub fn new(config: &Config, router: MessageRouter) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                ws_url: config.ws_url.clone(),
                backoff: config.backoff(),
                router,
                token: RwLock::new(None),
                state_tx,
                writer: RwLock::new(None),
                reader: Mutex::new(None),
                reconnect: Mutex::new(None),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn router(&self) -> &MessageRouter {
        &self.inner.router
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Observe lifecycle transitions without polling.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn set_token(&self, token: String) {
        *self.inner.token.write().await = Some(token);
    }

    pub async fn clear_token(&self) {
        self.inner.token.write().await.take();
    }

    /// Open the push channel.
    ///
    /// Idempotent: a no-op while already Connecting or Connected. Fails with
    /// [`ClientError::NoCredentials`] when no session token is installed and
    /// with [`ClientError::Transport`] when the handshake fails, leaving the
    /// state Disconnected.
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
            _ => {}
        }
        let token = self
            .inner
            .token
            .read()
            .await
            .clone()
            .ok_or(ClientError::NoCredentials)?;

        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);
        match self.inner.open(&token, generation).await {
            Ok(()) => {
                self.inner.attempts.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Deliberate shutdown: cancels any pending reconnect, closes the socket
    /// with a normal close frame, resets the attempt counter and transitions
    /// to Disconnected. No retry follows; only a later `connect()` reopens.
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = lock(&self.inner.reconnect).take() {
            timer.abort();
        }
        if let Some(out_tx) = self.inner.writer.write().await.take() {
            // Best effort; the writer task drains the queue and exits
            let _ = out_tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            })));
        }
        if let Some(reader) = lock(&self.inner.reader).take() {
            reader.abort();
        }
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Disconnected);
        info!("notification channel closed");
    }

    /// Transmit a command, or silently drop it while not Connected. Callers
    /// that need to know use [`try_send`](Self::try_send).
    pub async fn send(&self, frame: ClientFrame) {
        let _ = self.try_send(frame).await;
    }

    /// Like [`send`](Self::send) but reports whether the frame was handed to
    /// the socket, so the store can reconcile dropped intents.
    pub(crate) async fn try_send(&self, frame: ClientFrame) -> bool {
        if !self.is_connected() {
            debug!("dropping outbound command while not connected");
            return false;
        }
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode outbound frame: {e}");
                return false;
            }
        };
        match self.inner.writer.read().await.as_ref() {
            Some(out_tx) => out_tx.send(Message::Text(json.into())).is_ok(),
            None => false,
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn authenticated_url(&self, token: &str) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| ClientError::Config(format!("invalid ws url {}: {e}", self.ws_url)))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Perform the handshake and install the reader/writer tasks. Shared by
    /// the explicit connect path and the reconnect scheduler.
    async fn open(self: &Arc<Self>, token: &str, generation: u64) -> Result<()> {
        let url = self.authenticated_url(token)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        if self.generation.load(Ordering::SeqCst) != generation {
            // disconnect() raced the handshake; abandon the socket
            return Err(ClientError::Transport("connection superseded".to_string()));
        }

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        // Writer half: exits once the channel closes or the sink errors.
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });
        *self.writer.write().await = Some(out_tx.clone());

        let inner = self.clone();
        let reader = tokio::spawn(async move {
            while let Some(item) = source.next().await {
                match item {
                    Ok(Message::Text(text)) => inner.router.route_text(&text),
                    Ok(Message::Ping(payload)) => {
                        // Transport heartbeat; never reaches the router
                        let _ = out_tx.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("server closed push channel: {frame:?}");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("push channel read error: {e}");
                        break;
                    }
                }
            }
            inner.on_channel_lost(generation).await;
        });
        if let Some(stale) = lock(&self.reader).replace(reader) {
            stale.abort();
        }

        self.set_state(ConnectionState::Connected);
        info!("notification channel connected");
        Ok(())
    }

    /// Reader exit hook: schedule a reconnect unless this epoch was ended by
    /// a deliberate disconnect.
    async fn on_channel_lost(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.writer.write().await.take();
        warn!("push channel lost, scheduling reconnect");
        self.spawn_reconnect(generation);
    }

    fn spawn_reconnect(self: &Arc<Self>, generation: u64) {
        let inner = self.clone();
        let timer = tokio::spawn(async move {
            loop {
                let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let Some(delay) = inner.backoff.delay(attempt) else {
                    info!("reconnect attempts exhausted, giving up");
                    inner.attempts.store(0, Ordering::SeqCst);
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                };
                inner.set_state(ConnectionState::Reconnecting(attempt));
                debug!("reconnect attempt {attempt} in {delay:?}");
                tokio::time::sleep(delay).await;
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let Some(token) = inner.token.read().await.clone() else {
                    // Session ended while we were backing off
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                };
                inner.set_state(ConnectionState::Connecting);
                match inner.open(&token, generation).await {
                    Ok(()) => {
                        inner.attempts.store(0, Ordering::SeqCst);
                        return;
                    }
                    Err(e) => debug!("reconnect attempt {attempt} failed: {e}"),
                }
            }
        });
        if let Some(stale) = lock(&self.reconnect).replace(timer) {
            stale.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in [&mut self.reader, &mut self.reconnect] {
            if let Some(task) = slot.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }
}
