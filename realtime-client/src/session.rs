/// Session-validity binding
///
/// The connection lifecycle is derived from session lifecycle, not
/// controlled independently: the composing application calls
/// [`NotificationStore::on_session_transition`] on every change instead of
/// this subsystem reaching into a global session store.
use tracing::warn;

use crate::store::NotificationStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// The session became (or stayed) valid with this bearer token
    Valid { access_token: String },
    /// The session ended or expired
    Invalid,
}

impl NotificationStore {
    /// Apply a session-validity change.
    ///
    /// Valid installs the token and opens the push channel; invalid closes
    /// it and drops all cached state. Transport failures on the connect path
    /// are logged and recovered by the reconnect scheduler, never surfaced.
    pub async fn on_session_transition(&self, transition: SessionTransition) {
        match transition {
            SessionTransition::Valid { access_token } => {
                self.inner.connection.set_token(access_token.clone()).await;
                if let Some(api) = &self.inner.rest {
                    api.set_token(Some(access_token)).await;
                }
                if let Err(e) = self.inner.connection.connect().await {
                    warn!("connect on session start failed: {e}");
                }
            }
            SessionTransition::Invalid => {
                self.inner.connection.clear_token().await;
                if let Some(api) = &self.inner.rest {
                    api.set_token(None).await;
                }
                self.inner.connection.disconnect().await;
                self.inner.clear().await;
            }
        }
    }
}
