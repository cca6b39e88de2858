/// Wire frame types for the notification push channel
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Notification;

/// Frames the server sends to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Full snapshot sent once per successful connection
    InitialNotifications {
        notifications: Vec<Notification>,
        unread_count: u32,
    },

    /// Single notification pushed after the snapshot
    NewNotification { notification: Notification },

    /// Absolute unread-count correction. The server emits this under two
    /// names with identical semantics.
    #[serde(alias = "unread_count_update")]
    UnreadCount { unread_count: u32 },

    /// Server acknowledges an outbound intent
    Ack { correlation_id: Uuid },
}

/// Frames the client sends to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    MarkAsRead {
        notification_id: i64,
        correlation_id: Uuid,
    },
    MarkAllAsRead {
        correlation_id: Uuid,
    },
    GetUnreadCount,
}

impl ServerFrame {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientFrame {
    /// Create a mark-as-read command
    pub fn mark_as_read(notification_id: i64, correlation_id: Uuid) -> Self {
        ClientFrame::MarkAsRead {
            notification_id,
            correlation_id,
        }
    }

    /// Create a mark-all-as-read command
    pub fn mark_all_as_read(correlation_id: Uuid) -> Self {
        ClientFrame::MarkAllAsRead { correlation_id }
    }

    /// Create an unread-count request
    pub fn get_unread_count() -> Self {
        ClientFrame::GetUnreadCount
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
