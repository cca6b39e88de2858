use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification category
///
/// Kinds the server sends that this client does not recognize fold into
/// `Other` instead of failing the whole frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Someone liked a trip or photo
    Like,
    /// Someone commented on a trip
    Comment,
    /// Someone started following
    Follow,
    /// Someone shared a trip
    Share,
    /// Anything the client does not recognize
    #[serde(other)]
    Other,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
            NotificationKind::Share => "share",
            NotificationKind::Other => "other",
        }
    }
}

/// The user a notification originates from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sender {
    pub id: i64,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Reference to the trip a notification relates to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripRef {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A single server-assigned notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub sender: Sender,
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip: Option<TripRef>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
