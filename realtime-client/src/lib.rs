pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod reconcile;
pub mod rest;
pub mod router;
pub mod session;
pub mod store;

pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ClientError, Result};
pub use models::{Notification, NotificationKind, Sender, TripRef};
pub use protocol::{ClientFrame, ServerFrame};
pub use rest::{NotificationApi, NotificationPage};
pub use router::{MessageRouter, Subscription};
pub use session::SessionTransition;
pub use store::{NotificationState, NotificationStore};
