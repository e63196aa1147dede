//! Notification payload types.

mod types;

pub use types::{Notification, NotificationBuilder, NotificationKind};
