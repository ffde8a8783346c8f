//! Notification center of the koi client
//!
//! The in-app notification list: REST paging, optimistic read and delete,
//! and live merging of notifications pushed over the hub.

pub mod api;
pub mod feed;
pub mod ordering;

pub use api::{NotificationsApi, RestNotificationsApi};
pub use feed::NotificationFeed;
pub use ordering::{merge_unique, sort_for_filter};
