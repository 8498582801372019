//! In-memory entity caches.
//!
//! One `EntityCache` per entity kind holds the last known authoritative
//! value and pushes every new snapshot to its subscribers:
//! - accounts, transactions, notifications (`Vec<_>`)
//! - the unread-notification counter (`u64`)
//! - the current user (`Option<User>`, `None` while logged out)

pub mod entity;

pub use entity::{EntityCache, Subscription};
