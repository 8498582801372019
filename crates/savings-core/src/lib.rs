//! Core library for savings-sync.
//!
//! Client-side data layer for a savings-account service: a REST client for
//! accounts, transactions, notifications and users; observable per-entity
//! caches kept consistent by applying confirmed mutation results; filtered
//! and aggregated views over those caches; and interval polling of the
//! unread-notification counter.
//!
//! [`Store`] ties the pieces together for a UI.

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod polling;
pub mod projection;
pub mod reconcile;
pub mod storage;
pub mod store;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use cache::{EntityCache, Subscription};
pub use config::Config;
pub use polling::{PollScope, PollState, PollingRefresher};
pub use projection::{AccountFilter, LiveView, Projection, RecentActivity, TransactionFilter};
pub use reconcile::{Caches, NotificationTicket, Reconciler};
pub use storage::KeyValueStore;
pub use store::{EntityKind, OperationStatus, Store};
