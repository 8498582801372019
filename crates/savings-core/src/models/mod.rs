//! Data models for the savings service.
//!
//! Field names follow the wire format of the remote API (camelCase, Spanish)
//! through serde renames; the Rust side uses English names. Monetary values
//! are `rust_decimal::Decimal`; they are sent as decimal strings and read
//! from strings or bare numbers (see [`money`]).
//!
//! - `Account`, `NewAccount`, `AccountUpdate`, `AccountStats`
//! - `Transaction`, `TransactionType`, `NewTransaction`, `TransactionStats`
//! - `Notification`, `NotificationKind`, notification request bodies
//! - `User` and the session/profile request bodies

pub mod account;
pub mod money;
pub mod notification;
pub mod timestamp;
pub mod transaction;
pub mod user;

pub use account::{Account, AccountStats, AccountUpdate, NewAccount};
pub use notification::{
    LowBalanceNotice, NewNotification, Notification, NotificationKind, Severity,
    TransactionNotice, UnreadCount,
};
pub use transaction::{NewTransaction, Transaction, TransactionStats, TransactionType};
pub use user::{LoginRequest, PasswordChange, Registration, User, UserUpdate};

/// A server record with an opaque, immutable identifier.
pub trait Record {
    fn id(&self) -> i64;
}
