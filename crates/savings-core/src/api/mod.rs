//! REST API client module for the savings service.
//!
//! This module provides the `ApiClient` for communicating with the savings
//! backend (accounts, transactions, notifications, users) and the `ApiError`
//! taxonomy every remote failure is normalised into.
//!
//! Each call is a single attempt: retry policy belongs to the caller.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
