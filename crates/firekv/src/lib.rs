//! Firebase Realtime Database REST API client.
//!
//! This crate provides:
//! - CRUD and structured range queries over the JSON REST interface
//! - Service account authentication with cached, single-flight token refresh
//!   and an optional external token store
//! - Cursor-based pagination built on key-ordered range queries
//! - Top/bottom/exact/range query helpers
//! - Concurrent batch writes and read-modify-write helpers

pub mod batch;
pub mod client;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod pagination;
pub mod query;
pub mod token;

mod transaction;

pub use batch::WriteOp;
pub use client::{RtdbClient, RtdbConfig};
pub use credentials::ServiceAccountCredentials;
pub use error::{FirekvError, FirekvResult};
pub use pagination::Page;
pub use query::{QueryOptions, ORDER_BY_KEY, ORDER_BY_VALUE};
pub use token::{TokenRecord, TokenStore, TokenStoreError};
