//! # studyhall-store
//!
//! SQLite persistence for the study-room backend.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides one stored procedure per backend
//! operation.  Mutating procedures run inside a single transaction so every
//! check they perform and every row they write commit or roll back together;
//! the backend service calls them from one dedicated task, which is what
//! makes each procedure atomic with respect to concurrent clients.

pub mod database;
pub mod members;
pub mod messages;
pub mod migrations;
pub mod requests;
pub mod rooms;

mod error;

pub use database::Database;
pub use error::StoreError;
