//! # DRIFT Store
//!
//! Durable local stores: `transfers.db` (every transfer's lifecycle) and
//! `search.db` (operator searches and the per-peer responses that stream
//! in). Both are SQLite databases with a `meta` table carrying the schema
//! version; a mismatch refuses to open until a migration is supplied.

pub mod error;
pub mod searches;
pub mod transfers;

pub use error::{StoreError, StoreResult};
pub use searches::{SearchRecord, SearchState, SqliteSearchStore};
pub use transfers::SqliteTransferStore;
