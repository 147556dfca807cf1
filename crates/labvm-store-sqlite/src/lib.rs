//! SQLite backend for the lab VM catalog.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. That thread is also what serialises
//! VLAN allocation: every read-compute-write runs inside one closure and one
//! `IMMEDIATE` transaction.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteCatalog;

#[cfg(test)]
mod tests;
