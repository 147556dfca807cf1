//! RouterOS implementation of [`RouterDriver`](labvm_core::router::RouterDriver).
//!
//! Layers, bottom-up:
//!   codec      length-prefixed words and sentences of the RouterOS API
//!     └─ client     `ApiClient`, one authenticated TCP session
//!          └─ driver     `RouterOs<T>`, idempotent upserts by natural key
//!
//! The driver talks to any [`Transport`]; tests use `MemoryRouter`.

pub mod codec;
mod client;
mod driver;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod transport;

pub use client::{ApiClient, ClientConfig};
pub use driver::RouterOs;
pub use error::{Error, Result};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryRouter;
pub use transport::{Row, Transport};
