//! Core types and trait definitions for the lab VM control plane.
//!
//! This crate is deliberately free of process, network, and database
//! dependencies. Every backend crate implements one of the traits defined
//! here; the orchestrator and the HTTP layer depend only on the traits.

pub mod catalog;
pub mod error;
pub mod hypervisor;
pub mod mail;
pub mod network;
pub mod router;
pub mod session;
pub mod vm;

pub use error::{Backend, Error, ErrorKind, Result};

/// Bundles the four backend types a deployment is assembled from.
///
/// Generic code (the orchestrator, the API router) is parameterised over a
/// single `B: Backends` rather than four independent type parameters.
pub trait Backends: Send + Sync + 'static {
  type Catalog: catalog::Catalog + 'static;
  type Hypervisor: hypervisor::Hypervisor + 'static;
  type Router: router::RouterDriver + 'static;
  type Mailer: mail::Mailer + 'static;
}
