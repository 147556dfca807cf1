//! JSON HTTP API of the lab control plane.
//!
//! Exposes an axum [`Router`] over an [`Orchestrator`]. Auth, TLS, and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = labvm_api::api_router(orchestrator.clone());
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod instances;
pub mod sessions;
pub mod users;
pub mod vms;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, post, put},
};
use labvm_core::Backends;
use labvm_orchestrator::Orchestrator;

pub use error::ApiError;

/// Build the API router for `orchestrator`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<B: Backends>(orchestrator: Arc<Orchestrator<B>>) -> Router<()> {
  Router::new()
    // Catalog
    .route("/vms", get(vms::list::<B>))
    .route("/vms/status", get(vms::status::<B>))
    .route("/vms/clone", post(vms::clone::<B>))
    .route("/vms/bases/reconcile", post(vms::reconcile::<B>))
    .route("/vms/delete/{vm_id}", delete(vms::remove::<B>))
    // Power
    .route("/vms/start/{vm_id}", post(vms::start::<B>))
    .route("/vms/stop/{vm_id}", post(vms::stop::<B>))
    .route("/vms/restart/{vm_id}", post(vms::restart::<B>))
    .route("/vms/force-stop/{vm_id}", post(vms::force_stop::<B>))
    // Instances
    .route("/instances/create", post(instances::create::<B>))
    // Sessions
    .route("/sessions/renew", post(sessions::renew::<B>))
    // Owners
    .route("/users/{user_id}", put(users::register::<B>))
    .with_state(orchestrator)
}

#[cfg(test)]
mod tests;
