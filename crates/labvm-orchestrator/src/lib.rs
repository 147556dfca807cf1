//! Use cases of the lab control plane.
//!
//! [`Orchestrator`] sequences catalog, hypervisor, and router calls as
//! compensating sagas. [`SessionManager`] owns session timers and the
//! background timekeeper that stops expired instances.

mod clock;
mod network;
mod orchestrator;
mod saga;
mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, OperatorZone, SystemClock};
pub use network::{NetworkSettings, WireguardUplink, instance_network, subject_recipe};
pub use orchestrator::{CreateInstance, Orchestrator, Reconciliation};
pub use session::{SessionManager, SessionSettings};

use labvm_core::Error;

/// Lift a backend result into the shared error taxonomy.
pub(crate) trait CoreResult<T> {
  fn core(self) -> labvm_core::Result<T>;
}

impl<T, E: Into<Error>> CoreResult<T> for Result<T, E> {
  fn core(self) -> labvm_core::Result<T> { self.map_err(Into::into) }
}
