//! Compensation as data.
//!
//! Each completed side effect of a use case records the step that undoes
//! it. On failure the saga replays those steps newest-first; a compensation
//! that fails is logged and the unwind carries on.

use labvm_core::{
  Backends,
  catalog::Catalog as _,
  hypervisor::Hypervisor as _,
  router::{RouterDriver as _, RouterObject},
};

use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Compensation {
  /// Undefine a domain and remove its storage.
  DeleteDomain { id: String },
  RemoveRouterObject(RouterObject),
  DeleteVm { id: String },
  DeleteSubject { subject_id: String },
}

impl Compensation {
  fn describe(&self) -> String {
    match self {
      Compensation::DeleteDomain { id } => format!("delete domain {id}"),
      Compensation::RemoveRouterObject(object) => format!("remove {}", object.describe()),
      Compensation::DeleteVm { id } => format!("delete catalog row {id}"),
      Compensation::DeleteSubject { subject_id } => format!("delete subject {subject_id}"),
    }
  }

  async fn run<B: Backends>(&self, orch: &Orchestrator<B>) -> Result<(), labvm_core::Error> {
    match self {
      Compensation::DeleteDomain { id } => orch.hypervisor.delete(id).await.map_err(Into::into),
      Compensation::RemoveRouterObject(object) => {
        orch.router.remove(object).await.map_err(Into::into)
      }
      Compensation::DeleteVm { id } => orch.catalog.delete_vm(id).await.map_err(Into::into),
      Compensation::DeleteSubject { subject_id } => {
        orch.catalog.delete_subject(subject_id).await.map_err(Into::into)
      }
    }
  }
}

#[derive(Debug)]
pub(crate) struct Saga {
  name:      &'static str,
  completed: Vec<Compensation>,
}

impl Saga {
  pub fn new(name: &'static str) -> Self { Self { name, completed: Vec::new() } }

  /// Record that a step succeeded and how to undo it.
  pub fn done(&mut self, undo: Compensation) { self.completed.push(undo); }

  #[cfg(test)]
  pub fn pending(&self) -> &[Compensation] { &self.completed }

  /// Undo every recorded step, newest first.
  pub async fn unwind<B: Backends>(self, orch: &Orchestrator<B>, cause: &labvm_core::Error) {
    tracing::warn!(saga = self.name, error = %cause, steps = self.completed.len(), "unwinding");

    for step in self.completed.into_iter().rev() {
      if let Err(e) = step.run(orch).await {
        tracing::error!(
          saga = self.name,
          step = %step.describe(),
          error = %e,
          "compensation failed"
        );
      }
    }
  }
}
