//! Handlers for `/vms` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/vms` | Every catalog VM with its kind |
//! | `GET`    | `/vms/status` | `[{vmId, status}]` straight from the hypervisor |
//! | `POST`   | `/vms/clone` | Body: `{"sourceVmId":"jammy.img","targetVmId":"t1"}` |
//! | `POST`   | `/vms/bases/reconcile` | Sync base rows with the image directory |
//! | `DELETE` | `/vms/delete/{vmId}` | Templates and instances |
//! | `POST`   | `/vms/{start,stop,restart,force-stop}/{vmId}` | Power operations |

use std::sync::Arc;

use axum::{Json, extract::State};
use labvm_core::{Backends, hypervisor::DomainStatus, vm::Vm};
use labvm_orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, JsonBody, PathParam};

type Orch<B> = State<Arc<Orchestrator<B>>>;

// ─── Catalog ──────────────────────────────────────────────────────────────────

/// `GET /vms`
pub async fn list<B: Backends>(State(orch): Orch<B>) -> Result<Json<Vec<Vm>>, ApiError> {
  Ok(Json(orch.list_vms().await?))
}

/// `GET /vms/status`
pub async fn status<B: Backends>(
  State(orch): Orch<B>,
) -> Result<Json<Vec<DomainStatus>>, ApiError> {
  Ok(Json(orch.status().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneBody {
  pub source_vm_id: String,
  pub target_vm_id: String,
}

/// `POST /vms/clone`: register a template from a base image.
pub async fn clone<B: Backends>(
  State(orch): Orch<B>,
  JsonBody(body): JsonBody<CloneBody>,
) -> Result<Json<()>, ApiError> {
  orch.register_template(&body.source_vm_id, &body.target_vm_id).await?;
  Ok(Json(()))
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
  pub removed: u64,
  pub added:   Vec<String>,
}

/// `POST /vms/bases/reconcile`
pub async fn reconcile<B: Backends>(
  State(orch): Orch<B>,
) -> Result<Json<ReconcileResponse>, ApiError> {
  let outcome = orch.reconcile_base_images().await?;
  Ok(Json(ReconcileResponse { removed: outcome.removed, added: outcome.added }))
}

/// `DELETE /vms/delete/{vmId}`
pub async fn remove<B: Backends>(
  State(orch): Orch<B>,
  PathParam(vm_id): PathParam<String>,
) -> Result<Json<()>, ApiError> {
  orch.delete_vm(&vm_id).await?;
  Ok(Json(()))
}

// ─── Power ────────────────────────────────────────────────────────────────────

/// `POST /vms/start/{vmId}`; instances also begin a session.
pub async fn start<B: Backends>(
  State(orch): Orch<B>,
  PathParam(vm_id): PathParam<String>,
) -> Result<Json<()>, ApiError> {
  orch.start(&vm_id).await?;
  Ok(Json(()))
}

/// `POST /vms/stop/{vmId}`
pub async fn stop<B: Backends>(
  State(orch): Orch<B>,
  PathParam(vm_id): PathParam<String>,
) -> Result<Json<()>, ApiError> {
  orch.stop(&vm_id).await?;
  Ok(Json(()))
}

/// `POST /vms/restart/{vmId}`
pub async fn restart<B: Backends>(
  State(orch): Orch<B>,
  PathParam(vm_id): PathParam<String>,
) -> Result<Json<()>, ApiError> {
  orch.restart(&vm_id).await?;
  Ok(Json(()))
}

/// `POST /vms/force-stop/{vmId}`
pub async fn force_stop<B: Backends>(
  State(orch): Orch<B>,
  PathParam(vm_id): PathParam<String>,
) -> Result<Json<()>, ApiError> {
  orch.force_stop(&vm_id).await?;
  Ok(Json(()))
}
