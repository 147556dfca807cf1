//! `POST /sessions/renew?token=…`: the link mailed to instance owners.

use std::sync::Arc;

use axum::{Json, extract::State};
use labvm_core::Backends;
use labvm_orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, QueryParams};

#[derive(Debug, Deserialize)]
pub struct RenewParams {
  #[serde(default)]
  pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Renewed {
  pub vm_id:       String,
  pub session_end: String,
}

pub async fn renew<B: Backends>(
  State(orch): State<Arc<Orchestrator<B>>>,
  QueryParams(params): QueryParams<RenewParams>,
) -> Result<Json<Renewed>, ApiError> {
  let record = orch.sessions().renew_by_token(&params.token).await?;
  Ok(Json(Renewed {
    vm_id:       record.instance_id,
    session_end: record.session_end.to_rfc3339(),
  }))
}
