//! `PUT /users/{userId}` with body `{"email":"…"}`: where session mail for
//! the owner's instances goes.

use std::sync::Arc;

use axum::{Json, extract::State};
use labvm_core::Backends;
use labvm_orchestrator::Orchestrator;
use serde::Deserialize;

use crate::error::{ApiError, JsonBody, PathParam};

#[derive(Debug, Deserialize)]
pub struct OwnerBody {
  pub email: String,
}

pub async fn register<B: Backends>(
  State(orch): State<Arc<Orchestrator<B>>>,
  PathParam(user_id): PathParam<String>,
  JsonBody(body): JsonBody<OwnerBody>,
) -> Result<Json<()>, ApiError> {
  orch.register_owner(&user_id, body.email.trim()).await?;
  Ok(Json(()))
}
