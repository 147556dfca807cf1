//! `POST /instances/create`.

use std::sync::Arc;

use axum::{Json, extract::State};
use labvm_core::Backends;
use labvm_orchestrator::{CreateInstance, Orchestrator};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, JsonBody};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
  pub template_id:     String,
  pub instance_id:     String,
  pub subject_id:      String,
  #[serde(default)]
  pub user_id:         Option<String>,
  #[serde(rename = "sizeMB")]
  pub size_mb:         u64,
  pub vcpu_count:      u32,
  #[serde(rename = "vramMB")]
  pub vram_mb:         u64,
  pub username:        String,
  pub password:        String,
  #[serde(default)]
  pub public_ssh_keys: Vec<String>,
}

impl From<CreateBody> for CreateInstance {
  fn from(body: CreateBody) -> Self {
    CreateInstance {
      template_id: body.template_id,
      instance_id: body.instance_id,
      subject_id:  body.subject_id,
      owner_id:    body.user_id.filter(|id| !id.is_empty()),
      disk_mb:     body.size_mb,
      vcpus:       body.vcpu_count,
      ram_mb:      body.vram_mb,
      login:       body.username,
      password:    body.password,
      ssh_keys:    body.public_ssh_keys,
    }
  }
}

/// Where the new instance landed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
  pub vlan:               u16,
  pub vm_vlan_identifier: u16,
}

/// `POST /instances/create`
pub async fn create<B: Backends>(
  State(orch): State<Arc<Orchestrator<B>>>,
  JsonBody(body): JsonBody<CreateBody>,
) -> Result<Json<Created>, ApiError> {
  let reservation = orch.create_instance(body.into()).await?;
  Ok(Json(Created {
    vlan:               reservation.vlan,
    vm_vlan_identifier: reservation.vm_vlan_identifier,
  }))
}
