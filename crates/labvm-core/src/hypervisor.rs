//! The [`Hypervisor`] trait and the parameters it is driven with.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// Network attachment of a new instance. Every field is decided by the
/// orchestrator; drivers read no configuration of their own for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceNetwork {
  /// Host bridge the instance NIC is plugged into.
  pub bridge:    String,
  /// Guest interface carrying the VLAN sub-interface.
  pub interface: String,
  pub vlan:      u16,
  /// Static address in CIDR form, e.g. `10.0.2.5/24`.
  pub address:   String,
  pub gateway:   String,
}

/// Everything needed to materialise an instance from a template.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
  pub template_id: String,
  pub instance_id: String,
  pub disk_mb:     u64,
  pub vcpus:       u32,
  pub ram_mb:      u64,
  pub login:       String,
  pub password:    String,
  pub ssh_keys:    Vec<String>,
  pub network:     InstanceNetwork,
}

/// One row of the hypervisor's domain listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
  pub vm_id:  String,
  /// Verbatim state, e.g. `running` or `shut off`.
  pub status: String,
}

/// Lifecycle operations on the local virtualisation host.
///
/// All calls block on the underlying toolchain. Failures carry the tool's
/// stderr with noise prefixes such as `error:` trimmed.
pub trait Hypervisor: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  /// Produce the disk image of `target` from base image `source`.
  fn clone_image<'a>(
    &'a self,
    source: &'a str,
    target: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Define the domain of template `template_id` over its cloned disk.
  fn define_template<'a>(
    &'a self,
    source: &'a str,
    template_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn create_instance<'a>(
    &'a self,
    spec: &'a InstanceSpec,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Destroy the domain (if running), undefine it, and remove its storage.
  fn delete<'a>(&'a self, id: &'a str)
  -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn start<'a>(&'a self, id: &'a str)
  -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Graceful ACPI shutdown.
  fn stop<'a>(&'a self, id: &'a str)
  -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn restart<'a>(&'a self, id: &'a str)
  -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn force_stop<'a>(&'a self, id: &'a str)
  -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn list_status(
    &self,
  ) -> impl Future<Output = Result<Vec<DomainStatus>, Self::Error>> + Send + '_;

  /// File names of the base images offered by the host.
  fn list_base_images(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;
}
