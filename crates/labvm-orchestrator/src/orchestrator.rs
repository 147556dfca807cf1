//! [`Orchestrator`]: the use cases that touch more than one backend.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use labvm_core::{
  Backend, Backends, Error, Result,
  catalog::Catalog as _,
  hypervisor::{DomainStatus, Hypervisor as _, InstanceSpec},
  router::{RouterDriver as _, RouterObject},
  vm::{NewInstance, Reservation, Vm, VmKind},
};

use crate::{
  CoreResult as _,
  network::{NetworkSettings, instance_network, subject_recipe},
  saga::{Compensation, Saga},
  session::SessionManager,
};

/// MTU of the WireGuard uplink interface.
const WIREGUARD_MTU: u16 = 1420;

/// Parameters of a new instance.
#[derive(Debug, Clone)]
pub struct CreateInstance {
  pub template_id: String,
  pub instance_id: String,
  pub subject_id:  String,
  pub owner_id:    Option<String>,
  pub disk_mb:     u64,
  pub vcpus:       u32,
  pub ram_mb:      u64,
  pub login:       String,
  pub password:    String,
  pub ssh_keys:    Vec<String>,
}

impl CreateInstance {
  fn validate(&self) -> Result<()> {
    for (field, value) in [
      ("templateId", &self.template_id),
      ("instanceId", &self.instance_id),
      ("subjectId", &self.subject_id),
      ("username", &self.login),
      ("password", &self.password),
    ] {
      if value.trim().is_empty() {
        return Err(Error::BadRequest(format!("{field} must not be empty")));
      }
    }
    if self.disk_mb == 0 || self.vcpus == 0 || self.ram_mb == 0 {
      return Err(Error::BadRequest("sizeMB, vcpuCount and vramMB must be positive".into()));
    }
    Ok(())
  }
}

/// Outcome of base-image reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
  pub removed: u64,
  pub added:   Vec<String>,
}

fn require_id(field: &str, value: &str) -> Result<()> {
  if value.trim().is_empty() {
    return Err(Error::BadRequest(format!("{field} must not be empty")));
  }
  Ok(())
}

pub struct Orchestrator<B: Backends> {
  pub(crate) catalog:    Arc<B::Catalog>,
  pub(crate) hypervisor: Arc<B::Hypervisor>,
  pub(crate) router:     Arc<B::Router>,
  sessions:              Arc<SessionManager<B>>,
  network:               NetworkSettings,
  subject_locks:         Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B: Backends> Orchestrator<B> {
  pub fn new(
    catalog: Arc<B::Catalog>,
    hypervisor: Arc<B::Hypervisor>,
    router: Arc<B::Router>,
    sessions: Arc<SessionManager<B>>,
    network: NetworkSettings,
  ) -> Self {
    Self {
      catalog,
      hypervisor,
      router,
      sessions,
      network,
      subject_locks: Mutex::new(HashMap::new()),
    }
  }

  pub fn sessions(&self) -> &Arc<SessionManager<B>> { &self.sessions }

  /// The lock serialising allocation and router changes of one subject.
  fn subject_lock(&self, subject_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = self.subject_locks.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(subject_id.to_owned()).or_default().clone()
  }

  /// Drop the lock of `subject_id` once nobody holds or waits on it.
  fn forget_subject_lock(&self, subject_id: &str) {
    let mut locks = self.subject_locks.lock().unwrap_or_else(PoisonError::into_inner);
    if locks.get(subject_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
      locks.remove(subject_id);
    }
  }

  #[cfg(test)]
  pub(crate) fn subject_lock_count(&self) -> usize {
    self.subject_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  async fn get_vm(&self, id: &str) -> Result<Vm> {
    self
      .catalog
      .get_vm(id)
      .await
      .core()?
      .ok_or_else(|| Error::NotFound(format!("vm {id}")))
  }

  // ─── Templates ─────────────────────────────────────────────────────────────

  /// Clone base `source` into a new template `template_id`.
  #[tracing::instrument(skip(self))]
  pub async fn register_template(&self, source: &str, template_id: &str) -> Result<()> {
    require_id("sourceVmId", source)?;
    require_id("targetVmId", template_id)?;

    if !self.catalog.exists(source).await.core()? {
      return Err(Error::NotFound(format!("vm {source}")));
    }
    if !self.catalog.is_base(source).await.core()? {
      return Err(Error::BadRequest(format!("{source} is not a base image")));
    }
    if self.catalog.exists(template_id).await.core()? {
      return Err(Error::Conflict(format!("vm {template_id} already exists")));
    }

    let mut saga = Saga::new("register_template");
    match self.register_template_steps(&mut saga, source, template_id).await {
      Ok(()) => {
        tracing::info!("template registered");
        Ok(())
      }
      Err(e) => {
        saga.unwind(self, &e).await;
        Err(e)
      }
    }
  }

  async fn register_template_steps(
    &self,
    saga: &mut Saga,
    source: &str,
    template_id: &str,
  ) -> Result<()> {
    self.hypervisor.clone_image(source, template_id).await.core()?;
    saga.done(Compensation::DeleteDomain { id: template_id.to_owned() });

    self.hypervisor.define_template(source, template_id).await.core()?;
    self.catalog.add_vm(&Vm::template(template_id)).await.core()?;
    Ok(())
  }

  // ─── Instances ─────────────────────────────────────────────────────────────

  /// Materialise a new instance, bootstrapping its subject network if it is
  /// the subject's first.
  #[tracing::instrument(
    skip(self, request),
    fields(
      instance_id = %request.instance_id,
      template_id = %request.template_id,
      subject_id = %request.subject_id,
    )
  )]
  pub async fn create_instance(&self, request: CreateInstance) -> Result<Reservation> {
    request.validate()?;

    let template = &request.template_id;
    if !self.catalog.exists(template).await.core()? {
      return Err(Error::NotFound(format!("vm {template}")));
    }
    if !self.catalog.is_template(template).await.core()? {
      return Err(Error::BadRequest(format!("{template} is not a template")));
    }
    if self.catalog.exists(&request.instance_id).await.core()? {
      return Err(Error::Conflict(format!("vm {} already exists", request.instance_id)));
    }

    let lock = self.subject_lock(&request.subject_id);
    let guard = lock.lock().await;

    let mut saga = Saga::new("create_instance");
    let outcome = match self.create_instance_steps(&mut saga, &request).await {
      Ok(reservation) => {
        tracing::info!(
          vlan = reservation.vlan,
          vm_vlan_identifier = reservation.vm_vlan_identifier,
          bootstrap = reservation.bootstrap,
          "instance created"
        );
        Ok(reservation)
      }
      Err(e) => {
        saga.unwind(self, &e).await;
        Err(e)
      }
    };
    drop(guard);
    drop(lock);
    if outcome.is_err() {
      self.forget_subject_lock(&request.subject_id);
    }
    outcome
  }

  async fn create_instance_steps(
    &self,
    saga: &mut Saga,
    request: &CreateInstance,
  ) -> Result<Reservation> {
    let reservation = self
      .catalog
      .reserve_instance(&NewInstance {
        instance_id: request.instance_id.clone(),
        template_id: request.template_id.clone(),
        subject_id:  request.subject_id.clone(),
        owner_id:    request.owner_id.clone(),
      })
      .await
      .core()?;
    if reservation.subject_created {
      saga.done(Compensation::DeleteSubject { subject_id: request.subject_id.clone() });
    }
    saga.done(Compensation::DeleteVm { id: request.instance_id.clone() });

    let spec = InstanceSpec {
      template_id: request.template_id.clone(),
      instance_id: request.instance_id.clone(),
      disk_mb:     request.disk_mb,
      vcpus:       request.vcpus,
      ram_mb:      request.ram_mb,
      login:       request.login.clone(),
      password:    request.password.clone(),
      ssh_keys:    request.ssh_keys.clone(),
      network:     instance_network(
        &self.network,
        reservation.vlan,
        reservation.vm_vlan_identifier,
      ),
    };
    self.hypervisor.create_instance(&spec).await.core()?;
    saga.done(Compensation::DeleteDomain { id: request.instance_id.clone() });

    if reservation.bootstrap {
      let comment = format!("lab subject {}", request.subject_id);
      for object in subject_recipe(&self.network, &request.subject_id, reservation.vlan) {
        self.router.ensure(&object, Some(comment.as_str())).await.core()?;
        saga.done(Compensation::RemoveRouterObject(object));
      }
    }
    Ok(reservation)
  }

  /// Delete a template or instance. Deleting the last instance of a subject
  /// also tears down the subject network and the subject itself.
  #[tracing::instrument(skip(self))]
  pub async fn delete_vm(&self, id: &str) -> Result<()> {
    let vm = self.get_vm(id).await?;
    if vm.is_base() {
      return Err(Error::BadRequest(format!(
        "{id} is a base image; base images follow the host image directory"
      )));
    }
    if self.catalog.has_dependents(id).await.core()? {
      return Err(Error::Conflict(format!("vm {id} has dependents")));
    }

    let VmKind::Instance { subject_id, .. } = vm.kind else {
      self.hypervisor.delete(id).await.core()?;
      self.catalog.delete_vm(id).await.core()?;
      tracing::info!("template deleted");
      return Ok(());
    };

    let lock = self.subject_lock(&subject_id);
    let guard = lock.lock().await;
    let outcome = self.delete_instance(id, &subject_id).await;
    drop(guard);
    drop(lock);
    if matches!(outcome, Ok(true)) {
      self.forget_subject_lock(&subject_id);
    }
    outcome.map(|_| ())
  }

  /// Returns whether the subject was torn down with its last instance.
  async fn delete_instance(&self, id: &str, subject_id: &str) -> Result<bool> {
    let last = self.catalog.is_last_instance_in_subject(id).await.core()?;
    let vlan = self.catalog.subject_vlan(subject_id).await.core()?;

    // The session outlives a failed domain removal; the vm is still there.
    self.hypervisor.delete(id).await.core()?;
    self.sessions.stop_session(id).await?;
    self.catalog.delete_vm(id).await.core()?;
    tracing::info!(subject_id, last, "instance deleted");

    match (last, vlan) {
      (true, Some(vlan)) => self.teardown_subject(subject_id, vlan).await.map(|()| true),
      _ => Ok(false),
    }
  }

  /// Remove the subject's router objects newest-first, then the subject row.
  /// The row stays when any removal fails so the subject can be retried.
  async fn teardown_subject(&self, subject_id: &str, vlan: u16) -> Result<()> {
    let mut failures = Vec::new();
    for object in subject_recipe(&self.network, subject_id, vlan).iter().rev() {
      if let Err(e) = self.router.remove(object).await {
        let e: Error = e.into();
        tracing::error!(subject_id, object = %object.describe(), error = %e, "router teardown failed");
        failures.push(format!("{}: {e}", object.describe()));
      }
    }

    if !failures.is_empty() {
      return Err(Error::upstream(
        Backend::Router,
        format!("teardown of subject {subject_id} incomplete: {}", failures.join("; ")),
      ));
    }

    self.catalog.delete_subject(subject_id).await.core()?;
    tracing::info!(subject_id, vlan, "subject removed");
    Ok(())
  }

  // ─── Power ─────────────────────────────────────────────────────────────────

  async fn runnable(&self, id: &str) -> Result<Vm> {
    let vm = self.get_vm(id).await?;
    if vm.is_base() {
      return Err(Error::BadRequest(format!("{id} is a base image and cannot run")));
    }
    Ok(vm)
  }

  /// Boot `id`; instances also begin a session.
  #[tracing::instrument(skip(self))]
  pub async fn start(&self, id: &str) -> Result<()> {
    let vm = self.runnable(id).await?;
    self.hypervisor.start(id).await.core()?;
    if vm.is_instance() {
      self.sessions.start_session(id).await?;
    }
    Ok(())
  }

  #[tracing::instrument(skip(self))]
  pub async fn stop(&self, id: &str) -> Result<()> {
    let vm = self.runnable(id).await?;
    self.hypervisor.stop(id).await.core()?;
    if vm.is_instance() {
      self.sessions.stop_session(id).await?;
    }
    Ok(())
  }

  #[tracing::instrument(skip(self))]
  pub async fn restart(&self, id: &str) -> Result<()> {
    self.runnable(id).await?;
    self.hypervisor.restart(id).await.core()
  }

  #[tracing::instrument(skip(self))]
  pub async fn force_stop(&self, id: &str) -> Result<()> {
    let vm = self.runnable(id).await?;
    self.hypervisor.force_stop(id).await.core()?;
    if vm.is_instance() {
      self.sessions.stop_session(id).await?;
    }
    Ok(())
  }

  pub async fn status(&self) -> Result<Vec<DomainStatus>> {
    self.hypervisor.list_status().await.core()
  }

  // ─── Catalog maintenance ───────────────────────────────────────────────────

  pub async fn list_vms(&self) -> Result<Vec<Vm>> { self.catalog.list_vms().await.core() }

  /// Align catalog base rows with the image files the host offers.
  #[tracing::instrument(skip(self))]
  pub async fn reconcile_base_images(&self) -> Result<Reconciliation> {
    let offered = self.hypervisor.list_base_images().await.core()?;
    let removed = self.catalog.delete_base_images_not_in(&offered).await.core()?;

    let mut added = Vec::new();
    for description in &offered {
      let known = self.catalog.exists_by_description(description).await.core()?
        || self.catalog.exists(description).await.core()?;
      if !known {
        self.catalog.add_vm(&Vm::base(description.as_str())).await.core()?;
        added.push(description.clone());
      }
    }

    tracing::info!(removed, added = added.len(), "base images reconciled");
    Ok(Reconciliation { removed, added })
  }

  /// Record the mail address of an instance owner.
  pub async fn register_owner(&self, user_id: &str, email: &str) -> Result<()> {
    require_id("userId", user_id)?;
    if !email.contains('@') {
      return Err(Error::BadRequest(format!("{email:?} is not an e-mail address")));
    }
    self.catalog.upsert_user(user_id, email).await.core()
  }

  /// Establish router objects shared by every subject. Returns the public
  /// key of the WireGuard uplink when one is configured.
  pub async fn bootstrap_router(&self) -> Result<Option<String>> {
    let Some(wg) = &self.network.wireguard else {
      return Ok(None);
    };

    let interface = RouterObject::Wireguard {
      name:        wg.interface.clone(),
      listen_port: wg.listen_port,
      mtu:         WIREGUARD_MTU,
    };
    self.router.ensure(&interface, Some("lab uplink")).await.core()?;
    let key = self.router.wireguard_public_key(&wg.interface).await.core()?;
    tracing::info!(interface = %wg.interface, public_key = %key, "wireguard uplink ready");
    Ok(Some(key))
  }
}
