//! In-memory stand-ins for the hypervisor, the mailer, and the clock.
//!
//! Enabled by the `test-utils` feature so dependent crates can assemble a
//! full [`Backends`](labvm_core::Backends) bundle without a libvirt host or
//! an SMTP relay.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, TimeDelta, Utc};
use labvm_core::{
  Backend,
  hypervisor::{DomainStatus, Hypervisor, InstanceSpec},
  mail::{Email, Mailer},
};
use thiserror::Error;
use tokio::sync::Notify;

use crate::clock::Clock;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Hypervisor ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FakeHypervisorError(pub String);

impl From<FakeHypervisorError> for labvm_core::Error {
  fn from(e: FakeHypervisorError) -> Self { labvm_core::Error::upstream(Backend::Hypervisor, e.0) }
}

#[derive(Default)]
struct HostState {
  images:   BTreeSet<String>,
  disks:    BTreeSet<String>,
  domains:  BTreeMap<String, String>,
  specs:    BTreeMap<String, InstanceSpec>,
  failures: HashMap<String, String>,
  calls:    Vec<String>,
}

/// A libvirt host kept in memory.
///
/// Operations are named as in [`Hypervisor`] (`clone_image`, `stop`, …) for
/// [`fail_on`](Self::fail_on); every call is logged as `"<op> <id>"`.
#[derive(Default)]
pub struct FakeHypervisor {
  state: Mutex<HostState>,
}

impl FakeHypervisor {
  pub fn new() -> Self { Self::default() }

  pub fn add_image(&self, name: &str) { lock(&self.state).images.insert(name.to_owned()); }

  pub fn remove_image(&self, name: &str) { lock(&self.state).images.remove(name); }

  pub fn fail_on(&self, op: &str, message: &str) {
    lock(&self.state).failures.insert(op.to_owned(), message.to_owned());
  }

  pub fn clear_failures(&self) { lock(&self.state).failures.clear(); }

  pub fn calls(&self) -> Vec<String> { lock(&self.state).calls.clone() }

  pub fn domains(&self) -> Vec<String> { lock(&self.state).domains.keys().cloned().collect() }

  pub fn disks(&self) -> Vec<String> { lock(&self.state).disks.iter().cloned().collect() }

  pub fn state_of(&self, id: &str) -> Option<String> { lock(&self.state).domains.get(id).cloned() }

  /// The [`InstanceSpec`] an instance was created with.
  pub fn spec_of(&self, id: &str) -> Option<InstanceSpec> {
    lock(&self.state).specs.get(id).cloned()
  }

  /// Log the call, honour injected failures, then apply `f` to the host.
  fn op<T>(
    &self,
    op: &str,
    id: &str,
    f: impl FnOnce(&mut HostState) -> Result<T, String>,
  ) -> Result<T, FakeHypervisorError> {
    let mut state = lock(&self.state);
    state.calls.push(format!("{op} {id}"));
    if let Some(message) = state.failures.get(op) {
      return Err(FakeHypervisorError(message.clone()));
    }
    f(&mut state).map_err(FakeHypervisorError)
  }

  fn set_state(&self, op: &str, id: &str, to: &str) -> Result<(), FakeHypervisorError> {
    self.op(op, id, |s| match s.domains.get_mut(id) {
      Some(state) => {
        *state = to.to_owned();
        Ok(())
      }
      None => Err(format!("failed to get domain '{id}'")),
    })
  }
}

impl Hypervisor for FakeHypervisor {
  type Error = FakeHypervisorError;

  async fn clone_image(&self, source: &str, target: &str) -> Result<(), Self::Error> {
    self.op("clone_image", target, |s| {
      if !s.images.contains(source) {
        return Err(format!("could not open '{source}': No such file or directory"));
      }
      if !s.disks.insert(target.to_owned()) {
        return Err(format!("disk {target} already exists"));
      }
      Ok(())
    })
  }

  async fn define_template(&self, _source: &str, template_id: &str) -> Result<(), Self::Error> {
    self.op("define_template", template_id, |s| {
      if !s.disks.contains(template_id) {
        return Err(format!("disk of {template_id} missing"));
      }
      if s.domains.contains_key(template_id) {
        return Err(format!("domain '{template_id}' already exists"));
      }
      s.domains.insert(template_id.to_owned(), "shut off".into());
      Ok(())
    })
  }

  async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), Self::Error> {
    let id = spec.instance_id.as_str();
    self.op("create_instance", id, |s| {
      if !s.domains.contains_key(&spec.template_id) {
        return Err(format!("domain '{}' not found", spec.template_id));
      }
      if s.domains.contains_key(id) {
        return Err(format!("domain '{id}' already exists"));
      }
      s.disks.insert(id.to_owned());
      s.domains.insert(id.to_owned(), "shut off".into());
      s.specs.insert(id.to_owned(), spec.clone());
      Ok(())
    })
  }

  async fn delete(&self, id: &str) -> Result<(), Self::Error> {
    self.op("delete", id, |s| {
      s.domains.remove(id);
      s.disks.remove(id);
      s.specs.remove(id);
      Ok(())
    })
  }

  async fn start(&self, id: &str) -> Result<(), Self::Error> { self.set_state("start", id, "running") }

  async fn stop(&self, id: &str) -> Result<(), Self::Error> { self.set_state("stop", id, "shut off") }

  async fn restart(&self, id: &str) -> Result<(), Self::Error> {
    self.set_state("restart", id, "running")
  }

  async fn force_stop(&self, id: &str) -> Result<(), Self::Error> {
    self.set_state("force_stop", id, "shut off")
  }

  async fn list_status(&self) -> Result<Vec<DomainStatus>, Self::Error> {
    self.op("list_status", "*", |s| {
      Ok(
        s.domains
          .iter()
          .map(|(id, status)| DomainStatus { vm_id: id.clone(), status: status.clone() })
          .collect(),
      )
    })
  }

  async fn list_base_images(&self) -> Result<Vec<String>, Self::Error> {
    self.op("list_base_images", "*", |s| Ok(s.images.iter().cloned().collect()))
  }
}

// ─── Mailer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("smtp relay unavailable")]
pub struct FakeMailError;

/// Records outgoing mail instead of sending it.
///
/// [`hold`](Self::hold) parks every send until [`release`](Self::release),
/// so tests can act while a mail is in flight.
#[derive(Default)]
pub struct FakeMailer {
  sent:    Mutex<Vec<Email>>,
  failing: Mutex<bool>,
  held:    Mutex<bool>,
  parked:  Notify,
  resume:  Notify,
}

impl FakeMailer {
  pub fn new() -> Self { Self::default() }

  pub fn sent(&self) -> Vec<Email> { lock(&self.sent).clone() }

  pub fn set_failing(&self, failing: bool) { *lock(&self.failing) = failing; }

  pub fn hold(&self) { *lock(&self.held) = true; }

  /// Wait until a send is parked by [`hold`](Self::hold).
  pub async fn parked(&self) { self.parked.notified().await; }

  pub fn release(&self) {
    *lock(&self.held) = false;
    self.resume.notify_one();
  }
}

impl Mailer for FakeMailer {
  type Error = FakeMailError;

  async fn send(&self, email: &Email) -> Result<(), Self::Error> {
    let held = *lock(&self.held);
    if held {
      self.parked.notify_one();
      self.resume.notified().await;
    }
    if *lock(&self.failing) {
      return Err(FakeMailError);
    }
    lock(&self.sent).push(email.clone());
    Ok(())
  }
}

// ─── Clock ───────────────────────────────────────────────────────────────────

/// A clock that only moves when told to.
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self { Self { now: Mutex::new(start) } }

  pub fn advance(&self, by: TimeDelta) {
    let mut now = lock(&self.now);
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> { *lock(&self.now) }
}
