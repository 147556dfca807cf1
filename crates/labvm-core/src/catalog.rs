//! The [`Catalog`] trait: canonical truth about VMs and subjects.
//!
//! Implemented by storage backends (e.g. `labvm-store-sqlite`). Hypervisor
//! domains and router objects are projections of what the catalog records.
//!
//! Global invariants (unique VLANs, unique `(subject, identifier)` pairs,
//! unique descriptions, no deletion of VMs with dependents) are enforced by
//! the backend's own constraints and surface as conflicts.

use std::future::Future;

use chrono::{DateTime, FixedOffset};

use crate::{
  session::SessionRecord,
  vm::{NewInstance, Reservation, Subject, Vm},
};

pub trait Catalog: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  // ── Predicates ────────────────────────────────────────────────────────

  fn exists<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn exists_by_description<'a>(
    &'a self,
    description: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn has_dependents<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn is_template<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn is_base<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// `true` when `id` is an instance and no other instance shares its subject.
  fn is_last_instance_in_subject<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn subject_exists<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Readers ───────────────────────────────────────────────────────────

  fn get_vm<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Vm>, Self::Error>> + Send + 'a;

  fn list_vms(&self) -> impl Future<Output = Result<Vec<Vm>, Self::Error>> + Send + '_;

  fn base_images(&self) -> impl Future<Output = Result<Vec<Vm>, Self::Error>> + Send + '_;

  fn description_of<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  fn subject_vlan<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<Option<u16>, Self::Error>> + Send + 'a;

  fn all_vlans(&self) -> impl Future<Output = Result<Vec<u16>, Self::Error>> + Send + '_;

  fn vlan_of_vm<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<u16>, Self::Error>> + Send + 'a;

  fn vm_vlan_id_of<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<u16>, Self::Error>> + Send + 'a;

  fn subject_id_of_vm<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  fn vm_vlan_identifiers_in_vlan(
    &self,
    vlan: u16,
  ) -> impl Future<Output = Result<Vec<u16>, Self::Error>> + Send + '_;

  fn all_instance_ids(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  // ── Mutators ──────────────────────────────────────────────────────────

  /// Insert a base or template row. Instances go through
  /// [`Catalog::reserve_instance`].
  fn add_vm<'a>(
    &'a self,
    vm: &'a Vm,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn delete_vm<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Create a subject, allocating the smallest free VLAN.
  fn add_subject<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<Subject, Self::Error>> + Send + 'a;

  fn delete_subject<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete every base row whose description is not in `descriptions`.
  /// Returns the number of rows removed.
  fn delete_base_images_not_in<'a>(
    &'a self,
    descriptions: &'a [String],
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Atomically ensure the subject (allocating its VLAN if new), allocate the
  /// smallest free VM VLAN identifier, and insert the instance row.
  fn reserve_instance<'a>(
    &'a self,
    instance: &'a NewInstance,
  ) -> impl Future<Output = Result<Reservation, Self::Error>> + Send + 'a;

  // ── Sessions ──────────────────────────────────────────────────────────

  fn start_session<'a>(
    &'a self,
    record: &'a SessionRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Move `session_end`, reset `reminder_sent`, and replace the token.
  fn renew_session<'a>(
    &'a self,
    id: &'a str,
    end: DateTime<FixedOffset>,
    token: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Flag the reminder of the session `token` belongs to as sent. Returns
  /// `false` when that session has since been renewed or ended.
  fn mark_reminder_sent<'a>(
    &'a self,
    id: &'a str,
    token: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Null out every session column of `id`.
  fn clear_session<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn session_of<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<SessionRecord>, Self::Error>> + Send + 'a;

  fn active_sessions(
    &self,
  ) -> impl Future<Output = Result<Vec<SessionRecord>, Self::Error>> + Send + '_;

  fn instance_by_token<'a>(
    &'a self,
    token: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  // ── Owners ────────────────────────────────────────────────────────────

  fn upsert_user<'a>(
    &'a self,
    user_id: &'a str,
    email: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn owner_email_of<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;
}
