//! VMs and subjects: the rows the catalog owns.
//!
//! A VM's kind is derived from its flags in storage but modelled here as an
//! enum, so a base can never carry a subject and an instance can never lack
//! one.

use serde::{Deserialize, Serialize};

// ─── Subjects ────────────────────────────────────────────────────────────────

/// A course. Owns one VLAN on the lab router and the instances bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id: String,
  pub vlan:       u16,
}

/// Inclusive range subject VLANs are allocated from.
pub const SUBJECT_VLAN_RANGE: std::ops::RangeInclusive<u16> = 2..=4094;

/// Inclusive range of per-subject host identifiers. `1` is the gateway.
pub const VM_VLAN_IDENTIFIER_RANGE: std::ops::RangeInclusive<u16> = 2..=254;

/// The smallest value of `range` not present in `used`.
pub fn first_free(range: std::ops::RangeInclusive<u16>, used: &[u16]) -> Option<u16> {
  range.into_iter().find(|candidate| !used.contains(candidate))
}

// ─── VMs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VmKind {
  /// A host-supplied image; the source for templates.
  Base,
  /// A prepared VM cloned from a base; the source for instances.
  Template,
  /// A per-user clone of a template, bound to a subject.
  Instance {
    #[serde(rename = "templateId")]
    template_id:        String,
    #[serde(rename = "subjectId")]
    subject_id:         String,
    #[serde(rename = "vmVlanIdentifier")]
    vm_vlan_identifier: u16,
    #[serde(rename = "ownerId", skip_serializing_if = "Option::is_none")]
    owner_id:           Option<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
  pub id:          String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(flatten)]
  pub kind:        VmKind,
}

impl Vm {
  pub fn base(description: impl Into<String>) -> Self {
    let description = description.into();
    Self { id: description.clone(), description: Some(description), kind: VmKind::Base }
  }

  pub fn template(id: impl Into<String>) -> Self {
    Self { id: id.into(), description: None, kind: VmKind::Template }
  }

  pub fn is_base(&self) -> bool { matches!(self.kind, VmKind::Base) }

  pub fn is_template(&self) -> bool { matches!(self.kind, VmKind::Template) }

  pub fn is_instance(&self) -> bool { matches!(self.kind, VmKind::Instance { .. }) }

  pub fn subject_id(&self) -> Option<&str> {
    match &self.kind {
      VmKind::Instance { subject_id, .. } => Some(subject_id),
      _ => None,
    }
  }
}

// ─── Instance reservation ────────────────────────────────────────────────────

/// Input to [`Catalog::reserve_instance`](crate::catalog::Catalog::reserve_instance).
#[derive(Debug, Clone)]
pub struct NewInstance {
  pub instance_id: String,
  pub template_id: String,
  pub subject_id:  String,
  pub owner_id:    Option<String>,
}

/// What the catalog allocated for a freshly reserved instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
  pub vlan:               u16,
  pub vm_vlan_identifier: u16,
  /// The subject row was inserted by this reservation.
  pub subject_created:    bool,
  /// The subject had no instances before this one, so its router objects
  /// must be (re)established.
  pub bootstrap:          bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_free_skips_used_values() {
    assert_eq!(first_free(SUBJECT_VLAN_RANGE, &[]), Some(2));
    assert_eq!(first_free(SUBJECT_VLAN_RANGE, &[2, 3, 5]), Some(4));
    assert_eq!(first_free(2..=3, &[2, 3]), None);
  }

  #[test]
  fn instance_serialises_with_camel_case_fields() {
    let vm = Vm {
      id:          "i1".into(),
      description: None,
      kind:        VmKind::Instance {
        template_id:        "t1".into(),
        subject_id:         "s1".into(),
        vm_vlan_identifier: 2,
        owner_id:           None,
      },
    };
    let json = serde_json::to_value(&vm).unwrap();
    assert_eq!(json["kind"], "instance");
    assert_eq!(json["subjectId"], "s1");
    assert_eq!(json["vmVlanIdentifier"], 2);
  }
}
