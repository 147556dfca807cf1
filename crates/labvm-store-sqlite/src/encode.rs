//! Encoding and decoding helpers between domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings carrying the operator-zone
//! offset they were created with.

use chrono::{DateTime, FixedOffset};
use labvm_core::{
  session::SessionRecord,
  vm::{Vm, VmKind},
};

use crate::{Error, Result};

// ─── DateTime ────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<FixedOffset>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<FixedOffset>> {
  DateTime::parse_from_rfc3339(s).map_err(|e| Error::Decode(format!("{s:?}: {e}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawVm::from_row`].
pub const VM_COLUMNS: &str =
  "id, description, is_base, is_template, depends_on, subject_id, vm_vlan_identifier, owner_id";

/// Raw values read directly from a `vms` row.
pub struct RawVm {
  pub id:                 String,
  pub description:        Option<String>,
  pub is_base:            bool,
  pub is_template:        bool,
  pub depends_on:         Option<String>,
  pub subject_id:         Option<String>,
  pub vm_vlan_identifier: Option<u16>,
  pub owner_id:           Option<String>,
}

impl RawVm {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                 row.get(0)?,
      description:        row.get(1)?,
      is_base:            row.get(2)?,
      is_template:        row.get(3)?,
      depends_on:         row.get(4)?,
      subject_id:         row.get(5)?,
      vm_vlan_identifier: row.get(6)?,
      owner_id:           row.get(7)?,
    })
  }

  pub fn into_vm(self) -> Result<Vm> {
    let kind = match (self.is_base, self.is_template) {
      (true, false) => VmKind::Base,
      (false, true) => VmKind::Template,
      (false, false) => match (self.depends_on, self.subject_id, self.vm_vlan_identifier) {
        (Some(template_id), Some(subject_id), Some(vm_vlan_identifier)) => VmKind::Instance {
          template_id,
          subject_id,
          vm_vlan_identifier,
          owner_id: self.owner_id,
        },
        _ => return Err(Error::Decode(format!("instance {} lacks its binding", self.id))),
      },
      (true, true) => {
        return Err(Error::Decode(format!("vm {} is both base and template", self.id)));
      }
    };

    Ok(Vm { id: self.id, description: self.description, kind })
  }
}

/// Column list matching [`RawSession::from_row`].
pub const SESSION_COLUMNS: &str =
  "id, session_start, session_end, reminder_sent, reminder_token";

pub struct RawSession {
  pub instance_id:    String,
  pub session_start:  String,
  pub session_end:    String,
  pub reminder_sent:  bool,
  pub reminder_token: String,
}

impl RawSession {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      instance_id:    row.get(0)?,
      session_start:  row.get(1)?,
      session_end:    row.get(2)?,
      reminder_sent:  row.get::<_, Option<bool>>(3)?.unwrap_or(false),
      reminder_token: row.get(4)?,
    })
  }

  pub fn into_record(self) -> Result<SessionRecord> {
    Ok(SessionRecord {
      session_start:  decode_dt(&self.session_start)?,
      session_end:    decode_dt(&self.session_end)?,
      instance_id:    self.instance_id,
      reminder_sent:  self.reminder_sent,
      reminder_token: self.reminder_token,
    })
  }
}
