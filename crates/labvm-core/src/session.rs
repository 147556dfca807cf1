//! Session state persisted on instance rows.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// The session columns of an instance with an active session.
///
/// Times keep the operator-zone offset they were minted with, so the stored
/// value is also what reminder e-mails display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
  pub instance_id:    String,
  pub session_start:  DateTime<FixedOffset>,
  pub session_end:    DateTime<FixedOffset>,
  pub reminder_sent:  bool,
  pub reminder_token: String,
}
