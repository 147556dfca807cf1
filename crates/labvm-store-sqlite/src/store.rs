//! [`SqliteCatalog`]: the SQLite implementation of [`Catalog`].

use std::path::Path;

use chrono::{DateTime, FixedOffset};
use labvm_core::{
  catalog::Catalog,
  session::SessionRecord,
  vm::{
    NewInstance, Reservation, Subject, SUBJECT_VLAN_RANGE, VM_VLAN_IDENTIFIER_RANGE, Vm, VmKind,
    first_free,
  },
};
use rusqlite::{OptionalExtension as _, TransactionBehavior, params};

use crate::{
  Error, Result,
  encode::{RawSession, RawVm, SESSION_COLUMNS, VM_COLUMNS, encode_dt},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// The lab catalog backed by a single SQLite file.
///
/// Clones share one background connection thread.
#[derive(Clone)]
pub struct SqliteCatalog {
  conn: tokio_rusqlite::Connection,
}

/// Outcome of an allocation closure that may run out of numbers.
enum Allocation<T> {
  Done(T),
  Exhausted(&'static str),
}

impl<T> Allocation<T> {
  fn into_result(self) -> Result<T> {
    match self {
      Allocation::Done(value) => Ok(value),
      Allocation::Exhausted(what) => Err(Error::Exhausted(what)),
    }
  }
}

fn collect_u16(
  conn: &rusqlite::Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<u16>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt.query_map(params, |row| row.get(0))?.collect();
  rows
}

const VLAN_IDENTIFIERS_IN_VLAN: &str = "SELECT v.vm_vlan_identifier
   FROM vms v
   JOIN subjects s ON s.subject_id = v.subject_id
   WHERE s.vlan = ?1";

impl SqliteCatalog {
  /// Open (or create) a catalog at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let catalog = Self { conn };
    catalog.init_schema().await?;
    Ok(catalog)
  }

  /// Open an in-memory catalog, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let catalog = Self { conn };
    catalog.init_schema().await?;
    Ok(catalog)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Evaluate a single-parameter `SELECT EXISTS(...)`.
  async fn query_exists(&self, sql: &'static str, arg: String) -> Result<bool> {
    let found = self
      .conn
      .call(move |conn| Ok(conn.query_row(sql, params![arg], |row| row.get::<_, bool>(0))?))
      .await?;
    Ok(found)
  }

  /// Read one optional column of a single-row lookup. A missing row and a
  /// NULL column both yield `None`.
  async fn query_optional<T>(&self, sql: &'static str, id: String) -> Result<Option<T>>
  where
    T: rusqlite::types::FromSql + Send + 'static,
  {
    let value = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, params![id], |row| row.get::<_, Option<T>>(0))
            .optional()?
            .flatten(),
        )
      })
      .await?;
    Ok(value)
  }

  async fn query_vms(&self, sql: &'static str) -> Result<Vec<Vm>> {
    let raws: Vec<RawVm> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
          .query_map([], RawVm::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVm::into_vm).collect()
  }

  /// Run a single-parameter `UPDATE`/`DELETE` and report the affected rows.
  async fn execute_one(&self, sql: &'static str, id: String) -> Result<usize> {
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(sql, params![id])?))
      .await?;
    Ok(changed)
  }
}

// ─── Catalog impl ────────────────────────────────────────────────────────────

impl Catalog for SqliteCatalog {
  type Error = Error;

  // ── Predicates ────────────────────────────────────────────────────────────

  async fn exists(&self, id: &str) -> Result<bool> {
    self
      .query_exists("SELECT EXISTS(SELECT 1 FROM vms WHERE id = ?1)", id.to_owned())
      .await
  }

  async fn exists_by_description(&self, description: &str) -> Result<bool> {
    self
      .query_exists(
        "SELECT EXISTS(SELECT 1 FROM vms WHERE description = ?1)",
        description.to_owned(),
      )
      .await
  }

  async fn has_dependents(&self, id: &str) -> Result<bool> {
    self
      .query_exists("SELECT EXISTS(SELECT 1 FROM vms WHERE depends_on = ?1)", id.to_owned())
      .await
  }

  async fn is_template(&self, id: &str) -> Result<bool> {
    self
      .query_exists(
        "SELECT EXISTS(SELECT 1 FROM vms WHERE id = ?1 AND is_template = 1)",
        id.to_owned(),
      )
      .await
  }

  async fn is_base(&self, id: &str) -> Result<bool> {
    self
      .query_exists(
        "SELECT EXISTS(SELECT 1 FROM vms WHERE id = ?1 AND is_base = 1)",
        id.to_owned(),
      )
      .await
  }

  async fn is_last_instance_in_subject(&self, id: &str) -> Result<bool> {
    self
      .query_exists(
        "SELECT EXISTS(
           SELECT 1 FROM vms v
           WHERE v.id = ?1
             AND v.subject_id IS NOT NULL
             AND (SELECT COUNT(*) FROM vms o WHERE o.subject_id = v.subject_id) = 1
         )",
        id.to_owned(),
      )
      .await
  }

  async fn subject_exists(&self, subject_id: &str) -> Result<bool> {
    self
      .query_exists(
        "SELECT EXISTS(SELECT 1 FROM subjects WHERE subject_id = ?1)",
        subject_id.to_owned(),
      )
      .await
  }

  // ── Readers ───────────────────────────────────────────────────────────────

  async fn get_vm(&self, id: &str) -> Result<Option<Vm>> {
    let id = id.to_owned();
    let raw: Option<RawVm> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {VM_COLUMNS} FROM vms WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], RawVm::from_row).optional()?)
      })
      .await?;

    raw.map(RawVm::into_vm).transpose()
  }

  async fn list_vms(&self) -> Result<Vec<Vm>> {
    self
      .query_vms(
        "SELECT id, description, is_base, is_template, depends_on, subject_id,
                vm_vlan_identifier, owner_id
         FROM vms ORDER BY id",
      )
      .await
  }

  async fn base_images(&self) -> Result<Vec<Vm>> {
    self
      .query_vms(
        "SELECT id, description, is_base, is_template, depends_on, subject_id,
                vm_vlan_identifier, owner_id
         FROM vms WHERE is_base = 1 ORDER BY id",
      )
      .await
  }

  async fn description_of(&self, id: &str) -> Result<Option<String>> {
    self
      .query_optional("SELECT description FROM vms WHERE id = ?1", id.to_owned())
      .await
  }

  async fn subject_vlan(&self, subject_id: &str) -> Result<Option<u16>> {
    self
      .query_optional("SELECT vlan FROM subjects WHERE subject_id = ?1", subject_id.to_owned())
      .await
  }

  async fn all_vlans(&self) -> Result<Vec<u16>> {
    let vlans = self
      .conn
      .call(|conn| Ok(collect_u16(conn, "SELECT vlan FROM subjects ORDER BY vlan", [])?))
      .await?;
    Ok(vlans)
  }

  async fn vlan_of_vm(&self, id: &str) -> Result<Option<u16>> {
    self
      .query_optional(
        "SELECT s.vlan FROM vms v JOIN subjects s ON s.subject_id = v.subject_id
         WHERE v.id = ?1",
        id.to_owned(),
      )
      .await
  }

  async fn vm_vlan_id_of(&self, id: &str) -> Result<Option<u16>> {
    self
      .query_optional("SELECT vm_vlan_identifier FROM vms WHERE id = ?1", id.to_owned())
      .await
  }

  async fn subject_id_of_vm(&self, id: &str) -> Result<Option<String>> {
    self
      .query_optional("SELECT subject_id FROM vms WHERE id = ?1", id.to_owned())
      .await
  }

  async fn vm_vlan_identifiers_in_vlan(&self, vlan: u16) -> Result<Vec<u16>> {
    let identifiers = self
      .conn
      .call(move |conn| Ok(collect_u16(conn, VLAN_IDENTIFIERS_IN_VLAN, params![vlan])?))
      .await?;
    Ok(identifiers)
  }

  async fn all_instance_ids(&self) -> Result<Vec<String>> {
    let ids = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id FROM vms WHERE is_base = 0 AND is_template = 0 ORDER BY id",
        )?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(ids)
  }

  // ── Mutators ──────────────────────────────────────────────────────────────

  async fn add_vm(&self, vm: &Vm) -> Result<()> {
    let (is_base, is_template) = match vm.kind {
      VmKind::Base => (true, false),
      VmKind::Template => (false, true),
      VmKind::Instance { .. } => {
        return Err(Error::Constraint(format!(
          "instance {} must be added through a reservation",
          vm.id
        )));
      }
    };
    let id = vm.id.clone();
    let description = vm.description.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO vms (id, description, is_base, is_template) VALUES (?1, ?2, ?3, ?4)",
          params![id, description, is_base, is_template],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_vm(&self, id: &str) -> Result<()> {
    let changed = self
      .execute_one("DELETE FROM vms WHERE id = ?1", id.to_owned())
      .await?;
    if changed == 0 {
      return Err(Error::NotFound(format!("vm {id}")));
    }
    Ok(())
  }

  async fn add_subject(&self, subject_id: &str) -> Result<Subject> {
    let subject_id = subject_id.to_owned();

    let allocation = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let used = collect_u16(&tx, "SELECT vlan FROM subjects", [])?;
        let Some(vlan) = first_free(SUBJECT_VLAN_RANGE, &used) else {
          return Ok(Allocation::Exhausted("subject vlan"));
        };
        tx.execute(
          "INSERT INTO subjects (subject_id, vlan) VALUES (?1, ?2)",
          params![subject_id, vlan],
        )?;
        tx.commit()?;
        Ok(Allocation::Done(Subject { subject_id, vlan }))
      })
      .await?;

    allocation.into_result()
  }

  async fn delete_subject(&self, subject_id: &str) -> Result<()> {
    let changed = self
      .execute_one("DELETE FROM subjects WHERE subject_id = ?1", subject_id.to_owned())
      .await?;
    if changed == 0 {
      return Err(Error::NotFound(format!("subject {subject_id}")));
    }
    Ok(())
  }

  async fn delete_base_images_not_in(&self, descriptions: &[String]) -> Result<u64> {
    let keep = descriptions.to_vec();

    let removed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let bases: Vec<(String, Option<String>)> = {
          let mut stmt = tx.prepare("SELECT id, description FROM vms WHERE is_base = 1")?;
          stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?
        };

        let mut removed = 0u64;
        for (id, description) in bases {
          let listed = description.as_ref().is_some_and(|d| keep.contains(d));
          if !listed {
            removed += tx.execute("DELETE FROM vms WHERE id = ?1", params![id])? as u64;
          }
        }
        tx.commit()?;
        Ok(removed)
      })
      .await?;

    Ok(removed)
  }

  async fn reserve_instance(&self, instance: &NewInstance) -> Result<Reservation> {
    let NewInstance { instance_id, template_id, subject_id, owner_id } = instance.clone();

    let allocation = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<u16> = tx
          .query_row(
            "SELECT vlan FROM subjects WHERE subject_id = ?1",
            params![subject_id],
            |row| row.get(0),
          )
          .optional()?;

        let (vlan, subject_created) = match existing {
          Some(vlan) => (vlan, false),
          None => {
            let used = collect_u16(&tx, "SELECT vlan FROM subjects", [])?;
            let Some(vlan) = first_free(SUBJECT_VLAN_RANGE, &used) else {
              return Ok(Allocation::Exhausted("subject vlan"));
            };
            tx.execute(
              "INSERT INTO subjects (subject_id, vlan) VALUES (?1, ?2)",
              params![subject_id, vlan],
            )?;
            (vlan, true)
          }
        };

        let used = collect_u16(&tx, VLAN_IDENTIFIERS_IN_VLAN, params![vlan])?;
        let Some(vm_vlan_identifier) = first_free(VM_VLAN_IDENTIFIER_RANGE, &used) else {
          return Ok(Allocation::Exhausted("vm vlan identifier"));
        };

        tx.execute(
          "INSERT INTO vms (id, is_base, is_template, depends_on, subject_id,
                            vm_vlan_identifier, owner_id)
           VALUES (?1, 0, 0, ?2, ?3, ?4, ?5)",
          params![instance_id, template_id, subject_id, vm_vlan_identifier, owner_id],
        )?;
        tx.commit()?;

        Ok(Allocation::Done(Reservation {
          vlan,
          vm_vlan_identifier,
          subject_created,
          bootstrap: used.is_empty(),
        }))
      })
      .await?;

    let reservation = allocation.into_result()?;
    tracing::debug!(
      instance_id = %instance.instance_id,
      subject_id = %instance.subject_id,
      vlan = reservation.vlan,
      vm_vlan_identifier = reservation.vm_vlan_identifier,
      "instance reserved"
    );
    Ok(reservation)
  }

  // ── Sessions ──────────────────────────────────────────────────────────────

  async fn start_session(&self, record: &SessionRecord) -> Result<()> {
    let id = record.instance_id.clone();
    let start = encode_dt(record.session_start);
    let end = encode_dt(record.session_end);
    let token = record.reminder_token.clone();
    let reminder_sent = record.reminder_sent;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE vms
           SET session_start = ?2, session_end = ?3, reminder_sent = ?4, reminder_token = ?5
           WHERE id = ?1 AND is_base = 0 AND is_template = 0",
          params![id, start, end, reminder_sent, token],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotFound(format!("instance {}", record.instance_id)));
    }
    Ok(())
  }

  async fn renew_session(
    &self,
    id: &str,
    end: DateTime<FixedOffset>,
    token: &str,
  ) -> Result<()> {
    let id_owned = id.to_owned();
    let end = encode_dt(end);
    let token = token.to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE vms
           SET session_end = ?2, reminder_sent = 0, reminder_token = ?3
           WHERE id = ?1 AND session_end IS NOT NULL",
          params![id_owned, end, token],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NoSession(id.to_owned()));
    }
    Ok(())
  }

  async fn mark_reminder_sent(&self, id: &str, token: &str) -> Result<bool> {
    let (id, token) = (id.to_owned(), token.to_owned());
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE vms SET reminder_sent = 1
           WHERE id = ?1 AND reminder_token = ?2 AND session_end IS NOT NULL",
          params![id, token],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }

  async fn clear_session(&self, id: &str) -> Result<()> {
    self
      .execute_one(
        "UPDATE vms
         SET session_start = NULL, session_end = NULL,
             reminder_sent = NULL, reminder_token = NULL
         WHERE id = ?1",
        id.to_owned(),
      )
      .await?;
    Ok(())
  }

  async fn session_of(&self, id: &str) -> Result<Option<SessionRecord>> {
    let id = id.to_owned();
    let raw: Option<RawSession> = self
      .conn
      .call(move |conn| {
        let sql =
          format!("SELECT {SESSION_COLUMNS} FROM vms WHERE id = ?1 AND session_end IS NOT NULL");
        Ok(conn.query_row(&sql, params![id], RawSession::from_row).optional()?)
      })
      .await?;

    raw.map(RawSession::into_record).transpose()
  }

  async fn active_sessions(&self) -> Result<Vec<SessionRecord>> {
    let raws: Vec<RawSession> = self
      .conn
      .call(|conn| {
        let sql = format!(
          "SELECT {SESSION_COLUMNS} FROM vms WHERE session_end IS NOT NULL ORDER BY session_end"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawSession::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSession::into_record).collect()
  }

  async fn instance_by_token(&self, token: &str) -> Result<Option<String>> {
    self
      .query_optional(
        "SELECT id FROM vms WHERE reminder_token = ?1 AND session_end IS NOT NULL",
        token.to_owned(),
      )
      .await
  }

  // ── Owners ────────────────────────────────────────────────────────────────

  async fn upsert_user(&self, user_id: &str, email: &str) -> Result<()> {
    let user_id = user_id.to_owned();
    let email = email.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, email) VALUES (?1, ?2)
           ON CONFLICT (user_id) DO UPDATE SET email = excluded.email",
          params![user_id, email],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn owner_email_of(&self, id: &str) -> Result<Option<String>> {
    self
      .query_optional(
        "SELECT u.email FROM vms v JOIN users u ON u.user_id = v.owner_id WHERE v.id = ?1",
        id.to_owned(),
      )
      .await
  }
}
