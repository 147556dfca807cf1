//! [`SessionManager`]: bounded run time for instances.
//!
//! The catalog holds the authoritative session columns. The timer map here
//! mirrors them so the timekeeper does not scan the catalog on every tick;
//! it is rebuilt from the catalog by [`SessionManager::restore`].
//!
//! One mutex guards the map. Start, renew, stop, and the tick all take it,
//! and catalog writes happen under it so map and catalog move together.
//! E-mails are sent after it is released. The hypervisor `stop` issued on
//! expiry does run under it, so an unresponsive hypervisor stalls the tick.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, TimeDelta};
use labvm_core::{
  Backends, Error, Result,
  catalog::Catalog as _,
  hypervisor::Hypervisor as _,
  mail::{Email, Mailer as _},
  session::SessionRecord,
};
use rand_core::{OsRng, RngCore as _};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
  CoreResult as _,
  clock::{Clock, OperatorZone},
};

#[derive(Debug, Clone)]
pub struct SessionSettings {
  /// Length of a session and of each renewal.
  pub duration:        TimeDelta,
  /// How long before expiry the reminder goes out.
  pub reminder_window: TimeDelta,
  /// Timekeeper cadence.
  pub tick:            Duration,
  /// Base URL of the frontend; renewal links point below it.
  pub frontend_url:    String,
}

impl SessionSettings {
  pub fn renewal_url(&self, token: &str) -> String {
    format!("{}/sessions/renew?token={token}", self.frontend_url.trim_end_matches('/'))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Timer {
  end:           DateTime<FixedOffset>,
  token:         String,
  reminder_sent: bool,
}

impl From<&SessionRecord> for Timer {
  fn from(record: &SessionRecord) -> Self {
    Self {
      end:           record.session_end,
      token:         record.reminder_token.clone(),
      reminder_sent: record.reminder_sent,
    }
  }
}

/// 32 random bytes, hex-encoded.
fn mint_token() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}

struct Reminder {
  instance_id: String,
  end:         DateTime<FixedOffset>,
  token:       String,
}

pub struct SessionManager<B: Backends> {
  catalog:    Arc<B::Catalog>,
  hypervisor: Arc<B::Hypervisor>,
  mailer:     Arc<B::Mailer>,
  clock:      Arc<dyn Clock>,
  zone:       OperatorZone,
  settings:   SessionSettings,
  timers:     Mutex<HashMap<String, Timer>>,
}

impl<B: Backends> SessionManager<B> {
  pub fn new(
    catalog: Arc<B::Catalog>,
    hypervisor: Arc<B::Hypervisor>,
    mailer: Arc<B::Mailer>,
    clock: Arc<dyn Clock>,
    zone: OperatorZone,
    settings: SessionSettings,
  ) -> Self {
    Self {
      catalog,
      hypervisor,
      mailer,
      clock,
      zone,
      settings,
      timers: Mutex::new(HashMap::new()),
    }
  }

  fn now(&self) -> DateTime<FixedOffset> { self.zone.localize(self.clock.now()) }

  /// Ids with a pending timer.
  pub async fn tracked(&self) -> Vec<String> {
    let mut ids: Vec<_> = self.timers.lock().await.keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Rebuild the timer map from the catalog. Returns the number of sessions.
  pub async fn restore(&self) -> Result<usize> {
    let records = self.catalog.active_sessions().await.core()?;
    let mut timers = self.timers.lock().await;
    timers.clear();
    for record in &records {
      timers.insert(record.instance_id.clone(), Timer::from(record));
    }
    tracing::info!(sessions = records.len(), "sessions restored");
    Ok(records.len())
  }

  // ─── Transitions ───────────────────────────────────────────────────────────

  /// Begin (or restart) the session of `instance_id` and notify its owner.
  #[tracing::instrument(skip(self))]
  pub async fn start_session(&self, instance_id: &str) -> Result<SessionRecord> {
    let record = {
      let mut timers = self.timers.lock().await;
      let start = self.now();
      let record = SessionRecord {
        instance_id:    instance_id.to_owned(),
        session_start:  start,
        session_end:    start + self.settings.duration,
        reminder_sent:  false,
        reminder_token: mint_token(),
      };
      self.catalog.start_session(&record).await.core()?;
      timers.insert(instance_id.to_owned(), Timer::from(&record));
      record
    };

    tracing::info!(end = %record.session_end, "session started");
    let body = format!(
      "<p>Your lab machine <b>{id}</b> is running until <b>{end}</b>.</p>\
       <p><a href=\"{url}\">Extend the session</a></p>",
      id = instance_id,
      end = self.zone.display(record.session_end),
      url = self.settings.renewal_url(&record.reminder_token),
    );
    if let Err(e) = self.notify(instance_id, "Lab session started", body).await {
      tracing::warn!(error = %e, "session start notice not sent");
    }
    Ok(record)
  }

  /// Extend the active session of `instance_id` by a full session length
  /// from now, with a fresh token.
  #[tracing::instrument(skip(self))]
  pub async fn renew_session(&self, instance_id: &str) -> Result<SessionRecord> {
    let mut timers = self.timers.lock().await;

    let Some(mut record) = self.catalog.session_of(instance_id).await.core()? else {
      return Err(Error::NoActiveSession(instance_id.to_owned()));
    };
    record.session_end = self.now() + self.settings.duration;
    record.reminder_sent = false;
    record.reminder_token = mint_token();

    self
      .catalog
      .renew_session(instance_id, record.session_end, &record.reminder_token)
      .await
      .core()?;
    timers.insert(instance_id.to_owned(), Timer::from(&record));

    tracing::info!(end = %record.session_end, "session renewed");
    Ok(record)
  }

  /// Renew whichever session `token` was issued for.
  pub async fn renew_by_token(&self, token: &str) -> Result<SessionRecord> {
    if token.is_empty() {
      return Err(Error::BadRequest("token is required".into()));
    }
    let Some(instance_id) = self.catalog.instance_by_token(token).await.core()? else {
      return Err(Error::NotFound("renewal token".into()));
    };
    self.renew_session(&instance_id).await
  }

  /// End the session of `instance_id`. Safe when none is active.
  #[tracing::instrument(skip(self))]
  pub async fn stop_session(&self, instance_id: &str) -> Result<()> {
    let mut timers = self.timers.lock().await;
    self.catalog.clear_session(instance_id).await.core()?;
    if timers.remove(instance_id).is_some() {
      tracing::info!("session stopped");
    }
    Ok(())
  }

  // ─── Timekeeper ────────────────────────────────────────────────────────────

  /// One pass over every tracked session: expire what is due and send
  /// reminders for what is about to be.
  pub async fn tick(&self) {
    let now = self.now();
    let mut reminders = Vec::new();

    {
      let mut timers = self.timers.lock().await;
      let ids: Vec<String> = timers.keys().cloned().collect();

      for id in ids {
        let Some(timer) = timers.get(&id).cloned() else {
          continue;
        };

        if now >= timer.end {
          match self.catalog.session_of(&id).await {
            Ok(Some(record)) if record.session_end != timer.end => {
              tracing::debug!(instance_id = %id, end = %record.session_end, "adopting renewed end");
              timers.insert(id, Timer::from(&record));
            }
            Ok(None) => {
              timers.remove(&id);
            }
            Ok(Some(_)) => {
              if self.expire(&id).await {
                timers.remove(&id);
              }
            }
            Err(e) => {
              let e: Error = e.into();
              tracing::error!(instance_id = %id, error = %e, "cannot read session; retrying next tick");
            }
          }
        } else if !timer.reminder_sent && timer.end - now <= self.settings.reminder_window {
          reminders.push(Reminder { instance_id: id, end: timer.end, token: timer.token });
        }
      }
    }

    for reminder in reminders {
      self.remind(reminder).await;
    }
  }

  /// Stop an expired instance and clear its session. Returns whether the
  /// timer can be dropped.
  async fn expire(&self, instance_id: &str) -> bool {
    if let Err(e) = self.hypervisor.stop(instance_id).await {
      let e: Error = e.into();
      tracing::warn!(instance_id, error = %e, "stop on expiry failed; clearing session anyway");
    }
    match self.catalog.clear_session(instance_id).await {
      Ok(()) => {
        tracing::info!(instance_id, "session expired");
        true
      }
      Err(e) => {
        let e: Error = e.into();
        tracing::error!(instance_id, error = %e, "cannot clear expired session");
        false
      }
    }
  }

  async fn remind(&self, reminder: Reminder) {
    let Reminder { instance_id, end, token } = reminder;
    let body = format!(
      "<p>Your lab machine <b>{instance_id}</b> will be stopped at <b>{end}</b>.</p>\
       <p><a href=\"{url}\">Extend the session</a></p>",
      end = self.zone.display(end),
      url = self.settings.renewal_url(&token),
    );

    if let Err(e) = self.notify(&instance_id, "Lab session ending soon", body).await {
      tracing::warn!(instance_id = %instance_id, error = %e, "reminder not sent; retrying next tick");
      return;
    }

    // A renewal may have landed while the mail was in flight; the flag only
    // applies to the session the token was issued for.
    match self.catalog.mark_reminder_sent(&instance_id, &token).await {
      Ok(true) => {}
      Ok(false) => {
        tracing::debug!(instance_id = %instance_id, "session superseded during reminder");
        return;
      }
      Err(e) => {
        let e: Error = e.into();
        tracing::warn!(instance_id = %instance_id, error = %e, "reminder sent but not recorded");
        return;
      }
    }
    let mut timers = self.timers.lock().await;
    if let Some(timer) = timers.get_mut(&instance_id)
      && timer.token == token
    {
      timer.reminder_sent = true;
    }
  }

  /// Mail the owner of `instance_id`. Returns `Ok(false)` when the owner has
  /// no address on record.
  async fn notify(&self, instance_id: &str, subject: &str, html_body: String) -> Result<bool> {
    let Some(to) = self.catalog.owner_email_of(instance_id).await.core()? else {
      tracing::warn!(instance_id, "owner has no e-mail address; skipping mail");
      return Ok(false);
    };
    let email = Email { to, subject: subject.to_owned(), html_body };
    self
      .mailer
      .send(&email)
      .await
      .map_err(|e| Error::upstream(labvm_core::Backend::Mail, e.to_string()))?;
    Ok(true)
  }

  /// Run [`tick`](Self::tick) forever at the configured cadence.
  pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.settings.tick);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      tracing::info!(every = ?self.settings.tick, "session timekeeper running");
      loop {
        interval.tick().await;
        self.tick().await;
      }
    })
  }
}
