//! Wall-clock access and the operator's time zone.

use chrono::{DateTime, FixedOffset, Offset as _, Utc};
use chrono_tz::Tz;

pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// The zone session times are computed, stored, and displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorZone {
  Named(Tz),
  /// Used when the named zone could not be resolved.
  Fixed(FixedOffset),
}

impl OperatorZone {
  /// Resolve `name` from the tz database, falling back to a fixed offset of
  /// `fallback_minutes` east of UTC.
  pub fn resolve(name: &str, fallback_minutes: i32) -> Self {
    match name.parse::<Tz>() {
      Ok(tz) => OperatorZone::Named(tz),
      Err(e) => {
        let offset = FixedOffset::east_opt(fallback_minutes * 60).unwrap_or_else(|| Utc.fix());
        tracing::warn!(
          zone = name,
          error = %e,
          fallback = %offset,
          "operator time zone unavailable; using fixed offset"
        );
        OperatorZone::Fixed(offset)
      }
    }
  }

  pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    match self {
      OperatorZone::Named(tz) => instant.with_timezone(tz).fixed_offset(),
      OperatorZone::Fixed(offset) => instant.with_timezone(offset),
    }
  }

  /// Human-readable form used in e-mails.
  pub fn display(&self, at: DateTime<FixedOffset>) -> String {
    match self {
      OperatorZone::Named(tz) => at.with_timezone(tz).format("%d/%m/%Y %H:%M %Z").to_string(),
      OperatorZone::Fixed(_) => at.format("%d/%m/%Y %H:%M (UTC%:z)").to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  #[test]
  fn named_zone_applies_daylight_saving() {
    let zone = OperatorZone::resolve("Europe/Madrid", 60);
    assert!(matches!(zone, OperatorZone::Named(_)));

    let winter = zone.localize(Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap());
    let summer = zone.localize(Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap());
    assert_eq!(winter.offset().local_minus_utc(), 3600);
    assert_eq!(summer.offset().local_minus_utc(), 7200);
  }

  #[test]
  fn unknown_zone_falls_back_to_fixed_offset() {
    let zone = OperatorZone::resolve("Mars/Olympus_Mons", 90);
    assert_eq!(zone, OperatorZone::Fixed(FixedOffset::east_opt(5400).unwrap()));

    let at = zone.localize(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    assert_eq!(zone.display(at), "01/03/2026 11:30 (UTC+01:30)");
  }

  #[test]
  fn named_zone_display_uses_abbreviation() {
    let zone = OperatorZone::resolve("Europe/Madrid", 60);
    let at = zone.localize(Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap());
    assert_eq!(zone.display(at), "15/01/2026 13:00 CET");
  }
}
