//! Integration tests for `SqliteCatalog` against an in-memory database.

use chrono::{Duration, FixedOffset, TimeZone as _};
use labvm_core::{
  ErrorKind,
  catalog::Catalog,
  session::SessionRecord,
  vm::{NewInstance, Vm, VmKind},
};

use crate::{Error, SqliteCatalog};

async fn catalog() -> SqliteCatalog {
  SqliteCatalog::open_in_memory()
    .await
    .expect("in-memory catalog")
}

/// A catalog holding base `jammy.img` and template `t1`.
async fn seeded() -> SqliteCatalog {
  let c = catalog().await;
  c.add_vm(&Vm::base("jammy.img")).await.unwrap();
  c.add_vm(&Vm::template("t1")).await.unwrap();
  c
}

fn new_instance(id: &str, subject: &str) -> NewInstance {
  NewInstance {
    instance_id: id.into(),
    template_id: "t1".into(),
    subject_id:  subject.into(),
    owner_id:    Some("u1".into()),
  }
}

// ─── VMs ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_base_and_template() {
  let c = seeded().await;

  assert!(c.exists("jammy.img").await.unwrap());
  assert!(c.is_base("jammy.img").await.unwrap());
  assert!(!c.is_template("jammy.img").await.unwrap());
  assert!(c.is_template("t1").await.unwrap());
  assert!(c.exists_by_description("jammy.img").await.unwrap());
  assert_eq!(
    c.description_of("jammy.img").await.unwrap().as_deref(),
    Some("jammy.img")
  );

  let bases = c.base_images().await.unwrap();
  assert_eq!(bases.len(), 1);
  assert_eq!(bases[0].kind, VmKind::Base);
}

#[tokio::test]
async fn missing_vm_reads_as_none() {
  let c = catalog().await;
  assert!(!c.exists("nope").await.unwrap());
  assert!(c.get_vm("nope").await.unwrap().is_none());
  assert!(c.subject_id_of_vm("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_description_is_a_constraint_violation() {
  let c = seeded().await;
  let mut dup = Vm::template("t2");
  dup.description = Some("jammy.img".into());

  let err = c.add_vm(&dup).await.unwrap_err();
  assert!(matches!(err, Error::Constraint(_)), "{err:?}");
  assert_eq!(labvm_core::Error::from(err).kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn instances_cannot_bypass_reservation() {
  let c = seeded().await;
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
  assert!(matches!(c.add_vm(&vm).await, Err(Error::Constraint(_))));
}

// ─── Reservation and allocation ──────────────────────────────────────────────

#[tokio::test]
async fn first_instance_bootstraps_subject() {
  let c = seeded().await;

  let r = c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();
  assert_eq!(r.vlan, 2);
  assert_eq!(r.vm_vlan_identifier, 2);
  assert!(r.subject_created);
  assert!(r.bootstrap);

  assert!(c.subject_exists("s1").await.unwrap());
  assert_eq!(c.subject_vlan("s1").await.unwrap(), Some(2));
  assert_eq!(c.vlan_of_vm("i1").await.unwrap(), Some(2));
  assert_eq!(c.vm_vlan_id_of("i1").await.unwrap(), Some(2));
  assert_eq!(c.subject_id_of_vm("i1").await.unwrap().as_deref(), Some("s1"));

  let vm = c.get_vm("i1").await.unwrap().unwrap();
  assert_eq!(vm.subject_id(), Some("s1"));
}

#[tokio::test]
async fn second_instance_gets_next_identifier() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();

  let r = c.reserve_instance(&new_instance("i2", "s1")).await.unwrap();
  assert_eq!(r.vlan, 2);
  assert_eq!(r.vm_vlan_identifier, 3);
  assert!(!r.subject_created);
  assert!(!r.bootstrap);

  assert_eq!(c.vm_vlan_identifiers_in_vlan(2).await.unwrap(), vec![2, 3]);
  assert_eq!(c.all_instance_ids().await.unwrap(), vec!["i1", "i2"]);
}

#[tokio::test]
async fn subjects_get_distinct_vlans() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();
  let r = c.reserve_instance(&new_instance("i2", "s2")).await.unwrap();

  assert_eq!(r.vlan, 3);
  assert_eq!(r.vm_vlan_identifier, 2);
  assert_eq!(c.all_vlans().await.unwrap(), vec![2, 3]);
}

#[tokio::test]
async fn add_subject_allocates_smallest_free_vlan() {
  let c = catalog().await;
  assert_eq!(c.add_subject("a").await.unwrap().vlan, 2);
  assert_eq!(c.add_subject("b").await.unwrap().vlan, 3);
  c.delete_subject("a").await.unwrap();
  assert_eq!(c.add_subject("c").await.unwrap().vlan, 2);
}

#[tokio::test]
async fn freed_identifier_is_reused() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();
  c.reserve_instance(&new_instance("i2", "s1")).await.unwrap();
  c.delete_vm("i1").await.unwrap();

  let r = c.reserve_instance(&new_instance("i3", "s1")).await.unwrap();
  assert_eq!(r.vm_vlan_identifier, 2);
}

#[tokio::test]
async fn duplicate_instance_id_conflicts_and_rolls_back() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();

  let err = c
    .reserve_instance(&new_instance("i1", "s2"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Constraint(_)), "{err:?}");
  // The subject insert of the failed reservation must not survive.
  assert!(!c.subject_exists("s2").await.unwrap());
}

#[tokio::test]
async fn unknown_template_is_rejected() {
  let c = seeded().await;
  let mut instance = new_instance("i1", "s1");
  instance.template_id = "ghost".into();

  assert!(matches!(
    c.reserve_instance(&instance).await,
    Err(Error::Constraint(_))
  ));
  assert!(!c.subject_exists("s1").await.unwrap());
}

#[tokio::test]
async fn identifiers_exhaust_after_253_instances() {
  let c = seeded().await;
  for n in 0..253 {
    c.reserve_instance(&new_instance(&format!("i{n}"), "s1"))
      .await
      .unwrap();
  }

  let err = c
    .reserve_instance(&new_instance("overflow", "s1"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Exhausted(_)), "{err:?}");
  assert!(!c.exists("overflow").await.unwrap());
}

// ─── Deletion rules ──────────────────────────────────────────────────────────

#[tokio::test]
async fn template_with_dependents_cannot_be_deleted() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();

  assert!(c.has_dependents("t1").await.unwrap());
  assert!(matches!(c.delete_vm("t1").await, Err(Error::Constraint(_))));
}

#[tokio::test]
async fn subject_with_instances_cannot_be_deleted() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();

  assert!(matches!(
    c.delete_subject("s1").await,
    Err(Error::Constraint(_))
  ));

  c.delete_vm("i1").await.unwrap();
  c.delete_subject("s1").await.unwrap();
  assert!(!c.subject_exists("s1").await.unwrap());
}

#[tokio::test]
async fn last_instance_detection() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();
  assert!(c.is_last_instance_in_subject("i1").await.unwrap());

  c.reserve_instance(&new_instance("i2", "s1")).await.unwrap();
  assert!(!c.is_last_instance_in_subject("i1").await.unwrap());
  assert!(!c.is_last_instance_in_subject("t1").await.unwrap());
}

#[tokio::test]
async fn delete_missing_vm_is_not_found() {
  let c = catalog().await;
  assert!(matches!(c.delete_vm("nope").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn base_reconciliation_compares_descriptions() {
  let c = catalog().await;
  c.add_vm(&Vm::base("jammy.img")).await.unwrap();
  c.add_vm(&Vm::base("noble.img")).await.unwrap();
  c.add_vm(&Vm::template("t1")).await.unwrap();

  let removed = c
    .delete_base_images_not_in(&["noble.img".to_string()])
    .await
    .unwrap();
  assert_eq!(removed, 1);

  let bases: Vec<_> = c
    .base_images()
    .await
    .unwrap()
    .into_iter()
    .map(|vm| vm.id)
    .collect();
  assert_eq!(bases, vec!["noble.img"]);
  assert!(c.exists("t1").await.unwrap());
}

// ─── Sessions ────────────────────────────────────────────────────────────────

fn session(id: &str, token: &str) -> SessionRecord {
  let zone = FixedOffset::east_opt(3600).unwrap();
  let start = zone.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
  SessionRecord {
    instance_id:    id.into(),
    session_start:  start,
    session_end:    start + Duration::minutes(60),
    reminder_sent:  false,
    reminder_token: token.into(),
  }
}

#[tokio::test]
async fn session_lifecycle_round_trip() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();

  assert!(c.session_of("i1").await.unwrap().is_none());

  let record = session("i1", "tok-a");
  c.start_session(&record).await.unwrap();
  assert_eq!(c.session_of("i1").await.unwrap(), Some(record.clone()));
  assert_eq!(
    c.instance_by_token("tok-a").await.unwrap().as_deref(),
    Some("i1")
  );

  assert!(c.mark_reminder_sent("i1", "tok-a").await.unwrap());
  assert!(c.session_of("i1").await.unwrap().unwrap().reminder_sent);

  let new_end = record.session_end + Duration::minutes(30);
  c.renew_session("i1", new_end, "tok-b").await.unwrap();
  let renewed = c.session_of("i1").await.unwrap().unwrap();
  assert_eq!(renewed.session_end, new_end);
  assert!(!renewed.reminder_sent);
  assert!(c.instance_by_token("tok-a").await.unwrap().is_none());
  assert_eq!(
    c.instance_by_token("tok-b").await.unwrap().as_deref(),
    Some("i1")
  );

  c.clear_session("i1").await.unwrap();
  assert!(c.session_of("i1").await.unwrap().is_none());
  assert!(c.active_sessions().await.unwrap().is_empty());
  assert!(c.instance_by_token("tok-b").await.unwrap().is_none());
}

#[tokio::test]
async fn reminder_of_renewed_session_is_not_flagged() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();
  let record = session("i1", "tok-a");
  c.start_session(&record).await.unwrap();
  c.renew_session("i1", record.session_end + Duration::minutes(30), "tok-b")
    .await
    .unwrap();

  assert!(!c.mark_reminder_sent("i1", "tok-a").await.unwrap());
  assert!(!c.session_of("i1").await.unwrap().unwrap().reminder_sent);

  c.clear_session("i1").await.unwrap();
  assert!(!c.mark_reminder_sent("i1", "tok-b").await.unwrap());
}

#[tokio::test]
async fn renew_without_session_fails() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();

  let end = session("i1", "x").session_end;
  let err = c.renew_session("i1", end, "tok").await.unwrap_err();
  assert!(matches!(err, Error::NoSession(_)), "{err:?}");
}

#[tokio::test]
async fn sessions_only_attach_to_instances() {
  let c = seeded().await;
  assert!(matches!(
    c.start_session(&session("t1", "tok")).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn active_sessions_lists_every_running_session() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();
  c.reserve_instance(&new_instance("i2", "s1")).await.unwrap();
  c.start_session(&session("i1", "a")).await.unwrap();
  c.start_session(&session("i2", "b")).await.unwrap();

  let active = c.active_sessions().await.unwrap();
  assert_eq!(active.len(), 2);
}

// ─── Owners ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn owner_email_follows_user_row() {
  let c = seeded().await;
  c.reserve_instance(&new_instance("i1", "s1")).await.unwrap();
  assert!(c.owner_email_of("i1").await.unwrap().is_none());

  c.upsert_user("u1", "old@lab.example").await.unwrap();
  c.upsert_user("u1", "student@lab.example").await.unwrap();
  assert_eq!(
    c.owner_email_of("i1").await.unwrap().as_deref(),
    Some("student@lab.example")
  );
}
