//! End-to-end tests of the router over the in-memory backends.

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode},
};
use chrono::{TimeDelta, TimeZone as _, Utc};
use labvm_core::Backends;
use labvm_orchestrator::{
  NetworkSettings, OperatorZone, Orchestrator, SessionManager, SessionSettings,
  testing::{FakeHypervisor, FakeMailer, ManualClock},
};
use labvm_routeros::{MemoryRouter, RouterOs};
use labvm_store_sqlite::SqliteCatalog;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::api_router;

struct TestBackends;

impl Backends for TestBackends {
  type Catalog = SqliteCatalog;
  type Hypervisor = FakeHypervisor;
  type Router = RouterOs<MemoryRouter>;
  type Mailer = FakeMailer;
}

struct App {
  router:  Router,
  orch:    Arc<Orchestrator<TestBackends>>,
  hv:      Arc<FakeHypervisor>,
  mailer:  Arc<FakeMailer>,
}

async fn app() -> App {
  let catalog = Arc::new(SqliteCatalog::open_in_memory().await.unwrap());
  let hv = Arc::new(FakeHypervisor::new());
  hv.add_image("jammy.img");
  let mailer = Arc::new(FakeMailer::new());
  let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()));

  let sessions = Arc::new(SessionManager::new(
    catalog.clone(),
    hv.clone(),
    mailer.clone(),
    clock,
    OperatorZone::resolve("Europe/Madrid", 60),
    SessionSettings {
      duration:        TimeDelta::minutes(1),
      reminder_window: TimeDelta::seconds(20),
      tick:            Duration::from_secs(1),
      frontend_url:    "https://lab.example.edu".into(),
    },
  ));
  let network = NetworkSettings {
    prefix:           10,
    vm_bridge:        "br0".into(),
    vm_interface:     "enp1s0".into(),
    router_bridge:    "bridge".into(),
    trunk_interfaces: vec!["ether2".into()],
    wireguard:        None,
  };
  let orch = Arc::new(Orchestrator::new(
    catalog,
    hv.clone(),
    Arc::new(RouterOs::new(MemoryRouter::new())),
    sessions,
    network,
  ));

  App { router: api_router(orch.clone()), orch, hv, mailer }
}

async fn call(app: &App, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let mut builder = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(json) => {
      builder = builder.header("content-type", "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };
  let resp = app.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, value)
}

fn create_body(instance: &str, subject: &str) -> Value {
  json!({
    "templateId": "t1",
    "instanceId": instance,
    "subjectId": subject,
    "userId": "u1",
    "sizeMB": 20480,
    "vcpuCount": 2,
    "vramMB": 2048,
    "username": "student",
    "password": "changeme",
    "publicSshKeys": ["ssh-ed25519 AAAA student@laptop"]
  })
}

/// An app with base `jammy.img`, template `t1`, and owner `u1`.
async fn seeded() -> App {
  let app = app().await;
  let (status, _) = call(&app, "POST", "/vms/bases/reconcile", None).await;
  assert_eq!(status, StatusCode::OK);
  let (status, _) = call(
    &app,
    "POST",
    "/vms/clone",
    Some(json!({ "sourceVmId": "jammy.img", "targetVmId": "t1" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  let (status, _) =
    call(&app, "PUT", "/users/u1", Some(json!({ "email": "ada@lab.example.edu" }))).await;
  assert_eq!(status, StatusCode::OK);
  app
}

// ─── Catalog ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconcile_reports_added_bases() {
  let app = app().await;
  let (status, body) = call(&app, "POST", "/vms/bases/reconcile", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "removed": 0, "added": ["jammy.img"] }));
}

#[tokio::test]
async fn list_returns_catalog_rows() {
  let app = seeded().await;
  let (status, body) = call(&app, "GET", "/vms", None).await;
  assert_eq!(status, StatusCode::OK);
  let kinds: Vec<_> = body.as_array().unwrap().iter().map(|vm| vm["kind"].clone()).collect();
  assert!(kinds.contains(&json!("base")));
  assert!(kinds.contains(&json!("template")));
}

#[tokio::test]
async fn clone_of_unknown_source_is_404() {
  let app = seeded().await;
  let (status, body) = call(
    &app,
    "POST",
    "/vms/clone",
    Some(json!({ "sourceVmId": "nope.img", "targetVmId": "t2" })),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "vm nope.img not found");
}

#[tokio::test]
async fn clone_onto_existing_id_is_409() {
  let app = seeded().await;
  let (status, _) = call(
    &app,
    "POST",
    "/vms/clone",
    Some(json!({ "sourceVmId": "jammy.img", "targetVmId": "t1" })),
  )
  .await;
  assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_body_is_400() {
  let app = seeded().await;
  let (status, body) = call(&app, "POST", "/vms/clone", Some(json!({ "sourceVmId": 3 }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].is_string());
}

// ─── Instances ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_instance_returns_allocation() {
  let app = seeded().await;
  let (status, body) = call(&app, "POST", "/instances/create", Some(create_body("i1", "s1"))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "vlan": 2, "vmVlanIdentifier": 2 }));

  let spec = app.hv.spec_of("i1").unwrap();
  assert_eq!(spec.disk_mb, 20480);
  assert_eq!(spec.ram_mb, 2048);
  assert_eq!(spec.ssh_keys.len(), 1);

  let (status, _) = call(&app, "POST", "/instances/create", Some(create_body("i1", "s1"))).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn create_with_missing_fields_is_400() {
  let app = seeded().await;
  let mut body = create_body("i1", "s1");
  body["password"] = json!("");
  let (status, _) = call(&app, "POST", "/instances/create", Some(body)).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) =
    call(&app, "POST", "/instances/create", Some(json!({ "templateId": "t1" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hypervisor_failure_is_500_with_its_message() {
  let app = seeded().await;
  app.hv.fail_on("create_instance", "Cannot access storage file");
  let (status, body) = call(&app, "POST", "/instances/create", Some(create_body("i1", "s1"))).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(body, json!({ "error": "Cannot access storage file" }));
}

#[tokio::test]
async fn delete_instance_then_unknown_is_404() {
  let app = seeded().await;
  call(&app, "POST", "/instances/create", Some(create_body("i1", "s1"))).await;

  let (status, body) = call(&app, "DELETE", "/vms/delete/i1", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, Value::Null);

  let (status, _) = call(&app, "DELETE", "/vms/delete/i1", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Power and sessions ───────────────────────────────────────────────────────

#[tokio::test]
async fn start_reports_status_and_mails_renewal_link() {
  let app = seeded().await;
  call(&app, "POST", "/instances/create", Some(create_body("i1", "s1"))).await;

  let (status, _) = call(&app, "POST", "/vms/start/i1", None).await;
  assert_eq!(status, StatusCode::OK);

  let (status, body) = call(&app, "GET", "/vms/status", None).await;
  assert_eq!(status, StatusCode::OK);
  assert!(body.as_array().unwrap().contains(&json!({ "vmId": "i1", "status": "running" })));

  let sent = app.mailer.sent();
  assert_eq!(sent.len(), 1);
  assert!(sent[0].html_body.contains("https://lab.example.edu/sessions/renew?token="));
}

#[tokio::test]
async fn renew_by_token_rotates_it() {
  let app = seeded().await;
  call(&app, "POST", "/instances/create", Some(create_body("i1", "s1"))).await;
  call(&app, "POST", "/vms/start/i1", None).await;
  let html = app.mailer.sent()[0].html_body.clone();
  let token: String = html
    .split("token=")
    .nth(1)
    .unwrap()
    .chars()
    .take_while(char::is_ascii_hexdigit)
    .collect();

  let (status, body) = call(&app, "POST", &format!("/sessions/renew?token={token}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["vmId"], "i1");

  let (status, _) = call(&app, "POST", &format!("/sessions/renew?token={token}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn renew_without_token_is_400() {
  let app = seeded().await;
  let (status, body) = call(&app, "POST", "/sessions/renew", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["error"], "token is required");
}

#[tokio::test]
async fn malformed_query_is_400_json() {
  let app = seeded().await;
  let (status, body) = call(&app, "POST", "/sessions/renew?token=a&token=b", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("token"), "{body}");
}

#[tokio::test]
async fn undecodable_path_is_400_json() {
  let app = seeded().await;
  let (status, body) = call(&app, "POST", "/vms/start/%FF", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].is_string());
}

#[tokio::test]
async fn stop_ends_session() {
  let app = seeded().await;
  call(&app, "POST", "/instances/create", Some(create_body("i1", "s1"))).await;
  call(&app, "POST", "/vms/start/i1", None).await;

  for action in ["restart", "stop"] {
    let (status, _) = call(&app, "POST", &format!("/vms/{action}/i1"), None).await;
    assert_eq!(status, StatusCode::OK);
  }
  assert!(app.orch.sessions().tracked().await.is_empty());

  let (status, _) = call(&app, "POST", "/vms/force-stop/i1", None).await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn power_on_base_is_400() {
  let app = seeded().await;
  let (status, _) = call(&app, "POST", "/vms/start/jammy.img", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn owner_with_bad_address_is_400() {
  let app = seeded().await;
  let (status, _) = call(&app, "PUT", "/users/u2", Some(json!({ "email": "nobody" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}
