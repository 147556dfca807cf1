//! Configuration and backend wiring of the `labvm-server` binary.

pub mod mail;

use std::{path::PathBuf, time::Duration};

use chrono::TimeDelta;
use labvm_core::Backends;
use labvm_orchestrator::{NetworkSettings, OperatorZone, SessionSettings, WireguardUplink};
use labvm_routeros::{ApiClient, ClientConfig, RouterOs};
use labvm_store_sqlite::SqliteCatalog;
use labvm_virsh::{Virsh, VirshConfig};
use serde::Deserialize;

pub use mail::SmtpMailer;

/// The backends a production deployment runs on.
pub struct LiveBackends;

impl Backends for LiveBackends {
  type Catalog = SqliteCatalog;
  type Hypervisor = Virsh;
  type Router = RouterOs<ApiClient>;
  type Mailer = SmtpMailer;
}

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, read from an optional TOML file overlaid by the
/// process environment (`VMS_STORAGE_PATH`, `ROUTER_ADDR`, …).
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub vms_storage_path:       PathBuf,
  pub cloud_init_images_path: PathBuf,
  pub vms_bridge:             String,
  pub vm_network_interface:   String,
  pub database_url:           String,

  pub router_addr:             String,
  pub router_user:             String,
  pub router_pass:             String,
  pub router_bridge:           String,
  /// Comma-separated.
  pub router_trunk_interfaces: String,
  pub router_wg_interface:     Option<String>,
  pub router_wg_port:          u16,
  pub router_wg_subnet:        Option<String>,
  pub lab_subnet_prefix:       u8,

  pub smtp_from:     String,
  pub smtp_username: Option<String>,
  pub smtp_password: Option<String>,
  pub smtp_host:     String,
  pub smtp_port:     u16,

  pub frontend_url:                     String,
  pub session_duration_minutes:         i64,
  pub session_reminder_minutes:         i64,
  pub session_tick_seconds:             u64,
  pub operator_timezone:                String,
  pub operator_fallback_offset_minutes: i32,

  pub hypervisor_timeout_seconds: Option<u64>,
  pub router_timeout_seconds:     Option<u64>,

  pub api_url: String,
}

impl ServerConfig {
  /// Read `file` (when present) and then `env` over the built-in defaults.
  pub fn load(
    file: Option<PathBuf>,
    env: config::Environment,
  ) -> Result<Self, config::ConfigError> {
    let mut builder = config::Config::builder()
      .set_default("vms_bridge", "br0")?
      .set_default("vm_network_interface", "enp1s0")?
      .set_default("database_url", "sqlite://labvm.db")?
      .set_default("router_bridge", "bridge")?
      .set_default("router_trunk_interfaces", "ether2")?
      .set_default("router_wg_port", 13231)?
      .set_default("lab_subnet_prefix", 10)?
      .set_default("smtp_port", 587)?
      .set_default("session_duration_minutes", 1)?
      .set_default("session_reminder_minutes", 30)?
      .set_default("session_tick_seconds", 10)?
      .set_default("operator_timezone", "Europe/Madrid")?
      .set_default("operator_fallback_offset_minutes", 60)?
      .set_default("api_url", "0.0.0.0:8080")?;
    if let Some(file) = file {
      builder = builder.add_source(config::File::from(file).required(false));
    }
    builder.add_source(env.try_parsing(true)).build()?.try_deserialize()
  }

  /// `API_URL` without any `scheme://` prefix or trailing slash.
  pub fn listen_addr(&self) -> &str {
    let addr = self.api_url.split_once("://").map_or(self.api_url.as_str(), |(_, rest)| rest);
    addr.trim_end_matches('/')
  }

  /// `DATABASE_URL` as a filesystem path.
  pub fn database_path(&self) -> PathBuf {
    let url = self.database_url.as_str();
    let path = url
      .strip_prefix("sqlite://")
      .or_else(|| url.strip_prefix("sqlite:"))
      .unwrap_or(url);
    PathBuf::from(path)
  }

  pub fn network(&self) -> NetworkSettings {
    let wireguard = match (&self.router_wg_interface, &self.router_wg_subnet) {
      (Some(interface), Some(subnet)) => Some(WireguardUplink {
        interface:   interface.clone(),
        listen_port: self.router_wg_port,
        subnet:      subnet.clone(),
      }),
      (Some(interface), None) => {
        tracing::warn!(%interface, "ROUTER_WG_SUBNET unset; wireguard uplink disabled");
        None
      }
      _ => None,
    };
    NetworkSettings {
      prefix: self.lab_subnet_prefix,
      vm_bridge: self.vms_bridge.clone(),
      vm_interface: self.vm_network_interface.clone(),
      router_bridge: self.router_bridge.clone(),
      trunk_interfaces: self
        .router_trunk_interfaces
        .split(',')
        .map(str::trim)
        .filter(|port| !port.is_empty())
        .map(str::to_owned)
        .collect(),
      wireguard,
    }
  }

  pub fn sessions(&self) -> SessionSettings {
    SessionSettings {
      duration:        TimeDelta::minutes(self.session_duration_minutes),
      reminder_window: TimeDelta::minutes(self.session_reminder_minutes),
      tick:            Duration::from_secs(self.session_tick_seconds.max(1)),
      frontend_url:    self.frontend_url.clone(),
    }
  }

  pub fn zone(&self) -> OperatorZone {
    OperatorZone::resolve(&self.operator_timezone, self.operator_fallback_offset_minutes)
  }

  pub fn virsh(&self) -> VirshConfig {
    let mut config = VirshConfig::new(&self.vms_storage_path, &self.cloud_init_images_path);
    config.timeout = self.hypervisor_timeout_seconds.map(Duration::from_secs);
    config
  }

  pub fn router(&self) -> ClientConfig {
    ClientConfig {
      addr:     self.router_addr.clone(),
      user:     self.router_user.clone(),
      password: self.router_pass.clone(),
      timeout:  self.router_timeout_seconds.map(Duration::from_secs),
    }
  }
}
