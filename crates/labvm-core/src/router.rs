//! Router objects and the [`RouterDriver`] trait.
//!
//! Every mutable object on the lab router is described by a [`RouterObject`].
//! Drivers upsert and remove objects by their natural key, so applying the
//! same object twice is a no-op and removing an absent object succeeds.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// A firewall filter rule. All parameters together form the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallFilter {
  pub chain:   String,
  pub action:  String,
  /// Arbitrary match parameters, e.g. `("in-interface-list", "lab-s1")`.
  pub matches: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterObject {
  Wireguard { name: String, listen_port: u16, mtu: u16 },
  Vlan { name: String, interface: String, vlan_id: u16 },
  InterfaceList { name: String },
  ListMember { list: String, interface: String },
  Vrf { name: String, interfaces: Vec<String> },
  BridgeVlan { bridge: String, vlan_id: u16, tagged: Vec<String> },
  WireguardPeer {
    name:              String,
    interface:         String,
    public_key:        String,
    allowed_addresses: Vec<String>,
  },
  IpAddress { address: String, interface: String },
  FirewallFilter(FirewallFilter),
  Route { dst: String, gateway: String, table: String },
}

impl RouterObject {
  /// Short label for logs.
  pub fn describe(&self) -> String {
    match self {
      RouterObject::Wireguard { name, .. } => format!("wireguard {name}"),
      RouterObject::Vlan { name, .. } => format!("vlan {name}"),
      RouterObject::InterfaceList { name } => format!("interface list {name}"),
      RouterObject::ListMember { list, interface } => {
        format!("list member {list}/{interface}")
      }
      RouterObject::Vrf { name, .. } => format!("vrf {name}"),
      RouterObject::BridgeVlan { bridge, vlan_id, .. } => {
        format!("bridge vlan {bridge}/{vlan_id}")
      }
      RouterObject::WireguardPeer { name, .. } => format!("wireguard peer {name}"),
      RouterObject::IpAddress { address, interface } => {
        format!("address {address} on {interface}")
      }
      RouterObject::FirewallFilter(f) => format!("filter {}/{}", f.chain, f.action),
      RouterObject::Route { dst, table, .. } => format!("route {dst} in {table}"),
    }
  }
}

/// Idempotent command vocabulary of the lab router.
///
/// Implementations never retry internally; a failed call is reported and the
/// caller decides on compensation.
pub trait RouterDriver: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  /// Create `object` or bring an existing one (same natural key) to the
  /// requested attributes. Fails if the object cannot be found afterwards.
  fn ensure<'a>(
    &'a self,
    object: &'a RouterObject,
    comment: Option<&'a str>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Remove every object matching the natural key of `object`.
  fn remove<'a>(
    &'a self,
    object: &'a RouterObject,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Read the public key of a WireGuard interface.
  fn wireguard_public_key<'a>(
    &'a self,
    interface: &'a str,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'a;
}
