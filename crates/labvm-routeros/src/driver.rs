//! [`RouterOs`], the RouterOS [`RouterDriver`].

use labvm_core::router::{RouterDriver, RouterObject};

use crate::{
  Error, Result,
  transport::{Row, Transport},
};

/// Where an object lives on the router and how it is identified.
struct Shape {
  path:  &'static str,
  /// Natural key; used as the `print` filter.
  key:   Vec<(String, String)>,
  /// Remaining attributes, applied on `add` and reapplied on `set`.
  attrs: Vec<(String, String)>,
}

fn kv(key: &str, value: impl ToString) -> (String, String) { (key.to_owned(), value.to_string()) }

fn shape(object: &RouterObject) -> Shape {
  use RouterObject::*;

  match object {
    Wireguard { name, listen_port, mtu } => Shape {
      path:  "/interface/wireguard",
      key:   vec![kv("name", name)],
      attrs: vec![kv("listen-port", listen_port), kv("mtu", mtu)],
    },
    Vlan { name, interface, vlan_id } => Shape {
      path:  "/interface/vlan",
      key:   vec![kv("name", name)],
      attrs: vec![kv("interface", interface), kv("vlan-id", vlan_id)],
    },
    InterfaceList { name } => Shape {
      path:  "/interface/list",
      key:   vec![kv("name", name)],
      attrs: vec![],
    },
    ListMember { list, interface } => Shape {
      path:  "/interface/list/member",
      key:   vec![kv("list", list), kv("interface", interface)],
      attrs: vec![],
    },
    Vrf { name, interfaces } => Shape {
      path:  "/ip/vrf",
      key:   vec![kv("name", name)],
      attrs: vec![kv("interfaces", interfaces.join(","))],
    },
    BridgeVlan { bridge, vlan_id, tagged } => Shape {
      path:  "/interface/bridge/vlan",
      key:   vec![kv("bridge", bridge), kv("vlan-ids", vlan_id)],
      attrs: vec![kv("tagged", tagged.join(","))],
    },
    WireguardPeer { name, interface, public_key, allowed_addresses } => Shape {
      path:  "/interface/wireguard/peers",
      key:   vec![kv("name", name)],
      attrs: vec![
        kv("interface", interface),
        kv("public-key", public_key),
        kv("allowed-address", allowed_addresses.join(",")),
      ],
    },
    IpAddress { address, interface } => Shape {
      path:  "/ip/address",
      key:   vec![kv("address", address), kv("interface", interface)],
      attrs: vec![],
    },
    FirewallFilter(filter) => {
      let mut key = vec![kv("chain", &filter.chain), kv("action", &filter.action)];
      key.extend(filter.matches.iter().cloned());
      Shape { path: "/ip/firewall/filter", key, attrs: vec![] }
    }
    Route { dst, gateway, table } => Shape {
      path:  "/ip/route",
      key:   vec![kv("dst-address", dst), kv("gateway", gateway), kv("routing-table", table)],
      attrs: vec![],
    },
  }
}

fn command(path: &str, verb: &str) -> String { format!("{path}/{verb}") }

fn attribute(key: &str, value: &str) -> String { format!("={key}={value}") }

/// Idempotent RouterOS configuration over any [`Transport`].
pub struct RouterOs<T> {
  transport: T,
}

impl<T: Transport> RouterOs<T> {
  pub fn new(transport: T) -> Self { Self { transport } }

  pub fn transport(&self) -> &T { &self.transport }

  /// `.id`s of every object at `path` matching `key`.
  async fn find(&self, path: &str, key: &[(String, String)]) -> Result<Vec<String>> {
    let mut words = vec![command(path, "print")];
    words.extend(key.iter().map(|(k, v)| format!("?{k}={v}")));
    words.push("=.proplist=.id".to_owned());

    let rows = self.transport.call(words).await?;
    Ok(rows.into_iter().filter_map(|mut row| row.remove(".id")).collect())
  }

  async fn set(&self, path: &str, id: &str, attrs: &[(String, String)]) -> Result<()> {
    let mut words = vec![command(path, "set"), attribute(".id", id)];
    words.extend(attrs.iter().map(|(k, v)| attribute(k, v)));
    self.transport.call(words).await?;
    Ok(())
  }

  async fn read(&self, path: &str, key: &[(String, String)]) -> Result<Vec<Row>> {
    let mut words = vec![command(path, "print")];
    words.extend(key.iter().map(|(k, v)| format!("?{k}={v}")));
    self.transport.call(words).await
  }
}

impl<T: Transport> RouterDriver for RouterOs<T> {
  type Error = Error;

  async fn ensure(&self, object: &RouterObject, comment: Option<&str>) -> Result<()> {
    let Shape { path, key, attrs } = shape(object);

    let existing = self.find(path, &key).await?;
    if existing.is_empty() {
      let mut words = vec![command(path, "add")];
      words.extend(key.iter().chain(&attrs).map(|(k, v)| attribute(k, v)));
      self.transport.call(words).await?;
      tracing::debug!(object = %object.describe(), "router object added");
    } else if !attrs.is_empty() {
      for id in &existing {
        self.set(path, id, &attrs).await?;
      }
    }

    let present = self.find(path, &key).await?;
    if present.is_empty() {
      return Err(Error::Missing(object.describe()));
    }

    if let Some(comment) = comment {
      for id in &present {
        self.set(path, id, &[kv("comment", comment)]).await?;
      }
    }
    Ok(())
  }

  async fn remove(&self, object: &RouterObject) -> Result<()> {
    let Shape { path, key, .. } = shape(object);

    for id in self.find(path, &key).await? {
      self
        .transport
        .call(vec![command(path, "remove"), attribute(".id", &id)])
        .await?;
    }
    tracing::debug!(object = %object.describe(), "router object removed");
    Ok(())
  }

  async fn wireguard_public_key(&self, interface: &str) -> Result<String> {
    let rows = self
      .read("/interface/wireguard", &[kv("name", interface)])
      .await?;
    rows
      .into_iter()
      .find_map(|mut row| row.remove("public-key"))
      .ok_or_else(|| Error::Missing(format!("wireguard {interface}")))
  }
}
