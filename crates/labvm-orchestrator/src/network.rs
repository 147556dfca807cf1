//! The router objects and guest addressing that realise a subject network.

use labvm_core::{
  hypervisor::InstanceNetwork,
  network::SubjectNetwork,
  router::{FirewallFilter, RouterObject},
};

/// Optional WireGuard remote-access uplink on the lab router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireguardUplink {
  pub interface:   String,
  pub listen_port: u16,
  /// Address range of remote peers, routed into every subject VRF.
  pub subnet:      String,
}

#[derive(Debug, Clone)]
pub struct NetworkSettings {
  /// First octet of every subject subnet.
  pub prefix:           u8,
  /// Host bridge instance NICs are attached to.
  pub vm_bridge:        String,
  /// Guest interface the VLAN sub-interface is stacked on.
  pub vm_interface:     String,
  /// Router bridge carrying lab VLANs.
  pub router_bridge:    String,
  /// Router ports tagged with every subject VLAN.
  pub trunk_interfaces: Vec<String>,
  pub wireguard:        Option<WireguardUplink>,
}

impl NetworkSettings {
  pub fn subject_network(&self, vlan: u16) -> SubjectNetwork {
    SubjectNetwork::new(self.prefix, vlan)
  }
}

fn filter(chain: &str, action: &str, matches: &[(&str, &str)]) -> RouterObject {
  RouterObject::FirewallFilter(FirewallFilter {
    chain:   chain.to_owned(),
    action:  action.to_owned(),
    matches: matches.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect(),
  })
}

/// Router objects of subject `subject_id` on `vlan`, in creation order.
/// Teardown walks the same list backwards.
pub fn subject_recipe(settings: &NetworkSettings, subject_id: &str, vlan: u16) -> Vec<RouterObject> {
  let vlan_iface = format!("vlan{vlan}");
  let list = format!("lab-{subject_id}");
  let outside = format!("!{list}");
  let vrf = format!("vrf-{subject_id}");
  let net = settings.subject_network(vlan);

  let mut tagged = vec![settings.router_bridge.clone()];
  tagged.extend(settings.trunk_interfaces.iter().cloned());

  let mut objects = vec![
    RouterObject::Vlan {
      name:      vlan_iface.clone(),
      interface: settings.router_bridge.clone(),
      vlan_id:   vlan,
    },
    RouterObject::BridgeVlan { bridge: settings.router_bridge.clone(), vlan_id: vlan, tagged },
    RouterObject::InterfaceList { name: list.clone() },
    RouterObject::ListMember { list: list.clone(), interface: vlan_iface.clone() },
    RouterObject::Vrf { name: vrf.clone(), interfaces: vec![vlan_iface.clone()] },
    RouterObject::IpAddress { address: net.gateway_cidr(), interface: vlan_iface },
    filter("input", "accept", &[("in-interface-list", list.as_str()), ("protocol", "icmp")]),
    filter("input", "drop", &[("in-interface-list", list.as_str())]),
    filter("forward", "drop", &[
      ("in-interface-list", list.as_str()),
      ("out-interface-list", outside.as_str()),
    ]),
  ];

  if let Some(wg) = &settings.wireguard {
    objects.push(RouterObject::Route {
      dst:     wg.subnet.clone(),
      gateway: wg.interface.clone(),
      table:   vrf,
    });
  }
  objects
}

/// Guest-side attachment of the instance at `host` on `vlan`.
pub fn instance_network(settings: &NetworkSettings, vlan: u16, host: u16) -> InstanceNetwork {
  let net = settings.subject_network(vlan);
  InstanceNetwork {
    bridge:    settings.vm_bridge.clone(),
    interface: settings.vm_interface.clone(),
    vlan,
    address:   net.host_cidr(host as u8),
    gateway:   net.gateway().to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings(wireguard: bool) -> NetworkSettings {
    NetworkSettings {
      prefix:           10,
      vm_bridge:        "br0".into(),
      vm_interface:     "enp1s0".into(),
      router_bridge:    "bridge".into(),
      trunk_interfaces: vec!["ether2".into()],
      wireguard:        wireguard.then(|| WireguardUplink {
        interface:   "wg-lab".into(),
        listen_port: 13231,
        subnet:      "10.255.0.0/24".into(),
      }),
    }
  }

  #[test]
  fn recipe_starts_with_vlan_and_ends_with_filters() {
    let recipe = subject_recipe(&settings(false), "s1", 2);
    assert_eq!(recipe.len(), 9);
    assert_eq!(recipe[0], RouterObject::Vlan {
      name:      "vlan2".into(),
      interface: "bridge".into(),
      vlan_id:   2,
    });
    assert_eq!(recipe[1], RouterObject::BridgeVlan {
      bridge:  "bridge".into(),
      vlan_id: 2,
      tagged:  vec!["bridge".into(), "ether2".into()],
    });
    assert_eq!(recipe[5], RouterObject::IpAddress {
      address:   "10.0.2.1/24".into(),
      interface: "vlan2".into(),
    });
    assert!(matches!(&recipe[6], RouterObject::FirewallFilter(f) if f.action == "accept"));
  }

  #[test]
  fn wireguard_uplink_adds_route_into_subject_vrf() {
    let recipe = subject_recipe(&settings(true), "s1", 2);
    assert_eq!(recipe.last(), Some(&RouterObject::Route {
      dst:     "10.255.0.0/24".into(),
      gateway: "wg-lab".into(),
      table:   "vrf-s1".into(),
    }));
  }

  #[test]
  fn instance_sits_on_its_identifier() {
    let net = instance_network(&settings(false), 3, 7);
    assert_eq!(net.address, "10.0.3.7/24");
    assert_eq!(net.gateway, "10.0.3.1");
    assert_eq!(net.vlan, 3);
    assert_eq!(net.bridge, "br0");
  }
}
