//! Addressing plan for subject networks.
//!
//! Subject VLAN `v` owns the /24 `P.(v / 256).(v % 256).0`, where `P` is the
//! configured lab prefix. The router answers on `.1`; instances sit on their
//! VLAN identifier.

use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectNetwork {
  pub prefix: u8,
  pub vlan:   u16,
}

impl SubjectNetwork {
  pub const GATEWAY_HOST: u8 = 1;

  pub fn new(prefix: u8, vlan: u16) -> Self { Self { prefix, vlan } }

  pub fn host(&self, host: u8) -> Ipv4Addr {
    Ipv4Addr::new(self.prefix, (self.vlan >> 8) as u8, (self.vlan & 0xff) as u8, host)
  }

  pub fn gateway(&self) -> Ipv4Addr { self.host(Self::GATEWAY_HOST) }

  /// `a.b.c.0/24`
  pub fn subnet(&self) -> String { format!("{}/24", self.host(0)) }

  /// `a.b.c.1/24`, the router-side interface address.
  pub fn gateway_cidr(&self) -> String { format!("{}/24", self.gateway()) }

  pub fn host_cidr(&self, host: u8) -> String { format!("{}/24", self.host(host)) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn low_vlan_maps_into_third_octet() {
    let net = SubjectNetwork::new(10, 2);
    assert_eq!(net.subnet(), "10.0.2.0/24");
    assert_eq!(net.gateway_cidr(), "10.0.2.1/24");
    assert_eq!(net.host_cidr(7), "10.0.2.7/24");
  }

  #[test]
  fn high_vlan_spills_into_second_octet() {
    let net = SubjectNetwork::new(10, 4094);
    assert_eq!(net.gateway(), Ipv4Addr::new(10, 15, 254, 1));
  }
}
