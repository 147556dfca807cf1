//! NoCloud seed documents for new instances.
//!
//! cloud-init accepts JSON wherever it accepts YAML, so every document is
//! rendered with `serde_json` and `user-data` only gains the `#cloud-config`
//! header line.

use labvm_core::hypervisor::InstanceSpec;
use serde_json::json;
use sha_crypt::{Sha512Params, sha512_simple};

use crate::{Error, Result};

/// The three files `cloud-localds` packs into a seed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedDocuments {
  pub user_data:      String,
  pub meta_data:      String,
  pub network_config: String,
}

/// Render the seed for `spec`. The password is stored as a SHA-512 crypt
/// hash; the plain text never reaches the image.
pub fn compose_seed(spec: &InstanceSpec) -> Result<SeedDocuments> {
  let password_hash = sha512_simple(&spec.password, &Sha512Params::default())
    .map_err(|e| Error::PasswordHash(format!("{e:?}")))?;

  let user_data = json!({
    "hostname": spec.instance_id,
    "ssh_pwauth": true,
    "users": [{
      "name": spec.login,
      "passwd": password_hash,
      "lock_passwd": false,
      "shell": "/bin/bash",
      "sudo": "ALL=(ALL) NOPASSWD:ALL",
      "ssh_authorized_keys": spec.ssh_keys,
    }],
  });

  let meta_data = json!({
    "instance-id": spec.instance_id,
    "local-hostname": spec.instance_id,
  });

  let net = &spec.network;
  let vlan_interface = format!("{}.{}", net.interface, net.vlan);
  let network_config = json!({
    "version": 2,
    "ethernets": {
      net.interface.as_str(): { "dhcp4": false },
    },
    "vlans": {
      vlan_interface: {
        "id": net.vlan,
        "link": net.interface,
        "addresses": [net.address],
        "routes": [{ "to": "default", "via": net.gateway }],
      },
    },
  });

  Ok(SeedDocuments {
    user_data:      format!("#cloud-config\n{user_data:#}\n"),
    meta_data:      format!("{meta_data:#}\n"),
    network_config: format!("{network_config:#}\n"),
  })
}

#[cfg(test)]
mod tests {
  use labvm_core::hypervisor::InstanceNetwork;

  use super::*;

  fn spec() -> InstanceSpec {
    InstanceSpec {
      template_id: "t1".into(),
      instance_id: "i1".into(),
      disk_mb:     10_240,
      vcpus:       2,
      ram_mb:      2048,
      login:       "student".into(),
      password:    "hunter2".into(),
      ssh_keys:    vec!["ssh-ed25519 AAAA student@laptop".into()],
      network:     InstanceNetwork {
        bridge:    "br-lab".into(),
        interface: "enp1s0".into(),
        vlan:      2,
        address:   "10.0.2.2/24".into(),
        gateway:   "10.0.2.1".into(),
      },
    }
  }

  fn body(doc: &str) -> serde_json::Value {
    let json = doc.strip_prefix("#cloud-config\n").unwrap_or(doc);
    serde_json::from_str(json).unwrap()
  }

  #[test]
  fn user_data_carries_login_keys_and_hashed_password() {
    let seed = compose_seed(&spec()).unwrap();
    assert!(seed.user_data.starts_with("#cloud-config\n"));
    assert!(!seed.user_data.contains("hunter2"));

    let user = &body(&seed.user_data)["users"][0];
    assert_eq!(user["name"], "student");
    assert!(user["passwd"].as_str().unwrap().starts_with("$6$"));
    assert_eq!(user["ssh_authorized_keys"][0], "ssh-ed25519 AAAA student@laptop");
  }

  #[test]
  fn network_config_puts_address_on_vlan_subinterface() {
    let seed = compose_seed(&spec()).unwrap();
    let net = body(&seed.network_config);
    let vlan = &net["vlans"]["enp1s0.2"];
    assert_eq!(vlan["id"], 2);
    assert_eq!(vlan["link"], "enp1s0");
    assert_eq!(vlan["addresses"][0], "10.0.2.2/24");
    assert_eq!(vlan["routes"][0]["via"], "10.0.2.1");
    assert_eq!(net["ethernets"]["enp1s0"]["dhcp4"], false);
  }

  #[test]
  fn meta_data_names_the_instance() {
    let seed = compose_seed(&spec()).unwrap();
    assert_eq!(body(&seed.meta_data)["instance-id"], "i1");
  }
}
