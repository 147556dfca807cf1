//! libvirt-backed [`Hypervisor`](labvm_core::hypervisor::Hypervisor).
//!
//! Every operation shells out to the libvirt and QEMU command-line tools
//! (`virsh`, `virt-clone`, `virt-install`, `qemu-img`, `cloud-localds`). One
//! short-lived subprocess is spawned per step; nothing is kept open between
//! calls.

mod cloud_init;
mod command;
mod listing;
mod virsh;

pub mod error;

pub use cloud_init::{SeedDocuments, compose_seed};
pub use command::trim_stderr;
pub use error::{Error, Result};
pub use listing::parse_list_status;
pub use virsh::{Tools, Virsh, VirshConfig};
