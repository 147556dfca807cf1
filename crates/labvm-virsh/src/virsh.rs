//! [`Virsh`], the libvirt implementation of [`Hypervisor`].

use std::{
  ffi::OsStr,
  path::{Path, PathBuf},
  time::Duration,
};

use labvm_core::hypervisor::{DomainStatus, Hypervisor, InstanceSpec};

use crate::{
  Error, Result,
  cloud_init::{SeedDocuments, compose_seed},
  command::Runner,
  listing::parse_list_status,
};

/// Program names of the host tools. Overridable for hosts that install them
/// outside `PATH`.
#[derive(Debug, Clone)]
pub struct Tools {
  pub virsh:         String,
  pub virt_clone:    String,
  pub virt_install:  String,
  pub qemu_img:      String,
  pub cloud_localds: String,
}

impl Default for Tools {
  fn default() -> Self {
    Self {
      virsh:         "virsh".into(),
      virt_clone:    "virt-clone".into(),
      virt_install:  "virt-install".into(),
      qemu_img:      "qemu-img".into(),
      cloud_localds: "cloud-localds".into(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct VirshConfig {
  /// Directory holding template and instance disks and seed images.
  pub storage_path:    PathBuf,
  /// Directory of base images offered by the host.
  pub images_path:     PathBuf,
  /// Deadline for each tool invocation; `None` waits indefinitely.
  pub timeout:         Option<Duration>,
  /// Memory given to a freshly defined template, in MiB.
  pub template_ram_mb: u64,
  pub template_vcpus:  u32,
  pub tools:           Tools,
}

impl VirshConfig {
  pub fn new(storage_path: impl Into<PathBuf>, images_path: impl Into<PathBuf>) -> Self {
    Self {
      storage_path:    storage_path.into(),
      images_path:     images_path.into(),
      timeout:         None,
      template_ram_mb: 2048,
      template_vcpus:  2,
      tools:           Tools::default(),
    }
  }
}

/// Drives the local libvirt host through its command-line tools.
#[derive(Debug, Clone)]
pub struct Virsh {
  config: VirshConfig,
  runner: Runner,
}

impl Virsh {
  pub fn new(config: VirshConfig) -> Self {
    let runner = Runner { timeout: config.timeout };
    Self { config, runner }
  }

  fn disk_path(&self, id: &str) -> PathBuf {
    self.config.storage_path.join(format!("{id}.qcow2"))
  }

  fn seed_path(&self, id: &str) -> PathBuf {
    self.config.storage_path.join(format!("{id}-seed.iso"))
  }

  async fn virsh(&self, args: &[&str]) -> Result<String> {
    self.runner.run(&self.config.tools.virsh, args).await
  }

  /// Pack `seed` into a NoCloud ISO at `target`.
  async fn build_seed(&self, seed: &SeedDocuments, target: &Path) -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| Error::io("creating seed directory", e))?;
    let user_data = dir.path().join("user-data");
    let meta_data = dir.path().join("meta-data");
    let network_config = dir.path().join("network-config");

    for (path, contents) in [
      (&user_data, &seed.user_data),
      (&meta_data, &seed.meta_data),
      (&network_config, &seed.network_config),
    ] {
      tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::io(format!("writing {}", path.display()), e))?;
    }

    self
      .runner
      .run(&self.config.tools.cloud_localds, &[
        OsStr::new("--network-config"),
        network_config.as_os_str(),
        target.as_os_str(),
        user_data.as_os_str(),
        meta_data.as_os_str(),
      ])
      .await?;
    Ok(())
  }

  /// Every step of instance creation after the domain has been cloned.
  async fn configure_instance(&self, spec: &InstanceSpec) -> Result<()> {
    let id = spec.instance_id.as_str();
    let disk = self.disk_path(id);
    let seed_path = self.seed_path(id);

    let size = format!("{}M", spec.disk_mb);
    self
      .runner
      .run(&self.config.tools.qemu_img, &[
        OsStr::new("resize"),
        disk.as_os_str(),
        OsStr::new(&size),
      ])
      .await?;

    let seed = compose_seed(spec)?;
    self.build_seed(&seed, &seed_path).await?;

    let seed_arg = seed_path.to_string_lossy();
    self
      .virsh(&[
        "attach-disk", id, &*seed_arg, "sdb", "--type", "cdrom", "--mode", "readonly",
        "--config",
      ])
      .await?;

    let vcpus = spec.vcpus.to_string();
    self
      .virsh(&["setvcpus", id, vcpus.as_str(), "--config", "--maximum"])
      .await?;
    self.virsh(&["setvcpus", id, vcpus.as_str(), "--config"]).await?;

    let ram = format!("{}M", spec.ram_mb);
    self.virsh(&["setmaxmem", id, ram.as_str(), "--config"]).await?;
    self.virsh(&["setmem", id, ram.as_str(), "--config"]).await?;

    self
      .virsh(&[
        "attach-interface",
        id,
        "--type",
        "bridge",
        "--source",
        spec.network.bridge.as_str(),
        "--model",
        "virtio",
        "--config",
      ])
      .await?;
    Ok(())
  }

  /// Remove whatever a failed creation left behind.
  async fn discard_partial(&self, id: &str) {
    if let Err(e) = self.delete(id).await {
      tracing::warn!(instance_id = id, error = %e, "could not discard partial instance");
    }
  }
}

async fn remove_if_present(path: &Path) {
  match tokio::fs::remove_file(path).await {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove file"),
  }
}

impl Hypervisor for Virsh {
  type Error = Error;

  async fn clone_image(&self, source: &str, target: &str) -> Result<()> {
    let from = self.config.images_path.join(source);
    let to = self.disk_path(target);

    let taken = tokio::fs::try_exists(&to)
      .await
      .map_err(|e| Error::io(format!("probing {}", to.display()), e))?;
    if taken {
      return Err(Error::Command {
        program: self.config.tools.qemu_img.clone(),
        message: format!("disk {} already exists", to.display()),
      });
    }

    // A full copy: bases may disappear on reconciliation, so no backing chain.
    self
      .runner
      .run(&self.config.tools.qemu_img, &[
        OsStr::new("convert"),
        OsStr::new("-O"),
        OsStr::new("qcow2"),
        from.as_os_str(),
        to.as_os_str(),
      ])
      .await?;

    tracing::info!(source, target, "image cloned");
    Ok(())
  }

  async fn define_template(&self, source: &str, template_id: &str) -> Result<()> {
    let disk = format!("path={},format=qcow2", self.disk_path(template_id).display());
    let memory = self.config.template_ram_mb.to_string();
    let vcpus = self.config.template_vcpus.to_string();

    let xml = self
      .runner
      .run(&self.config.tools.virt_install, &[
        "--name",
        template_id,
        "--import",
        "--disk",
        disk.as_str(),
        "--memory",
        memory.as_str(),
        "--vcpus",
        vcpus.as_str(),
        "--os-variant",
        "generic",
        "--network",
        "none",
        "--graphics",
        "none",
        "--noautoconsole",
        "--print-xml",
      ])
      .await?;

    let file = tempfile::NamedTempFile::new().map_err(|e| Error::io("creating domain xml", e))?;
    tokio::fs::write(file.path(), xml)
      .await
      .map_err(|e| Error::io("writing domain xml", e))?;

    let path = file.path().to_string_lossy();
    self.virsh(&["define", &*path]).await?;

    tracing::info!(source, template_id, "template defined");
    Ok(())
  }

  async fn create_instance(&self, spec: &InstanceSpec) -> Result<()> {
    let id = spec.instance_id.as_str();
    let disk = self.disk_path(id).to_string_lossy().into_owned();

    self
      .runner
      .run(&self.config.tools.virt_clone, &[
        "--original",
        spec.template_id.as_str(),
        "--name",
        id,
        "--file",
        disk.as_str(),
      ])
      .await?;

    if let Err(e) = self.configure_instance(spec).await {
      tracing::warn!(instance_id = id, error = %e, "instance setup failed; discarding domain");
      self.discard_partial(id).await;
      return Err(e);
    }

    tracing::info!(instance_id = id, template_id = %spec.template_id, "instance created");
    Ok(())
  }

  async fn delete(&self, id: &str) -> Result<()> {
    // A cloned disk may exist without a domain when definition failed.
    let defined = match self.virsh(&["dominfo", id]).await {
      Ok(_) => true,
      Err(e) if e.is_missing_domain() => false,
      Err(e) => return Err(e),
    };
    if defined {
      self.runner.run_ignoring(&self.config.tools.virsh, &["destroy", id]).await;
      self.virsh(&["undefine", id, "--remove-all-storage"]).await?;
    }
    for path in [self.disk_path(id), self.seed_path(id)] {
      remove_if_present(&path).await;
    }
    tracing::info!(vm_id = id, defined, "domain deleted");
    Ok(())
  }

  async fn start(&self, id: &str) -> Result<()> { self.virsh(&["start", id]).await.map(drop) }

  async fn stop(&self, id: &str) -> Result<()> { self.virsh(&["shutdown", id]).await.map(drop) }

  async fn restart(&self, id: &str) -> Result<()> { self.virsh(&["reboot", id]).await.map(drop) }

  async fn force_stop(&self, id: &str) -> Result<()> {
    self.virsh(&["destroy", id]).await.map(drop)
  }

  async fn list_status(&self) -> Result<Vec<DomainStatus>> {
    let output = self.virsh(&["list", "--all"]).await?;
    Ok(parse_list_status(&output))
  }

  async fn list_base_images(&self) -> Result<Vec<String>> {
    let dir = &self.config.images_path;
    let context = || format!("reading {}", dir.display());

    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| Error::io(context(), e))?;
    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(context(), e))? {
      let is_file = entry
        .file_type()
        .await
        .map_err(|e| Error::io(context(), e))?
        .is_file();
      if is_file && let Some(name) = entry.file_name().to_str() {
        images.push(name.to_owned());
      }
    }
    images.sort();
    Ok(images)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn virsh_in(dir: &Path) -> Virsh {
    Virsh::new(VirshConfig::new(dir.join("storage"), dir.join("images")))
  }

  #[tokio::test]
  async fn lists_base_image_files_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    std::fs::create_dir_all(images.join("nested")).unwrap();
    std::fs::write(images.join("noble.img"), b"").unwrap();
    std::fs::write(images.join("jammy.img"), b"").unwrap();

    let found = virsh_in(dir.path()).list_base_images().await.unwrap();
    assert_eq!(found, vec!["jammy.img", "noble.img"]);
  }

  #[tokio::test]
  async fn missing_image_directory_is_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let err = virsh_in(dir.path()).list_base_images().await.unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    let core: labvm_core::Error = err.into();
    assert_eq!(core.kind(), labvm_core::ErrorKind::Upstream);
  }

  #[tokio::test]
  async fn clone_refuses_existing_target_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("storage")).unwrap();
    std::fs::write(dir.path().join("storage/t1.qcow2"), b"").unwrap();

    let err = virsh_in(dir.path()).clone_image("jammy.img", "t1").await.unwrap_err();
    assert!(err.to_string().contains("already exists"), "{err}");
  }

  #[tokio::test]
  async fn lifecycle_calls_use_configured_virsh() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = VirshConfig::new(dir.path().join("storage"), dir.path().join("images"));
    config.tools.virsh = "labvm-no-such-virsh".into();

    let err = Virsh::new(config).start("i1").await.unwrap_err();
    match err {
      Error::Spawn { program, .. } => assert_eq!(program, "labvm-no-such-virsh"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  /// An executable shell script standing in for a host tool.
  fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
  }

  #[tokio::test]
  async fn delete_without_domain_still_removes_disk() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");
    std::fs::create_dir_all(&storage).unwrap();
    std::fs::write(storage.join("t1.qcow2"), b"").unwrap();

    let mut config = VirshConfig::new(&storage, dir.path().join("images"));
    config.tools.virsh = fake_tool(
      dir.path(),
      "virsh",
      "echo \"error: failed to get domain '$2'\" >&2\nexit 1",
    );
    Virsh::new(config).delete("t1").await.unwrap();

    assert!(!storage.join("t1.qcow2").exists());
  }

  #[tokio::test]
  async fn delete_keeps_disk_when_domain_lookup_fails() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");
    std::fs::create_dir_all(&storage).unwrap();
    std::fs::write(storage.join("t1.qcow2"), b"").unwrap();

    let mut config = VirshConfig::new(&storage, dir.path().join("images"));
    config.tools.virsh = fake_tool(
      dir.path(),
      "virsh",
      "echo 'error: failed to connect to the hypervisor' >&2\nexit 1",
    );
    let err = Virsh::new(config).delete("t1").await.unwrap_err();

    assert!(err.to_string().contains("failed to connect"), "{err}");
    assert!(storage.join("t1.qcow2").exists());
  }
}
