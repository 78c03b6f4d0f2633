// file: src/rootfs/customize.rs
// version: 1.3.0
// guid: 68d0c4a7-f19e-4b52-80c3-d7a61e29f584

//! Declarative chroot customizations: cloud-init, fstab, manual ops

use crate::commands::{mount, system};
use crate::config::{FstabEntry, Manual};
use crate::error::{ImageBuildError, Result};
use crate::statemachine::classic::ClassicStateMachine;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

impl ClassicStateMachine {
    /// customize_cloud_init: place the configured seed data where
    /// cloud-init's NoCloud datasource reads it.
    pub(crate) async fn customize_cloud_init(&mut self) -> Result<()> {
        let cloud_init = self
            .definition
            .customization()
            .and_then(|c| c.cloud_init.clone())
            .ok_or_else(|| {
                ImageBuildError::ContentMissing(
                    "customize_cloud_init requires a cloud-init customization".to_string(),
                )
            })?;

        let seed_dir = self
            .machine
            .workspace
            .chroot()?
            .join("var/lib/cloud/seed/nocloud");
        fs::create_dir_all(&seed_dir).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Error creating cloud-init dir: {}", e))
        })?;

        if let Some(user_data) = &cloud_init.user_data {
            fs::write(seed_dir.join("user-data"), user_data)?;
        }
        let meta_data = cloud_init
            .meta_data
            .clone()
            .unwrap_or_else(|| "instance-id: ubuntu-image\n".to_string());
        fs::write(seed_dir.join("meta-data"), meta_data)?;
        if let Some(network_config) = &cloud_init.network_config {
            fs::write(seed_dir.join("network-config"), network_config)?;
        }
        Ok(())
    }

    /// customize_fstab: write the configured mount table verbatim.
    pub(crate) async fn customize_fstab(&mut self) -> Result<()> {
        let entries: Vec<FstabEntry> = self
            .definition
            .customization()
            .map(|c| c.fstab.clone())
            .unwrap_or_default();

        let etc_dir = self.machine.workspace.chroot()?.join("etc");
        fs::create_dir_all(&etc_dir)?;
        fs::write(etc_dir.join("fstab"), render_fstab(&entries)).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Error opening fstab: {}", e))
        })?;
        Ok(())
    }

    /// perform_manual_customization: run the declarative ops in their
    /// listed order; the first failing op aborts the step.
    pub(crate) async fn perform_manual_customization(&mut self) -> Result<()> {
        let manual = self
            .definition
            .customization()
            .and_then(|c| c.manual.clone())
            .ok_or_else(|| {
                ImageBuildError::ContentMissing(
                    "perform_manual_customization requires a manual customization".to_string(),
                )
            })?;
        let chroot = self.machine.workspace.chroot()?;
        self.apply_manual(&manual, &chroot).await
    }

    async fn apply_manual(&self, manual: &Manual, chroot: &Path) -> Result<()> {
        for copy_file in &manual.copy_file {
            let dest = resolve_in_chroot(chroot, &copy_file.destination);
            debug!(
                "Copying file \"{}\" to \"{}\"",
                copy_file.source.display(),
                dest.display()
            );
            self.executor
                .run(&system::copy_entry_cmd(&copy_file.source, &dest))
                .await?;
        }

        for touch_file in &manual.touch_file {
            let path = resolve_in_chroot(chroot, &touch_file.path);
            debug!("Creating empty file \"{}\"", path.display());
            fs::File::create(&path).map_err(|e| {
                ImageBuildError::WorkspaceIO(format!(
                    "Error creating file in chroot: {}",
                    e
                ))
            })?;
        }

        for execute in &manual.execute {
            debug!("Executing \"{}\" in chroot", execute.path);
            self.executor
                .run(&mount::chroot_cmd(chroot, &[execute.path.as_str()]))
                .await?;
        }

        for group in &manual.add_group {
            info!("Adding group \"{}\"", group.name);
            let mut args = vec!["groupadd".to_string()];
            if let Some(id) = group.id {
                args.push("--gid".to_string());
                args.push(id.to_string());
            }
            args.push(group.name.clone());
            self.executor.run(&mount::chroot_cmd(chroot, &args)).await?;
        }

        for user in &manual.add_user {
            info!("Adding user \"{}\"", user.name);
            let mut args = vec!["useradd".to_string()];
            if let Some(id) = user.id {
                args.push("--uid".to_string());
                args.push(id.to_string());
            }
            args.push(user.name.clone());
            self.executor.run(&mount::chroot_cmd(chroot, &args)).await?;
        }

        Ok(())
    }
}

/// Join a validated absolute in-chroot path onto the chroot directory.
fn resolve_in_chroot(chroot: &Path, path: &str) -> PathBuf {
    chroot.join(path.trim_start_matches('/'))
}

/// Render fstab entries as tab-separated lines, without a trailing
/// newline.
pub fn render_fstab(entries: &[FstabEntry]) -> String {
    entries
        .iter()
        .map(FstabEntry::render)
        .collect::<Vec<_>>()
        .join("\n")
}
