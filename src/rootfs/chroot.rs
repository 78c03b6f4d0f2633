// file: src/rootfs/chroot.rs
// version: 1.3.0
// guid: 7b04d9f2-c58e-4613-a970-2f8b5e61d0c4

//! Chroot bootstrap and rootfs staging

use crate::commands::{apt, debootstrap, system, tar};
use crate::error::{ImageBuildError, Result};
use crate::statemachine::classic::ClassicStateMachine;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Fallback root entry when the rootfs carries no usable fstab line.
const DEFAULT_FSTAB: &str = "LABEL=writable   /    ext4   defaults    0 0\n";

impl ClassicStateMachine {
    /// create_chroot: debootstrap the target series and wire up the
    /// archive pockets in sources.list.
    pub(crate) async fn create_chroot(&mut self) -> Result<()> {
        let chroot = self.machine.workspace.chroot().map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Failed to create chroot: {}", e))
        })?;

        info!(
            "Bootstrapping {} ({}) chroot",
            self.definition.series, self.definition.architecture
        );
        self.executor
            .run(&debootstrap::bootstrap_cmd(&self.definition, &chroot))
            .await?;

        let sources_list = chroot.join("etc/apt/sources.list");
        fs::write(&sources_list, render_sources_list(&self.definition)).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Error writing sources.list: {}", e))
        })?;
        Ok(())
    }

    /// extract_rootfs_tar: unpack a prebuilt rootfs tarball into the
    /// chroot staging directory.
    pub(crate) async fn extract_rootfs_tar(&mut self) -> Result<()> {
        let tarball = self
            .definition
            .rootfs
            .tarball
            .as_ref()
            .ok_or_else(|| {
                ImageBuildError::ContentMissing(
                    "extract_rootfs_tar requires a tarball rootfs".to_string(),
                )
            })?
            .clone();

        let tarball_path = Path::new(
            tarball
                .url
                .strip_prefix("file://")
                .unwrap_or(&tarball.url),
        )
        .to_path_buf();
        if !tarball_path.exists() {
            return Err(ImageBuildError::ContentMissing(format!(
                "rootfs tarball does not exist: {}",
                tarball_path.display()
            )));
        }

        let chroot = self.machine.workspace.chroot()?;
        self.executor
            .run(&tar::extract_cmd(&tarball_path, &chroot))
            .await?;
        Ok(())
    }

    /// build_rootfs_from_tasks: turn the configured archive tasks into
    /// apt task selectors; apt resolves them against the archive metadata
    /// at install time.
    pub(crate) async fn build_rootfs_from_tasks(&mut self) -> Result<()> {
        let tasks = self
            .definition
            .rootfs
            .archive_tasks
            .as_ref()
            .ok_or_else(|| {
                ImageBuildError::ContentMissing(
                    "build_rootfs_from_tasks requires archive-tasks".to_string(),
                )
            })?;

        for task in tasks {
            let selector = format!("{}^", task.trim_end_matches('^'));
            if !self.packages.contains(&selector) {
                self.packages.push(selector);
            }
        }
        debug!("Task selectors staged: {:?}", self.packages);
        Ok(())
    }

    /// install_packages / install_extra_packages: one apt invocation for
    /// everything the seeds, tasks and customization asked for.
    pub(crate) async fn install_packages(&mut self) -> Result<()> {
        let mut packages = self.packages.clone();
        if let Some(customization) = self.definition.customization() {
            for package in &customization.extra_packages {
                if !packages.contains(&package.name) {
                    packages.push(package.name.clone());
                }
            }
        }
        if packages.is_empty() {
            debug!("No packages to install");
            return Ok(());
        }

        let chroot = self.machine.workspace.chroot()?;
        info!("Installing {} packages", packages.len());
        self.executor.run(&apt::update_cmd(&chroot)).await?;
        self.executor
            .run(&apt::install_cmd(&chroot, &packages))
            .await?;
        Ok(())
    }

    /// populate_rootfs_contents: stage the chroot as the final rootfs and
    /// make sure the root filesystem entry mounts by label.
    pub(crate) async fn populate_rootfs_contents(&mut self) -> Result<()> {
        let chroot = self.machine.workspace.chroot()?;
        let rootfs = self.machine.workspace.rootfs()?;
        self.executor
            .run(&system::copy_tree_cmd(&chroot, &rootfs))
            .await?;

        let fstab_path = rootfs.join("etc/fstab");
        let rewritten = match fs::read_to_string(&fstab_path) {
            Ok(existing) => rewrite_fstab_root_label(&existing),
            Err(_) => DEFAULT_FSTAB.to_string(),
        };
        if let Some(parent) = fstab_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&fstab_path, rewritten).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Error writing to fstab: {}", e))
        })?;
        Ok(())
    }
}

/// The sources.list for the image: base pocket plus -updates and
/// -security, and -proposed for the release/proposed pockets.
pub fn render_sources_list(definition: &crate::config::ImageDefinition) -> String {
    let mirror = &definition.rootfs.mirror;
    let series = &definition.series;
    let components = definition.rootfs.components.join(" ");

    let mut content = format!("deb {} {} {}\n", mirror, series, components);
    content.push_str(&format!("deb {} {}-updates {}\n", mirror, series, components));
    content.push_str(&format!("deb {} {}-security {}\n", mirror, series, components));
    let pocket = definition.rootfs.pocket.to_lowercase();
    if pocket == "proposed" || pocket == "release" {
        content.push_str(&format!(
            "deb {} {}-proposed {}\n",
            mirror, series, components
        ));
    }
    content
}

/// Rewrite the root mount's label to `writable`; fall back to a known-good
/// line when no root entry is present.
pub fn rewrite_fstab_root_label(fstab: &str) -> String {
    if fstab.contains("LABEL=writable") {
        return fstab.to_string();
    }
    let root_entry = Regex::new(r"(?m)^LABEL=\S+(\s+/\s+.*)$").expect("Invalid fstab regex");
    let rewritten = root_entry.replace_all(fstab, "LABEL=writable$1");
    if rewritten.contains("LABEL=writable") {
        rewritten.into_owned()
    } else {
        DEFAULT_FSTAB.to_string()
    }
}
