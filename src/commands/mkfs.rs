// file: src/commands/mkfs.rs
// version: 1.2.0
// guid: 27c4e8f0-9d35-46ba-8127-e60a5d93c7f1

//! Filesystem creation helpers
//!
//! In-process wrappers around `mkfs.<fs>`. ext4 filesystems are populated
//! directly from a content directory with `-d`; vfat filesystems are
//! created empty and populated afterwards with `mcopy -s`.

use crate::error::{ImageBuildError, Result};
use crate::executor::{Command, Executor};
use std::path::Path;

/// Create a filesystem on `image` and populate it from `content_root`.
pub async fn make_with_content(
    executor: &Executor,
    fstype: &str,
    image: &Path,
    label: &str,
    content_root: &Path,
    sector_size: u64,
) -> Result<()> {
    match fstype {
        "ext4" => {
            executor.run(&mkfs_ext4_cmd(image, label, Some(content_root))).await?;
        }
        "vfat" | "fat32" => {
            executor.run(&mkfs_vfat_cmd(image, label, sector_size)).await?;
            executor.run(&mcopy_cmd(image, content_root)).await?;
        }
        other => {
            return Err(ImageBuildError::DomainRule(format!(
                "unsupported filesystem type: {}",
                other
            )))
        }
    }
    Ok(())
}

/// Create an empty filesystem on `image`.
pub async fn make(
    executor: &Executor,
    fstype: &str,
    image: &Path,
    label: &str,
    sector_size: u64,
) -> Result<()> {
    match fstype {
        "ext4" => {
            executor.run(&mkfs_ext4_cmd(image, label, None)).await?;
        }
        "vfat" | "fat32" => {
            executor.run(&mkfs_vfat_cmd(image, label, sector_size)).await?;
        }
        other => {
            return Err(ImageBuildError::DomainRule(format!(
                "unsupported filesystem type: {}",
                other
            )))
        }
    }
    Ok(())
}

fn mkfs_ext4_cmd(image: &Path, label: &str, content_root: Option<&Path>) -> Command {
    let mut cmd = Command::new("mkfs.ext4").arg("-q");
    if !label.is_empty() {
        cmd = cmd.args(["-L", label]);
    }
    if let Some(content_root) = content_root {
        // -d populates from a directory without mounting
        cmd = cmd.arg("-d").arg_path(content_root);
    }
    cmd.arg_path(image)
}

fn mkfs_vfat_cmd(image: &Path, label: &str, sector_size: u64) -> Command {
    let mut cmd = Command::new("mkfs.vfat")
        .arg("-S")
        .arg(sector_size.to_string())
        .args(["-F", "32"]);
    if !label.is_empty() {
        cmd = cmd.args(["-n", label]);
    }
    cmd.arg_path(image)
}

fn mcopy_cmd(image: &Path, content_root: &Path) -> Command {
    Command::new("mcopy")
        .arg("-s")
        .arg("-i")
        .arg_path(image)
        .arg(format!("{}/.", content_root.display()))
        .arg("::")
}
