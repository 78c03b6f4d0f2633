// file: src/commands/mount.rs
// version: 1.1.0
// guid: b92e05d7-31c8-4f6a-a054-8d17f3c9e260

//! mount, umount and chroot command construction

use crate::executor::Command;
use std::path::Path;

/// Mount a block device at a directory.
pub fn mount_cmd(device: &str, target: &Path) -> Command {
    Command::new("mount").arg(device).arg_path(target)
}

/// Bind-mount a host mountpoint (e.g. `/dev`) into a chroot tree.
/// Returns the matching umount as well, so callers can register the
/// release before executing the acquisition.
pub fn bind_mount_pair(target_dir: &Path, mountpoint: &str) -> (Command, Command) {
    let inner = target_dir.join(mountpoint.trim_start_matches('/'));
    let mount = Command::new("mount")
        .arg("--bind")
        .arg(mountpoint)
        .arg_path(&inner);
    let umount = Command::new("umount").arg_path(&inner);
    (mount, umount)
}

pub fn umount_cmd(target: &Path) -> Command {
    Command::new("umount").arg_path(target)
}

/// Run a program inside a chroot.
pub fn chroot_cmd<S: AsRef<str>>(dir: &Path, inner: &[S]) -> Command {
    let mut cmd = Command::new("chroot").arg_path(dir);
    for part in inner {
        cmd = cmd.arg(part.as_ref());
    }
    cmd
}
