// file: src/commands/apt.rs
// version: 1.2.0
// guid: d1c58f07-2e96-4b3a-8f40-75a2d9c01e86

//! apt and dpkg command construction for chroot operations

use crate::executor::Command;
use std::path::Path;

/// `apt update` inside the chroot.
pub fn update_cmd(chroot: &Path) -> Command {
    Command::new("chroot")
        .arg_path(chroot)
        .args(["apt", "update"])
}

/// `apt install` inside the chroot, non-interactive and with the dpkg
/// options an unattended rootfs build needs.
pub fn install_cmd<S: AsRef<str>>(chroot: &Path, packages: &[S]) -> Command {
    let mut cmd = Command::new("chroot")
        .arg_path(chroot)
        .args([
            "apt",
            "install",
            "--assume-yes",
            "--quiet",
            "--option=Dpkg::options::=--force-unsafe-io",
            "--option=Dpkg::Options::=--force-confold",
        ])
        .env("DEBIAN_FRONTEND", "noninteractive");
    for package in packages {
        cmd = cmd.arg(package.as_ref());
    }
    cmd
}

/// `dpkg-query -W` inside a root tree, emitting `package version` lines.
pub fn manifest_cmd(root: &Path) -> Command {
    Command::new("chroot").arg_path(root).args([
        "dpkg-query",
        "-W",
        "--showformat=${Package} ${Version}\n",
    ])
}
