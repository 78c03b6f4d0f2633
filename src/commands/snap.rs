// file: src/commands/snap.rs
// version: 1.1.0
// guid: 74d2b8e5-c601-49f3-ad28-1e95c0f7463a

//! snap prepare-image command construction
//!
//! The snap seeding machinery itself is external; this facade only shapes
//! the invocation that populates `/var/lib/snapd/seed` in the target tree.

use crate::executor::Command;
use std::path::Path;

/// Preseed a classic root tree with the given snaps.
///
/// Snap entries use `name` or `name=channel` syntax; channels are passed
/// through with the same syntax prepare-image expects.
pub fn prepare_classic_cmd<S: AsRef<str>>(
    arch: &str,
    snaps: &[S],
    model: &Path,
    prepare_dir: &Path,
) -> Command {
    let mut cmd = Command::new("snap")
        .args(["prepare-image", "--classic"])
        .arg(format!("--arch={}", arch));
    for snap in snaps {
        cmd = cmd.arg(format!("--snap={}", snap.as_ref()));
    }
    cmd.arg_path(model).arg_path(prepare_dir)
}

/// Build a snap image tree from a model assertion.
pub fn prepare_snap_cmd<S: AsRef<str>>(
    snaps: &[S],
    model: &Path,
    prepare_dir: &Path,
) -> Command {
    let mut cmd = Command::new("snap").arg("prepare-image");
    for snap in snaps {
        cmd = cmd.arg(format!("--snap={}", snap.as_ref()));
    }
    cmd.arg_path(model).arg_path(prepare_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_classic_cmd() {
        let cmd = prepare_classic_cmd(
            "amd64",
            &["lxd", "hello=candidate"],
            Path::new("/work/scratch/classic-model.assertion"),
            Path::new("/work/chroot"),
        );
        assert_eq!(
            cmd.rendered(),
            "snap prepare-image --classic --arch=amd64 --snap=lxd --snap=hello=candidate \
             /work/scratch/classic-model.assertion /work/chroot"
        );
    }

    #[test]
    fn test_prepare_snap_cmd() {
        let cmd = prepare_snap_cmd(
            &["hello"],
            Path::new("/work/model.assertion"),
            Path::new("/work/unpack"),
        );
        assert_eq!(
            cmd.rendered(),
            "snap prepare-image --snap=hello /work/model.assertion /work/unpack"
        );
    }
}
