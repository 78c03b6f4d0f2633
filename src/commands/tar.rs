// file: src/commands/tar.rs
// version: 1.0.0
// guid: e0c63f18-75b9-4a2d-8f41-09d5a7e2c8b6

//! tar command construction for prebuilt rootfs tarballs

use crate::executor::Command;
use std::path::Path;

/// Unpack a rootfs tarball into a directory. Compression is detected by
/// tar itself (`--auto-compress` applies on extraction by default).
pub fn extract_cmd(tarball: &Path, dest: &Path) -> Command {
    Command::new("tar")
        .arg("--extract")
        .arg("--xattrs")
        .arg("--xattrs-include=*")
        .arg("--file")
        .arg_path(tarball)
        .arg("--directory")
        .arg_path(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_cmd() {
        let cmd = extract_cmd(
            Path::new("/srv/rootfs.tar.xz"),
            Path::new("/work/chroot"),
        );
        assert_eq!(
            cmd.rendered(),
            "tar --extract --xattrs --xattrs-include=* --file /srv/rootfs.tar.xz \
             --directory /work/chroot"
        );
    }
}
