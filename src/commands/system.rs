// file: src/commands/system.rs
// version: 1.2.0
// guid: 38f0d6a4-91ce-4b57-8203-7e64c1a9f5d0

//! Host introspection and generic file-tree commands

use crate::executor::{Command, Executor};
use std::path::Path;

/// Host architecture as reported by dpkg.
///
/// Errors are swallowed and an empty string returned; callers must reject
/// an empty architecture explicitly.
pub async fn host_arch() -> String {
    let executor = Executor::new(false);
    let cmd = Command::new("dpkg").arg("--print-architecture");
    match executor.run_unchecked(&cmd).await {
        Ok((output, 0)) => output.stdout_trimmed().to_string(),
        _ => String::new(),
    }
}

/// Host release codename as reported by lsb_release.
///
/// Same contract as [`host_arch`]: failures yield an empty string.
pub async fn host_suite() -> String {
    let executor = Executor::new(false);
    let cmd = Command::new("lsb_release").args(["-c", "-s"]);
    match executor.run_unchecked(&cmd).await {
        Ok((output, 0)) => output.stdout_trimmed().to_string(),
        _ => String::new(),
    }
}

/// Archive-mode copy of a directory's contents into another directory.
/// `cp -a` preserves ownership, permissions, symlinks and special files,
/// which plain library copies cannot.
pub fn copy_tree_cmd(source_dir: &Path, dest_dir: &Path) -> Command {
    Command::new("cp")
        .arg("-a")
        .arg(format!("{}/.", source_dir.display()))
        .arg_path(dest_dir)
}

/// Copy a single file or directory, preserving attributes.
pub fn copy_entry_cmd(source: &Path, dest: &Path) -> Command {
    Command::new("cp").arg("-a").arg_path(source).arg_path(dest)
}

/// Apparent size of a directory tree in bytes: `du -s -B1`.
pub fn du_cmd(dir: &Path) -> Command {
    Command::new("du").args(["-s", "-B1"]).arg_path(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_cmd() {
        let cmd = copy_tree_cmd(Path::new("/work/chroot"), Path::new("/work/rootfs"));
        assert_eq!(cmd.rendered(), "cp -a /work/chroot/. /work/rootfs");
    }

    #[test]
    fn test_du_cmd() {
        let cmd = du_cmd(Path::new("/work/rootfs"));
        assert_eq!(cmd.rendered(), "du -s -B1 /work/rootfs");
    }

    #[tokio::test]
    async fn test_copy_tree_copies_contents() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("etc")).unwrap();
        std::fs::write(src.path().join("etc/hostname"), "builder\n").unwrap();

        let executor = Executor::new(false);
        executor
            .run(&copy_tree_cmd(src.path(), dst.path()))
            .await
            .unwrap();

        let copied = std::fs::read_to_string(dst.path().join("etc/hostname")).unwrap();
        assert_eq!(copied, "builder\n");
    }

    #[tokio::test]
    async fn test_host_arch_never_errors() {
        // dpkg may not exist on the test host; the contract is an empty
        // string in that case, never an error.
        let arch = host_arch().await;
        assert!(arch.is_empty() || arch.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
