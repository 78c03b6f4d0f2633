// file: src/commands/gpg.rs
// version: 1.1.0
// guid: 09e7c5a3-84d6-4f12-b7e8-3a50d19c6f27

//! gpg command construction for PPA signing keys

use crate::executor::Command;
use std::path::Path;

const KEYSERVER: &str = "hkp://keyserver.ubuntu.com:80";

fn common_args(home_dir: &Path) -> Vec<String> {
    vec![
        "--no-default-keyring".to_string(),
        "--no-options".to_string(),
        "--homedir".to_string(),
        home_dir.to_string_lossy().into_owned(),
        "--secret-keyring".to_string(),
        home_dir.join("tempring.gpg").to_string_lossy().into_owned(),
        "--keyserver".to_string(),
        KEYSERVER.to_string(),
    ]
}

/// Fetch a signing key from the Ubuntu keyserver into a temporary keyring.
pub fn recv_key_cmd(home_dir: &Path, fingerprint: &str) -> Command {
    Command::new("gpg")
        .args(common_args(home_dir))
        .args(["--recv-keys", fingerprint])
}

/// Export a fetched key into the trusted.gpg.d keyring file.
pub fn export_key_cmd(home_dir: &Path, fingerprint: &str, key_file: &Path) -> Command {
    Command::new("gpg")
        .args(common_args(home_dir))
        .arg("--output")
        .arg_path(key_file)
        .args(["--export", fingerprint])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_key_cmd() {
        let cmd = recv_key_cmd(Path::new("/tmp/gpg-home"), "DEADBEEF");
        let rendered = cmd.rendered();
        assert!(rendered.contains("--homedir /tmp/gpg-home"));
        assert!(rendered.contains("--keyserver hkp://keyserver.ubuntu.com:80"));
        assert!(rendered.ends_with("--recv-keys DEADBEEF"));
    }

    #[test]
    fn test_export_key_cmd() {
        let cmd = export_key_cmd(
            Path::new("/tmp/gpg-home"),
            "DEADBEEF",
            Path::new("/chroot/etc/apt/trusted.gpg.d/foo.gpg"),
        );
        let rendered = cmd.rendered();
        assert!(rendered.contains("--output /chroot/etc/apt/trusted.gpg.d/foo.gpg"));
        assert!(rendered.ends_with("--export DEADBEEF"));
    }
}
