// file: src/commands/git.rs
// version: 1.0.0
// guid: 1a6d83f5-b042-49c7-a3e1-f85d20c97b64

//! git command construction for gadget tree checkout

use crate::executor::Command;
use std::path::Path;

/// Clone a gadget repository, single branch, shallow.
pub fn clone_cmd(url: &str, branch: Option<&str>, dest: &Path) -> Command {
    let mut cmd = Command::new("git")
        .args(["clone", "--depth", "1", "--single-branch"]);
    if let Some(branch) = branch {
        cmd = cmd.args(["--branch", branch]);
    }
    cmd.arg(url).arg_path(dest)
}
