// file: src/commands/losetup.rs
// version: 1.0.0
// guid: 58a1f9c6-0d24-4e7b-93f5-6c81b2e04d97

//! losetup command construction
//!
//! `losetup --find --show` prints the allocated device path on stdout;
//! the caller reads it from the captured output.

use crate::executor::Command;
use std::path::Path;

pub fn attach_cmd(disk: &Path, sector_size: u64) -> Command {
    Command::new("losetup")
        .arg("--find")
        .arg("--show")
        .arg("--partscan")
        .arg("--sector-size")
        .arg(sector_size.to_string())
        .arg_path(disk)
}

pub fn detach_cmd(device: &str) -> Command {
    Command::new("losetup").arg("--detach").arg(device)
}
