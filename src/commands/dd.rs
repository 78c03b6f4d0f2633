// file: src/commands/dd.rs
// version: 1.2.0
// guid: f3b90c27-6ad1-4583-9e06-b14c72f85d39

//! dd command construction for raw blob placement
//!
//! The sparse-zero form (`count=0 seek=1` with `bs` set to the full size)
//! deliberately creates a hole of the requested length instead of writing
//! zeros; the copy commands rely on that with `conv=sparse,notrunc`.

use crate::executor::Command;
use std::path::Path;

/// Extend `of` to `size` bytes as a sparse hole.
pub fn zero_sparse_cmd(of: &Path, size: u64) -> Command {
    Command::new("dd")
        .arg("if=/dev/zero")
        .arg(format!("of={}", of.display()))
        .arg("count=0")
        .arg(format!("bs={}", size))
        .arg("seek=1")
}

/// Copy a content blob into a structure image at a byte offset.
pub fn copy_blob_cmd(input: &Path, of: &Path, seek_bytes: u64) -> Command {
    Command::new("dd")
        .arg(format!("if={}", input.display()))
        .arg(format!("of={}", of.display()))
        .arg("bs=1")
        .arg(format!("seek={}", seek_bytes))
        .arg("conv=sparse,notrunc")
}

/// Copy a finished structure image into the disk image, sector-addressed.
pub fn copy_structure_cmd(
    input: &Path,
    disk: &Path,
    sector_size: u64,
    seek_sectors: u64,
    count_sectors: u64,
) -> Command {
    Command::new("dd")
        .arg(format!("if={}", input.display()))
        .arg(format!("of={}", disk.display()))
        .arg(format!("bs={}", sector_size))
        .arg(format!("seek={}", seek_sectors))
        .arg(format!("count={}", count_sectors))
        .arg("conv=notrunc")
        .arg("conv=sparse")
}
