// file: src/lib.rs
// version: 1.1.0
// guid: 2a7d90c3-4b1e-48f2-9d65-c0e8a1573b4f

//! # Ubuntu Image Builder
//!
//! Builds bootable Ubuntu disk images from declarative image definitions.
//! A staged, resumable state machine drives rootfs construction (seeded,
//! task-listed, or tarball-based), chroot customization, and the assembly
//! of gadget-defined volumes into partitioned disk images.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod image;
pub mod logging;
pub mod rootfs;
pub mod statemachine;

pub use error::{ImageBuildError, Result};
