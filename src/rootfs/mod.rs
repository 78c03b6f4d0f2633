// file: src/rootfs/mod.rs
// version: 1.1.0
// guid: 1f93c0b5-8d27-4a64-b1e9-57a2c8f06d43

//! Rootfs construction and customization
//!
//! The classic pipeline's rootfs steps: seed expansion, chroot bootstrap,
//! archive and PPA wiring, package and snap installation, and the
//! declarative manual customizations. All of these operate on the
//! workspace's `chroot` staging directory.

pub mod chroot;
pub mod customize;
pub mod ppa;
pub mod seed;
pub mod snaps;
