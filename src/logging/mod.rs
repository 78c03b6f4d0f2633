// file: src/logging/mod.rs
// version: 1.0.0
// guid: 61b8e4f2-0c3d-47a9-8516-f9d2b7a04ce8

//! Logging setup and helpers

pub mod logger;

pub use logger::init_logger;
