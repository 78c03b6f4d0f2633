// file: src/cli/mod.rs
// version: 1.0.0
// guid: e13c7a90-58d4-4f26-bb71-a9042d6f83e5

//! Command line interface

pub mod args;
pub mod commands;
