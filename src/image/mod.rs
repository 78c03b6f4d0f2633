// file: src/image/mod.rs
// version: 1.1.0
// guid: 50b3d7f9-e284-4c16-a8d5-92c60e41f7b3

//! Volume assembly: gadget volumes to partitioned disk images

pub mod disk;
pub mod manifest;
pub mod volume;
