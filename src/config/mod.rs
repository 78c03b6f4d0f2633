// file: src/config/mod.rs
// version: 1.1.0
// guid: 3c85f1a9-6e72-4d08-91cb-24f7a0d6e853

//! Image definition and gadget metadata models

pub mod definition;
pub mod gadget;
pub mod loader;
pub mod validator;

pub use definition::{
    AddGroup, AddUser, Architecture, CloudInit, CopyFile, Customization, Execute, FstabEntry,
    GadgetSource, GadgetSourceType, ImageClass, ImageDefinition, Manual, Package, Ppa, Rootfs,
    Seed, Snap, Tarball, TouchFile,
};
pub use gadget::{
    Bootloader, Content, GadgetInfo, OffsetWrite, PartitionSchema, StructureRole, Volume,
    VolumeStructure,
};
pub use loader::load_definition;
