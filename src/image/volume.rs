// file: src/image/volume.rs
// version: 1.4.0
// guid: 21f6a8c4-d90b-4e73-b582-c3f915d0a6e7

//! Per-structure content staging and image preparation
//!
//! `populate_bootfs_contents` stages filesystem content trees under
//! `volumes/<vol>/part<N>/`; `populate_prepare_partitions` turns every
//! structure into `volumes/<vol>/part<N>.img`, either as a raw blob
//! assembly or as a formatted filesystem.

use crate::commands::{dd, mkfs, system};
use crate::config::{Bootloader, GadgetInfo, StructureRole, Volume};
use crate::error::{ImageBuildError, Result};
use crate::executor::Executor;
use crate::statemachine::Workspace;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Copy gadget content into per-structure staging trees and apply the
/// bootloader-specific relocations.
pub async fn populate_bootfs_contents(
    executor: &Executor,
    workspace: &Workspace,
    gadget: &GadgetInfo,
) -> Result<()> {
    let unpack = workspace.unpack()?;
    let gadget_dir = unpack.join("gadget");
    let volumes_dir = workspace.volumes()?;

    for (volume_name, volume) in &gadget.volumes {
        handle_lk_bootloader(executor, &unpack, volume).await?;

        for (index, structure) in volume.structure.iter().enumerate() {
            if structure.filesystem.is_empty() {
                continue;
            }
            if matches!(
                structure.role,
                Some(StructureRole::SystemData) | Some(StructureRole::SystemSeed)
            ) {
                // these use the staged rootfs as their content root
                continue;
            }

            let content_dir = volumes_dir
                .join(volume_name)
                .join(format!("part{}", index));
            fs::create_dir_all(&content_dir)?;

            for content in &structure.content {
                let Some(source) = &content.source else {
                    continue;
                };
                let source_path = gadget_dir.join(source.trim_start_matches('/'));
                if !source_path.exists() {
                    return Err(ImageBuildError::ContentMissing(format!(
                        "gadget content \"{}\" does not exist under {}",
                        source,
                        gadget_dir.display()
                    )));
                }
                let target = content.target.as_deref().unwrap_or("/");
                let target_path = content_dir.join(target.trim_start_matches('/'));

                if source_path.is_dir() || target.ends_with('/') {
                    fs::create_dir_all(&target_path)?;
                }
                if source_path.is_dir() {
                    executor
                        .run(&system::copy_tree_cmd(&source_path, &target_path))
                        .await?;
                } else {
                    if let Some(parent) = target_path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    executor
                        .run(&system::copy_entry_cmd(&source_path, &target_path))
                        .await?;
                }
            }

            if structure.is_bootable() {
                handle_secure_boot(&unpack, volume, &content_dir)?;
            }
        }
    }
    Ok(())
}

/// The lk bootloader ships extra payload under `boot/lk` in the image
/// tree; it has to be available as gadget content.
async fn handle_lk_bootloader(
    executor: &Executor,
    unpack: &Path,
    volume: &Volume,
) -> Result<()> {
    if volume.bootloader != Some(Bootloader::Lk) {
        return Ok(());
    }
    let boot_dir = unpack.join("image/boot/lk");
    if !boot_dir.exists() {
        return Err(ImageBuildError::ContentMissing(format!(
            "got lk bootloader but directory {} does not exist",
            boot_dir.display()
        )));
    }
    let gadget_dir = unpack.join("gadget");
    fs::create_dir_all(&gadget_dir)?;
    executor
        .run(&system::copy_tree_cmd(&boot_dir, &gadget_dir))
        .await?;
    Ok(())
}

/// Relocate bootloader payload staged under `boot/<loader>` into the
/// boot structure's tree; grub's destination is `EFI/ubuntu` so that
/// secure boot keeps working.
fn handle_secure_boot(unpack: &Path, volume: &Volume, target_dir: &Path) -> Result<()> {
    let (boot_dir, dest_dir) = match volume.bootloader {
        Some(Bootloader::UBoot) => (unpack.join("image/boot/uboot"), target_dir.to_path_buf()),
        Some(Bootloader::Piboot) => (unpack.join("image/boot/piboot"), target_dir.to_path_buf()),
        Some(Bootloader::Grub) => (
            unpack.join("image/boot/grub"),
            target_dir.join("EFI").join("ubuntu"),
        ),
        _ => return Ok(()),
    };

    if !boot_dir.exists() {
        // this won't always exist, and that's fine
        return Ok(());
    }

    fs::create_dir_all(&dest_dir).map_err(|e| {
        ImageBuildError::WorkspaceIO(format!("Error creating boot dir: {}", e))
    })?;
    for entry in fs::read_dir(&boot_dir)? {
        let entry = entry?;
        fs::rename(entry.path(), dest_dir.join(entry.file_name()))?;
    }
    Ok(())
}

/// Produce `volumes/<vol>/part<N>.img` for every structure.
///
/// system-data and system-seed structures grow to the measured rootfs
/// size when their declared size is too small; the structure is rewritten
/// in place so the partition table uses the grown size.
pub async fn populate_prepare_partitions(
    executor: &Executor,
    workspace: &Workspace,
    gadget: &mut GadgetInfo,
    rootfs_size: u64,
    sector_size: u64,
    _is_seeded: bool,
) -> Result<()> {
    let volumes_dir = workspace.volumes()?;
    let rootfs_dir = workspace.rootfs()?;
    let gadget_dir = workspace.unpack()?.join("gadget");

    for (volume_name, volume) in gadget.volumes.iter_mut() {
        let volume_dir = volumes_dir.join(volume_name);
        fs::create_dir_all(&volume_dir)?;

        for (index, structure) in volume.structure.iter_mut().enumerate() {
            let part_img = volume_dir.join(format!("part{}.img", index));

            if structure.filesystem.is_empty() {
                prepare_raw_structure(executor, &gadget_dir, structure, &part_img).await?;
                continue;
            }

            let data_or_seed = matches!(
                structure.role,
                Some(StructureRole::SystemData) | Some(StructureRole::SystemSeed)
            );
            if data_or_seed && structure.size < rootfs_size {
                warn!(
                    "rootfs structure size {} smaller than actual rootfs contents {}",
                    structure.size, rootfs_size
                );
                structure.size = rootfs_size;
            }

            if structure.role == Some(StructureRole::SystemData) {
                let file = fs::File::create(&part_img)?;
                file.set_len(rootfs_size)?;
            } else {
                executor
                    .run(&dd::zero_sparse_cmd(&part_img, structure.size))
                    .await?;
            }

            let content_root = if data_or_seed {
                rootfs_dir.clone()
            } else {
                volume_dir.join(format!("part{}", index))
            };
            let has_content = !structure.content.is_empty() || dir_has_entries(&content_root);

            if has_content {
                mkfs::make_with_content(
                    executor,
                    &structure.filesystem,
                    &part_img,
                    structure.label(),
                    &content_root,
                    sector_size,
                )
                .await?;
            } else {
                mkfs::make(
                    executor,
                    &structure.filesystem,
                    &part_img,
                    structure.label(),
                    sector_size,
                )
                .await?;
            }
            debug!("Prepared {} ({})", part_img.display(), structure.filesystem);
        }
    }
    Ok(())
}

/// Raw structure: a sparse hole of the declared size with each content
/// blob dd'ed into place at its running offset.
async fn prepare_raw_structure(
    executor: &Executor,
    gadget_dir: &Path,
    structure: &crate::config::VolumeStructure,
    part_img: &Path,
) -> Result<()> {
    executor
        .run(&dd::zero_sparse_cmd(part_img, structure.size))
        .await?;

    let mut running_offset: u64 = 0;
    for content in &structure.content {
        if let Some(offset) = content.offset {
            running_offset = offset;
        }
        let image = content.image.as_ref().ok_or_else(|| {
            ImageBuildError::ContentMissing(format!(
                "raw content entry of structure \"{}\" has no image",
                structure.name
            ))
        })?;
        let input = gadget_dir.join(image);
        if !input.exists() {
            return Err(ImageBuildError::ContentMissing(format!(
                "content image \"{}\" does not exist under {}",
                image,
                gadget_dir.display()
            )));
        }
        executor
            .run(&dd::copy_blob_cmd(&input, part_img, running_offset))
            .await?;

        let blob_size = match content.size {
            Some(size) => size,
            None => fs::metadata(&input)?.len(),
        };
        running_offset += blob_size;
    }
    Ok(())
}

fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
