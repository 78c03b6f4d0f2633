// file: src/image/disk.rs
// version: 1.5.0
// guid: 86c1e4d0-37af-4928-b56c-f90d2a81e6c3

//! Final disk assembly
//!
//! Creates one disk image per gadget volume: partition table (MBR or GPT
//! with protective MBR), per-structure data copied in with dd, offset
//! writes, and for grub-booted classic images an update-grub pass through
//! a loop device.

use crate::commands::{dd, losetup, mount};
use crate::config::{Bootloader, GadgetInfo, PartitionSchema, StructureRole, Volume};
use crate::error::{ImageBuildError, Result};
use crate::executor::{Command, Executor};
use crate::statemachine::Workspace;
use gptman::{GPTPartitionEntry, GPT};
use mbrman::{MBRPartitionEntry, CHS, MBR};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Byte offset of the 4-byte disk identifier in sector 0.
const DISK_ID_OFFSET: u64 = 440;

/// Room reserved past the last structure for the GPT backup header and
/// partition array.
const GPT_BACKUP_SECTORS: u64 = 34;

pub struct DiskOpts<'a> {
    pub sector_size: u64,
    pub is_seeded: bool,
    pub output_dir: PathBuf,
    pub volume_names: &'a BTreeMap<String, String>,
    pub run_update_grub: bool,
}

/// make_disk: assemble every volume into `<output>/<volume>.img`.
pub async fn make_disk(
    executor: &Executor,
    workspace: &Workspace,
    gadget: &GadgetInfo,
    opts: &DiskOpts<'_>,
) -> Result<()> {
    // precondition: the summed structure size bounds the offset writes
    let image_size = gadget.total_structure_size();
    let volumes_dir = workspace.volumes()?;
    fs::create_dir_all(&opts.output_dir)?;

    let mut existing_ids: Vec<[u8; 4]> = Vec::new();
    for (volume_name, volume) in &gadget.volumes {
        let image_name = opts
            .volume_names
            .get(volume_name)
            .cloned()
            .unwrap_or_else(|| format!("{}.img", volume_name));
        let disk_path = opts.output_dir.join(&image_name);
        info!("Assembling volume \"{}\" into {}", volume_name, disk_path.display());

        let disk_id = generate_unique_disk_id(&mut rand::thread_rng(), &mut existing_ids)?;

        let last_end = volume
            .structure
            .iter()
            .map(|s| s.start_offset() + s.size)
            .max()
            .unwrap_or(0);
        let disk_size = last_end + GPT_BACKUP_SECTORS * opts.sector_size;
        let disk_file = fs::File::create(&disk_path)?;
        disk_file.set_len(disk_size)?;
        drop(disk_file);

        match volume.schema {
            PartitionSchema::Mbr => {
                write_mbr_table(volume, &disk_path, opts.sector_size, opts.is_seeded, disk_id)?
            }
            PartitionSchema::Gpt => {
                write_gpt_table(volume, &disk_path, opts.sector_size, opts.is_seeded, disk_id)?
            }
        }

        for (index, structure) in volume.structure.iter().enumerate() {
            if structure.is_skipped(opts.is_seeded) {
                continue;
            }
            let part_img = volumes_dir
                .join(volume_name)
                .join(format!("part{}.img", index));
            let seek_sectors = structure.start_offset() / opts.sector_size;
            let count_sectors = structure.size.div_ceil(opts.sector_size);
            executor
                .run(&dd::copy_structure_cmd(
                    &part_img,
                    &disk_path,
                    opts.sector_size,
                    seek_sectors,
                    count_sectors,
                ))
                .await?;
        }

        write_offset_values(volume, &disk_path, opts.sector_size, image_size)?;

        if opts.run_update_grub && volume.bootloader == Some(Bootloader::Grub) {
            if let Some(partition) = rootfs_partition_number(volume, opts.is_seeded) {
                update_grub(executor, workspace, &disk_path, partition, opts.sector_size).await?;
            }
        }
    }
    Ok(())
}

/// Sample a 4-byte disk ID not present in `existing`. Ten failed draws
/// (RNG errors or collisions) exhaust the generator.
pub fn generate_unique_disk_id<R: RngCore>(
    rng: &mut R,
    existing: &mut Vec<[u8; 4]>,
) -> Result<[u8; 4]> {
    let mut id = [0u8; 4];
    let mut found = false;
    for _ in 0..10 {
        if rng.try_fill_bytes(&mut id).is_err() {
            continue;
        }
        if existing.iter().any(|used| *used == id) {
            continue;
        }
        found = true;
        break;
    }
    if !found {
        return Err(ImageBuildError::RandomnessExhausted);
    }
    existing.push(id);
    Ok(id)
}

/// The reserved region at the start of a GPT disk: protective MBR, GPT
/// header, and the partition entry array.
fn check_gpt_reserved(
    structure_name: &str,
    start: u64,
    end: u64,
    sector_size: u64,
) -> Result<()> {
    let reserved_sectors: u64 = if sector_size == 4096 { 6 } else { 34 };
    if start < sector_size * reserved_sectors && end > sector_size {
        return Err(ImageBuildError::GeometryViolation(
            structure_name.to_string(),
        ));
    }
    Ok(())
}

fn write_mbr_table(
    volume: &Volume,
    disk_path: &Path,
    sector_size: u64,
    is_seeded: bool,
    disk_id: [u8; 4],
) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(disk_path)?;
    let mut table = MBR::new_from(&mut file, sector_size as u32, disk_id)
        .map_err(|e| ImageBuildError::WorkspaceIO(format!("Error creating MBR table: {}", e)))?;

    let mut index = 0usize;
    for structure in &volume.structure {
        if !structure.in_partition_table(is_seeded) {
            continue;
        }
        index += 1;
        if index > 4 {
            return Err(ImageBuildError::DomainRule(
                "MBR partition table can contain up to 4 partitions".to_string(),
            ));
        }

        let type_field = structure.type_for_schema(PartitionSchema::Mbr);
        let sys = u8::from_str_radix(type_field, 16).map_err(|_| {
            ImageBuildError::SchemaError(format!(
                "invalid MBR partition type \"{}\" for structure \"{}\"",
                type_field, structure.name
            ))
        })?;

        let starting_lba =
            u32::try_from(structure.start_offset().div_ceil(sector_size)).map_err(|_| {
                ImageBuildError::GeometryViolation(structure.name.clone())
            })?;
        let sectors = u32::try_from(structure.size.div_ceil(sector_size)).map_err(|_| {
            ImageBuildError::GeometryViolation(structure.name.clone())
        })?;

        table[index] = MBRPartitionEntry {
            boot: if structure.is_bootable() {
                mbrman::BOOT_ACTIVE
            } else {
                mbrman::BOOT_INACTIVE
            },
            first_chs: CHS::empty(),
            sys,
            last_chs: CHS::empty(),
            starting_lba,
            sectors,
        };
        debug!(
            "MBR partition {}: start {} size {} type {:02x}",
            index, starting_lba, sectors, sys
        );
    }

    table
        .write_into(&mut file)
        .map_err(|e| ImageBuildError::WorkspaceIO(format!("Error writing MBR table: {}", e)))?;
    Ok(())
}

fn write_gpt_table(
    volume: &Volume,
    disk_path: &Path,
    sector_size: u64,
    is_seeded: bool,
    disk_id: [u8; 4],
) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(disk_path)?;

    let disk_guid = uuid::Uuid::new_v4().to_bytes_le();
    let mut table = GPT::new_from(&mut file, sector_size, disk_guid)
        .map_err(|e| ImageBuildError::WorkspaceIO(format!("Error creating GPT table: {}", e)))?;

    let mut index = 0u32;
    for structure in &volume.structure {
        if !structure.in_partition_table(is_seeded) {
            continue;
        }

        let start = structure.start_offset();
        let end = start + structure.size;
        check_gpt_reserved(&structure.name, start, end, sector_size)?;

        let type_field = structure.type_for_schema(PartitionSchema::Gpt);
        let partition_type_guid = uuid::Uuid::parse_str(type_field)
            .map_err(|_| {
                ImageBuildError::SchemaError(format!(
                    "invalid GPT partition type \"{}\" for structure \"{}\"",
                    type_field, structure.name
                ))
            })?
            .to_bytes_le();

        let starting_lba = start.div_ceil(sector_size);
        let ending_lba = starting_lba + structure.size.div_ceil(sector_size) - 1;

        index += 1;
        table[index] = GPTPartitionEntry {
            partition_type_guid,
            unique_partition_guid: uuid::Uuid::new_v4().to_bytes_le(),
            starting_lba,
            ending_lba,
            attribute_bits: 0,
            partition_name: structure.partition_name().into(),
        };
        debug!(
            "GPT partition {}: start {} end {} name \"{}\"",
            index,
            starting_lba,
            ending_lba,
            structure.partition_name()
        );
    }

    GPT::write_protective_mbr_into(&mut file, sector_size)
        .map_err(|e| ImageBuildError::WorkspaceIO(format!("Error writing protective MBR: {}", e)))?;
    table
        .write_into(&mut file)
        .map_err(|e| ImageBuildError::WorkspaceIO(format!("Error writing GPT table: {}", e)))?;
    // the disk identifier field survives in the protective MBR
    file.write_all_at(&disk_id, DISK_ID_OFFSET)?;
    Ok(())
}

/// Process every structure's OffsetWrite: the structure's start sector is
/// written little-endian at the requested byte position (resolved against
/// the named structure when relative).
pub fn write_offset_values(
    volume: &Volume,
    disk_path: &Path,
    sector_size: u64,
    image_size: u64,
) -> Result<()> {
    let file = fs::OpenOptions::new().read(true).write(true).open(disk_path)?;
    for structure in &volume.structure {
        let Some(offset_write) = &structure.offset_write else {
            continue;
        };
        let value = structure.start_offset() / sector_size;
        if image_size - 4 < value {
            return Err(ImageBuildError::WorkspaceIO(
                "write offset beyond end of file".to_string(),
            ));
        }
        let base = match &offset_write.relative_to {
            None => 0,
            Some(name) => volume
                .structure
                .iter()
                .find(|s| s.name == *name)
                .map(|s| s.start_offset())
                .ok_or_else(|| {
                    ImageBuildError::ContentMissing(format!(
                        "offset-write of \"{}\" references unknown structure \"{}\"",
                        structure.name, name
                    ))
                })?,
        };
        let position = base + offset_write.offset;
        file.write_all_at(&(value as u32).to_le_bytes(), position)?;
        debug!(
            "Offset write: {} sectors at byte {} for \"{}\"",
            value, position, structure.name
        );
    }
    Ok(())
}

/// 1-based partition number of the system-data structure among the
/// partitions actually present in the table.
pub fn rootfs_partition_number(volume: &Volume, is_seeded: bool) -> Option<u32> {
    let mut number = 0u32;
    for structure in &volume.structure {
        if !structure.in_partition_table(is_seeded) {
            continue;
        }
        number += 1;
        if structure.role == Some(StructureRole::SystemData) {
            return Some(number);
        }
    }
    None
}

/// Mount the finished image through a loop device and run update-grub in
/// the root partition.
///
/// Every release is queued before its acquisition runs and the queue is
/// drained LIFO on all exit paths; a release failure after a primary
/// failure is reported as a partial failure rather than masking either.
async fn update_grub(
    executor: &Executor,
    workspace: &Workspace,
    disk_path: &Path,
    rootfs_partition: u32,
    sector_size: u64,
) -> Result<()> {
    let mount_dir = workspace.scratch()?.join("loopback");
    fs::create_dir_all(&mount_dir).map_err(|e| {
        ImageBuildError::WorkspaceIO(format!(
            "Error creating scratch/loopback directory: {}",
            e
        ))
    })?;

    let mut releases: Vec<Command> = Vec::new();
    let primary = update_grub_inner(
        executor,
        &mut releases,
        disk_path,
        &mount_dir,
        rootfs_partition,
        sector_size,
    )
    .await;

    let mut release_failure: Option<String> = None;
    while let Some(release) = releases.pop() {
        if let Err(e) = executor.run(&release).await {
            if release_failure.is_none() {
                release_failure = Some(e.to_string());
            }
        }
    }

    match (primary, release_failure) {
        (Ok(()), None) => Ok(()),
        (Ok(()), Some(cleanup)) => Err(ImageBuildError::WorkspaceIO(format!(
            "cleanup failed after update-grub: {}",
            cleanup
        ))),
        (Err(e), None) => Err(e),
        (Err(e), Some(cleanup)) => Err(ImageBuildError::PartialFailure {
            primary: e.to_string(),
            cleanup,
        }),
    }
}

async fn update_grub_inner(
    executor: &Executor,
    releases: &mut Vec<Command>,
    disk_path: &Path,
    mount_dir: &Path,
    rootfs_partition: u32,
    sector_size: u64,
) -> Result<()> {
    let output = executor
        .run(&losetup::attach_cmd(disk_path, sector_size))
        .await?;
    let loop_device = output.stdout_trimmed().to_string();
    if loop_device.is_empty() {
        return Err(ImageBuildError::WorkspaceIO(
            "losetup did not report a loop device".to_string(),
        ));
    }
    releases.push(losetup::detach_cmd(&loop_device));

    releases.push(mount::umount_cmd(mount_dir));
    executor
        .run(&mount::mount_cmd(
            &format!("{}p{}", loop_device, rootfs_partition),
            mount_dir,
        ))
        .await?;

    for mountpoint in ["/dev", "/proc", "/sys"] {
        let (mount_cmd, umount_cmd) = mount::bind_mount_pair(mount_dir, mountpoint);
        releases.push(umount_cmd);
        executor.run(&mount_cmd).await?;
    }

    executor
        .run(&mount::chroot_cmd(mount_dir, &["update-grub"]))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GadgetInfo;
    use tempfile::TempDir;

    const GPT_VOLUME: &str = r#"
volumes:
  pc:
    schema: gpt
    bootloader: grub
    structure:
      - name: mbr
        type: mbr
        size: 440
      - name: EFI System
        type: "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        filesystem: vfat
        filesystem-label: system-boot
        offset: 1M
        size: 99M
      - name: writable
        type: "0FC63DAF-8483-4772-8E79-3D69D8477DE4"
        filesystem: ext4
        role: system-data
        size: 16M
"#;

    fn sparse_disk(dir: &TempDir, size: u64) -> PathBuf {
        let path = dir.path().join("disk.img");
        let file = fs::File::create(&path).unwrap();
        file.set_len(size).unwrap();
        path
    }

    #[test]
    fn test_unique_disk_ids() {
        let mut existing = Vec::new();
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            generate_unique_disk_id(&mut rng, &mut existing).unwrap();
        }
        let mut deduped = existing.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), existing.len());
    }

    /// An RNG that always produces the same bytes: every draw after the
    /// first collides, so the generator must give up after ten tries.
    struct ConstRng;

    impl RngCore for ConstRng {
        fn next_u32(&mut self) -> u32 {
            0x42424242
        }
        fn next_u64(&mut self) -> u64 {
            0x4242424242424242
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0x42);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            dest.fill(0x42);
            Ok(())
        }
    }

    #[test]
    fn test_disk_id_randomness_exhausted_on_collisions() {
        let mut rng = ConstRng;
        let mut existing = Vec::new();
        generate_unique_disk_id(&mut rng, &mut existing).unwrap();
        let err = generate_unique_disk_id(&mut rng, &mut existing).unwrap_err();
        assert!(matches!(err, ImageBuildError::RandomnessExhausted));
    }

    #[test]
    fn test_gpt_table_round_trips() {
        let dir = TempDir::new().unwrap();
        let disk = sparse_disk(&dir, 256 * 1024 * 1024);
        let gadget = GadgetInfo::from_yaml(GPT_VOLUME).unwrap();
        let volume = &gadget.volumes["pc"];

        write_gpt_table(volume, &disk, 512, false, [0xAA, 0xBB, 0xCC, 0xDD]).unwrap();

        let mut file = fs::File::open(&disk).unwrap();
        let table = GPT::read_from(&mut file, 512).unwrap();
        let partitions: Vec<_> = table.iter().filter(|(_, p)| p.is_used()).collect();
        assert_eq!(partitions.len(), 2);
        // EFI System at 1MiB
        assert_eq!(partitions[0].1.starting_lba, 2048);
        assert_eq!(
            partitions[0].1.ending_lba,
            2048 + (99 * 1024 * 1024 / 512) - 1
        );
        // anonymous system-data keeps its name here, "writable"
        assert_eq!(partitions[1].1.partition_name.as_str(), "writable");

        // partitions strictly ordered, no overlap
        assert!(partitions[0].1.ending_lba < partitions[1].1.starting_lba);

        // disk identifier written at byte 440
        let mut id = [0u8; 4];
        file.read_exact_at(&mut id, DISK_ID_OFFSET).unwrap();
        assert_eq!(id, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_gpt_reserved_region_rejected() {
        let dir = TempDir::new().unwrap();
        let disk = sparse_disk(&dir, 64 * 1024 * 1024);
        let yaml = r#"
volumes:
  bad:
    schema: gpt
    structure:
      - name: u-boot
        type: "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        offset: 1024
        size: 8192
"#;
        let gadget = GadgetInfo::from_yaml(yaml).unwrap();
        let err = write_gpt_table(&gadget.volumes["bad"], &disk, 512, false, [0; 4]).unwrap_err();
        match err {
            ImageBuildError::GeometryViolation(name) => assert_eq!(name, "u-boot"),
            other => panic!("expected GeometryViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_gpt_reserved_region_4096() {
        // start below 6 sectors of 4096 bytes, extending past sector 1
        assert!(check_gpt_reserved("s", 4096, 32768, 4096).is_err());
        // at 1MiB everything is fine
        assert!(check_gpt_reserved("s", 1024 * 1024, 2 * 1024 * 1024, 4096).is_ok());
    }

    #[test]
    fn test_mbr_table_round_trips() {
        let dir = TempDir::new().unwrap();
        let disk = sparse_disk(&dir, 64 * 1024 * 1024);
        let yaml = r#"
volumes:
  pi:
    schema: mbr
    bootloader: u-boot
    structure:
      - name: boot
        type: "0C"
        filesystem: vfat
        filesystem-label: system-boot
        offset: 1M
        size: 16M
      - name: writable
        type: "83,0FC63DAF-8483-4772-8E79-3D69D8477DE4"
        filesystem: ext4
        role: system-data
        size: 32M
"#;
        let gadget = GadgetInfo::from_yaml(yaml).unwrap();
        write_mbr_table(&gadget.volumes["pi"], &disk, 512, false, [1, 2, 3, 4]).unwrap();

        let mut file = fs::File::open(&disk).unwrap();
        let table = MBR::read_from(&mut file, 512).unwrap();
        assert_eq!(table.header.disk_signature, [1, 2, 3, 4]);

        let boot = &table[1];
        assert_eq!(boot.starting_lba, 2048);
        assert_eq!(boot.sectors, 16 * 1024 * 1024 / 512);
        assert_eq!(boot.sys, 0x0C);
        assert_eq!(boot.boot, mbrman::BOOT_ACTIVE);

        // hybrid type picks the MBR byte
        let writable = &table[2];
        assert_eq!(writable.sys, 0x83);
        assert_eq!(writable.boot, mbrman::BOOT_INACTIVE);
    }

    #[test]
    fn test_seeded_volume_skips_system_partitions() {
        let dir = TempDir::new().unwrap();
        let disk = sparse_disk(&dir, 64 * 1024 * 1024);
        let yaml = r#"
volumes:
  pc:
    schema: gpt
    structure:
      - name: ubuntu-seed
        type: "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        filesystem: vfat
        role: system-seed
        offset: 1M
        size: 16M
      - name: other
        type: "0FC63DAF-8483-4772-8E79-3D69D8477DE4"
        size: 8M
"#;
        let gadget = GadgetInfo::from_yaml(yaml).unwrap();
        assert!(gadget.is_seeded());
        write_gpt_table(&gadget.volumes["pc"], &disk, 512, true, [0; 4]).unwrap();

        let mut file = fs::File::open(&disk).unwrap();
        let table = GPT::read_from(&mut file, 512).unwrap();
        let used: Vec<_> = table.iter().filter(|(_, p)| p.is_used()).collect();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].1.partition_name.as_str(), "other");
    }

    #[test]
    fn test_offset_write_value() {
        let dir = TempDir::new().unwrap();
        let disk = sparse_disk(&dir, 8 * 1024 * 1024);
        let yaml = r#"
volumes:
  disk:
    structure:
      - name: mbr
        type: mbr
        size: 440
      - name: u-boot
        type: bare
        offset: 1M
        offset-write: mbr+92
        size: 1M
"#;
        let gadget = GadgetInfo::from_yaml(yaml).unwrap();
        let volume = &gadget.volumes["disk"];
        write_offset_values(volume, &disk, 512, 8 * 1024 * 1024).unwrap();

        let file = fs::File::open(&disk).unwrap();
        let mut value = [0u8; 4];
        file.read_exact_at(&mut value, 92).unwrap();
        // 1MiB / 512 = 2048 sectors, little-endian
        assert_eq!(u32::from_le_bytes(value), 2048);
    }

    #[test]
    fn test_offset_write_beyond_end_rejected() {
        let dir = TempDir::new().unwrap();
        let disk = sparse_disk(&dir, 1024 * 1024);
        let yaml = r#"
volumes:
  disk:
    structure:
      - name: payload
        type: bare
        offset: 1M
        offset-write: 16
        size: 1M
"#;
        let gadget = GadgetInfo::from_yaml(yaml).unwrap();
        // image_size - 4 < 2048 sectors
        let err = write_offset_values(&gadget.volumes["disk"], &disk, 512, 2000).unwrap_err();
        assert!(err.to_string().contains("write offset beyond end of file"));
    }

    #[test]
    fn test_rootfs_partition_number_counts_table_entries_only() {
        let gadget = GadgetInfo::from_yaml(GPT_VOLUME).unwrap();
        // the mbr structure is not in the table, so system-data is nr 2
        assert_eq!(rootfs_partition_number(&gadget.volumes["pc"], false), Some(2));
        // in a seeded build system-data is skipped entirely
        assert_eq!(rootfs_partition_number(&gadget.volumes["pc"], true), None);
    }
}
