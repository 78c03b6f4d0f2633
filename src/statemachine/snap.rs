// file: src/statemachine/snap.rs
// version: 1.1.0
// guid: 6e48a0d3-b917-42c5-8fd2-304c9e75a1b8

//! Snap image pipeline
//!
//! Builds an Ubuntu Core image from a model assertion. The snap seeding
//! machinery prepares the image tree; the shared volume assembler turns
//! the gadget volumes into disk images. Core images are seeded, so the
//! system partitions are left out of the partition table.

use crate::commands::{snap as snap_cmds, system};
use crate::config::GadgetInfo;
use crate::error::{ImageBuildError, Result};
use crate::executor::Executor;
use crate::image::disk::DiskOpts;
use crate::image::{disk, manifest, volume};
use crate::statemachine::{
    run_pipeline, CommonOpts, Metadata, Pipeline, StateMachine, StepId,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug)]
pub struct SnapStateMachine {
    pub machine: StateMachine,
    pub executor: Executor,
    pub model_assertion: PathBuf,
    pub gadget: Option<GadgetInfo>,
    pub snaps: Vec<String>,
    pub rootfs_size: u64,
    pub volume_names: BTreeMap<String, String>,
    pub is_seeded: bool,
}

impl SnapStateMachine {
    pub async fn setup(opts: CommonOpts, model_assertion: &Path) -> Result<Self> {
        StateMachine::validate_flags(&opts)?;
        let resume = opts.resume;
        let executor = Executor::new(opts.debug);
        let snaps = opts.snaps.clone();
        let mut machine = StateMachine::new(opts)?;

        if !resume && !model_assertion.exists() {
            return Err(ImageBuildError::ContentMissing(format!(
                "model assertion does not exist: {}",
                model_assertion.display()
            )));
        }

        machine.set_steps(Self::base_states())?;
        if resume {
            let metadata = machine.workspace.load_metadata()?;
            machine.set_cursor_to(&metadata.next_step)?;
            info!("Resuming at step \"{}\"", machine.next_step_name());
            return Ok(Self {
                machine,
                executor,
                model_assertion: model_assertion.to_path_buf(),
                gadget: metadata.gadget,
                snaps: metadata.snaps,
                rootfs_size: metadata.rootfs_size,
                volume_names: metadata.volume_names,
                is_seeded: metadata.is_seeded,
            });
        }

        let state_machine = Self {
            machine,
            executor,
            model_assertion: model_assertion.to_path_buf(),
            gadget: None,
            snaps,
            rootfs_size: 0,
            volume_names: BTreeMap::new(),
            is_seeded: true,
        };
        let metadata = state_machine.metadata();
        state_machine.machine.workspace.save_metadata(&metadata)?;
        Ok(state_machine)
    }

    pub fn base_states() -> Vec<StepId> {
        vec![
            StepId::PrepareImage,
            StepId::LoadGadgetYaml,
            StepId::PopulateRootfsContents,
            StepId::CalculateRootfsSize,
            StepId::PopulateBootfsContents,
            StepId::PopulatePreparePartitions,
            StepId::MakeDisk,
            StepId::GenerateSnapManifest,
            StepId::Finish,
        ]
    }

    pub async fn run(&mut self) -> Result<()> {
        run_pipeline(self).await
    }

    pub fn teardown(&self) -> Result<()> {
        self.machine.workspace.teardown()
    }

    /// prepare_image: have the snap seeding machinery build the image
    /// tree (unpack/image) and unpack the gadget (unpack/gadget).
    async fn prepare_image(&mut self) -> Result<()> {
        let unpack = self.machine.workspace.unpack()?;
        self.executor
            .run(&snap_cmds::prepare_snap_cmd(
                &self.snaps,
                &self.model_assertion,
                &unpack,
            ))
            .await?;
        Ok(())
    }

    async fn load_gadget_yaml(&mut self) -> Result<()> {
        let gadget = crate::statemachine::read_gadget_yaml(&self.machine.workspace)?;
        self.is_seeded = gadget.is_seeded();
        self.volume_names = gadget
            .volumes
            .keys()
            .map(|name| (name.clone(), format!("{}.img", name)))
            .collect();
        debug!(
            "Loaded gadget metadata: {} volume(s), seeded: {}",
            gadget.volumes.len(),
            self.is_seeded
        );
        self.gadget = Some(gadget);
        Ok(())
    }

    /// populate_rootfs_contents: the prepared image tree becomes the
    /// staged rootfs.
    async fn populate_rootfs_contents(&mut self) -> Result<()> {
        let image_dir = self.machine.workspace.unpack()?.join("image");
        if !image_dir.exists() {
            return Err(ImageBuildError::ContentMissing(format!(
                "prepare_image produced no image tree at {}",
                image_dir.display()
            )));
        }
        let rootfs = self.machine.workspace.rootfs()?;
        self.executor
            .run(&system::copy_tree_cmd(&image_dir, &rootfs))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Pipeline for SnapStateMachine {
    fn machine(&mut self) -> &mut StateMachine {
        &mut self.machine
    }

    fn machine_ref(&self) -> &StateMachine {
        &self.machine
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            next_step: self.machine.next_step_name(),
            definition: None,
            gadget: self.gadget.clone(),
            packages: Vec::new(),
            snaps: self.snaps.clone(),
            rootfs_size: self.rootfs_size,
            volume_names: self.volume_names.clone(),
            is_seeded: self.is_seeded,
        }
    }

    async fn execute_step(&mut self, step: StepId) -> Result<()> {
        match step {
            StepId::PrepareImage => self.prepare_image().await,
            StepId::LoadGadgetYaml => self.load_gadget_yaml().await,
            StepId::PopulateRootfsContents => self.populate_rootfs_contents().await,
            StepId::CalculateRootfsSize => {
                let rootfs = self.machine.workspace.rootfs()?;
                self.rootfs_size = crate::statemachine::measure_rootfs_size(
                    &self.executor,
                    &rootfs,
                    self.machine.opts.sector_size,
                )
                .await?;
                info!("Calculated rootfs size: {} bytes", self.rootfs_size);
                Ok(())
            }
            StepId::PopulateBootfsContents => {
                let gadget = self.gadget.as_ref().ok_or_else(|| {
                    ImageBuildError::ContentMissing(
                        "gadget metadata not loaded; load_gadget_yaml has not run".to_string(),
                    )
                })?;
                volume::populate_bootfs_contents(
                    &self.executor,
                    &self.machine.workspace,
                    gadget,
                )
                .await
            }
            StepId::PopulatePreparePartitions => {
                let rootfs_size = self.rootfs_size;
                let sector_size = self.machine.opts.sector_size;
                let is_seeded = self.is_seeded;
                let gadget = self.gadget.as_mut().ok_or_else(|| {
                    ImageBuildError::ContentMissing(
                        "gadget metadata not loaded; load_gadget_yaml has not run".to_string(),
                    )
                })?;
                volume::populate_prepare_partitions(
                    &self.executor,
                    &self.machine.workspace,
                    gadget,
                    rootfs_size,
                    sector_size,
                    is_seeded,
                )
                .await
            }
            StepId::MakeDisk => {
                let gadget = self.gadget.as_ref().ok_or_else(|| {
                    ImageBuildError::ContentMissing(
                        "gadget metadata not loaded; load_gadget_yaml has not run".to_string(),
                    )
                })?;
                let opts = DiskOpts {
                    sector_size: self.machine.opts.sector_size,
                    is_seeded: self.is_seeded,
                    output_dir: self.machine.opts.output_dir(),
                    volume_names: &self.volume_names,
                    run_update_grub: false,
                };
                disk::make_disk(&self.executor, &self.machine.workspace, gadget, &opts).await
            }
            StepId::GenerateSnapManifest => {
                let output_dir = self.machine.opts.output_dir();
                std::fs::create_dir_all(&output_dir)?;
                let snaps_dir = self
                    .machine
                    .workspace
                    .rootfs()?
                    .join("var/lib/snapd/seed/snaps");
                manifest::write_snap_manifest(&snaps_dir, &output_dir.join("snap.manifest"))
            }
            StepId::Finish => {
                info!("Build complete");
                Ok(())
            }
            other => Err(ImageBuildError::FlagConflict(format!(
                "state {} is not part of the snap pipeline",
                other.name()
            ))),
        }
    }
}
