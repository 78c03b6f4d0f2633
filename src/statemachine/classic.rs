// file: src/statemachine/classic.rs
// version: 2.1.0
// guid: 05b7d2e9-4c83-4fa6-91d0-e62a8f53c714

//! Classic image pipeline
//!
//! Builds a classic (deb-based) Ubuntu image from an image definition:
//! gadget tree, rootfs via debootstrap/germinate or tarball, chroot
//! customization, then volume assembly.

use crate::commands::{git, system};
use crate::config::{
    loader, GadgetInfo, GadgetSourceType, ImageDefinition,
};
use crate::error::{ImageBuildError, Result};
use crate::executor::Executor;
use crate::image::disk::DiskOpts;
use crate::image::{disk, manifest, volume};
use crate::statemachine::{
    run_pipeline, CommonOpts, Metadata, Pipeline, StateMachine, StepId,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ClassicStateMachine {
    pub machine: StateMachine,
    pub executor: Executor,
    pub definition: ImageDefinition,
    pub gadget: Option<GadgetInfo>,
    /// Packages discovered by germinate or task expansion, plus extras.
    pub packages: Vec<String>,
    /// Snaps in `name` or `name=channel` form, merged from seeds, the
    /// command line and the customization block.
    pub snaps: Vec<String>,
    pub rootfs_size: u64,
    pub volume_names: BTreeMap<String, String>,
    pub is_seeded: bool,
}

impl ClassicStateMachine {
    /// Validate flags, initialize the workspace, resolve the image
    /// definition (or reload it from a previous run) and compute the step
    /// list.
    pub async fn setup(opts: CommonOpts, definition_path: &Path) -> Result<Self> {
        StateMachine::validate_flags(&opts)?;
        let resume = opts.resume;
        let executor = Executor::new(opts.debug);
        let mut machine = StateMachine::new(opts)?;

        if resume {
            let metadata = machine.workspace.load_metadata()?;
            let definition = metadata.definition.ok_or_else(|| {
                ImageBuildError::WorkspaceIO(
                    "error reading metadata file: no image definition recorded".to_string(),
                )
            })?;
            let steps = Self::calculate_states(&definition, &machine.opts);
            machine.set_steps(steps)?;
            machine.set_cursor_to(&metadata.next_step)?;
            info!("Resuming at step \"{}\"", machine.next_step_name());
            Ok(Self {
                machine,
                executor,
                definition,
                gadget: metadata.gadget,
                packages: metadata.packages,
                snaps: metadata.snaps,
                rootfs_size: metadata.rootfs_size,
                volume_names: metadata.volume_names,
                is_seeded: metadata.is_seeded,
            })
        } else {
            let definition = loader::load_definition(definition_path).await?;
            let steps = Self::calculate_states(&definition, &machine.opts);
            machine.set_steps(steps)?;
            let state_machine = Self {
                machine,
                executor,
                definition,
                gadget: None,
                packages: Vec::new(),
                snaps: Vec::new(),
                rootfs_size: 0,
                volume_names: BTreeMap::new(),
                is_seeded: false,
            };
            let metadata = state_machine.metadata();
            state_machine.machine.workspace.save_metadata(&metadata)?;
            Ok(state_machine)
        }
    }

    /// Compute the ordered step list for this image definition.
    ///
    /// The base list is spliced according to the gadget source, the rootfs
    /// source, and which customization blocks are present; the presence
    /// checks, not reflection, are the authority.
    pub fn calculate_states(definition: &ImageDefinition, opts: &CommonOpts) -> Vec<StepId> {
        let mut steps = Vec::new();

        match definition.gadget.source_type {
            GadgetSourceType::Git => steps.push(StepId::BuildGadgetTree),
            GadgetSourceType::Directory => steps.push(StepId::PrepareGadgetTree),
        }
        steps.push(StepId::LoadGadgetYaml);

        let rootfs = &definition.rootfs;
        let chroot_based = rootfs.seed.is_some() || rootfs.archive_tasks.is_some();
        if rootfs.seed.is_some() {
            steps.push(StepId::Germinate);
        } else if rootfs.archive_tasks.is_some() {
            steps.push(StepId::BuildRootfsFromTasks);
        } else {
            steps.push(StepId::ExtractRootfsTar);
        }

        if chroot_based {
            steps.push(StepId::CreateChroot);
        }

        let customization = definition.customization();
        if customization.map(|c| !c.extra_ppas.is_empty()).unwrap_or(false) {
            steps.push(StepId::AddExtraPpas);
        }

        if chroot_based {
            steps.push(StepId::InstallPackages);
        } else if customization
            .map(|c| !c.extra_packages.is_empty())
            .unwrap_or(false)
        {
            steps.push(StepId::InstallExtraPackages);
        }

        let wants_snaps = rootfs.seed.is_some()
            || !opts.snaps.is_empty()
            || customization.map(|c| !c.extra_snaps.is_empty()).unwrap_or(false);
        if wants_snaps {
            steps.push(StepId::InstallExtraSnaps);
            steps.push(StepId::PreseedExtraSnaps);
        }

        if customization.map(|c| c.cloud_init.is_some()).unwrap_or(false) {
            steps.push(StepId::CustomizeCloudInit);
        }
        if customization.map(|c| !c.fstab.is_empty()).unwrap_or(false) {
            steps.push(StepId::CustomizeFstab);
        }
        if customization.map(|c| c.manual.is_some()).unwrap_or(false) {
            steps.push(StepId::PerformManualCustomization);
        }

        steps.extend([
            StepId::PopulateRootfsContents,
            StepId::GenerateDiskInfo,
            StepId::CalculateRootfsSize,
            StepId::PopulateBootfsContents,
            StepId::PopulatePreparePartitions,
            StepId::MakeDisk,
            StepId::GenerateManifest,
            StepId::Finish,
        ]);
        steps
    }

    pub async fn run(&mut self) -> Result<()> {
        run_pipeline(self).await
    }

    pub fn teardown(&self) -> Result<()> {
        self.machine.workspace.teardown()
    }

    fn gadget(&self) -> Result<&GadgetInfo> {
        self.gadget.as_ref().ok_or_else(|| {
            ImageBuildError::ContentMissing(
                "gadget metadata not loaded; load_gadget_yaml has not run".to_string(),
            )
        })
    }

    /// build_gadget_tree: clone the gadget repository and run make, then
    /// stage the built `install/` tree as unpack/gadget.
    async fn build_gadget_tree(&mut self) -> Result<()> {
        let scratch = self.machine.workspace.scratch()?;
        let build_dir = scratch.join("gadget-build");
        if build_dir.exists() {
            std::fs::remove_dir_all(&build_dir)?;
        }

        let gadget = &self.definition.gadget;
        self.executor
            .run(&git::clone_cmd(
                &gadget.url,
                gadget.branch.as_deref(),
                &build_dir,
            ))
            .await?;

        let mut make = crate::executor::Command::new("make")
            .env("ARCH", &self.definition.architecture)
            .env("SERIES", &self.definition.series);
        if let Some(target) = &gadget.target {
            make = make.arg(target);
        }
        self.executor.run(&make.current_dir(&build_dir)).await?;

        let install_dir = build_dir.join("install");
        if !install_dir.exists() {
            return Err(ImageBuildError::ContentMissing(format!(
                "gadget build produced no install directory at {}",
                install_dir.display()
            )));
        }
        let gadget_dir = self.machine.workspace.unpack()?.join("gadget");
        std::fs::create_dir_all(&gadget_dir)?;
        self.executor
            .run(&system::copy_tree_cmd(&install_dir, &gadget_dir))
            .await?;
        Ok(())
    }

    /// prepare_gadget_tree: stage a prebuilt gadget tree as unpack/gadget.
    async fn prepare_gadget_tree(&mut self) -> Result<()> {
        let source = self
            .definition
            .gadget
            .url
            .strip_prefix("file://")
            .unwrap_or(&self.definition.gadget.url)
            .to_string();
        let source_path = Path::new(&source);
        if !source_path.exists() {
            return Err(ImageBuildError::ContentMissing(format!(
                "gadget source directory does not exist: {}",
                source
            )));
        }
        let gadget_dir = self.machine.workspace.unpack()?.join("gadget");
        std::fs::create_dir_all(&gadget_dir)?;
        self.executor
            .run(&system::copy_tree_cmd(source_path, &gadget_dir))
            .await?;
        Ok(())
    }

    /// load_gadget_yaml: parse the gadget metadata and derive volume
    /// output names and the seeded flag.
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

    /// generate_disk_info: place the --disk-info file at .disk/info in the
    /// rootfs. A missing flag makes this a no-op.
    async fn generate_disk_info(&mut self) -> Result<()> {
        let Some(disk_info) = self.machine.opts.disk_info.clone() else {
            return Ok(());
        };
        let disk_dir = self.machine.workspace.rootfs()?.join(".disk");
        std::fs::create_dir_all(&disk_dir)?;
        std::fs::copy(&disk_info, disk_dir.join("info"))?;
        Ok(())
    }

    /// calculate_rootfs_size: measure the staged rootfs and scale by 1.5
    /// for filesystem overhead, rounded up to the sector size.
    async fn calculate_rootfs_size(&mut self) -> Result<()> {
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
}

#[async_trait]
impl Pipeline for ClassicStateMachine {
    fn machine(&mut self) -> &mut StateMachine {
        &mut self.machine
    }

    fn machine_ref(&self) -> &StateMachine {
        &self.machine
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            next_step: self.machine.next_step_name(),
            definition: Some(self.definition.clone()),
            gadget: self.gadget.clone(),
            packages: self.packages.clone(),
            snaps: self.snaps.clone(),
            rootfs_size: self.rootfs_size,
            volume_names: self.volume_names.clone(),
            is_seeded: self.is_seeded,
        }
    }

    async fn execute_step(&mut self, step: StepId) -> Result<()> {
        match step {
            StepId::BuildGadgetTree => self.build_gadget_tree().await,
            StepId::PrepareGadgetTree => self.prepare_gadget_tree().await,
            StepId::LoadGadgetYaml => self.load_gadget_yaml().await,
            StepId::Germinate => self.germinate().await,
            StepId::BuildRootfsFromTasks => self.build_rootfs_from_tasks().await,
            StepId::ExtractRootfsTar => self.extract_rootfs_tar().await,
            StepId::CreateChroot => self.create_chroot().await,
            StepId::AddExtraPpas => self.add_extra_ppas().await,
            StepId::InstallPackages | StepId::InstallExtraPackages => {
                self.install_packages().await
            }
            StepId::InstallExtraSnaps => self.install_extra_snaps().await,
            StepId::PreseedExtraSnaps => self.preseed_extra_snaps().await,
            StepId::CustomizeCloudInit => self.customize_cloud_init().await,
            StepId::CustomizeFstab => self.customize_fstab().await,
            StepId::PerformManualCustomization => self.perform_manual_customization().await,
            StepId::PopulateRootfsContents => self.populate_rootfs_contents().await,
            StepId::GenerateDiskInfo => self.generate_disk_info().await,
            StepId::CalculateRootfsSize => self.calculate_rootfs_size().await,
            StepId::PopulateBootfsContents => {
                let gadget = self.gadget()?;
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
                    run_update_grub: true,
                };
                disk::make_disk(&self.executor, &self.machine.workspace, gadget, &opts).await
            }
            StepId::GenerateManifest => {
                let output_dir = self.machine.opts.output_dir();
                std::fs::create_dir_all(&output_dir)?;
                let rootfs = self.machine.workspace.rootfs()?;
                manifest::generate_package_manifest(
                    &self.executor,
                    &rootfs,
                    &output_dir.join("filesystem.manifest"),
                )
                .await?;
                let snaps_dir = rootfs.join("var/lib/snapd/seed/snaps");
                manifest::write_snap_manifest(&snaps_dir, &output_dir.join("snap.manifest"))?;
                Ok(())
            }
            StepId::Finish => {
                info!("Build complete");
                Ok(())
            }
            StepId::PrepareImage | StepId::GenerateSnapManifest => {
                Err(ImageBuildError::FlagConflict(format!(
                    "state {} is not part of the classic pipeline",
                    step.name()
                )))
            }
        }
    }
}
