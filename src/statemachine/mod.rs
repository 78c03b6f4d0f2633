// file: src/statemachine/mod.rs
// version: 2.0.0
// guid: 9c3e61b8-f502-4d7a-ba94-0317e8d5c26f

//! Staged execution engine
//!
//! An ordered, named list of steps with `--until`/`--thru`/`--resume`
//! semantics. The engine core is class-agnostic; the classic and snap
//! pipelines implement [`Pipeline`] and are driven by [`run_pipeline`].
//! Resume stores step *names*, not indices, so the step set can change
//! across versions without invalidating old workspaces.

pub mod classic;
pub mod snap;
pub mod workspace;

use crate::config::{GadgetInfo, ImageDefinition};
use crate::error::{ImageBuildError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

pub use workspace::Workspace;

/// Every step the engine knows about, across both image classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    BuildGadgetTree,
    PrepareGadgetTree,
    LoadGadgetYaml,
    Germinate,
    BuildRootfsFromTasks,
    ExtractRootfsTar,
    CreateChroot,
    AddExtraPpas,
    InstallPackages,
    InstallExtraPackages,
    InstallExtraSnaps,
    PreseedExtraSnaps,
    CustomizeCloudInit,
    CustomizeFstab,
    PerformManualCustomization,
    PopulateRootfsContents,
    GenerateDiskInfo,
    CalculateRootfsSize,
    PopulateBootfsContents,
    PopulatePreparePartitions,
    MakeDisk,
    GenerateManifest,
    Finish,
    PrepareImage,
    GenerateSnapManifest,
}

impl StepId {
    pub fn name(&self) -> &'static str {
        match self {
            StepId::BuildGadgetTree => "build_gadget_tree",
            StepId::PrepareGadgetTree => "prepare_gadget_tree",
            StepId::LoadGadgetYaml => "load_gadget_yaml",
            StepId::Germinate => "germinate",
            StepId::BuildRootfsFromTasks => "build_rootfs_from_tasks",
            StepId::ExtractRootfsTar => "extract_rootfs_tar",
            StepId::CreateChroot => "create_chroot",
            StepId::AddExtraPpas => "add_extra_ppas",
            StepId::InstallPackages => "install_packages",
            StepId::InstallExtraPackages => "install_extra_packages",
            StepId::InstallExtraSnaps => "install_extra_snaps",
            StepId::PreseedExtraSnaps => "preseed_extra_snaps",
            StepId::CustomizeCloudInit => "customize_cloud_init",
            StepId::CustomizeFstab => "customize_fstab",
            StepId::PerformManualCustomization => "perform_manual_customization",
            StepId::PopulateRootfsContents => "populate_rootfs_contents",
            StepId::GenerateDiskInfo => "generate_disk_info",
            StepId::CalculateRootfsSize => "calculate_rootfs_size",
            StepId::PopulateBootfsContents => "populate_bootfs_contents",
            StepId::PopulatePreparePartitions => "populate_prepare_partitions",
            StepId::MakeDisk => "make_disk",
            StepId::GenerateManifest => "generate_manifest",
            StepId::Finish => "finish",
            StepId::PrepareImage => "prepare_image",
            StepId::GenerateSnapManifest => "generate_snap_manifest",
        }
    }
}

/// Flags shared by all image classes.
#[derive(Debug, Clone)]
pub struct CommonOpts {
    pub work_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub until: Option<String>,
    pub thru: Option<String>,
    pub resume: bool,
    pub debug: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub sector_size: u64,
    pub snaps: Vec<String>,
    pub disk_info: Option<PathBuf>,
}

impl Default for CommonOpts {
    fn default() -> Self {
        Self {
            work_dir: None,
            output_dir: None,
            until: None,
            thru: None,
            resume: false,
            debug: false,
            verbose: false,
            quiet: false,
            sector_size: 512,
            snaps: Vec::new(),
            disk_info: None,
        }
    }
}

impl CommonOpts {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Serialized state-machine snapshot, rewritten after every successful
/// step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Name of the next step to run; "done" after the final step.
    pub next_step: String,
    pub definition: Option<ImageDefinition>,
    pub gadget: Option<GadgetInfo>,
    pub packages: Vec<String>,
    pub snaps: Vec<String>,
    pub rootfs_size: u64,
    pub volume_names: BTreeMap<String, String>,
    pub is_seeded: bool,
}

/// The class-agnostic engine core: flags, step list, cursor.
#[derive(Debug)]
pub struct StateMachine {
    pub opts: CommonOpts,
    pub workspace: Workspace,
    steps: Vec<StepId>,
    cursor: usize,
}

impl StateMachine {
    /// Validate command-line flags common to all image classes.
    pub fn validate_flags(opts: &CommonOpts) -> Result<()> {
        if opts.until.is_some() && opts.thru.is_some() {
            return Err(ImageBuildError::FlagConflict(
                "cannot specify both --until and --thru".to_string(),
            ));
        }
        if opts.resume && opts.work_dir.is_none() {
            return Err(ImageBuildError::FlagConflict(
                "must specify workdir when using --resume flag".to_string(),
            ));
        }
        let log_levels = [opts.debug, opts.verbose, opts.quiet]
            .iter()
            .filter(|flag| **flag)
            .count();
        if log_levels > 1 {
            return Err(ImageBuildError::FlagConflict(
                "--quiet, --verbose, and --debug flags are mutually exclusive".to_string(),
            ));
        }
        if opts.sector_size != 512 && opts.sector_size != 4096 {
            return Err(ImageBuildError::FlagConflict(format!(
                "invalid sector size {}: must be 512 or 4096",
                opts.sector_size
            )));
        }
        Ok(())
    }

    /// Validate flags and initialize the workspace.
    pub fn new(opts: CommonOpts) -> Result<Self> {
        Self::validate_flags(&opts)?;
        let workspace = Workspace::init(opts.work_dir.clone())?;
        Ok(Self {
            opts,
            workspace,
            steps: Vec::new(),
            cursor: 0,
        })
    }

    /// Install the computed step list and validate `--until`/`--thru`
    /// against the final step names.
    pub fn set_steps(&mut self, steps: Vec<StepId>) -> Result<()> {
        self.steps = steps;
        for flag in [&self.opts.until, &self.opts.thru] {
            if let Some(search) = flag {
                if !self.steps.iter().any(|step| step.name() == search.as_str()) {
                    return Err(ImageBuildError::FlagConflict(format!(
                        "state {} is not a valid state name",
                        search
                    )));
                }
            }
        }
        if self.opts.debug {
            println!("The calculated states are as follows:");
            for (index, step) in self.steps.iter().enumerate() {
                println!("[{}] {}", index, step.name());
            }
        }
        Ok(())
    }

    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    /// Position the cursor at a step by name, for `--resume`.
    pub fn set_cursor_to(&mut self, step_name: &str) -> Result<()> {
        if step_name == "done" {
            self.cursor = self.steps.len();
            return Ok(());
        }
        match self
            .steps
            .iter()
            .position(|step| step.name() == step_name)
        {
            Some(index) => {
                self.cursor = index;
                Ok(())
            }
            None => Err(ImageBuildError::FlagConflict(format!(
                "state {} is not a valid state name",
                step_name
            ))),
        }
    }

    /// The next step to run, or None when the run is complete or halted
    /// by `--until` (exclusive).
    pub fn next_step(&self) -> Option<StepId> {
        let step = *self.steps.get(self.cursor)?;
        if let Some(until) = &self.opts.until {
            if step.name() == until.as_str() {
                return None;
            }
        }
        Some(step)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Record a completed step. Returns true when the run must stop
    /// because `--thru` (inclusive) was reached.
    pub fn advance(&mut self, completed: StepId) -> bool {
        self.cursor += 1;
        matches!(&self.opts.thru, Some(thru) if completed.name() == thru.as_str())
    }

    /// Name of the next step for metadata persistence.
    pub fn next_step_name(&self) -> String {
        self.steps
            .get(self.cursor)
            .map(|step| step.name().to_string())
            .unwrap_or_else(|| "done".to_string())
    }
}

/// Class-specific pipeline hooks, injected into the shared run loop.
#[async_trait]
pub trait Pipeline {
    fn machine(&mut self) -> &mut StateMachine;
    fn machine_ref(&self) -> &StateMachine;
    fn metadata(&self) -> Metadata;
    async fn execute_step(&mut self, step: StepId) -> Result<()>;
}

/// Drive a pipeline from its cursor to completion, persisting metadata
/// after every successful step. A failing step aborts the run and leaves
/// the workspace intact for inspection or `--resume`.
pub async fn run_pipeline<P>(pipeline: &mut P) -> Result<()>
where
    P: Pipeline + Send,
{
    loop {
        let Some(step) = pipeline.machine_ref().next_step() else {
            break;
        };
        let index = pipeline.machine_ref().cursor();
        let total = pipeline.machine_ref().steps().len();
        info!("[{}/{}] {}", index + 1, total, step.name());

        pipeline
            .execute_step(step)
            .await
            .map_err(|e| e.in_step(step.name()))?;

        let stop = pipeline.machine().advance(step);
        let metadata = pipeline.metadata();
        pipeline.machine().workspace.save_metadata(&metadata)?;
        if stop {
            break;
        }
    }
    Ok(())
}

/// Read and parse the gadget metadata staged at unpack/gadget.
pub(crate) fn read_gadget_yaml(workspace: &Workspace) -> Result<GadgetInfo> {
    let gadget_dir = workspace.unpack()?.join("gadget");
    let candidates = [
        gadget_dir.join("meta").join("gadget.yaml"),
        gadget_dir.join("gadget.yaml"),
    ];
    let yaml_path = candidates.iter().find(|path| path.exists()).ok_or_else(|| {
        ImageBuildError::ContentMissing(format!(
            "no gadget.yaml found under {}",
            gadget_dir.display()
        ))
    })?;
    let content = std::fs::read_to_string(yaml_path)?;
    GadgetInfo::from_yaml(&content)
}

/// Measure a staged root tree with du and scale by 1.5 for filesystem
/// overhead, rounded up to the sector size.
pub(crate) async fn measure_rootfs_size(
    executor: &crate::executor::Executor,
    rootfs: &std::path::Path,
    sector_size: u64,
) -> Result<u64> {
    let output = executor
        .run(&crate::commands::system::du_cmd(rootfs))
        .await?;
    let measured: u64 = output
        .stdout_trimmed()
        .split_whitespace()
        .next()
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| {
            ImageBuildError::WorkspaceIO(format!(
                "could not parse du output: {}",
                output.stdout_trimmed()
            ))
        })?;
    let padded = (measured as f64 * 1.5).ceil() as u64;
    Ok(padded.div_ceil(sector_size) * sector_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn opts_with_workdir(dir: &TempDir) -> CommonOpts {
        CommonOpts {
            work_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_until_and_thru_conflict() {
        let opts = CommonOpts {
            until: Some("make_disk".to_string()),
            thru: Some("make_disk".to_string()),
            ..Default::default()
        };
        let err = StateMachine::validate_flags(&opts).unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot specify both --until and --thru"));
    }

    #[test]
    fn test_resume_requires_workdir() {
        let opts = CommonOpts {
            resume: true,
            ..Default::default()
        };
        let err = StateMachine::validate_flags(&opts).unwrap_err();
        assert!(err.to_string().contains("must specify workdir"));
    }

    #[test]
    fn test_log_flags_mutually_exclusive() {
        let opts = CommonOpts {
            debug: true,
            quiet: true,
            ..Default::default()
        };
        let err = StateMachine::validate_flags(&opts).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_invalid_sector_size_rejected() {
        let opts = CommonOpts {
            sector_size: 1024,
            ..Default::default()
        };
        assert!(StateMachine::validate_flags(&opts).is_err());
    }

    #[test]
    fn test_unknown_until_state_rejected() {
        let dir = TempDir::new().unwrap();
        let mut opts = opts_with_workdir(&dir);
        opts.thru = Some("fake_state".to_string());
        let mut machine = StateMachine::new(opts).unwrap();
        let err = machine
            .set_steps(vec![StepId::LoadGadgetYaml, StepId::Finish])
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("state fake_state is not a valid state name"));
    }

    #[test]
    fn test_until_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let mut opts = opts_with_workdir(&dir);
        opts.until = Some("make_disk".to_string());
        let mut machine = StateMachine::new(opts).unwrap();
        machine
            .set_steps(vec![
                StepId::LoadGadgetYaml,
                StepId::MakeDisk,
                StepId::Finish,
            ])
            .unwrap();

        assert_eq!(machine.next_step(), Some(StepId::LoadGadgetYaml));
        assert!(!machine.advance(StepId::LoadGadgetYaml));
        // next step would be make_disk, which --until excludes
        assert_eq!(machine.next_step(), None);
    }

    #[test]
    fn test_thru_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let mut opts = opts_with_workdir(&dir);
        opts.thru = Some("make_disk".to_string());
        let mut machine = StateMachine::new(opts).unwrap();
        machine
            .set_steps(vec![
                StepId::LoadGadgetYaml,
                StepId::MakeDisk,
                StepId::Finish,
            ])
            .unwrap();

        assert!(!machine.advance(StepId::LoadGadgetYaml));
        assert_eq!(machine.next_step(), Some(StepId::MakeDisk));
        // completing make_disk stops the run
        assert!(machine.advance(StepId::MakeDisk));
    }

    #[test]
    fn test_cursor_restore_by_name() {
        let dir = TempDir::new().unwrap();
        let mut machine = StateMachine::new(opts_with_workdir(&dir)).unwrap();
        machine
            .set_steps(vec![
                StepId::LoadGadgetYaml,
                StepId::MakeDisk,
                StepId::Finish,
            ])
            .unwrap();
        machine.set_cursor_to("make_disk").unwrap();
        assert_eq!(machine.next_step(), Some(StepId::MakeDisk));

        machine.set_cursor_to("done").unwrap();
        assert_eq!(machine.next_step(), None);

        assert!(machine.set_cursor_to("bogus_step").is_err());
    }

    #[test]
    fn test_next_step_name_when_done() {
        let dir = TempDir::new().unwrap();
        let mut machine = StateMachine::new(opts_with_workdir(&dir)).unwrap();
        machine.set_steps(vec![StepId::Finish]).unwrap();
        assert_eq!(machine.next_step_name(), "finish");
        machine.advance(StepId::Finish);
        assert_eq!(machine.next_step_name(), "done");
    }
}
