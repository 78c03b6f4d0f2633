// file: src/cli/commands.rs
// version: 1.1.0
// guid: 0b94e6d8-73c2-4a15-9f80-5e6a1d27c43f

//! Subcommand entry points

use crate::cli::args::BuildArgs;
use crate::error::Result;
use crate::statemachine::classic::ClassicStateMachine;
use crate::statemachine::snap::SnapStateMachine;
use crate::statemachine::CommonOpts;
use std::path::Path;

/// Translate parsed CLI arguments into the engine's common options.
pub fn common_opts(debug: bool, verbose: bool, quiet: bool, build: &BuildArgs) -> CommonOpts {
    CommonOpts {
        work_dir: build.workdir.clone(),
        output_dir: build.output_dir.clone(),
        until: build.until.clone(),
        thru: build.thru.clone(),
        resume: build.resume,
        debug,
        verbose,
        quiet,
        sector_size: build.sector_size,
        snaps: build.snaps.clone(),
        disk_info: build.disk_info.clone(),
    }
}

/// Build a classic image. The workspace is torn down only on success so
/// a failed run can be inspected or resumed.
pub async fn classic_command(opts: CommonOpts, image_definition: &Path) -> Result<()> {
    let mut state_machine = ClassicStateMachine::setup(opts, image_definition).await?;
    state_machine.run().await?;
    state_machine.teardown()
}

/// Build a snap (Ubuntu Core) image.
pub async fn snap_command(opts: CommonOpts, model_assertion: &Path) -> Result<()> {
    let mut state_machine = SnapStateMachine::setup(opts, model_assertion).await?;
    state_machine.run().await?;
    state_machine.teardown()
}
