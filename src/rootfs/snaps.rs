// file: src/rootfs/snaps.rs
// version: 1.2.0
// guid: c21b84f6-e903-4d57-a6f2-58d09c3e71b4

//! Snap preseeding for classic images
//!
//! Snaps come from three places: the germinate seeds, repeated `--snap`
//! flags, and the customization block. The merged list (last channel
//! wins) is handed to the external snap seeding machinery, which
//! populates `/var/lib/snapd/seed` in the chroot.

use crate::commands::snap as snap_cmds;
use crate::error::{ImageBuildError, Result};
use crate::statemachine::classic::ClassicStateMachine;
use std::fs;
use tracing::{debug, info};

/// Generic classic model used when preseeding a classic root tree.
const CLASSIC_MODEL: &str = "\
type: model
authority-id: generic
series: 16
brand-id: generic
model: generic-classic
classic: true
timestamp: 2015-07-27T00:00:00.0Z
";

impl ClassicStateMachine {
    /// install_extra_snaps: merge every snap source into `name=channel`
    /// entries and stage the model the preseed step will use.
    pub(crate) async fn install_extra_snaps(&mut self) -> Result<()> {
        let mut merged = parse_snaps_and_channels(&self.snaps)?;

        let cli_snaps = parse_snaps_and_channels(&self.machine.opts.snaps)?;
        merge_channels(&mut merged, cli_snaps);

        if let Some(customization) = self.definition.customization() {
            let extra: Vec<(String, String)> = customization
                .extra_snaps
                .iter()
                .map(|snap| (snap.name.clone(), snap.channel.clone()))
                .collect();
            merge_channels(&mut merged, extra);
        }

        self.snaps = merged
            .into_iter()
            .map(|(name, channel)| format!("{}={}", name, channel))
            .collect();
        debug!("Merged snap list: {:?}", self.snaps);

        if !self.snaps.is_empty() {
            let model_path = self.machine.workspace.scratch()?.join("classic-model.assertion");
            fs::write(&model_path, CLASSIC_MODEL).map_err(|e| {
                ImageBuildError::WorkspaceIO(format!("Error writing classic model: {}", e))
            })?;
        }
        Ok(())
    }

    /// preseed_extra_snaps: run the seeding machinery against the chroot.
    pub(crate) async fn preseed_extra_snaps(&mut self) -> Result<()> {
        if self.snaps.is_empty() {
            debug!("No snaps to preseed");
            return Ok(());
        }
        let chroot = self.machine.workspace.chroot()?;
        let model_path = self.machine.workspace.scratch()?.join("classic-model.assertion");
        info!("Preseeding {} snaps", self.snaps.len());
        self.executor
            .run(&snap_cmds::prepare_classic_cmd(
                &self.definition.architecture,
                &self.snaps,
                &model_path,
                &chroot,
            ))
            .await?;
        Ok(())
    }
}

/// Split `name` / `name=channel` command-line entries. More than one `=`
/// is a syntax error.
pub fn parse_snaps_and_channels(snaps: &[String]) -> Result<Vec<(String, String)>> {
    let mut parsed = Vec::new();
    for snap in snaps {
        let entry = match snap.split_once('=') {
            None => (snap.clone(), "stable".to_string()),
            Some((name, channel)) => {
                if name.is_empty() || channel.is_empty() || channel.contains('=') {
                    return Err(ImageBuildError::DomainRule(format!(
                        "Invalid syntax passed to --snap: {}. Argument must be in the form \
                         --snap=name or --snap=name=channel",
                        snap
                    )));
                }
                (name.to_string(), channel.to_string())
            }
        };
        parsed.push(entry);
    }
    Ok(parsed)
}

/// Merge `overlay` into `base`; an overlay entry overrides the channel of
/// an existing snap, otherwise it is appended.
fn merge_channels(base: &mut Vec<(String, String)>, overlay: Vec<(String, String)>) {
    for (name, channel) in overlay {
        match base.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = channel,
            None => base.push((name, channel)),
        }
    }
}
