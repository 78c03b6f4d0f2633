// file: src/image/manifest.rs
// version: 1.1.0
// guid: 3d78a2c9-45e0-4b61-98f4-c07d5e12a8b6

//! Package and snap manifest writers

use crate::commands::apt;
use crate::error::{ImageBuildError, Result};
use crate::executor::Executor;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Write `<name> <revision>` lines for every .snap in the given seed
/// directory. A missing directory is not an error; earlier builds simply
/// produced no snap manifest either.
pub fn write_snap_manifest(snaps_dir: &Path, output: &Path) -> Result<()> {
    let entries = match fs::read_dir(snaps_dir) {
        Ok(entries) => entries,
        Err(_) => {
            debug!(
                "No snaps directory at {}, skipping snap manifest",
                snaps_dir.display()
            );
            return Ok(());
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".snap"))
        .collect();
    names.sort_unstable();

    let mut manifest = String::new();
    for file_name in names {
        let stem = file_name.trim_end_matches(".snap");
        if let Some((snap, revision)) = stem.split_once('_') {
            manifest.push_str(snap);
            manifest.push(' ');
            manifest.push_str(revision);
            manifest.push('\n');
        }
    }

    fs::write(output, manifest).map_err(|e| {
        ImageBuildError::WorkspaceIO(format!("Error creating manifest file: {}", e))
    })?;
    info!("Wrote snap manifest to {}", output.display());
    Ok(())
}

/// Query the staged root tree's dpkg database and write the package
/// manifest.
pub async fn generate_package_manifest(
    executor: &Executor,
    root: &Path,
    output: &Path,
) -> Result<()> {
    let result = executor.run(&apt::manifest_cmd(root)).await?;
    fs::write(output, result.stdout).map_err(|e| {
        ImageBuildError::WorkspaceIO(format!("Error creating manifest file: {}", e))
    })?;
    info!("Wrote package manifest to {}", output.display());
    Ok(())
}
