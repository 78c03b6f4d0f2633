// file: src/statemachine/workspace.rs
// version: 1.3.0
// guid: 412f8c6d-09e3-47b5-92a8-d7c04e61f38b

//! Workspace and staging store
//!
//! Owns the working directory, its fixed per-stage subdirectories, the
//! persisted state-machine metadata, and the teardown policy: a
//! user-supplied workdir survives teardown, a generated one is removed.

use crate::error::{ImageBuildError, Result};
use crate::statemachine::Metadata;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the persisted state-machine metadata file.
pub const METADATA_FILE: &str = "ubuntu-image.json";

/// The fixed staging subdirectories.
pub const STAGING_DIRS: &[&str] = &["unpack", "chroot", "scratch", "rootfs", "volumes"];

#[derive(Debug)]
pub struct Workspace {
    work_dir: PathBuf,
    remove_on_teardown: bool,
}

impl Workspace {
    /// Initialize the workspace.
    ///
    /// With a user-supplied directory the workspace is created if missing
    /// and kept on teardown; without one a fresh directory is generated
    /// under the system temp dir and flagged for removal.
    pub fn init(work_dir: Option<PathBuf>) -> Result<Self> {
        let (work_dir, remove_on_teardown) = match work_dir {
            Some(dir) => (dir, false),
            None => {
                let generated = std::env::temp_dir()
                    .join(format!("ubuntu-image-{}", uuid::Uuid::new_v4()));
                (generated, true)
            }
        };

        fs::create_dir_all(&work_dir).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!(
                "Failed to create work directory {}: {}",
                work_dir.display(),
                e
            ))
        })?;
        debug!("Workspace initialized at {}", work_dir.display());

        Ok(Self {
            work_dir,
            remove_on_teardown,
        })
    }

    pub fn path(&self) -> &Path {
        &self.work_dir
    }

    /// Lazily create and return a named staging subdirectory. An existing
    /// directory is not an error.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.work_dir.join(name);
        fs::create_dir_all(&dir).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!(
                "Failed to create {} directory: {}",
                name, e
            ))
        })?;
        Ok(dir)
    }

    pub fn unpack(&self) -> Result<PathBuf> {
        self.subdir("unpack")
    }

    pub fn chroot(&self) -> Result<PathBuf> {
        self.subdir("chroot")
    }

    pub fn scratch(&self) -> Result<PathBuf> {
        self.subdir("scratch")
    }

    pub fn rootfs(&self) -> Result<PathBuf> {
        self.subdir("rootfs")
    }

    pub fn volumes(&self) -> Result<PathBuf> {
        self.subdir("volumes")
    }

    /// Persist the state-machine metadata atomically (write-then-rename),
    /// so a crash mid-write never corrupts the resume point.
    pub fn save_metadata(&self, metadata: &Metadata) -> Result<()> {
        let path = self.work_dir.join(METADATA_FILE);
        let tmp = self.work_dir.join(format!("{}.tmp", METADATA_FILE));
        let rendered = serde_json::to_vec_pretty(metadata)?;
        fs::write(&tmp, rendered).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Failed to write metadata: {}", e))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Failed to replace metadata: {}", e))
        })?;
        debug!("Metadata saved, next step: {}", metadata.next_step);
        Ok(())
    }

    /// Load previously persisted metadata for a `--resume` run.
    pub fn load_metadata(&self) -> Result<Metadata> {
        let path = self.work_dir.join(METADATA_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!(
                "error reading metadata file {}: {}",
                path.display(),
                e
            ))
        })?;
        let metadata: Metadata = serde_json::from_str(&content)
            .map_err(|e| ImageBuildError::WorkspaceIO(format!("error reading metadata file: {}", e)))?;
        Ok(metadata)
    }

    /// Remove the workspace if it was generated by us.
    pub fn teardown(&self) -> Result<()> {
        if self.remove_on_teardown {
            fs::remove_dir_all(&self.work_dir).map_err(|e| {
                ImageBuildError::WorkspaceIO(format!(
                    "Error cleaning up work directory: {}",
                    e
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_workdir_is_removed_on_teardown() {
        let workspace = Workspace::init(None).unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.exists());
        workspace.teardown().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_user_workdir_survives_teardown() {
        let dir = TempDir::new().unwrap();
        let workdir = dir.path().join("build");
        let workspace = Workspace::init(Some(workdir.clone())).unwrap();
        workspace.subdir("chroot").unwrap();
        workspace.teardown().unwrap();
        assert!(workdir.exists());
        assert!(workdir.join("chroot").exists());
    }

    #[test]
    fn test_subdir_tolerates_existing() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(Some(dir.path().to_path_buf())).unwrap();
        let first = workspace.subdir("scratch").unwrap();
        let second = workspace.subdir("scratch").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_metadata_roundtrip() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(Some(dir.path().to_path_buf())).unwrap();
        let metadata = Metadata {
            next_step: "make_disk".to_string(),
            packages: vec!["hello".to_string()],
            snaps: vec!["lxd=stable".to_string()],
            rootfs_size: 123456,
            is_seeded: true,
            ..Default::default()
        };

        // Act
        workspace.save_metadata(&metadata).unwrap();
        let loaded = workspace.load_metadata().unwrap();

        // Assert
        assert_eq!(loaded.next_step, "make_disk");
        assert_eq!(loaded.packages, vec!["hello"]);
        assert_eq!(loaded.rootfs_size, 123456);
        assert!(loaded.is_seeded);
    }

    #[test]
    fn test_load_metadata_without_prior_run_fails() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(Some(dir.path().to_path_buf())).unwrap();
        let err = workspace.load_metadata().unwrap_err();
        assert!(err.to_string().contains("error reading metadata file"));
    }

    #[test]
    fn test_no_stale_tmp_file_after_save() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(Some(dir.path().to_path_buf())).unwrap();
        workspace.save_metadata(&Metadata::default()).unwrap();
        assert!(dir.path().join(METADATA_FILE).exists());
        assert!(!dir.path().join(format!("{}.tmp", METADATA_FILE)).exists());
    }
}
