// file: src/config/loader.rs
// version: 1.1.0
// guid: a7f3d8b2-6c01-4e97-b5a4-19e82d60c7f3

//! Loading and validation of image definition files

use crate::config::definition::ImageDefinition;
use crate::config::validator;
use crate::error::{ImageBuildError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Load an image definition from a YAML file, validate it, and return the
/// fully-defaulted model.
pub async fn load_definition(path: &Path) -> Result<ImageDefinition> {
    info!("Loading image definition from {}", path.display());

    if !path.exists() {
        return Err(ImageBuildError::WorkspaceIO(format!(
            "Image definition file does not exist: {}",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        ImageBuildError::WorkspaceIO(format!(
            "Failed to read image definition {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut definition: ImageDefinition = serde_yaml::from_str(&content)
        .map_err(|e| ImageBuildError::SchemaError(e.to_string()))?;

    // An empty architecture or series falls back to the host before the
    // domain rules run; the rules reject an empty result explicitly.
    if definition.architecture.is_empty() {
        definition.architecture = crate::commands::system::host_arch().await;
        debug!("Architecture defaulted to host: {}", definition.architecture);
    }
    if definition.series.is_empty() {
        definition.series = crate::commands::system::host_suite().await;
        debug!("Series defaulted to host: {}", definition.series);
    }

    validator::validate_definition(&definition)?;

    info!("Image definition \"{}\" loaded and validated", definition.name);
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_DEFINITION: &str = r#"
name: ubuntu-server-amd64
architecture: amd64
series: jammy
class: preinstalled
gadget:
  url: https://github.com/snapcore/pc-amd64-gadget
  type: git
  branch: classic
rootfs:
  seed:
    urls:
      - "https://people.canonical.com/~ubuntu-archive/seeds/"
    branch: jammy
    names:
      - server
      - minimal
      - standard
      - cloud-image
"#;

    #[tokio::test]
    async fn test_load_valid_definition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("definition.yaml");
        tokio::fs::write(&path, VALID_DEFINITION).await.unwrap();

        let definition = load_definition(&path).await.unwrap();
        assert_eq!(definition.name, "ubuntu-server-amd64");
        assert_eq!(definition.series, "jammy");
        assert_eq!(definition.rootfs.pocket, "release");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load_definition(Path::new("/nonexistent/definition.yaml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("definition.yaml");
        tokio::fs::write(&path, "{not yaml: [").await.unwrap();

        let err = load_definition(&path).await.unwrap_err();
        assert!(matches!(err, ImageBuildError::SchemaError(_)));
    }

    #[tokio::test]
    async fn test_load_applies_domain_rules() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("definition.yaml");
        // both seed and tarball configured
        let both = format!(
            "{}\n  tarball:\n    url: /tmp/rootfs.tar.gz\n",
            VALID_DEFINITION.trim_end()
        );
        tokio::fs::write(&path, both).await.unwrap();

        let err = load_definition(&path).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("exactly one of seed, archive-tasks and tarball"));
    }
}
