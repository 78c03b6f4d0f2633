// file: src/config/validator.rs
// version: 1.2.0
// guid: 5d21c7e0-9b84-4f3a-a2d6-70e15c84b9f2

//! Domain-rule validation for image definitions.
//!
//! Structural validation (required keys, enum values, unknown fields) is
//! handled by serde at parse time; this module carries the rules that a
//! schema cannot express.

use crate::config::definition::{Customization, GadgetSourceType, ImageDefinition, Manual};
use crate::error::{ImageBuildError, Result};
use regex::Regex;
use tracing::debug;

const VALID_POCKETS: &[&str] = &["release", "security", "updates", "proposed"];

/// Validate the complete image definition
pub fn validate_definition(definition: &ImageDefinition) -> Result<()> {
    debug!("Validating image definition \"{}\"", definition.name);

    if definition.name.is_empty() {
        return Err(ImageBuildError::DomainRule(
            "name must not be empty".to_string(),
        ));
    }
    if definition.architecture.is_empty() {
        return Err(ImageBuildError::DomainRule(
            "architecture must not be empty (host detection returned nothing)".to_string(),
        ));
    }
    if definition.architecture().is_none() {
        return Err(ImageBuildError::DomainRule(format!(
            "unsupported architecture: {}",
            definition.architecture
        )));
    }
    if definition.series.is_empty() {
        return Err(ImageBuildError::DomainRule(
            "series must not be empty (host detection returned nothing)".to_string(),
        ));
    }

    validate_gadget(definition)?;
    validate_rootfs(definition)?;
    if let Some(customization) = definition.customization() {
        validate_customization(customization)?;
    }

    debug!("Image definition validated");
    Ok(())
}

fn validate_gadget(definition: &ImageDefinition) -> Result<()> {
    let gadget = &definition.gadget;
    if gadget.source_type == GadgetSourceType::Git && gadget.url.is_empty() {
        return Err(ImageBuildError::DomainRule(
            "When key gadget:type is specified as git, a URL must be provided".to_string(),
        ));
    }
    validate_url(&gadget.url)
}

fn validate_rootfs(definition: &ImageDefinition) -> Result<()> {
    let rootfs = &definition.rootfs;

    let sources = [
        rootfs.seed.is_some(),
        rootfs.archive_tasks.is_some(),
        rootfs.tarball.is_some(),
    ];
    if sources.iter().filter(|present| **present).count() != 1 {
        return Err(ImageBuildError::DomainRule(
            "exactly one of seed, archive-tasks and tarball must be specified".to_string(),
        ));
    }

    let pocket = rootfs.pocket.to_lowercase();
    if !VALID_POCKETS.contains(&pocket.as_str()) {
        return Err(ImageBuildError::DomainRule(format!(
            "pocket must be one of release, security, updates, proposed (got \"{}\")",
            rootfs.pocket
        )));
    }

    if let Some(seed) = &rootfs.seed {
        if seed.urls.is_empty() {
            return Err(ImageBuildError::DomainRule(
                "rootfs:seed:urls must not be empty".to_string(),
            ));
        }
        if seed.names.is_empty() {
            return Err(ImageBuildError::DomainRule(
                "rootfs:seed:names must not be empty".to_string(),
            ));
        }
        for url in &seed.urls {
            validate_url(url)?;
        }
    }

    validate_url(&rootfs.mirror)
}

fn validate_customization(customization: &Customization) -> Result<()> {
    let ppa_name_regex =
        Regex::new(r"^[a-z0-9][a-z0-9.+-]*/[a-z0-9][a-z0-9.+-]*$").expect("Invalid PPA name regex");
    let auth_regex = Regex::new(r"^[^:]+:[^:]+$").expect("Invalid PPA auth regex");

    for ppa in &customization.extra_ppas {
        if !ppa_name_regex.is_match(&ppa.name) {
            return Err(ImageBuildError::DomainRule(format!(
                "Invalid PPA name \"{}\": must match user/ppa",
                ppa.name
            )));
        }
        if let Some(auth) = &ppa.auth {
            if !auth_regex.is_match(auth) {
                return Err(ImageBuildError::DomainRule(format!(
                    "Invalid PPA auth \"{}\": must match user:password",
                    auth
                )));
            }
            if ppa.fingerprint.as_deref().unwrap_or("").is_empty() {
                return Err(ImageBuildError::DomainRule(
                    "Fingerprint is required for private PPAs".to_string(),
                ));
            }
        }
    }

    for package in &customization.extra_packages {
        if package.name.is_empty() || package.name.contains(' ') {
            return Err(ImageBuildError::DomainRule(format!(
                "Invalid package name: \"{}\"",
                package.name
            )));
        }
    }

    if let Some(manual) = &customization.manual {
        validate_manual(manual)?;
    }

    Ok(())
}

fn validate_manual(manual: &Manual) -> Result<()> {
    let username_regex = Regex::new(r"^[a-z][a-z0-9_-]*$").expect("Invalid username regex");

    for copy_file in &manual.copy_file {
        validate_chroot_path(&copy_file.destination)?;
    }
    for touch_file in &manual.touch_file {
        validate_chroot_path(&touch_file.path)?;
    }
    for execute in &manual.execute {
        validate_chroot_path(&execute.path)?;
    }
    for user in &manual.add_user {
        if !username_regex.is_match(&user.name) {
            return Err(ImageBuildError::DomainRule(format!(
                "Invalid user name: \"{}\"",
                user.name
            )));
        }
    }
    for group in &manual.add_group {
        if !username_regex.is_match(&group.name) {
            return Err(ImageBuildError::DomainRule(format!(
                "Invalid group name: \"{}\"",
                group.name
            )));
        }
    }
    Ok(())
}

/// Paths targeting the chroot must be absolute and free of `..` segments.
fn validate_chroot_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.split('/').any(|segment| segment == "..") {
        return Err(ImageBuildError::DomainRule(format!(
            "needs to be an absolute path ({})",
            path
        )));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    reqwest::Url::parse(url).map_err(|_| {
        ImageBuildError::SchemaError(format!("\"{}\" does not match format 'uri'", url))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::definition::*;

    fn valid_definition() -> ImageDefinition {
        ImageDefinition {
            name: "ubuntu-server-amd64".to_string(),
            display_name: None,
            revision: None,
            architecture: "amd64".to_string(),
            series: "jammy".to_string(),
            class: ImageClass::Preinstalled,
            kernel: None,
            gadget: GadgetSource {
                url: "https://github.com/snapcore/pc-amd64-gadget".to_string(),
                source_type: GadgetSourceType::Git,
                branch: Some("classic".to_string()),
                target: None,
            },
            rootfs: Rootfs {
                flavor: "ubuntu".to_string(),
                mirror: "http://archive.ubuntu.com/ubuntu/".to_string(),
                pocket: "release".to_string(),
                components: vec!["main".to_string()],
                archive: "ubuntu".to_string(),
                seed: Some(Seed {
                    urls: vec!["https://people.canonical.com/~ubuntu-archive/seeds/".to_string()],
                    branch: Some("jammy".to_string()),
                    names: vec!["server".to_string(), "minimal".to_string()],
                    vcs: false,
                }),
                archive_tasks: None,
                tarball: None,
            },
            customization: None,
        }
    }

    #[test]
    fn test_valid_definition_passes() {
        assert!(validate_definition(&valid_definition()).is_ok());
    }

    #[test]
    fn test_both_seed_and_tasks_rejected() {
        let mut def = valid_definition();
        def.rootfs.archive_tasks = Some(vec!["server".to_string()]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err
            .to_string()
            .contains("exactly one of seed, archive-tasks and tarball"));
    }

    #[test]
    fn test_no_rootfs_source_rejected() {
        let mut def = valid_definition();
        def.rootfs.seed = None;
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_bad_mirror_url_rejected() {
        let mut def = valid_definition();
        def.rootfs.mirror = "not a url".to_string();
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("does not match format 'uri'"));
    }

    #[test]
    fn test_bad_ppa_name_rejected() {
        let mut def = valid_definition();
        def.customization = Some(Customization {
            extra_ppas: vec![Ppa {
                name: "NoSlashHere".to_string(),
                auth: None,
                fingerprint: None,
            }],
            ..Default::default()
        });
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("Invalid PPA name"));
    }

    #[test]
    fn test_private_ppa_without_fingerprint_rejected() {
        let mut def = valid_definition();
        def.customization = Some(Customization {
            extra_ppas: vec![Ppa {
                name: "canonical-foundations/ubuntu-image".to_string(),
                auth: Some("user:password".to_string()),
                fingerprint: None,
            }],
            ..Default::default()
        });
        let err = validate_definition(&def).unwrap_err();
        assert!(err
            .to_string()
            .contains("Fingerprint is required for private PPAs"));
    }

    #[test]
    fn test_relative_manual_path_rejected() {
        let mut def = valid_definition();
        def.customization = Some(Customization {
            manual: Some(Manual {
                touch_file: vec![TouchFile {
                    path: "../../malicious".to_string(),
                }],
                ..Default::default()
            }),
            ..Default::default()
        });
        let err = validate_definition(&def).unwrap_err();
        assert!(err
            .to_string()
            .contains("needs to be an absolute path (../../malicious)"));
    }

    #[test]
    fn test_absolute_path_with_dotdot_rejected() {
        let mut def = valid_definition();
        def.customization = Some(Customization {
            manual: Some(Manual {
                copy_file: vec![CopyFile {
                    source: std::path::PathBuf::from("testdata/test_script"),
                    destination: "/../../malicious".to_string(),
                }],
                ..Default::default()
            }),
            ..Default::default()
        });
        let err = validate_definition(&def).unwrap_err();
        assert!(err
            .to_string()
            .contains("needs to be an absolute path (/../../malicious)"));
    }

    #[test]
    fn test_bad_pocket_rejected() {
        let mut def = valid_definition();
        def.rootfs.pocket = "backports".to_string();
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_empty_architecture_rejected() {
        let mut def = valid_definition();
        def.architecture = String::new();
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("architecture must not be empty"));
    }
}
