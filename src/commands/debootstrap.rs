// file: src/commands/debootstrap.rs
// version: 1.1.0
// guid: 4b80e6d2-17f9-43ac-95d3-c2a61f08e74b

//! debootstrap command construction

use crate::config::ImageDefinition;
use crate::executor::Command;
use std::path::Path;

/// Build the debootstrap invocation that creates the chroot which will
/// eventually become the rootfs of the resulting image.
pub fn bootstrap_cmd(definition: &ImageDefinition, target: &Path) -> Command {
    let mut cmd = Command::new("debootstrap")
        .arg("--arch")
        .arg(&definition.architecture)
        .arg("--variant=minbase");

    // ca-certificates is needed to use PPAs
    let has_ppas = definition
        .customization()
        .map(|c| !c.extra_ppas.is_empty())
        .unwrap_or(false);
    if has_ppas {
        cmd = cmd.arg("--include=ca-certificates");
    }

    if !definition.rootfs.components.is_empty() {
        cmd = cmd.arg(format!(
            "--components={}",
            definition.rootfs.components.join(",")
        ));
    }

    cmd.arg(&definition.series)
        .arg_path(target)
        .arg(&definition.rootfs.mirror)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::definition::*;

    fn definition_with_ppas(with_ppas: bool) -> ImageDefinition {
        ImageDefinition {
            name: "test".to_string(),
            display_name: None,
            revision: None,
            architecture: "amd64".to_string(),
            series: "jammy".to_string(),
            class: ImageClass::Preinstalled,
            kernel: None,
            gadget: GadgetSource {
                url: "https://example.com/gadget".to_string(),
                source_type: GadgetSourceType::Directory,
                branch: None,
                target: None,
            },
            rootfs: Rootfs {
                flavor: "ubuntu".to_string(),
                mirror: "http://archive.ubuntu.com/ubuntu/".to_string(),
                pocket: "release".to_string(),
                components: vec!["main".to_string(), "restricted".to_string()],
                archive: "ubuntu".to_string(),
                seed: None,
                archive_tasks: None,
                tarball: None,
            },
            customization: with_ppas.then(|| Customization {
                extra_ppas: vec![Ppa {
                    name: "canonical-foundations/ubuntu-image".to_string(),
                    auth: None,
                    fingerprint: None,
                }],
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_bootstrap_cmd_basic() {
        let cmd = bootstrap_cmd(&definition_with_ppas(false), Path::new("/work/chroot"));
        assert_eq!(
            cmd.rendered(),
            "debootstrap --arch amd64 --variant=minbase \
             --components=main,restricted jammy /work/chroot \
             http://archive.ubuntu.com/ubuntu/"
        );
    }

    #[test]
    fn test_bootstrap_cmd_includes_ca_certificates_for_ppas() {
        let cmd = bootstrap_cmd(&definition_with_ppas(true), Path::new("/work/chroot"));
        assert!(cmd
            .get_args()
            .iter()
            .any(|arg| arg == "--include=ca-certificates"));
    }
}
