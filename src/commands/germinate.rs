// file: src/commands/germinate.rs
// version: 1.1.0
// guid: 6f42a9d8-03b5-47ec-81d9-e5c70f36a2b4

//! germinate command construction

use crate::config::ImageDefinition;
use crate::executor::Command;

/// Build the germinate invocation for the seed configuration of the image
/// definition. Callers run this in the scratch germinate directory.
///
/// The seed-dist takes the form `<flavor>[.<branch>]`.
pub fn germinate_cmd(definition: &ImageDefinition) -> Command {
    let seed = definition
        .rootfs
        .seed
        .as_ref()
        .expect("germinate requires a seed rootfs source");

    let mut seed_dist = definition.rootfs.flavor.clone();
    if let Some(branch) = &seed.branch {
        seed_dist.push('.');
        seed_dist.push_str(branch);
    }

    let mut cmd = Command::new("germinate")
        .arg("--mirror")
        .arg(&definition.rootfs.mirror)
        .arg("--arch")
        .arg(&definition.architecture)
        .arg("--dist")
        .arg(&definition.series)
        .arg("--seed-source")
        .arg(seed.urls.join(","))
        .arg("--seed-dist")
        .arg(seed_dist)
        .arg("--no-rdepends");

    if seed.vcs {
        cmd = cmd.arg("--vcs=auto");
    }

    if !definition.rootfs.components.is_empty() {
        cmd = cmd.arg(format!(
            "--components={}",
            definition.rootfs.components.join(",")
        ));
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::definition::*;

    fn seed_definition(vcs: bool, branch: Option<&str>) -> ImageDefinition {
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
                components: vec!["main".to_string()],
                archive: "ubuntu".to_string(),
                seed: Some(Seed {
                    urls: vec![
                        "git://git.launchpad.net/~ubuntu-core-dev/ubuntu-seeds/+git/".to_string(),
                    ],
                    branch: branch.map(|b| b.to_string()),
                    names: vec!["server".to_string()],
                    vcs,
                }),
                archive_tasks: None,
                tarball: None,
            },
            customization: None,
        }
    }

    #[test]
    fn test_germinate_cmd_with_vcs_and_branch() {
        let cmd = germinate_cmd(&seed_definition(true, Some("jammy")));
        assert_eq!(
            cmd.rendered(),
            "germinate --mirror http://archive.ubuntu.com/ubuntu/ --arch amd64 \
             --dist jammy \
             --seed-source git://git.launchpad.net/~ubuntu-core-dev/ubuntu-seeds/+git/ \
             --seed-dist ubuntu.jammy --no-rdepends --vcs=auto --components=main"
        );
    }

    #[test]
    fn test_germinate_cmd_without_vcs() {
        let cmd = germinate_cmd(&seed_definition(false, None));
        let rendered = cmd.rendered();
        assert!(rendered.contains("--seed-dist ubuntu "));
        assert!(!rendered.contains("--vcs=auto"));
    }
}
