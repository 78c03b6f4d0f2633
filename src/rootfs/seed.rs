// file: src/rootfs/seed.rs
// version: 1.2.0
// guid: ad52e897-30c6-4f1b-9e84-62d1f0b73c5a

//! Seed expansion via germinate

use crate::commands::germinate;
use crate::error::{ImageBuildError, Result};
use crate::statemachine::classic::ClassicStateMachine;
use std::fs;
use tracing::{debug, info};

impl ClassicStateMachine {
    /// germinate: expand the configured seeds into the package and snap
    /// lists that will populate the rootfs.
    pub(crate) async fn germinate(&mut self) -> Result<()> {
        let scratch = self.machine.workspace.scratch()?;
        let germinate_dir = scratch.join("germinate");
        fs::create_dir_all(&germinate_dir).map_err(|e| {
            ImageBuildError::WorkspaceIO(format!("Error creating germinate directory: {}", e))
        })?;

        let seed = self
            .definition
            .rootfs
            .seed
            .as_ref()
            .ok_or_else(|| {
                ImageBuildError::ContentMissing("germinate requires a seed rootfs".to_string())
            })?
            .clone();

        let cmd = germinate::germinate_cmd(&self.definition).current_dir(&germinate_dir);
        self.executor.run(&cmd).await?;

        for seed_name in &seed.names {
            let seed_path = germinate_dir.join(seed_name);
            let content = fs::read_to_string(&seed_path).map_err(|e| {
                ImageBuildError::WorkspaceIO(format!(
                    "Error opening seed file {}: {}",
                    seed_path.display(),
                    e
                ))
            })?;
            let (packages, snaps) = parse_seed_output(&content);
            debug!(
                "Seed \"{}\": {} packages, {} snaps",
                seed_name,
                packages.len(),
                snaps.len()
            );
            for package in packages {
                if !self.packages.contains(&package) {
                    self.packages.push(package);
                }
            }
            for snap in snaps {
                if !self.snaps.contains(&snap) {
                    self.snaps.push(snap);
                }
            }
        }

        info!(
            "Germinate expanded {} packages and {} snaps",
            self.packages.len(),
            self.snaps.len()
        );
        Ok(())
    }
}

/// Parse one germinate output file. Entry lines start with a lowercase
/// alphanumeric; the first column is the package name, with `snap:`
/// prefixed entries routed to the snap list.
pub fn parse_seed_output(content: &str) -> (Vec<String>, Vec<String>) {
    let mut packages = Vec::new();
    let mut snaps = Vec::new();
    for line in content.lines() {
        let Some(first) = line.chars().next() else {
            continue;
        };
        if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
            continue;
        }
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        match token.strip_prefix("snap:") {
            Some(snap_name) => snaps.push(snap_name.to_string()),
            None => packages.push(token.to_string()),
        }
    }
    (packages, snaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_SEED: &str = "\
Package                                        | Source       | Why
-----------------------------------------------+--------------+------------
python3                                        | python3-defaults | Rescued
sudo                                           | sudo         | server seed
cloud-init                                     | cloud-init   | server seed
ubuntu-server                                  | ubuntu-meta  | server seed
snap:lxd                                       | snap         | server seed
-----------------------------------------------+--------------+------------
";

    #[test]
    fn test_parse_seed_output_packages_and_snaps() {
        let (packages, snaps) = parse_seed_output(SERVER_SEED);
        for expected in ["python3", "sudo", "cloud-init", "ubuntu-server"] {
            assert!(
                packages.contains(&expected.to_string()),
                "expected package {} in {:?}",
                expected,
                packages
            );
        }
        assert_eq!(snaps, vec!["lxd"]);
    }

    #[test]
    fn test_parse_seed_output_skips_headers_and_rules() {
        let (packages, snaps) = parse_seed_output("Package | Why\n----+----\n\n");
        assert!(packages.is_empty());
        assert!(snaps.is_empty());
    }
}
