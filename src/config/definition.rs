// file: src/config/definition.rs
// version: 1.3.0
// guid: e9a04b16-7d2f-4c58-8a31-b6f50c9d27e4

//! Image definition structures
//!
//! The in-memory model of the declarative image definition YAML. Field
//! defaults live here as serde `default` functions so that parsing and
//! defaulting are a single, idempotent operation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_flavor() -> String {
    "ubuntu".to_string()
}

fn default_mirror() -> String {
    "http://archive.ubuntu.com/ubuntu/".to_string()
}

fn default_pocket() -> String {
    "release".to_string()
}

fn default_archive() -> String {
    "ubuntu".to_string()
}

fn default_components() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_mount_options() -> String {
    "defaults".to_string()
}

fn default_snap_channel() -> String {
    "stable".to_string()
}

/// Target architecture for the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
    Armhf,
    Ppc64el,
    Riscv64,
    S390x,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Amd64 => "amd64",
            Architecture::Arm64 => "arm64",
            Architecture::Armhf => "armhf",
            Architecture::Ppc64el => "ppc64el",
            Architecture::Riscv64 => "riscv64",
            Architecture::S390x => "s390x",
        }
    }

    pub fn from_str_loose(value: &str) -> Option<Self> {
        match value {
            "amd64" => Some(Architecture::Amd64),
            "arm64" => Some(Architecture::Arm64),
            "armhf" => Some(Architecture::Armhf),
            "ppc64el" => Some(Architecture::Ppc64el),
            "riscv64" => Some(Architecture::Riscv64),
            "s390x" => Some(Architecture::S390x),
            _ => None,
        }
    }
}

/// The class of image being built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageClass {
    Preinstalled,
    Cloud,
    Installer,
}

/// Root entity parsed from the image definition YAML document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
    pub architecture: String,
    pub series: String,
    pub class: ImageClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    pub gadget: GadgetSource,
    pub rootfs: Rootfs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customization: Option<Customization>,
}

impl ImageDefinition {
    /// Resolved architecture, or None when the definition (and the host
    /// fallback) produced something unknown.
    pub fn architecture(&self) -> Option<Architecture> {
        Architecture::from_str_loose(&self.architecture)
    }

    pub fn customization(&self) -> Option<&Customization> {
        self.customization.as_ref()
    }
}

/// Where the gadget tree comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GadgetSourceType {
    Git,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GadgetSource {
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: GadgetSourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Optional make target used when building the gadget tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Rootfs {
    #[serde(default = "default_flavor")]
    pub flavor: String,
    #[serde(default = "default_mirror")]
    pub mirror: String,
    #[serde(default = "default_pocket")]
    pub pocket: String,
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    #[serde(default = "default_archive")]
    pub archive: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<Seed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_tasks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<Tarball>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Seed {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub names: Vec<String>,
    #[serde(default)]
    pub vcs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Tarball {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256sum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Customization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_ppas: Vec<Ppa>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_snaps: Vec<Snap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<CloudInit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<Manual>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fstab: Vec<FstabEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Ppa {
    /// PPA identifier in `user/ppa` form
    pub name: String,
    /// `user:password` credentials for private PPAs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Ppa {
    pub fn split_name(&self) -> Option<(&str, &str)> {
        self.name.split_once('/')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Package {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Snap {
    pub name: String,
    #[serde(default = "default_snap_channel")]
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CloudInit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Manual {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copy_file: Vec<CopyFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub touch_file: Vec<TouchFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execute: Vec<Execute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_user: Vec<AddUser>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_group: Vec<AddGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CopyFile {
    /// Host path of the file to copy
    pub source: PathBuf,
    /// Absolute destination inside the chroot
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TouchFile {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Execute {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AddUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AddGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FstabEntry {
    pub label: String,
    pub mountpoint: String,
    pub filesystem_type: String,
    #[serde(default = "default_mount_options")]
    pub mount_options: String,
    #[serde(default)]
    pub dump: bool,
    #[serde(default)]
    pub fsck_order: u32,
}

impl FstabEntry {
    /// Render the entry as a single fstab line.
    pub fn render(&self) -> String {
        format!(
            "LABEL={}\t{}\t{}\t{}\t{}\t{}",
            self.label,
            self.mountpoint,
            self.filesystem_type,
            self.mount_options,
            if self.dump { 1 } else { 0 },
            self.fsck_order,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_definition_yaml() -> &'static str {
        r#"
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
    names:
      - server
      - minimal
"#
    }

    #[test]
    fn test_parse_minimal_definition_applies_defaults() {
        let def: ImageDefinition = serde_yaml::from_str(minimal_definition_yaml()).unwrap();
        assert_eq!(def.rootfs.flavor, "ubuntu");
        assert_eq!(def.rootfs.pocket, "release");
        assert_eq!(def.rootfs.archive, "ubuntu");
        assert_eq!(def.rootfs.mirror, "http://archive.ubuntu.com/ubuntu/");
        assert_eq!(def.rootfs.components, vec!["main"]);
        assert_eq!(def.architecture(), Some(Architecture::Amd64));
    }

    #[test]
    fn test_parse_then_reserialize_is_idempotent() {
        let def: ImageDefinition = serde_yaml::from_str(minimal_definition_yaml()).unwrap();
        let rendered = serde_yaml::to_string(&def).unwrap();
        let reparsed: ImageDefinition = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(def, reparsed);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        // no `name` key
        let yaml = r#"
architecture: amd64
series: jammy
class: preinstalled
gadget:
  url: https://example.com/gadget
  type: directory
rootfs:
  tarball:
    url: /tmp/rootfs.tar.gz
"#;
        let err = serde_yaml::from_str::<ImageDefinition>(yaml).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let yaml = format!("{}\nbogus-key: true\n", minimal_definition_yaml().trim());
        assert!(serde_yaml::from_str::<ImageDefinition>(&yaml).is_err());
    }

    #[test]
    fn test_invalid_class_is_rejected() {
        let yaml = minimal_definition_yaml().replace("preinstalled", "desktop");
        let err = serde_yaml::from_str::<ImageDefinition>(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_fstab_entry_render_dump_values() {
        let mut entry = FstabEntry {
            label: "writable".to_string(),
            mountpoint: "/".to_string(),
            filesystem_type: "ext4".to_string(),
            mount_options: "defaults".to_string(),
            dump: true,
            fsck_order: 1,
        };
        assert_eq!(entry.render(), "LABEL=writable\t/\text4\tdefaults\t1\t1");
        entry.dump = false;
        assert_eq!(entry.render(), "LABEL=writable\t/\text4\tdefaults\t0\t1");
    }

    #[test]
    fn test_fstab_mount_options_default() {
        let yaml = r#"
label: writable
mountpoint: /
filesystem-type: ext4
fsck-order: 1
"#;
        let entry: FstabEntry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entry.mount_options, "defaults");
        assert_eq!(entry.render(), "LABEL=writable\t/\text4\tdefaults\t0\t1");
    }

    #[test]
    fn test_snap_channel_default() {
        let snap: Snap = serde_yaml::from_str("name: lxd\n").unwrap();
        assert_eq!(snap.channel, "stable");
    }
}
