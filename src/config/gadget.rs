// file: src/config/gadget.rs
// version: 1.4.0
// guid: c6e92f40-3a8d-45b1-97c5-82d4f1a06b9e

//! Gadget metadata model
//!
//! Boundary module for `meta/gadget.yaml`: volumes keyed by name, each a
//! partition schema, bootloader, and an ordered list of structures. Sizes
//! and offsets accept integers, hex strings, and `M`/`G` suffixed values.
//! After parsing, [`GadgetInfo::from_yaml`] lays out unset offsets and
//! sorts structures, so downstream code can rely on every structure having
//! a concrete offset.

use crate::error::{ImageBuildError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MIB: u64 = 1024 * 1024;

/// Parsed gadget metadata: a mapping from volume name to volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GadgetInfo {
    pub volumes: BTreeMap<String, Volume>,
}

impl GadgetInfo {
    /// Parse gadget.yaml content and lay out all volumes.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut info: GadgetInfo = serde_yaml::from_str(content)
            .map_err(|e| ImageBuildError::SchemaError(format!("gadget.yaml: {}", e)))?;

        if info.volumes.is_empty() {
            return Err(ImageBuildError::SchemaError(
                "gadget.yaml: no volumes defined".to_string(),
            ));
        }

        for (name, volume) in info.volumes.iter_mut() {
            volume.layout(name)?;
        }
        Ok(info)
    }

    /// A seeded image carries a system-seed structure; its system
    /// partitions are created at first boot rather than at build time.
    pub fn is_seeded(&self) -> bool {
        self.volumes.values().any(|volume| {
            volume
                .structure
                .iter()
                .any(|s| s.role == Some(StructureRole::SystemSeed))
        })
    }

    /// Sum of all structure sizes across all volumes.
    pub fn total_structure_size(&self) -> u64 {
        self.volumes
            .values()
            .flat_map(|volume| volume.structure.iter())
            .map(|structure| structure.size)
            .sum()
    }

    /// The volume holding the system-data structure, if any.
    pub fn rootfs_volume(&self) -> Option<&str> {
        self.volumes
            .iter()
            .find(|(_, volume)| {
                volume
                    .structure
                    .iter()
                    .any(|s| s.role == Some(StructureRole::SystemData))
            })
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionSchema {
    Gpt,
    Mbr,
}

impl Default for PartitionSchema {
    fn default() -> Self {
        PartitionSchema::Gpt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bootloader {
    Grub,
    UBoot,
    Piboot,
    Lk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Volume {
    #[serde(default)]
    pub schema: PartitionSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<Bootloader>,
    pub structure: Vec<VolumeStructure>,
}

impl Volume {
    /// Resolve unset offsets and order structures by offset.
    ///
    /// A structure with `role: mbr` sits at offset 0; any other structure
    /// without an explicit offset is placed at the running cursor, but
    /// never below 1MiB.
    fn layout(&mut self, volume_name: &str) -> Result<()> {
        if self.structure.is_empty() {
            return Err(ImageBuildError::SchemaError(format!(
                "gadget.yaml: volume \"{}\" has no structures",
                volume_name
            )));
        }

        let mut cursor: u64 = 0;
        for structure in self.structure.iter_mut() {
            // legacy form: `type: mbr` implies the mbr role
            if structure.type_field == "mbr" && structure.role.is_none() {
                structure.role = Some(StructureRole::Mbr);
            }
            let offset = match structure.offset {
                Some(offset) => offset,
                None => {
                    if structure.role == Some(StructureRole::Mbr) {
                        0
                    } else {
                        cursor.max(MIB)
                    }
                }
            };
            structure.offset = Some(offset);
            cursor = offset + structure.size;
        }

        self.structure
            .sort_by_key(|structure| structure.offset.unwrap_or(0));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureRole {
    Mbr,
    SystemBoot,
    SystemData,
    SystemSeed,
    SystemSave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VolumeStructure {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_label: Option<String>,
    #[serde(
        default,
        deserialize_with = "quantity::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_write: Option<OffsetWrite>,
    #[serde(deserialize_with = "quantity::deserialize")]
    pub size: u64,
    #[serde(rename = "type")]
    pub type_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StructureRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filesystem: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Content>,
}

impl VolumeStructure {
    pub fn label(&self) -> &str {
        self.filesystem_label.as_deref().unwrap_or("")
    }

    pub fn start_offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }

    /// Whether a seeded build leaves this structure out of processing:
    /// system partitions of a seeded image are created at first boot.
    pub fn is_skipped(&self, is_seeded: bool) -> bool {
        if !is_seeded {
            return false;
        }
        matches!(
            self.role,
            Some(StructureRole::SystemBoot)
                | Some(StructureRole::SystemData)
                | Some(StructureRole::SystemSave)
                | Some(StructureRole::SystemSeed)
        ) || self.label() == "system-boot"
    }

    /// Whether this structure is represented in the partition table at all.
    pub fn in_partition_table(&self, is_seeded: bool) -> bool {
        self.role != Some(StructureRole::Mbr)
            && self.type_field != "bare"
            && self.type_field != "mbr"
            && !self.is_skipped(is_seeded)
    }

    /// Pick the partition type for the given schema, splitting hybrid
    /// `mbrtype,gptguid` declarations.
    pub fn type_for_schema(&self, schema: PartitionSchema) -> &str {
        match self.type_field.split_once(',') {
            Some((mbr_type, gpt_type)) => match schema {
                PartitionSchema::Mbr => mbr_type,
                PartitionSchema::Gpt => gpt_type,
            },
            None => &self.type_field,
        }
    }

    pub fn is_bootable(&self) -> bool {
        self.role == Some(StructureRole::SystemBoot) || self.label() == "system-boot"
    }

    /// GPT partition name; an anonymous system-data structure becomes
    /// "writable".
    pub fn partition_name(&self) -> &str {
        if self.role == Some(StructureRole::SystemData) && self.name.is_empty() {
            "writable"
        } else {
            &self.name
        }
    }
}

/// A content entry: either a raw `image` blob with optional offset/size,
/// or a `source` tree copied to `target` inside the filesystem.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        deserialize_with = "quantity::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub offset: Option<u64>,
    #[serde(
        default,
        deserialize_with = "quantity::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<u64>,
}

/// An instruction to write the structure's start sector as a little-endian
/// u32 at a byte offset in the finished disk, optionally relative to a
/// named structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "RawOffsetWrite")]
pub struct OffsetWrite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to: Option<String>,
    pub offset: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOffsetWrite {
    Shorthand(String),
    Number(u64),
    Full {
        #[serde(rename = "relative-to", default)]
        relative_to: Option<String>,
        offset: u64,
    },
}

impl TryFrom<RawOffsetWrite> for OffsetWrite {
    type Error = String;

    fn try_from(raw: RawOffsetWrite) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawOffsetWrite::Number(offset) => Ok(OffsetWrite {
                relative_to: None,
                offset,
            }),
            RawOffsetWrite::Full {
                relative_to,
                offset,
            } => Ok(OffsetWrite {
                relative_to,
                offset,
            }),
            RawOffsetWrite::Shorthand(s) => match s.split_once('+') {
                Some((name, offset)) => Ok(OffsetWrite {
                    relative_to: Some(name.to_string()),
                    offset: quantity::parse(offset.trim())
                        .map_err(|e| format!("invalid offset-write \"{}\": {}", s, e))?,
                }),
                None => Ok(OffsetWrite {
                    relative_to: None,
                    offset: quantity::parse(s.trim())
                        .map_err(|e| format!("invalid offset-write \"{}\": {}", s, e))?,
                }),
            },
        }
    }
}

/// Byte quantities in gadget.yaml: plain integers, hex (`0x2000`), or
/// `M`/`G` suffixed decimal values.
pub mod quantity {
    use serde::{Deserialize, Deserializer};

    pub fn parse(value: &str) -> Result<u64, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("empty quantity".to_string());
        }
        if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16).map_err(|e| e.to_string());
        }
        let (digits, multiplier) = match value.as_bytes()[value.len() - 1] {
            b'M' => (&value[..value.len() - 1], 1024 * 1024),
            b'G' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
            _ => (value, 1),
        };
        digits
            .parse::<u64>()
            .map(|n| n * multiplier)
            .map_err(|e| e.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawQuantity {
        Number(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawQuantity::deserialize(deserializer)? {
            RawQuantity::Number(n) => Ok(n),
            RawQuantity::Text(s) => parse(&s).map_err(serde::de::Error::custom),
        }
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<RawQuantity> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(RawQuantity::Number(n)) => Ok(Some(n)),
            Some(RawQuantity::Text(s)) => {
                parse(&s).map(Some).map_err(serde::de::Error::custom)
            }
        }
    }
}
