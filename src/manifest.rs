//! # OCI Manifest Model for VM Images
//!
//! Data model for the OCI documents this engine consumes: the image
//! manifest, its layers, and the locally written metadata record.
//!
//! ## Identity
//!
//! An image's identity is the manifest's own server-reported digest, never
//! a recomputed hash. The digest is made filesystem-safe by replacing `:`
//! with `_` (the **manifest id**), and that id names the cache directory.
//!
//! ## Layer Roles
//!
//! A VM image carries at most four kinds of layers, routed by media type:
//!
//! | Media type | Role |
//! |---|---|
//! | `application/vnd.oci.empty.v1+json` | Skipped. |
//! | `application/vnd.oci.image.layer.v1.tar` | Whole disk image. |
//! | `application/vnd.oci.image.config.v1+json` | VM config blob. |
//! | `application/octet-stream` | NVRAM blob. |
//! | `…part.number=N;part.total=T…` | Disk part N of T. |
//!
//! Anything else is ignored.

use crate::constants::{
    DISK_IMAGE_FILE, DISK_IMAGE_MEDIA_TYPE, DISK_PART_PATTERN, NVRAM_FILE, NVRAM_MEDIA_TYPE,
    OCI_EMPTY_MEDIA_TYPE, SHORT_ID_LEN, VM_CONFIG_FILE, VM_CONFIG_MEDIA_TYPE,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One entry in a manifest's layer list.
///
/// Equality is structural over all three fields; two layers with the same
/// digest but different media types are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    /// Layer media type.
    pub media_type: String,
    /// Content digest, including the algorithm prefix (`sha256:<hex>`).
    pub digest: String,
    /// Blob size in bytes.
    pub size: u64,
}

/// OCI image manifest as served by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: String,
    /// Ordered layer list; order is meaningful for split disks.
    pub layers: Vec<Layer>,
    /// Optional config descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Layer>,
}

/// Locally written record describing one cached manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    /// Repository name without tag (e.g. `macos-sequoia-vanilla`).
    pub image: String,
    /// Filesystem-safe manifest digest naming the cache directory.
    pub manifest_id: String,
    /// When this cache entry was created.
    pub timestamp: DateTime<Utc>,
}

/// One cached image as reported by the image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    /// Repository name from the metadata record.
    pub repository: String,
    /// First 12 hex characters of the manifest digest.
    pub image_id: String,
    /// Full manifest id (cache directory name).
    pub manifest_id: String,
}

/// How the download scheduler treats one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// Empty placeholder; never fetched.
    Skip,
    /// One numbered part of a split disk image.
    DiskPart { number: u64, total: u64 },
    /// Whole disk image (single-file variant).
    Disk,
    /// VM configuration blob.
    Config,
    /// NVRAM blob.
    Nvram,
    /// Unrecognized media type; ignored.
    Ignored,
}

impl LayerRole {
    /// Staging output file name for whole-file roles.
    ///
    /// Disk parts stage under their digest name instead, since several
    /// parts feed one output file.
    pub fn file_name(&self) -> Option<&'static str> {
        match self {
            LayerRole::Disk => Some(DISK_IMAGE_FILE),
            LayerRole::Config => Some(VM_CONFIG_FILE),
            LayerRole::Nvram => Some(NVRAM_FILE),
            _ => None,
        }
    }
}

impl Layer {
    /// Classifies this layer by media type.
    pub fn role(&self) -> LayerRole {
        if self.media_type == OCI_EMPTY_MEDIA_TYPE {
            return LayerRole::Skip;
        }
        if let Some(caps) = disk_part_regex().captures(&self.media_type) {
            // The pattern guarantees both groups are decimal digits; values
            // too large for u64 fall through to Ignored.
            if let (Ok(number), Ok(total)) = (caps[1].parse(), caps[2].parse()) {
                return LayerRole::DiskPart { number, total };
            }
            return LayerRole::Ignored;
        }
        match self.media_type.as_str() {
            DISK_IMAGE_MEDIA_TYPE => LayerRole::Disk,
            VM_CONFIG_MEDIA_TYPE => LayerRole::Config,
            NVRAM_MEDIA_TYPE => LayerRole::Nvram,
            _ => LayerRole::Ignored,
        }
    }

    /// Filesystem-safe file name for this layer's cached blob.
    pub fn cache_file_name(&self) -> String {
        self.digest.replace(':', "_")
    }
}

fn disk_part_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DISK_PART_PATTERN).expect("disk part pattern is valid"))
}

/// Converts a manifest digest into its filesystem-safe manifest id.
pub fn manifest_id(digest: &str) -> String {
    digest.replace(':', "_")
}

/// Derives the short image id (first 12 hex chars of the manifest digest).
pub fn short_image_id(manifest_id: &str) -> String {
    let hex = manifest_id
        .split_once('_')
        .map(|(_, hex)| hex)
        .unwrap_or(manifest_id);
    hex.chars().take(SHORT_ID_LEN).collect()
}
