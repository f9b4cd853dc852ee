// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::format::avb::{self, AlgorithmType, PropertyDescriptor};

/// The parts of an image's AVB metadata needed to reproduce its footer after
/// the partition data has been modified.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct AvbInfo {
    pub algorithm: AlgorithmType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_name: Option<String>,
    pub rollback_index: u64,
    pub rollback_index_location: u32,
    /// Hex-encoded salt of the hash or hash tree descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<String>,
    /// Total size of the image, including the footer.
    pub partition_size: u64,
    /// Size of the partition data preceding the vbmeta blob. Only present for
    /// appended images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    /// SHA-1 digest of the embedded public key. Not present for unsigned
    /// images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_digest: Option<String>,
    pub release_string: String,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(skip)]
    pub vbmeta: Vec<u8>,
}

impl AvbInfo {
    pub fn property(&self, key: &str) -> Option<&[u8]> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_slice())
    }

    /// Size to pass to avbtool's `--partition_size`. Falls back to the data
    /// size if the total size is unknown.
    pub fn footer_partition_size(&self) -> u64 {
        if self.partition_size != 0 {
            self.partition_size
        } else {
            self.data_size.unwrap_or_default()
        }
    }
}

/// Extract [`AvbInfo`] from an appended image or a standalone vbmeta image.
pub fn extract_info(data: &[u8]) -> Result<AvbInfo, avb::Error> {
    let image = avb::load_image(data)?;
    let header = &image.header;

    // Only appended images describe a single partition.
    let appended = if image.footer.is_some() {
        header.appended_descriptor().ok()
    } else {
        None
    };

    let vbmeta_start = image.vbmeta_offset as usize;
    let vbmeta = data[vbmeta_start..][..image.vbmeta_size as usize].to_vec();

    Ok(AvbInfo {
        algorithm: header.algorithm_type,
        partition_name: appended.map(|d| d.partition_name().to_owned()),
        rollback_index: header.rollback_index,
        rollback_index_location: header.rollback_index_location,
        salt: appended.map(|d| hex::encode(d.salt())),
        hash_algorithm: appended.map(|d| d.hash_algorithm().to_owned()),
        partition_size: image.image_size,
        data_size: image.footer.as_ref().map(|f| f.original_image_size),
        flags: Some(header.flags.bits()).filter(|f| *f != 0),
        public_key_digest: Some(&header.public_key)
            .filter(|k| !k.is_empty())
            .map(|k| avb::public_key_digest(k)),
        release_string: header.release_string.clone(),
        properties: header.properties().cloned().collect(),
        vbmeta,
    })
}
