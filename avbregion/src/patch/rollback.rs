// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::cmp::Ordering;

use thiserror::Error;
use tracing::debug;

use crate::format::avb::{self, Header};

#[derive(Debug, Error)]
pub enum Error {
    #[error("AVB error")]
    Avb(#[from] avb::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RollbackPatch {
    pub data: Vec<u8>,
    pub previous: u64,
    pub changed: bool,
    /// The image is signed and its signature no longer covers the new header.
    pub signature_stale: bool,
}

/// Get the rollback index of an appended image or a vbmeta image.
pub fn rollback_index(data: &[u8]) -> Result<u64> {
    Ok(avb::load_image(data)?.header.rollback_index)
}

/// Rewrite the rollback index field of the vbmeta header in place. No other
/// byte is modified. The header is found via the footer or, for vbmeta images,
/// at offset 0.
pub fn patch_rollback(data: &[u8], index: u64) -> Result<RollbackPatch> {
    let image = avb::load_image(data)?;
    let previous = image.header.rollback_index;

    if previous == index {
        debug!("Rollback index is already {index}");

        return Ok(RollbackPatch {
            data: data.to_vec(),
            previous,
            changed: false,
            signature_stale: false,
        });
    }

    // The header was decoded from this range, so the field is in bounds.
    let offset = image.vbmeta_offset as usize + Header::ROLLBACK_INDEX_OFFSET;
    let mut output = data.to_vec();
    output[offset..][..8].copy_from_slice(&index.to_be_bytes());

    debug!("Rollback index at offset {offset}: {previous} -> {index}");

    Ok(RollbackPatch {
        data: output,
        previous,
        changed: true,
        signature_stale: image.header.algorithm_type.is_signed(),
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RollbackStatus {
    Match,
    /// The new image has a higher index than the current one.
    Upgrade,
    /// The new image would trip anti-rollback protection.
    Downgrade,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RollbackComparison {
    pub current: u64,
    pub new: u64,
    pub status: RollbackStatus,
    /// Index the new image must carry to boot on the current device.
    pub required: u64,
}

/// Compare the rollback index of the image currently on the device against the
/// new firmware's image.
pub fn compare_rollback(current: &[u8], new: &[u8]) -> Result<RollbackComparison> {
    let current = rollback_index(current)?;
    let new = rollback_index(new)?;

    let status = match new.cmp(&current) {
        Ordering::Equal => RollbackStatus::Match,
        Ordering::Greater => RollbackStatus::Upgrade,
        Ordering::Less => RollbackStatus::Downgrade,
    };

    Ok(RollbackComparison {
        current,
        new,
        status,
        required: current.max(new),
    })
}
