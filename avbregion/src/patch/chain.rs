// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Recomposition of a top-level vbmeta image after some of the partitions it
//! describes have been re-signed or re-footered.

use std::{
    collections::HashSet,
    fs,
    io::{self, Cursor},
};

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    format::avb::{
        self, AlgorithmType, AppendedDescriptorRef, ChainPartitionDescriptor, Descriptor, Header,
    },
    signer::{self, KeySet, Signer, VbmetaRequest},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("No rollback index location for chained partition: {0:?}")]
    MissingRollbackLocation(String),
    #[error("Image for partition {0:?} has no embedded public key")]
    KeyExtraction(String),
    #[error("Partition {0:?} is specified more than once")]
    DuplicateTarget(String),
    #[error("Original vbmeta is signed, but no signer is available")]
    SignerRequired,
    #[error("No signing key known for public key digest {0}")]
    UnknownSigningKey(String),
    #[error("Signed vbmeta from signer has unexpected {0:?} field")]
    SignerOutputMismatch(&'static str),
    #[error("Failed to load target image #{index}")]
    Target {
        index: usize,
        #[source]
        source: avb::Error,
    },
    #[error("AVB error")]
    Avb(#[from] avb::Error),
    #[error("Signer error")]
    Signer(#[from] signer::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetKind {
    /// Trust is delegated to the key embedded in the target's own footer.
    Chained {
        /// Used when the original vbmeta has no chain descriptor for the
        /// partition.
        rollback_index_location: Option<u32>,
    },
    /// The target's hash or hash tree descriptor is copied into the vbmeta.
    Hash,
}

#[derive(Clone, Copy, Debug)]
pub struct Target<'a> {
    pub data: &'a [u8],
    pub kind: TargetKind,
}

impl<'a> Target<'a> {
    pub fn chained(data: &'a [u8], rollback_index_location: Option<u32>) -> Self {
        Self {
            data,
            kind: TargetKind::Chained {
                rollback_index_location,
            },
        }
    }

    pub fn hash(data: &'a [u8]) -> Self {
        Self {
            data,
            kind: TargetKind::Hash,
        }
    }
}

/// Descriptor to merge into the vbmeta, derived from one target.
#[derive(Debug)]
enum Replacement {
    Chain {
        descriptor: ChainPartitionDescriptor,
        fallback_location: Option<u32>,
    },
    Hash(Descriptor),
}

impl Replacement {
    fn partition_name(&self) -> &str {
        match self {
            Self::Chain { descriptor, .. } => &descriptor.partition_name,
            Self::Hash(d) => d.partition_name().unwrap_or_default(),
        }
    }
}

fn load_target(index: usize, target: &Target) -> Result<Replacement> {
    let target_error = |e| Error::Target { index, source: e };

    let (_, header) = avb::parse_footer(target.data).map_err(target_error)?;
    let appended = header.appended_descriptor().map_err(target_error)?;
    let name = appended.partition_name().to_owned();

    match target.kind {
        TargetKind::Chained {
            rollback_index_location,
        } => {
            if header.public_key.is_empty() {
                return Err(Error::KeyExtraction(name));
            }

            debug!(
                "Partition {name:?} is signed by key {}",
                avb::public_key_digest(&header.public_key),
            );

            // Location 0 belongs to the top-level vbmeta itself.
            let fallback_location = rollback_index_location
                .or(Some(header.rollback_index_location).filter(|l| *l != 0));

            Ok(Replacement::Chain {
                descriptor: ChainPartitionDescriptor {
                    rollback_index_location: 0,
                    partition_name: name,
                    public_key: header.public_key.clone(),
                    flags: 0,
                    reserved: [0u8; 60],
                },
                fallback_location,
            })
        }
        TargetKind::Hash => {
            let descriptor = match appended {
                AppendedDescriptorRef::Hash(d) => Descriptor::Hash(d.clone()),
                AppendedDescriptorRef::HashTree(d) => Descriptor::HashTree(d.clone()),
            };

            Ok(Replacement::Hash(descriptor))
        }
    }
}

fn is_digest_descriptor(descriptor: &Descriptor, name: &str) -> bool {
    matches!(descriptor, Descriptor::Hash(_) | Descriptor::HashTree(_))
        && descriptor.partition_name() == Some(name)
}

fn is_chain_descriptor(descriptor: &Descriptor, name: &str) -> bool {
    matches!(descriptor, Descriptor::ChainPartition(_)) && descriptor.partition_name() == Some(name)
}

/// Merge a replacement into the descriptor list. Existing descriptors for the
/// same partition are replaced in place. Otherwise, the descriptor is appended.
fn merge(descriptors: &mut Vec<Descriptor>, replacement: Replacement) -> Result<()> {
    match replacement {
        Replacement::Chain {
            mut descriptor,
            fallback_location,
        } => {
            let existing = descriptors.iter_mut().find_map(|d| match d {
                Descriptor::ChainPartition(c) if c.partition_name == descriptor.partition_name => {
                    Some(c)
                }
                _ => None,
            });

            if let Some(c) = existing {
                debug!(
                    "Replacing chain descriptor for {:?} at location {}",
                    c.partition_name, c.rollback_index_location,
                );

                // The rollback index location and flags stay with the slot.
                c.public_key = descriptor.public_key;
                return Ok(());
            }

            let name = descriptor.partition_name.clone();

            descriptor.rollback_index_location =
                fallback_location.ok_or_else(|| Error::MissingRollbackLocation(name.clone()))?;

            if descriptors.iter().any(|d| is_digest_descriptor(d, &name)) {
                warn!("Partition {name:?} is both chained and covered by a hash descriptor");
            }

            debug!(
                "Appending chain descriptor for {name:?} at location {}",
                descriptor.rollback_index_location,
            );
            descriptors.push(Descriptor::ChainPartition(descriptor));
        }
        Replacement::Hash(descriptor) => {
            let name = descriptor.partition_name().unwrap_or_default().to_owned();

            if descriptors.iter().any(|d| is_chain_descriptor(d, &name)) {
                warn!("Partition {name:?} is both chained and covered by a hash descriptor");
            }

            if let Some(slot) = descriptors
                .iter_mut()
                .find(|d| is_digest_descriptor(d, &name))
            {
                debug!("Replacing {} descriptor for {name:?}", slot.type_name());
                *slot = descriptor;
            } else {
                debug!("Appending {} descriptor for {name:?}", descriptor.type_name());
                descriptors.push(descriptor);
            }
        }
    }

    Ok(())
}

/// Block size convention of a vbmeta image. Partition dumps are padded to
/// 4096 bytes. Bare avbtool output is only aligned to 64 bytes.
pub fn block_size(data: &[u8]) -> u64 {
    if data.len() % 4096 == 0 { 4096 } else { 64 }
}

/// Rebuild the top-level vbmeta image `original` so that it authenticates the
/// specified targets. Descriptors unrelated to the targets are preserved as-is
/// and in the same order.
///
/// If `original` is signed, the private key is looked up in `keys` by the
/// digest of the original public key and the recomposed image is signed by
/// `signer`.
pub fn rebuild_vbmeta(
    original: &[u8],
    targets: &[Target],
    keys: &KeySet,
    signer: Option<&dyn Signer>,
) -> Result<Vec<u8>> {
    let image = avb::load_image(original)?;
    if image.footer.is_some() {
        warn!("Original vbmeta has a footer; output will be a standalone vbmeta image");
    }
    let mut header = image.header;

    let replacements = targets
        .par_iter()
        .enumerate()
        .map(|(i, t)| load_target(i, t))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    for r in &replacements {
        if !seen.insert(r.partition_name()) {
            return Err(Error::DuplicateTarget(r.partition_name().to_owned()));
        }
    }

    for r in replacements {
        merge(&mut header.descriptors, r)?;
    }

    let block_size = block_size(original);

    if !header.algorithm_type.is_signed() {
        let mut writer = Cursor::new(Vec::new());
        avb::write_root_image(&mut writer, &header, block_size)?;
        return Ok(writer.into_inner());
    }

    sign_vbmeta(&header, block_size, keys, signer)
}

fn sign_vbmeta(
    header: &Header,
    block_size: u64,
    keys: &KeySet,
    signer: Option<&dyn Signer>,
) -> Result<Vec<u8>> {
    let signer = signer.ok_or(Error::SignerRequired)?;
    let digest = avb::public_key_digest(&header.public_key);
    let key = keys
        .get(&digest)
        .ok_or_else(|| Error::UnknownSigningKey(digest.clone()))?;

    debug!("Signing vbmeta with {key:?} ({digest})");

    let mut unsigned = header.clone();
    unsigned.algorithm_type = AlgorithmType::None;
    unsigned.clear_sig();

    let mut descriptors_file = NamedTempFile::new()?;
    avb::write_root_image(&mut descriptors_file, &unsigned, 64)?;

    let output_file = NamedTempFile::new()?;

    signer.make_vbmeta_image(&VbmetaRequest {
        descriptors_image: descriptors_file.path().to_owned(),
        output: output_file.path().to_owned(),
        algorithm: header.algorithm_type,
        key: key.to_owned(),
        rollback_index: header.rollback_index,
        rollback_index_location: header.rollback_index_location,
        flags: header.flags.bits(),
        padding_size: block_size,
    })?;

    let data = fs::read(output_file.path())?;
    let signed = avb::load_image(&data)?.header;

    check_signed(header, &signed)?;

    Ok(data)
}

/// Ensure that the signer kept everything the recomposed header specifies.
fn check_signed(expected: &Header, signed: &Header) -> Result<()> {
    let mismatch = if signed.descriptors != expected.descriptors {
        Some("descriptors")
    } else if signed.algorithm_type != expected.algorithm_type {
        Some("algorithm_type")
    } else if signed.rollback_index != expected.rollback_index {
        Some("rollback_index")
    } else if signed.rollback_index_location != expected.rollback_index_location {
        Some("rollback_index_location")
    } else if signed.flags != expected.flags {
        Some("flags")
    } else {
        None
    };

    match mismatch {
        Some(field) => Err(Error::SignerOutputMismatch(field)),
        None => Ok(()),
    }
}
