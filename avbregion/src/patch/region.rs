// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Region marker replacement for raw partition payloads (eg. the vendor_boot
//! ramdisk). Every pattern slot has a ROW and a PRC variant of the same length,
//! so patching never changes the size of the image.

use std::{fmt, str::FromStr};

use memchr::memmem;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Pattern slot {slot:?}: ROW pattern is {row} bytes, but PRC pattern is {prc} bytes")]
    MismatchedLength { slot: String, row: usize, prc: usize },
    #[error("Pattern slot {0:?} has an empty pattern")]
    EmptyPattern(String),
    #[error("Unknown region: {0:?}")]
    UnknownRegion(String),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Region {
    /// Rest of world.
    Row,
    /// People's Republic of China.
    Prc,
}

impl Region {
    pub fn opposite(self) -> Self {
        match self {
            Self::Row => Self::Prc,
            Self::Prc => Self::Row,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Row => "row",
            Self::Prc => "prc",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("row") {
            Ok(Self::Row)
        } else if s.eq_ignore_ascii_case("prc") {
            Ok(Self::Prc)
        } else {
            Err(Error::UnknownRegion(s.to_owned()))
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionPattern {
    pub region: Region,
    pub bytes: Vec<u8>,
}

/// A semantic location in the image with one pattern per region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatternSlot {
    name: String,
    row: RegionPattern,
    prc: RegionPattern,
}

impl PatternSlot {
    pub fn new(name: impl Into<String>, row: Vec<u8>, prc: Vec<u8>) -> Result<Self> {
        let name = name.into();

        if row.is_empty() || prc.is_empty() {
            return Err(Error::EmptyPattern(name));
        } else if row.len() != prc.len() {
            return Err(Error::MismatchedLength {
                slot: name,
                row: row.len(),
                prc: prc.len(),
            });
        }

        Ok(Self {
            name,
            row: RegionPattern {
                region: Region::Row,
                bytes: row,
            },
            prc: RegionPattern {
                region: Region::Prc,
                bytes: prc,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self, region: Region) -> &RegionPattern {
        match region {
            Region::Row => &self.row,
            Region::Prc => &self.prc,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PatternSet {
    slots: Vec<PatternSlot>,
}

impl PatternSet {
    pub fn new(slots: impl IntoIterator<Item = PatternSlot>) -> Self {
        Self {
            slots: slots.into_iter().collect(),
        }
    }

    pub fn slots(&self) -> &[PatternSlot] {
        &self.slots
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchStatus {
    Patched,
    Unchanged,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotReport {
    pub name: String,
    pub count: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionPatch {
    pub data: Vec<u8>,
    pub status: PatchStatus,
    /// Total number of replacements across all slots.
    pub count: usize,
    pub slots: Vec<SlotReport>,
}

impl RegionPatch {
    pub fn changed(&self) -> bool {
        self.status == PatchStatus::Patched
    }
}

/// Find the offsets of all non-overlapping occurrences of `needle`.
pub(crate) fn find_all(data: &[u8], needle: &[u8]) -> Vec<usize> {
    memmem::find_iter(data, needle).collect()
}

/// Count the occurrences of each region's markers without modifying anything.
pub fn count_markers(data: &[u8], patterns: &PatternSet, region: Region) -> usize {
    patterns
        .slots
        .par_iter()
        .map(|s| find_all(data, &s.pattern(region).bytes).len())
        .sum()
}

/// Replace every marker of the opposite region with the `target` region's
/// marker. All slots are scanned against the input before anything is
/// replaced.
pub fn patch_region(data: &[u8], patterns: &PatternSet, target: Region) -> RegionPatch {
    let source = target.opposite();

    let matches = patterns
        .slots
        .par_iter()
        .map(|s| find_all(data, &s.pattern(source).bytes))
        .collect::<Vec<_>>();

    let mut output = data.to_vec();
    let mut reports = Vec::with_capacity(patterns.slots.len());

    for (slot, offsets) in patterns.slots.iter().zip(matches) {
        let replacement = &slot.pattern(target).bytes;

        for offset in &offsets {
            trace!("Replacing {source} marker {:?} at offset {offset}", slot.name);
            output[*offset..][..replacement.len()].copy_from_slice(replacement);
        }

        debug!(
            "Slot {:?}: {} {source} -> {target} replacements",
            slot.name,
            offsets.len(),
        );

        reports.push(SlotReport {
            name: slot.name.clone(),
            count: offsets.len(),
        });
    }

    let count = reports.iter().map(|r| r.count).sum();

    RegionPatch {
        data: output,
        status: if count > 0 {
            PatchStatus::Patched
        } else {
            PatchStatus::Unchanged
        },
        count,
        slots: reports,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn slot_validation() {
        assert_matches!(
            PatternSlot::new("dot", b".ROW".to_vec(), b".PR".to_vec()),
            Err(Error::MismatchedLength { row: 4, prc: 3, .. })
        );
        assert_matches!(
            PatternSlot::new("dot", vec![], vec![]),
            Err(Error::EmptyPattern(_))
        );
    }

    #[test]
    fn parse_region() {
        assert_eq!("ROW".parse::<Region>().unwrap(), Region::Row);
        assert_eq!("prc".parse::<Region>().unwrap(), Region::Prc);
        assert_matches!("eu".parse::<Region>(), Err(Error::UnknownRegion(_)));
    }
}
