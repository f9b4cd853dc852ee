/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

mod common;

use assert_matches::assert_matches;

use avbregion::{
    format::avb::{self, Header},
    patch::rollback::{self, RollbackComparison, RollbackStatus},
};

fn appended_with_index(index: u64, signed: bool) -> Vec<u8> {
    let template = if signed {
        common::signed_header(vec![], common::public_key(3))
    } else {
        common::unsigned_header(vec![])
    };

    common::partition_image(
        "vendor_boot",
        Header {
            rollback_index: index,
            ..template
        },
    )
}

fn vbmeta_with_index(index: u64) -> Vec<u8> {
    let header = Header {
        rollback_index: index,
        ..common::unsigned_header(vec![common::hash_descriptor("boot", 4096, 1)])
    };

    common::root_image(&header, 4096)
}

#[test]
fn same_index_is_identity() {
    let data = appended_with_index(5, true);

    let patch = rollback::patch_rollback(&data, 5).unwrap();
    assert_eq!(patch.data, data);
    assert_eq!(patch.previous, 5);
    assert!(!patch.changed);
    assert!(!patch.signature_stale);
}

#[test]
fn only_rollback_field_changes() {
    let data = appended_with_index(5, false);
    let vbmeta_offset = avb::read_footer(&data).unwrap().vbmeta_offset as usize;

    let patch = rollback::patch_rollback(&data, 0x0102_0304_0506_0708).unwrap();
    assert!(patch.changed);
    assert!(!patch.signature_stale);
    assert_eq!(patch.data.len(), data.len());

    let field = vbmeta_offset + Header::ROLLBACK_INDEX_OFFSET..vbmeta_offset + 120;
    for (i, (a, b)) in data.iter().zip(&patch.data).enumerate() {
        if !field.contains(&i) {
            assert_eq!(a, b, "Byte {i} changed");
        }
    }
    assert_eq!(&patch.data[field], b"\x01\x02\x03\x04\x05\x06\x07\x08");

    assert_eq!(
        rollback::rollback_index(&patch.data).unwrap(),
        0x0102_0304_0506_0708,
    );
}

#[test]
fn signed_image_becomes_stale() {
    let data = appended_with_index(1, true);

    let patch = rollback::patch_rollback(&data, 2).unwrap();
    assert!(patch.changed);
    assert!(patch.signature_stale);

    // The signature is not touched.
    let (_, old) = avb::parse_footer(&data).unwrap();
    let (_, new) = avb::parse_footer(&patch.data).unwrap();
    assert_eq!(new.signature, old.signature);
    assert_eq!(new.rollback_index, 2);
}

#[test]
fn standalone_vbmeta() {
    let data = vbmeta_with_index(3);

    let patch = rollback::patch_rollback(&data, 4).unwrap();
    assert_eq!(patch.previous, 3);
    assert_eq!(
        &patch.data[Header::ROLLBACK_INDEX_OFFSET..][..8],
        &4u64.to_be_bytes(),
    );
    assert_eq!(rollback::rollback_index(&patch.data).unwrap(), 4);
}

#[test]
fn not_an_avb_image() {
    assert_matches!(
        rollback::patch_rollback(&[0u8; 4096], 1),
        Err(rollback::Error::Avb(avb::Error::InvalidHeaderMagic(_)))
    );
}

#[test]
fn compare_indexes() {
    let current = appended_with_index(10, false);

    assert_eq!(
        rollback::compare_rollback(&current, &vbmeta_with_index(10)).unwrap(),
        RollbackComparison {
            current: 10,
            new: 10,
            status: RollbackStatus::Match,
            required: 10,
        },
    );
    assert_eq!(
        rollback::compare_rollback(&current, &vbmeta_with_index(12)).unwrap(),
        RollbackComparison {
            current: 10,
            new: 12,
            status: RollbackStatus::Upgrade,
            required: 12,
        },
    );
    assert_eq!(
        rollback::compare_rollback(&current, &vbmeta_with_index(3)).unwrap(),
        RollbackComparison {
            current: 10,
            new: 3,
            status: RollbackStatus::Downgrade,
            required: 10,
        },
    );
}
