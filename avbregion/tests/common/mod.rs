/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::io::Cursor;

use avbregion::format::avb::{
    self, AlgorithmType, ChainPartitionDescriptor, Descriptor, Footer, HashDescriptor, Header,
    HeaderFlags, PropertyDescriptor,
};

pub fn hash_descriptor(name: &str, image_size: u64, digest_byte: u8) -> Descriptor {
    Descriptor::Hash(HashDescriptor {
        image_size,
        hash_algorithm: "sha256".to_owned(),
        partition_name: name.to_owned(),
        salt: vec![0x5a; 32],
        root_digest: vec![digest_byte; 32],
        flags: 0,
        reserved: [0u8; 60],
    })
}

pub fn chain_descriptor(name: &str, location: u32, public_key: &[u8]) -> Descriptor {
    Descriptor::ChainPartition(ChainPartitionDescriptor {
        rollback_index_location: location,
        partition_name: name.to_owned(),
        public_key: public_key.to_vec(),
        flags: 0,
        reserved: [0u8; 60],
    })
}

pub fn property(key: &str, value: &[u8]) -> Descriptor {
    Descriptor::Property(PropertyDescriptor {
        key: key.to_owned(),
        value: value.to_vec(),
    })
}

/// Fake AVB-encoded public key. The contents are never interpreted.
pub fn public_key(seed: u8) -> Vec<u8> {
    (0..520).map(|i| (i as u8).wrapping_mul(seed)).collect()
}

pub fn unsigned_header(descriptors: Vec<Descriptor>) -> Header {
    Header {
        required_libavb_version_major: avb::VERSION_MAJOR,
        required_libavb_version_minor: 0,
        algorithm_type: AlgorithmType::None,
        hash: vec![],
        signature: vec![],
        public_key: vec![],
        public_key_metadata: vec![],
        descriptors,
        rollback_index: 0,
        flags: HeaderFlags::empty(),
        rollback_index_location: 0,
        release_string: "avbtool 1.3.0".to_owned(),
        reserved: [0u8; 80],
    }
}

/// Header with placeholder authentication data. The signature is not valid,
/// but nothing in this crate verifies it.
pub fn signed_header(descriptors: Vec<Descriptor>, public_key: Vec<u8>) -> Header {
    Header {
        algorithm_type: AlgorithmType::Sha256Rsa4096,
        hash: vec![0x11; 32],
        signature: vec![0x22; 512],
        public_key,
        ..unsigned_header(descriptors)
    }
}

pub fn root_image(header: &Header, block_size: u64) -> Vec<u8> {
    let mut writer = Cursor::new(Vec::new());
    avb::write_root_image(&mut writer, header, block_size).unwrap();
    writer.into_inner()
}

/// Build an appended image with `data_size` bytes of partition data followed by
/// the vbmeta blob and footer, for a total of `image_size` bytes.
pub fn appended_image(header: &Header, data_size: u64, image_size: u64) -> Vec<u8> {
    let data = (0..data_size).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    let mut writer = Cursor::new(data);

    let mut footer = Footer {
        version_major: avb::FOOTER_VERSION_MAJOR,
        version_minor: avb::FOOTER_VERSION_MINOR,
        original_image_size: data_size,
        vbmeta_offset: 0,
        vbmeta_size: 0,
        reserved: [0u8; 28],
    };

    avb::write_appended_image(&mut writer, header, &mut footer, image_size).unwrap();

    let data = writer.into_inner();
    assert_eq!(data.len() as u64, image_size);
    data
}

/// Appended image for a partition, with a single hash descriptor.
pub fn partition_image(name: &str, header_template: Header) -> Vec<u8> {
    let header = Header {
        descriptors: vec![hash_descriptor(name, 8192, 0xcc)],
        ..header_template
    };

    appended_image(&header, 8192, 16384)
}
