/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

mod common;

use std::io::Cursor;

use assert_matches::assert_matches;

use avbregion::{
    format::avb::{self, AlgorithmType, Descriptor, Footer, Header, KernelCmdlineDescriptor},
    info,
    stream::{FromReader, ToWriter},
};

#[test]
fn footer_round_trip() {
    let header = common::unsigned_header(vec![common::hash_descriptor("vendor_boot", 5000, 1)]);
    let data = common::appended_image(&header, 5000, 3 * 4096);

    let raw_footer = &data[data.len() - Footer::SIZE..];
    let footer = Footer::from_reader(raw_footer).unwrap();

    assert_eq!(footer.original_image_size, 5000);
    assert_eq!(footer.vbmeta_offset, 8192);

    let mut writer = Cursor::new(Vec::new());
    footer.to_writer(&mut writer).unwrap();
    assert_eq!(writer.into_inner(), raw_footer);

    let (parsed_footer, parsed_header) = avb::parse_footer(&data).unwrap();
    assert_eq!(parsed_footer, footer);
    assert_eq!(parsed_header, header);
}

#[test]
fn invalid_footer() {
    let header = common::unsigned_header(vec![common::hash_descriptor("vendor_boot", 5000, 1)]);
    let mut data = common::appended_image(&header, 5000, 3 * 4096);
    let footer_offset = data.len() - Footer::SIZE;

    let mut bad_magic = data.clone();
    bad_magic[footer_offset] = b'X';
    assert_matches!(
        avb::parse_footer(&bad_magic),
        Err(avb::Error::InvalidFooterMagic(m)) if &m == b"XVBf"
    );

    assert_matches!(
        avb::parse_footer(&data[..10]),
        Err(avb::Error::TooSmallForFooter(10))
    );

    // vbmeta_size pointing past the footer.
    data[footer_offset + 28..][..8].copy_from_slice(&u64::MAX.to_be_bytes());
    assert_matches!(
        avb::parse_footer(&data),
        Err(avb::Error::FieldOutOfBounds("vbmeta_size"))
    );
}

#[test]
fn unsupported_footer_version() {
    let header = common::unsigned_header(vec![]);
    let mut data = common::appended_image(&header, 100, 4096 + 1024);
    let footer_offset = data.len() - Footer::SIZE;

    data[footer_offset + 4..][..4].copy_from_slice(&2u32.to_be_bytes());
    assert_matches!(
        avb::parse_footer(&data),
        Err(avb::Error::UnsupportedFooterVersion { major: 2, minor: 0 })
    );
}

#[test]
fn standalone_vbmeta() {
    let header = common::unsigned_header(vec![
        common::property("com.android.build.vendor_boot.os_version", b"14"),
        common::hash_descriptor("vendor_boot", 5000, 1),
    ]);
    let data = common::root_image(&header, 4096);
    assert_eq!(data.len(), 4096);

    let image = avb::load_image(&data).unwrap();
    assert_eq!(image.header, header);
    assert_eq!(image.footer, None);
    assert_eq!(image.vbmeta_offset, 0);

    let mut writer = Cursor::new(Vec::new());
    header.to_writer(&mut writer).unwrap();
    assert_eq!(image.vbmeta_size, writer.get_ref().len() as u64);

    // Not an appended image.
    assert_matches!(
        avb::parse_footer(&data),
        Err(avb::Error::InvalidFooterMagic(_))
    );
}

#[test]
fn not_an_avb_image() {
    assert_matches!(
        avb::load_image(&[0u8; 8192]),
        Err(avb::Error::InvalidHeaderMagic([0, 0, 0, 0]))
    );
}

#[test]
fn unknown_descriptor_is_preserved() {
    let unknown = Descriptor::Unknown {
        tag: 0x1234,
        data: b"\x01\x02\x03\x04\x05\x06\x07\x08".to_vec(),
    };
    let header = common::unsigned_header(vec![
        common::property("a", b"b"),
        unknown.clone(),
        Descriptor::KernelCmdline(KernelCmdlineDescriptor {
            flags: KernelCmdlineDescriptor::FLAG_USE_ONLY_IF_HASHTREE_DISABLED,
            cmdline: "root=PARTUUID=$(ANDROID_SYSTEM_PARTUUID)".to_owned(),
        }),
    ]);

    let mut writer = Cursor::new(Vec::new());
    header.to_writer(&mut writer).unwrap();
    let raw = writer.into_inner();

    let decoded = Header::from_reader(raw.as_slice()).unwrap();
    assert_eq!(decoded.descriptors[1], unknown);
    assert_eq!(decoded, header);

    let mut writer = Cursor::new(Vec::new());
    decoded.to_writer(&mut writer).unwrap();
    assert_eq!(writer.into_inner(), raw);
}

#[test]
fn nonzero_descriptor_padding() {
    // 2-byte key and 1-byte value leave 3 bytes of padding.
    let header = common::unsigned_header(vec![common::property("ab", b"c")]);

    let mut writer = Cursor::new(Vec::new());
    header.to_writer(&mut writer).unwrap();
    let mut raw = writer.into_inner();

    // Descriptors are at the start of the aux block, which directly follows
    // the empty auth block. Tag, length, key size, and value size come first.
    let padding_offset = Header::SIZE + 16 + 16 + 3 + 1 + 2;
    raw[padding_offset] = 0xff;

    assert_matches!(
        Header::from_reader(raw.as_slice()),
        Err(avb::Error::PaddingNotZero("descriptor"))
    );
}

#[test]
fn algorithm_names() {
    for raw in 0..7 {
        let algorithm = AlgorithmType::from_raw(raw).unwrap();
        assert_eq!(algorithm.to_raw(), raw);
        assert_eq!(algorithm.name().parse::<AlgorithmType>().unwrap(), algorithm);
        assert_eq!(algorithm.is_signed(), raw != 0);
    }

    assert_eq!(AlgorithmType::Sha256Rsa4096.to_string(), "SHA256_RSA4096");
    assert_matches!(
        AlgorithmType::from_raw(7),
        Err(avb::Error::UnsupportedAlgorithm(7))
    );
    assert_matches!(
        "SHA1_RSA1024".parse::<AlgorithmType>(),
        Err(avb::Error::UnsupportedAlgorithmName(n)) if n == "SHA1_RSA1024"
    );
}

#[test]
fn unsupported_algorithm_in_header() {
    let header = common::unsigned_header(vec![]);
    let mut data = common::root_image(&header, 64);

    // Algorithm type follows the magic, version, and block sizes.
    data[28..32].copy_from_slice(&42u32.to_be_bytes());
    assert_matches!(
        avb::load_image(&data),
        Err(avb::Error::UnsupportedAlgorithm(42))
    );
}

#[test]
fn info_of_appended_image() {
    const DATA_SIZE: u64 = 100_000_000;
    const VBMETA_SIZE: u64 = 2000;

    let public_key = common::public_key(3);
    let header = Header {
        rollback_index: 7,
        ..common::signed_header(
            vec![
                common::property("com.android.build.vendor_boot.fingerprint", b"vendor/x:14/1"),
                common::hash_descriptor("vendor_boot", DATA_SIZE, 0xab),
            ],
            public_key.clone(),
        )
    };

    let mut writer = Cursor::new(Vec::new());
    header.to_writer(&mut writer).unwrap();
    let raw_header = writer.into_inner();
    assert!(raw_header.len() as u64 <= VBMETA_SIZE);

    // The vbmeta blob starts immediately after the partition data.
    let image_size = DATA_SIZE + VBMETA_SIZE + Footer::SIZE as u64;
    let mut data = vec![0u8; image_size as usize];
    data[DATA_SIZE as usize..][..raw_header.len()].copy_from_slice(&raw_header);

    let footer = Footer {
        version_major: avb::FOOTER_VERSION_MAJOR,
        version_minor: avb::FOOTER_VERSION_MINOR,
        original_image_size: DATA_SIZE,
        vbmeta_offset: DATA_SIZE,
        vbmeta_size: VBMETA_SIZE,
        reserved: [0u8; 28],
    };
    let mut writer = Cursor::new(Vec::new());
    footer.to_writer(&mut writer).unwrap();
    data[(image_size as usize - Footer::SIZE)..].copy_from_slice(writer.get_ref());

    let info = info::extract_info(&data).unwrap();
    assert_eq!(info.partition_size, image_size);
    assert_eq!(info.data_size, Some(DATA_SIZE));
    assert_eq!(info.footer_partition_size(), image_size);
    assert_eq!(info.partition_name.as_deref(), Some("vendor_boot"));
    assert_eq!(info.algorithm, AlgorithmType::Sha256Rsa4096);
    assert_eq!(info.rollback_index, 7);
    assert_eq!(info.salt.as_deref(), Some("5a".repeat(32).as_str()));
    assert_eq!(info.hash_algorithm.as_deref(), Some("sha256"));
    assert_eq!(info.flags, None);
    assert_eq!(info.release_string, "avbtool 1.3.0");
    assert_eq!(
        info.public_key_digest,
        Some(avb::public_key_digest(&public_key)),
    );
    assert_eq!(
        info.property("com.android.build.vendor_boot.fingerprint"),
        Some(b"vendor/x:14/1".as_slice()),
    );
    assert_eq!(info.vbmeta.len() as u64, VBMETA_SIZE);
    assert_eq!(&info.vbmeta[..raw_header.len()], raw_header);
}

#[test]
fn info_of_standalone_vbmeta() {
    let header = common::unsigned_header(vec![
        common::hash_descriptor("boot", 4096, 1),
        common::hash_descriptor("vendor_boot", 4096, 2),
    ]);
    let data = common::root_image(&header, 4096);

    let info = info::extract_info(&data).unwrap();
    assert_eq!(info.partition_name, None);
    assert_eq!(info.salt, None);
    assert_eq!(info.data_size, None);
    assert_eq!(info.public_key_digest, None);
    assert_eq!(info.partition_size, 4096);
}

#[test]
fn public_key_digest_is_sha1() {
    assert_eq!(
        avb::public_key_digest(b""),
        "da39a3ee5e6b4b0d3255bfef95601890afd80709",
    );
}

fn encoded_header(header: &Header) -> Vec<u8> {
    let mut writer = Cursor::new(Vec::new());
    header.to_writer(&mut writer).unwrap();
    writer.into_inner()
}

#[test]
fn descriptor_length_past_table() {
    let mut raw = encoded_header(&common::unsigned_header(vec![common::property("a", b"b")]));

    // num_bytes_following of the first descriptor, which starts the aux block.
    raw[Header::SIZE + 8..][..8].copy_from_slice(&1000u64.to_be_bytes());

    assert_matches!(
        Header::from_reader(raw.as_slice()),
        Err(avb::Error::FieldOutOfBounds("num_bytes_following"))
    );
}

#[test]
fn descriptor_fields_past_descriptor() {
    let mut raw = encoded_header(&common::unsigned_header(vec![common::property("a", b"b")]));

    // Key size larger than the 24-byte descriptor payload.
    raw[Header::SIZE + 16..][..8].copy_from_slice(&100u64.to_be_bytes());

    assert_matches!(
        Header::from_reader(raw.as_slice()),
        Err(avb::Error::ReadFieldError("key", _))
    );
}

#[test]
fn descriptors_larger_than_aux_block() {
    let mut raw = encoded_header(&common::unsigned_header(vec![common::property("a", b"b")]));
    let aux_block_size = u64::from_be_bytes(raw[20..28].try_into().unwrap());

    // descriptors_size
    raw[104..112].copy_from_slice(&(aux_block_size + 64).to_be_bytes());

    assert_matches!(
        Header::from_reader(raw.as_slice()),
        Err(avb::Error::FieldOutOfBounds("aux_block"))
    );
}

#[test]
fn footer_sizes_out_of_bounds() {
    let header = common::unsigned_header(vec![common::hash_descriptor("vendor_boot", 5000, 1)]);
    let data = common::appended_image(&header, 5000, 3 * 4096);
    let footer_offset = data.len() - Footer::SIZE;

    let mut image_too_large = data.clone();
    image_too_large[footer_offset + 12..][..8].copy_from_slice(&(data.len() as u64).to_be_bytes());
    assert_matches!(
        avb::parse_footer(&image_too_large),
        Err(avb::Error::FieldOutOfBounds("original_image_size"))
    );

    // vbmeta blob overlapping the partition data.
    let mut overlapping = data.clone();
    overlapping[footer_offset + 20..][..8].copy_from_slice(&4096u64.to_be_bytes());
    assert_matches!(
        avb::parse_footer(&overlapping),
        Err(avb::Error::FieldOutOfBounds("vbmeta_offset"))
    );
    assert_matches!(
        avb::load_image(&overlapping),
        Err(avb::Error::FieldOutOfBounds("vbmeta_offset"))
    );
}
