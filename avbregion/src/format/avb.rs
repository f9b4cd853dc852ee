// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    str::{self, FromStr},
};

use bitflags::bitflags;
use bstr::ByteSlice;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use phf::phf_map;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::{
    escape,
    format::padding,
    stream::{
        CountingReader, CountingWriter, FromReader, ReadStringExt, ToWriter, WriteStringExt,
        WriteZerosExt,
    },
    util,
};

pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 3;

pub const FOOTER_VERSION_MAJOR: u32 = 1;
pub const FOOTER_VERSION_MINOR: u32 = 0;

pub const HEADER_MAGIC: [u8; 4] = *b"AVB0";
pub const FOOTER_MAGIC: [u8; 4] = *b"AVBf";

/// Maximum header size. This is the same limit as what avbtool enforces. This
/// value is also used as the limit for individual descriptor fields to allow
/// for early fail. No individual field can actually be this size.
pub const HEADER_MAX_SIZE: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read {0:?} field: {1}")]
    ReadFieldError(&'static str, io::Error),
    #[error("Failed to write {0:?} field: {1}")]
    WriteFieldError(&'static str, io::Error),
    #[error("{0:?} field does not have NULL terminator")]
    StringNotNullTerminated(&'static str),
    #[error("{0:?} field is not ASCII encoded: {1:?}")]
    StringNotAscii(&'static str, String),
    #[error("Header exceeds maximum size of {HEADER_MAX_SIZE}")]
    HeaderTooLarge,
    #[error("Descriptor padding is too long or data was not consumed")]
    PaddingTooLong,
    #[error("{0:?} field padding contains non-zero bytes")]
    PaddingNotZero(&'static str),
    #[error("{0:?} field is out of bounds")]
    FieldOutOfBounds(&'static str),
    #[error("Invalid VBMeta header magic: {0:?}")]
    InvalidHeaderMagic([u8; 4]),
    #[error("Invalid VBMeta footer magic: {0:?}")]
    InvalidFooterMagic([u8; 4]),
    #[error("Unsupported VBMeta header version: {major}.{minor}")]
    UnsupportedHeaderVersion { major: u32, minor: u32 },
    #[error("Unsupported VBMeta footer version: {major}.{minor}")]
    UnsupportedFooterVersion { major: u32, minor: u32 },
    #[error("Signature algorithm not supported: {0}")]
    UnsupportedAlgorithm(u32),
    #[error("Signature algorithm name not supported: {0:?}")]
    UnsupportedAlgorithmName(String),
    #[error("Must have exactly one hash or hash tree descriptor")]
    NoAppendedDescriptor,
    #[error("{0} byte image size is too small to fit footer")]
    TooSmallForFooter(u64),
    #[error("{0} byte image size is too small to fit header")]
    TooSmallForHeader(u64),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum AlgorithmType {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "SHA256_RSA2048")]
    Sha256Rsa2048,
    #[serde(rename = "SHA256_RSA4096")]
    Sha256Rsa4096,
    #[serde(rename = "SHA256_RSA8192")]
    Sha256Rsa8192,
    #[serde(rename = "SHA512_RSA2048")]
    Sha512Rsa2048,
    #[serde(rename = "SHA512_RSA4096")]
    Sha512Rsa4096,
    #[serde(rename = "SHA512_RSA8192")]
    Sha512Rsa8192,
}

static ALGORITHMS_BY_NAME: phf::Map<&'static str, AlgorithmType> = phf_map! {
    "NONE" => AlgorithmType::None,
    "SHA256_RSA2048" => AlgorithmType::Sha256Rsa2048,
    "SHA256_RSA4096" => AlgorithmType::Sha256Rsa4096,
    "SHA256_RSA8192" => AlgorithmType::Sha256Rsa8192,
    "SHA512_RSA2048" => AlgorithmType::Sha512Rsa2048,
    "SHA512_RSA4096" => AlgorithmType::Sha512Rsa4096,
    "SHA512_RSA8192" => AlgorithmType::Sha512Rsa8192,
};

impl AlgorithmType {
    pub fn from_raw(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Sha256Rsa2048),
            2 => Ok(Self::Sha256Rsa4096),
            3 => Ok(Self::Sha256Rsa8192),
            4 => Ok(Self::Sha512Rsa2048),
            5 => Ok(Self::Sha512Rsa4096),
            6 => Ok(Self::Sha512Rsa8192),
            v => Err(Error::UnsupportedAlgorithm(v)),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Sha256Rsa2048 => 1,
            Self::Sha256Rsa4096 => 2,
            Self::Sha256Rsa8192 => 3,
            Self::Sha512Rsa2048 => 4,
            Self::Sha512Rsa4096 => 5,
            Self::Sha512Rsa8192 => 6,
        }
    }

    /// Canonical name, as used by avbtool's `--algorithm` option.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Sha256Rsa2048 => "SHA256_RSA2048",
            Self::Sha256Rsa4096 => "SHA256_RSA4096",
            Self::Sha256Rsa8192 => "SHA256_RSA8192",
            Self::Sha512Rsa2048 => "SHA512_RSA2048",
            Self::Sha512Rsa4096 => "SHA512_RSA4096",
            Self::Sha512Rsa8192 => "SHA512_RSA8192",
        }
    }

    pub fn is_signed(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ALGORITHMS_BY_NAME
            .get(s)
            .copied()
            .ok_or_else(|| Error::UnsupportedAlgorithmName(s.to_owned()))
    }
}

bitflags! {
    /// Top-level vbmeta header flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct HeaderFlags: u32 {
        const HASHTREE_DISABLED = 1 << 0;
        const VERIFICATION_DISABLED = 1 << 1;

        const _ = !0;
    }
}

trait DescriptorTag {
    const TAG: u64;

    fn get_tag(&self) -> u64 {
        Self::TAG
    }
}

#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PropertyDescriptor {
    pub key: String,
    #[serde(with = "escape")]
    pub value: Vec<u8>,
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("key", &self.key)
            .field("value", &self.value.as_bstr())
            .finish()
    }
}

impl DescriptorTag for PropertyDescriptor {
    const TAG: u64 = 0;
}

impl<R: Read> FromReader<R> for PropertyDescriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let key_size = reader.read_u64::<BigEndian>()?;
        let value_size = reader.read_u64::<BigEndian>()?;

        if key_size > HEADER_MAX_SIZE {
            return Err(Error::FieldOutOfBounds("key_size"));
        } else if value_size > HEADER_MAX_SIZE {
            return Err(Error::FieldOutOfBounds("value_size"));
        }

        let key = reader
            .read_string_exact(key_size as usize)
            .map_err(|e| Error::ReadFieldError("key", e))?;

        let mut null = [0u8; 1];
        reader
            .read_exact(&mut null)
            .map_err(|e| Error::ReadFieldError("key_null", e))?;
        if null[0] != b'\0' {
            return Err(Error::StringNotNullTerminated("key"));
        }

        let mut value = vec![0u8; value_size as usize];
        reader.read_exact(&mut value)?;

        // The non-string value is also null terminated.
        reader
            .read_exact(&mut null)
            .map_err(|e| Error::ReadFieldError("value_null", e))?;
        if null[0] != b'\0' {
            return Err(Error::StringNotNullTerminated("value"));
        }

        Ok(Self { key, value })
    }
}

impl<W: Write> ToWriter<W> for PropertyDescriptor {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        if self.key.len() > HEADER_MAX_SIZE as usize {
            return Err(Error::FieldOutOfBounds("key_size"));
        } else if self.value.len() > HEADER_MAX_SIZE as usize {
            return Err(Error::FieldOutOfBounds("value_size"));
        }

        writer.write_u64::<BigEndian>(self.key.len() as u64)?;
        writer.write_u64::<BigEndian>(self.value.len() as u64)?;
        writer.write_all(self.key.as_bytes())?;
        writer.write_all(b"\0")?;
        writer.write_all(&self.value)?;
        writer.write_all(b"\0")?;

        Ok(())
    }
}

/// Hex formatting for byte fields in [`fmt::Debug`] output.
struct HexBytes<'a>(&'a [u8]);

impl fmt::Debug for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Read a `u32` length field. Anything that can't fit in a header is rejected
/// before it's used as an allocation size.
fn read_len(mut reader: impl Read, field: &'static str) -> Result<usize> {
    let len = reader.read_u32::<BigEndian>()?;
    if u64::from(len) > HEADER_MAX_SIZE {
        return Err(Error::FieldOutOfBounds(field));
    }

    Ok(len as usize)
}

fn write_len(mut writer: impl Write, field: &'static str, len: usize) -> Result<()> {
    if len as u64 > HEADER_MAX_SIZE {
        return Err(Error::FieldOutOfBounds(field));
    }

    writer.write_u32::<BigEndian>(len as u32)?;
    Ok(())
}

fn read_vec(mut reader: impl Read, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Fields shared by hash and hash tree descriptors. In both, they follow the
/// type-specific fields.
struct DigestFields {
    hash_algorithm: String,
    partition_name: String,
    salt: Vec<u8>,
    root_digest: Vec<u8>,
    flags: u32,
    reserved: [u8; 60],
}

impl DigestFields {
    fn read(mut reader: impl Read) -> Result<Self> {
        let hash_algorithm = reader
            .read_string_padded(32)
            .map_err(|e| Error::ReadFieldError("hash_algorithm", e))?;
        if !hash_algorithm.is_ascii() {
            return Err(Error::StringNotAscii("hash_algorithm", hash_algorithm));
        }

        let partition_name_len = read_len(&mut reader, "partition_name_len")?;
        let salt_len = read_len(&mut reader, "salt_len")?;
        let root_digest_len = read_len(&mut reader, "root_digest_len")?;
        let flags = reader.read_u32::<BigEndian>()?;

        let mut reserved = [0u8; 60];
        reader.read_exact(&mut reserved)?;

        // The name is not NULL-terminated.
        let partition_name = reader
            .read_string_exact(partition_name_len)
            .map_err(|e| Error::ReadFieldError("partition_name", e))?;
        let salt = read_vec(&mut reader, salt_len)?;
        let root_digest = read_vec(&mut reader, root_digest_len)?;

        Ok(Self {
            hash_algorithm,
            partition_name,
            salt,
            root_digest,
            flags,
            reserved,
        })
    }
}

fn write_digest_fields(
    mut writer: impl Write,
    hash_algorithm: &str,
    partition_name: &str,
    salt: &[u8],
    root_digest: &[u8],
    flags: u32,
    reserved: &[u8; 60],
) -> Result<()> {
    if !hash_algorithm.is_ascii() {
        return Err(Error::StringNotAscii(
            "hash_algorithm",
            hash_algorithm.to_owned(),
        ));
    }
    writer
        .write_string_padded(hash_algorithm, 32)
        .map_err(|e| Error::WriteFieldError("hash_algorithm", e))?;

    write_len(&mut writer, "partition_name_len", partition_name.len())?;
    write_len(&mut writer, "salt_len", salt.len())?;
    write_len(&mut writer, "root_digest_len", root_digest.len())?;
    writer.write_u32::<BigEndian>(flags)?;
    writer.write_all(reserved)?;
    writer.write_all(partition_name.as_bytes())?;
    writer.write_all(salt)?;
    writer.write_all(root_digest)?;

    Ok(())
}

/// Descriptor for a partition verified block by block with dm-verity.
#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct HashTreeDescriptor {
    pub dm_verity_version: u32,
    pub image_size: u64,
    pub tree_offset: u64,
    pub tree_size: u64,
    pub data_block_size: u32,
    pub hash_block_size: u32,
    pub fec_num_roots: u32,
    pub fec_offset: u64,
    pub fec_size: u64,
    pub hash_algorithm: String,
    pub partition_name: String,
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    #[serde(with = "hex")]
    pub root_digest: Vec<u8>,
    pub flags: u32,
    #[serde(with = "hex")]
    pub reserved: [u8; 60],
}

impl fmt::Debug for HashTreeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTreeDescriptor")
            .field("dm_verity_version", &self.dm_verity_version)
            .field("image_size", &self.image_size)
            .field("tree_offset", &self.tree_offset)
            .field("tree_size", &self.tree_size)
            .field("data_block_size", &self.data_block_size)
            .field("hash_block_size", &self.hash_block_size)
            .field("fec_num_roots", &self.fec_num_roots)
            .field("fec_offset", &self.fec_offset)
            .field("fec_size", &self.fec_size)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("partition_name", &self.partition_name)
            .field("salt", &HexBytes(&self.salt))
            .field("root_digest", &HexBytes(&self.root_digest))
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl HashTreeDescriptor {
    pub const FLAG_DO_NOT_USE_AB: u32 = 1 << 0;
    pub const FLAG_CHECK_AT_MOST_ONCE: u32 = 1 << 1;
}

impl DescriptorTag for HashTreeDescriptor {
    const TAG: u64 = 1;
}

impl<R: Read> FromReader<R> for HashTreeDescriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let dm_verity_version = reader.read_u32::<BigEndian>()?;
        let image_size = reader.read_u64::<BigEndian>()?;
        let tree_offset = reader.read_u64::<BigEndian>()?;
        let tree_size = reader.read_u64::<BigEndian>()?;
        let data_block_size = reader.read_u32::<BigEndian>()?;
        let hash_block_size = reader.read_u32::<BigEndian>()?;
        let fec_num_roots = reader.read_u32::<BigEndian>()?;
        let fec_offset = reader.read_u64::<BigEndian>()?;
        let fec_size = reader.read_u64::<BigEndian>()?;
        let digest = DigestFields::read(&mut reader)?;

        Ok(Self {
            dm_verity_version,
            image_size,
            tree_offset,
            tree_size,
            data_block_size,
            hash_block_size,
            fec_num_roots,
            fec_offset,
            fec_size,
            hash_algorithm: digest.hash_algorithm,
            partition_name: digest.partition_name,
            salt: digest.salt,
            root_digest: digest.root_digest,
            flags: digest.flags,
            reserved: digest.reserved,
        })
    }
}

impl<W: Write> ToWriter<W> for HashTreeDescriptor {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.dm_verity_version)?;
        writer.write_u64::<BigEndian>(self.image_size)?;
        writer.write_u64::<BigEndian>(self.tree_offset)?;
        writer.write_u64::<BigEndian>(self.tree_size)?;
        writer.write_u32::<BigEndian>(self.data_block_size)?;
        writer.write_u32::<BigEndian>(self.hash_block_size)?;
        writer.write_u32::<BigEndian>(self.fec_num_roots)?;
        writer.write_u64::<BigEndian>(self.fec_offset)?;
        writer.write_u64::<BigEndian>(self.fec_size)?;

        write_digest_fields(
            writer,
            &self.hash_algorithm,
            &self.partition_name,
            &self.salt,
            &self.root_digest,
            self.flags,
            &self.reserved,
        )
    }
}

/// Descriptor for a partition that is hashed as a whole, like vendor_boot.
#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct HashDescriptor {
    pub image_size: u64,
    pub hash_algorithm: String,
    pub partition_name: String,
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    #[serde(with = "hex")]
    pub root_digest: Vec<u8>,
    pub flags: u32,
    #[serde(with = "hex")]
    pub reserved: [u8; 60],
}

impl fmt::Debug for HashDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashDescriptor")
            .field("image_size", &self.image_size)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("partition_name", &self.partition_name)
            .field("salt", &HexBytes(&self.salt))
            .field("root_digest", &HexBytes(&self.root_digest))
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl DescriptorTag for HashDescriptor {
    const TAG: u64 = 2;
}

impl<R: Read> FromReader<R> for HashDescriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let image_size = reader.read_u64::<BigEndian>()?;
        let digest = DigestFields::read(&mut reader)?;

        Ok(Self {
            image_size,
            hash_algorithm: digest.hash_algorithm,
            partition_name: digest.partition_name,
            salt: digest.salt,
            root_digest: digest.root_digest,
            flags: digest.flags,
            reserved: digest.reserved,
        })
    }
}

impl<W: Write> ToWriter<W> for HashDescriptor {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer.write_u64::<BigEndian>(self.image_size)?;

        write_digest_fields(
            writer,
            &self.hash_algorithm,
            &self.partition_name,
            &self.salt,
            &self.root_digest,
            self.flags,
            &self.reserved,
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct KernelCmdlineDescriptor {
    pub flags: u32,
    pub cmdline: String,
}

impl KernelCmdlineDescriptor {
    pub const FLAG_USE_ONLY_IF_HASHTREE_NOT_DISABLED: u32 = 1 << 0;
    pub const FLAG_USE_ONLY_IF_HASHTREE_DISABLED: u32 = 1 << 1;
}

impl DescriptorTag for KernelCmdlineDescriptor {
    const TAG: u64 = 3;
}

impl<R: Read> FromReader<R> for KernelCmdlineDescriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let flags = reader.read_u32::<BigEndian>()?;
        let cmdline_len = read_len(&mut reader, "cmdline_len")?;

        // Not NULL-terminated.
        let cmdline = reader
            .read_string_exact(cmdline_len)
            .map_err(|e| Error::ReadFieldError("cmdline", e))?;

        Ok(Self { flags, cmdline })
    }
}

impl<W: Write> ToWriter<W> for KernelCmdlineDescriptor {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.flags)?;
        write_len(&mut writer, "cmdline_len", self.cmdline.len())?;
        writer.write_all(self.cmdline.as_bytes())?;

        Ok(())
    }
}

/// Delegates verification of a partition to the key embedded in the
/// partition's own vbmeta blob.
#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ChainPartitionDescriptor {
    /// Slot in the device's rollback index storage. Location 0 is used by the
    /// top-level vbmeta image itself.
    pub rollback_index_location: u32,
    pub partition_name: String,
    /// Public key in the AVB binary format.
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    pub flags: u32,
    #[serde(with = "hex")]
    pub reserved: [u8; 60],
}

impl ChainPartitionDescriptor {
    pub const FLAG_DO_NOT_USE_AB: u32 = 1 << 0;
}

impl fmt::Debug for ChainPartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainPartitionDescriptor")
            .field("rollback_index_location", &self.rollback_index_location)
            .field("partition_name", &self.partition_name)
            .field("public_key", &public_key_digest(&self.public_key))
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl DescriptorTag for ChainPartitionDescriptor {
    const TAG: u64 = 4;
}

impl<R: Read> FromReader<R> for ChainPartitionDescriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let rollback_index_location = reader.read_u32::<BigEndian>()?;
        let partition_name_len = read_len(&mut reader, "partition_name_len")?;
        let public_key_len = read_len(&mut reader, "public_key_len")?;
        let flags = reader.read_u32::<BigEndian>()?;

        let mut reserved = [0u8; 60];
        reader.read_exact(&mut reserved)?;

        let partition_name = reader
            .read_string_exact(partition_name_len)
            .map_err(|e| Error::ReadFieldError("partition_name", e))?;
        let public_key = read_vec(&mut reader, public_key_len)?;

        Ok(Self {
            rollback_index_location,
            partition_name,
            public_key,
            flags,
            reserved,
        })
    }
}

impl<W: Write> ToWriter<W> for ChainPartitionDescriptor {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.rollback_index_location)?;
        write_len(&mut writer, "partition_name_len", self.partition_name.len())?;
        write_len(&mut writer, "public_key_len", self.public_key.len())?;
        writer.write_u32::<BigEndian>(self.flags)?;
        writer.write_all(&self.reserved)?;
        writer.write_all(self.partition_name.as_bytes())?;
        writer.write_all(&self.public_key)?;

        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Descriptor {
    Property(PropertyDescriptor),
    HashTree(HashTreeDescriptor),
    Hash(HashDescriptor),
    KernelCmdline(KernelCmdlineDescriptor),
    ChainPartition(ChainPartitionDescriptor),
    /// Descriptor with a tag this crate does not know about. The payload,
    /// including its alignment padding, is kept verbatim.
    Unknown {
        tag: u64,
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
}

impl Descriptor {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Property(_) => "Property",
            Self::HashTree(_) => "HashTree",
            Self::Hash(_) => "Hash",
            Self::KernelCmdline(_) => "KernelCmdline",
            Self::ChainPartition(_) => "ChainPartition",
            Self::Unknown { .. } => "Unknown",
        }
    }

    pub fn partition_name(&self) -> Option<&str> {
        match self {
            Self::HashTree(d) => Some(&d.partition_name),
            Self::Hash(d) => Some(&d.partition_name),
            Self::ChainPartition(d) => Some(&d.partition_name),
            _ => None,
        }
    }
}

/// Truncated reads while decoding a descriptor mean that its length fields
/// disagree with each other, not that the underlying reader failed.
fn overrun(field: &'static str) -> impl Fn(Error) -> Error {
    move |e| match e {
        Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => Error::FieldOutOfBounds(field),
        e => e,
    }
}

impl<R: Read> FromReader<R> for Descriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let tag = reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::ReadFieldError("tag", e))?;
        let nbf = reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::ReadFieldError("num_bytes_following", e))?;

        if nbf > HEADER_MAX_SIZE {
            return Err(Error::FieldOutOfBounds("num_bytes_following"));
        }

        let data = read_vec(&mut reader, nbf as usize).map_err(overrun("num_bytes_following"))?;

        let mut inner_reader = CountingReader::new(data.as_slice());

        let descriptor = match tag {
            PropertyDescriptor::TAG => PropertyDescriptor::from_reader(&mut inner_reader)
                .map(Self::Property),
            HashTreeDescriptor::TAG => HashTreeDescriptor::from_reader(&mut inner_reader)
                .map(Self::HashTree),
            HashDescriptor::TAG => HashDescriptor::from_reader(&mut inner_reader).map(Self::Hash),
            KernelCmdlineDescriptor::TAG => KernelCmdlineDescriptor::from_reader(&mut inner_reader)
                .map(Self::KernelCmdline),
            ChainPartitionDescriptor::TAG => {
                ChainPartitionDescriptor::from_reader(&mut inner_reader).map(Self::ChainPartition)
            }
            _ => return Ok(Self::Unknown { tag, data }),
        }
        .map_err(overrun("descriptor"))?;

        // The descriptor data is always aligned to 8 bytes. Known descriptors
        // are re-encoded with zero padding, so anything else would be lost.
        let (_, pos) = inner_reader.finish();
        let padding = &data[pos as usize..];

        if padding.len() as u64 > padding::calc(pos, 8) {
            return Err(Error::PaddingTooLong);
        } else if padding.len() as u64 != padding::calc(pos, 8) {
            return Err(Error::FieldOutOfBounds("descriptor_padding"));
        } else if !util::is_zero(padding) {
            return Err(Error::PaddingNotZero("descriptor"));
        }

        Ok(descriptor)
    }
}

impl<W: Write> ToWriter<W> for Descriptor {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        let mut inner_writer = Cursor::new(Vec::new());

        let tag = match self {
            Self::Property(d) => {
                d.to_writer(&mut inner_writer)?;
                d.get_tag()
            }
            Self::HashTree(d) => {
                d.to_writer(&mut inner_writer)?;
                d.get_tag()
            }
            Self::Hash(d) => {
                d.to_writer(&mut inner_writer)?;
                d.get_tag()
            }
            Self::KernelCmdline(d) => {
                d.to_writer(&mut inner_writer)?;
                d.get_tag()
            }
            Self::ChainPartition(d) => {
                d.to_writer(&mut inner_writer)?;
                d.get_tag()
            }
            Self::Unknown { tag, data } => {
                // Written as-is. The length was already validated on read.
                writer.write_u64::<BigEndian>(*tag)?;
                writer.write_u64::<BigEndian>(data.len() as u64)?;
                writer.write_all(data)?;
                return Ok(());
            }
        };

        let inner_data = inner_writer.into_inner();

        if inner_data.len() > HEADER_MAX_SIZE as usize {
            return Err(Error::FieldOutOfBounds("num_bytes_following"));
        }

        let padding_len = padding::calc(inner_data.len(), 8);
        let nbf = inner_data.len() + padding_len;

        writer.write_u64::<BigEndian>(tag)?;
        writer.write_u64::<BigEndian>(nbf as u64)?;
        writer.write_all(&inner_data)?;
        writer.write_zeros_exact(padding_len as u64)?;

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendedDescriptorRef<'a> {
    HashTree(&'a HashTreeDescriptor),
    Hash(&'a HashDescriptor),
}

impl AppendedDescriptorRef<'_> {
    pub fn partition_name(&self) -> &str {
        match self {
            Self::HashTree(d) => &d.partition_name,
            Self::Hash(d) => &d.partition_name,
        }
    }

    pub fn salt(&self) -> &[u8] {
        match self {
            Self::HashTree(d) => &d.salt,
            Self::Hash(d) => &d.salt,
        }
    }

    pub fn hash_algorithm(&self) -> &str {
        match self {
            Self::HashTree(d) => &d.hash_algorithm,
            Self::Hash(d) => &d.hash_algorithm,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Header {
    pub required_libavb_version_major: u32,
    pub required_libavb_version_minor: u32,
    pub algorithm_type: AlgorithmType,
    #[serde(with = "hex")]
    pub hash: Vec<u8>,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex")]
    pub public_key_metadata: Vec<u8>,
    pub descriptors: Vec<Descriptor>,
    pub rollback_index: u64,
    pub flags: HeaderFlags,
    pub rollback_index_location: u32,
    pub release_string: String,
    #[serde(with = "hex")]
    pub reserved: [u8; 80],
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = format!(
            "{}.{}",
            self.required_libavb_version_major, self.required_libavb_version_minor,
        );

        f.debug_struct("Header")
            .field("required_libavb_version", &version)
            .field("algorithm_type", &self.algorithm_type)
            .field("hash", &HexBytes(&self.hash))
            .field("signature", &HexBytes(&self.signature))
            .field("public_key", &public_key_digest(&self.public_key))
            .field("public_key_metadata", &HexBytes(&self.public_key_metadata))
            .field("descriptors", &self.descriptors)
            .field("rollback_index", &self.rollback_index)
            .field("flags", &self.flags)
            .field("rollback_index_location", &self.rollback_index_location)
            .field("release_string", &self.release_string)
            .finish_non_exhaustive()
    }
}

impl Header {
    pub const SIZE: usize = 256;

    /// Offset of the big-endian `rollback_index` field within the fixed-size
    /// portion of the header.
    pub const ROLLBACK_INDEX_OFFSET: usize = 112;

    /// Get the first hash or hash tree descriptor if there is only one. This is
    /// the case for appended AVB images.
    pub fn appended_descriptor(&self) -> Result<AppendedDescriptorRef<'_>> {
        let mut result = None;

        for descriptor in &self.descriptors {
            let d = match descriptor {
                Descriptor::HashTree(d) => AppendedDescriptorRef::HashTree(d),
                Descriptor::Hash(d) => AppendedDescriptorRef::Hash(d),
                _ => continue,
            };

            if result.is_some() {
                return Err(Error::NoAppendedDescriptor);
            }
            result = Some(d);
        }

        result.ok_or(Error::NoAppendedDescriptor)
    }

    /// Get the properties as key/value pairs, in descriptor order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::Property(p) => Some(p),
            _ => None,
        })
    }

    /// Clear the authentication data and public key. The header will need to
    /// be signed again by whoever holds the private key.
    pub fn clear_sig(&mut self) {
        self.hash.clear();
        self.signature.clear();
        self.public_key.clear();
        self.public_key_metadata.clear();
    }
}

/// Location of a field within the auth or aux block.
#[derive(Clone, Copy, Debug)]
struct BlockRange {
    offset: u64,
    size: u64,
}

impl BlockRange {
    fn read(mut reader: impl Read) -> io::Result<Self> {
        let offset = reader.read_u64::<BigEndian>()?;
        let size = reader.read_u64::<BigEndian>()?;

        Ok(Self { offset, size })
    }

    fn write(&self, mut writer: impl Write) -> io::Result<()> {
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_u64::<BigEndian>(self.size)?;

        Ok(())
    }

    fn slice<'a>(&self, data: &'a [u8], field: &'static str) -> Result<&'a [u8]> {
        let start = usize::try_from(self.offset).ok();
        let size = usize::try_from(self.size).ok();

        start
            .zip(size)
            .and_then(|(s, n)| data.get(s..)?.get(..n))
            .ok_or(Error::FieldOutOfBounds(field))
    }

    /// Lay out `fields` back to back. Returns each field's range and the block
    /// size, which includes the padding to a 64-byte boundary.
    fn layout<const N: usize>(fields: [&[u8]; N]) -> Result<([Self; N], u64)> {
        let mut offset = 0u64;
        let ranges = fields.map(|f| {
            let range = Self {
                offset,
                size: f.len() as u64,
            };
            offset += range.size;
            range
        });

        if offset > HEADER_MAX_SIZE {
            return Err(Error::HeaderTooLarge);
        }

        Ok((ranges, offset + padding::calc(offset, 64)))
    }
}

/// Split off the zero padding at the end of an auth or aux block. The data
/// portion must be exactly the sum of the field sizes.
fn block_data<'a>(
    block: &'a [u8],
    ranges: &[BlockRange],
    name: &'static str,
) -> Result<&'a [u8]> {
    let data_size = ranges
        .iter()
        .try_fold(0u64, |acc, r| acc.checked_add(r.size))
        .and_then(|s| usize::try_from(s).ok())
        .filter(|s| *s <= block.len())
        .ok_or(Error::FieldOutOfBounds(name))?;

    let (data, padding) = block.split_at(data_size);
    if padding.len() as u64 != padding::calc(data_size as u64, 64) {
        return Err(Error::FieldOutOfBounds(name));
    } else if !util::is_zero(padding) {
        return Err(Error::PaddingNotZero(name));
    }

    Ok(data)
}

fn read_block(mut reader: impl Read, size: u64, name: &'static str) -> Result<Vec<u8>> {
    let mut block = vec![0u8; size as usize];
    reader
        .read_exact(&mut block)
        .map_err(|e| Error::ReadFieldError(name, e))?;

    Ok(block)
}

impl<R: Read> FromReader<R> for Header {
    type Error = Error;

    fn from_reader(reader: R) -> Result<Self> {
        let mut reader = CountingReader::new(reader);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;

        if magic != HEADER_MAGIC {
            return Err(Error::InvalidHeaderMagic(magic));
        }

        let required_libavb_version_major = reader.read_u32::<BigEndian>()?;
        let required_libavb_version_minor = reader.read_u32::<BigEndian>()?;
        if required_libavb_version_major != VERSION_MAJOR {
            return Err(Error::UnsupportedHeaderVersion {
                major: required_libavb_version_major,
                minor: required_libavb_version_minor,
            });
        }

        let auth_block_size = reader.read_u64::<BigEndian>()?;
        let aux_block_size = reader.read_u64::<BigEndian>()?;
        let algorithm_type = AlgorithmType::from_raw(reader.read_u32::<BigEndian>()?)?;

        let hash_range = BlockRange::read(&mut reader)?;
        let signature_range = BlockRange::read(&mut reader)?;
        let public_key_range = BlockRange::read(&mut reader)?;
        let public_key_metadata_range = BlockRange::read(&mut reader)?;
        let descriptors_range = BlockRange::read(&mut reader)?;

        let rollback_index = reader.read_u64::<BigEndian>()?;
        let flags = HeaderFlags::from_bits_retain(reader.read_u32::<BigEndian>()?);
        let rollback_index_location = reader.read_u32::<BigEndian>()?;

        let release_string = reader
            .read_string_padded(48)
            .map_err(|e| Error::ReadFieldError("release_string", e))?;

        let mut reserved = [0u8; 80];
        reader.read_exact(&mut reserved)?;

        let total_size = reader
            .stream_position()?
            .checked_add(auth_block_size)
            .and_then(|v| v.checked_add(aux_block_size))
            .ok_or(Error::FieldOutOfBounds("total_size"))?;
        if total_size > HEADER_MAX_SIZE {
            return Err(Error::HeaderTooLarge);
        }

        let auth_block = read_block(&mut reader, auth_block_size, "auth_block")?;
        let aux_block = read_block(&mut reader, aux_block_size, "aux_block")?;

        let auth_data = block_data(&auth_block, &[hash_range, signature_range], "auth_block")?;
        let aux_data = block_data(
            &aux_block,
            &[
                public_key_range,
                public_key_metadata_range,
                descriptors_range,
            ],
            "aux_block",
        )?;

        let descriptors_raw = descriptors_range.slice(aux_data, "descriptors")?;
        let mut descriptor_reader = Cursor::new(descriptors_raw);
        let mut descriptors = vec![];

        while (descriptor_reader.position() as usize) < descriptors_raw.len() {
            descriptors.push(Descriptor::from_reader(&mut descriptor_reader)?);
        }

        Ok(Self {
            required_libavb_version_major,
            required_libavb_version_minor,
            algorithm_type,
            hash: hash_range.slice(auth_data, "hash")?.to_vec(),
            signature: signature_range.slice(auth_data, "signature")?.to_vec(),
            public_key: public_key_range.slice(aux_data, "public_key")?.to_vec(),
            public_key_metadata: public_key_metadata_range
                .slice(aux_data, "public_key_metadata")?
                .to_vec(),
            descriptors,
            rollback_index,
            flags,
            rollback_index_location,
            release_string,
            reserved,
        })
    }
}

impl<W: Write> ToWriter<W> for Header {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        let mut descriptors_writer = Cursor::new(Vec::new());
        for d in &self.descriptors {
            d.to_writer(&mut descriptors_writer)?;
        }
        let descriptors_raw = descriptors_writer.into_inner();

        // avbtool places the descriptors before the public key in the aux
        // block, even though the header lists the key first.
        let auth_fields = [self.hash.as_slice(), self.signature.as_slice()];
        let aux_fields = [
            descriptors_raw.as_slice(),
            self.public_key.as_slice(),
            self.public_key_metadata.as_slice(),
        ];

        let ([hash_range, signature_range], auth_block_size) = BlockRange::layout(auth_fields)?;
        let ([descriptors_range, public_key_range, public_key_metadata_range], aux_block_size) =
            BlockRange::layout(aux_fields)?;

        if Self::SIZE as u64 + auth_block_size + aux_block_size > HEADER_MAX_SIZE {
            return Err(Error::HeaderTooLarge);
        }

        writer.write_all(&HEADER_MAGIC)?;
        writer.write_u32::<BigEndian>(self.required_libavb_version_major)?;
        writer.write_u32::<BigEndian>(self.required_libavb_version_minor)?;
        writer.write_u64::<BigEndian>(auth_block_size)?;
        writer.write_u64::<BigEndian>(aux_block_size)?;
        writer.write_u32::<BigEndian>(self.algorithm_type.to_raw())?;
        hash_range.write(&mut writer)?;
        signature_range.write(&mut writer)?;
        public_key_range.write(&mut writer)?;
        public_key_metadata_range.write(&mut writer)?;
        descriptors_range.write(&mut writer)?;
        writer.write_u64::<BigEndian>(self.rollback_index)?;
        writer.write_u32::<BigEndian>(self.flags.bits())?;
        writer.write_u32::<BigEndian>(self.rollback_index_location)?;

        writer
            .write_string_padded(&self.release_string, 48)
            .map_err(|e| Error::WriteFieldError("release_string", e))?;

        writer.write_all(&self.reserved)?;

        for (fields, block_size) in [
            (auth_fields.as_slice(), auth_block_size),
            (aux_fields.as_slice(), aux_block_size),
        ] {
            let mut written = 0;
            for field in fields {
                writer.write_all(field)?;
                written += field.len() as u64;
            }
            writer.write_zeros_exact(block_size - written)?;
        }

        Ok(())
    }
}

#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Footer {
    pub version_major: u32,
    pub version_minor: u32,
    pub original_image_size: u64,
    pub vbmeta_offset: u64,
    pub vbmeta_size: u64,
    #[serde(with = "hex")]
    pub reserved: [u8; 28],
}

impl fmt::Debug for Footer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Footer")
            .field("version_major", &self.version_major)
            .field("version_minor", &self.version_minor)
            .field("original_image_size", &self.original_image_size)
            .field("vbmeta_offset", &self.vbmeta_offset)
            .field("vbmeta_size", &self.vbmeta_size)
            .finish_non_exhaustive()
    }
}

impl Footer {
    pub const SIZE: usize = 64;
}

impl<R: Read> FromReader<R> for Footer {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;

        if magic != FOOTER_MAGIC {
            return Err(Error::InvalidFooterMagic(magic));
        }

        let version_major = reader.read_u32::<BigEndian>()?;
        let version_minor = reader.read_u32::<BigEndian>()?;
        if version_major != FOOTER_VERSION_MAJOR {
            return Err(Error::UnsupportedFooterVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        let original_image_size = reader.read_u64::<BigEndian>()?;
        let vbmeta_offset = reader.read_u64::<BigEndian>()?;
        let vbmeta_size = reader.read_u64::<BigEndian>()?;

        let mut reserved = [0u8; 28];
        reader.read_exact(&mut reserved)?;

        Ok(Self {
            version_major,
            version_minor,
            original_image_size,
            vbmeta_offset,
            vbmeta_size,
            reserved,
        })
    }
}

impl<W: Write> ToWriter<W> for Footer {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer.write_all(&FOOTER_MAGIC)?;
        writer.write_u32::<BigEndian>(self.version_major)?;
        writer.write_u32::<BigEndian>(self.version_minor)?;
        writer.write_u64::<BigEndian>(self.original_image_size)?;
        writer.write_u64::<BigEndian>(self.vbmeta_offset)?;
        writer.write_u64::<BigEndian>(self.vbmeta_size)?;
        writer.write_all(&self.reserved)?;
        Ok(())
    }
}

/// Compute the identity digest of a public key in the AVB binary format. This
/// is the lowercase hex SHA-1 digest that `avbtool info_image` prints and that
/// key maps are indexed by.
pub fn public_key_digest(public_key: &[u8]) -> String {
    hex::encode(Sha1::digest(public_key))
}

/// Parsed AVB structures of a partition image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvbImage {
    pub header: Header,
    /// Only present for appended images (ie. the header follows actual data).
    pub footer: Option<Footer>,
    /// Total size of the image buffer.
    pub image_size: u64,
    /// Location of the vbmeta blob within the image.
    pub vbmeta_offset: u64,
    pub vbmeta_size: u64,
}

/// Read the footer from the last [`Footer::SIZE`] bytes of `data` and check
/// that every offset and size it describes lies within the buffer.
pub fn read_footer(data: &[u8]) -> Result<Footer> {
    let image_size = data.len() as u64;
    let footer_offset = data
        .len()
        .checked_sub(Footer::SIZE)
        .ok_or(Error::TooSmallForFooter(image_size))?;

    let footer = Footer::from_reader(&data[footer_offset..])?;
    let footer_offset = footer_offset as u64;

    if footer.original_image_size > footer_offset {
        return Err(Error::FieldOutOfBounds("original_image_size"));
    } else if footer.vbmeta_offset > footer_offset
        || footer.vbmeta_offset < footer.original_image_size
    {
        return Err(Error::FieldOutOfBounds("vbmeta_offset"));
    } else if footer.vbmeta_size > footer_offset - footer.vbmeta_offset {
        return Err(Error::FieldOutOfBounds("vbmeta_size"));
    }

    Ok(footer)
}

/// Decode a vbmeta blob, returning the header and the number of bytes the
/// header, auth block, and aux block occupy.
fn decode_header(blob: &[u8]) -> Result<(Header, u64)> {
    let mut reader = CountingReader::new(blob);
    let header = Header::from_reader(&mut reader)?;
    let (_, size) = reader.finish();

    Ok((header, size))
}

/// Parse an appended image: the footer at the end of `data` and the vbmeta
/// blob it points to. Fails if there is no footer.
pub fn parse_footer(data: &[u8]) -> Result<(Footer, Header)> {
    let footer = read_footer(data)?;

    let start = footer.vbmeta_offset as usize;
    let end = start + footer.vbmeta_size as usize;
    let (header, _) = decode_header(&data[start..end])?;

    Ok((footer, header))
}

/// Load the vbmeta header and footer from the specified buffer. A footer is
/// present only if the buffer is not a vbmeta partition image (ie. the header
/// follows actual data).
pub fn load_image(data: &[u8]) -> Result<AvbImage> {
    let image_size = data.len() as u64;

    let footer = match read_footer(data) {
        Ok(f) => Some(f),
        Err(Error::InvalidFooterMagic(_) | Error::TooSmallForFooter(_)) => None,
        Err(e) => return Err(e),
    };

    let (header, vbmeta_offset, vbmeta_size) = match &footer {
        Some(f) => {
            let start = f.vbmeta_offset as usize;
            let (header, _) = decode_header(&data[start..][..f.vbmeta_size as usize])?;
            (header, f.vbmeta_offset, f.vbmeta_size)
        }
        None => {
            let (header, size) = decode_header(data)?;
            (header, 0, size)
        }
    };

    Ok(AvbImage {
        header,
        footer,
        image_size,
        vbmeta_offset,
        vbmeta_size,
    })
}

/// Write a vbmeta header to the specified writer. This is meant for writing
/// vbmeta partition images, not appended vbmeta images. The writer must refer
/// to an empty file. Returns the size of the new file.
pub fn write_root_image(writer: impl Write, header: &Header, block_size: u64) -> Result<u64> {
    let mut counting_writer = CountingWriter::new(writer);

    header.to_writer(&mut counting_writer)?;
    padding::write_zeros(&mut counting_writer, block_size)?;

    Ok(counting_writer.stream_position()?)
}

/// Write a vbmeta header and footer after the partition data that has already
/// been written to `writer`. The header starts at the next 4096-byte boundary
/// after [`Footer::original_image_size`] and the footer occupies the last
/// [`Footer::SIZE`] bytes of `image_size`. Returns the size of the new file.
pub fn write_appended_image(
    mut writer: impl Write + Seek,
    header: &Header,
    footer: &mut Footer,
    image_size: u64,
) -> Result<u64> {
    // avbtool hardcodes a 4096 block size for appended non-sparse images.
    const BLOCK_SIZE: u64 = 4096;

    let header_offset = padding::round(footer.original_image_size, BLOCK_SIZE)
        .ok_or(Error::FieldOutOfBounds("header_offset"))?;

    let mut header_buf = Cursor::new(Vec::new());
    header.to_writer(&mut header_buf)?;
    let header_size = header_buf.get_ref().len() as u64;

    let header_end = header_offset
        .checked_add(header_size)
        .ok_or(Error::FieldOutOfBounds("header_end"))?;
    if header_end > image_size {
        return Err(Error::TooSmallForHeader(image_size));
    } else if image_size - header_end < Footer::SIZE as u64 {
        return Err(Error::TooSmallForFooter(image_size));
    }

    writer.seek(SeekFrom::Start(footer.original_image_size))?;
    writer.write_zeros_exact(header_offset - footer.original_image_size)?;
    writer.write_all(header_buf.get_ref())?;

    let footer_offset = image_size - Footer::SIZE as u64;
    writer.write_zeros_exact(footer_offset - header_end)?;

    footer.vbmeta_offset = header_offset;
    footer.vbmeta_size = header_size;
    footer.to_writer(&mut writer)?;

    Ok(image_size)
}
