// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Delegation of footer and vbmeta signing to an external avbtool-compatible
//! program. This crate never constructs a signature itself.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};

use bstr::ByteSlice;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::{
    format::avb::{AlgorithmType, PropertyDescriptor},
    info::AvbInfo,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Image info is missing required field: {0}")]
    MissingField(&'static str),
    #[error("Failed to run signer: {program:?}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Signer {program:?} failed ({status}): {stderr}")]
    CommandFailed {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Parameters for (re)adding a hash footer to a partition image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FooterRequest {
    pub image: PathBuf,
    pub partition_name: String,
    pub partition_size: u64,
    pub rollback_index: u64,
    /// Hex-encoded salt. A random salt is generated by the signer if unset.
    pub salt: Option<String>,
    pub hash_algorithm: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
    pub flags: Option<u32>,
    /// Signing parameters. The footer is unsigned if no key is specified.
    pub algorithm: AlgorithmType,
    pub key: Option<PathBuf>,
}

impl FooterRequest {
    /// Build a request that reproduces the footer described by `info` on the
    /// image at `image`.
    pub fn from_info(image: &Path, info: &AvbInfo) -> Result<Self> {
        let partition_name = info
            .partition_name
            .clone()
            .ok_or(Error::MissingField("partition_name"))?;
        let partition_size = info.footer_partition_size();
        if partition_size == 0 {
            return Err(Error::MissingField("partition_size"));
        }

        Ok(Self {
            image: image.to_owned(),
            partition_name,
            partition_size,
            rollback_index: info.rollback_index,
            salt: info.salt.clone(),
            hash_algorithm: info.hash_algorithm.clone(),
            properties: info.properties.clone(),
            flags: info.flags,
            algorithm: AlgorithmType::None,
            key: None,
        })
    }
}

/// Parameters for signing a vbmeta image whose descriptors have already been
/// composed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VbmetaRequest {
    /// Unsigned vbmeta image to copy descriptors from, in order.
    pub descriptors_image: PathBuf,
    pub output: PathBuf,
    pub algorithm: AlgorithmType,
    pub key: PathBuf,
    pub rollback_index: u64,
    pub rollback_index_location: u32,
    pub flags: u32,
    pub padding_size: u64,
}

pub trait Signer: Sync {
    fn add_hash_footer(&self, request: &FooterRequest) -> Result<()>;

    fn make_vbmeta_image(&self, request: &VbmetaRequest) -> Result<()>;
}

/// Signer that runs an avbtool-compatible command line, eg. `python3
/// avbtool.py`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvbtoolSigner {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl AvbtoolSigner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build the `add_hash_footer` arguments. Property values that are not
    /// UTF-8 are written to temporary files, which must be kept alive until the
    /// command completes.
    fn footer_args(&self, request: &FooterRequest) -> Result<(Vec<OsString>, Vec<NamedTempFile>)> {
        let mut args: Vec<OsString> = vec![
            "add_hash_footer".into(),
            "--image".into(),
            request.image.clone().into(),
            "--partition_size".into(),
            request.partition_size.to_string().into(),
            "--partition_name".into(),
            request.partition_name.clone().into(),
            "--rollback_index".into(),
            request.rollback_index.to_string().into(),
        ];
        let mut temp_files = vec![];

        if let Some(salt) = &request.salt {
            args.push("--salt".into());
            args.push(salt.into());
        }

        if let Some(hash_algorithm) = &request.hash_algorithm {
            args.push("--hash_algorithm".into());
            args.push(hash_algorithm.into());
        }

        for prop in &request.properties {
            match prop.value.to_str() {
                Ok(value) if !value.contains('\0') => {
                    args.push("--prop".into());
                    args.push(format!("{}:{value}", prop.key).into());
                }
                _ => {
                    let mut temp = NamedTempFile::new()?;
                    temp.write_all(&prop.value)?;
                    temp.flush()?;

                    let mut arg = OsString::from(format!("{}:", prop.key));
                    arg.push(temp.path());

                    args.push("--prop_from_file".into());
                    args.push(arg);
                    temp_files.push(temp);
                }
            }
        }

        if let Some(flags) = request.flags {
            args.push("--flags".into());
            args.push(flags.to_string().into());
        }

        if let Some(key) = &request.key {
            args.push("--algorithm".into());
            args.push(request.algorithm.name().into());
            args.push("--key".into());
            args.push(key.into());
        }

        Ok((args, temp_files))
    }

    fn vbmeta_args(request: &VbmetaRequest) -> Vec<OsString> {
        vec![
            "make_vbmeta_image".into(),
            "--output".into(),
            request.output.clone().into(),
            "--algorithm".into(),
            request.algorithm.name().into(),
            "--key".into(),
            request.key.clone().into(),
            "--rollback_index".into(),
            request.rollback_index.to_string().into(),
            "--rollback_index_location".into(),
            request.rollback_index_location.to_string().into(),
            "--flags".into(),
            request.flags.to_string().into(),
            "--padding_size".into(),
            request.padding_size.to_string().into(),
            "--include_descriptors_from_image".into(),
            request.descriptors_image.clone().into(),
        ]
    }

    fn run(&self, args: &[OsString]) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(args);

        debug!("Running signer: {command:?}");

        let output = command.output().map_err(|e| Error::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: output.stderr.to_str_lossy().trim().to_owned(),
            });
        }

        Ok(())
    }
}

impl Signer for AvbtoolSigner {
    fn add_hash_footer(&self, request: &FooterRequest) -> Result<()> {
        let (args, _temp_files) = self.footer_args(request)?;
        self.run(&args)
    }

    fn make_vbmeta_image(&self, request: &VbmetaRequest) -> Result<()> {
        self.run(&Self::vbmeta_args(request))
    }
}

/// Private keys indexed by the lowercase hex SHA-1 digest of their AVB-encoded
/// public key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeySet {
    keys: BTreeMap<String, PathBuf>,
}

impl KeySet {
    pub fn new(keys: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|(digest, path)| (digest.to_ascii_lowercase(), path))
                .collect(),
        }
    }

    pub fn get(&self, digest: &str) -> Option<&Path> {
        self.keys
            .get(&digest.to_ascii_lowercase())
            .map(|p| p.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
