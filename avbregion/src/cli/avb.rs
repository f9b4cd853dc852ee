/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};

use crate::{
    cli::{status, warning},
    config::Config,
    format::avb,
    info::{self, AvbInfo},
    patch::{
        chain::{self, Target},
        rollback::{self, RollbackStatus},
    },
    signer::{FooterRequest, Signer},
    util,
};

pub(crate) fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read image: {path:?}"))
}

pub(crate) fn read_info(path: &Path, data: &[u8]) -> Result<AvbInfo> {
    info::extract_info(data).with_context(|| format!("Failed to load AVB image: {path:?}"))
}

pub(crate) fn write_image(path: &Path, data: &[u8]) -> Result<()> {
    util::write_atomic(path, data).with_context(|| format!("Failed to write image: {path:?}"))
}

/// Write AVB information to TOML file.
fn write_info(path: &Path, info: &AvbInfo) -> Result<()> {
    let data = toml_edit::ser::to_string_pretty(info)
        .with_context(|| format!("Failed to serialize AVB info TOML: {path:?}"))?;
    util::write_atomic(path, data.as_bytes())
        .with_context(|| format!("Failed to write AVB info TOML: {path:?}"))?;

    Ok(())
}

/// Write `data` to `path`, replace its footer using the signer, and return the
/// final contents. Nothing is written to `path` if signing fails.
pub(crate) fn write_and_refooter(
    path: &Path,
    data: &[u8],
    request: &FooterRequest,
    signer: &dyn Signer,
) -> Result<Vec<u8>> {
    let mut temp_file =
        util::create_temp_file(path).with_context(|| format!("Failed to create file: {path:?}"))?;
    temp_file
        .write_all(data)
        .and_then(|_| temp_file.flush())
        .with_context(|| format!("Failed to write image: {:?}", temp_file.path()))?;

    let request = FooterRequest {
        image: temp_file.path().to_owned(),
        ..request.clone()
    };
    signer
        .add_hash_footer(&request)
        .with_context(|| format!("Failed to add hash footer: {path:?}"))?;

    let new_data = read_image(temp_file.path())?;
    avb::parse_footer(&new_data)
        .with_context(|| format!("Signer produced invalid AVB image: {path:?}"))?;

    temp_file
        .persist(path)
        .with_context(|| format!("Failed to move image into place: {path:?}"))?;

    Ok(new_data)
}

fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let data = read_image(&cli.input)?;
    let info = read_info(&cli.input, &data)?;

    let text = toml_edit::ser::to_string_pretty(&info).context("Failed to serialize AVB info")?;
    print!("{text}");

    if cli.header {
        let image = avb::load_image(&data)?;
        println!("{:#?}", image.header);
    }

    if let Some(path) = &cli.output_info {
        write_info(path, &info)?;
    }

    Ok(())
}

fn rebuild_subcommand(cli: &RebuildCli, config: &Config) -> Result<()> {
    let original = read_image(&cli.original)?;

    let chain_data = cli
        .chain
        .iter()
        .map(|c| read_image(&c.path))
        .collect::<Result<Vec<_>>>()?;
    let hash_data = cli
        .hash
        .iter()
        .map(|p| read_image(p))
        .collect::<Result<Vec<_>>>()?;

    let targets = cli
        .chain
        .iter()
        .zip(&chain_data)
        .map(|(c, data)| Target::chained(data, c.rollback_index_location))
        .chain(hash_data.iter().map(|data| Target::hash(data)))
        .collect::<Vec<_>>();

    let signer = config.signer();
    let vbmeta = chain::rebuild_vbmeta(&original, &targets, &config.key_set(), Some(&signer))
        .with_context(|| format!("Failed to rebuild vbmeta: {:?}", cli.original))?;

    write_image(&cli.output, &vbmeta)?;

    status!(
        "Rebuilt vbmeta with {} target(s): {:?}",
        targets.len(),
        cli.output,
    );

    Ok(())
}

/// Sign a rollback-patched image again with the key it was originally signed
/// with and write it to `path`.
fn resign_image(path: &Path, data: &[u8], config: &Config) -> Result<Vec<u8>> {
    let info = read_info(path, data)?;
    let keys = config.key_set();
    let signer = config.signer();

    let Some(digest) = &info.public_key_digest else {
        bail!("Image is not signed: {path:?}");
    };

    if info.data_size.is_none() {
        // Standalone vbmeta image. Recomposing without targets signs it again.
        let vbmeta = chain::rebuild_vbmeta(data, &[], &keys, Some(&signer))
            .with_context(|| format!("Failed to re-sign vbmeta: {path:?}"))?;
        write_image(path, &vbmeta)?;
        return Ok(vbmeta);
    }

    let key = keys
        .get(digest)
        .with_context(|| format!("No signing key known for public key digest {digest}"))?;

    let mut request = FooterRequest::from_info(path, &info)?;
    request.algorithm = info.algorithm;
    request.key = Some(key.to_owned());

    // Replacing the footer requires the original partition data only.
    let size = info.data_size.unwrap_or_default() as usize;

    write_and_refooter(path, &data[..size], &request, &signer)
}

fn rollback_subcommand(cli: &RollbackCli, config: &Config) -> Result<()> {
    let data = read_image(&cli.input)?;

    let index = if let Some(i) = cli.index {
        i
    } else if let Some(p) = &cli.reference {
        let reference = read_image(p)?;
        rollback::rollback_index(&reference)
            .with_context(|| format!("Failed to load AVB image: {p:?}"))?
    } else {
        bail!("Either --index or --reference must be specified");
    };

    let patch = rollback::patch_rollback(&data, index)
        .with_context(|| format!("Failed to patch rollback index: {:?}", cli.input))?;

    if !patch.changed {
        status!("Rollback index is already {index}");
    } else {
        status!("Rollback index: {} -> {index}", patch.previous);
    }

    if patch.signature_stale && cli.resign {
        resign_image(&cli.output, &patch.data, config)?;
        status!("Signed image again: {:?}", cli.output);
    } else {
        if patch.signature_stale {
            warning!("The image signature is no longer valid. Use --resign to sign it again.");
        }
        write_image(&cli.output, &patch.data)?;
    }

    Ok(())
}

fn compare_rollback_subcommand(cli: &CompareRollbackCli) -> Result<()> {
    let current = read_image(&cli.current)?;
    let new = read_image(&cli.new)?;

    let comparison =
        rollback::compare_rollback(&current, &new).context("Failed to compare rollback indices")?;

    println!("Current rollback index: {}", comparison.current);
    println!("New rollback index: {}", comparison.new);

    match comparison.status {
        RollbackStatus::Match => status!("Rollback indices match"),
        RollbackStatus::Upgrade => status!("New image has a higher rollback index"),
        RollbackStatus::Downgrade => {
            warning!(
                "New image would trip anti-rollback protection. Required index: {}",
                comparison.required,
            );

            if let Some(output) = &cli.output {
                let patch = rollback::patch_rollback(&new, comparison.required)?;
                write_image(output, &patch.data)?;
                status!("Wrote patched image: {output:?}");

                if patch.signature_stale {
                    warning!("The patched image must be signed again before use.");
                }
            }
        }
    }

    Ok(())
}

pub fn avb_main(cli: &AvbCli, config: &Config) -> Result<()> {
    match &cli.command {
        AvbCommand::Info(c) => info_subcommand(c),
        AvbCommand::Rebuild(c) => rebuild_subcommand(c, config),
        AvbCommand::Rollback(c) => rollback_subcommand(c, config),
        AvbCommand::CompareRollback(c) => compare_rollback_subcommand(c),
    }
}

/// Image for a chained partition with an optional rollback index location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainArg {
    pub path: PathBuf,
    pub rollback_index_location: Option<u32>,
}

impl FromStr for ChainArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((path, location)) = s.rsplit_once(':') {
            if let Ok(l) = location.parse() {
                return Ok(Self {
                    path: PathBuf::from(path),
                    rollback_index_location: Some(l),
                });
            }
        }

        Ok(Self {
            path: PathBuf::from(s),
            rollback_index_location: None,
        })
    }
}

/// Display AVB information needed to recreate an image's footer.
#[derive(Debug, Parser)]
struct InfoCli {
    /// Path to input AVB image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Path to output AVB info TOML.
    #[arg(long, value_name = "FILE", value_parser)]
    output_info: Option<PathBuf>,

    /// Also dump the full vbmeta header.
    #[arg(long)]
    header: bool,
}

/// Rebuild a vbmeta image for modified partition images.
///
/// Chain descriptors for the chained images are replaced in place or appended.
/// Hash descriptors from the hash images replace the descriptors for the same
/// partitions. All other descriptors are preserved.
///
/// If the original vbmeta image is signed, it is signed again using the key
/// from the config's key map that matches the original public key.
#[derive(Debug, Parser)]
struct RebuildCli {
    /// Path to original vbmeta image.
    #[arg(long, value_name = "FILE", value_parser)]
    original: PathBuf,

    /// Image signed with its own key.
    ///
    /// The rollback index location can be specified as <FILE>:<LOCATION> for
    /// partitions that have no chain descriptor in the original vbmeta image.
    #[arg(long, value_name = "FILE[:LOCATION]", value_parser)]
    chain: Vec<ChainArg>,

    /// Image whose hash descriptor should be included.
    #[arg(long, value_name = "FILE", value_parser)]
    hash: Vec<PathBuf>,

    /// Path to output vbmeta image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,
}

/// Set the rollback index of an AVB image.
#[derive(Debug, Parser)]
#[command(group = ArgGroup::new("target").required(true))]
struct RollbackCli {
    /// Path to input AVB image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// New rollback index.
    #[arg(long, value_name = "INDEX", group = "target")]
    index: Option<u64>,

    /// Use the rollback index of another AVB image.
    #[arg(long, value_name = "FILE", value_parser, group = "target")]
    reference: Option<PathBuf>,

    /// Path to output AVB image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Sign the image again if it was signed.
    ///
    /// The private key is looked up in the config's key map.
    #[arg(long)]
    resign: bool,
}

/// Compare the rollback indices of the current and new images.
#[derive(Debug, Parser)]
struct CompareRollbackCli {
    /// Image currently installed on the device.
    #[arg(long, value_name = "FILE", value_parser)]
    current: PathBuf,

    /// Image from the new firmware.
    #[arg(long, value_name = "FILE", value_parser)]
    new: PathBuf,

    /// Write a copy of the new image with the required rollback index.
    ///
    /// Only written if the new image would be a downgrade.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum AvbCommand {
    #[command(alias = "dump")]
    Info(InfoCli),
    Rebuild(RebuildCli),
    Rollback(RollbackCli),
    CompareRollback(CompareRollbackCli),
}

/// Inspect AVB images and rebuild vbmeta images.
#[derive(Debug, Parser)]
pub struct AvbCli {
    #[command(subcommand)]
    command: AvbCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chain_arg() {
        assert_eq!(
            "vendor_boot.img:3".parse::<ChainArg>().unwrap(),
            ChainArg {
                path: PathBuf::from("vendor_boot.img"),
                rollback_index_location: Some(3),
            }
        );
        assert_eq!(
            r"C:\images\boot.img".parse::<ChainArg>().unwrap(),
            ChainArg {
                path: PathBuf::from(r"C:\images\boot.img"),
                rollback_index_location: None,
            }
        );
    }
}
