/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use bstr::ByteSlice;
use clap::Parser;

use crate::{
    cli::{
        avb::{read_image, read_info, write_and_refooter},
        status, warning,
    },
    config::Config,
    format::avb::{self, Descriptor},
    patch::{
        chain::{self, Target},
        region::{self, Region},
    },
    signer::FooterRequest,
    util,
};

const FINGERPRINT_KEY: &str = "com.android.build.vendor_boot.fingerprint";

pub fn convert_main(cli: &ConvertCli, config: &Config) -> Result<()> {
    let patterns = config.pattern_set()?;
    let keys = config.key_set();
    let signer = config.signer();

    let vendor_boot = read_image(&cli.vendor_boot)?;
    let vbmeta = read_image(&cli.vbmeta)?;

    let info = read_info(&cli.vendor_boot, &vendor_boot)?;
    let Some(data_size) = info.data_size else {
        bail!("Image has no AVB footer: {:?}", cli.vendor_boot);
    };

    if let Some(model) = &cli.device_model {
        match info.property(FINGERPRINT_KEY) {
            Some(fingerprint) => {
                status!("Firmware fingerprint: {}", fingerprint.as_bstr());

                if fingerprint.find(model).is_none() {
                    bail!("Firmware is not for device model {model:?}");
                }
            }
            None => warning!("{FINGERPRINT_KEY} property not found; skipping model check"),
        }
    }

    status!("Converting vendor_boot to {}", cli.target);

    let patch = region::patch_region(&vendor_boot[..data_size as usize], &patterns, cli.target);
    if !patch.changed() {
        if cli.skip_if_unchanged {
            status!("No {} markers found; nothing to do", cli.target.opposite());
            return Ok(());
        }
        warning!("No {} markers found", cli.target.opposite());
    } else {
        status!("Replaced {} region marker(s)", patch.count);
    }

    // Partitions chained from vbmeta must keep a signed footer. Everything else
    // gets an unsigned footer whose hash descriptor is copied into vbmeta.
    let partition_name = info.partition_name.as_deref().unwrap_or_default();
    let vbmeta_header = avb::load_image(&vbmeta)
        .with_context(|| format!("Failed to load AVB image: {:?}", cli.vbmeta))?
        .header;
    let is_chained = vbmeta_header.descriptors.iter().any(|d| {
        matches!(d, Descriptor::ChainPartition(c) if c.partition_name == partition_name)
    });

    let mut request = FooterRequest::from_info(&cli.vendor_boot, &info)?;
    if is_chained {
        let digest = info
            .public_key_digest
            .as_deref()
            .context("Chained partition image is not signed")?;
        let key = keys
            .get(digest)
            .with_context(|| format!("No signing key known for public key digest {digest}"))?;

        request.algorithm = info.algorithm;
        request.key = Some(key.to_owned());
    }

    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create directory: {:?}", cli.output_dir))?;

    let vendor_boot_out = cli.output_dir.join("vendor_boot.img");
    let vbmeta_out = cli.output_dir.join("vbmeta.img");

    // The new vbmeta is computed before anything is written so that a failure
    // cannot leave a mismatched pair behind.
    let new_vendor_boot = {
        let staging = cli.output_dir.join(".vendor_boot.img.staging");
        let data = write_and_refooter(&staging, &patch.data, &request, &signer)?;
        fs::remove_file(&staging)
            .with_context(|| format!("Failed to remove file: {staging:?}"))?;
        data
    };

    status!("Added hash footer for {partition_name:?}");

    let target = if is_chained {
        Target::chained(&new_vendor_boot, None)
    } else {
        Target::hash(&new_vendor_boot)
    };
    let new_vbmeta = chain::rebuild_vbmeta(&vbmeta, &[target], &keys, Some(&signer))
        .with_context(|| format!("Failed to rebuild vbmeta: {:?}", cli.vbmeta))?;

    // Either both images are written or neither is.
    util::write_atomic_all(&[
        (vendor_boot_out.as_path(), new_vendor_boot.as_slice()),
        (vbmeta_out.as_path(), new_vbmeta.as_slice()),
    ])
    .with_context(|| format!("Failed to write images to {:?}", cli.output_dir))?;

    status!("Wrote {vendor_boot_out:?} and {vbmeta_out:?}");

    Ok(())
}

/// Convert the region of a vendor_boot image and rebuild vbmeta to match.
///
/// The region markers in the vendor_boot partition data are replaced, the AVB
/// footer is added again via the configured signer with the original
/// parameters, and the vbmeta image is rebuilt to authenticate the new
/// vendor_boot image.
#[derive(Debug, Parser)]
pub struct ConvertCli {
    /// Path to original vendor_boot image.
    #[arg(long, value_name = "FILE", value_parser)]
    vendor_boot: PathBuf,

    /// Path to original vbmeta image.
    #[arg(long, value_name = "FILE", value_parser)]
    vbmeta: PathBuf,

    /// Region to convert to (row or prc).
    #[arg(short, long, value_name = "REGION", value_parser)]
    target: Region,

    /// Directory to write vendor_boot.img and vbmeta.img to.
    #[arg(long, value_name = "DIR", value_parser)]
    output_dir: PathBuf,

    /// Abort if the firmware fingerprint does not contain this model name.
    #[arg(long, value_name = "MODEL")]
    device_model: Option<String>,

    /// Don't write anything if no region markers were found.
    #[arg(long)]
    skip_if_unchanged: bool,
}
