/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    cli::{
        avb::{read_image, write_image},
        status, warning,
    },
    config::Config,
    format::avb,
    patch::{
        country::{self, ImageKind},
        region::{self, Region},
    },
};

fn detect_subcommand(cli: &DetectCli, config: &Config) -> Result<()> {
    let data = read_image(&cli.input)?;
    let table = config.country_table()?;
    let location = config.country_fields().location(cli.kind);

    let found = country::detect_country_code(&data, location, &table)
        .with_context(|| format!("Failed to detect country code: {:?}", cli.input))?;

    match found {
        Some(m) => {
            let name = table.get(&m.code).map(|c| c.name.as_str()).unwrap_or_default();
            println!("{} ({name}) at offset {}", m.code, m.offset);
        }
        None => status!("No country code found"),
    }

    Ok(())
}

fn set_country_subcommand(cli: &SetCountryCli, config: &Config) -> Result<()> {
    let data = read_image(&cli.input)?;
    let table = config.country_table()?;
    let location = config.country_fields().location(cli.kind);

    let patch = country::patch_country_code(&data, location, &table, &cli.code)
        .with_context(|| format!("Failed to patch country code: {:?}", cli.input))?;

    match &patch.previous {
        Some(p) if patch.count > 0 => status!(
            "Replaced {} occurrence(s) of {p} with {} in {}",
            patch.count,
            cli.code.to_ascii_uppercase(),
            cli.kind,
        ),
        Some(p) => status!("Country code is already {p}"),
        None => warning!("No country code found in {}", cli.kind),
    }

    if patch.count > 0 || cli.copy_if_unchanged {
        write_image(&cli.output, &patch.data)?;
    }

    Ok(())
}

fn patch_subcommand(cli: &PatchCli, config: &Config) -> Result<()> {
    let mut data = read_image(&cli.input)?;
    let patterns = config.pattern_set()?;

    // Only the partition data is patched. The vbmeta blob and footer are left
    // alone, but the hash in them is no longer valid.
    let footer = avb::read_footer(&data).ok();
    let end = footer
        .as_ref()
        .map_or(data.len(), |f| f.original_image_size as usize);

    let patch = region::patch_region(&data[..end], &patterns, cli.target);

    for slot in &patch.slots {
        status!("Pattern {:?}: {} replacement(s)", slot.name, slot.count);
    }

    if !patch.changed() {
        status!("No {} markers found", cli.target.opposite());

        if !cli.copy_if_unchanged {
            return Ok(());
        }
    } else if footer.is_some() {
        warning!("The AVB footer is now stale. Use the convert command to replace it.");
    }

    data[..end].copy_from_slice(&patch.data);
    write_image(&cli.output, &data)?;

    Ok(())
}

fn countries_subcommand(config: &Config) -> Result<()> {
    let table = config.country_table()?;

    for (code, name) in table.sorted_by_name() {
        println!("{code}  {name}");
    }

    Ok(())
}

pub fn region_main(cli: &RegionCli, config: &Config) -> Result<()> {
    match &cli.command {
        RegionCommand::Detect(c) => detect_subcommand(c, config),
        RegionCommand::SetCountry(c) => set_country_subcommand(c, config),
        RegionCommand::Patch(c) => patch_subcommand(c, config),
        RegionCommand::Countries => countries_subcommand(config),
    }
}

/// Detect the country code in a devinfo or persist image.
#[derive(Debug, Parser)]
struct DetectCli {
    /// Path to input image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Type of image.
    #[arg(short, long, value_name = "KIND", value_parser)]
    kind: ImageKind,
}

/// Replace the country code in a devinfo or persist image.
#[derive(Debug, Parser)]
struct SetCountryCli {
    /// Path to input image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Type of image.
    #[arg(short, long, value_name = "KIND", value_parser)]
    kind: ImageKind,

    /// Two-letter country code.
    #[arg(short, long, value_name = "CODE")]
    code: String,

    /// Path to output image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Write the output even if no country code was replaced.
    #[arg(long)]
    copy_if_unchanged: bool,
}

/// Replace region markers in a partition image.
///
/// If the image has an AVB footer, only the partition data before the vbmeta
/// blob is modified.
#[derive(Debug, Parser)]
struct PatchCli {
    /// Path to input image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Region to convert to (row or prc).
    #[arg(short, long, value_name = "REGION", value_parser)]
    target: Region,

    /// Path to output image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Write the output even if no markers were replaced.
    #[arg(long)]
    copy_if_unchanged: bool,
}

#[derive(Debug, Subcommand)]
enum RegionCommand {
    Detect(DetectCli),
    SetCountry(SetCountryCli),
    Patch(PatchCli),
    /// List known country codes.
    Countries,
}

/// Detect and patch region markers and country codes.
#[derive(Debug, Parser)]
pub struct RegionCli {
    #[command(subcommand)]
    command: RegionCommand,
}
