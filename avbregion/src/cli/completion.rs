/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{io, path::PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::{cli::args::Cli, util};

pub fn completion_main(cli: &CompletionCli) -> Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_owned();

    match &cli.output {
        Some(path) => {
            let mut buf = vec![];
            clap_complete::generate(cli.shell, &mut command, name, &mut buf);

            util::write_atomic(path, &buf)
                .with_context(|| format!("Failed to write completions: {path:?}"))?;
        }
        None => clap_complete::generate(cli.shell, &mut command, name, &mut io::stdout()),
    }

    Ok(())
}

/// Generate shell tab completion configs.
#[derive(Debug, Parser)]
pub struct CompletionCli {
    /// The shell to generate completions for.
    #[arg(short, long, value_name = "SHELL", value_parser)]
    pub shell: Shell,

    /// Write completions to a file instead of stdout.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: Option<PathBuf>,
}
