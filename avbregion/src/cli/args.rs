/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::{
    cli::{avb, completion, convert, region},
    config::Config,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Message only.
    #[default]
    Short,
    /// Level, target, and message.
    Medium,
    /// Timestamp, level, thread, target, and message.
    Long,
}

/// Set up the global tracing subscriber. Log messages go to stderr so that they
/// don't interfere with command output.
pub fn init_logging(log_level: LogLevel, log_format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::from(log_level));

    match log_format {
        LogFormat::Short => builder
            .without_time()
            .with_level(false)
            .with_target(false)
            .init(),
        LogFormat::Medium => builder.without_time().init(),
        LogFormat::Long => builder.with_thread_names(true).init(),
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Avb(avb::AvbCli),
    Region(region::RegionCli),
    Convert(convert::ConvertCli),
    Completion(completion::CompletionCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file with region patterns, country codes, and keys.
    ///
    /// The built-in config is used if this is not specified.
    #[arg(long, global = true, value_name = "FILE", value_parser)]
    pub config: Option<PathBuf>,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", default_value_t, value_enum)]
    pub log_level: LogLevel,

    /// Output format for log messages.
    #[arg(long, global = true, value_name = "FORMAT", default_value_t, value_enum)]
    pub log_format: LogFormat,
}

pub fn main(logging_initialized: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level, cli.log_format);
    logging_initialized.store(true, Ordering::SeqCst);

    if let Command::Completion(c) = &cli.command {
        return completion::completion_main(c);
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Command::Avb(c) => avb::avb_main(&c, &config),
        Command::Region(c) => region::region_main(&c, &config),
        Command::Convert(c) => convert::convert_main(&c, &config),
        Command::Completion(c) => completion::completion_main(&c),
    }
}
