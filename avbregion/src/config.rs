/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Lookup tables for the patchers. These are loaded once by the CLI and passed
//! explicitly to the library functions.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    patch::{
        country::{self, CountryCodeTable, CountryFields, FieldLocation},
        region::{self, PatternSet, PatternSlot},
    },
    signer::{AvbtoolSigner, KeySet},
    util,
};

/// Built-in configuration used when no `--config` is given.
pub const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Invalid region patterns")]
    Patterns(#[from] region::Error),
    #[error("Invalid country code table")]
    Country(#[from] country::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patterns {
    #[serde(with = "hex")]
    pub row: Vec<u8>,
    #[serde(with = "hex")]
    pub prc: Vec<u8>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountryFieldOffsets {
    pub devinfo: Option<u64>,
    pub persist: Option<u64>,
}

fn default_suffix() -> String {
    "XX".to_owned()
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Country {
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(default)]
    pub fields: CountryFieldOffsets,
    pub codes: BTreeMap<String, String>,
}

fn default_signer_program() -> PathBuf {
    PathBuf::from("avbtool")
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signer {
    #[serde(default = "default_signer_program")]
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for Signer {
    fn default() -> Self {
        Self {
            program: default_signer_program(),
            args: vec![],
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub patterns: BTreeMap<String, Patterns>,
    pub country: Country,
    /// Private key paths indexed by public key digest.
    #[serde(default)]
    pub keys: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub signer: Signer,
    /// Directory that relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let mut config: Self = toml_edit::de::from_str(contents)
            .map_err(|e| Error::Parse(path.to_owned(), e))?;
        config.base_dir = util::parent_path(path).to_owned();

        Ok(config)
    }

    /// Load the config from `path` or fall back to the built-in config.
    /// Relative paths in the built-in config are relative to the current
    /// directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let contents =
                    fs::read_to_string(p).map_err(|e| Error::Read(p.to_owned(), e))?;
                Self::parse(&contents, p)
            }
            None => Self::parse(DEFAULT_CONFIG, Path::new("<built-in>")),
        }
    }

    pub fn pattern_set(&self) -> Result<PatternSet> {
        let slots = self
            .patterns
            .iter()
            .map(|(name, p)| PatternSlot::new(name.clone(), p.row.clone(), p.prc.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(PatternSet::new(slots))
    }

    pub fn country_table(&self) -> Result<CountryCodeTable> {
        let table = CountryCodeTable::new(
            self.country.prefix.as_bytes(),
            self.country.suffix.as_bytes(),
            self.country.codes.clone(),
        )?;

        Ok(table)
    }

    pub fn country_fields(&self) -> CountryFields {
        let location = |offset: Option<u64>| offset.map_or(FieldLocation::Scan, FieldLocation::Fixed);

        CountryFields {
            devinfo: location(self.country.fields.devinfo),
            persist: location(self.country.fields.persist),
        }
    }

    pub fn key_set(&self) -> KeySet {
        KeySet::new(
            self.keys
                .iter()
                .map(|(digest, path)| (digest.clone(), self.base_dir.join(path))),
        )
    }

    pub fn signer(&self) -> AvbtoolSigner {
        AvbtoolSigner::new(self.signer.program.clone(), self.signer.args.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn built_in_config() {
        let config = Config::load(None).unwrap();

        let patterns = config.pattern_set().unwrap();
        assert_eq!(patterns.slots().len(), 2);

        let table = config.country_table().unwrap();
        assert_eq!(table.get("AU").unwrap().encoded, b"AUXX");
        assert_eq!(table.sorted_by_name()[0], ("AR", "Argentina"));

        assert_eq!(config.country_fields(), CountryFields::default());
        assert!(
            config
                .key_set()
                .get("cdbb77177f731920bbe0a0f94f84d9038ae0617d")
                .is_some()
        );
    }

    #[test]
    fn mismatched_patterns() {
        let config = Config::parse(
            r#"
            [patterns.dot]
            row = "2e524f57"
            prc = "2e5052"

            [country.codes]
            US = "United States of America"
            "#,
            Path::new("test.toml"),
        )
        .unwrap();

        assert_matches!(
            config.pattern_set(),
            Err(Error::Patterns(region::Error::MismatchedLength { .. }))
        );
        assert_eq!(config.signer().program, Path::new("avbtool"));
        assert_eq!(config.base_dir, Path::new("."));
    }

    #[test]
    fn fixed_field_offsets() {
        let config = Config::parse(
            r#"
            patterns = {}

            [country]
            suffix = ""
            fields = { devinfo = 512 }
            codes = { US = "United States of America" }
            "#,
            Path::new("conf/test.toml"),
        )
        .unwrap();

        assert_eq!(config.country_fields().devinfo, FieldLocation::Fixed(512));
        assert_eq!(config.country_fields().persist, FieldLocation::Scan);
        assert_eq!(config.country_table().unwrap().get("US").unwrap().encoded, b"US");
        assert_eq!(config.base_dir, Path::new("conf"));
    }
}
