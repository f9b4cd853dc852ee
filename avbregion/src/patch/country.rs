// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use memchr::memmem;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;
use tracing::debug;

use crate::patch::region::PatchStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid country code: {0:?}")]
    InvalidCode(String),
    #[error("Unknown country code: {0:?}")]
    UnknownCode(String),
    #[error("Unknown image kind: {0:?}")]
    UnknownImageKind(String),
    #[error("Country code field at offset {offset} with size {size} is out of bounds")]
    FieldOutOfBounds { offset: u64, size: usize },
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ImageKind {
    Devinfo,
    Persist,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Devinfo => "devinfo",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "devinfo" => Ok(Self::Devinfo),
            "persist" => Ok(Self::Persist),
            _ => Err(Error::UnknownImageKind(s.to_owned())),
        }
    }
}

/// Where the country code field lives in an image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FieldLocation {
    /// Search the whole image.
    #[default]
    Scan,
    /// The field is at a fixed byte offset.
    Fixed(u64),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CountryFields {
    pub devinfo: FieldLocation,
    pub persist: FieldLocation,
}

impl CountryFields {
    pub fn location(&self, kind: ImageKind) -> FieldLocation {
        match kind {
            ImageKind::Devinfo => self.devinfo,
            ImageKind::Persist => self.persist,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Country {
    pub name: String,
    /// On-disk representation.
    pub encoded: Vec<u8>,
}

/// Two-letter ISO country codes and their on-disk representation, which is
/// `prefix + CODE + suffix`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CountryCodeTable {
    countries: BTreeMap<String, Country>,
    by_encoding: HashMap<Vec<u8>, String>,
}

impl CountryCodeTable {
    pub fn new(
        prefix: &[u8],
        suffix: &[u8],
        names: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut countries = BTreeMap::new();
        let mut by_encoding = HashMap::new();

        for (code, name) in names {
            if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(Error::InvalidCode(code));
            }
            let code = code.to_ascii_uppercase();

            let mut encoded = prefix.to_vec();
            encoded.extend_from_slice(code.as_bytes());
            encoded.extend_from_slice(suffix);

            by_encoding.insert(encoded.clone(), code.clone());
            countries.insert(code, Country { name, encoded });
        }

        Ok(Self {
            countries,
            by_encoding,
        })
    }

    pub fn get(&self, code: &str) -> Option<&Country> {
        self.countries.get(&code.to_ascii_uppercase())
    }

    /// Reverse lookup by the on-disk representation.
    pub fn code_for(&self, encoded: &[u8]) -> Option<&str> {
        self.by_encoding.get(encoded).map(|c| c.as_str())
    }

    /// All entries as `(code, name)`, sorted by display name.
    pub fn sorted_by_name(&self) -> Vec<(&str, &str)> {
        let mut result = self
            .countries
            .iter()
            .map(|(c, country)| (c.as_str(), country.name.as_str()))
            .collect::<Vec<_>>();
        result.sort_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)));
        result
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    /// Size of every encoded code. All codes have the same size.
    fn encoded_len(&self) -> Option<usize> {
        self.countries.values().next().map(|c| c.encoded.len())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CountryMatch {
    pub code: String,
    pub offset: u64,
}

/// Find the country code embedded in an image. When scanning, the earliest
/// occurrence of any known code wins. Returns [`None`] if there is no
/// recognizable code.
pub fn detect_country_code(
    data: &[u8],
    location: FieldLocation,
    table: &CountryCodeTable,
) -> Result<Option<CountryMatch>> {
    let Some(size) = table.encoded_len() else {
        return Ok(None);
    };

    match location {
        FieldLocation::Scan => {
            let found = table
                .countries
                .par_iter()
                .filter_map(|(code, country)| {
                    memmem::find(data, &country.encoded).map(|offset| (offset, code))
                })
                .min();

            Ok(found.map(|(offset, code)| CountryMatch {
                code: code.clone(),
                offset: offset as u64,
            }))
        }
        FieldLocation::Fixed(offset) => {
            let field = usize::try_from(offset)
                .ok()
                .and_then(|o| data.get(o..)?.get(..size))
                .ok_or(Error::FieldOutOfBounds { offset, size })?;

            Ok(table.code_for(field).map(|code| CountryMatch {
                code: code.to_owned(),
                offset,
            }))
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CountryPatch {
    pub data: Vec<u8>,
    pub status: PatchStatus,
    pub previous: Option<String>,
    pub count: usize,
}

/// Replace the country code embedded in an image with `code`. When scanning,
/// every occurrence of the previously detected code is replaced. If no code is
/// detected, the image is returned unchanged.
pub fn patch_country_code(
    data: &[u8],
    location: FieldLocation,
    table: &CountryCodeTable,
    code: &str,
) -> Result<CountryPatch> {
    let target = table
        .get(code)
        .ok_or_else(|| Error::UnknownCode(code.to_owned()))?;

    let unchanged = |previous| CountryPatch {
        data: data.to_vec(),
        status: PatchStatus::Unchanged,
        previous,
        count: 0,
    };

    let Some(found) = detect_country_code(data, location, table)? else {
        debug!("No country code found");
        return Ok(unchanged(None));
    };

    if table.get(&found.code) == Some(target) {
        debug!("Country code is already {}", found.code);
        return Ok(unchanged(Some(found.code)));
    }

    let offsets = match location {
        FieldLocation::Scan => {
            let previous = &table.countries[&found.code].encoded;
            memmem::find_iter(data, previous).collect()
        }
        FieldLocation::Fixed(offset) => vec![offset as usize],
    };

    let mut output = data.to_vec();
    for offset in &offsets {
        output[*offset..][..target.encoded.len()].copy_from_slice(&target.encoded);
    }

    debug!(
        "Replaced {} occurrences of country code {} with {}",
        offsets.len(),
        found.code,
        code.to_ascii_uppercase(),
    );

    Ok(CountryPatch {
        data: output,
        status: PatchStatus::Patched,
        previous: Some(found.code),
        count: offsets.len(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn table() -> CountryCodeTable {
        CountryCodeTable::new(
            b"",
            b"XX",
            [
                ("US", "United States of America"),
                ("AU", "Australia"),
                ("cn", "China"),
            ]
            .map(|(c, n)| (c.to_owned(), n.to_owned())),
        )
        .unwrap()
    }

    #[test]
    fn table_lookup() {
        let table = table();

        assert_eq!(table.get("au").unwrap().encoded, b"AUXX");
        assert_eq!(table.code_for(b"CNXX"), Some("CN"));
        assert_eq!(table.code_for(b"DEXX"), None);
        assert_eq!(
            table.sorted_by_name(),
            [
                ("AU", "Australia"),
                ("CN", "China"),
                ("US", "United States of America"),
            ]
        );

        assert_matches!(
            CountryCodeTable::new(b"", b"", [("USA".to_owned(), String::new())]),
            Err(Error::InvalidCode(_))
        );
    }

    #[test]
    fn earliest_match_wins() {
        let data = b"....USXX....AUXX....";
        let found = detect_country_code(data, FieldLocation::Scan, &table())
            .unwrap()
            .unwrap();

        assert_eq!(found.code, "US");
        assert_eq!(found.offset, 4);
    }

    #[test]
    fn fixed_field() {
        let data = b"AUXX....CNXX";
        let table = table();

        let found = detect_country_code(data, FieldLocation::Fixed(8), &table)
            .unwrap()
            .unwrap();
        assert_eq!(found.code, "CN");

        assert_matches!(
            detect_country_code(data, FieldLocation::Fixed(10), &table),
            Err(Error::FieldOutOfBounds { offset: 10, size: 4 })
        );

        let patch = patch_country_code(data, FieldLocation::Fixed(8), &table, "US").unwrap();
        assert_eq!(patch.data, b"AUXX....USXX");
        assert_eq!(patch.count, 1);
    }

    #[test]
    fn no_code_is_not_an_error() {
        let data = vec![0u8; 64];
        let patch = patch_country_code(&data, FieldLocation::Scan, &table(), "US").unwrap();

        assert_eq!(patch.status, PatchStatus::Unchanged);
        assert_eq!(patch.previous, None);
        assert_eq!(patch.data, data);

        assert_matches!(
            patch_country_code(&data, FieldLocation::Scan, &table(), "ZZ"),
            Err(Error::UnknownCode(_))
        );
    }
}
