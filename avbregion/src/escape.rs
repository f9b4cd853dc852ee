// SPDX-FileCopyrightText: 2023 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! serde helpers for byte strings that are usually, but not always, text. AVB
//! property values are arbitrary bytes, so they are serialized as strings with
//! non-UTF-8 bytes escaped as `\xNN`.

use std::fmt;

use bstr::{ByteSlice, ByteVec};
use serde::{Deserializer, Serializer, de::Visitor};

/// Render bytes for display. Printable UTF-8 is kept as-is.
pub fn escape(data: &[u8]) -> String {
    data.escape_bytes().to_string()
}

/// Reverse of [`escape`]. Invalid escape sequences are kept literally.
pub fn unescape(data: &str) -> Vec<u8> {
    Vec::unescape_bytes(data)
}

pub fn serialize<S, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    serializer.serialize_str(&escape(data.as_ref()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EscapedStrVisitor;

    impl Visitor<'_> for EscapedStrVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "an escaped string")
        }

        fn visit_str<E>(self, data: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(unescape(data))
        }
    }

    deserializer.deserialize_str(EscapedStrVisitor)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[test]
    fn unescape_plain() {
        for s in ["", "abc", "你好", "\x00", "\t\r\n"] {
            assert_eq!(unescape(&escape(s.as_bytes())), s.as_bytes());
        }
    }

    #[test]
    fn property_value_serde() {
        #[derive(Deserialize, Serialize)]
        struct Property {
            key: String,
            #[serde(with = "super")]
            value: Vec<u8>,
        }

        let data = Property {
            key: "com.android.build.vendor_boot.fingerprint".to_owned(),
            value: b"Lenovo/TB373FU\xff".to_vec(),
        };
        let serialized = toml_edit::ser::to_string(&data).unwrap();
        assert!(serialized.contains(r"\xFF"));

        let new_data: Property = toml_edit::de::from_str(&serialized).unwrap();
        assert_eq!(data.value, new_data.value);
    }
}
