// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Text encodings supported by the file services.
//!
//! Only BOM-distinguishable Unicode encodings are supported. Decoding is lossy (invalid sequences
//! become U+FFFD) so a model can always be opened; encoding is exact.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

/// How many leading bytes are inspected when sniffing for binary content.
/// Enough leading bytes to recognize any supported BOM.
pub const BOM_MAX_LEN: usize = UTF8_BOM.len();

const BINARY_SNIFF_LEN: usize = 512;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Utf8Bom => "utf8bom",
            Self::Utf16Le => "utf16le",
            Self::Utf16Be => "utf16be",
        }
    }

    pub fn bom(self) -> &'static [u8] {
        match self {
            Self::Utf8 => &[],
            Self::Utf8Bom => UTF8_BOM,
            Self::Utf16Le => UTF16LE_BOM,
            Self::Utf16Be => UTF16BE_BOM,
        }
    }

    fn is_utf16(self) -> bool {
        matches!(self, Self::Utf16Le | Self::Utf16Be)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown encoding: {0:?}")]
pub struct UnknownEncoding(pub String);

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "utf8" => Ok(Self::Utf8),
            "utf8bom" => Ok(Self::Utf8Bom),
            "utf16le" => Ok(Self::Utf16Le),
            "utf16be" => Ok(Self::Utf16Be),
            _ => Err(UnknownEncoding(s.to_owned())),
        }
    }
}

pub fn detect_by_bom(bytes: &[u8]) -> Option<Encoding> {
    if bytes.starts_with(UTF8_BOM) {
        Some(Encoding::Utf8Bom)
    } else if bytes.starts_with(UTF16LE_BOM) {
        Some(Encoding::Utf16Le)
    } else if bytes.starts_with(UTF16BE_BOM) {
        Some(Encoding::Utf16Be)
    } else {
        None
    }
}

/// Heuristic binary check: a NUL byte near the start of a file that is not UTF-16.
pub fn looks_binary(bytes: &[u8]) -> bool {
    if detect_by_bom(bytes).is_some_and(Encoding::is_utf16) {
        return false;
    }
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    memchr::memchr(0, head).is_some()
}

/// Decodes file bytes. A BOM always wins over the preferred encoding.
pub fn decode(bytes: &[u8], preferred: Option<Encoding>) -> (String, Encoding) {
    let encoding = detect_by_bom(bytes).or(preferred).unwrap_or_default();
    let body = bytes.strip_prefix(encoding.bom()).unwrap_or(bytes);

    let text = match encoding {
        Encoding::Utf8 | Encoding::Utf8Bom => String::from_utf8_lossy(body).into_owned(),
        Encoding::Utf16Le => decode_utf16(body, u16::from_le_bytes),
        Encoding::Utf16Be => decode_utf16(body, u16::from_be_bytes),
    };
    (text, encoding)
}

fn decode_utf16(body: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = body.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

pub fn encode(text: &str, encoding: Encoding) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 3);
    out.extend_from_slice(encoding.bom());
    match encoding {
        Encoding::Utf8 | Encoding::Utf8Bom => out.extend_from_slice(text.as_bytes()),
        Encoding::Utf16Le => {
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        Encoding::Utf16Be => {
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
        }
    }
    out
}

/// Picks the encoding a write should use.
///
/// Writing plain UTF-8 over a file that starts with a UTF-8 BOM keeps the BOM unless the caller
/// explicitly asked to overwrite the encoding.
pub fn resolve_write_encoding(
    existing: Option<&[u8]>,
    requested: Encoding,
    overwrite_encoding: bool,
) -> Encoding {
    if overwrite_encoding || requested != Encoding::Utf8 {
        return requested;
    }
    match existing.and_then(detect_by_bom) {
        Some(Encoding::Utf8Bom) => Encoding::Utf8Bom,
        _ => requested,
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, looks_binary, resolve_write_encoding, Encoding};

    #[test]
    fn bom_wins_over_preferred_encoding() {
        let bytes = encode("héllo", Encoding::Utf16Le);
        let (text, encoding) = decode(&bytes, Some(Encoding::Utf8));
        assert_eq!(text, "héllo");
        assert_eq!(encoding, Encoding::Utf16Le);
    }

    #[test]
    fn preferred_encoding_is_used_without_bom() {
        let (text, encoding) = decode(b"plain", Some(Encoding::Utf8));
        assert_eq!(text, "plain");
        assert_eq!(encoding, Encoding::Utf8);

        let (_, encoding) = decode(b"plain", None);
        assert_eq!(encoding, Encoding::Utf8);
    }

    #[test]
    fn utf8_bom_is_stripped_and_restored() {
        let bytes = encode("x", Encoding::Utf8Bom);
        assert_eq!(bytes, vec![0xEF, 0xBB, 0xBF, b'x']);
        assert_eq!(decode(&bytes, None), ("x".to_owned(), Encoding::Utf8Bom));
    }

    #[test]
    fn nul_bytes_mark_content_as_binary_unless_utf16() {
        assert!(looks_binary(b"ab\0cd"));
        assert!(!looks_binary(b"abcd"));
        assert!(!looks_binary(&encode("ab", Encoding::Utf16Be)));
    }

    #[test]
    fn utf8_write_preserves_existing_bom() {
        let existing = encode("old", Encoding::Utf8Bom);
        assert_eq!(
            resolve_write_encoding(Some(&existing), Encoding::Utf8, false),
            Encoding::Utf8Bom
        );
        assert_eq!(
            resolve_write_encoding(Some(&existing), Encoding::Utf8, true),
            Encoding::Utf8
        );
        assert_eq!(resolve_write_encoding(None, Encoding::Utf8, false), Encoding::Utf8);
    }

    #[test]
    fn encoding_names_parse_leniently() {
        assert_eq!("UTF-8".parse::<Encoding>(), Ok(Encoding::Utf8));
        assert_eq!("utf16_le".parse::<Encoding>(), Ok(Encoding::Utf16Le));
        assert!("latin1".parse::<Encoding>().is_err());
    }
}
