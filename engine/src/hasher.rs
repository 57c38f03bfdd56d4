//! Content hashing of row data.
//!
//! The digest is the change-detection fingerprint (`mdv`) stored next to each
//! row. Columns are fed in name order, `NULL` is written as a fixed tag and
//! other values go through [`canonical_text`], so the digest only depends on
//! the row's logical content. Every name and value is length-prefixed, so no
//! string content can pass for a column boundary.

use crate::metadata::{canonical_text, RowData};
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const NULL_TAG: u8 = b'N';
const VALUE_TAG: u8 = b'V';

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum DigestAlgorithm {
    /// 128-bit MD5
    #[default]
    Md5,
    /// 160-bit SHA-1
    Sha1,
    /// 256-bit SHA-256
    Sha256,
}

impl DigestAlgorithm {
    /// Parse an algorithm name such as `MD5`, `SHA-1` or `sha256`.
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "MD5" => Ok(DigestAlgorithm::Md5),
            "SHA1" => Ok(DigestAlgorithm::Sha1),
            "SHA256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(Error::Config(format!("unsupported digest algorithm: {name}"))),
        }
    }

    /// Hex digest of the empty input.
    pub fn empty_digest(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "d41d8cd98f00b204e9800998ecf8427e",
            DigestAlgorithm::Sha1 => "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            DigestAlgorithm::Sha256 => {
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            }
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DigestAlgorithm::from_name(s)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Md5 => write!(f, "MD5"),
            DigestAlgorithm::Sha1 => write!(f, "SHA-1"),
            DigestAlgorithm::Sha256 => write!(f, "SHA-256"),
        }
    }
}

/// Deterministic digest of row data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentHasher {
    algorithm: DigestAlgorithm,
}

impl ContentHasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Build a hasher from an algorithm name. Unknown names are a
    /// configuration error.
    pub fn from_name(name: &str) -> Result<Self> {
        DigestAlgorithm::from_name(name).map(Self::new)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Hex digest of `row`. An absent row hashes like an empty one.
    pub fn hash(&self, row: Option<&RowData>) -> String {
        let bytes = row.map(encode_row).unwrap_or_default();
        match self.algorithm {
            DigestAlgorithm::Md5 => format!("{:x}", md5::compute(&bytes)),
            DigestAlgorithm::Sha1 => hex::encode(Sha1::digest(&bytes)),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(&bytes)),
        }
    }

    /// Digest of the empty row.
    pub fn empty_digest(&self) -> &'static str {
        self.algorithm.empty_digest()
    }
}

// BTreeMap iteration is already key ordered.
fn encode_row(row: &RowData) -> Vec<u8> {
    let mut buf = Vec::new();
    for (column, value) in row {
        put_prefixed(&mut buf, column.as_bytes());
        match value {
            Value::Null => buf.push(NULL_TAG),
            other => {
                buf.push(VALUE_TAG);
                put_prefixed(&mut buf, canonical_text(other).as_bytes());
            }
        }
    }
    buf
}

fn put_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    buf.extend_from_slice(bytes);
}
