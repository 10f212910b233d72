//! SHA-256 verification of downloaded archives.
//!
//! The archive host publishes one companion file per archive:
//!
//! ```text
//! d7a8fbb307d7809469ca9abcb0082e4f8d5651e46d3cdb762d02d0bf37c9e592  ETHUSDT-15m-2024-01-01.zip
//! ```
//!
//! Verification never fails with an error. A digest that does not match, or
//! companion text that cannot be read as a digest, is a [`ChecksumVerdict`]
//! the caller records as data.

use sha2::{Digest, Sha256};
use thiserror::Error;

const DIGEST_HEX_LEN: usize = 64;

/// Why companion text could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumFormatError {
    #[error("empty checksum text")]
    Empty,

    #[error("digest has {0} characters, expected 64")]
    BadLength(usize),

    #[error("digest contains non-hex characters")]
    NotHex,
}

/// Parsed `<hex-digest>  <filename>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumLine {
    /// Lowercase hex digest.
    pub digest: String,
    pub file_name: Option<String>,
}

/// Outcome of comparing bytes against published checksum text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumVerdict {
    Match { digest: String },
    Mismatch { expected: String, actual: String },
    Malformed { reason: ChecksumFormatError, actual: String },
}

impl ChecksumVerdict {
    /// True only when the digests agree.
    pub fn is_match(&self) -> bool {
        matches!(self, ChecksumVerdict::Match { .. })
    }

    /// Digest computed over the bytes, whatever the verdict.
    pub fn actual(&self) -> &str {
        match self {
            ChecksumVerdict::Match { digest } => digest,
            ChecksumVerdict::Mismatch { actual, .. } | ChecksumVerdict::Malformed { actual, .. } => {
                actual
            }
        }
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn compute_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parse checksum companion text. Only the first line is considered.
pub fn parse_checksum_text(text: &str) -> Result<ChecksumLine, ChecksumFormatError> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(ChecksumFormatError::Empty)?;

    let mut parts = line.split_whitespace();
    let digest = parts.next().ok_or(ChecksumFormatError::Empty)?;
    if digest.len() != DIGEST_HEX_LEN {
        return Err(ChecksumFormatError::BadLength(digest.len()));
    }
    if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ChecksumFormatError::NotHex);
    }

    // sha256sum marks binary mode with a leading '*'
    let file_name = parts
        .next()
        .map(|name| name.trim_start_matches('*').to_string());

    Ok(ChecksumLine {
        digest: digest.to_ascii_lowercase(),
        file_name,
    })
}

/// Compare `bytes` against the published `checksum_text`, case-insensitively.
pub fn verify(bytes: &[u8], checksum_text: &str) -> ChecksumVerdict {
    let actual = compute_sha256(bytes);
    match parse_checksum_text(checksum_text) {
        Ok(line) if line.digest == actual => ChecksumVerdict::Match { digest: actual },
        Ok(line) => ChecksumVerdict::Mismatch {
            expected: line.digest,
            actual,
        },
        Err(reason) => ChecksumVerdict::Malformed { reason, actual },
    }
}

/// Compare `bytes` against an already-known digest (e.g. a cache sidecar).
pub fn matches_digest(bytes: &[u8], digest: &str) -> bool {
    compute_sha256(bytes).eq_ignore_ascii_case(digest.trim())
}
