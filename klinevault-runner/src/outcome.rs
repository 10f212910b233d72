//! Per-archive fetch outcomes.

use serde::{Deserialize, Serialize};

/// Where verified bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Network,
    Cache,
}

/// How much the checksum companion vouched for the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumStatus {
    /// Digest published and equal.
    Matched,
    /// Host has no companion for this archive (HTTP 404).
    Unavailable,
    /// Verification disabled by configuration.
    Skipped,
}

/// Terminal result for one archive in one plan execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Verified {
        bytes: Vec<u8>,
        source: Source,
        checksum: ChecksumStatus,
    },
    ChecksumMismatch {
        expected: String,
        actual: String,
    },
    /// The host does not publish this archive.
    NotFound,
    /// Retries exhausted, or the circuit breaker refused the request (`attempts == 0`).
    TransientFailure {
        attempts: u32,
        last_error: String,
    },
    /// Client error other than 404, not retried.
    Rejected {
        status: u16,
    },
    Cancelled,
}

/// Outcome discriminant without payload, for counting and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Verified,
    ChecksumMismatch,
    NotFound,
    TransientFailure,
    Rejected,
    Cancelled,
}

impl FetchOutcome {
    /// Payload-free discriminant, for counting and comparing runs.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            FetchOutcome::Verified { .. } => OutcomeKind::Verified,
            FetchOutcome::ChecksumMismatch { .. } => OutcomeKind::ChecksumMismatch,
            FetchOutcome::NotFound => OutcomeKind::NotFound,
            FetchOutcome::TransientFailure { .. } => OutcomeKind::TransientFailure,
            FetchOutcome::Rejected { .. } => OutcomeKind::Rejected,
            FetchOutcome::Cancelled => OutcomeKind::Cancelled,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, FetchOutcome::Verified { .. })
    }

    /// Archive bytes when the outcome is `Verified`.
    pub fn verified_bytes(&self) -> Option<&[u8]> {
        match self {
            FetchOutcome::Verified { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    /// Where verified bytes came from; `None` for failures.
    pub fn source(&self) -> Option<Source> {
        match self {
            FetchOutcome::Verified { source, .. } => Some(*source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ignores_payload() {
        let a = FetchOutcome::Verified {
            bytes: vec![1],
            source: Source::Network,
            checksum: ChecksumStatus::Matched,
        };
        let b = FetchOutcome::Verified {
            bytes: vec![2, 3],
            source: Source::Cache,
            checksum: ChecksumStatus::Matched,
        };
        assert_eq!(a.kind(), b.kind());
        assert_eq!(b.source(), Some(Source::Cache));
        assert_eq!(FetchOutcome::NotFound.verified_bytes(), None);
    }
}
