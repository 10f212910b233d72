//! DownloadScheduler: bounded-concurrency fetch of a whole plan.
//!
//! Outcomes are keyed by [`ArchiveRef`], so completion order never matters.
//! The batch is best-effort: every archive ends with exactly one outcome and
//! the caller decides what an acceptable failure rate is.

use std::collections::BTreeMap;

use klinevault_core::ArchiveRef;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fetcher::{ArchiveFetcher, CancelToken};
use crate::outcome::{ChecksumStatus, FetchOutcome, OutcomeKind, Source};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("failed to build download pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Progress callbacks, invoked from worker threads.
pub trait FetchProgress: Send + Sync {
    fn on_start(&self, archive: &ArchiveRef, total: usize);

    fn on_complete(&self, archive: &ArchiveRef, outcome: &FetchOutcome, total: usize);

    fn on_batch_complete(&self, summary: &FetchSummary);
}

/// Discards all progress.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _: &ArchiveRef, _: usize) {}
    fn on_complete(&self, _: &ArchiveRef, _: &FetchOutcome, _: usize) {}
    fn on_batch_complete(&self, _: &FetchSummary) {}
}

/// Emits progress as `tracing` events.
pub struct TracingProgress;

impl FetchProgress for TracingProgress {
    fn on_start(&self, archive: &ArchiveRef, total: usize) {
        debug!(event_type = "archive_start", archive = %archive, total, "Fetching archive");
    }

    fn on_complete(&self, archive: &ArchiveRef, outcome: &FetchOutcome, total: usize) {
        match outcome {
            FetchOutcome::Verified { source, .. } => debug!(
                event_type = "archive_complete",
                archive = %archive,
                source = ?source,
                total,
                "Archive ready"
            ),
            other => warn!(
                event_type = "archive_failed",
                archive = %archive,
                outcome = ?other.kind(),
                total,
                "Archive not available"
            ),
        }
    }

    fn on_batch_complete(&self, summary: &FetchSummary) {
        info!(
            event_type = "batch_complete",
            total = summary.total,
            verified = summary.verified,
            cached = summary.cached,
            not_found = summary.not_found,
            checksum_mismatch = summary.checksum_mismatch,
            transient_failure = summary.transient_failure,
            rejected = summary.rejected,
            cancelled = summary.cancelled,
            "Download batch complete"
        );
    }
}

/// Counts by outcome kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub total: usize,
    /// Every `Verified` outcome, from network or cache.
    pub verified: usize,
    /// Subset of `verified` served from the local cache.
    pub cached: usize,
    pub not_found: usize,
    pub checksum_mismatch: usize,
    pub transient_failure: usize,
    pub rejected: usize,
    pub cancelled: usize,
    /// Subset of `verified` accepted without a published checksum.
    pub unverified: usize,
}

impl FetchSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a FetchOutcome>) -> Self {
        let mut s = FetchSummary::default();
        for outcome in outcomes {
            s.total += 1;
            match outcome {
                FetchOutcome::Verified {
                    source, checksum, ..
                } => {
                    s.verified += 1;
                    if *source == Source::Cache {
                        s.cached += 1;
                    }
                    if *checksum == ChecksumStatus::Unavailable {
                        s.unverified += 1;
                    }
                }
                FetchOutcome::ChecksumMismatch { .. } => s.checksum_mismatch += 1,
                FetchOutcome::NotFound => s.not_found += 1,
                FetchOutcome::TransientFailure { .. } => s.transient_failure += 1,
                FetchOutcome::Rejected { .. } => s.rejected += 1,
                FetchOutcome::Cancelled => s.cancelled += 1,
            }
        }
        s
    }

    /// Archives that did not end `Verified`.
    pub fn failed(&self) -> usize {
        self.total - self.verified
    }

    /// Every archive verified, from network or cache.
    pub fn all_succeeded(&self) -> bool {
        self.verified == self.total
    }
}

/// Every archive of the plan with its outcome.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub outcomes: BTreeMap<ArchiveRef, FetchOutcome>,
    pub summary: FetchSummary,
}

impl FetchReport {
    /// Outcome kinds without payloads.
    pub fn kinds(&self) -> BTreeMap<ArchiveRef, OutcomeKind> {
        self.outcomes
            .iter()
            .map(|(a, o)| (a.clone(), o.kind()))
            .collect()
    }

    /// Verified archives and their bytes, in plan order.
    pub fn verified(&self) -> impl Iterator<Item = (&ArchiveRef, &[u8])> {
        self.outcomes
            .iter()
            .filter_map(|(a, o)| o.verified_bytes().map(|b| (a, b)))
    }

    /// Archives that ended without bytes.
    pub fn failures(&self) -> impl Iterator<Item = (&ArchiveRef, &FetchOutcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.is_verified())
    }
}

/// Fetch every archive with at most `concurrency` in flight.
///
/// Archives still queued or in flight when `cancel` fires end as
/// [`FetchOutcome::Cancelled`].
pub fn fetch_all(
    fetcher: &ArchiveFetcher,
    archives: &[ArchiveRef],
    concurrency: usize,
    force: bool,
    cancel: &CancelToken,
    progress: &dyn FetchProgress,
) -> Result<FetchReport, SchedulerError> {
    if concurrency == 0 {
        return Err(SchedulerError::ZeroConcurrency);
    }

    let total = archives.len();
    info!(
        event_type = "batch_start",
        archives = total,
        concurrency,
        force,
        "Starting download batch"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .thread_name(|i| format!("klinevault-fetch-{i}"))
        .build()?;

    let results: Vec<(ArchiveRef, FetchOutcome)> = pool.install(|| {
        archives
            .par_iter()
            .with_max_len(1)
            .map(|archive| {
                progress.on_start(archive, total);
                let outcome = fetcher.fetch(archive, force, cancel);
                progress.on_complete(archive, &outcome, total);
                (archive.clone(), outcome)
            })
            .collect()
    });

    let outcomes: BTreeMap<ArchiveRef, FetchOutcome> = results.into_iter().collect();
    let summary = FetchSummary::from_outcomes(outcomes.values());
    progress.on_batch_complete(&summary);

    Ok(FetchReport { outcomes, summary })
}
