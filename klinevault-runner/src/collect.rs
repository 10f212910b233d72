//! The `collect` pipeline: plan, fetch, decode, merge, detect gaps.
//!
//! Only an invalid request, a cancelled batch or a broken local setup stop
//! the pipeline. Everything that goes wrong with individual archives or rows
//! ends up in [`CollectResult`] as data.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use klinevault_core::{
    decode_archive, detect_gaps, merge, plan_with_cutoff, ArchiveRef, CandleSeries, DateSpan,
    DecodeStatus, DomainError, GapReport, MergePolicy, MergeStats, RowError, SymbolSpec,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{ArchiveCache, CacheError};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{CollectOptions, ConfigError};
use crate::fetcher::ArchiveFetcher;
use crate::outcome::OutcomeKind;
use crate::scheduler::{fetch_all, FetchProgress, FetchSummary, SchedulerError, TracingProgress};
use crate::transport::{ReqwestTransport, Transport, TransportError};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("collection cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Row-level result of decoding one archive.
#[derive(Debug, Clone, Serialize)]
pub struct DecodeReport {
    pub archive: ArchiveRef,
    pub rows: usize,
    pub status: DecodeStatus,
    pub row_errors: Vec<RowError>,
}

/// Verified archive that could not be decoded at all.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveFailure {
    pub archive: ArchiveRef,
    pub reason: String,
}

/// Output of [`decode_and_merge`].
#[derive(Debug, Clone)]
pub struct DecodedSeries {
    pub series: CandleSeries,
    pub merge_stats: MergeStats,
    pub decode_reports: Vec<DecodeReport>,
    pub archive_failures: Vec<ArchiveFailure>,
}

/// Everything one `collect` call produced.
#[derive(Debug, Clone)]
pub struct CollectResult {
    pub spec: SymbolSpec,
    pub span: DateSpan,
    pub series: CandleSeries,
    pub gaps: GapReport,
    pub summary: FetchSummary,
    pub outcomes: BTreeMap<ArchiveRef, OutcomeKind>,
    pub decode_reports: Vec<DecodeReport>,
    pub merge_stats: MergeStats,
    pub archive_failures: Vec<ArchiveFailure>,
}

impl CollectResult {
    /// Archives that contributed no rows: not fetched, or fetched but undecodable.
    pub fn missing_archives(&self) -> Vec<&ArchiveRef> {
        let mut missing: Vec<&ArchiveRef> = self
            .outcomes
            .iter()
            .filter(|(_, kind)| **kind != OutcomeKind::Verified)
            .map(|(a, _)| a)
            .chain(self.archive_failures.iter().map(|f| &f.archive))
            .collect();
        missing.sort();
        missing
    }

    /// Archives that decoded but lost rows.
    pub fn partially_corrupt(&self) -> impl Iterator<Item = &DecodeReport> {
        self.decode_reports
            .iter()
            .filter(|r| r.status == DecodeStatus::PartiallyCorrupt)
    }
}

/// Decode verified archives and merge them into one series.
pub fn decode_and_merge<'a>(
    verified: impl IntoIterator<Item = (&'a ArchiveRef, &'a [u8])>,
    policy: MergePolicy,
) -> DecodedSeries {
    let mut decoded = Vec::new();
    let mut archive_failures = Vec::new();

    for (archive, bytes) in verified {
        match decode_archive(archive, bytes) {
            Ok(d) => decoded.push(d),
            Err(e) => {
                warn!(
                    event_type = "decode_failed",
                    archive = %archive,
                    error = %e,
                    "Verified archive could not be decoded"
                );
                archive_failures.push(ArchiveFailure {
                    archive: archive.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let merged = merge(&decoded, policy);
    let mut decode_reports: Vec<DecodeReport> = decoded
        .into_iter()
        .map(|d| DecodeReport {
            status: d.status(),
            rows: d.candles.len(),
            archive: d.archive,
            row_errors: d.row_errors,
        })
        .collect();
    decode_reports.sort_by(|a, b| a.archive.cmp(&b.archive));
    archive_failures.sort_by(|a, b| a.archive.cmp(&b.archive));

    DecodedSeries {
        series: merged.series,
        merge_stats: merged.stats,
        decode_reports,
        archive_failures,
    }
}

/// Collect one series over the network with default progress reporting.
pub fn collect(
    spec: &SymbolSpec,
    span: &DateSpan,
    options: &CollectOptions,
) -> Result<CollectResult, CollectError> {
    let transport = Arc::new(ReqwestTransport::new()?);
    collect_with(transport, spec, span, options, &TracingProgress)
}

/// Like [`collect`] for raw dates, reporting an inverted range as a domain error.
pub fn collect_range(
    spec: &SymbolSpec,
    start: NaiveDate,
    end: NaiveDate,
    options: &CollectOptions,
) -> Result<CollectResult, CollectError> {
    let span = DateSpan::new(start, end)?;
    collect(spec, &span, options)
}

/// Full pipeline over an explicit transport.
pub fn collect_with(
    transport: Arc<dyn Transport>,
    spec: &SymbolSpec,
    span: &DateSpan,
    options: &CollectOptions,
    progress: &dyn FetchProgress,
) -> Result<CollectResult, CollectError> {
    let config = &options.config;
    config.validate()?;
    if options.cancel.is_cancelled() {
        return Err(CollectError::Cancelled);
    }

    let cache = ArchiveCache::new(&config.cache_dir);
    cache.sweep_temp_files()?;

    let today = Utc::now().date_naive();
    let refs = plan_with_cutoff(spec, span, first_of_month(today));
    info!(
        event_type = "collect_start",
        spec = %spec,
        span = %span,
        archives = refs.len(),
        "Collecting series"
    );

    let breaker = Arc::new(CircuitBreaker::new(
        config.breaker_cooldown(),
        config.breaker_failure_threshold,
    ));
    let fetcher = ArchiveFetcher::new(transport, cache, breaker, config);
    let report = fetch_all(
        &fetcher,
        &refs,
        config.concurrency,
        options.force,
        &options.cancel,
        progress,
    )?;

    if options.cancel.is_cancelled() {
        return Err(CollectError::Cancelled);
    }

    let decoded = decode_and_merge(report.verified(), config.merge_policy);
    let gaps = detect_gaps(&decoded.series, span, spec.timeframe());

    info!(
        event_type = "collect_complete",
        spec = %spec,
        rows = decoded.series.len(),
        missing = gaps.total_missing,
        coverage = gaps.coverage(),
        failed_archives = report.summary.failed() + decoded.archive_failures.len(),
        "Collection complete"
    );

    Ok(CollectResult {
        spec: spec.clone(),
        span: *span,
        series: decoded.series,
        gaps,
        summary: report.summary,
        outcomes: report.kinds(),
        decode_reports: decoded.decode_reports,
        merge_stats: decoded.merge_stats,
        archive_failures: decoded.archive_failures,
    })
}

fn first_of_month(day: NaiveDate) -> Option<NaiveDate> {
    day.with_day(1)
}
