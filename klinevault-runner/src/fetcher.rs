//! ArchiveFetcher: one archive and its checksum companion, with retries.
//!
//! Each download runs an explicit state machine:
//!
//! ```text
//! Pending -> Attempting -> Success
//!                |-> RetryWait -> Attempting
//!                |-> Exhausted | NotFound | Rejected | Cancelled
//! ```
//!
//! Connection failures, timeouts, 5xx and 429 are retried with exponential
//! backoff and jitter. 404 is terminal and reported as `NotFound`. A verified
//! checksum mismatch is terminal too: the host serves the same bytes on the
//! next attempt. Nothing is written to the cache until the bytes verify, and
//! a cancelled fetch writes nothing at all. A cached archive stored without a
//! matched digest is checked again while verification is enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use klinevault_core::checksum::{self, ChecksumVerdict};
use klinevault_core::ArchiveRef;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::cache::ArchiveCache;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::CollectorConfig;
use crate::outcome::{ChecksumStatus, FetchOutcome, Source};
use crate::transport::Transport;

/// Granularity of cancellable sleeps.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared by a batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleep for `duration` in short slices. Returns false if cancelled meanwhile.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// First attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Un-jittered delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Delay with jitter drawn from `[50%, 100%]` of the base delay.
    pub fn delay(&self, retry: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        self.base_delay(retry).mul_f64(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        CollectorConfig::default().retry_policy()
    }
}

/// Why a download stopped without bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Failure {
    NotFound,
    Rejected(u16),
    Exhausted { attempts: u32, last_error: String },
    Cancelled,
}

impl Failure {
    fn into_outcome(self) -> FetchOutcome {
        match self {
            Failure::NotFound => FetchOutcome::NotFound,
            Failure::Rejected(status) => FetchOutcome::Rejected { status },
            Failure::Exhausted {
                attempts,
                last_error,
            } => FetchOutcome::TransientFailure {
                attempts,
                last_error,
            },
            Failure::Cancelled => FetchOutcome::Cancelled,
        }
    }
}

enum AttemptState {
    Pending,
    Attempting { attempt: u32 },
    RetryWait {
        attempt: u32,
        delay: Duration,
        last_error: String,
    },
    Done(Result<Vec<u8>, Failure>),
}

/// Fetches single archives. Cheap to share across worker threads.
pub struct ArchiveFetcher {
    transport: Arc<dyn Transport>,
    cache: ArchiveCache,
    breaker: Arc<CircuitBreaker>,
    base_url: String,
    policy: RetryPolicy,
    verify_checksums: bool,
}

impl ArchiveFetcher {
    /// Fetcher over `transport`, sharing `breaker` with the rest of the batch.
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: ArchiveCache,
        breaker: Arc<CircuitBreaker>,
        config: &CollectorConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            breaker,
            base_url: config.base_url.clone(),
            policy: config.retry_policy(),
            verify_checksums: config.verify_checksums,
        }
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Resolve one archive to its terminal outcome. Never panics, never errors.
    pub fn fetch(&self, archive: &ArchiveRef, force: bool, cancel: &CancelToken) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        if !force {
            if let Some(outcome) = self.from_cache(archive, cancel) {
                return outcome;
            }
        }

        let url = archive.url(&self.base_url);
        let bytes = match self.download(archive, &url, cancel) {
            Ok(bytes) => bytes,
            Err(failure) => return failure.into_outcome(),
        };

        let checksum = match self.check(archive, &bytes, cancel) {
            Ok(status) => status,
            Err(outcome) => return outcome,
        };

        // bytes verified but the batch is being torn down: leave no trace
        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        if let Err(e) = self.cache.store(archive, &bytes, &url, checksum) {
            warn!(
                event_type = "cache_write_failed",
                archive = %archive,
                error = %e,
                "Verified archive could not be cached"
            );
        }

        FetchOutcome::Verified {
            bytes,
            source: Source::Network,
            checksum,
        }
    }

    /// Serve a cached copy. One stored without a matched digest is checked
    /// again while verification is on. `None` means go to the network.
    fn from_cache(&self, archive: &ArchiveRef, cancel: &CancelToken) -> Option<FetchOutcome> {
        let hit = match self.cache.load_verified(archive) {
            Ok(Some(hit)) => hit,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    event_type = "cache_read_failed",
                    archive = %archive,
                    error = %e,
                    "Cache lookup failed, fetching from network"
                );
                return None;
            }
        };

        let mut checksum = hit.meta.checksum;
        if self.verify_checksums && checksum != ChecksumStatus::Matched {
            match self.check(archive, &hit.bytes, cancel) {
                Ok(ChecksumStatus::Matched) => {
                    checksum = ChecksumStatus::Matched;
                    if let Err(e) =
                        self.cache
                            .store(archive, &hit.bytes, &hit.meta.url, ChecksumStatus::Matched)
                    {
                        warn!(
                            event_type = "cache_write_failed",
                            archive = %archive,
                            error = %e,
                            "Could not record checksum for cached archive"
                        );
                    }
                }
                Ok(status) => checksum = status,
                Err(FetchOutcome::ChecksumMismatch { .. }) => {
                    if let Err(e) = self.cache.quarantine(archive) {
                        warn!(
                            event_type = "cache_quarantine_failed",
                            archive = %archive,
                            error = %e,
                            "Could not quarantine cached archive"
                        );
                    }
                    return None;
                }
                Err(outcome) => return Some(outcome),
            }
        }

        Some(FetchOutcome::Verified {
            bytes: hit.bytes,
            source: Source::Cache,
            checksum,
        })
    }

    /// Verify against the companion digest. `Err` carries the terminal outcome.
    fn check(
        &self,
        archive: &ArchiveRef,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<ChecksumStatus, FetchOutcome> {
        if !self.verify_checksums {
            return Ok(ChecksumStatus::Skipped);
        }

        let text = match self.download(archive, &archive.checksum_url(&self.base_url), cancel) {
            Ok(text) => text,
            Err(Failure::NotFound) => {
                warn!(
                    event_type = "checksum_unavailable",
                    archive = %archive,
                    "No checksum published, accepting archive unverified"
                );
                return Ok(ChecksumStatus::Unavailable);
            }
            Err(other) => return Err(other.into_outcome()),
        };

        match checksum::verify(bytes, &String::from_utf8_lossy(&text)) {
            ChecksumVerdict::Match { digest } => {
                debug!(
                    event_type = "checksum_verified",
                    archive = %archive,
                    sha256 = %digest,
                    "Checksum verified"
                );
                Ok(ChecksumStatus::Matched)
            }
            ChecksumVerdict::Mismatch { expected, actual } => {
                warn!(
                    event_type = "checksum_mismatch",
                    archive = %archive,
                    expected = %expected,
                    actual = %actual,
                    "Checksum mismatch, discarding archive"
                );
                Err(FetchOutcome::ChecksumMismatch { expected, actual })
            }
            ChecksumVerdict::Malformed { reason, actual } => {
                warn!(
                    event_type = "checksum_malformed",
                    archive = %archive,
                    reason = %reason,
                    "Unreadable checksum companion, discarding archive"
                );
                Err(FetchOutcome::ChecksumMismatch {
                    expected: format!("malformed checksum: {reason}"),
                    actual,
                })
            }
        }
    }

    /// Run the retry state machine for one URL.
    fn download(
        &self,
        archive: &ArchiveRef,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, Failure> {
        let mut state = AttemptState::Pending;
        loop {
            state = match state {
                AttemptState::Pending => AttemptState::Attempting { attempt: 1 },

                AttemptState::Attempting { attempt } => {
                    if cancel.is_cancelled() {
                        AttemptState::Done(Err(Failure::Cancelled))
                    } else if !self.breaker.is_allowed() {
                        AttemptState::Done(Err(Failure::Exhausted {
                            attempts: attempt - 1,
                            last_error: format!(
                                "circuit breaker open ({}s remaining)",
                                self.breaker.remaining_cooldown().as_secs()
                            ),
                        }))
                    } else {
                        self.attempt(archive, url, attempt)
                    }
                }

                AttemptState::RetryWait {
                    attempt,
                    delay,
                    last_error,
                } => {
                    debug!(
                        event_type = "fetch_retry_wait",
                        archive = %archive,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Waiting before retry"
                    );
                    if cancel.sleep(delay) {
                        AttemptState::Attempting {
                            attempt: attempt + 1,
                        }
                    } else {
                        AttemptState::Done(Err(Failure::Cancelled))
                    }
                }

                AttemptState::Done(result) => return result,
            };
        }
    }

    fn attempt(&self, archive: &ArchiveRef, url: &str, attempt: u32) -> AttemptState {
        debug!(
            event_type = "fetch_attempt",
            archive = %archive,
            url,
            attempt,
            max_attempts = self.policy.max_attempts(),
            "Requesting"
        );

        match self.transport.get(url, self.policy.timeout) {
            Ok(resp) if resp.is_success() => {
                self.breaker.record_success();
                info!(
                    event_type = "fetch_complete",
                    archive = %archive,
                    url,
                    bytes = resp.body.len(),
                    attempt,
                    "Downloaded"
                );
                AttemptState::Done(Ok(resp.body))
            }
            Ok(resp) => match resp.status {
                404 => {
                    debug!(event_type = "fetch_not_found", archive = %archive, url, "Not published");
                    AttemptState::Done(Err(Failure::NotFound))
                }
                403 => {
                    self.breaker.trip();
                    AttemptState::Done(Err(Failure::Exhausted {
                        attempts: attempt,
                        last_error: "HTTP 403 forbidden".into(),
                    }))
                }
                429 => {
                    self.breaker.record_failure();
                    self.retry_or_exhaust(archive, attempt, "HTTP 429 too many requests".into())
                }
                status if status >= 500 => {
                    self.retry_or_exhaust(archive, attempt, format!("HTTP {status}"))
                }
                status => {
                    warn!(
                        event_type = "fetch_rejected",
                        archive = %archive,
                        url,
                        status,
                        "Request rejected"
                    );
                    AttemptState::Done(Err(Failure::Rejected(status)))
                }
            },
            Err(e) => self.retry_or_exhaust(archive, attempt, e.to_string()),
        }
    }

    fn retry_or_exhaust(&self, archive: &ArchiveRef, attempt: u32, error: String) -> AttemptState {
        if attempt >= self.policy.max_attempts() {
            warn!(
                event_type = "fetch_failed",
                archive = %archive,
                attempts = attempt,
                error = %error,
                "Retries exhausted"
            );
            return AttemptState::Done(Err(Failure::Exhausted {
                attempts: attempt,
                last_error: error,
            }));
        }
        AttemptState::RetryWait {
            attempt,
            delay: self.policy.delay(attempt),
            last_error: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportResponse};
    use chrono::NaiveDate;
    use klinevault_core::{MarketType, SymbolSpec, Timeframe};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses per URL; unscripted URLs get 404.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<Vec<(String, VecDeque<Result<TransportResponse, TransportError>>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn on(self, url: &str, r: Result<TransportResponse, TransportError>) -> Self {
            {
                let mut responses = self.responses.lock().unwrap();
                match responses.iter_mut().find(|(u, _)| u == url) {
                    Some((_, q)) => q.push_back(r),
                    None => responses.push((url.to_string(), VecDeque::from([r]))),
                }
            }
            self
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    impl Transport for Scripted {
        fn get(&self, url: &str, _: Duration) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut responses = self.responses.lock().unwrap();
            match responses.iter_mut().find(|(u, _)| u == url) {
                Some((_, q)) if q.len() > 1 => q.pop_front().unwrap(),
                Some((_, q)) => q.front().cloned().unwrap(),
                None => Ok(TransportResponse::status(404)),
            }
        }
    }

    fn archive() -> ArchiveRef {
        let spec = SymbolSpec::new("ETHUSDT", MarketType::FuturesUsdt, Timeframe::H1).unwrap();
        ArchiveRef::daily(spec, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    fn config() -> CollectorConfig {
        CollectorConfig {
            base_url: "http://test".into(),
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            ..CollectorConfig::default()
        }
    }

    fn fetcher(t: Arc<Scripted>, dir: &std::path::Path) -> ArchiveFetcher {
        ArchiveFetcher::new(
            t,
            ArchiveCache::new(dir),
            Arc::new(CircuitBreaker::default()),
            &config(),
        )
    }

    fn fetcher_with(t: Arc<Scripted>, dir: &std::path::Path, cfg: &CollectorConfig) -> ArchiveFetcher {
        ArchiveFetcher::new(
            t,
            ArchiveCache::new(dir),
            Arc::new(CircuitBreaker::new(cfg.breaker_cooldown(), cfg.breaker_failure_threshold)),
            cfg,
        )
    }

    fn checksum_text(bytes: &[u8]) -> TransportResponse {
        TransportResponse::ok(format!("{}  f.zip\n", checksum::compute_sha256(bytes)))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            retries: 5,
            timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
        };
        assert_eq!(p.base_delay(1), Duration::from_millis(100));
        assert_eq!(p.base_delay(2), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(350));
        for _ in 0..20 {
            let d = p.delay(2);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn verified_download_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let t = Arc::new(
            Scripted::default()
                .on(&url, Ok(TransportResponse::ok(b"payload".to_vec())))
                .on(&a.checksum_url("http://test"), Ok(checksum_text(b"payload"))),
        );
        let f = fetcher(t.clone(), dir.path());

        let first = f.fetch(&a, false, &CancelToken::new());
        assert_eq!(first.source(), Some(Source::Network));
        let second = f.fetch(&a, false, &CancelToken::new());
        assert_eq!(second.source(), Some(Source::Cache));
        assert_eq!(second.verified_bytes(), Some(&b"payload"[..]));
        assert_eq!(t.calls_to(&url), 1);

        f.fetch(&a, true, &CancelToken::new());
        assert_eq!(t.calls_to(&url), 2);
    }

    #[test]
    fn server_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let t = Arc::new(
            Scripted::default()
                .on(&url, Ok(TransportResponse::status(503)))
                .on(&url, Err(TransportError::Timeout(Duration::from_secs(30))))
                .on(&url, Ok(TransportResponse::ok(b"late".to_vec())))
                .on(&a.checksum_url("http://test"), Ok(checksum_text(b"late"))),
        );
        let outcome = fetcher(t.clone(), dir.path()).fetch(&a, false, &CancelToken::new());
        assert!(outcome.is_verified());
        assert_eq!(t.calls_to(&url), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let t = Arc::new(Scripted::default().on(&url, Ok(TransportResponse::status(500))));
        match fetcher(t.clone(), dir.path()).fetch(&a, false, &CancelToken::new()) {
            FetchOutcome::TransientFailure { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("500"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.calls_to(&url), 4);
    }

    #[test]
    fn not_found_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let t = Arc::new(Scripted::default());
        let outcome = fetcher(t.clone(), dir.path()).fetch(&a, false, &CancelToken::new());
        assert_eq!(outcome, FetchOutcome::NotFound);
        assert_eq!(t.calls_to(&a.url("http://test")), 1);
    }

    #[test]
    fn mismatch_is_not_retried_or_cached() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let t = Arc::new(
            Scripted::default()
                .on(&url, Ok(TransportResponse::ok(b"corrupt".to_vec())))
                .on(&a.checksum_url("http://test"), Ok(checksum_text(b"original"))),
        );
        let f = fetcher(t.clone(), dir.path());
        let outcome = f.fetch(&a, false, &CancelToken::new());
        assert!(matches!(outcome, FetchOutcome::ChecksumMismatch { .. }));
        assert_eq!(t.calls_to(&url), 1);
        assert!(!f.cache().archive_path(&a).exists());
    }

    #[test]
    fn missing_checksum_is_accepted_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let t = Arc::new(
            Scripted::default().on(&a.url("http://test"), Ok(TransportResponse::ok(b"old".to_vec()))),
        );
        match fetcher(t, dir.path()).fetch(&a, false, &CancelToken::new()) {
            FetchOutcome::Verified { checksum, .. } => {
                assert_eq!(checksum, ChecksumStatus::Unavailable)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn client_errors_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let t = Arc::new(
            Scripted::default().on(&a.url("http://test"), Ok(TransportResponse::status(400))),
        );
        let outcome = fetcher(t, dir.path()).fetch(&a, false, &CancelToken::new());
        assert_eq!(outcome, FetchOutcome::Rejected { status: 400 });
    }

    #[test]
    fn forbidden_trips_breaker_for_later_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let t = Arc::new(
            Scripted::default().on(&a.url("http://test"), Ok(TransportResponse::status(403))),
        );
        let f = fetcher(t.clone(), dir.path());
        assert!(matches!(
            f.fetch(&a, false, &CancelToken::new()),
            FetchOutcome::TransientFailure { attempts: 1, .. }
        ));
        assert!(matches!(
            f.fetch(&a, false, &CancelToken::new()),
            FetchOutcome::TransientFailure { attempts: 0, .. }
        ));
        assert_eq!(t.calls_to(&a.url("http://test")), 1);
    }

    #[test]
    fn rate_limits_are_retried_until_breaker_opens() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let t = Arc::new(Scripted::default().on(&url, Ok(TransportResponse::status(429))));
        let f = fetcher(t.clone(), dir.path());

        // threshold 3, four attempts allowed: the fourth finds the breaker open
        match f.fetch(&a, false, &CancelToken::new()) {
            FetchOutcome::TransientFailure { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("circuit breaker open"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.calls_to(&url), 3);
        assert!(!f.breaker().is_allowed());

        assert!(matches!(
            f.fetch(&a, false, &CancelToken::new()),
            FetchOutcome::TransientFailure { attempts: 0, .. }
        ));
        assert_eq!(t.calls_to(&url), 3);
    }

    #[test]
    fn single_rate_limit_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let t = Arc::new(
            Scripted::default()
                .on(&url, Ok(TransportResponse::status(429)))
                .on(&url, Ok(TransportResponse::ok(b"payload".to_vec())))
                .on(&a.checksum_url("http://test"), Ok(checksum_text(b"payload"))),
        );
        let f = fetcher(t.clone(), dir.path());
        assert!(f.fetch(&a, false, &CancelToken::new()).is_verified());
        assert_eq!(t.calls_to(&url), 2);
        assert!(f.breaker().is_allowed());
    }

    #[test]
    fn disabled_verification_skips_checksum_request() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let t = Arc::new(
            Scripted::default().on(&a.url("http://test"), Ok(TransportResponse::ok(b"raw".to_vec()))),
        );
        let cfg = CollectorConfig {
            verify_checksums: false,
            ..config()
        };
        let f = fetcher_with(t.clone(), dir.path(), &cfg);

        match f.fetch(&a, false, &CancelToken::new()) {
            FetchOutcome::Verified { checksum, source, .. } => {
                assert_eq!(checksum, ChecksumStatus::Skipped);
                assert_eq!(source, Source::Network);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.calls_to(&a.checksum_url("http://test")), 0);
        assert_eq!(
            f.cache().read_meta(&a).unwrap().checksum,
            ChecksumStatus::Skipped
        );
    }

    #[test]
    fn unchecked_cache_entry_is_verified_once_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let sum_url = a.checksum_url("http://test");
        let t = Arc::new(
            Scripted::default()
                .on(&url, Ok(TransportResponse::ok(b"payload".to_vec())))
                .on(&sum_url, Ok(checksum_text(b"payload"))),
        );
        let unchecked = CollectorConfig {
            verify_checksums: false,
            ..config()
        };
        fetcher_with(t.clone(), dir.path(), &unchecked).fetch(&a, false, &CancelToken::new());

        let f = fetcher(t.clone(), dir.path());
        match f.fetch(&a, false, &CancelToken::new()) {
            FetchOutcome::Verified { checksum, source, .. } => {
                assert_eq!(checksum, ChecksumStatus::Matched);
                assert_eq!(source, Source::Cache);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.calls_to(&url), 1);
        assert_eq!(t.calls_to(&sum_url), 1);

        // the sidecar now records the match
        f.fetch(&a, false, &CancelToken::new());
        assert_eq!(t.calls_to(&sum_url), 1);
        assert_eq!(f.cache().read_meta(&a).unwrap().checksum, ChecksumStatus::Matched);
    }

    #[test]
    fn unchecked_cache_entry_failing_checksum_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive();
        let url = a.url("http://test");
        let t = Arc::new(
            Scripted::default()
                .on(&url, Ok(TransportResponse::ok(b"stale".to_vec())))
                .on(&a.checksum_url("http://test"), Ok(checksum_text(b"fresh"))),
        );
        let unchecked = CollectorConfig {
            verify_checksums: false,
            ..config()
        };
        fetcher_with(t.clone(), dir.path(), &unchecked).fetch(&a, false, &CancelToken::new());

        let f = fetcher(t.clone(), dir.path());
        assert!(matches!(
            f.fetch(&a, false, &CancelToken::new()),
            FetchOutcome::ChecksumMismatch { .. }
        ));
        // quarantined, then refetched from the network
        assert_eq!(t.calls_to(&url), 2);
        assert!(!f.cache().archive_path(&a).exists());
    }

    #[test]
    fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(Scripted::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = fetcher(t.clone(), dir.path()).fetch(&archive(), false, &cancel);
        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(t.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn cancellation_interrupts_retry_wait() {
        let cancel = CancelToken::new();
        let c = cancel.clone();
        let handle = std::thread::spawn(move || c.sleep(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert!(!handle.join().unwrap());
    }
}
