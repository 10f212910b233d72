//! KlineVault Runner: the blocking half of the kline archive pipeline.
//!
//! This crate builds on `klinevault-core` to provide:
//! - HTTP transport behind a mockable trait
//! - Per-archive fetching with retry, backoff, jitter and a circuit breaker
//! - Local archive cache with atomic writes and quarantine
//! - Bounded-concurrency download scheduling with cooperative cancellation
//! - TOML configuration
//! - The `collect` entry point composing plan, fetch, decode, merge and gap detection

pub mod cache;
pub mod circuit_breaker;
pub mod collect;
pub mod config;
pub mod fetcher;
pub mod outcome;
pub mod scheduler;
pub mod transport;

pub use cache::{ArchiveCache, ArchiveMeta, CacheError};
pub use circuit_breaker::CircuitBreaker;
pub use collect::{
    collect, collect_range, collect_with, decode_and_merge, ArchiveFailure, CollectError,
    CollectResult, DecodeReport, DecodedSeries,
};
pub use config::{CollectOptions, CollectorConfig, ConfigError};
pub use fetcher::{ArchiveFetcher, CancelToken, RetryPolicy};
pub use outcome::{ChecksumStatus, FetchOutcome, OutcomeKind, Source};
pub use scheduler::{
    fetch_all, FetchProgress, FetchReport, FetchSummary, NoProgress, SchedulerError,
    TracingProgress,
};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn fetcher_is_shareable_across_workers() {
        assert_send::<ArchiveFetcher>();
        assert_sync::<ArchiveFetcher>();
        assert_send::<CancelToken>();
        assert_sync::<CancelToken>();
    }

    #[test]
    fn results_are_send_sync() {
        assert_send::<FetchOutcome>();
        assert_sync::<FetchOutcome>();
        assert_send::<FetchReport>();
        assert_sync::<FetchReport>();
        assert_send::<CollectResult>();
        assert_sync::<CollectResult>();
    }
}
