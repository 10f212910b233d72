//! Local archive cache.
//!
//! Layout:
//! - `{root}/raw/{market}/{SYMBOL}_{tf}/{daily|monthly}/{file}.zip`
//! - `{root}/raw/.../{file}.zip.meta.json` (digest, size, source URL, checksum status)
//! - `{root}/processed/{market}/{SYMBOL}-{tf}-{start}-to-{end}.{ext}`
//!
//! Features:
//! - Atomic writes (unique temp file in the target directory, then rename)
//! - Sidecar written before the archive, so an archive without a matching
//!   sidecar is never treated as verified
//! - Re-hash on every hit; corrupt files are renamed to `{file}.quarantined`
//! - Sweep of temp files orphaned by interrupted runs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use klinevault_core::checksum::{compute_sha256, matches_digest};
use klinevault_core::{ArchiveRef, DateSpan, SymbolSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::outcome::ChecksumStatus;

const TEMP_SUFFIX: &str = ".tmp";
const META_SUFFIX: &str = ".meta.json";
const QUARANTINE_SUFFIX: &str = ".quarantined";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache metadata error: {0}")]
    Meta(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Sidecar stored next to each cached archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub file_name: String,
    pub url: String,
    pub sha256: String,
    pub size: u64,
    pub checksum: ChecksumStatus,
    pub cached_at: DateTime<Utc>,
}

/// Verified bytes read back from the cache.
#[derive(Debug, Clone)]
pub struct CachedArchive {
    pub bytes: Vec<u8>,
    pub meta: ArchiveMeta,
}

#[derive(Debug, Clone)]
pub struct ArchiveCache {
    root: PathBuf,
}

impl ArchiveCache {
    /// Cache rooted at `root`. Nothing is created until the first store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn raw_root(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// `{root}/raw/{market}/{SYMBOL}_{tf}/{granularity}`
    pub fn archive_dir(&self, archive: &ArchiveRef) -> PathBuf {
        let spec = archive.spec();
        self.raw_root()
            .join(spec.market().as_str())
            .join(format!("{}_{}", spec.symbol(), spec.timeframe()))
            .join(archive.granularity().as_str())
    }

    /// Where the verified archive lives.
    pub fn archive_path(&self, archive: &ArchiveRef) -> PathBuf {
        self.archive_dir(archive).join(archive.file_name())
    }

    /// JSON sidecar next to the archive.
    pub fn meta_path(&self, archive: &ArchiveRef) -> PathBuf {
        self.archive_dir(archive)
            .join(format!("{}{META_SUFFIX}", archive.file_name()))
    }

    /// Where callers persist the merged series for a span.
    pub fn processed_path(&self, spec: &SymbolSpec, span: &DateSpan, ext: &str) -> PathBuf {
        self.root
            .join("processed")
            .join(spec.market().as_str())
            .join(format!(
                "{}-{}-{}-to-{}.{}",
                spec.symbol(),
                spec.timeframe(),
                span.start(),
                span.end(),
                ext.trim_start_matches('.')
            ))
    }

    /// Parsed sidecar, or `None` if absent or unreadable.
    pub fn read_meta(&self, archive: &ArchiveRef) -> Option<ArchiveMeta> {
        let content = fs::read_to_string(self.meta_path(archive)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Return the cached archive if it exists and still hashes to its sidecar digest.
    ///
    /// A file that fails the check is quarantined and reported as a miss.
    pub fn load_verified(&self, archive: &ArchiveRef) -> Result<Option<CachedArchive>, CacheError> {
        let path = self.archive_path(archive);
        if !path.exists() {
            return Ok(None);
        }
        let Some(meta) = self.read_meta(archive) else {
            debug!(
                event_type = "cache_unverified",
                archive = %archive,
                "Cached archive has no readable sidecar"
            );
            return Ok(None);
        };

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path)(e)),
        };

        if bytes.len() as u64 != meta.size || !matches_digest(&bytes, &meta.sha256) {
            self.quarantine(archive)?;
            return Ok(None);
        }

        debug!(event_type = "cache_hit", archive = %archive, "Verified cached archive");
        Ok(Some(CachedArchive { bytes, meta }))
    }

    /// Persist verified bytes. Sidecar first, then the archive, each via temp + rename.
    pub fn store(
        &self,
        archive: &ArchiveRef,
        bytes: &[u8],
        url: &str,
        checksum: ChecksumStatus,
    ) -> Result<ArchiveMeta, CacheError> {
        let dir = self.archive_dir(archive);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let meta = ArchiveMeta {
            file_name: archive.file_name(),
            url: url.to_string(),
            sha256: compute_sha256(bytes),
            size: bytes.len() as u64,
            checksum,
            cached_at: Utc::now(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)?;

        write_atomic(&self.meta_path(archive), &meta_json)?;
        write_atomic(&self.archive_path(archive), bytes)?;

        debug!(
            event_type = "cache_persist",
            archive = %archive,
            size = meta.size,
            "Stored verified archive"
        );
        Ok(meta)
    }

    /// Move a corrupt archive aside as `{file}.quarantined` and drop its sidecar.
    pub fn quarantine(&self, archive: &ArchiveRef) -> Result<(), CacheError> {
        let path = self.archive_path(archive);
        let target = self
            .archive_dir(archive)
            .join(format!("{}{QUARANTINE_SUFFIX}", archive.file_name()));
        warn!(
            event_type = "cache_quarantine",
            archive = %archive,
            path = %path.display(),
            "Cached archive failed verification, quarantining"
        );
        match fs::rename(&path, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }
        let meta = self.meta_path(archive);
        match fs::remove_file(&meta) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&meta)(e)),
        }
    }

    /// Delete temp files under `raw/` left behind by interrupted runs.
    pub fn sweep_temp_files(&self) -> Result<usize, CacheError> {
        let raw = self.raw_root();
        if !raw.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut stack = vec![raw];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
                let entry = entry.map_err(io_err(&dir))?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(io_err(&path))?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if is_temp_file(&path) {
                    fs::remove_file(&path).map_err(io_err(&path))?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(event_type = "cache_sweep", removed, "Removed orphaned temp files");
        }
        Ok(removed)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}

/// Write to a unique hidden temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive");
    let tmp = path.with_file_name(format!(
        ".{name}.{}-{}{TEMP_SUFFIX}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(path)(e)
    })
}
