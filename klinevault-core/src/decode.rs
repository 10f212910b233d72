//! Record decoding: verified archive bytes to candles.
//!
//! Each archive is a ZIP holding one CSV of klines with twelve columns
//! (open time, OHLCV, close time, quote volume, trade count, taker buy
//! volumes, an unused field). Only the first six are kept. Older files have
//! no header row; newer ones do, so the first line is sniffed.
//!
//! Bad rows are dropped one at a time and reported as [`RowError`]s; only a
//! blob that is not a readable archive fails the whole decode.

use std::io::{Cursor, Read};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::domain::timeframe::millis_to_utc;
use crate::domain::{Candle, Timeframe};
use crate::plan::ArchiveRef;

/// Open-times at or above this are microseconds, below it milliseconds.
const MICROSECOND_THRESHOLD: i64 = 10_000_000_000_000;

/// open_time, open, high, low, close, volume
const CANONICAL_COLUMNS: usize = 6;

/// Upper bound on the buffer reserved from a ZIP entry's declared size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Archive-level decode failure. The archive contributes no rows.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a readable zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive contains no csv entry")]
    NoCsvEntry,

    #[error("failed to read csv entry '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// One rejected row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// 1-based line in the CSV entry.
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecodeStatus {
    Clean,
    /// At least one row was rejected.
    PartiallyCorrupt,
}

/// Rows recovered from one archive.
#[derive(Debug, Clone)]
pub struct DecodedArchive {
    pub archive: ArchiveRef,
    pub candles: Vec<Candle>,
    pub row_errors: Vec<RowError>,
    pub header_skipped: bool,
}

impl DecodedArchive {
    /// `PartiallyCorrupt` as soon as one row was rejected.
    pub fn status(&self) -> DecodeStatus {
        if self.row_errors.is_empty() {
            DecodeStatus::Clean
        } else {
            DecodeStatus::PartiallyCorrupt
        }
    }

    pub fn is_partially_corrupt(&self) -> bool {
        self.status() == DecodeStatus::PartiallyCorrupt
    }
}

/// Decode one verified archive.
pub fn decode_archive(archive: &ArchiveRef, bytes: &[u8]) -> Result<DecodedArchive, DecodeError> {
    let csv_bytes = extract_csv(archive, bytes)?;
    let timeframe = archive.spec().timeframe();

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_bytes.as_slice());

    let mut candles = Vec::new();
    let mut row_errors = Vec::new();
    let mut header_skipped = false;
    let mut first = true;

    let mut record = StringRecord::new();
    loop {
        let line = reader.position().line();
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                if first {
                    first = false;
                    if is_header(&record) {
                        header_skipped = true;
                        continue;
                    }
                }
                if record.iter().all(str::is_empty) {
                    continue;
                }
                match parse_row(&record, timeframe) {
                    Ok(candle) => candles.push(candle),
                    Err(message) => {
                        debug!(
                            event_type = "decode_row_rejected",
                            archive = %archive,
                            line,
                            reason = %message,
                            "Rejected kline row"
                        );
                        row_errors.push(RowError { line, message });
                    }
                }
            }
            Err(e) => {
                first = false;
                row_errors.push(RowError {
                    line,
                    message: e.to_string(),
                });
                // an I/O-level csv error leaves the reader unusable
                if !matches!(e.kind(), csv::ErrorKind::Utf8 { .. } | csv::ErrorKind::UnequalLengths { .. }) {
                    break;
                }
            }
        }
    }

    if !row_errors.is_empty() {
        warn!(
            event_type = "decode_partially_corrupt",
            archive = %archive,
            rejected = row_errors.len(),
            accepted = candles.len(),
            "Archive decoded with rejected rows"
        );
    }

    Ok(DecodedArchive {
        archive: archive.clone(),
        candles,
        row_errors,
        header_skipped,
    })
}

fn extract_csv(archive: &ArchiveRef, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))?;

    let expected = archive.csv_name();
    let name = if zip.file_names().any(|n| n == expected) {
        expected
    } else {
        zip.file_names()
            .filter(|n| n.to_ascii_lowercase().ends_with(".csv"))
            .min()
            .map(str::to_string)
            .ok_or(DecodeError::NoCsvEntry)?
    };

    let mut entry = zip.by_name(&name)?;
    // declared size is untrusted until the checksum has been seen
    let mut buf = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
    entry
        .read_to_end(&mut buf)
        .map_err(|source| DecodeError::Read { name, source })?;
    Ok(buf)
}

/// A header row has no numeric field at all. A mangled data row still
/// carries numbers and goes through `parse_row` so it gets reported.
fn is_header(record: &StringRecord) -> bool {
    record.iter().any(|f| !f.is_empty()) && record.iter().all(|f| f.parse::<f64>().is_err())
}

fn parse_row(record: &StringRecord, timeframe: Timeframe) -> Result<Candle, String> {
    if record.len() < CANONICAL_COLUMNS {
        return Err(format!(
            "expected at least {CANONICAL_COLUMNS} columns, found {}",
            record.len()
        ));
    }

    let raw_time: i64 = record[0]
        .parse()
        .map_err(|_| format!("invalid open_time '{}'", &record[0]))?;
    let open_time = normalize_open_time(raw_time);
    if !timeframe.is_aligned(open_time) {
        return Err(format!("open_time {open_time} is not aligned to {timeframe}"));
    }

    let field = |idx: usize, name: &str| -> Result<f64, String> {
        let v: f64 = record[idx]
            .parse()
            .map_err(|_| format!("invalid {name} '{}'", &record[idx]))?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(format!("non-finite {name}"))
        }
    };

    let candle = Candle {
        open_time,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    };

    if !candle.is_sane() {
        return Err(format!("inconsistent ohlcv at {open_time}"));
    }
    Ok(candle)
}

/// Millisecond or microsecond epoch value to an instant.
pub fn normalize_open_time(raw: i64) -> DateTime<Utc> {
    let ms = if raw >= MICROSECOND_THRESHOLD {
        raw / 1_000
    } else {
        raw
    };
    millis_to_utc(ms)
}
