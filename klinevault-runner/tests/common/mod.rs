//! In-memory archive host shared by the runner integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use klinevault_core::checksum::compute_sha256;
use klinevault_core::{ArchiveRef, DateSpan};
use klinevault_runner::{CollectorConfig, Transport, TransportError, TransportResponse};
use zip::write::SimpleFileOptions;

pub const BASE_URL: &str = "http://archive.test/data";

/// Headerless twelve-column kline CSV covering the archive's period.
pub fn kline_csv(archive: &ArchiveRef) -> String {
    let tf = archive.spec().timeframe();
    let span = DateSpan::new(archive.first_day(), archive.last_day()).unwrap();
    let step = ChronoDuration::milliseconds(tf.step_ms().unwrap_or(86_400_000));
    let mut out = String::new();
    for (i, t) in tf
        .grid(span.start_instant(), span.end_instant_exclusive())
        .enumerate()
    {
        let p = 3000.0 + (i % 97) as f64 * 0.25;
        out.push_str(&format!(
            "{},{p:.2},{:.2},{:.2},{:.2},7.25,{},21750.0,31,3.5,10500.0,0\n",
            t.timestamp_millis(),
            p + 1.5,
            p - 1.0,
            p + 0.5,
            (t + step).timestamp_millis() - 1
        ));
    }
    out
}

pub fn zip_bytes(archive: &ArchiveRef, csv: &str) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    let mut w = zip::ZipWriter::new(&mut buf);
    w.start_file(archive.csv_name(), SimpleFileOptions::default())
        .unwrap();
    w.write_all(csv.as_bytes()).unwrap();
    w.finish().unwrap();
    buf.into_inner()
}

/// Scripted archive host. Serves generated archives and their checksums;
/// individual URLs can be made to fail.
#[derive(Default)]
pub struct MockHost {
    files: HashMap<String, Vec<u8>>,
    /// URL -> number of leading connection failures still to serve.
    flaky: Mutex<HashMap<String, u32>>,
    always_fail: HashSet<String>,
    requests: AtomicUsize,
    log: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl MockHost {
    pub fn serving(archives: &[ArchiveRef]) -> Self {
        let mut host = MockHost::default();
        for a in archives {
            host.publish(a, zip_bytes(a, &kline_csv(a)));
        }
        host
    }

    pub fn publish(&mut self, archive: &ArchiveRef, bytes: Vec<u8>) {
        let checksum = format!("{}  {}\n", compute_sha256(&bytes), archive.file_name());
        self.files
            .insert(archive.checksum_url(BASE_URL), checksum.into_bytes());
        self.files.insert(archive.url(BASE_URL), bytes);
    }

    /// Drop an archive and its checksum (the host answers 404).
    pub fn unpublish(mut self, archive: &ArchiveRef) -> Self {
        self.files.remove(&archive.url(BASE_URL));
        self.files.remove(&archive.checksum_url(BASE_URL));
        self
    }

    /// Serve bytes that do not match the published checksum.
    pub fn corrupt(mut self, archive: &ArchiveRef) -> Self {
        if let Some(bytes) = self.files.get_mut(&archive.url(BASE_URL)) {
            let last = bytes.len() - 1;
            bytes[last] ^= 0x01;
        }
        self
    }

    pub fn without_checksum(mut self, archive: &ArchiveRef) -> Self {
        self.files.remove(&archive.checksum_url(BASE_URL));
        self
    }

    pub fn flaky(self, archive: &ArchiveRef, failures: u32) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(archive.url(BASE_URL), failures);
        self
    }

    pub fn failing(mut self, archive: &ArchiveRef) -> Self {
        self.always_fail.insert(archive.url(BASE_URL));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl Transport for MockHost {
    fn get(&self, url: &str, _timeout: Duration) -> Result<TransportResponse, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(url.to_string());

        if let Some(latency) = self.latency {
            // vary completion order between archives
            let spread = url.bytes().map(u32::from).sum::<u32>() % 7 + 1;
            std::thread::sleep(latency * spread);
        }

        if self.always_fail.contains(url) {
            return Ok(TransportResponse::status(503));
        }
        if let Some(remaining) = self.flaky.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Connect("connection reset".into()));
            }
        }
        match self.files.get(url) {
            Some(body) => Ok(TransportResponse::ok(body.clone())),
            None => Ok(TransportResponse::status(404)),
        }
    }
}

/// Config pointing at the mock host with instant retries.
pub fn test_config(cache_dir: &std::path::Path, concurrency: usize) -> CollectorConfig {
    CollectorConfig {
        base_url: BASE_URL.to_string(),
        cache_dir: cache_dir.to_path_buf(),
        concurrency,
        retries: 2,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        ..CollectorConfig::default()
    }
}
