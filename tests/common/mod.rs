#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use viewership_etl::{ObjectStore, Provider, ProviderList, StoreError, CANONICAL_HEADER, SOURCE_HEADER};

/// A fresh directory that outlives the test (inspectable on failure).
pub fn temp_dir() -> PathBuf {
    tempfile::tempdir().unwrap().into_path()
}

/// Three providers; "Beta Cable" has a space, "Gamma" is short.
pub fn providers() -> ProviderList {
    ProviderList::new(vec![
        Provider::new("1", "Alpha"),
        Provider::new("2", "Beta Cable"),
        Provider::new("3", "Gamma"),
    ])
}

/// One event row in the provider source layout.
pub fn source_row(hh_id: &str, ts: &str) -> Vec<String> {
    vec![
        hh_id.to_string(),
        ts.to_string(),
        "975540".to_string(),
        "Oklahoma News Report".to_string(),
        "3".to_string(),
        "KETA".to_string(),
        "watch".to_string(),
        "79081".to_string(),
        "USA".to_string(),
    ]
}

/// Source-layout CSV bytes (header + rows) for `(hh_id, ts)` pairs.
pub fn source_csv(events: &[(&str, &str)]) -> Vec<u8> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(SOURCE_HEADER).unwrap();
    for (hh, ts) in events {
        w.write_record(source_row(hh, ts)).unwrap();
    }
    w.into_inner().unwrap()
}

pub fn gzip_bytes(raw: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(raw).unwrap();
    enc.finish().unwrap()
}

pub fn zstd_bytes(raw: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(raw, 3).unwrap()
}

pub fn write_bytes(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = File::create(path).unwrap();
    f.write_all(bytes).unwrap();
}

/// Write a gzip source archive into a store directory under `key`.
pub fn put_gzip_source(store_root: &Path, key: &str, events: &[(&str, &str)]) {
    write_bytes(&store_root.join(key), &gzip_bytes(&source_csv(events)));
}

/// Write a canonical file (ts-first layout) with the given `(hh_id, ts)` rows, in the order given.
pub fn write_canonical_rows(path: &Path, events: &[(&str, &str)]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut w = csv::Writer::from_path(path).unwrap();
    w.write_record(CANONICAL_HEADER).unwrap();
    for (hh, ts) in events {
        w.write_record([*ts, *hh, "975540", "Oklahoma News Report", "3", "KETA", "watch", "79081", "USA"])
            .unwrap();
    }
    w.flush().unwrap();
}

/// Read a text file line-by-line into strings (skips empty lines).
pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    let r = BufReader::new(f);
    r.lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// Data rows of a CSV file with a header.
pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    rdr.records()
        .map(|r| r.unwrap().iter().map(|s| s.to_string()).collect())
        .collect()
}

/// `(ts, hh_id)` of every row of a canonical file or report.
pub fn read_ts_hh(path: &Path) -> Vec<(String, String)> {
    read_rows(path).into_iter().map(|r| (r[0].clone(), r[1].clone())).collect()
}

/// Store wrapper that fails the first `fail_first` fetches of every key, optionally
/// sleeps inside each fetch, and tracks the peak number of concurrent fetches.
pub struct ScriptedStore<S> {
    pub inner: S,
    pub fail_first: usize,
    pub delay: Duration,
    pub calls: Mutex<HashMap<String, usize>>,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl<S: ObjectStore> ScriptedStore<S> {
    pub fn new(inner: S, fail_first: usize) -> Self {
        Self {
            inner,
            fail_first,
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl<S: ObjectStore> ObjectStore for ScriptedStore<S> {
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_keys(prefix)
    }

    fn fetch(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let c = calls.entry(key.to_string()).or_insert(0);
            *c += 1;
            *c
        };
        let res = if n <= self.fail_first {
            Err(StoreError::Http { status: 503, target: key.to_string() })
        } else {
            self.inner.fetch(key)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }
}
