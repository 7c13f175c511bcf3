//! Daily aggregated report: keeps the merged records that belong to the reporting
//! day, writes them out in arrival order through a bounded buffer, and counts
//! distinct households per provider.

use crate::date::ReportDate;
use crate::paths::with_suffix;
use crate::provider::ProviderList;
use crate::record::{EventRecord, CANONICAL_HEADER};
use crate::util::{create_with_backoff, remove_with_backoff, replace_file_atomic_backoff};
use ahash::AHashSet;
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_FLUSH_THRESHOLD: usize = 10_000;

/// `<reportName>-<YYYYMMDD>.csv`
pub fn report_file_name(report_name: &str, date: ReportDate) -> String {
    format!("{}-{}.csv", report_name, date.compact())
}

/// `hh_count_<providerName>_<YYYYMMDD>.csv`
pub fn count_file_name(provider_name: &str, date: ReportDate) -> String {
    format!("hh_count_{}_{}.csv", provider_name, date.compact())
}

/// Distinct household count for one provider and day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderCount {
    pub provider_code: String,
    pub provider_name: String,
    pub hh_id_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    pub date: String,
    pub report_path: PathBuf,
    pub accepted: u64,
    pub discarded: u64,
    pub flushes: u64,
    pub counts: Vec<ProviderCount>,
}

pub struct DailyReport {
    date: ReportDate,
    day_prefix: String,
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<csv::Writer<BufWriter<File>>>,
    buffer: Vec<EventRecord>,
    flush_threshold: usize,
    providers: ProviderList,
    distinct: Vec<AHashSet<String>>,
    accepted: u64,
    discarded: u64,
    flushes: u64,
}

impl DailyReport {
    /// Create the report file (header row written immediately). Content goes to
    /// `<path>.inprogress` and becomes visible under `path` on `finish`.
    pub fn create(path: &Path, date: ReportDate, providers: &ProviderList, flush_threshold: usize) -> Result<Self> {
        let tmp_path = with_suffix(path, ".inprogress");
        let file = create_with_backoff(&tmp_path, 16, 50)
            .with_context(|| format!("create report {}", tmp_path.display()))?;
        let mut writer = csv::Writer::from_writer(BufWriter::with_capacity(256 * 1024, file));
        writer.write_record(CANONICAL_HEADER)?;

        Ok(Self {
            date,
            day_prefix: date.dashed(),
            final_path: path.to_path_buf(),
            tmp_path,
            writer: Some(writer),
            buffer: Vec::with_capacity(flush_threshold.min(DEFAULT_FLUSH_THRESHOLD) + 1),
            flush_threshold: flush_threshold.max(1),
            providers: providers.clone(),
            distinct: vec![AHashSet::new(); providers.len()],
            accepted: 0,
            discarded: 0,
            flushes: 0,
        })
    }

    /// Keep `record` if its timestamp falls on the reporting day. Returns whether it was kept.
    pub fn accept(&mut self, record: EventRecord, provider: usize) -> Result<bool> {
        if !record.ts.contains(&self.day_prefix) {
            self.discarded += 1;
            return Ok(false);
        }
        let seen = self
            .distinct
            .get_mut(provider)
            .ok_or_else(|| anyhow!("unknown provider index {provider}"))?;
        if !seen.contains(&record.hh_id) {
            seen.insert(record.hh_id.clone());
        }
        self.buffer.push(record);
        self.accepted += 1;
        if self.buffer.len() > self.flush_threshold {
            self.flush()?;
        }
        Ok(true)
    }

    /// Append the buffered records to the output and clear the buffer.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let Some(w) = self.writer.as_mut() else { bail!("report {} already finished", self.final_path.display()) };
        for r in self.buffer.drain(..) {
            w.write_record(r.canonical_fields())
                .with_context(|| format!("write {}", self.tmp_path.display()))?;
        }
        w.flush().with_context(|| format!("flush {}", self.tmp_path.display()))?;
        self.flushes += 1;
        tracing::trace!("Flushed report buffer for {} ({} accepted so far)", self.date, self.accepted);
        Ok(())
    }

    /// Records currently held in memory.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn distinct_count(&self, provider: usize) -> Option<u64> {
        self.distinct.get(provider).map(|s| s.len() as u64)
    }

    /// Flush what is left, close and publish the report, then write one unique-count
    /// summary file per provider into `counts_dir`.
    /// On error the `.inprogress` file is removed.
    pub fn finish(mut self, counts_dir: &Path) -> Result<ReportStats> {
        if let Err(e) = self.publish() {
            self.writer.take();
            let _ = remove_with_backoff(&self.tmp_path, 4, 25);
            return Err(e);
        }

        let counts: Vec<ProviderCount> = self
            .providers
            .iter()
            .zip(self.distinct.iter())
            .map(|(p, ids)| ProviderCount {
                provider_code: p.code.clone(),
                provider_name: p.name.clone(),
                hh_id_count: ids.len() as u64,
            })
            .collect();
        write_provider_counts(counts_dir, self.date, &counts)?;

        tracing::info!(
            "Saved the report in file: {} ({} records for {})",
            self.final_path.display(),
            self.accepted,
            self.day_prefix
        );
        Ok(ReportStats {
            date: self.date.compact(),
            report_path: self.final_path.clone(),
            accepted: self.accepted,
            discarded: self.discarded,
            flushes: self.flushes,
            counts,
        })
    }

    fn publish(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(w) = self.writer.take() {
            let mut inner = w
                .into_inner()
                .map_err(|e| anyhow!("flush {}: {}", self.tmp_path.display(), e.error()))?;
            inner.flush()?;
            inner.get_ref().sync_all()?;
        }
        replace_file_atomic_backoff(&self.tmp_path, &self.final_path)
            .with_context(|| format!("publish report {}", self.final_path.display()))
    }

    /// Give up on this report: drop the handle and remove the partial output.
    pub fn abandon(mut self) {
        self.writer.take();
        let _ = remove_with_backoff(&self.tmp_path, 4, 25);
    }
}

/// One `date,provider_code,hh_id_count` file per provider.
pub fn write_provider_counts(dir: &Path, date: ReportDate, counts: &[ProviderCount]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::with_capacity(counts.len());
    for c in counts {
        let path = dir.join(count_file_name(&c.provider_name, date));
        let tmp = with_suffix(&path, ".inprogress");
        let res = (|| -> Result<()> {
            let file = create_with_backoff(&tmp, 16, 50).with_context(|| format!("create {}", tmp.display()))?;
            let mut w = csv::Writer::from_writer(BufWriter::new(file));
            w.write_record(["date", "provider_code", "hh_id_count"])?;
            w.write_record([date.dashed(), c.provider_code.clone(), c.hh_id_count.to_string()])?;
            w.flush()?;
            drop(w);
            replace_file_atomic_backoff(&tmp, &path).with_context(|| format!("publish {}", path.display()))
        })();
        if let Err(e) = res {
            let _ = remove_with_backoff(&tmp, 4, 25);
            return Err(e);
        }
        out.push(path);
    }
    Ok(out)
}
