use crate::concurrency::map_limited;
use crate::config::ETLOptions;
use crate::date::{fetch_window, iter_days, ReportDate};
use crate::fetch::{FailedFetch, FetchCfg, FetchOrchestrator, FetchReport};
use crate::merge::CursorSet;
use crate::paths::{scan_canonical, select_keys};
use crate::progress::maybe_progress;
use crate::provider::ProviderList;
use crate::report::{report_file_name, DailyReport, ReportStats};
use crate::store::ObjectStore;
use crate::util::{create_with_backoff, init_tracing_once};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct ViewershipETL {
    pub(crate) opts: ETLOptions,
}

/// A canonical file (or work-dir entry) that stopped early or could not be opened
/// during a day's merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedInput {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub date: String,
    pub inputs: usize,
    pub merged: u64,
    pub report: ReportStats,
    pub truncated: Vec<SkippedInput>,
    pub unopened: Vec<SkippedInput>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayResult {
    Completed(DaySummary),
    Failed { date: String, error: String },
}

impl DayResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, DayResult::Completed(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub elapsed_secs: f64,
    pub providers: usize,
    pub fetched: usize,
    pub failed: Vec<FailedFetch>,
    pub days: Vec<DayResult>,
}

impl RunSummary {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let f = create_with_backoff(path, 16, 50).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

impl Default for ViewershipETL {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewershipETL {
    pub fn new() -> Self {
        Self { opts: ETLOptions::default() }
    }

    pub fn from_options(opts: ETLOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ETLOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn work_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_work_dir(dir); self }
    pub fn output_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_output_dir(dir); self }
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self { self.opts = self.opts.with_key_prefix(prefix); self }
    pub fn providers(mut self, providers: ProviderList) -> Self { self.opts = self.opts.with_providers(providers); self }
    pub fn date_range(mut self, start: Option<ReportDate>, end: Option<ReportDate>) -> Self { self.opts = self.opts.with_date_range(start, end); self }
    pub fn days_after(mut self, days: u32) -> Self { self.opts = self.opts.with_days_after(days); self }
    pub fn concurrency(mut self, n: usize) -> Self { self.opts = self.opts.with_concurrency(n); self }
    pub fn max_attempts(mut self, n: u32) -> Self { self.opts = self.opts.with_max_attempts(n); self }
    pub fn retry_delay(mut self, delay: Duration) -> Self { self.opts = self.opts.with_retry_delay(delay); self }
    pub fn keep_archives(mut self, yes: bool) -> Self { self.opts = self.opts.with_keep_archives(yes); self }
    pub fn block_size(mut self, n: usize) -> Self { self.opts = self.opts.with_block_size(n); self }
    pub fn flush_threshold(mut self, n: usize) -> Self { self.opts = self.opts.with_flush_threshold(n); self }
    pub fn report_name(mut self, name: impl Into<String>) -> Self { self.opts = self.opts.with_report_name(name); self }
    pub fn day_concurrency(mut self, n: usize) -> Self { self.opts = self.opts.with_day_concurrency(n); self }
    pub fn io_write_buffer(mut self, bytes: usize) -> Self { self.opts = self.opts.with_write_buffer(bytes); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn verbose(mut self, yes: bool) -> Self { self.opts = self.opts.with_verbose(yes); self }

    // -------- Operations --------

    /// List the store, select the keys covering the fetch window and fetch them.
    pub fn fetch<S: ObjectStore + ?Sized>(&self, store: &S) -> Result<FetchReport> {
        init_tracing_once(self.opts.verbose);
        let (start, end) = self.opts.date_range()?;
        fs::create_dir_all(&self.opts.work_dir)
            .with_context(|| format!("create work dir {}", self.opts.work_dir.display()))?;

        let keys = store
            .list_keys(&self.opts.key_prefix)
            .with_context(|| format!("list keys under '{}'", self.opts.key_prefix))?;
        let window = fetch_window(start, end, self.opts.days_after);
        let jobs = select_keys(&keys, &self.opts.providers, &window);
        if jobs.is_empty() {
            tracing::warn!("No keys under '{}' match the providers and dates requested.", self.opts.key_prefix);
        } else {
            tracing::info!("Selected {} of {} listed keys.", jobs.len(), keys.len());
        }

        let cfg = FetchCfg {
            work_dir: self.opts.work_dir.clone(),
            concurrency: self.opts.concurrency,
            max_attempts: self.opts.max_attempts,
            retry_delay: self.opts.retry_delay,
            keep_archives: self.opts.keep_archives,
            write_buffer_bytes: self.opts.write_buffer_bytes,
            progress: self.opts.progress,
        };
        let report = FetchOrchestrator::new(store, cfg).run(&jobs)?;

        if report.failed.is_empty() {
            tracing::info!("No failed downloads");
        } else {
            for f in &report.failed {
                tracing::warn!("Failed downloading: {}", f.key);
            }
        }
        Ok(report)
    }

    /// Merge the canonical files around `day` and write that day's report and
    /// per-provider household counts.
    pub fn aggregate_day(&self, day: ReportDate) -> Result<DaySummary> {
        let window = day.look_around(self.opts.days_after);
        let (inputs, unreadable) = scan_canonical(&self.opts.work_dir, &self.opts.providers, &window);
        if inputs.is_empty() {
            tracing::warn!("No canonical files found for {} in {}", day, self.opts.work_dir.display());
        } else {
            tracing::debug!("Merging {} canonical files for {}", inputs.len(), day);
        }

        let set = CursorSet::open(&inputs, self.opts.block_size);
        let path = self.opts.output_dir.join(report_file_name(&self.opts.report_name, day));
        let mut report = DailyReport::create(&path, day, &self.opts.providers, self.opts.flush_threshold)?;

        let mut engine = set.into_merge();
        let mut failure = None;
        for merged in engine.by_ref() {
            if let Err(e) = report.accept(merged.record, merged.provider) {
                failure = Some(e);
                break;
            }
        }
        let merge = engine.finish();
        if let Some(e) = failure {
            report.abandon();
            return Err(e.context(format!("aggregate {}", day.dashed())));
        }

        let truncated: Vec<SkippedInput> = merge
            .truncated()
            .map(|i| SkippedInput {
                path: i.cursor.path.clone(),
                reason: i.cursor.truncated.clone().unwrap_or_default(),
            })
            .collect();
        for t in &truncated {
            tracing::warn!("Report {} is missing the tail of {}: {}", day, t.path.display(), t.reason);
        }
        let unopened: Vec<SkippedInput> = unreadable
            .into_iter()
            .map(|(path, reason)| SkippedInput { path, reason })
            .chain(
                merge
                    .unopened
                    .iter()
                    .map(|(_, path, reason)| SkippedInput { path: path.clone(), reason: reason.clone() }),
            )
            .collect();

        let stats = report.finish(&self.opts.output_dir)?;
        Ok(DaySummary {
            date: day.compact(),
            inputs: inputs.len(),
            merged: merge.yielded,
            report: stats,
            truncated,
            unopened,
        })
    }

    /// Produce a report for every day in the configured range. A failing day is
    /// recorded and does not stop the others.
    pub fn aggregate(&self) -> Result<Vec<DayResult>> {
        init_tracing_once(self.opts.verbose);
        let (start, end) = self.opts.date_range()?;
        fs::create_dir_all(&self.opts.output_dir)
            .with_context(|| format!("create output dir {}", self.opts.output_dir.display()))?;

        let days: Vec<ReportDate> = iter_days(start, end).collect();
        let pb = maybe_progress(self.opts.progress, days.len() as u64, "Reports");
        let results = map_limited(&days, self.opts.day_concurrency, |&day| {
            let res = match self.aggregate_day(day) {
                Ok(summary) => DayResult::Completed(summary),
                Err(e) => {
                    tracing::error!("Report for {} failed: {:#}", day, e);
                    DayResult::Failed { date: day.compact(), error: format!("{e:#}") }
                }
            };
            if let Some(pb) = &pb { pb.inc(1); }
            res
        });
        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }
        Ok(results)
    }

    /// Fetch, then aggregate every day. Fetch failures are reported, not fatal.
    pub fn run<S: ObjectStore + ?Sized>(&self, store: &S) -> Result<RunSummary> {
        init_tracing_once(self.opts.verbose);
        let started = Instant::now();
        let started_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        if self.opts.verbose {
            self.print_params();
        }

        let fetched = self.fetch(store)?;
        let days = self.aggregate()?;

        let elapsed = started.elapsed();
        let failed_days = days.iter().filter(|d| !d.is_completed()).count();
        tracing::info!(
            "Processed {} providers over {} days ({} failed) in {:.2?}",
            self.opts.providers.len(),
            days.len(),
            failed_days,
            elapsed
        );
        Ok(RunSummary {
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            providers: self.opts.providers.len(),
            fetched: fetched.succeeded.len(),
            failed: fetched.failed,
            days,
        })
    }

    fn print_params(&self) {
        let o = &self.opts;
        let range = o
            .date_range()
            .map(|(s, e)| format!("{} .. {}", s.dashed(), e.dashed()))
            .unwrap_or_else(|e| e.to_string());
        tracing::info!("Date range: {}", range);
        tracing::info!("Providers: {}", o.providers.len());
        tracing::info!("Key prefix: {}", o.key_prefix);
        tracing::info!("Work dir: {}, output dir: {}", o.work_dir.display(), o.output_dir.display());
        tracing::info!("Days after: {}", o.days_after);
        tracing::info!("Concurrency: {}, max attempts: {}, retry delay: {:?}", o.concurrency, o.max_attempts, o.retry_delay);
    }
}
