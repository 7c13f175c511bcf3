use crate::cursor::DEFAULT_BLOCK_SIZE;
use crate::date::ReportDate;
use crate::provider::ProviderList;
use crate::report::DEFAULT_FLUSH_THRESHOLD;
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User-facing options with sensible defaults and builder chaining.
/// Built once, then passed by value into the pipeline; nothing here is global.
#[derive(Clone, Debug)]
pub struct ETLOptions {
    pub work_dir: PathBuf,            // local mirror of fetched keys + canonical files
    pub output_dir: PathBuf,          // reports and unique-count summaries
    pub key_prefix: String,           // listing prefix in the object store
    pub providers: ProviderList,
    pub start: Option<ReportDate>,    // inclusive; None = today
    pub end: Option<ReportDate>,      // inclusive; None = today
    pub days_after: u32,              // later days' files scanned for each reporting day

    // fetch stage
    pub concurrency: usize,           // simultaneous fetch jobs
    pub max_attempts: u32,            // attempts per key before it is reported failed
    pub retry_delay: Duration,        // fixed sleep between attempts
    pub keep_archives: bool,          // keep the compressed object beside its canonical file

    // merge/report stage
    pub block_size: usize,            // cursor look-ahead window
    pub flush_threshold: usize,       // report buffer size before a flush
    pub report_name: String,
    pub day_concurrency: usize,       // reporting days processed in parallel

    pub write_buffer_bytes: usize,
    pub progress: bool,
    pub verbose: bool,
}

impl Default for ETLOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            key_prefix: "cdw-viewership-reports".to_string(),
            providers: ProviderList::default(),
            start: None,
            end: None,
            days_after: 1,
            concurrency: 10,
            max_attempts: 3,
            retry_delay: Duration::from_secs(10),
            keep_archives: true,
            block_size: DEFAULT_BLOCK_SIZE,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            report_name: "viewership-report".to_string(),
            day_concurrency: 4,
            write_buffer_bytes: 256 * 1024,
            progress: true,
            verbose: false,
        }
    }
}

impl ETLOptions {
    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
    pub fn with_providers(mut self, providers: ProviderList) -> Self {
        self.providers = providers;
        self
    }
    pub fn with_date_range(mut self, start: Option<ReportDate>, end: Option<ReportDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
    pub fn with_days_after(mut self, days: u32) -> Self {
        self.days_after = days;
        self
    }
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
    pub fn with_keep_archives(mut self, yes: bool) -> Self {
        self.keep_archives = yes;
        self
    }
    pub fn with_block_size(mut self, n: usize) -> Self {
        self.block_size = n.max(1);
        self
    }
    pub fn with_flush_threshold(mut self, n: usize) -> Self {
        self.flush_threshold = n.max(1);
        self
    }
    pub fn with_report_name(mut self, name: impl Into<String>) -> Self {
        self.report_name = name.into();
        self
    }
    pub fn with_day_concurrency(mut self, n: usize) -> Self {
        self.day_concurrency = n.max(1);
        self
    }
    pub fn with_write_buffer(mut self, bytes: usize) -> Self {
        self.write_buffer_bytes = bytes.max(8 * 1024);
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_verbose(mut self, yes: bool) -> Self {
        self.verbose = yes;
        self
    }

    /// Resolved inclusive reporting range; missing ends default to today.
    pub fn date_range(&self) -> Result<(ReportDate, ReportDate)> {
        let today = ReportDate::today();
        let start = self.start.unwrap_or(today);
        let end = self.end.unwrap_or(today);
        if start > end {
            bail!("invalid date range: from {} is after to {}", start, end);
        }
        Ok((start, end))
    }
}
