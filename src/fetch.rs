//! Bounded, retrying fetch of selected keys.
//!
//! Jobs run on a dedicated pool of `concurrency` threads; each thread takes one
//! job through all of its attempts before picking up the next. Outcomes are
//! collected only after every job has returned, so the report always holds
//! exactly one outcome per job.

use crate::normalize::{normalize_archive, Codec};
use crate::paths::{canonical_path, local_path, with_suffix, SourceKey};
use crate::progress::maybe_progress;
use crate::store::ObjectStore;
use crate::util::{create_with_backoff, remove_with_backoff, replace_file_atomic_backoff};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::sleep;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct FetchCfg {
    pub work_dir: PathBuf,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub keep_archives: bool,
    pub write_buffer_bytes: usize,
    pub progress: bool,
}

impl Default for FetchCfg {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            concurrency: 10,
            max_attempts: 3,
            retry_delay: Duration::from_secs(10),
            keep_archives: true,
            write_buffer_bytes: 256 * 1024,
            progress: false,
        }
    }
}

/// A key that was fetched and normalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FetchedFile {
    pub key: String,
    pub provider: usize,
    pub date: String,
    pub canonical: PathBuf,
    pub records: u64,
    pub attempts: u32,
}

/// A key that exhausted its attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedFetch {
    pub key: String,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(FetchedFile),
    Failed(FailedFetch),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub succeeded: Vec<FetchedFile>,
    pub failed: Vec<FailedFetch>,
}

impl FetchReport {
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.key.as_str()).collect()
    }

    fn from_outcomes(outcomes: Vec<FetchOutcome>) -> Self {
        let mut report = Self::default();
        for o in outcomes {
            match o {
                FetchOutcome::Fetched(f) => report.succeeded.push(f),
                FetchOutcome::Failed(f) => report.failed.push(f),
            }
        }
        report
    }
}

pub struct FetchOrchestrator<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    cfg: FetchCfg,
}

impl<'a, S: ObjectStore + ?Sized> FetchOrchestrator<'a, S> {
    pub fn new(store: &'a S, cfg: FetchCfg) -> Self {
        Self { store, cfg }
    }

    /// Run every job to a terminal outcome. Only pool construction can fail;
    /// individual job failures land in `FetchReport::failed`.
    pub fn run(&self, jobs: &[SourceKey]) -> Result<FetchReport> {
        if jobs.is_empty() {
            return Ok(FetchReport::default());
        }
        let threads = self.cfg.concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fetch-{i}"))
            .build()
            .context("build fetch pool")?;

        let pb = maybe_progress(self.cfg.progress, jobs.len() as u64, "Fetch");
        let ok = AtomicU64::new(0);
        let bad = AtomicU64::new(0);

        tracing::info!("Fetching {} keys with {} workers", jobs.len(), threads);
        let outcomes: Vec<FetchOutcome> = pool.install(|| {
            jobs.par_iter()
                .with_max_len(1)
                .map(|job| {
                    let outcome = self.run_job(job);
                    match &outcome {
                        FetchOutcome::Fetched(_) => ok.fetch_add(1, Ordering::Relaxed),
                        FetchOutcome::Failed(_) => bad.fetch_add(1, Ordering::Relaxed),
                    };
                    if let Some(pb) = &pb {
                        pb.inc(1);
                        pb.set_message(format!(
                            "ok {} / failed {}",
                            ok.load(Ordering::Relaxed),
                            bad.load(Ordering::Relaxed)
                        ));
                    }
                    outcome
                })
                .collect()
        });
        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }

        let report = FetchReport::from_outcomes(outcomes);
        tracing::info!("Fetched {} keys, {} failed", report.succeeded.len(), report.failed.len());
        Ok(report)
    }

    fn run_job(&self, job: &SourceKey) -> FetchOutcome {
        let Some(local) = local_path(&self.cfg.work_dir, &job.key) else {
            tracing::warn!("Refusing {}: key does not map to a path under {}", job.key, self.cfg.work_dir.display());
            return FetchOutcome::Failed(FailedFetch {
                key: job.key.clone(),
                attempts: 0,
                last_error: format!("key {} escapes the work dir", job.key),
            });
        };
        let max = self.cfg.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max {
            tracing::debug!("Downloading {} (attempt {}/{})", job.key, attempt, max);
            match self.attempt(job, &local) {
                Ok((canonical, records)) => {
                    return FetchOutcome::Fetched(FetchedFile {
                        key: job.key.clone(),
                        provider: job.provider,
                        date: job.date.compact(),
                        canonical,
                        records,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    last_error = format!("{e:#}");
                    tracing::warn!("Attempt {}/{} for {} failed: {}", attempt, max, job.key, last_error);
                    if attempt < max && !self.cfg.retry_delay.is_zero() {
                        tracing::info!("Sleeping {:?} before retrying {}", self.cfg.retry_delay, job.key);
                        sleep(self.cfg.retry_delay);
                    }
                }
            }
        }
        FetchOutcome::Failed(FailedFetch { key: job.key.clone(), attempts: max, last_error })
    }

    /// One attempt: download into a staging file, normalize it, then keep or drop the archive.
    fn attempt(&self, job: &SourceKey, local: &Path) -> Result<(PathBuf, u64)> {
        let staging = with_suffix(local, ".download");
        let codec = Codec::from_path(local);
        let canonical = canonical_path(local);

        let res = (|| -> Result<u64> {
            let bytes = self.store.fetch(&job.key).with_context(|| format!("fetch {}", job.key))?;
            {
                let mut f = create_with_backoff(&staging, 16, 50)
                    .with_context(|| format!("create {}", staging.display()))?;
                f.write_all(&bytes).with_context(|| format!("write {}", staging.display()))?;
                f.sync_all()?;
            }
            drop(bytes);

            let stats = normalize_archive(&staging, codec, &canonical, self.cfg.write_buffer_bytes)?;
            if self.cfg.keep_archives && codec != Codec::Plain {
                replace_file_atomic_backoff(&staging, local)?;
            } else {
                remove_with_backoff(&staging, 4, 25)?;
            }
            Ok(stats.records)
        })();

        match res {
            Ok(records) => Ok((canonical, records)),
            Err(e) => {
                let _ = remove_with_backoff(&staging, 4, 25);
                Err(e)
            }
        }
    }
}
