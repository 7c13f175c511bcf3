mod config;
mod date;
mod record;
mod provider;
mod store;
mod paths;

mod progress;
mod concurrency;
mod util;
mod mem;

mod fetch;
mod normalize;
mod cursor;
mod merge;
mod report;
mod integrity;
mod pipeline;

pub use crate::config::ETLOptions;
pub use crate::date::{fetch_window, iter_days, normalize_date_str, ReportDate};
pub use crate::pipeline::{DayResult, DaySummary, RunSummary, SkippedInput, ViewershipETL};
pub use crate::provider::{load_providers, Provider, ProviderList};
pub use crate::record::{EventRecord, CANONICAL_HEADER, SOURCE_HEADER};

// Object-store seam and the built-in stores.
pub use crate::store::{LocalStore, ObjectStore, S3Credentials, S3Store, StoreError};

// Key selection and local layout.
pub use crate::paths::{
    canonical_path, discover_canonical, local_path, scan_canonical, select_keys, CanonicalInput, SourceKey,
};

// Fetch stage.
pub use crate::fetch::{FailedFetch, FetchCfg, FetchOrchestrator, FetchOutcome, FetchReport, FetchedFile};
pub use crate::normalize::{normalize_archive, normalize_file, sort_by_timestamp, Codec, NormalizeStats};

// Merge and report stage.
pub use crate::cursor::{CursorReport, CursorState, FileCursor, DEFAULT_BLOCK_SIZE};
pub use crate::merge::{CursorSet, InputReport, MergeEngine, MergeReport, MergedRecord};
pub use crate::report::{
    count_file_name, report_file_name, write_provider_counts, DailyReport, ProviderCount, ReportStats,
    DEFAULT_FLUSH_THRESHOLD,
};

pub use crate::integrity::verify_canonical;

pub use crate::util::init_tracing_once;
