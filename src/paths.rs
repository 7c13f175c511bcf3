use crate::date::ReportDate;
use crate::provider::ProviderList;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Compression suffixes recognised on object keys.
pub const ARCHIVE_SUFFIXES: [&str; 3] = [".gzip", ".gz", ".zst"];

/// One object selected for download: which provider and day it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceKey {
    pub key: String,
    pub provider: usize,
    pub date: ReportDate,
}

/// A canonical file participating in a day's merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalInput {
    pub provider: usize,
    pub date: ReportDate,
    pub path: PathBuf,
}

/// Pick the keys that carry `<providerName>-<YYYYMMDD>.csv` for one of `days`.
/// Longer provider names are tried first so that a name which is a suffix of
/// another cannot claim its files. Each key is selected at most once; keys that
/// would land outside the work dir are skipped.
pub fn select_keys(keys: &[String], providers: &ProviderList, days: &[ReportDate]) -> Vec<SourceKey> {
    let mut order: Vec<usize> = (0..providers.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(providers.get(i).map(|p| p.name.len()).unwrap_or(0)));

    let mut lookups: Vec<(String, usize, ReportDate)> = Vec::with_capacity(order.len() * days.len());
    for &i in &order {
        let Some(p) = providers.get(i) else { continue };
        for d in days {
            lookups.push((format!("{}-{}.csv", p.name, d.compact()), i, *d));
        }
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for key in keys {
        if let Some((_, provider, date)) = lookups.iter().find(|(needle, _, _)| key.contains(needle.as_str())) {
            if local_path(Path::new(""), key).is_none() {
                tracing::warn!("Skipping key {:?}: it does not map to a path under the work dir", key);
                continue;
            }
            if seen.insert(key.clone()) {
                out.push(SourceKey { key: key.clone(), provider: *provider, date: *date });
            }
        }
    }
    out
}

/// Where a key is materialized locally. `None` when a segment of the key is
/// `.`, `..`, absolute or otherwise not a plain name, since the result would not
/// stay inside `work_dir`.
pub fn local_path(work_dir: &Path, key: &str) -> Option<PathBuf> {
    if key.starts_with('/') {
        return None;
    }
    let mut out = work_dir.to_path_buf();
    for seg in key.split('/').filter(|s| !s.is_empty()) {
        let mut parts = Path::new(seg).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(name)), None) => out.push(name),
            _ => return None,
        }
    }
    Some(out)
}

/// The canonical file derived from an archive path: compression suffix stripped.
/// A path without a known suffix is its own canonical file.
pub fn canonical_path(archive: &Path) -> PathBuf {
    let s = archive.to_string_lossy();
    for suffix in ARCHIVE_SUFFIXES {
        if let Some(stripped) = s.strip_suffix(suffix) {
            return PathBuf::from(stripped);
        }
    }
    archive.to_path_buf()
}

/// Temp sibling used while a file is being written; never matches `*.csv`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn names_provider(stem: &str, name: &str) -> bool {
    match stem.strip_suffix(name) {
        Some("") => true,
        Some(head) => head.ends_with(' ') || head.ends_with('-') || head.ends_with('_'),
        None => false,
    }
}

/// Walk `work_dir` for canonical files named `<providerName>-<YYYYMMDD>.csv` whose
/// date falls in `window`. Output is ordered by (date, provider, path) so a day's
/// cursor set is built in the same order on every run.
pub fn discover_canonical(work_dir: &Path, providers: &ProviderList, window: &[ReportDate]) -> Vec<CanonicalInput> {
    scan_canonical(work_dir, providers, window).0
}

/// Like [`discover_canonical`], also returning the entries the walk could not
/// read as `(path, error)` pairs.
pub fn scan_canonical(
    work_dir: &Path,
    providers: &ProviderList,
    window: &[ReportDate],
) -> (Vec<CanonicalInput>, Vec<(PathBuf, String)>) {
    let re = Regex::new(r"^(.+)-(\d{8})\.csv$").expect("static regex");
    let wanted: BTreeSet<ReportDate> = window.iter().copied().collect();
    let mut found = BTreeSet::<(ReportDate, usize, PathBuf)>::new();
    let mut unreadable = Vec::new();
    if !work_dir.exists() {
        return (Vec::new(), unreadable);
    }
    for entry in WalkDir::new(work_dir).min_depth(1) {
        let ent = match entry {
            Ok(ent) => ent,
            Err(e) => {
                let path = e.path().unwrap_or(work_dir).to_path_buf();
                tracing::warn!("Cannot read {} while looking for canonical files: {}", path.display(), e);
                unreadable.push((path, e.to_string()));
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        let Some(name) = ent.file_name().to_str() else { continue };
        let Some(caps) = re.captures(name) else { continue };
        let Ok(date) = caps[2].parse::<ReportDate>() else { continue };
        if !wanted.contains(&date) {
            continue;
        }
        // Key file names may carry a prefix before the provider name.
        let stem = &caps[1];
        let provider = (0..providers.len())
            .filter_map(|i| providers.get(i).map(|p| (i, p)))
            .filter(|(_, p)| names_provider(stem, &p.name))
            .max_by_key(|(_, p)| p.name.len())
            .map(|(i, _)| i);
        if let Some(provider) = provider {
            found.insert((date, provider, ent.path().to_path_buf()));
        }
    }
    let inputs = found
        .into_iter()
        .map(|(date, provider, path)| CanonicalInput { provider, date, path })
        .collect();
    (inputs, unreadable)
}
