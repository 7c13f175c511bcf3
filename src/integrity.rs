use crate::date::iter_days;
use crate::paths::discover_canonical;
use crate::progress::maybe_progress;
use crate::record::EventRecord;
use crate::util::{init_tracing_once, open_with_backoff};
use crate::ViewershipETL;
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Read a canonical file end to end and confirm every row parses and timestamps
/// never decrease. Returns the number of records.
pub fn verify_canonical(path: &Path) -> Result<u64> {
    let f = open_with_backoff(path, 16, 50).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(BufReader::new(f));
    let mut prev: Option<String> = None;
    let mut n = 0u64;
    for row in rdr.records() {
        let row = row.with_context(|| format!("row {}", n + 2))?;
        let rec = EventRecord::from_canonical(&row).with_context(|| format!("row {}", n + 2))?;
        if let Some(p) = &prev {
            if rec.ts < *p {
                bail!("row {}: timestamp {} precedes {}", n + 2, rec.ts, p);
            }
        }
        prev = Some(rec.ts);
        n += 1;
    }
    Ok(n)
}

impl ViewershipETL {
    /// Check every canonical file the configured reporting days would read.
    /// Returns `(path, problem)` for files that are unreadable or out of order.
    pub fn check_canonical_integrity(&self) -> Result<Vec<(PathBuf, String)>> {
        init_tracing_once(self.opts.verbose);
        let (start, end) = self.opts.date_range()?;

        let mut window = Vec::new();
        for day in iter_days(start, end) {
            for d in day.look_around(self.opts.days_after) {
                if !window.contains(&d) {
                    window.push(d);
                }
            }
        }
        let files = discover_canonical(&self.opts.work_dir, &self.opts.providers, &window);
        let pb = maybe_progress(self.opts.progress, files.len() as u64, "Integrity");

        let errors: Vec<(PathBuf, String)> = files
            .par_iter()
            .filter_map(|input| {
                let res = verify_canonical(&input.path);
                if let Some(pb) = &pb { pb.inc(1); }
                res.err().map(|e| (input.path.clone(), format!("{e:#}")))
            })
            .collect();

        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }
        Ok(errors)
    }
}
