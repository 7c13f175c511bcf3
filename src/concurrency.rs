//! Concurrency helper: limit the number of independent work items processed in parallel.

use rayon::prelude::*;

/// Map `f` over `items` with at most `limit` items in flight, preserving input order
/// in the output. Each item's result is kept separately so one failure does not
/// cancel its siblings.
pub fn map_limited<T, R, F>(items: &[T], limit: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Sync + Fn(&T) -> R,
{
    if limit <= 1 {
        return items.iter().map(&f).collect();
    }
    let mut out = Vec::with_capacity(items.len());
    for chunk in items.chunks(limit) {
        let part: Vec<R> = chunk.par_iter().map(&f).collect();
        out.extend(part);
    }
    out
}
