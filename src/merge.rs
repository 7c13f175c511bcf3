//! K-way merge of time-sorted canonical files.
//!
//! Every live cursor contributes its head timestamp to a min-heap; the engine pops
//! the smallest, yields that cursor's record and re-inserts the cursor's next head.
//! Equal timestamps resolve to the cursor added first, which is the order a linear
//! scan over the set would pick.
//!
//! Inputs must each be sorted by timestamp. This is not checked here; see
//! `integrity::verify_canonical`.

use crate::cursor::{CursorReport, FileCursor};
use crate::paths::CanonicalInput;
use crate::record::EventRecord;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;

/// A record together with the provider key of the file it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedRecord {
    pub record: EventRecord,
    pub provider: usize,
}

/// Per-file outcome of a merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputReport {
    pub provider: usize,
    pub cursor: CursorReport,
}

/// Cursors taking part in one merge, each tagged with its provider.
#[derive(Default)]
pub struct CursorSet {
    cursors: Vec<(usize, FileCursor)>,
    /// Files that could not be opened at all.
    unopened: Vec<(usize, PathBuf, String)>,
}

impl CursorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cursor per input. Files that fail to open are logged and recorded,
    /// not fatal.
    pub fn open(inputs: &[CanonicalInput], block_size: usize) -> Self {
        let mut set = Self::new();
        for input in inputs {
            match FileCursor::open(&input.path, block_size) {
                Ok(c) => set.push(input.provider, c),
                Err(e) => {
                    tracing::warn!(path = %input.path.display(), "Could not open canonical file: {:#}", e);
                    set.unopened.push((input.provider, input.path.clone(), format!("{e:#}")));
                }
            }
        }
        set
    }

    pub fn push(&mut self, provider: usize, cursor: FileCursor) {
        self.cursors.push((provider, cursor));
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn unopened(&self) -> &[(usize, PathBuf, String)] {
        &self.unopened
    }

    pub fn into_merge(self) -> MergeEngine {
        MergeEngine::new(self)
    }
}

#[derive(Eq)]
struct HeapItem {
    ts: String,
    idx: usize,
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other.ts.cmp(&self.ts).then_with(|| other.idx.cmp(&self.idx))
    }
}
impl PartialOrd for HeapItem { fn partial_cmp(&self, o: &Self) -> Option<Ordering> { Some(self.cmp(o)) } }
impl PartialEq for HeapItem { fn eq(&self, o: &Self) -> bool { self.ts == o.ts && self.idx == o.idx } }

/// Yields the globally earliest pending record until every cursor has ended.
pub struct MergeEngine {
    set: CursorSet,
    heap: BinaryHeap<HeapItem>,
    yielded: u64,
}

impl MergeEngine {
    pub fn new(mut set: CursorSet) -> Self {
        let mut heap = BinaryHeap::with_capacity(set.cursors.len());
        for (idx, (_, cursor)) in set.cursors.iter_mut().enumerate() {
            if let Some(ts) = cursor.peek_timestamp() {
                heap.push(HeapItem { ts: ts.to_string(), idx });
            }
        }
        Self { set, heap, yielded: 0 }
    }

    /// Close every cursor and report what each file delivered.
    pub fn finish(mut self) -> MergeReport {
        let mut inputs = Vec::with_capacity(self.set.cursors.len());
        for (provider, cursor) in self.set.cursors.iter_mut() {
            cursor.close();
            inputs.push(InputReport { provider: *provider, cursor: cursor.report() });
        }
        MergeReport { yielded: self.yielded, inputs, unopened: std::mem::take(&mut self.set.unopened) }
    }
}

impl Iterator for MergeEngine {
    type Item = MergedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.heap.pop()?;
            let (provider, cursor) = &mut self.set.cursors[top.idx];
            let Some(record) = cursor.pop() else { continue };
            if let Some(ts) = cursor.peek_timestamp() {
                self.heap.push(HeapItem { ts: ts.to_string(), idx: top.idx });
            }
            self.yielded += 1;
            return Some(MergedRecord { record, provider: *provider });
        }
    }
}

/// Summary of one completed merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeReport {
    pub yielded: u64,
    pub inputs: Vec<InputReport>,
    pub unopened: Vec<(usize, PathBuf, String)>,
}

impl MergeReport {
    pub fn truncated(&self) -> impl Iterator<Item = &InputReport> {
        self.inputs.iter().filter(|i| i.cursor.truncated.is_some())
    }
}
