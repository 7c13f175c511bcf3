//! Buffered forward reader over one canonical file.
//!
//! The cursor keeps at most `block_size` upcoming records in memory and refills
//! the window from disk only when it runs empty. When the underlying reader hits
//! end-of-file (or a read error) the file handle is dropped immediately; the
//! cursor counts as ended once the remaining window has been drained.

use crate::record::EventRecord;
use crate::util::open_with_backoff;
use anyhow::{Context, Result};
use csv::StringRecord;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const DEFAULT_BLOCK_SIZE: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Unopened,
    /// Window holds the earliest unconsumed records.
    Primed,
    /// Window drained; the next `pop`/`peek` refills it.
    EmptyRefilling,
    Ended,
}

/// What one cursor delivered over its lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorReport {
    pub path: PathBuf,
    pub records_read: u64,
    pub records_popped: u64,
    /// Set when reading stopped on an error instead of end-of-file; the unread
    /// tail of the file was skipped.
    pub truncated: Option<String>,
}

pub struct FileCursor {
    path: PathBuf,
    block_size: usize,
    reader: Option<csv::Reader<BufReader<File>>>,
    window: VecDeque<EventRecord>,
    row: StringRecord,
    state: CursorState,
    records_read: u64,
    records_popped: u64,
    truncated: Option<String>,
}

impl FileCursor {
    /// A cursor that has not touched the file yet.
    pub fn new(path: impl AsRef<Path>, block_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            block_size: block_size.max(1),
            reader: None,
            window: VecDeque::new(),
            row: StringRecord::new(),
            state: CursorState::Unopened,
            records_read: 0,
            records_popped: 0,
            truncated: None,
        }
    }

    /// Open the file, skip its header row and prime the window with one block.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let mut cursor = Self::new(path, block_size);
        cursor.init()?;
        Ok(cursor)
    }

    /// Open and prime an `Unopened` cursor. On failure the cursor is `Ended`.
    pub fn init(&mut self) -> Result<()> {
        if self.state != CursorState::Unopened {
            return Ok(());
        }
        let file = match open_with_backoff(&self.path, 4, 25) {
            Ok(f) => f,
            Err(e) => {
                self.state = CursorState::Ended;
                return Err(e).with_context(|| format!("open canonical file {}", self.path.display()));
            }
        };
        // The csv reader consumes the header row itself.
        let rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::with_capacity(64 * 1024, file));
        self.reader = Some(rdr);
        self.state = CursorState::EmptyRefilling;
        self.refill();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state == CursorState::Ended
    }

    /// True while the file handle is still held.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Timestamp of the next unconsumed record; `None` means end of data.
    pub fn peek_timestamp(&mut self) -> Option<&str> {
        if self.state == CursorState::EmptyRefilling {
            self.refill();
        }
        self.window.front().map(|r| r.ts.as_str())
    }

    /// Take the next record, refilling the window from disk if this drains it.
    pub fn pop(&mut self) -> Option<EventRecord> {
        if self.state == CursorState::EmptyRefilling {
            self.refill();
        }
        let rec = self.window.pop_front()?;
        self.records_popped += 1;
        if self.window.is_empty() {
            self.state = CursorState::EmptyRefilling;
            self.refill();
        }
        Some(rec)
    }

    /// Read up to one block into the window.
    fn refill(&mut self) {
        let Some(rdr) = self.reader.as_mut() else {
            self.finish_if_drained();
            return;
        };
        let mut hit_end = false;
        for _ in 0..self.block_size {
            match rdr.read_record(&mut self.row) {
                Ok(true) => match EventRecord::from_canonical(&self.row) {
                    Ok(rec) => {
                        self.window.push_back(rec);
                        self.records_read += 1;
                    }
                    Err(e) => {
                        self.truncated = Some(format!("row {}: {e}", self.records_read + 2));
                        hit_end = true;
                        break;
                    }
                },
                Ok(false) => {
                    hit_end = true;
                    break;
                }
                Err(e) => {
                    self.truncated = Some(format!("row {}: {e}", self.records_read + 2));
                    hit_end = true;
                    break;
                }
            }
        }
        if hit_end {
            self.release();
        }
        if let Some(reason) = &self.truncated {
            tracing::warn!(
                path = %self.path.display(),
                records_read = self.records_read,
                "Cursor stopped early, remaining records skipped: {}", reason
            );
        }
        self.finish_if_drained();
    }

    fn finish_if_drained(&mut self) {
        if self.window.is_empty() {
            if self.reader.is_none() {
                self.state = CursorState::Ended;
            }
        } else {
            self.state = CursorState::Primed;
        }
    }

    /// Drop the file handle. Safe to call any number of times.
    fn release(&mut self) {
        if self.reader.take().is_some() {
            tracing::trace!("Closed {}", self.path.display());
        }
    }

    /// End the cursor now, discarding anything not yet consumed.
    pub fn close(&mut self) {
        self.release();
        self.window.clear();
        self.state = CursorState::Ended;
    }

    pub fn report(&self) -> CursorReport {
        CursorReport {
            path: self.path.clone(),
            records_read: self.records_read,
            records_popped: self.records_popped,
            truncated: self.truncated.clone(),
        }
    }
}
