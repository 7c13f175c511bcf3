//! Per-file normalization: decompress a fetched archive into memory, parse the
//! provider rows, stable-sort them by timestamp, and persist a canonical file.
//!
//! Output is written to `<canonical>.inprogress` and promoted with a rename, so a
//! failure at any point leaves no file a later stage would pick up as canonical.

use crate::mem::wait_for_memory;
use crate::paths::{canonical_path, with_suffix};
use crate::record::{EventRecord, CANONICAL_HEADER};
use crate::util::{create_with_backoff, open_with_backoff, remove_with_backoff, replace_file_atomic_backoff};
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zstd::stream::read::Decoder as ZstdDecoder;

/// Compression of a fetched object, decided by its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Zstd,
    Plain,
}

impl Codec {
    pub fn from_path(path: &Path) -> Self {
        let s = path.to_string_lossy();
        if s.ends_with(".gzip") || s.ends_with(".gz") {
            Codec::Gzip
        } else if s.ends_with(".zst") {
            Codec::Zstd
        } else {
            Codec::Plain
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizeStats {
    pub output: PathBuf,
    pub records: u64,
    pub decompressed_bytes: u64,
}

/// Decompress `input` completely into memory.
pub fn decompress_all(input: &Path, codec: Codec) -> Result<Vec<u8>> {
    let file = open_with_backoff(input, 16, 50).with_context(|| format!("open {}", input.display()))?;
    let mut buf = Vec::with_capacity(file.metadata().map(|m| m.len() as usize).unwrap_or(0));
    match codec {
        Codec::Gzip => {
            GzDecoder::new(file)
                .read_to_end(&mut buf)
                .with_context(|| format!("gunzip {}", input.display()))?;
        }
        Codec::Zstd => {
            let mut dec = ZstdDecoder::new(file).with_context(|| format!("zstd init {}", input.display()))?;
            dec.window_log_max(31)?;
            dec.read_to_end(&mut buf).with_context(|| format!("unzstd {}", input.display()))?;
        }
        Codec::Plain => {
            let mut file = file;
            file.read_to_end(&mut buf).with_context(|| format!("read {}", input.display()))?;
        }
    }
    Ok(buf)
}

/// Parse source-layout CSV (one header row) into records.
pub fn parse_source(bytes: &[u8]) -> Result<Vec<EventRecord>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let mut out = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row = row.with_context(|| format!("source row {}", i + 2))?;
        out.push(EventRecord::from_source(&row).with_context(|| format!("source row {}", i + 2))?);
    }
    Ok(out)
}

/// Stable sort by timestamp: equal timestamps keep their original relative order.
pub fn sort_by_timestamp(records: &mut [EventRecord]) {
    records.sort_by(|a, b| a.ts.cmp(&b.ts));
}

/// Write records in canonical layout (header first) to `output` atomically.
pub fn write_canonical(output: &Path, records: &[EventRecord], write_buf: usize) -> Result<()> {
    let tmp = with_suffix(output, ".inprogress");
    let res = (|| -> Result<()> {
        let file = create_with_backoff(&tmp, 16, 50).with_context(|| format!("create {}", tmp.display()))?;
        let mut w = csv::Writer::from_writer(BufWriter::with_capacity(write_buf.max(8 * 1024), file));
        w.write_record(CANONICAL_HEADER)?;
        for r in records {
            w.write_record(r.canonical_fields())?;
        }
        let mut inner = w.into_inner().map_err(|e| anyhow::anyhow!("flush {}: {}", tmp.display(), e.error()))?;
        inner.flush()?;
        inner.get_ref().sync_all()?;
        Ok(())
    })();
    if let Err(e) = res {
        let _ = remove_with_backoff(&tmp, 4, 25);
        return Err(e);
    }
    replace_file_atomic_backoff(&tmp, output)
}

/// Normalize `input` (compressed with `codec`) into the canonical file `output`.
/// `input` and `output` may be the same path for plain CSV.
pub fn normalize_archive(input: &Path, codec: Codec, output: &Path, write_buf: usize) -> Result<NormalizeStats> {
    wait_for_memory(0.10);
    let bytes = decompress_all(input, codec)?;
    let decompressed_bytes = bytes.len() as u64;

    let mut records = parse_source(&bytes).with_context(|| format!("parse {}", input.display()))?;
    drop(bytes);
    sort_by_timestamp(&mut records);

    write_canonical(output, &records, write_buf)?;
    tracing::debug!("Normalized {} into {} ({} records)", input.display(), output.display(), records.len());
    Ok(NormalizeStats { output: output.to_path_buf(), records: records.len() as u64, decompressed_bytes })
}

/// Normalize an archive whose codec and canonical path follow from its name.
pub fn normalize_file(archive: &Path) -> Result<NormalizeStats> {
    let codec = Codec::from_path(archive);
    normalize_archive(archive, codec, &canonical_path(archive), 256 * 1024)
}
