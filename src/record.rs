//! The usage-event record and its two CSV layouts: the provider source layout
//! (`hh_id` first) and the canonical layout (`ts` first) shared by canonical files
//! and aggregated reports.

use anyhow::{bail, Result};
use csv::StringRecord;

/// Column order of canonical files and aggregated reports.
pub const CANONICAL_HEADER: [&str; 9] =
    ["ts", "hh_id", "pg_id", "pg_name", "ch_num", "ch_name", "event", "zipcode", "country"];

/// Column order of the raw provider extracts.
/// e.g. `112961,2016-07-02 23:21:58,975540,"Oklahoma News Report",3,KETA,watch,79081,USA`
pub const SOURCE_HEADER: [&str; 9] =
    ["hh_id", "ts", "pg_id", "pg_name", "ch_num", "ch_name", "event", "zipcode", "country"];

pub const FIELD_COUNT: usize = 9;

/// One usage event. `ts` is `YYYY-MM-DD HH:MM:SS`, so lexical order is chronological order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventRecord {
    pub hh_id: String,
    pub ts: String,
    pub pg_id: String,
    pub pg_name: String,
    pub ch_num: String,
    pub ch_name: String,
    pub event: String,
    pub zipcode: String,
    pub country: String,
}

impl EventRecord {
    /// Build from a row in the provider source layout.
    pub fn from_source(row: &StringRecord) -> Result<Self> {
        if row.len() != FIELD_COUNT {
            bail!("expected {} fields in source row, found {}", FIELD_COUNT, row.len());
        }
        Ok(Self {
            hh_id: row[0].to_string(),
            ts: row[1].to_string(),
            pg_id: row[2].to_string(),
            pg_name: row[3].to_string(),
            ch_num: row[4].to_string(),
            ch_name: row[5].to_string(),
            event: row[6].to_string(),
            zipcode: row[7].to_string(),
            country: row[8].to_string(),
        })
    }

    /// Build from a row in the canonical layout.
    pub fn from_canonical(row: &StringRecord) -> Result<Self> {
        if row.len() != FIELD_COUNT {
            bail!("expected {} fields in canonical row, found {}", FIELD_COUNT, row.len());
        }
        Ok(Self {
            ts: row[0].to_string(),
            hh_id: row[1].to_string(),
            pg_id: row[2].to_string(),
            pg_name: row[3].to_string(),
            ch_num: row[4].to_string(),
            ch_name: row[5].to_string(),
            event: row[6].to_string(),
            zipcode: row[7].to_string(),
            country: row[8].to_string(),
        })
    }

    /// Fields in canonical order, ready for `csv::Writer::write_record`.
    pub fn canonical_fields(&self) -> [&str; FIELD_COUNT] {
        [
            &self.ts,
            &self.hh_id,
            &self.pg_id,
            &self.pg_name,
            &self.ch_num,
            &self.ch_name,
            &self.event,
            &self.zipcode,
            &self.country,
        ]
    }
}
