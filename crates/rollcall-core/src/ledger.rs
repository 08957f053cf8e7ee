//! Attendance ledger: an xlsx file holding only the latest recognition event.
//!
//! The file is either absent (nothing recognized last time, or never run) or
//! present with one row per recognized person, sorted by roll number. Every
//! update replaces it in full.

use crate::fsutil;
use crate::sheet::{cell_text, numeric};
use calamine::{Reader, Xlsx};
use chrono::NaiveDateTime;
use rust_xlsxwriter::Workbook;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const HEADER: [&str; 3] = ["Roll Number", "Name", "Timestamp"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance file not found: {0}")]
    NotFound(String),
    #[error("attendance io: {0}")]
    Io(#[from] std::io::Error),
    #[error("attendance write: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
    #[error("attendance read: {0}")]
    Read(#[from] calamine::XlsxError),
    #[error("attendance file malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub roll_number: String,
    pub name: String,
    pub timestamp: String,
}

/// On-disk state after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// No file.
    Absent,
    /// File holds this many records.
    Present(usize),
}

/// Sort key for roll numbers: numeric values first in numeric order, then
/// everything else lexically.
#[derive(Debug, PartialEq)]
enum RollKey<'a> {
    Numeric(f64),
    Text(&'a str),
}

impl<'a> RollKey<'a> {
    fn of(roll: &'a str) -> Self {
        match numeric(roll) {
            Some(v) => RollKey::Numeric(v),
            None => RollKey::Text(roll),
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RollKey::Numeric(a), RollKey::Numeric(b)) => a.total_cmp(b),
            (RollKey::Numeric(_), RollKey::Text(_)) => Ordering::Less,
            (RollKey::Text(_), RollKey::Numeric(_)) => Ordering::Greater,
            (RollKey::Text(a), RollKey::Text(b)) => a.cmp(b),
        }
    }
}

pub fn sort_records(records: &mut [AttendanceRecord]) {
    records.sort_by(|a, b| {
        RollKey::of(&a.roll_number)
            .cmp(&RollKey::of(&b.roll_number))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> LedgerState {
        match self.records() {
            Ok(records) => LedgerState::Present(records.len()),
            Err(_) if !self.path.exists() => LedgerState::Absent,
            // unreadable but present still counts as present
            Err(_) => LedgerState::Present(0),
        }
    }

    /// Replace the ledger with `recognized`, or delete it when the set is empty.
    pub fn update(
        &self,
        recognized: &BTreeSet<String>,
        roll_lookup: &HashMap<String, String>,
        now: NaiveDateTime,
    ) -> Result<LedgerState, LedgerError> {
        if recognized.is_empty() {
            if fsutil::remove_if_exists(&self.path)? {
                tracing::info!(path = %self.path.display(), "no known faces recognized; attendance file cleared");
            } else {
                tracing::info!("no known faces recognized; attendance file already absent");
            }
            return Ok(LedgerState::Absent);
        }

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let mut records: Vec<AttendanceRecord> = recognized
            .iter()
            .map(|name| AttendanceRecord {
                roll_number: roll_lookup.get(name).cloned().unwrap_or_default(),
                name: name.clone(),
                timestamp: timestamp.clone(),
            })
            .collect();
        sort_records(&mut records);

        let bytes = render(&records)?;
        fsutil::write_atomically(&self.path, &bytes)?;
        tracing::info!(path = %self.path.display(), records = records.len(), "attendance marked");
        Ok(LedgerState::Present(records.len()))
    }

    /// Raw bytes of the current ledger file.
    pub fn read(&self) -> Result<Vec<u8>, LedgerError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LedgerError::NotFound(self.path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        parse_records(&self.read()?)
    }
}

fn render(records: &[AttendanceRecord]) -> Result<Vec<u8>, LedgerError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, title) in HEADER.iter().enumerate() {
        sheet.write_string(0, col as u16, *title)?;
    }
    for (i, record) in records.iter().enumerate() {
        let row = (i + 1) as u32;
        match integer_cell(&record.roll_number) {
            Some(v) => sheet.write_number(row, 0, v)?,
            None => sheet.write_string(row, 0, record.roll_number.as_str())?,
        };
        sheet.write_string(row, 1, record.name.as_str())?;
        sheet.write_string(row, 2, record.timestamp.as_str())?;
    }

    Ok(workbook.save_to_buffer()?)
}

/// Roll numbers written as numeric cells must read back as the same text,
/// so only canonical integers qualify ("007" and "1e3" stay text).
fn integer_cell(roll: &str) -> Option<f64> {
    let v: i64 = roll.parse().ok()?;
    (v.to_string() == roll && v.unsigned_abs() < 1_000_000_000_000_000).then_some(v as f64)
}

/// Read a ledger workbook back into records.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LedgerError::Malformed("workbook has no sheets".into()))??;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .map(|r| r.iter().map(cell_text).collect())
        .unwrap_or_default();
    if header.len() < HEADER.len() || header[..HEADER.len()] != HEADER {
        return Err(LedgerError::Malformed(format!("unexpected header {header:?}")));
    }

    Ok(rows
        .filter(|r| r.iter().any(|c| !cell_text(c).is_empty()))
        .map(|r| {
            let cell = |i: usize| r.get(i).map(cell_text).unwrap_or_default();
            AttendanceRecord {
                roll_number: cell(0),
                name: cell(1),
                timestamp: cell(2),
            }
        })
        .collect())
}
