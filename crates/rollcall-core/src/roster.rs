//! Roster spreadsheet parsing.
//!
//! The first sheet's first row is the header. `Images` and `Names` are
//! required; `Roll no` is optional.

use crate::sheet::cell_text;
use calamine::{Data, Reader, Xlsx};
use std::io::Cursor;
use thiserror::Error;

pub const IMAGES_COLUMN: &str = "Images";
pub const NAMES_COLUMN: &str = "Names";
pub const ROLL_COLUMN: &str = "Roll no";

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster is not a readable xlsx workbook: {0}")]
    Unreadable(#[from] calamine::XlsxError),
    #[error("roster workbook has no sheets")]
    NoSheets,
    #[error("roster is missing required column {0:?}")]
    MissingColumn(&'static str),
}

/// One data row of the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    /// 1-based spreadsheet row number, for log messages.
    pub line: usize,
    pub image_url: String,
    pub name: String,
    pub roll_number: String,
}

pub fn parse_roster(bytes: &[u8]) -> Result<Vec<RosterRow>, RosterError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))?;
    let range = workbook.worksheet_range_at(0).ok_or(RosterError::NoSheets)??;

    // calamine trims leading empty rows; keep line numbers true to the sheet
    let first_line = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);
    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .map(|r| r.iter().map(cell_text).collect())
        .unwrap_or_default();
    let column = |title: &str| header.iter().position(|h| h == title);

    let images = column(IMAGES_COLUMN).ok_or(RosterError::MissingColumn(IMAGES_COLUMN))?;
    let names = column(NAMES_COLUMN).ok_or(RosterError::MissingColumn(NAMES_COLUMN))?;
    let roll = column(ROLL_COLUMN);

    let cell = |row: &[Data], idx: usize| row.get(idx).map(cell_text).unwrap_or_default();

    Ok(rows
        .enumerate()
        .filter(|(_, r)| r.iter().any(|c| !cell_text(c).is_empty()))
        .map(|(i, r)| RosterRow {
            line: first_line + i + 1,
            image_url: cell(r, images),
            name: cell(r, names),
            roll_number: roll.map(|idx| cell(r, idx)).unwrap_or_default(),
        })
        .collect())
}
