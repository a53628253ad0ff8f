//! Spreadsheet and CSV import.
//!
//! A file goes through four stages: [`reader`] turns bytes into a header row
//! plus string cells, [`mapping`] decides which column feeds which trade
//! field, [`values`] normalises every row into a [`NewTrade`](crate::models::NewTrade)
//! and [`reconcile`] writes the batch, updating trades whose IDU already
//! exists and creating the rest. [`session`] keeps parsed files between the
//! upload and the commit request.

pub mod mapping;
pub mod reader;
pub mod reconcile;
pub mod session;
pub mod values;

use thiserror::Error;

pub use mapping::{auto_map, ColumnMapping, Field};
pub use reader::{read_file, RawTable};
pub use reconcile::{apply_import, ImportLogEntry, ImportReport};
pub use session::{ImportPreview, ImportSession, ImportSessions};
pub use values::{normalize_rows, PercentMode};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("invalid or empty CSV: expected a header row and at least one data row")]
    EmptyCsv,

    #[error("the spreadsheet has no data")]
    EmptySpreadsheet,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("missing mapping for: {}", .0.join(", "))]
    MissingMapping(Vec<&'static str>),

    #[error("column \"{column}\" not found in file headers. Available headers: {}", .available.join(", "))]
    UnknownColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("row {row}: {message}")]
    Row { row: usize, message: String },
}

impl ImportError {
    pub(crate) fn row(row: usize, message: impl Into<String>) -> Self {
        ImportError::Row {
            row,
            message: message.into(),
        }
    }
}
