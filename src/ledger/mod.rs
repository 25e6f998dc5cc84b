//! Run ledger synchronization.
//!
//! The ledger is the external history of all runs: one row per run, written
//! once when the run starts and completed when it ends. Backends:
//!
//! - [`csv::CsvLedger`]: a shared CSV table, rewritten whole on every change
//! - [`memory::MemoryLedger`]: in-process table with fault switches, for tests
//!
//! Access is assumed to come from a single acquisition session. Reading the
//! last run number and writing the start row are not atomic with respect to
//! another writer of the same table.

pub mod csv;
pub mod memory;

use crate::error::LedgerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Column order of the ledger table.
pub const COLUMNS: [&str; 10] = [
    "run",
    "start_desc",
    "start_date",
    "start_epoch",
    "filename",
    "beam",
    "end_date",
    "end_epoch",
    "events",
    "end_desc",
];

/// One ledger row. End columns stay empty until the run is finalized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub run: u32,
    pub start_desc: String,
    pub start_date: String,
    pub start_epoch: f64,
    pub filename: String,
    pub beam: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub end_epoch: Option<f64>,
    #[serde(default)]
    pub events: Option<u64>,
    #[serde(default)]
    pub end_desc: String,
}

impl LedgerRow {
    pub fn apply_end(&mut self, end: &EndFields) {
        self.end_date = end.end_date.clone();
        self.end_epoch = Some(end.end_epoch);
        self.events = Some(end.events);
        self.end_desc = end.end_desc.clone();
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_some()
    }
}

/// Columns written when a run ends.
#[derive(Clone, Debug, PartialEq)]
pub struct EndFields {
    pub end_date: String,
    pub end_epoch: f64,
    pub events: u64,
    pub end_desc: String,
}

/// Highest run number in a set of rows, 0 for an empty table.
pub fn last_run_in(rows: &[LedgerRow]) -> u32 {
    rows.iter().map(|r| r.run).max().unwrap_or(0)
}

/// Insert `row`, replacing any existing row with the same run number.
pub fn upsert_row(rows: &mut Vec<LedgerRow>, row: LedgerRow) {
    match rows.iter_mut().find(|r| r.run == row.run) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

/// Apply end columns to the row of `run`.
pub fn close_row(rows: &mut [LedgerRow], run: u32, end: &EndFields) -> Result<(), LedgerError> {
    let row = rows
        .iter_mut()
        .find(|r| r.run == run)
        .ok_or(LedgerError::RunNotFound(run))?;
    row.apply_end(end);
    Ok(())
}

/// External run history.
///
/// Every call is a single attempt; callers decide whether a failure is fatal.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Highest run number recorded so far (0 when the table is empty).
    async fn last_run_number(&self) -> Result<u32, LedgerError>;

    /// Record the start of a run.
    async fn append_start_row(&self, row: &LedgerRow) -> Result<(), LedgerError>;

    /// Complete the row of `run`. Never creates a second row for the run.
    async fn update_end_row(&self, run: u32, end: &EndFields) -> Result<(), LedgerError>;
}
