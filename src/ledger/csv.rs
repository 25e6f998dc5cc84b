//! CSV run ledger.
//!
//! The table is small and shared, so every change reads all rows, modifies
//! them in memory and replaces the file through a temporary file and a rename.
//! A missing table means the ledger is unavailable; it is never created
//! implicitly, so a misconfigured path cannot restart run numbering at 1.

use super::{close_row, last_run_in, upsert_row, EndFields, LedgerRow, RunLedger, COLUMNS};
use crate::error::LedgerError;
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct CsvLedger {
    path: PathBuf,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty table. Returns `false` if one already exists.
    pub fn create(&self) -> Result<bool, LedgerError> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        self.store(&[])?;
        info!(path = %self.path.display(), "created empty run ledger");
        Ok(true)
    }

    /// Read all rows.
    pub fn load(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        if !self.path.exists() {
            return Err(LedgerError::Unavailable(format!(
                "ledger table {} does not exist",
                self.path.display()
            )));
        }
        let mut reader = ::csv::Reader::from_path(&self.path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<LedgerRow>, ::csv::Error>>()?;
        Ok(rows)
    }

    /// Replace the whole table with `rows`.
    pub fn store(&self, rows: &[LedgerRow]) -> Result<(), LedgerError> {
        let tmp = self.path.with_extension("csv.tmp");
        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(File::create(&tmp)?);
        writer.write_record(COLUMNS)?;
        for row in rows {
            writer.serialize(row)?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| LedgerError::Io(e.into_error()))?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), rows = rows.len(), "ledger table written");
        Ok(())
    }
}

#[async_trait]
impl RunLedger for CsvLedger {
    async fn last_run_number(&self) -> Result<u32, LedgerError> {
        Ok(last_run_in(&self.load()?))
    }

    async fn append_start_row(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let mut rows = self.load()?;
        upsert_row(&mut rows, row.clone());
        self.store(&rows)
    }

    async fn update_end_row(&self, run: u32, end: &EndFields) -> Result<(), LedgerError> {
        let mut rows = self.load()?;
        close_row(&mut rows, run, end)?;
        self.store(&rows)
    }
}
