//! In-process ledger for tests and dry runs.

use super::{close_row, last_run_in, upsert_row, EndFields, LedgerRow, RunLedger};
use crate::error::LedgerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<Vec<LedgerRow>>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<LedgerRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// Unreachable ledger: every call fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Reads succeed, writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<LedgerRow> {
        self.rows.lock().clone()
    }

    pub fn row(&self, run: u32) -> Option<LedgerRow> {
        self.rows.lock().iter().find(|r| r.run == run).cloned()
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), LedgerError> {
        self.check_read()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger rejected the write".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RunLedger for MemoryLedger {
    async fn last_run_number(&self) -> Result<u32, LedgerError> {
        self.check_read()?;
        Ok(last_run_in(&self.rows.lock()))
    }

    async fn append_start_row(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        self.check_write()?;
        upsert_row(&mut self.rows.lock(), row.clone());
        Ok(())
    }

    async fn update_end_row(&self, run: u32, end: &EndFields) -> Result<(), LedgerError> {
        self.check_write()?;
        close_row(&mut self.rows.lock(), run, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::row;

    #[tokio::test]
    async fn test_switches() {
        let ledger = MemoryLedger::with_rows(vec![row(41)]);
        assert_eq!(ledger.last_run_number().await.unwrap(), 41);

        ledger.set_fail_writes(true);
        assert_eq!(ledger.last_run_number().await.unwrap(), 41);
        assert!(ledger.append_start_row(&row(42)).await.is_err());

        ledger.set_available(false);
        assert!(ledger.last_run_number().await.is_err());

        ledger.set_available(true);
        ledger.set_fail_writes(false);
        ledger.append_start_row(&row(42)).await.unwrap();
        assert_eq!(ledger.rows().len(), 2);
        assert!(ledger.row(42).is_some());
    }
}
