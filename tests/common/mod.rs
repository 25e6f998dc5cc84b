//! Shared fixtures for scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scope_daq::archive::Archiver;
use scope_daq::beam::FixedBeamTag;
use scope_daq::capture::Event;
use scope_daq::controller::{RunController, RunRequest, SessionContext};
use scope_daq::error::{InstrumentError, StorageError};
use scope_daq::instrument::mock::MockScope;
use scope_daq::instrument::{ChannelCapture, Oscilloscope};
use scope_daq::interrupt::Interrupt;
use scope_daq::ledger::{LedgerRow, RunLedger};
use scope_daq::storage::framed::FramedFormat;
use scope_daq::storage::{ContainerFormat, ContainerInfo, EventWriter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Default)]
pub struct RecordingArchiver {
    pub submitted: Mutex<Vec<PathBuf>>,
}

impl Archiver for RecordingArchiver {
    fn submit(&self, path: &Path) {
        self.submitted.lock().push(path.to_path_buf());
    }
}

pub fn ledger_row(run: u32) -> LedgerRow {
    LedgerRow {
        run,
        start_desc: String::new(),
        start_date: "2024-05-02T10:00:00".to_string(),
        start_epoch: 1_714_644_000.0,
        filename: format!("run_{run:05}.daq"),
        beam: "BEAM ON".to_string(),
        end_date: "2024-05-02T10:30:00".to_string(),
        end_epoch: Some(1_714_645_800.0),
        events: Some(1000),
        end_desc: String::new(),
    }
}

pub fn request(channels: u8, events: u64) -> RunRequest {
    RunRequest {
        description: "scenario".to_string(),
        channels,
        events,
        display: false,
    }
}

pub fn controller(
    data_dir: &Path,
    ledger: Arc<dyn RunLedger>,
    format: Arc<dyn ContainerFormat>,
    archiver: Arc<RecordingArchiver>,
) -> RunController {
    RunController::new(SessionContext {
        ledger,
        beam: Arc::new(FixedBeamTag("BEAM ON".to_string())),
        archiver,
        format,
        data_dir: data_dir.to_path_buf(),
        max_consecutive_failures: 5,
    })
}

pub fn framed() -> Arc<dyn ContainerFormat> {
    Arc::new(FramedFormat)
}

/// Raises an operator interrupt while reading the last channel of event
/// `after` (1-based trigger count).
pub struct InterruptingScope {
    pub inner: MockScope,
    pub interrupt: Interrupt,
    pub after: u64,
    pub channels: u8,
}

#[async_trait]
impl Oscilloscope for InterruptingScope {
    async fn identify(&mut self) -> Result<String, InstrumentError> {
        self.inner.identify().await
    }

    async fn wait_for_trigger(&mut self) -> Result<(), InstrumentError> {
        self.inner.wait_for_trigger().await
    }

    async fn read_channel(&mut self, channel: u8) -> Result<ChannelCapture, InstrumentError> {
        if self.inner.triggers() == self.after && channel == self.channels {
            self.interrupt.trigger();
        }
        self.inner.read_channel(channel).await
    }
}

/// Framed containers whose `fail_at`-th append (1-based) dies halfway
/// through writing its frame.
pub struct TornAppendFormat {
    pub fail_at: u64,
}

#[async_trait]
impl ContainerFormat for TornAppendFormat {
    fn name(&self) -> &'static str {
        "torn"
    }

    fn extension(&self) -> &'static str {
        FramedFormat.extension()
    }

    async fn open_fresh(
        &self,
        path: &Path,
        info: &ContainerInfo,
    ) -> Result<Box<dyn EventWriter>, StorageError> {
        Ok(Box::new(TornAppendWriter {
            inner: FramedFormat.open_fresh(path, info).await?,
            path: path.to_path_buf(),
            appends: 0,
            fail_at: self.fail_at,
        }))
    }
}

struct TornAppendWriter {
    inner: Box<dyn EventWriter>,
    path: PathBuf,
    appends: u64,
    fail_at: u64,
}

#[async_trait]
impl EventWriter for TornAppendWriter {
    async fn append(&mut self, index: u64, event: &Event) -> Result<(), StorageError> {
        self.appends += 1;
        if self.appends == self.fail_at {
            // half a frame header plus some payload, as a crash would leave it
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&self.path)
                .map_err(|source| StorageError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            file.write_all(&[0x40, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0x01, 0x02, 0x03])
                .map_err(|source| StorageError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            return Err(StorageError::Io {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.append(index, event).await
    }

    fn entries(&self) -> u64 {
        self.inner.entries()
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn close(self: Box<Self>) -> Result<(), StorageError> {
        self.inner.close().await
    }
}
