//! Custom error types for the application.
//!
//! Every concern the acquisition session touches has its own error enum, so the
//! run controller can decide per failure whether it ends the current run, is
//! merely reported, or prevents a run from being numbered at all.
//!
//! ## Error Hierarchy
//!
//! - **`InstrumentError`**: connection and I/O faults talking to the oscilloscope.
//!   Connection failures are retried indefinitely at connect time; a fault that
//!   [`InstrumentError::is_disconnect`] classifies as a lost link ends the
//!   current run.
//! - **`CaptureError`**: one triggered event could not be captured. The event is
//!   dropped and acquisition continues with the next trigger.
//! - **`StorageError`**: opening or appending to the run container failed. Fatal
//!   to the current run, which is finalized with the events stored so far.
//! - **`LedgerError`**: the run ledger could not be read or written. Fatal only
//!   while numbering a run.
//! - **`LookupError`**: the beam-status tag could not be fetched. Never fatal.
//! - **`RunError`**: run-level failures returned by the controller.
//! - **`DaqError`**: configuration loading and validation.
//!
//! The binary reports all of them through `anyhow`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

/// Faults raised by an oscilloscope driver.
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("instrument unreachable at {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("instrument I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("instrument protocol error: {0}")]
    Protocol(String),

    #[error("channel C{0} is not available")]
    ChannelUnavailable(u8),

    #[error("instrument disconnected")]
    Disconnected,
}

impl InstrumentError {
    /// True when the link to the instrument is gone and further commands on the
    /// same handle cannot succeed.
    pub fn is_disconnect(&self) -> bool {
        match self {
            InstrumentError::Disconnected => true,
            InstrumentError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// One event could not be captured.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("waiting for trigger failed: {0}")]
    Trigger(#[source] InstrumentError),

    #[error("reading channel C{channel} failed: {source}")]
    Channel {
        channel: u8,
        #[source]
        source: InstrumentError,
    },
}

impl CaptureError {
    /// The underlying instrument fault.
    pub fn instrument_error(&self) -> &InstrumentError {
        match self {
            CaptureError::Trigger(source) | CaptureError::Channel { source, .. } => source,
        }
    }

    pub fn is_disconnect(&self) -> bool {
        self.instrument_error().is_disconnect()
    }
}

/// Run container failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode event {index}: {reason}")]
    Encode { index: u64, reason: String },

    #[error("container {path:?} is not readable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("event key {index} must be greater than the last stored key {last}")]
    KeyOrder { index: u64, last: u64 },

    #[error("unknown container format '{0}'")]
    UnknownFormat(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Run ledger failures.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("run ledger unavailable: {0}")]
    Unavailable(String),

    #[error("run ledger I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("run ledger table error: {0}")]
    Table(#[from] csv::Error),

    #[error("run {0} has no row in the ledger")]
    RunNotFound(u32),
}

/// Beam-status lookup failures.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("beam lookup I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("beam lookup timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("beam lookup protocol error: {0}")]
    Protocol(String),

    #[error("beam status key '{0}' not found")]
    Missing(String),
}

/// Failures that prevent a run from being started.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("cannot number the run: {0}")]
    Numbering(#[source] LedgerError),

    #[error("cannot scan the data directory for existing runs: {0}")]
    DataDir(#[source] StorageError),

    #[error("controller is busy in state {0}")]
    Busy(&'static str),

    #[error("invalid run request: {0}")]
    InvalidRequest(String),
}
