//! Incremental run containers.
//!
//! A run writes exactly one container, `run_NNNNN.<ext>`, through an
//! [`EventWriter`] obtained from [`ContainerFormat::open_fresh`]. Each
//! [`EventWriter::append`] makes one complete event durable under its index
//! before returning; nothing is buffered in memory across events.
//!
//! Available formats:
//! - [`framed::FramedFormat`] (`framed`, `.daq`): CRC-checked frames, the default
//! - [`hdf5::Hdf5Format`] (`hdf5`, `.h5`): requires the `storage_hdf5` feature

pub mod framed;
pub mod hdf5;

use crate::capture::Event;
use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Self-description stored at the head of every container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub run_id: u32,
    pub channels: u8,
    pub target_events: u64,
    /// RFC 3339 creation time
    pub created: String,
    pub application: String,
}

impl ContainerInfo {
    pub fn new(run_id: u32, channels: u8, target_events: u64) -> Self {
        Self {
            run_id,
            channels,
            target_events,
            created: chrono::Utc::now().to_rfc3339(),
            application: format!("scope-daq {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Appends events to one open container.
#[async_trait]
pub trait EventWriter: Send {
    /// Durably store `event` under `index`. Keys must be strictly increasing.
    /// On error the container still holds exactly the previously appended
    /// events.
    async fn append(&mut self, index: u64, event: &Event) -> Result<(), StorageError>;

    /// Number of events stored so far.
    fn entries(&self) -> u64;

    fn path(&self) -> &Path;

    /// Flush and release the file.
    async fn close(self: Box<Self>) -> Result<(), StorageError>;
}

/// A container file format.
#[async_trait]
pub trait ContainerFormat: Send + Sync {
    fn name(&self) -> &'static str;

    fn extension(&self) -> &'static str;

    /// Create an empty container at `path`, discarding any existing file.
    async fn open_fresh(
        &self,
        path: &Path,
        info: &ContainerInfo,
    ) -> Result<Box<dyn EventWriter>, StorageError>;
}

/// `run_00042.<ext>`
pub fn run_filename(run_id: u32, extension: &str) -> String {
    format!("run_{run_id:05}.{extension}")
}

/// Full container path for a run inside `dir`.
pub fn run_path(dir: &Path, run_id: u32, format: &dyn ContainerFormat) -> PathBuf {
    dir.join(run_filename(run_id, format.extension()))
}

/// Highest run id among `run_NNNNN.*` files in `dir`, 0 when there are none.
/// A container may exist without a ledger row.
pub fn last_run_on_disk(dir: &Path) -> Result<u32, StorageError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut last = 0;
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let name = entry.file_name();
        if let Some(run_id) = name.to_str().and_then(parse_run_filename) {
            last = last.max(run_id);
        }
    }
    Ok(last)
}

fn parse_run_filename(name: &str) -> Option<u32> {
    let (stem, _ext) = name.strip_prefix("run_")?.split_once('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Look up a format by its configuration name.
pub fn format_for(name: &str) -> Result<Box<dyn ContainerFormat>, StorageError> {
    match name {
        "framed" => Ok(Box::new(framed::FramedFormat)),
        "hdf5" => Ok(Box::new(hdf5::Hdf5Format)),
        other => Err(StorageError::UnknownFormat(other.to_string())),
    }
}

/// Remove `path` if present and make sure its directory exists.
pub(crate) fn prepare_fresh(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "discarded existing container"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StorageError::io(path, e)),
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
    }
    Ok(())
}

pub(crate) fn check_key_order(index: u64, last: Option<u64>) -> Result<(), StorageError> {
    match last {
        Some(last) if index <= last => Err(StorageError::KeyOrder { index, last }),
        _ => Ok(()),
    }
}
