//! Framed event container (`.daq`).
//!
//! ```text
//! "SDAQEVT1"                         magic
//! u32 LE + JSON                      ContainerInfo
//! ( u32 LE len | u32 LE crc32 | payload )*
//! ```
//!
//! Each payload is the bincode encoding of `(index, Event)`. Frames are only
//! ever appended. An append that fails truncates the file back to its
//! previous length; a frame torn by a crash fails its length or CRC check and
//! readers stop at the last complete frame.

use super::{check_key_order, prepare_fresh, ContainerFormat, ContainerInfo, EventWriter};
use crate::capture::Event;
use crate::error::StorageError;
use async_trait::async_trait;
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MAGIC: &[u8; 8] = b"SDAQEVT1";
pub const EXTENSION: &str = "daq";

const FRAME_HEADER_LEN: usize = 8;
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Serialize)]
struct FrameRef<'a> {
    index: u64,
    event: &'a Event,
}

/// One decoded container entry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StoredEvent {
    pub index: u64,
    pub event: Event,
}

/// The default container format.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedFormat;

#[async_trait]
impl ContainerFormat for FramedFormat {
    fn name(&self) -> &'static str {
        "framed"
    }

    fn extension(&self) -> &'static str {
        EXTENSION
    }

    async fn open_fresh(
        &self,
        path: &Path,
        info: &ContainerInfo,
    ) -> Result<Box<dyn EventWriter>, StorageError> {
        Ok(Box::new(FramedWriter::create(path, info)?))
    }
}

pub struct FramedWriter {
    file: File,
    path: PathBuf,
    committed: u64,
    entries: u64,
    last_key: Option<u64>,
    /// Write only half of this append's frame (1-based) and fail.
    #[cfg(test)]
    fail_append: Option<u64>,
}

impl FramedWriter {
    pub fn create(path: &Path, info: &ContainerInfo) -> Result<Self, StorageError> {
        prepare_fresh(path)?;

        let descriptor = serde_json::to_vec(info).map_err(|e| StorageError::Encode {
            index: 0,
            reason: format!("container descriptor: {e}"),
        })?;
        let mut head = Vec::with_capacity(MAGIC.len() + 4 + descriptor.len());
        head.extend_from_slice(MAGIC);
        head.extend_from_slice(&(descriptor.len() as u32).to_le_bytes());
        head.extend_from_slice(&descriptor);

        let io_err = |e| StorageError::io(path, e);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(&head).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        debug!(path = %path.display(), run_id = info.run_id, "container created");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            committed: head.len() as u64,
            entries: 0,
            last_key: None,
            #[cfg(test)]
            fail_append: None,
        })
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if self.fail_append == Some(self.entries + 1) {
            self.file.write_all(&frame[..frame.len() / 2])?;
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"));
        }
        self.file.write_all(frame)?;
        self.file.sync_data()
    }

    /// Cut the file back to the last complete frame.
    fn roll_back(&mut self) {
        let restored = self
            .file
            .set_len(self.committed)
            .and_then(|_| self.file.seek(SeekFrom::Start(self.committed)))
            .and_then(|_| self.file.sync_data());
        if let Err(e) = restored {
            warn!(path = %self.path.display(), error = %e, "could not truncate partial frame");
        }
    }
}

#[async_trait]
impl EventWriter for FramedWriter {
    async fn append(&mut self, index: u64, event: &Event) -> Result<(), StorageError> {
        check_key_order(index, self.last_key)?;

        let payload = bincode::serialize(&FrameRef { index, event })
            .map_err(|e| StorageError::Encode {
                index,
                reason: e.to_string(),
            })?;
        let length = u32::try_from(payload.len()).map_err(|_| StorageError::Encode {
            index,
            reason: format!("event of {} bytes does not fit a frame", payload.len()),
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&CRC32.checksum(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        if let Err(e) = self.write_frame(&frame) {
            self.roll_back();
            return Err(StorageError::io(&self.path, e));
        }

        self.committed += frame.len() as u64;
        self.entries += 1;
        self.last_key = Some(index);
        Ok(())
    }

    fn entries(&self) -> u64 {
        self.entries
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn close(self: Box<Self>) -> Result<(), StorageError> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::io(&self.path, e))
    }
}

/// Reads a framed container written by [`FramedWriter`].
#[derive(Debug)]
pub struct ContainerReader {
    pub info: ContainerInfo,
    pub entries: Vec<StoredEvent>,
    /// Bytes after the last complete frame (a torn append)
    pub torn_bytes: u64,
}

impl ContainerReader {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let bytes = std::fs::read(path).map_err(|e| StorageError::io(path, e))?;
        Self::parse(path, &bytes)
    }

    fn parse(path: &Path, bytes: &[u8]) -> Result<Self, StorageError> {
        let corrupt = |reason: String| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.get(..MAGIC.len()) != Some(&MAGIC[..]) {
            return Err(corrupt("not a framed event container".to_string()));
        }
        let mut pos = MAGIC.len();
        let descriptor_len = read_u32(bytes, pos)
            .ok_or_else(|| corrupt("truncated descriptor".to_string()))?
            as usize;
        pos += 4;
        let descriptor = bytes
            .get(pos..pos + descriptor_len)
            .ok_or_else(|| corrupt("truncated descriptor".to_string()))?;
        let info: ContainerInfo = serde_json::from_slice(descriptor)
            .map_err(|e| corrupt(format!("descriptor: {e}")))?;
        pos += descriptor_len;

        let mut entries: Vec<StoredEvent> = Vec::new();
        while let (Some(length), Some(crc)) = (read_u32(bytes, pos), read_u32(bytes, pos + 4)) {
            let start = pos + FRAME_HEADER_LEN;
            let Some(payload) = bytes.get(start..start + length as usize) else {
                break;
            };
            if CRC32.checksum(payload) != crc {
                break;
            }
            let stored: StoredEvent = bincode::deserialize(payload)
                .map_err(|e| corrupt(format!("frame at offset {pos}: {e}")))?;
            if let Some(last) = entries.last() {
                if stored.index <= last.index {
                    return Err(corrupt(format!(
                        "key {} follows key {}",
                        stored.index, last.index
                    )));
                }
            }
            entries.push(stored);
            pos = start + length as usize;
        }

        Ok(Self {
            info,
            entries,
            torn_bytes: (bytes.len() - pos) as u64,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.index).collect()
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
