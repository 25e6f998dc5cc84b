//! HDF5 event container (`.h5`), behind the `storage_hdf5` feature.
//!
//! Layout:
//!
//! ```text
//! /                        attrs: descriptor (JSON)
//! /<index>/                attrs: epoch
//! /<index>/C<n>/           attrs: header (JSON)
//!     trigger_time         [segments x 2] (time, offset)
//!     time_<s>, amplitude_<s>
//! ```
//!
//! The file is flushed after every event. A failed append unlinks the
//! partially written group before reporting the error.

use super::{ContainerFormat, ContainerInfo, EventWriter};
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;

pub const EXTENSION: &str = "h5";

#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Format;

#[cfg(feature = "storage_hdf5")]
mod enabled {
    use super::*;
    use crate::capture::Event;
    use crate::storage::{check_key_order, prepare_fresh};
    use ::hdf5::types::VarLenUnicode;
    use ::hdf5::{File, Group};
    use std::path::PathBuf;

    fn text(value: &str, index: u64) -> Result<VarLenUnicode, StorageError> {
        value.parse().map_err(|e| StorageError::Encode {
            index,
            reason: format!("{e}"),
        })
    }

    pub struct Hdf5Writer {
        file: File,
        path: PathBuf,
        entries: u64,
        last_key: Option<u64>,
    }

    impl Hdf5Writer {
        pub fn create(path: &Path, info: &ContainerInfo) -> Result<Self, StorageError> {
            prepare_fresh(path)?;
            let file = File::create(path)?;
            let descriptor = serde_json::to_string(info).map_err(|e| StorageError::Encode {
                index: 0,
                reason: e.to_string(),
            })?;
            file.new_attr::<VarLenUnicode>()
                .create("descriptor")?
                .write_scalar(&text(&descriptor, 0)?)?;
            file.flush()?;
            tracing::debug!(path = %path.display(), run_id = info.run_id, "HDF5 container created");
            Ok(Self {
                file,
                path: path.to_path_buf(),
                entries: 0,
                last_key: None,
            })
        }

        fn write_event(&self, group: &Group, index: u64, event: &Event) -> Result<(), StorageError> {
            group
                .new_attr::<f64>()
                .create("epoch")?
                .write_scalar(&event.epoch_timestamp)?;

            for capture in &event.channels {
                let channel = group.create_group(&format!("C{}", capture.channel))?;
                channel
                    .new_attr::<VarLenUnicode>()
                    .create("header")?
                    .write_scalar(&text(&capture.header.to_string(), index)?)?;

                let stamps: Vec<f64> = capture
                    .trigger_times
                    .iter()
                    .flat_map(|t| [t.time, t.offset])
                    .collect();
                channel
                    .new_dataset_builder()
                    .with_data(stamps.as_slice())
                    .create("trigger_time")?;

                for (segment, waveform) in capture.waveforms.iter().enumerate() {
                    channel
                        .new_dataset_builder()
                        .with_data(waveform.time.as_slice())
                        .create(format!("time_{segment}").as_str())?;
                    channel
                        .new_dataset_builder()
                        .with_data(waveform.amplitude.as_slice())
                        .create(format!("amplitude_{segment}").as_str())?;
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EventWriter for Hdf5Writer {
        async fn append(&mut self, index: u64, event: &Event) -> Result<(), StorageError> {
            check_key_order(index, self.last_key)?;
            let name = index.to_string();
            let group = self.file.create_group(&name)?;

            let written = self
                .write_event(&group, index, event)
                .and_then(|_| self.file.flush().map_err(StorageError::from));
            if let Err(e) = written {
                drop(group);
                if let Err(unlink) = self.file.unlink(&name) {
                    tracing::warn!(path = %self.path.display(), error = %unlink, "could not remove partial event group");
                }
                return Err(e);
            }

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
            self.file.flush()?;
            Ok(())
        }
    }
}

#[cfg(feature = "storage_hdf5")]
pub use enabled::Hdf5Writer;

#[async_trait]
impl ContainerFormat for Hdf5Format {
    fn name(&self) -> &'static str {
        "hdf5"
    }

    fn extension(&self) -> &'static str {
        EXTENSION
    }

    #[cfg(feature = "storage_hdf5")]
    async fn open_fresh(
        &self,
        path: &Path,
        info: &ContainerInfo,
    ) -> Result<Box<dyn EventWriter>, StorageError> {
        Ok(Box::new(Hdf5Writer::create(path, info)?))
    }

    #[cfg(not(feature = "storage_hdf5"))]
    async fn open_fresh(
        &self,
        _path: &Path,
        _info: &ContainerInfo,
    ) -> Result<Box<dyn EventWriter>, StorageError> {
        Err(StorageError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}
