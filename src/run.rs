//! Run metadata.
//!
//! A [`Run`] is created by the controller once a run id has been assigned,
//! mutated as events are stored, and mirrored into the ledger as a start row
//! and later the completed end columns.

use crate::capture::epoch_now;
use crate::ledger::{EndFields, LedgerRow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Ledger date format (UTC).
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Clone, Debug, Serialize)]
pub struct Run {
    pub run_id: u32,
    pub start_description: String,
    pub channel_count: u8,
    pub target_event_count: u64,
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub beam_tag: String,
    pub start_time: DateTime<Utc>,
    pub start_epoch: f64,
    pub end_time: Option<DateTime<Utc>>,
    pub end_epoch: Option<f64>,
    pub events_captured: u64,
    pub end_description: String,
}

impl Run {
    pub fn new(
        run_id: u32,
        start_description: String,
        channel_count: u8,
        target_event_count: u64,
        path: PathBuf,
    ) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            run_id,
            start_description,
            channel_count,
            target_event_count,
            filename,
            path,
            beam_tag: String::new(),
            start_time: Utc::now(),
            start_epoch: epoch_now(),
            end_time: None,
            end_epoch: None,
            events_captured: 0,
            end_description: String::new(),
        }
    }

    pub fn mark_started(&mut self) {
        self.start_time = Utc::now();
        self.start_epoch = epoch_now();
    }

    pub fn mark_finished(&mut self, end_description: String) {
        self.end_time = Some(Utc::now());
        self.end_epoch = Some(epoch_now());
        self.end_description = end_description;
    }

    pub fn start_row(&self) -> LedgerRow {
        LedgerRow {
            run: self.run_id,
            start_desc: self.start_description.clone(),
            start_date: self.start_time.format(DATE_FORMAT).to_string(),
            start_epoch: self.start_epoch,
            filename: self.filename.clone(),
            beam: self.beam_tag.clone(),
            end_date: String::new(),
            end_epoch: None,
            events: None,
            end_desc: String::new(),
        }
    }

    /// End columns, once the run has been finished.
    pub fn end_fields(&self) -> Option<EndFields> {
        Some(EndFields {
            end_date: self.end_time?.format(DATE_FORMAT).to_string(),
            end_epoch: self.end_epoch?,
            events: self.events_captured,
            end_desc: self.end_description.clone(),
        })
    }
}
