//! One triggered event across all configured channels.

use crate::error::CaptureError;
use crate::instrument::{ChannelCapture, Oscilloscope};
use crate::interrupt::InterruptListener;
use serde::{Deserialize, Serialize};

/// A fully captured event. Only complete events ever leave this module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// One capture per channel, in ascending channel order
    pub channels: Vec<ChannelCapture>,
    /// Capture completion time, seconds since the Unix epoch
    pub epoch_timestamp: f64,
}

impl Event {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.channels.iter().map(ChannelCapture::sample_count).sum()
    }
}

/// Seconds since the Unix epoch with microsecond resolution.
pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Wait for the next trigger and read channels `1..=channels`.
///
/// Returns `Ok(None)` when the operator interrupts the trigger wait. Once the
/// trigger has fired the channel reads always run to completion; a failing
/// read discards the whole event.
pub async fn capture_event(
    scope: &mut dyn Oscilloscope,
    channels: u8,
    interrupt: &mut InterruptListener,
) -> Result<Option<Event>, CaptureError> {
    tokio::select! {
        biased;
        _ = interrupt.triggered() => return Ok(None),
        armed = scope.wait_for_trigger() => armed.map_err(CaptureError::Trigger)?,
    }

    let mut captures = Vec::with_capacity(channels as usize);
    for channel in 1..=channels {
        let capture = scope
            .read_channel(channel)
            .await
            .map_err(|source| CaptureError::Channel { channel, source })?;
        captures.push(capture);
    }

    Ok(Some(Event {
        channels: captures,
        epoch_timestamp: epoch_now(),
    }))
}
