//! Triggered waveform instruments.
//!
//! An [`Oscilloscope`] is exclusively owned by the acquisition loop. It exposes
//! the three operations the session needs: identification, a blocking wait for
//! the next trigger, and a per-channel waveform read. Drivers live in the
//! submodules:
//!
//! - [`lecroy`]: LeCroy WaveRunner over VICP/TCP
//! - [`mock`]: simulated pulses for tests and dry runs
//!
//! Connections are opened through a [`ScopeConnector`] and
//! [`connect_with_retry`], which never gives up; only process termination
//! (Ctrl-C at the call site) stops it.

pub mod lecroy;
pub mod mock;
pub mod vicp;
pub mod wavedesc;

use crate::clock::Clock;
use crate::error::InstrumentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// One sequence segment of a channel record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Sample times in seconds relative to the trigger
    pub time: Vec<f64>,
    /// Sample amplitudes in volts
    pub amplitude: Vec<f64>,
}

impl Waveform {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.amplitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitude.is_empty()
    }

    /// Iterate `(time, amplitude)` pairs in sample order.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time.iter().copied().zip(self.amplitude.iter().copied())
    }

    /// `(min, max)` amplitude, `None` for an empty record.
    pub fn amplitude_range(&self) -> Option<(f64, f64)> {
        self.amplitude.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Trigger time of one segment, as reported by the instrument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerStamp {
    /// Seconds since the first trigger of the acquisition
    pub time: f64,
    /// Offset of the first sample relative to the trigger, in seconds
    pub offset: f64,
}

/// Everything read from one channel for one trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelCapture {
    /// Channel number, starting at 1
    pub channel: u8,
    /// Instrument-specific descriptor, opaque to the session
    #[serde(with = "json_blob")]
    pub header: serde_json::Value,
    pub trigger_times: Vec<TriggerStamp>,
    /// One entry per sequence segment
    pub waveforms: Vec<Waveform>,
}

impl ChannelCapture {
    pub fn sample_count(&self) -> usize {
        self.waveforms.iter().map(Waveform::len).sum()
    }
}

/// Serializes a JSON value as a string so non-self-describing encoders
/// (bincode) can carry it.
mod json_blob {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &serde_json::Value, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<serde_json::Value, D::Error> {
        let text = String::deserialize(de)?;
        serde_json::from_str(&text).map_err(D::Error::custom)
    }
}

/// A connected triggered waveform instrument.
#[async_trait]
pub trait Oscilloscope: Send {
    /// Identification string (`*IDN?`).
    async fn identify(&mut self) -> Result<String, InstrumentError>;

    /// Arm a single acquisition and block until it has triggered. No timeout:
    /// acquisition is trigger-paced.
    async fn wait_for_trigger(&mut self) -> Result<(), InstrumentError>;

    /// Read the record of `channel` (1-based) for the last trigger.
    async fn read_channel(&mut self, channel: u8) -> Result<ChannelCapture, InstrumentError>;
}

/// Opens instrument handles for an address.
#[async_trait]
pub trait ScopeConnector: Send + Sync {
    async fn open(&self, address: &str) -> Result<Box<dyn Oscilloscope>, InstrumentError>;
}

/// A freshly connected instrument and how it identified itself.
pub struct Connection {
    pub scope: Box<dyn Oscilloscope>,
    pub identity: String,
    pub attempts: u32,
}

/// Connect, retrying every `interval` until the instrument answers its
/// identification query.
///
/// `on_retry` receives the attempt number and the time waited so far after
/// each failed attempt, for operator-facing output.
pub async fn connect_with_retry<F>(
    connector: &dyn ScopeConnector,
    address: &str,
    interval: Duration,
    clock: &dyn Clock,
    mut on_retry: F,
) -> Connection
where
    F: FnMut(u32, Duration) + Send,
{
    let started = clock.now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = match connector.open(address).await {
            Ok(mut scope) => scope.identify().await.map(|identity| (scope, identity)),
            Err(err) => Err(err),
        };
        match result {
            Ok((scope, identity)) => {
                info!(address, attempts, identity = %identity, "instrument connected");
                return Connection {
                    scope,
                    identity,
                    attempts,
                };
            }
            Err(err) => {
                debug!(address, attempts, error = %err, "connection attempt failed");
                on_retry(attempts, clock.now().saturating_duration_since(started));
                clock.sleep(interval).await;
            }
        }
    }
}
