//! A mock oscilloscope that generates synthetic pulses.
//!
//! Used for dry runs (`instrument.driver = "mock"`) and throughout the test
//! suite. Output is deterministic for a given seed. Faults can be injected per
//! trigger and channel, and the connector can be told to refuse a number of
//! connection attempts before it answers.

use super::{ChannelCapture, Oscilloscope, ScopeConnector, TriggerStamp, Waveform};
use crate::config::MAX_CHANNELS;
use crate::error::InstrumentError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

pub const MOCK_IDENTITY: &str = "MOCK,SCOPE-DAQ SIMULATOR,0000,1.0";

/// Behaviour of the simulated instrument.
#[derive(Clone, Debug)]
pub struct MockScopeConfig {
    /// Samples per channel record
    pub samples: usize,
    /// Seconds between samples
    pub sample_interval: f64,
    /// Simulated time between triggers
    pub trigger_period: Duration,
    pub seed: u64,
    /// `(trigger, channel)` pairs whose read fails; triggers count from 1
    pub channel_failures: HashSet<(u64, u8)>,
    /// Link drops once this many triggers have been delivered
    pub disconnect_after: Option<u64>,
}

impl Default for MockScopeConfig {
    fn default() -> Self {
        Self {
            samples: 500,
            sample_interval: 1e-9,
            trigger_period: Duration::from_millis(10),
            seed: 0x5C0FE,
            channel_failures: HashSet::new(),
            disconnect_after: None,
        }
    }
}

impl MockScopeConfig {
    /// Triggers arrive without delay.
    pub fn instant() -> Self {
        Self {
            trigger_period: Duration::ZERO,
            samples: 16,
            ..Self::default()
        }
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_trigger_period(mut self, period: Duration) -> Self {
        self.trigger_period = period;
        self
    }

    pub fn fail_channel_on(mut self, trigger: u64, channel: u8) -> Self {
        self.channel_failures.insert((trigger, channel));
        self
    }

    pub fn disconnect_after(mut self, triggers: u64) -> Self {
        self.disconnect_after = Some(triggers);
        self
    }
}

pub struct MockScope {
    config: MockScopeConfig,
    rng: StdRng,
    triggers: u64,
    connected: bool,
}

impl MockScope {
    pub fn new(config: MockScopeConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            triggers: 0,
            connected: true,
        }
    }

    /// Triggers delivered so far.
    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    fn pulse(&mut self) -> Waveform {
        let n = self.config.samples;
        let dt = self.config.sample_interval;
        let start = -(n as f64 / 2.0) * dt;
        let height = self.rng.gen_range(0.05f64..0.5);
        let centre = self.rng.gen_range(-0.1f64..0.1) * n as f64 * dt;
        let width = (n as f64 * dt / 20.0).max(dt);

        let time: Vec<f64> = (0..n).map(|i| start + i as f64 * dt).collect();
        let amplitude = time
            .iter()
            .map(|t| {
                let x = (t - centre) / width;
                -height * (-x * x).exp() + self.rng.gen_range(-0.002f64..0.002)
            })
            .collect();
        Waveform { time, amplitude }
    }
}

#[async_trait]
impl Oscilloscope for MockScope {
    async fn identify(&mut self) -> Result<String, InstrumentError> {
        if !self.connected {
            return Err(InstrumentError::Disconnected);
        }
        Ok(MOCK_IDENTITY.to_string())
    }

    async fn wait_for_trigger(&mut self) -> Result<(), InstrumentError> {
        if !self.connected {
            return Err(InstrumentError::Disconnected);
        }
        if self.config.disconnect_after == Some(self.triggers) {
            debug!(triggers = self.triggers, "mock instrument dropping the link");
            self.connected = false;
            return Err(InstrumentError::Disconnected);
        }
        if !self.config.trigger_period.is_zero() {
            tokio::time::sleep(self.config.trigger_period).await;
        }
        self.triggers += 1;
        Ok(())
    }

    async fn read_channel(&mut self, channel: u8) -> Result<ChannelCapture, InstrumentError> {
        if !self.connected {
            return Err(InstrumentError::Disconnected);
        }
        if channel == 0 || channel > MAX_CHANNELS {
            return Err(InstrumentError::ChannelUnavailable(channel));
        }
        if self.config.channel_failures.contains(&(self.triggers, channel)) {
            return Err(InstrumentError::Protocol(format!(
                "simulated read fault on C{channel}, trigger {}",
                self.triggers
            )));
        }

        let waveform = self.pulse();
        let offset = waveform.time.first().copied().unwrap_or_default();
        Ok(ChannelCapture {
            channel,
            header: serde_json::json!({
                "INSTRUMENT_NAME": "MOCK",
                "WAVE_SOURCE": format!("C{channel}"),
                "WAVE_ARRAY_COUNT": waveform.len(),
                "HORIZ_INTERVAL": self.config.sample_interval,
                "VERTUNIT": "V",
                "HORUNIT": "S",
            }),
            trigger_times: vec![TriggerStamp {
                time: self.triggers as f64 * self.config.trigger_period.as_secs_f64(),
                offset,
            }],
            waveforms: vec![waveform],
        })
    }
}

/// Hands out [`MockScope`]s, optionally refusing the first attempts.
pub struct MockConnector {
    config: MockScopeConfig,
    refuse: u32,
    attempts: AtomicU32,
}

impl MockConnector {
    pub fn new(config: MockScopeConfig) -> Self {
        Self {
            config,
            refuse: 0,
            attempts: AtomicU32::new(0),
        }
    }

    /// Refuse the first `attempts` connection attempts.
    pub fn available_after(mut self, attempts: u32) -> Self {
        self.refuse = attempts;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScopeConnector for MockConnector {
    async fn open(&self, address: &str) -> Result<Box<dyn Oscilloscope>, InstrumentError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.refuse {
            return Err(InstrumentError::Connection {
                address: address.to_string(),
                reason: "simulated instrument not responding".to_string(),
            });
        }
        Ok(Box::new(MockScope::new(self.config.clone())))
    }
}
