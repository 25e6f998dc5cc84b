//! LeCroy WAVEDESC waveform descriptor decoding.
//!
//! A `C<n>:WAVEFORM? ALL` response carries one binary block laid out as:
//!
//! ```text
//! WAVEDESC (346 bytes) | USERTEXT | TRIGTIME array | RIS_TIME array | WAVE_ARRAY_1
//! ```
//!
//! Section lengths are stored in the descriptor itself. All numeric fields use
//! the byte order announced by `COMM_ORDER`; samples are signed bytes or words
//! according to `COMM_TYPE`.

use super::{ChannelCapture, TriggerStamp, Waveform};
use crate::error::InstrumentError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Size of the WAVEDESC template (LECROY_2_3).
pub const DESCRIPTOR_LEN: usize = 346;

mod offset {
    pub const DESCRIPTOR_NAME: usize = 0;
    pub const TEMPLATE_NAME: usize = 16;
    pub const COMM_TYPE: usize = 32;
    pub const COMM_ORDER: usize = 34;
    pub const WAVE_DESCRIPTOR: usize = 36;
    pub const USER_TEXT: usize = 40;
    pub const TRIGTIME_ARRAY: usize = 48;
    pub const RIS_TIME_ARRAY: usize = 52;
    pub const WAVE_ARRAY_1: usize = 60;
    pub const INSTRUMENT_NAME: usize = 76;
    pub const INSTRUMENT_NUMBER: usize = 92;
    pub const TRACE_LABEL: usize = 96;
    pub const WAVE_ARRAY_COUNT: usize = 116;
    pub const FIRST_VALID_PNT: usize = 124;
    pub const LAST_VALID_PNT: usize = 128;
    pub const SUBARRAY_COUNT: usize = 144;
    pub const SWEEPS_PER_ACQ: usize = 148;
    pub const VERTICAL_GAIN: usize = 156;
    pub const VERTICAL_OFFSET: usize = 160;
    pub const NOMINAL_BITS: usize = 172;
    pub const HORIZ_INTERVAL: usize = 176;
    pub const HORIZ_OFFSET: usize = 180;
    pub const VERTUNIT: usize = 196;
    pub const HORUNIT: usize = 244;
    pub const TRIGGER_TIME: usize = 296;
    pub const ACQ_DURATION: usize = 312;
    pub const RECORD_TYPE: usize = 316;
    pub const TIMEBASE: usize = 324;
    pub const VERT_COUPLING: usize = 326;
    pub const PROBE_ATT: usize = 328;
    pub const BANDWIDTH_LIMIT: usize = 334;
    pub const WAVE_SOURCE: usize = 344;
}

/// Decoded descriptor fields. Serialized as the channel header.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WaveDesc {
    pub descriptor_name: String,
    pub template_name: String,
    pub comm_type: i16,
    pub comm_order: i16,
    pub wave_descriptor: u32,
    pub user_text: u32,
    pub trigtime_array: u32,
    pub ris_time_array: u32,
    pub wave_array_1: u32,
    pub instrument_name: String,
    pub instrument_number: i32,
    pub trace_label: String,
    pub wave_array_count: i32,
    pub first_valid_pnt: i32,
    pub last_valid_pnt: i32,
    pub subarray_count: i32,
    pub sweeps_per_acq: i32,
    pub vertical_gain: f32,
    pub vertical_offset: f32,
    pub nominal_bits: i16,
    pub horiz_interval: f32,
    pub horiz_offset: f64,
    pub vertunit: String,
    pub horunit: String,
    /// Instrument clock at trigger, ISO-8601 without zone
    pub trigger_time: Option<String>,
    pub acq_duration: f32,
    pub record_type: i16,
    pub timebase: i16,
    pub vert_coupling: i16,
    pub probe_att: f32,
    pub bandwidth_limit: i16,
    pub wave_source: i16,
}

fn protocol(msg: impl Into<String>) -> InstrumentError {
    InstrumentError::Protocol(msg.into())
}

/// Endian-aware field reader over the descriptor bytes.
struct Fields<'a> {
    bytes: &'a [u8],
    little: bool,
}

impl<'a> Fields<'a> {
    fn take<const N: usize>(&self, at: usize) -> Result<[u8; N], InstrumentError> {
        self.bytes
            .get(at..at + N)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| protocol(format!("descriptor truncated at offset {at}")))
    }

    fn i16(&self, at: usize) -> Result<i16, InstrumentError> {
        let b = self.take::<2>(at)?;
        Ok(if self.little { i16::from_le_bytes(b) } else { i16::from_be_bytes(b) })
    }

    fn i32(&self, at: usize) -> Result<i32, InstrumentError> {
        let b = self.take::<4>(at)?;
        Ok(if self.little { i32::from_le_bytes(b) } else { i32::from_be_bytes(b) })
    }

    fn len(&self, at: usize) -> Result<u32, InstrumentError> {
        let value = self.i32(at)?;
        u32::try_from(value).map_err(|_| protocol(format!("negative section length at {at}")))
    }

    fn f32(&self, at: usize) -> Result<f32, InstrumentError> {
        let b = self.take::<4>(at)?;
        Ok(if self.little { f32::from_le_bytes(b) } else { f32::from_be_bytes(b) })
    }

    fn f64(&self, at: usize) -> Result<f64, InstrumentError> {
        let b = self.take::<8>(at)?;
        Ok(if self.little { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) })
    }

    fn string(&self, at: usize, width: usize) -> Result<String, InstrumentError> {
        let raw = self
            .bytes
            .get(at..at + width)
            .ok_or_else(|| protocol(format!("descriptor truncated at offset {at}")))?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).trim().to_string())
    }

    fn timestamp(&self, at: usize) -> Result<Option<String>, InstrumentError> {
        let seconds = self.f64(at)?;
        let [minutes] = self.take::<1>(at + 8)?;
        let [hours] = self.take::<1>(at + 9)?;
        let [day] = self.take::<1>(at + 10)?;
        let [month] = self.take::<1>(at + 11)?;
        let year = self.i16(at + 12)?;

        let whole = seconds.trunc();
        let nanos = ((seconds - whole) * 1e9).round() as u32;
        let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
        let time = NaiveTime::from_hms_nano_opt(
            u32::from(hours),
            u32::from(minutes),
            whole as u32,
            nanos.min(999_999_999),
        );
        Ok(date
            .zip(time)
            .map(|(d, t)| NaiveDateTime::new(d, t).format("%Y-%m-%dT%H:%M:%S%.9f").to_string()))
    }
}

impl WaveDesc {
    /// Decode the descriptor at the start of `block`.
    pub fn parse(block: &[u8]) -> Result<Self, InstrumentError> {
        if block.len() < DESCRIPTOR_LEN {
            return Err(protocol(format!(
                "waveform block of {} bytes is shorter than the descriptor",
                block.len()
            )));
        }
        if !block.starts_with(b"WAVEDESC") {
            return Err(protocol("waveform block does not start with WAVEDESC"));
        }

        // COMM_ORDER: 0 = big endian, 1 = little endian
        let f = Fields {
            bytes: block,
            little: block[offset::COMM_ORDER] == 1 && block[offset::COMM_ORDER + 1] == 0,
        };

        Ok(Self {
            descriptor_name: f.string(offset::DESCRIPTOR_NAME, 16)?,
            template_name: f.string(offset::TEMPLATE_NAME, 16)?,
            comm_type: f.i16(offset::COMM_TYPE)?,
            comm_order: f.i16(offset::COMM_ORDER)?,
            wave_descriptor: f.len(offset::WAVE_DESCRIPTOR)?,
            user_text: f.len(offset::USER_TEXT)?,
            trigtime_array: f.len(offset::TRIGTIME_ARRAY)?,
            ris_time_array: f.len(offset::RIS_TIME_ARRAY)?,
            wave_array_1: f.len(offset::WAVE_ARRAY_1)?,
            instrument_name: f.string(offset::INSTRUMENT_NAME, 16)?,
            instrument_number: f.i32(offset::INSTRUMENT_NUMBER)?,
            trace_label: f.string(offset::TRACE_LABEL, 16)?,
            wave_array_count: f.i32(offset::WAVE_ARRAY_COUNT)?,
            first_valid_pnt: f.i32(offset::FIRST_VALID_PNT)?,
            last_valid_pnt: f.i32(offset::LAST_VALID_PNT)?,
            subarray_count: f.i32(offset::SUBARRAY_COUNT)?,
            sweeps_per_acq: f.i32(offset::SWEEPS_PER_ACQ)?,
            vertical_gain: f.f32(offset::VERTICAL_GAIN)?,
            vertical_offset: f.f32(offset::VERTICAL_OFFSET)?,
            nominal_bits: f.i16(offset::NOMINAL_BITS)?,
            horiz_interval: f.f32(offset::HORIZ_INTERVAL)?,
            horiz_offset: f.f64(offset::HORIZ_OFFSET)?,
            vertunit: f.string(offset::VERTUNIT, 48)?,
            horunit: f.string(offset::HORUNIT, 48)?,
            trigger_time: f.timestamp(offset::TRIGGER_TIME)?,
            acq_duration: f.f32(offset::ACQ_DURATION)?,
            record_type: f.i16(offset::RECORD_TYPE)?,
            timebase: f.i16(offset::TIMEBASE)?,
            vert_coupling: f.i16(offset::VERT_COUPLING)?,
            probe_att: f.f32(offset::PROBE_ATT)?,
            bandwidth_limit: f.i16(offset::BANDWIDTH_LIMIT)?,
            wave_source: f.i16(offset::WAVE_SOURCE)?,
        })
    }

    fn is_little_endian(&self) -> bool {
        self.comm_order == 1
    }

    fn sample_width(&self) -> Result<usize, InstrumentError> {
        match self.comm_type {
            0 => Ok(1),
            1 => Ok(2),
            other => Err(protocol(format!("unknown COMM_TYPE {other}"))),
        }
    }

    fn segments(&self) -> usize {
        usize::try_from(self.subarray_count).unwrap_or(0).max(1)
    }
}

/// Decode a full waveform block into a [`ChannelCapture`].
pub fn decode_channel(channel: u8, block: &[u8]) -> Result<ChannelCapture, InstrumentError> {
    let desc = WaveDesc::parse(block)?;
    let little = desc.is_little_endian();
    let width = desc.sample_width()?;

    let trig_start = desc.wave_descriptor as usize + desc.user_text as usize;
    let wave_start = trig_start + desc.trigtime_array as usize + desc.ris_time_array as usize;
    let wave_len = desc.wave_array_1 as usize;

    if wave_len == 0 {
        // disabled traces return an empty record
        return Err(InstrumentError::ChannelUnavailable(channel));
    }

    let trig_bytes = block
        .get(trig_start..trig_start + desc.trigtime_array as usize)
        .ok_or_else(|| protocol("block truncated in TRIGTIME array"))?;
    let wave_bytes = block
        .get(wave_start..wave_start + wave_len)
        .ok_or_else(|| protocol("block truncated in WAVE_ARRAY_1"))?;

    let read_f64 = |chunk: &[u8]| -> f64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(chunk);
        if little { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) }
    };
    let trigger_times: Vec<TriggerStamp> = trig_bytes
        .chunks_exact(16)
        .map(|pair| TriggerStamp {
            time: read_f64(&pair[..8]),
            offset: read_f64(&pair[8..]),
        })
        .collect();

    let gain = f64::from(desc.vertical_gain);
    let vert_offset = f64::from(desc.vertical_offset);
    let amplitudes: Vec<f64> = match width {
        1 => wave_bytes
            .iter()
            .map(|&b| gain * f64::from(b as i8) - vert_offset)
            .collect(),
        _ => wave_bytes
            .chunks_exact(2)
            .map(|w| {
                let raw = if little {
                    i16::from_le_bytes([w[0], w[1]])
                } else {
                    i16::from_be_bytes([w[0], w[1]])
                };
                gain * f64::from(raw) - vert_offset
            })
            .collect(),
    };

    let segments = desc.segments();
    let per_segment = amplitudes.len() / segments;
    if per_segment == 0 {
        return Err(protocol(format!(
            "{} samples cannot fill {segments} segments",
            amplitudes.len()
        )));
    }

    let interval = f64::from(desc.horiz_interval);
    let waveforms = amplitudes
        .chunks_exact(per_segment)
        .take(segments)
        .enumerate()
        .map(|(segment, amplitude)| {
            let start = if segments == 1 {
                desc.horiz_offset
            } else {
                trigger_times
                    .get(segment)
                    .map_or(desc.horiz_offset, |t| t.offset)
            };
            Waveform {
                time: (0..amplitude.len())
                    .map(|i| start + i as f64 * interval)
                    .collect(),
                amplitude: amplitude.to_vec(),
            }
        })
        .collect();

    let header = serde_json::to_value(&desc)
        .map_err(|e| protocol(format!("descriptor not representable: {e}")))?;

    Ok(ChannelCapture {
        channel,
        header,
        trigger_times,
        waveforms,
    })
}
