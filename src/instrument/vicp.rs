//! LeCroy VICP framing over a byte stream.
//!
//! Every message is preceded by an 8-byte header:
//!
//! ```text
//! [operation][version = 1][sequence][reserved][length: u32 big-endian]
//! ```
//!
//! A logical response may span several frames; the last one carries the EOI
//! bit. The transport is generic over tokio streams so tests can drive it over
//! an in-memory duplex pipe.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default VICP TCP port.
pub const VICP_PORT: u16 = 1861;

pub const HEADER_LEN: usize = 8;
pub const PROTOCOL_VERSION: u8 = 1;

/// Responses larger than this are treated as a corrupted stream.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// Operation bits of the header's first byte.
pub mod op {
    pub const DATA: u8 = 0x80;
    pub const REMOTE: u8 = 0x40;
    pub const LOCKOUT: u8 = 0x20;
    pub const CLEAR: u8 = 0x10;
    pub const SRQ: u8 = 0x08;
    pub const SERIAL_POLL: u8 = 0x04;
    pub const EOI: u8 = 0x01;
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub operation: u8,
    pub sequence: u8,
    pub length: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let len = self.length.to_be_bytes();
        [
            self.operation,
            PROTOCOL_VERSION,
            self.sequence,
            0,
            len[0],
            len[1],
            len[2],
            len[3],
        ]
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> io::Result<Self> {
        if bytes[1] != PROTOCOL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported VICP version {}", bytes[1]),
            ));
        }
        Ok(Self {
            operation: bytes[0],
            sequence: bytes[2],
            length: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn is_eoi(&self) -> bool {
        self.operation & op::EOI != 0
    }
}

/// A VICP session on top of a byte stream.
///
/// `receive` is cancel safe: bytes read before a cancellation stay buffered
/// and the next call resumes parsing where the last one stopped. A `send`
/// cancelled mid-write leaves the stream unusable; later sends fail with
/// `BrokenPipe`.
pub struct VicpStream<T> {
    io: T,
    sequence: u8,
    rx: Vec<u8>,
    tx_incomplete: bool,
}

impl<T> VicpStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T) -> Self {
        Self {
            io,
            sequence: 1,
            rx: Vec::new(),
            tx_incomplete: false,
        }
    }

    fn next_sequence(&mut self) -> u8 {
        let current = self.sequence;
        // sequence numbers cycle through 1..=255
        self.sequence = (self.sequence % 255) + 1;
        current
    }

    /// Send one complete message (single frame, EOI set).
    pub async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        if self.tx_incomplete {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "a previous VICP write was interrupted",
            ));
        }
        let length = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "VICP payload too large"))?;
        let header = FrameHeader {
            operation: op::DATA | op::REMOTE | op::EOI,
            sequence: self.next_sequence(),
            length,
        };

        self.tx_incomplete = true;
        self.io.write_all(&header.encode()).await?;
        self.io.write_all(payload).await?;
        self.io.flush().await?;
        self.tx_incomplete = false;
        Ok(())
    }

    /// Receive one complete message, concatenating frames until EOI.
    pub async fn receive(&mut self) -> io::Result<Vec<u8>> {
        loop {
            if let Some(message) = self.take_message()? {
                return Ok(message);
            }
            self.rx.reserve(64 * 1024);
            if self.io.read_buf(&mut self.rx).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "instrument closed the connection",
                ));
            }
        }
    }

    /// Pop the first complete message from the receive buffer, if any.
    fn take_message(&mut self) -> io::Result<Option<Vec<u8>>> {
        // locate the EOI frame without copying payloads
        let mut frames = Vec::new();
        let mut pos = 0;
        let mut total = 0usize;
        loop {
            let Some(raw) = self.rx.get(pos..pos + HEADER_LEN) else {
                return Ok(None);
            };
            let mut bytes = [0u8; HEADER_LEN];
            bytes.copy_from_slice(raw);
            let header = FrameHeader::decode(&bytes)?;

            let length = header.length as usize;
            total += length;
            if total > MAX_MESSAGE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("VICP message exceeds {MAX_MESSAGE_LEN} bytes"),
                ));
            }

            let body = pos + HEADER_LEN;
            if self.rx.len() < body + length {
                return Ok(None);
            }
            // out-of-band frames (e.g. SRQ) carry no response bytes
            if header.operation & op::DATA != 0 {
                frames.push(body..body + length);
            }
            pos = body + length;
            if header.is_eoi() {
                break;
            }
        }

        let mut message = Vec::with_capacity(frames.iter().map(|r| r.len()).sum());
        for range in frames {
            message.extend_from_slice(&self.rx[range]);
        }
        self.rx.drain(..pos);
        Ok(Some(message))
    }
}

/// Extract the payload of an IEEE 488.2 definite-length block (`#<n><len><data>`).
///
/// Anything before the `#` (an echoed command header) is ignored.
pub fn definite_block(response: &[u8]) -> io::Result<&[u8]> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());

    let hash = response
        .iter()
        .position(|&b| b == b'#')
        .ok_or_else(|| invalid("response has no binary block"))?;
    let digits = response
        .get(hash + 1)
        .and_then(|d| (*d as char).to_digit(10))
        .ok_or_else(|| invalid("missing block length digit count"))? as usize;
    if digits == 0 {
        return Err(invalid("indefinite-length blocks are not supported"));
    }

    let len_start = hash + 2;
    let len_field = response
        .get(len_start..len_start + digits)
        .ok_or_else(|| invalid("truncated block length"))?;
    let length: usize = std::str::from_utf8(len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("block length is not a number"))?;

    let data_start = len_start + digits;
    response
        .get(data_start..data_start + length)
        .ok_or_else(|| invalid("block shorter than its declared length"))
}
