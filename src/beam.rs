//! Beam-status tag lookup.
//!
//! The accelerator control system publishes a short status string under a
//! fixed memcached key. It is fetched once per run start; failures are never
//! fatal and the run records [`UNKNOWN_BEAM_TAG`] instead.

use crate::config::BeamSettings;
use crate::error::LookupError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Recorded when the lookup fails.
pub const UNKNOWN_BEAM_TAG: &str = "UNKNOWN";

const MAX_RESPONSE_LEN: usize = 64 * 1024;

#[async_trait]
pub trait BeamStatusLookup: Send + Sync {
    async fn beam_tag(&self) -> Result<String, LookupError>;
}

/// Reads the tag with the memcached text protocol.
pub struct MemcacheLookup {
    host: String,
    port: u16,
    key: String,
    timeout: Duration,
}

impl MemcacheLookup {
    pub fn new(settings: &BeamSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            key: settings.key.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    async fn fetch(&self) -> Result<String, LookupError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream
            .write_all(format!("get {}\r\n", self.key).as_bytes())
            .await?;

        let mut response = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(tag) = parse_get_response(&self.key, &response)? {
                return Ok(tag);
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(LookupError::Protocol(
                    "connection closed before END".to_string(),
                ));
            }
            response.extend_from_slice(&chunk[..n]);
            if response.len() > MAX_RESPONSE_LEN {
                return Err(LookupError::Protocol("response too large".to_string()));
            }
        }
    }
}

#[async_trait]
impl BeamStatusLookup for MemcacheLookup {
    async fn beam_tag(&self) -> Result<String, LookupError> {
        tokio::time::timeout(self.timeout, self.fetch())
            .await
            .map_err(|_| LookupError::Timeout(self.timeout))?
    }
}

/// Parse a `get` reply. `Ok(None)` means more bytes are needed.
///
/// ```text
/// VALUE <key> <flags> <bytes>\r\n<data>\r\nEND\r\n
/// ```
pub fn parse_get_response(key: &str, response: &[u8]) -> Result<Option<String>, LookupError> {
    let Some(line_end) = find_crlf(response) else {
        return Ok(None);
    };
    let line = std::str::from_utf8(&response[..line_end])
        .map_err(|_| LookupError::Protocol("non-UTF-8 status line".to_string()))?;

    if line == "END" {
        return Err(LookupError::Missing(key.to_string()));
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    let length: usize = match fields.as_slice() {
        ["VALUE", _, _, bytes, ..] => bytes
            .parse()
            .map_err(|_| LookupError::Protocol(format!("bad length in '{line}'")))?,
        _ => return Err(LookupError::Protocol(format!("unexpected reply '{line}'"))),
    };

    if length > MAX_RESPONSE_LEN {
        return Err(LookupError::Protocol(format!(
            "value of {length} bytes exceeds {MAX_RESPONSE_LEN}"
        )));
    }
    let trailer = b"\r\nEND\r\n";
    let data_start = line_end + 2;
    let data_end = data_start.checked_add(length);
    let reply_end = data_end.and_then(|end| end.checked_add(trailer.len()));
    let (Some(data_end), Some(reply_end)) = (data_end, reply_end) else {
        return Err(LookupError::Protocol(format!("bad length in '{line}'")));
    };
    if response.len() < reply_end {
        return Ok(None);
    }
    if &response[data_end..reply_end] != trailer {
        return Err(LookupError::Protocol("missing END marker".to_string()));
    }
    Ok(Some(
        String::from_utf8_lossy(&response[data_start..data_end])
            .trim()
            .to_string(),
    ))
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\r\n")
}

/// Always answers with the same tag; used when the lookup is disabled.
pub struct FixedBeamTag(pub String);

#[async_trait]
impl BeamStatusLookup for FixedBeamTag {
    async fn beam_tag(&self) -> Result<String, LookupError> {
        Ok(self.0.clone())
    }
}
