//! LeCroy WaveRunner driver (VICP over TCP).
//!
//! The session is configured for headerless replies and binary word
//! waveforms. A trigger is awaited by arming a single acquisition and polling
//! the trigger mode until the instrument reports `STOP`.
//!
//! Replies abandoned by cancellation (an operator interrupt while polling)
//! are counted and drained before the next command, so the command/response
//! pairing stays intact across runs.

use super::vicp::{definite_block, VicpStream};
use super::wavedesc::decode_channel;
use super::{ChannelCapture, Oscilloscope, ScopeConnector};
use crate::clock::Clock;
use crate::config::{InstrumentSettings, MAX_CHANNELS};
use crate::error::InstrumentError;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};

pub struct LeCroyScope<T> {
    vicp: VicpStream<T>,
    pending_replies: u32,
    io_timeout: Duration,
    trigger_poll: Duration,
    clock: Arc<dyn Clock>,
}

impl<T> LeCroyScope<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T, io_timeout: Duration, trigger_poll: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            vicp: VicpStream::new(io),
            pending_replies: 0,
            io_timeout,
            trigger_poll,
            clock,
        }
    }

    /// Headerless replies, binary 16-bit waveforms with a 9-digit block length.
    pub async fn configure(&mut self) -> Result<(), InstrumentError> {
        self.write("COMM_HEADER OFF").await?;
        self.write("COMM_FORMAT DEF9,WORD,BIN").await
    }

    async fn receive_reply(&mut self) -> Result<Vec<u8>, InstrumentError> {
        let reply = tokio::time::timeout(self.io_timeout, self.vicp.receive())
            .await
            .map_err(|_| {
                InstrumentError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no reply within {:?}", self.io_timeout),
                ))
            })??;
        self.pending_replies = self.pending_replies.saturating_sub(1);
        Ok(reply)
    }

    async fn send(&mut self, command: &str) -> Result<(), InstrumentError> {
        while self.pending_replies > 0 {
            let stale = self.receive_reply().await?;
            debug!(bytes = stale.len(), "discarded stale reply");
        }
        trace!(command, "send");
        let line = format!("{command}\n");
        tokio::time::timeout(self.io_timeout, self.vicp.send(line.as_bytes()))
            .await
            .map_err(|_| InstrumentError::Disconnected)??;
        Ok(())
    }

    /// Send a command that produces no reply.
    pub async fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.send(command).await
    }

    /// Send a query and return the raw reply bytes.
    pub async fn query_raw(&mut self, command: &str) -> Result<Vec<u8>, InstrumentError> {
        self.send(command).await?;
        self.pending_replies += 1;
        self.receive_reply().await
    }

    /// Send a query and return the reply as trimmed text.
    pub async fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        let raw = self.query_raw(command).await?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

#[async_trait]
impl<T> Oscilloscope for LeCroyScope<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn identify(&mut self) -> Result<String, InstrumentError> {
        self.query("*IDN?").await
    }

    async fn wait_for_trigger(&mut self) -> Result<(), InstrumentError> {
        self.write("TRIG_MODE SINGLE").await?;
        loop {
            let mode = self.query("TRIG_MODE?").await?;
            if mode.ends_with("STOP") {
                return Ok(());
            }
            self.clock.sleep(self.trigger_poll).await;
        }
    }

    async fn read_channel(&mut self, channel: u8) -> Result<ChannelCapture, InstrumentError> {
        if channel == 0 || channel > MAX_CHANNELS {
            return Err(InstrumentError::ChannelUnavailable(channel));
        }
        let reply = self.query_raw(&format!("C{channel}:WAVEFORM? ALL")).await?;
        let block = definite_block(&reply)
            .map_err(|e| InstrumentError::Protocol(format!("C{channel} waveform: {e}")))?;
        decode_channel(channel, block)
    }
}

/// Host part of a VISA resource string (`TCPIP0::<host>::inst0::INSTR`), or the
/// address itself when it is a bare host.
pub fn resource_host(address: &str) -> &str {
    let mut parts = address.split("::");
    match (parts.next(), parts.next()) {
        (Some(interface), Some(host)) if interface.to_ascii_uppercase().starts_with("TCPIP") => {
            host
        }
        _ => address,
    }
}

/// Opens VICP sessions to LeCroy oscilloscopes.
pub struct LeCroyConnector {
    port: u16,
    io_timeout: Duration,
    trigger_poll: Duration,
    clock: Arc<dyn Clock>,
}

impl LeCroyConnector {
    pub fn new(settings: &InstrumentSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            port: settings.port,
            io_timeout: settings.io_timeout(),
            trigger_poll: settings.trigger_poll(),
            clock,
        }
    }
}

#[async_trait]
impl ScopeConnector for LeCroyConnector {
    async fn open(&self, address: &str) -> Result<Box<dyn Oscilloscope>, InstrumentError> {
        let host = resource_host(address);
        let unreachable = |reason: String| InstrumentError::Connection {
            address: address.to_string(),
            reason,
        };

        let stream = tokio::time::timeout(self.io_timeout, TcpStream::connect((host, self.port)))
            .await
            .map_err(|_| unreachable("connect timed out".to_string()))?
            .map_err(|e| unreachable(e.to_string()))?;
        stream.set_nodelay(true)?;

        let mut scope = LeCroyScope::new(stream, self.io_timeout, self.trigger_poll, self.clock.clone());
        scope.configure().await?;
        Ok(Box::new(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::instrument::wavedesc::testing::{build_block, BlockSpec};

    const IDN: &str = "LECROY,WAVERUNNER9254M,LCRY4751N40408,9.2.0";

    /// Answers the handful of commands the driver uses.
    async fn fake_scope(io: tokio::io::DuplexStream, busy_polls: usize) {
        let mut vicp = VicpStream::new(io);
        let mut polls = 0;
        while let Ok(raw) = vicp.receive().await {
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            let reply: Option<Vec<u8>> = match command.as_str() {
                "*IDN?" => Some(IDN.as_bytes().to_vec()),
                "TRIG_MODE?" => {
                    polls += 1;
                    Some(if polls > busy_polls { b"STOP".to_vec() } else { b"SINGLE".to_vec() })
                }
                "SLOW?" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Some(b"late".to_vec())
                }
                "C1:WAVEFORM? ALL" => {
                    let block = build_block(&BlockSpec::default());
                    let mut reply = format!("#9{:09}", block.len()).into_bytes();
                    reply.extend(block);
                    Some(reply)
                }
                "C2:WAVEFORM? ALL" => {
                    let block = build_block(&BlockSpec {
                        samples: vec![],
                        ..BlockSpec::default()
                    });
                    let mut reply = format!("#9{:09}", block.len()).into_bytes();
                    reply.extend(block);
                    Some(reply)
                }
                _ => None,
            };
            if let Some(reply) = reply {
                if vicp.send(&reply).await.is_err() {
                    break;
                }
            }
        }
    }

    fn scope_pair(busy_polls: usize) -> LeCroyScope<tokio::io::DuplexStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(fake_scope(server, busy_polls));
        LeCroyScope::new(
            client,
            Duration::from_secs(2),
            Duration::from_millis(1),
            Arc::new(TokioClock),
        )
    }

    #[test]
    fn test_resource_host() {
        assert_eq!(
            resource_host("TCPIP0::192.168.189.115::inst0::INSTR"),
            "192.168.189.115"
        );
        assert_eq!(resource_host("scope.lab"), "scope.lab");
    }

    #[tokio::test]
    async fn test_identify_and_trigger() {
        let mut scope = scope_pair(3);
        scope.configure().await.unwrap();
        assert_eq!(scope.identify().await.unwrap(), IDN);
        scope.wait_for_trigger().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_channel_decodes_block() {
        let mut scope = scope_pair(0);
        let capture = scope.read_channel(1).await.unwrap();
        assert_eq!(capture.channel, 1);
        assert_eq!(capture.waveforms[0].len(), 4);
        assert_eq!(capture.header["TEMPLATE_NAME"], "LECROY_2_3");
    }

    #[tokio::test]
    async fn test_disabled_channel_fails() {
        let mut scope = scope_pair(0);
        let err = scope.read_channel(2).await.unwrap_err();
        assert!(matches!(err, InstrumentError::ChannelUnavailable(2)));
        // the session is still usable afterwards
        assert_eq!(scope.identify().await.unwrap(), IDN);
    }

    #[tokio::test]
    async fn test_abandoned_query_is_drained() {
        let mut scope = scope_pair(0);
        let abandoned = tokio::time::timeout(Duration::from_millis(5), scope.query("SLOW?")).await;
        assert!(abandoned.is_err());

        assert_eq!(scope.identify().await.unwrap(), IDN);
    }
}
