//! TCP link to the display board.
//!
//! The board consumes a raw byte stream with no framing: one command must be
//! fully processed before the next one arrives. The link therefore enforces a
//! settling gap after every successful write, and all sends go through a
//! single connection owned by one controller.
//!
//! A successful write is treated as success. The production board sends no
//! acknowledgement; simulators can be asked for an `ACK`/`NACK` line via
//! [`DeviceConfig::expect_ack`].

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::error::LinkError;
use crate::types::Command;

/// Anything that can carry commands to the board.
///
/// Implementations own the connection and their retry budget; callers only
/// see the final outcome of each send.
pub trait CommandSink {
    /// Open the link if it is not open yet
    fn ensure_connected(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Write one command
    fn send(&mut self, command: &Command) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Release the connection
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Single TCP connection to the board
pub struct DeviceLink {
    config: DeviceConfig,
    stream: Option<BufStream<TcpStream>>,
    /// Earliest moment the next write may start
    ready_at: Option<Instant>,
}

impl DeviceLink {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            stream: None,
            ready_at: None,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open one connection. On failure no handle is kept.
    pub async fn connect(&mut self, connect_timeout: Duration) -> Result<(), LinkError> {
        self.disconnect().await;

        let endpoint = self.config.endpoint();
        let stream = match timeout(connect_timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Link: Failed to connect to {}: {}", endpoint, e);
                return Err(e.into());
            }
            Err(_) => {
                warn!("Link: Connect to {} timed out after {:?}", endpoint, connect_timeout);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out").into());
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Link: Could not set TCP_NODELAY: {}", e);
        }
        self.stream = Some(BufStream::new(stream));
        info!("Link: Connected to {}", endpoint);
        Ok(())
    }

    /// Retry `connect` with exponential backoff; no wait after the last attempt
    pub async fn connect_with_retry(
        &mut self,
        max_attempts: u32,
        backoff_base: u32,
    ) -> Result<(), LinkError> {
        let attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            debug!("Link: Connect attempt {}/{}", attempt + 1, attempts);
            match self.connect(self.config.connect_timeout()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        error!("Link: All {} connection attempts failed", attempts);
                        let source = match e {
                            LinkError::Io(io) => io,
                            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
                        };
                        return Err(LinkError::ConnectFailed {
                            endpoint: self.config.endpoint(),
                            attempts,
                            source,
                        });
                    }
                    let wait = backoff_delay(self.config.backoff_unit(), backoff_base, attempt - 1);
                    info!("Link: Connection failed, retrying in {:?}", wait);
                    sleep(wait).await;
                }
            }
        }
    }

    /// Write a command, retrying transport errors up to `retries` more times
    pub async fn send_with_retries(
        &mut self,
        command: &Command,
        retries: u32,
    ) -> Result<(), LinkError> {
        let bytes = command.to_bytes();
        let mut failures = 0;

        loop {
            if let Some(at) = self.ready_at.take() {
                sleep_until(at).await;
            }

            match self.write_once(&bytes).await {
                Ok(()) => {
                    debug!("Link: Sent {}", command);
                    self.ready_at = Some(Instant::now() + self.config.settle_delay());
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Link: Send {} failed (attempt {}/{}): {}",
                        command,
                        failures,
                        retries + 1,
                        e
                    );
                    if e.is_connection_lost() {
                        self.stream = None;
                    }
                    if failures > retries {
                        return Err(e);
                    }

                    sleep(self.config.retry_delay()).await;
                    if self.stream.is_none() {
                        if let Err(err) = self.connect(self.config.connect_timeout()).await {
                            debug!("Link: Reconnect before retry failed: {}", err);
                        }
                    }
                }
            }
        }
    }

    async fn write_once(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let expect_ack = self.config.expect_ack;
        let ack_timeout = self.config.ack_timeout();
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;

        stream.write_all(bytes).await?;
        stream.flush().await?;

        if expect_ack {
            read_ack(stream, ack_timeout).await?;
        }
        Ok(())
    }

    /// Shut down and drop the connection, if any
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Link: Shutdown error: {}", e);
            }
            info!("Link: Connection closed");
        }
    }
}

impl CommandSink for DeviceLink {
    async fn ensure_connected(&mut self) -> Result<(), LinkError> {
        if self.is_connected() {
            return Ok(());
        }
        let (attempts, base) = (self.config.connect_attempts, self.config.backoff_base);
        self.connect_with_retry(attempts, base).await
    }

    async fn send(&mut self, command: &Command) -> Result<(), LinkError> {
        let retries = self.config.send_retries;
        self.send_with_retries(command, retries).await
    }

    async fn close(&mut self) {
        self.disconnect().await;
    }
}

/// One reply line: `ACK` or `NACK`
async fn read_ack(stream: &mut BufStream<TcpStream>, wait: Duration) -> Result<(), LinkError> {
    let mut line = String::new();
    match timeout(wait, stream.read_line(&mut line)).await {
        Err(_) => Err(LinkError::AckTimeout(wait)),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(0)) => Err(LinkError::Closed),
        Ok(Ok(_)) => match line.trim() {
            "ACK" => Ok(()),
            "NACK" => Err(LinkError::Nack),
            other => Err(LinkError::UnexpectedReply(other.to_string())),
        },
    }
}

/// `unit * base^attempt`, saturating
fn backoff_delay(unit: Duration, base: u32, attempt: u32) -> Duration {
    unit.saturating_mul(base.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff_delay(unit, 2, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(unit, 2, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(unit, 2, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(unit, 3, 2), Duration::from_secs(9));
        assert_eq!(
            backoff_delay(unit, 2, 64),
            Duration::from_secs(u32::MAX as u64)
        );
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let config = DeviceConfig {
            port: 1,
            host: "127.0.0.1".to_string(),
            connect_timeout_ms: 50,
            retry_delay_ms: 1,
            ..Default::default()
        };
        let mut link = DeviceLink::new(config);
        let err = link
            .send_with_retries(&Command::main('A', "1234"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert!(!link.is_connected());
    }
}
