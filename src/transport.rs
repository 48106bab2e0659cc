//! Line framing over the serial link, plus the offline simulator.
//!
//! A command goes out as a single newline-terminated line; the device
//! answers with one newline-terminated line. [`SerialLink`] implements
//! that exchange against a real port, [`SimulatedLink`] synthesizes
//! canned responses without any hardware. Everything above this module
//! talks to the [`LineExchange`] seam and cannot tell the two apart.

use crate::error::{AstroLinkError, Result};
use crate::serial::{drain_serial_buffer, DynSerial, SharedPort};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Largest command or response line the device buffers.
pub const MAX_LINE_LEN: usize = 256;

/// Line terminator on the wire.
pub const TERMINATOR: u8 = b'\n';

/// One command/response exchange on the wire.
///
/// Implementations take `command` without the terminator and return the
/// response line with the terminator stripped.
#[async_trait]
pub trait LineExchange: Send + Sync {
    async fn exchange(&self, command: &str) -> Result<String>;

    /// Fire-and-forget variant: write the command and return without
    /// waiting for the response line.
    ///
    /// Pure actuator commands echo their code like everything else;
    /// callers use this only when they explicitly do not care. The
    /// default exchanges normally and discards the response.
    async fn post(&self, command: &str) -> Result<()> {
        let _ = self.exchange(command).await?;
        Ok(())
    }
}

/// Framer over a real serial port.
pub struct SerialLink {
    port: SharedPort,
    timeout: Duration,
}

impl SerialLink {
    pub fn new(port: SharedPort, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl LineExchange for SerialLink {
    async fn exchange(&self, command: &str) -> Result<String> {
        if command.len() >= MAX_LINE_LEN {
            return Err(AstroLinkError::CommandTooLong {
                len: command.len(),
                max: MAX_LINE_LEN,
            });
        }

        let mut guard = self.port.lock().await;

        let discarded = drain_serial_buffer(&mut *guard, 10).await;
        if discarded > 0 {
            tracing::trace!(discarded, "discarded stale bytes before command");
        }

        let result = exchange_once(&mut guard, command, self.timeout).await;

        // Flush trailing garbage, success or failure, so the next command
        // starts on a clean line.
        drain_serial_buffer(&mut *guard, 5).await;

        result
    }

    async fn post(&self, command: &str) -> Result<()> {
        if command.len() >= MAX_LINE_LEN {
            return Err(AstroLinkError::CommandTooLong {
                len: command.len(),
                max: MAX_LINE_LEN,
            });
        }

        let mut guard = self.port.lock().await;
        drain_serial_buffer(&mut *guard, 10).await;

        tracing::debug!(cmd = command, "CMD (no wait)");
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(TERMINATOR);
        guard.get_mut().write_all(&line).await?;
        guard.get_mut().flush().await?;
        Ok(())
    }
}

async fn exchange_once(
    port: &mut BufReader<DynSerial>,
    command: &str,
    timeout: Duration,
) -> Result<String> {
    tracing::debug!(cmd = command, "CMD");

    let mut line = Vec::with_capacity(command.len() + 1);
    line.extend_from_slice(command.as_bytes());
    line.push(TERMINATOR);
    port.get_mut().write_all(&line).await?;
    port.get_mut().flush().await?;

    let mut buf = Vec::with_capacity(MAX_LINE_LEN);
    let n = tokio::time::timeout(timeout, port.read_until(TERMINATOR, &mut buf))
        .await
        .map_err(|_| AstroLinkError::Timeout {
            command: command.to_string(),
        })??;

    if n == 0 {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    // A lone terminator is line noise, not an empty response.
    if n == 1 {
        return Err(AstroLinkError::ShortRead);
    }

    if buf.last() == Some(&TERMINATOR) {
        buf.pop();
    }

    let response = String::from_utf8_lossy(&buf).into_owned();
    tracing::debug!(res = %response, "RES");
    Ok(response)
}

/// Offline stand-in for the device.
///
/// Answers every command with a fixed line captured from real hardware;
/// no state is kept between calls, so the same command always yields the
/// same bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedLink;

impl SimulatedLink {
    pub fn new() -> Self {
        Self
    }

    fn canned(command: &str) -> Option<&'static str> {
        match command.as_bytes().first()? {
            b'#' => Some("#:AstroLink4mini"),
            b'q' => Some(
                "q:AL4MII:1234:0:5678:0:3.14:1:23.12:45:9.11:1:19.19:35:80:1:0:1:\
                 12.11:7.62:20.01:132.11:33:0:0:0:1:-10.1:7.7:1:19.19:35:8.22:1:1:18.11",
            ),
            b'u' => Some(
                "u:1:1:80:120:30:50:200:800:200:800:0:2:10000:80000:0:0:50:18:30:15:\
                 5:10:10:0:1:0:0:0:0:0:0:0:40:90:10:1100:14000:10000:100:0",
            ),
            b'A' => Some("A:4.5.0 mini II"),
            b'f' => Some("f:0"),
            b'R' => Some("R:"),
            b'P' => Some("P:"),
            b'H' => Some("H:"),
            b'S' => Some("S:"),
            b'F' => Some("F:"),
            b'U' => Some("U:"),
            _ => None,
        }
    }
}

#[async_trait]
impl LineExchange for SimulatedLink {
    async fn exchange(&self, command: &str) -> Result<String> {
        if command.len() >= MAX_LINE_LEN {
            return Err(AstroLinkError::CommandTooLong {
                len: command.len(),
                max: MAX_LINE_LEN,
            });
        }
        match Self::canned(command) {
            Some(response) => Ok(response.to_string()),
            // An unknown command gets silence from the real device too.
            None => Err(AstroLinkError::Timeout {
                command: command.to_string(),
            }),
        }
    }
}
