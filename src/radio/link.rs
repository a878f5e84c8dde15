//! # AT Command Link
//!
//! Request/response engine for the modem's AT interface.
//!
//! ## Exchange Format
//!
//! ```text
//! -> AT+GMM\r\n
//! <- AT+GMM          (echo, discarded)
//! <- LE910C1-NF      (payload, zero or more lines)
//! <- OK              (terminator: OK or ERROR)
//! ```

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{CellscanError, Result};
use crate::serial::port_trait::LinePort;

/// Successful command terminator
pub const AT_OK: &str = "OK";

/// Failed command terminator
pub const AT_ERROR: &str = "ERROR";

/// Soft reset command
pub const AT_RESET: &str = "ATZ";

/// Terminator reported for a command, with the payload lines before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub lines: Vec<String>,
    pub ok: bool,
}

/// AT command engine over a line port
pub struct RadioLink<P: LinePort> {
    port: P,
    reset_delay: Duration,
    /// Set after a failed read; the rest of that reply may still arrive
    stale_input: bool,
}

impl<P: LinePort> RadioLink<P> {
    pub fn new(port: P, reset_delay: Duration) -> Self {
        Self {
            port,
            reset_delay,
            stale_input: false,
        }
    }

    /// Put the modem into a known command state
    ///
    /// A previous run may have left a half-typed command or echo quirks behind,
    /// so terminate any partial line, soft reset, wait out the echo and throw
    /// away whatever came back.
    pub async fn reset(&mut self) -> Result<()> {
        self.port.write_all(b"\r\n").await?;
        self.port.write_all(format!("{}\r\n", AT_RESET).as_bytes()).await?;
        tokio::time::sleep(self.reset_delay).await;
        self.port.discard_input().await?;
        self.stale_input = false;
        debug!("Modem reset, input discarded");
        Ok(())
    }

    /// Send a command that must answer `OK`
    ///
    /// # Returns
    ///
    /// * `Result<Vec<String>>` - Non-empty payload lines between echo and terminator
    ///
    /// # Errors
    ///
    /// - `Protocol` if the modem answers `ERROR`
    /// - `Io` on write failure or read timeout
    pub async fn send(&mut self, command: &str) -> Result<Vec<String>> {
        let response = self.transact(command).await?;
        if !response.ok {
            return Err(CellscanError::Protocol {
                command: command.to_string(),
                reply: AT_ERROR.to_string(),
            });
        }
        Ok(response.lines)
    }

    /// Send a command for which `ERROR` is an acceptable answer
    ///
    /// Some configuration commands report `ERROR` when the setting is already
    /// in the requested state.
    pub async fn send_allow_error(&mut self, command: &str) -> Result<AtResponse> {
        let response = self.transact(command).await?;
        if !response.ok {
            debug!("{} answered ERROR (tolerated)", command);
        }
        Ok(response)
    }

    async fn transact(&mut self, command: &str) -> Result<AtResponse> {
        if self.stale_input {
            self.port.discard_input().await?;
            self.stale_input = false;
            debug!("Discarded late input before {}", command);
        }

        self.port.write_all(format!("{}\r\n", command).as_bytes()).await?;
        debug!("Sent command {}", command);

        let echo = self.read_reply_line().await?;
        debug!("AT reply (echo): {}", echo.trim());

        let mut lines = Vec::new();
        loop {
            let line = self.read_reply_line().await?;
            let line = line.trim();
            match line {
                AT_OK => return Ok(AtResponse { lines, ok: true }),
                AT_ERROR => return Ok(AtResponse { lines, ok: false }),
                "" => continue,
                _ => {
                    debug!("AT reply: {}", line);
                    lines.push(line.to_string());
                }
            }
        }
    }

    /// Read one reply line, dropping unread input if the reply breaks off
    async fn read_reply_line(&mut self) -> Result<String> {
        match self.port.read_line().await {
            Ok(line) => Ok(line),
            Err(e) => {
                warn!("AT reply interrupted: {}", e);
                self.stale_input = true;
                if let Err(discard) = self.port.discard_input().await {
                    debug!("Discarding input failed: {}", discard);
                }
                Err(e.into())
            }
        }
    }
}
