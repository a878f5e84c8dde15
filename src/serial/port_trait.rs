//! Trait abstraction for line-oriented serial I/O to enable testing

use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{ClearBuffer, SerialPort};

/// Trait for the modem's AT command channel
#[async_trait]
pub trait LinePort: Send {
    /// Write all data to the port and flush it
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read one line with the trailing CR/LF removed
    ///
    /// Fails with `TimedOut` when no complete line arrives within the port's
    /// response timeout and with `UnexpectedEof` when the device goes away.
    async fn read_line(&mut self) -> io::Result<String>;

    /// Drop everything the peer has sent that has not been read yet
    async fn discard_input(&mut self) -> io::Result<()>;
}

/// Wrapper around tokio_serial::SerialStream that implements LinePort
pub struct TokioSerialPort {
    reader: BufReader<tokio_serial::SerialStream>,
    response_timeout: Duration,
    /// Bytes of a line not yet terminated when the last read timed out
    partial: Vec<u8>,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream, response_timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(port),
            response_timeout,
            partial: Vec::new(),
        }
    }
}

#[async_trait]
impl LinePort for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let port = self.reader.get_mut();
        port.write_all(data).await?;
        port.flush().await
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let read = tokio::time::timeout(
            self.response_timeout,
            self.reader.read_until(b'\n', &mut self.partial),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response from modem"))??;

        if read == 0 && self.partial.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"));
        }

        let raw = std::mem::take(&mut self.partial);
        // Modems occasionally emit stray non-ASCII bytes after a reset
        let line = String::from_utf8_lossy(&raw);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn discard_input(&mut self) -> io::Result<()> {
        self.partial.clear();
        let buffered = self.reader.buffer().len();
        Pin::new(&mut self.reader).consume(buffered);
        self.reader
            .get_mut()
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}
