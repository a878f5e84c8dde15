//! # Upload Wire Protocol
//!
//! JSON messages delimited by a single EOT byte.
//!
//! ## Framing
//!
//! ```text
//! {"action":"upload","device":"cellscan-01","sites":[...]}<0x04>   client -> server
//! {"status":"OK"}<0x04>                                             server -> client
//! ```
//!
//! The terminator is never part of the JSON payload.

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{CellscanError, Result};
use crate::event::Generation;
use crate::store::Observation;

/// End-of-transmission message terminator
pub const EOT: u8 = 0x04;

/// Collection server TCP port
pub const COLLECTION_PORT: u16 = 6402;

/// Largest accepted message, terminator excluded
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Acknowledgement status for an accepted upload
pub const STATUS_OK: &str = "OK";

/// One observation as sent to the collection server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSite {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub rx: String,
    pub mcc: String,
    pub mnc: String,
    pub cellid: String,
    pub lac: String,
    pub gen: Generation,
    /// RFC 3339, UTC
    pub time: String,
}

impl From<&Observation> for WireSite {
    fn from(obs: &Observation) -> Self {
        Self {
            lat: obs.position.lat,
            lon: obs.position.lon,
            alt: obs.position.alt,
            rx: obs.site.signal_level.clone(),
            mcc: obs.site.mcc.clone(),
            mnc: obs.site.mnc.clone(),
            cellid: obs.site.cell_id.clone(),
            lac: obs.site.lac.clone(),
            gen: obs.site.generation,
            time: obs.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// Client request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    Upload { device: String, sites: Vec<WireSite> },
}

impl Request {
    pub fn upload(device: &str, observations: &[Observation]) -> Self {
        Request::Upload {
            device: device.to_string(),
            sites: observations.iter().map(WireSite::from).collect(),
        }
    }
}

/// Server reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Serialize `msg` and write it followed by EOT
pub async fn write_message<W, T>(w: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(msg)?;
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(CellscanError::Transport(format!(
            "message of {} bytes exceeds {} byte limit",
            bytes.len(),
            MAX_MESSAGE_BYTES
        )));
    }

    w.write_all(&bytes).await.map_err(transport)?;
    w.write_all(&[EOT]).await.map_err(transport)?;
    w.flush().await.map_err(transport)?;
    Ok(())
}

/// Read up to the next EOT and decode the JSON before it
///
/// Bytes after the terminator are discarded; one connection carries one message
/// each way.
pub async fn read_message<R, T>(r: &mut R) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if let Some(end) = buf.iter().position(|&b| b == EOT) {
            let payload = buf.split_to(end);
            return Ok(serde_json::from_slice(&payload)?);
        }

        if buf.len() > MAX_MESSAGE_BYTES {
            return Err(CellscanError::Transport(format!(
                "no terminator within {} bytes",
                MAX_MESSAGE_BYTES
            )));
        }

        let read = r.read_buf(&mut buf).await.map_err(transport)?;
        if read == 0 {
            return Err(CellscanError::Transport(
                "connection closed before end of message".to_string(),
            ));
        }
    }
}

fn transport(e: std::io::Error) -> CellscanError {
    CellscanError::Transport(e.to_string())
}
