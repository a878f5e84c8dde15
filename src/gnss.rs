//! # GNSS Listener
//!
//! Reads the modem's NMEA interface and turns valid `GGA` fixes into
//! `LocationFix` events.
//!
//! ```text
//! $GNGGA,022241.00,3505.0640,N,10639.0240,W,1,09,1.1,1619.2,M,-21.3,M,,*74
//!        time      lat       N/S lon        E/W q sats hdop alt
//! ```

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ModemConfig;
use crate::error::{CellscanError, Result};
use crate::event::{Event, EventSender, Position};
use crate::serial::open_port;

/// Wait before reopening the NMEA port after a failure
const REOPEN_DELAY: Duration = Duration::from_secs(5);

const GGA_ALTITUDE_FIELD: usize = 9;

/// Check the `*hh` XOR checksum if the sentence carries one
fn verify_checksum(sentence: &str) -> Result<&str> {
    let body = sentence
        .strip_prefix('$')
        .ok_or_else(|| CellscanError::Parse(format!("not an NMEA sentence: {:?}", sentence)))?;

    let Some((body, expected)) = body.split_once('*') else {
        return Ok(body);
    };

    let expected = u8::from_str_radix(expected.trim(), 16)
        .map_err(|_| CellscanError::Parse(format!("bad checksum field in {:?}", sentence)))?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);

    if actual != expected {
        return Err(CellscanError::Parse(format!(
            "checksum mismatch: computed {:02X}, sentence says {:02X}",
            actual, expected
        )));
    }
    Ok(body)
}

/// Convert `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed degrees
fn parse_coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Result<f64> {
    let bad = || CellscanError::Parse(format!("bad coordinate {:?}{}", value, hemisphere));

    if value.len() < degree_digits + 2 || !value.is_char_boundary(degree_digits) {
        return Err(bad());
    }
    let (degrees, minutes) = value.split_at(degree_digits);
    let degrees: f64 = degrees.parse().map_err(|_| bad())?;
    let minutes: f64 = minutes.parse().map_err(|_| bad())?;
    let magnitude = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Ok(magnitude),
        "S" | "W" => Ok(-magnitude),
        _ => Err(bad()),
    }
}

/// Decode one NMEA sentence
///
/// # Returns
///
/// * `Ok(Some(position))` - A `GGA` sentence with a valid fix
/// * `Ok(None)` - Any other sentence, or a `GGA` without a fix
///
/// # Errors
///
/// Returns `Parse` for a checksum mismatch or a malformed `GGA`
pub fn parse_gga(sentence: &str) -> Result<Option<Position>> {
    let body = verify_checksum(sentence.trim())?;
    let fields: Vec<&str> = body.split(',').collect();

    // Any talker: GP, GN, GL, GA...
    if fields[0].len() != 5 || !fields[0].ends_with("GGA") {
        return Ok(None);
    }
    if fields.len() <= GGA_ALTITUDE_FIELD {
        return Err(CellscanError::Parse(format!("short GGA sentence: {:?}", sentence)));
    }

    // Quality 0 means no fix; positions before the first fix are empty or wildly off
    match fields[6] {
        "" | "0" => return Ok(None),
        _ => {}
    }

    let lat = parse_coordinate(fields[2], fields[3], 2)?;
    let lon = parse_coordinate(fields[4], fields[5], 3)?;
    let alt = fields[GGA_ALTITUDE_FIELD]
        .parse()
        .map_err(|_| CellscanError::Parse(format!("bad altitude {:?}", fields[GGA_ALTITUDE_FIELD])))?;

    Ok(Some(Position { lat, lon, alt }))
}

/// Forward fixes from an NMEA line stream until it ends or `cancel` fires
pub async fn read_fixes<R>(reader: &mut R, events: &EventSender, cancel: &CancellationToken) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(128);

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            return Err(CellscanError::Serial("NMEA stream closed".to_string()));
        }

        let line = String::from_utf8_lossy(&buf);
        trace!("NMEA: {}", line.trim_end());

        match parse_gga(&line) {
            Ok(Some(position)) => {
                if events.send(Event::LocationFix(position)).is_err() {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Dropping NMEA sentence: {}", e),
        }
    }
}

/// GNSS task body: read the NMEA port, reopening it after failures
pub async fn gnss_worker(modem: ModemConfig, events: EventSender, cancel: CancellationToken) {
    info!("Listening for NMEA on {}...", modem.nmea_port);

    while !cancel.is_cancelled() {
        let result = match open_port(&modem.nmea_port, modem.baud_rate) {
            Ok(port) => read_fixes(&mut BufReader::new(port), &events, &cancel).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("GNSS listener error: {}", e);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(REOPEN_DELAY) => {}
            }
        }
    }

    info!("GNSS listener stopped");
}
