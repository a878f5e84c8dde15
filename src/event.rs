//! # Event Types
//!
//! Immutable messages pushed by the workers onto the single coordinator queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Producer side of the coordinator queue
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Consumer side of the coordinator queue
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Create the ordered multi-producer/single-consumer coordinator queue
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Radio access technology of an observed cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Generation {
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "4g")]
    G4,
}

impl Generation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Generation::G2 => "2g",
            Generation::G3 => "3g",
            Generation::G4 => "4g",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "2g" => Some(Generation::G2),
            "3g" => Some(Generation::G3),
            "4g" => Some(Generation::G4),
            _ => None,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed base station
///
/// Identifier fields are kept exactly as the modem printed them. Whether a value
/// is numerically sane is for the collection server to decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub generation: Generation,
    pub mcc: String,
    pub mnc: String,
    pub lac: String,
    pub cell_id: String,
    pub signal_level: String,
}

/// Satellite-derived position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Altitude above mean sea level in meters
    pub alt: f64,
}

/// How an upload attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server acknowledged this many observations
    Uploaded(usize),
    /// Nothing was pending
    NothingToSend,
    /// Bearer, transport or store failure; pending records are untouched
    Failed,
}

/// Coordinator queue message
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Latest valid GNSS fix
    LocationFix(Position),
    /// Result of one survey cycle
    NetworkData { sites: Vec<Site> },
    /// Control button released after being held for `press_duration`
    ControlEvent { press_duration: Duration },
    /// Upload worker finished, whatever the result
    UploadComplete { outcome: UploadOutcome },
    /// Network scanner could not start and has exited
    ScannerFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_round_trips_through_text() {
        for generation in [Generation::G2, Generation::G3, Generation::G4] {
            assert_eq!(Generation::parse(generation.as_str()), Some(generation));
        }
        assert_eq!(Generation::parse("5g"), None);
    }

    #[test]
    fn test_generation_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Generation::G4).unwrap(), "\"4g\"");
    }

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (tx, mut rx) = channel();
        tx.send(Event::ControlEvent { press_duration: Duration::from_millis(100) }).unwrap();
        tx.send(Event::UploadComplete { outcome: UploadOutcome::NothingToSend }).unwrap();

        assert!(matches!(rx.recv().await, Some(Event::ControlEvent { .. })));
        assert!(matches!(rx.recv().await, Some(Event::UploadComplete { .. })));
    }
}
