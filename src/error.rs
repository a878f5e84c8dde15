//! # Error Types
//!
//! Custom error types for CellScan using `thiserror`.

use thiserror::Error;

/// Main error type for CellScan
#[derive(Debug, Error)]
pub enum CellscanError {
    /// Modem answered `ERROR` to a command that required `OK`
    #[error("AT protocol error: command {command} expected OK but got {reply}")]
    Protocol { command: String, reply: String },

    /// Text from the modem or GNSS receiver did not match the expected layout
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data bearer never reached the connected state
    #[error("Bearer did not connect after {attempts} status polls")]
    ConnectTimeout { attempts: u32 },

    /// TCP failure while talking to the collection server
    #[error("Transport error: {0}")]
    Transport(String),

    /// An OS or modem-manager command failed
    #[error("External tool {program} failed: {detail}")]
    ExternalTool { program: String, detail: String },

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Record store errors
    #[error("Record store error: {0}")]
    Store(#[from] sqlx::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for CellScan
pub type Result<T> = std::result::Result<T, CellscanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_names_command() {
        let err = CellscanError::Protocol {
            command: "AT$GPSNMUN=2,1,1,1,1,1,1".to_string(),
            reply: "ERROR".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("AT$GPSNMUN"));
        assert!(msg.contains("ERROR"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "no reply");
        let err: CellscanError = io.into();
        assert!(matches!(err, CellscanError::Io(_)));
    }
}
