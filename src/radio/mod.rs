//! # Radio Module
//!
//! Everything that talks AT to the modem.
//!
//! This module handles:
//! - AT command/response framing over the serial channel
//! - Modem reset, identification and NMEA enable
//! - Repeating cell surveys and survey line decoding
//! - Holding ModemManager off the modem while scanning

pub mod inhibit;
pub mod link;
pub mod scanner;
pub mod survey;
