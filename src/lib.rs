//! # CellScan Library
//!
//! Survey nearby cell sites with a cellular modem and upload GNSS-tagged
//! observations over the same modem.
//!
//! Scanning (AT commands on the modem's serial port) and uploading (a data
//! bearer managed by ModemManager) cannot share the radio. The coordinator
//! hands the modem from one to the other.

pub mod bearer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod gnss;
pub mod panel;
pub mod radio;
pub mod serial;
pub mod store;
pub mod upload;
