//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::{CellscanError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub modem: ModemConfig,
    pub survey: SurveyConfig,
    pub bearer: BearerConfig,
    pub upload: UploadConfig,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
    pub panel: PanelConfig,
    pub logging: LoggingConfig,
}

/// Modem serial and modem-manager configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ModemConfig {
    #[serde(default = "default_at_port")]
    pub at_port: String,

    #[serde(default = "default_nmea_port")]
    pub nmea_port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,

    #[serde(default)]
    pub modem_index: u32,

    #[serde(default = "default_inhibit")]
    pub inhibit: bool,

    #[serde(default = "default_mmcli_path")]
    pub mmcli_path: String,
}

/// Network survey configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SurveyConfig {
    #[serde(default = "default_survey_interval_ms")]
    pub interval_ms: u64,
}

/// Packet-data bearer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BearerConfig {
    #[serde(default = "default_apn")]
    pub apn: String,

    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default)]
    pub bearer_index: u32,

    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    #[serde(default = "default_sync_clock")]
    pub sync_clock: bool,
}

/// Collection server upload configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Collection server address; the only host routed over the bearer
    pub target: Ipv4Addr,

    #[serde(default = "default_upload_port")]
    pub port: u16,

    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

/// Coordinator timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_short_press_ms")]
    pub short_press_ms: u64,

    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

/// Record store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Indicator LED and control button configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PanelConfig {
    #[serde(default = "default_panel_enabled")]
    pub enabled: bool,

    #[serde(default = "default_led_path")]
    pub led_path: String,

    #[serde(default = "default_button_device")]
    pub button_device: String,

    #[serde(default = "default_button_key_code")]
    pub button_key_code: u16,

    #[serde(default = "default_blink_interval_ms")]
    pub blink_interval_ms: u64,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for rolling log files; empty logs to the console only
    #[serde(default)]
    pub log_dir: String,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_at_port() -> String { "/dev/ttyUSB2".to_string() }
fn default_nmea_port() -> String { "/dev/ttyUSB1".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_response_timeout_ms() -> u64 { 120_000 }
fn default_reset_delay_ms() -> u64 { 1000 }
fn default_inhibit() -> bool { true }
fn default_mmcli_path() -> String { "mmcli".to_string() }

fn default_survey_interval_ms() -> u64 { 1000 }

fn default_apn() -> String { "hologram".to_string() }
fn default_interface() -> String { "wwan0".to_string() }
fn default_poll_interval_s() -> u64 { 10 }
fn default_max_polls() -> u32 { 10 }
fn default_sync_clock() -> bool { true }

fn default_upload_port() -> u16 { 6402 }
fn default_device_id() -> String { "cellscan".to_string() }
fn default_max_attempts() -> u32 { 5 }
fn default_retry_delay_ms() -> u64 { 2000 }
fn default_io_timeout_ms() -> u64 { 30_000 }

fn default_settle_delay_ms() -> u64 { 5000 }
fn default_short_press_ms() -> u64 { 1000 }
fn default_join_timeout_ms() -> u64 { 180_000 }

fn default_store_path() -> String { "datastore.sqlite".to_string() }

fn default_panel_enabled() -> bool { true }
fn default_led_path() -> String { "/sys/class/leds/cellscan/brightness".to_string() }
fn default_button_device() -> String { "/dev/input/by-path/platform-gpio-keys-event".to_string() }
fn default_button_key_code() -> u16 { 148 } // KEY_PROG1
fn default_blink_interval_ms() -> u64 { 1000 }

fn default_file_prefix() -> String { "cellscan.log".to_string() }

impl ModemConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}

impl SurveyConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl BearerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }
}

impl UploadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl CoordinatorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn short_press(&self) -> Duration {
        Duration::from_millis(self.short_press_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl PanelConfig {
    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            short_press_ms: default_short_press_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> CellscanError {
    CellscanError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cellscan::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Serial ports
        if self.modem.at_port.is_empty() {
            return Err(invalid("modem at_port cannot be empty"));
        }

        if self.modem.nmea_port.is_empty() {
            return Err(invalid("modem nmea_port cannot be empty"));
        }

        if self.modem.at_port == self.modem.nmea_port {
            return Err(invalid("modem at_port and nmea_port must be different devices"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600].contains(&self.modem.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if self.modem.response_timeout_ms == 0 || self.modem.response_timeout_ms > 600_000 {
            return Err(invalid("response_timeout_ms must be between 1 and 600000"));
        }

        if self.modem.reset_delay_ms > 10_000 {
            return Err(invalid("reset_delay_ms must be at most 10000"));
        }

        if self.modem.mmcli_path.is_empty() {
            return Err(invalid("mmcli_path cannot be empty"));
        }

        // Survey timing
        if self.survey.interval_ms == 0 || self.survey.interval_ms > 60_000 {
            return Err(invalid("survey interval_ms must be between 1 and 60000"));
        }

        // Bearer
        if self.bearer.apn.is_empty() {
            return Err(invalid("bearer apn cannot be empty"));
        }

        if self.bearer.interface.is_empty() {
            return Err(invalid("bearer interface cannot be empty"));
        }

        if self.bearer.poll_interval_s == 0 || self.bearer.poll_interval_s > 300 {
            return Err(invalid("poll_interval_s must be between 1 and 300"));
        }

        if self.bearer.max_polls == 0 || self.bearer.max_polls > 100 {
            return Err(invalid("max_polls must be between 1 and 100"));
        }

        // Upload
        if self.upload.target.is_unspecified() {
            return Err(invalid("upload target cannot be 0.0.0.0"));
        }

        if self.upload.port == 0 {
            return Err(invalid("upload port cannot be 0"));
        }

        if self.upload.device_id.is_empty() {
            return Err(invalid("upload device_id cannot be empty"));
        }

        if self.upload.max_attempts == 0 || self.upload.max_attempts > 50 {
            return Err(invalid("max_attempts must be between 1 and 50"));
        }

        if self.upload.io_timeout_ms == 0 || self.upload.io_timeout_ms > 600_000 {
            return Err(invalid("io_timeout_ms must be between 1 and 600000"));
        }

        // Coordinator
        if self.coordinator.short_press_ms == 0 || self.coordinator.short_press_ms > 10_000 {
            return Err(invalid("short_press_ms must be between 1 and 10000"));
        }

        if self.coordinator.settle_delay_ms > 120_000 {
            return Err(invalid("settle_delay_ms must be at most 120000"));
        }

        if self.coordinator.join_timeout_ms == 0 {
            return Err(invalid("join_timeout_ms must be greater than 0"));
        }

        // The scanner must be able to finish one survey read before a join gives up on it
        if self.coordinator.join_timeout_ms < self.modem.response_timeout_ms {
            return Err(invalid("join_timeout_ms must be at least response_timeout_ms"));
        }

        // Store
        if self.store.path.is_empty() {
            return Err(invalid("store path cannot be empty"));
        }

        // Panel
        if self.panel.enabled && (self.panel.led_path.is_empty() || self.panel.button_device.is_empty()) {
            return Err(invalid("panel led_path and button_device cannot be empty when enabled"));
        }

        if self.panel.blink_interval_ms == 0 || self.panel.blink_interval_ms > 10_000 {
            return Err(invalid("blink_interval_ms must be between 1 and 10000"));
        }

        // Logging
        if !self.logging.log_dir.is_empty() && self.logging.file_prefix.is_empty() {
            return Err(invalid("logging file_prefix cannot be empty when log_dir is set"));
        }

        Ok(())
    }
}
