//! # Network Scanner
//!
//! Drives the modem through startup and then surveys nearby cells once per interval.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected -> Reset -> Identified -> NmeaEnabled -> SurveyLoop -> Stopped
//! ```
//!
//! Startup failures end the worker. Failures inside the survey loop are logged and
//! the next cycle runs as usual.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::inhibit::ModemInhibitor;
use super::link::RadioLink;
use super::survey::{parse_survey, SurveyReport, AT_NETWORK_SURVEY};
use crate::config::{ModemConfig, SurveyConfig};
use crate::error::Result;
use crate::event::{Event, EventSender};
use crate::serial::open_at_port;
use crate::serial::port_trait::LinePort;

/// Model identification command
pub const AT_IDENTIFY: &str = "AT+GMM";

/// Power up the GNSS receiver
pub const AT_GNSS_POWER: &str = "AT$GPSP=1";

/// Stream all NMEA sentences on the dedicated NMEA interface
pub const AT_NMEA_STREAM: &str = "AT$GPSNMUN=2,1,1,1,1,1,1";

/// Scanner progress through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Disconnected,
    Reset,
    Identified,
    NmeaEnabled,
    SurveyLoop,
    Stopped,
}

/// Survey worker bound to one AT link
pub struct NetworkScanner<P: LinePort> {
    link: RadioLink<P>,
    interval: Duration,
    state: ScannerState,
}

impl<P: LinePort> NetworkScanner<P> {
    pub fn new(link: RadioLink<P>, interval: Duration) -> Self {
        Self {
            link,
            interval,
            state: ScannerState::Disconnected,
        }
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Reset and identify the modem, then turn on the NMEA stream
    ///
    /// # Returns
    ///
    /// * `Result<String>` - Modem model as reported by `AT+GMM`
    pub async fn initialize(&mut self) -> Result<String> {
        self.link.reset().await?;
        self.state = ScannerState::Reset;

        let model = self.link.send(AT_IDENTIFY).await?.join(" ");
        info!("Connected to modem {}", model);
        self.state = ScannerState::Identified;

        debug!("Enabling unsolicited NMEA data...");
        // The receiver may already be powered, which some firmware reports as ERROR
        self.link.send_allow_error(AT_GNSS_POWER).await?;
        self.link.send(AT_NMEA_STREAM).await?;
        self.state = ScannerState::NmeaEnabled;

        Ok(model)
    }

    /// Run one survey command and decode its output
    pub async fn survey_once(&mut self) -> Result<SurveyReport> {
        debug!("Starting network scan");
        let lines = self.link.send(AT_NETWORK_SURVEY).await?;
        debug!("End of network scan, parsing {} lines", lines.len());
        Ok(parse_survey(&lines))
    }

    /// Survey until cancelled, publishing one `NetworkData` per completed cycle
    ///
    /// Cancellation is checked between cycles; a survey already on the wire is
    /// allowed to finish so the modem is not left mid-response.
    pub async fn survey_loop(&mut self, events: &EventSender, cancel: &CancellationToken) {
        self.state = ScannerState::SurveyLoop;

        while !cancel.is_cancelled() {
            match self.survey_once().await {
                Ok(report) => {
                    debug!(
                        "Survey found {} sites ({} lines skipped)",
                        report.sites.len(),
                        report.skipped.len()
                    );
                    if events.send(Event::NetworkData { sites: report.sites }).is_err() {
                        debug!("Event queue closed, ending survey loop");
                        break;
                    }
                }
                Err(e) => error!("Network scan failed: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state = ScannerState::Stopped;
        info!("Survey loop stopped");
    }
}

/// Own the modem for scanning until `cancel` fires
///
/// The ModemManager inhibition is taken before the AT port is opened and is
/// released on every exit path.
///
/// # Errors
///
/// Returns the startup failure (inhibit, port open, reset, identify, NMEA enable)
pub async fn run_scanner(
    modem: &ModemConfig,
    survey: &SurveyConfig,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Result<()> {
    while_inhibited(modem, async {
        debug!("Connecting to radio on {} to configure...", modem.at_port);
        let port = open_at_port(&modem.at_port, modem.baud_rate, modem.response_timeout())?;
        let mut scanner = NetworkScanner::new(RadioLink::new(port, modem.reset_delay()), survey.interval());
        scanner.initialize().await?;
        scanner.survey_loop(events, cancel).await;
        Ok(())
    })
    .await
}

/// Run `body` with ModemManager inhibited when the config asks for it
///
/// The inhibition is released however `body` finishes.
async fn while_inhibited<F>(modem: &ModemConfig, body: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let inhibitor = if modem.inhibit {
        Some(ModemInhibitor::acquire(&modem.mmcli_path, modem.modem_index).await?)
    } else {
        None
    };

    let result = body.await;

    if let Some(inhibitor) = inhibitor {
        inhibitor.release().await;
    }

    result
}

/// Scanner task body: run until cancelled and report a failed startup
pub async fn scanner_worker(
    modem: ModemConfig,
    survey: SurveyConfig,
    events: EventSender,
    cancel: CancellationToken,
) {
    if let Err(e) = run_scanner(&modem, &survey, &events, &cancel).await {
        error!("Network scanner failed to start: {}", e);
        let _ = events.send(Event::ScannerFailed { reason: e.to_string() });
    }
}
