//! # Coordinator
//!
//! Top-level event loop. It is the only place that decides who owns the radio:
//!
//! ```text
//!          start                 short press                  UploadComplete
//!   Idle ---------> Scanning ---------------------> Uploading ---------------> Scanning
//!                      |   stop+join scanner, settle            settle, restart scanner
//!                      |
//!                      +-- ScannerFailed --> Idle (a short press still uploads)
//! ```
//!
//! Mode and the latest position are only touched from the loop task.

pub mod worker;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bearer::command::CommandRunner;
use crate::bearer::BearerManager;
use crate::config::{
    BearerConfig, Config, CoordinatorConfig, ModemConfig, SurveyConfig, UploadConfig,
};
use crate::event::{Event, EventReceiver, EventSender, Position, Site, UploadOutcome};
use crate::panel::{Indicator, IndicatorMode};
use crate::radio::scanner::scanner_worker;
use crate::store::{NewObservation, RecordStore};
use crate::upload::{uploader_worker, Uploader};

pub use worker::WorkerHandle;

/// Who currently owns the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Scanning,
    Uploading,
}

/// Spawns the two workers that take turns on the radio
pub trait RadioWorkers: Send + Sync {
    fn spawn_scanner(&self, events: EventSender) -> WorkerHandle;
    fn spawn_uploader(&self, events: EventSender) -> WorkerHandle;
}

/// Workers that drive the real modem
pub struct SystemWorkers {
    modem: ModemConfig,
    survey: SurveyConfig,
    bearer: BearerConfig,
    upload: UploadConfig,
    store: Arc<dyn RecordStore>,
    runner: Arc<dyn CommandRunner>,
}

impl SystemWorkers {
    pub fn new(config: &Config, store: Arc<dyn RecordStore>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            modem: config.modem.clone(),
            survey: config.survey.clone(),
            bearer: config.bearer.clone(),
            upload: config.upload.clone(),
            store,
            runner,
        }
    }
}

impl RadioWorkers for SystemWorkers {
    fn spawn_scanner(&self, events: EventSender) -> WorkerHandle {
        let modem = self.modem.clone();
        let survey = self.survey.clone();
        WorkerHandle::spawn("scanner", move |cancel| scanner_worker(modem, survey, events, cancel))
    }

    fn spawn_uploader(&self, events: EventSender) -> WorkerHandle {
        let bearer = BearerManager::new(
            self.runner.clone(),
            self.modem.clone(),
            self.bearer.clone(),
            self.upload.target,
        );
        let uploader = Uploader::new(Arc::new(bearer), self.store.clone(), &self.upload);
        WorkerHandle::spawn("uploader", move |cancel| uploader_worker(uploader, events, cancel))
    }
}

pub struct Coordinator<W: RadioWorkers> {
    workers: W,
    store: Arc<dyn RecordStore>,
    indicator: Arc<dyn Indicator>,
    config: CoordinatorConfig,
    events_tx: EventSender,
    events_rx: EventReceiver,
    mode: Mode,
    position: Option<Position>,
    scanner: Option<WorkerHandle>,
    uploader: Option<WorkerHandle>,
}

impl<W: RadioWorkers> Coordinator<W> {
    pub fn new(
        workers: W,
        store: Arc<dyn RecordStore>,
        indicator: Arc<dyn Indicator>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events_tx, events_rx) = crate::event::channel();
        Self {
            workers,
            store,
            indicator,
            config,
            events_tx,
            events_rx,
            mode: Mode::Idle,
            position: None,
            scanner: None,
            uploader: None,
        }
    }

    /// Producer handle for the GNSS listener, button and other event sources
    pub fn sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Start scanning, then consume events until `shutdown` fires
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Coordinator starting");
        self.start_scanner();

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                event = self.events_rx.recv() => event,
            };

            match event {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }

        self.shutdown().await;
    }

    /// Apply one event to coordinator state
    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::LocationFix(position) => {
                debug!("Location fix {:.5},{:.5} alt {}", position.lat, position.lon, position.alt);
                self.position = Some(position);
            }
            Event::NetworkData { sites } => self.record_sites(sites).await,
            Event::ControlEvent { press_duration } => {
                if press_duration >= self.config.short_press() {
                    debug!("Ignoring long press ({:?})", press_duration);
                } else if self.mode == Mode::Uploading {
                    info!("Upload already running, ignoring button");
                } else {
                    self.trigger_upload().await;
                }
            }
            Event::UploadComplete { outcome } => self.finish_upload(outcome).await,
            Event::ScannerFailed { reason } => {
                if self.mode != Mode::Scanning {
                    debug!("Stale scanner failure ignored: {}", reason);
                    return;
                }
                error!("Scanner stopped: {}", reason);
                if let Some(scanner) = self.scanner.take() {
                    scanner.stop(self.config.join_timeout()).await;
                }
                self.mode = Mode::Idle;
                self.indicator.set_mode(IndicatorMode::Off);
            }
        }
    }

    async fn record_sites(&mut self, sites: Vec<Site>) {
        // Observations are only meaningful with a location
        let Some(position) = self.position else {
            debug!("No location yet, dropping {} sites", sites.len());
            return;
        };

        if self.mode != Mode::Uploading {
            self.indicator.set_mode(IndicatorMode::On);
        }

        let observations: Vec<NewObservation> = sites
            .into_iter()
            .map(|site| NewObservation::now(site, position))
            .collect();
        let count = observations.len();

        match self.store.insert_batch(observations).await {
            Ok(_) => debug!("Stored {} observations", count),
            Err(e) => error!("Failed to store observations: {}", e),
        }
    }

    /// Hand the radio from the scanner to a new uploader
    pub async fn trigger_upload(&mut self) {
        info!("Starting upload");
        self.indicator.set_mode(IndicatorMode::Blink);

        if let Some(scanner) = self.scanner.take() {
            info!("Stopping network scanner for upload");
            scanner.stop(self.config.join_timeout()).await;
        }

        // Let ModemManager pick the modem back up
        tokio::time::sleep(self.config.settle_delay()).await;

        self.uploader = Some(self.workers.spawn_uploader(self.events_tx.clone()));
        self.mode = Mode::Uploading;
    }

    async fn finish_upload(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded(count) => info!("Upload complete, {} observations sent", count),
            UploadOutcome::NothingToSend => info!("Upload complete, nothing to send"),
            UploadOutcome::Failed => warn!("Upload failed, observations kept for next time"),
        }

        if let Some(uploader) = self.uploader.take() {
            uploader.stop(self.config.join_timeout()).await;
        }

        // The vehicle may have moved a long way while uploading
        self.position = None;
        self.indicator.set_mode(IndicatorMode::Off);

        tokio::time::sleep(self.config.settle_delay()).await;
        self.start_scanner();
    }

    fn start_scanner(&mut self) {
        info!("Starting network scanner");
        self.scanner = Some(self.workers.spawn_scanner(self.events_tx.clone()));
        self.mode = Mode::Scanning;
    }

    async fn shutdown(&mut self) {
        info!("Coordinator shutting down");
        let join_timeout = self.config.join_timeout();

        if let Some(scanner) = self.scanner.take() {
            scanner.stop(join_timeout).await;
        }
        if let Some(uploader) = self.uploader.take() {
            uploader.stop(join_timeout).await;
        }

        self.mode = Mode::Idle;
        self.indicator.set_mode(IndicatorMode::Off);
    }
}
