//! # Front Panel
//!
//! One status LED and one control button.
//!
//! - The LED is a Linux LED-class device driven through its `brightness` file.
//! - The button is a gpio-keys input device read with evdev.

use std::path::{Path, PathBuf};
use std::time::Duration;

use evdev::{Device, InputEventKind};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::error::Result;
use crate::event::{Event, EventSender};

/// Status LED state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndicatorMode {
    #[default]
    Off,
    On,
    Blink,
}

/// Where the coordinator reports its state to the operator
#[cfg_attr(test, mockall::automock)]
pub trait Indicator: Send + Sync {
    fn set_mode(&self, mode: IndicatorMode);
}

/// Indicator backed by a watch channel that the LED task follows
pub struct LedIndicator {
    tx: watch::Sender<IndicatorMode>,
}

impl LedIndicator {
    pub fn new() -> (Self, watch::Receiver<IndicatorMode>) {
        let (tx, rx) = watch::channel(IndicatorMode::Off);
        (Self { tx }, rx)
    }

    pub fn mode(&self) -> IndicatorMode {
        *self.tx.borrow()
    }
}

impl Indicator for LedIndicator {
    fn set_mode(&self, mode: IndicatorMode) {
        // Kept even with no LED task listening
        self.tx.send_replace(mode);
    }
}

async fn write_brightness(path: &Path, lit: bool) -> Result<()> {
    tokio::fs::write(path, if lit { "1" } else { "0" }).await?;
    Ok(())
}

/// LED task body: mirror the indicator mode onto the brightness file
///
/// In `Blink` the LED toggles once per `blink_interval`. The LED is switched
/// off when the task ends.
pub async fn led_worker(
    path: PathBuf,
    mut modes: watch::Receiver<IndicatorMode>,
    blink_interval: Duration,
    cancel: CancellationToken,
) {
    debug!("Driving status LED at {}", path.display());
    let mut lit: Option<bool> = None;

    loop {
        let mode = *modes.borrow_and_update();
        let target = match mode {
            IndicatorMode::Off => false,
            IndicatorMode::On => true,
            IndicatorMode::Blink => !lit.unwrap_or(false),
        };

        if lit != Some(target) {
            if let Err(e) = write_brightness(&path, target).await {
                warn!("Failed to set LED {}: {}", path.display(), e);
            }
            lit = Some(target);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = modes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(blink_interval), if mode == IndicatorMode::Blink => {}
        }
    }

    if let Err(e) = write_brightness(&path, false).await {
        warn!("Failed to switch off LED {}: {}", path.display(), e);
    }
}

/// Turns key down/up transitions into press durations
#[derive(Debug, Default)]
pub struct PressTracker {
    pressed_at: Option<Instant>,
}

impl PressTracker {
    /// Feed one key event value (1 down, 0 up, 2 autorepeat)
    ///
    /// # Returns
    ///
    /// * `Some(duration)` - On release of a press that was seen going down
    pub fn on_key(&mut self, value: i32, now: Instant) -> Option<Duration> {
        match value {
            1 => {
                self.pressed_at.get_or_insert(now);
                None
            }
            0 => self.pressed_at.take().map(|down| now.saturating_duration_since(down)),
            _ => None,
        }
    }
}

/// Button task body: report each completed press as a `ControlEvent`
pub async fn button_worker(config: PanelConfig, events: EventSender, cancel: CancellationToken) {
    if let Err(e) = read_button(&config, &events, &cancel).await {
        warn!("Control button unavailable: {}", e);
    }
}

async fn read_button(config: &PanelConfig, events: &EventSender, cancel: &CancellationToken) -> Result<()> {
    let device = Device::open(&config.button_device)?;
    info!(
        "Control button on {} ({})",
        config.button_device,
        device.name().unwrap_or("unnamed")
    );

    let mut stream = device.into_event_stream()?;
    let mut tracker = PressTracker::default();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = stream.next_event() => event?,
        };

        if let InputEventKind::Key(key) = event.kind() {
            if key.code() != config.button_key_code {
                continue;
            }
            if let Some(press_duration) = tracker.on_key(event.value(), Instant::now()) {
                debug!("Button held for {:?}", press_duration);
                if events.send(Event::ControlEvent { press_duration }).is_err() {
                    return Ok(());
                }
            }
        }
    }
}
