pub mod desktop;
pub mod mobile;
pub mod null;
pub mod web;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ApplicationKind, ApplicationSpec, Scalar, Settings};
use crate::errors::DriverError;

/// The capability set every driver satisfies, §4.3. Dispatch never matches
/// on a driver's concrete type — only this trait is visible past
/// `platform::factory`.
#[async_trait]
pub trait Driver: Send {
    async fn initialize(&mut self, app: &ApplicationSpec) -> Result<(), DriverError>;

    async fn navigate(&mut self, target: &str) -> Result<(), DriverError>;

    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;

    async fn submit(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Cancellable sleep; returns `DriverError::Cancelled` if `token` fires
    /// before `seconds` elapses.
    async fn wait(&mut self, seconds: u64, token: &CancellationToken) -> Result<(), DriverError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError>;

    async fn start_recording(&mut self, path: &Path) -> Result<(), DriverError>;

    /// Idempotent w.r.t. double-stop: a stop with no matching start
    /// returns `DriverError::NotRecording`, never panics.
    async fn stop_recording(&mut self) -> Result<(), DriverError>;

    fn get_metrics(&self) -> HashMap<String, Scalar>;

    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Single dispatch point from an `ApplicationSpec::kind` to a concrete
/// driver, keeping callers ignorant of the three driver types.
pub fn factory(kind: ApplicationKind, settings: &Settings) -> Box<dyn Driver> {
    match kind {
        ApplicationKind::Web => Box::new(web::WebDriver::new(settings.clone())),
        ApplicationKind::Desktop => Box::new(desktop::DesktopDriver::new(settings.clone())),
        ApplicationKind::Mobile => Box::new(mobile::MobileDriver::new(settings.clone())),
    }
}

/// Shared cancellable-sleep helper all three drivers use for `wait`/
/// recording-duration bookkeeping.
pub(crate) async fn cancellable_sleep(
    seconds: u64,
    token: &CancellationToken,
) -> Result<(), DriverError> {
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(seconds)) => Ok(()),
        _ = token.cancelled() => Err(DriverError::Cancelled),
    }
}

/// Tracks a driver's recording lifecycle without committing a driver to any
/// particular subprocess/handle representation; every driver embeds one.
pub(crate) struct RecordingState {
    pub active: bool,
    pub started_at: Option<std::time::Instant>,
    pub is_placeholder: bool,
}

impl RecordingState {
    pub fn new() -> Self {
        RecordingState {
            active: false,
            started_at: None,
            is_placeholder: false,
        }
    }

    pub fn start(&mut self, is_placeholder: bool) {
        self.active = true;
        self.started_at = Some(std::time::Instant::now());
        self.is_placeholder = is_placeholder;
    }

    /// Returns the elapsed duration and clears the active flag; `None` if
    /// no recording was in progress.
    pub fn stop(&mut self) -> Option<std::time::Duration> {
        if !self.active {
            return None;
        }
        self.active = false;
        self.started_at.map(|t| t.elapsed())
    }
}
