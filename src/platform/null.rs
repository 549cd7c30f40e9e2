use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ApplicationSpec, Scalar, Settings};
use crate::errors::DriverError;
use crate::platform::{cancellable_sleep, Driver, RecordingState};

/// Deterministic test double satisfying the full `Driver` contract without
/// touching a real browser, OS, or device. Every capability succeeds
/// unless explicitly configured to fail via `fail_selectors`/`unknown`, so
/// tests can exercise both the happy path and §8's non-fatal failure
/// scenarios (S2, S3) without any external dependency.
pub struct NullDriver {
    initialized: bool,
    closed: bool,
    recording: RecordingState,
    counters: HashMap<String, u64>,
    fail_selectors: Vec<String>,
}

impl NullDriver {
    pub fn new(_settings: Settings) -> Self {
        NullDriver {
            initialized: false,
            closed: false,
            recording: RecordingState::new(),
            counters: HashMap::new(),
            fail_selectors: Vec::new(),
        }
    }

    pub fn with_failing_selectors(mut self, selectors: Vec<String>) -> Self {
        self.fail_selectors = selectors;
        self
    }

    fn bump(&mut self, counter: &str) {
        *self.counters.entry(counter.to_string()).or_insert(0) += 1;
    }

    fn require_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::Unavailable {
                reason: "driver already closed".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Driver for NullDriver {
    async fn initialize(&mut self, _app: &ApplicationSpec) -> Result<(), DriverError> {
        self.initialized = true;
        Ok(())
    }

    async fn navigate(&mut self, _target: &str) -> Result<(), DriverError> {
        self.require_open()?;
        self.bump("navigations");
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        self.require_open()?;
        if self.fail_selectors.iter().any(|s| s == selector) {
            return Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            });
        }
        self.bump("clicks");
        Ok(())
    }

    async fn fill(&mut self, selector: &str, _value: &str) -> Result<(), DriverError> {
        self.require_open()?;
        if self.fail_selectors.iter().any(|s| s == selector) {
            return Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            });
        }
        self.bump("fills");
        Ok(())
    }

    async fn submit(&mut self, selector: &str) -> Result<(), DriverError> {
        self.require_open()?;
        if self.fail_selectors.iter().any(|s| s == selector) {
            return Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            });
        }
        self.bump("submits");
        Ok(())
    }

    async fn wait(&mut self, seconds: u64, token: &CancellationToken) -> Result<(), DriverError> {
        self.require_open()?;
        cancellable_sleep(seconds, token).await
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        self.require_open()?;
        tokio::fs::write(path, b"NULLDRIVER-SCREENSHOT")
            .await
            .map_err(DriverError::Io)?;
        self.bump("screenshots");
        Ok(())
    }

    async fn start_recording(&mut self, path: &Path) -> Result<(), DriverError> {
        self.require_open()?;
        tokio::fs::write(path, b"NULLDRIVER-RECORDING")
            .await
            .map_err(DriverError::Io)?;
        self.recording.start(true);
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<(), DriverError> {
        let duration = self.recording.stop().ok_or(DriverError::NotRecording)?;
        self.counters
            .insert("recording_duration_ms".to_string(), duration.as_millis() as u64);
        Ok(())
    }

    fn get_metrics(&self) -> HashMap<String, Scalar> {
        let mut out: HashMap<String, Scalar> = self
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), Scalar::from(*v as i64)))
            .collect();
        out.insert(
            "recording_is_placeholder".to_string(),
            Scalar::from(self.recording.is_placeholder),
        );
        out
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_after_close_return_typed_error_not_panic() {
        let mut driver = NullDriver::new(Settings::default());
        driver.close().await.unwrap();
        let err = driver.navigate("x").await.unwrap_err();
        match err {
            DriverError::Unavailable { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn double_stop_recording_is_typed_not_a_panic() {
        let mut driver = NullDriver::new(Settings::default());
        let err = driver.stop_recording().await.unwrap_err();
        match err {
            DriverError::NotRecording => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn configured_selector_fails_others_succeed() {
        let mut driver =
            NullDriver::new(Settings::default()).with_failing_selectors(vec!["#missing".to_string()]);
        assert!(driver.click("#missing").await.is_err());
        assert!(driver.click("#present").await.is_ok());
    }
}
