use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::{ApplicationSpec, Scalar, Settings};
use crate::errors::DriverError;
use crate::platform::{cancellable_sleep, Driver, RecordingState};

const LINUX_SCREENSHOT_TOOLS: &[&str] = &["scrot", "import", "gnome-screenshot"];

pub struct DesktopDriver {
    settings: Settings,
    app_path: Option<PathBuf>,
    recorder: Option<Child>,
    recording: RecordingState,
    counters: HashMap<String, u64>,
}

impl DesktopDriver {
    pub fn new(settings: Settings) -> Self {
        DesktopDriver {
            settings,
            app_path: None,
            recorder: None,
            recording: RecordingState::new(),
            counters: HashMap::new(),
        }
    }

    fn bump(&mut self, counter: &str) {
        *self.counters.entry(counter.to_string()).or_insert(0) += 1;
    }

    fn screenshot_tool() -> Option<&'static str> {
        if cfg!(target_os = "macos") {
            return which::which("screencapture").ok().map(|_| "screencapture");
        }
        LINUX_SCREENSHOT_TOOLS
            .iter()
            .find(|tool| which::which(tool).is_ok())
            .copied()
    }

    fn scripting_tool() -> Option<&'static str> {
        if cfg!(target_os = "macos") {
            return which::which("osascript").ok().map(|_| "osascript");
        }
        which::which("xdotool").ok().map(|_| "xdotool")
    }

    async fn log_placeholder(&self, action: &str) {
        debug!("ui action placeholder recorded for '{action}' (no scripting facility on host)");
    }
}

#[async_trait]
impl Driver for DesktopDriver {
    async fn initialize(&mut self, app: &ApplicationSpec) -> Result<(), DriverError> {
        if let Some(path) = &app.path {
            if !path.exists() {
                return Err(DriverError::Unavailable {
                    reason: format!("application path does not exist: {}", path.display()),
                });
            }
            self.app_path = Some(path.clone());
        }
        Ok(())
    }

    async fn navigate(&mut self, _target: &str) -> Result<(), DriverError> {
        // Desktop targets have no address bar; navigation is a no-op focus
        // request per §4.3.
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        match Self::scripting_tool() {
            None => {
                self.log_placeholder("click").await;
                Err(DriverError::CapabilityUnavailable {
                    capability: "click".to_string(),
                })
            }
            Some(tool) => {
                let status = Command::new(tool).arg(selector).status().await;
                self.bump("clicks");
                match status {
                    Ok(s) if s.success() => Ok(()),
                    _ => Err(DriverError::ElementUnactionable {
                        selector: selector.to_string(),
                    }),
                }
            }
        }
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        match Self::scripting_tool() {
            None => {
                self.log_placeholder("fill").await;
                Err(DriverError::CapabilityUnavailable {
                    capability: "fill".to_string(),
                })
            }
            Some(tool) => {
                let status = Command::new(tool).arg(selector).arg(value).status().await;
                self.bump("fills");
                match status {
                    Ok(s) if s.success() => Ok(()),
                    _ => Err(DriverError::ElementUnactionable {
                        selector: selector.to_string(),
                    }),
                }
            }
        }
    }

    async fn submit(&mut self, _selector: &str) -> Result<(), DriverError> {
        match Self::scripting_tool() {
            None => {
                self.log_placeholder("submit").await;
                Err(DriverError::CapabilityUnavailable {
                    capability: "submit".to_string(),
                })
            }
            Some(_) => {
                self.bump("submits");
                Ok(())
            }
        }
    }

    async fn wait(&mut self, seconds: u64, token: &CancellationToken) -> Result<(), DriverError> {
        cancellable_sleep(seconds, token).await
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        let tool = Self::screenshot_tool().ok_or(DriverError::CapabilityUnavailable {
            capability: "screenshot".to_string(),
        })?;

        let tmp_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(tmp_dir).map_err(DriverError::Io)?;

        let status = if tool == "screencapture" {
            Command::new(tool).arg("-x").arg(tmp.path()).status().await
        } else {
            Command::new(tool).arg(tmp.path()).status().await
        };

        match status {
            Ok(s) if s.success() => {
                tmp.persist(path)
                    .map_err(|error| DriverError::Io(error.error))?;
                self.bump("screenshots");
                Ok(())
            }
            _ => Err(DriverError::CapabilityUnavailable {
                capability: "screenshot".to_string(),
            }),
        }
    }

    async fn start_recording(&mut self, path: &Path) -> Result<(), DriverError> {
        let recorder = if cfg!(target_os = "macos") {
            which::which("screencapture").ok()
        } else {
            which::which("ffmpeg").ok()
        };

        match recorder {
            Some(_) if cfg!(target_os = "macos") => {
                let child = Command::new("screencapture")
                    .arg("-v")
                    .arg(path)
                    .spawn()
                    .map_err(DriverError::Io)?;
                self.recorder = Some(child);
                self.recording.start(false);
                Ok(())
            }
            _ => {
                let marker = format!(
                    "PANOPTIC-PLACEHOLDER-RECORDING\nstarted_at={:?}\n",
                    std::time::SystemTime::now()
                );
                tokio::fs::write(path, marker.as_bytes())
                    .await
                    .map_err(DriverError::Io)?;
                self.recording.start(true);
                Ok(())
            }
        }
    }

    async fn stop_recording(&mut self) -> Result<(), DriverError> {
        let duration = self.recording.stop().ok_or(DriverError::NotRecording)?;

        if let Some(mut child) = self.recorder.take() {
            let _ = child.start_kill();
            let timeout = std::time::Duration::from_secs(self.settings.recording_stop_timeout);
            if tokio::time::timeout(timeout, child.wait()).await.is_err() {
                warn!("native recorder did not exit within the shutdown grace period");
            }
        }

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
        if let Some(mut child) = self.recorder.take() {
            let _ = child.start_kill();
        }
        Ok(())
    }
}
