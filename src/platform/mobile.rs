use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{ApplicationSpec, MobilePlatform, Scalar, Settings};
use crate::errors::DriverError;
use crate::platform::{cancellable_sleep, Driver, RecordingState};

pub struct MobileDriver {
    settings: Settings,
    platform: Option<MobilePlatform>,
    device: Option<String>,
    recording: RecordingState,
    counters: HashMap<String, u64>,
}

impl MobileDriver {
    pub fn new(settings: Settings) -> Self {
        MobileDriver {
            settings,
            platform: None,
            device: None,
            recording: RecordingState::new(),
            counters: HashMap::new(),
        }
    }

    fn bump(&mut self, counter: &str) {
        *self.counters.entry(counter.to_string()).or_insert(0) += 1;
    }

    fn bridge_tool(platform: MobilePlatform) -> &'static str {
        match platform {
            MobilePlatform::Android => "adb",
            MobilePlatform::Ios => "xcrun",
        }
    }

    async fn enumerate_devices(platform: MobilePlatform) -> Result<Vec<String>, DriverError> {
        let output = match platform {
            MobilePlatform::Android => Command::new("adb").arg("devices").arg("-l").output().await,
            MobilePlatform::Ios => {
                Command::new("xcrun")
                    .arg("simctl")
                    .arg("list")
                    .arg("devices")
                    .output()
                    .await
            }
        }
        .map_err(DriverError::Io)?;

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(|l| l.to_string()).collect())
    }

    /// Resolves `"center"` to device-pixel coordinates, or parses
    /// `"x,y"` directly, per §4.6.
    async fn resolve_point(&self, selector: &str) -> Result<(i64, i64), DriverError> {
        if selector == "center" {
            let (w, h) = self.screen_size().await?;
            return Ok((w / 2, h / 2));
        }

        let mut parts = selector.splitn(2, ',');
        let x = parts.next().and_then(|p| p.trim().parse::<i64>().ok());
        let y = parts.next().and_then(|p| p.trim().parse::<i64>().ok());
        match (x, y) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            }),
        }
    }

    async fn screen_size(&self) -> Result<(i64, i64), DriverError> {
        match self.platform {
            Some(MobilePlatform::Android) => {
                let output = Command::new("adb")
                    .arg("shell")
                    .arg("wm")
                    .arg("size")
                    .output()
                    .await
                    .map_err(DriverError::Io)?;
                let text = String::from_utf8_lossy(&output.stdout);
                parse_wm_size(&text).ok_or(DriverError::CapabilityUnavailable {
                    capability: "screen size".to_string(),
                })
            }
            Some(MobilePlatform::Ios) => {
                // The simulator reports device points, not pixels; §4.6
                // only requires a usable midpoint, so a fixed reference
                // resolution stands in absent a live scale query.
                Ok((390, 844))
            }
            None => Err(DriverError::Unavailable {
                reason: "driver not initialized".to_string(),
            }),
        }
    }
}

fn parse_wm_size(text: &str) -> Option<(i64, i64)> {
    // "Physical size: 1080x2400"
    let dims = text.split(':').nth(1)?.trim();
    let mut parts = dims.split('x');
    let w = parts.next()?.trim().parse::<i64>().ok()?;
    let h = parts.next()?.trim().parse::<i64>().ok()?;
    Some((w, h))
}

#[async_trait]
impl Driver for MobileDriver {
    async fn initialize(&mut self, app: &ApplicationSpec) -> Result<(), DriverError> {
        let platform = app.mobile_platform.ok_or(DriverError::Unavailable {
            reason: "application has no mobile_platform".to_string(),
        })?;

        let tool = Self::bridge_tool(platform);
        which::which(tool).map_err(|_| DriverError::Unavailable {
            reason: format!("required tool '{tool}' not found on PATH"),
        })?;

        let devices = Self::enumerate_devices(platform).await?;
        debug!("enumerated {} mobile device line(s)", devices.len());

        if let Some(wanted) = &app.device {
            if !devices.iter().any(|d| d.contains(wanted.as_str())) {
                return Err(DriverError::Unavailable {
                    reason: format!("device '{wanted}' not connected or emulator not running"),
                });
            }
            self.device = Some(wanted.clone());
        }

        self.platform = Some(platform);
        Ok(())
    }

    async fn navigate(&mut self, target: &str) -> Result<(), DriverError> {
        let platform = self.platform.ok_or(DriverError::Unavailable {
            reason: "driver not initialized".to_string(),
        })?;
        let status = match platform {
            MobilePlatform::Android => {
                Command::new("adb")
                    .arg("shell")
                    .arg("am")
                    .arg("start")
                    .arg("-a")
                    .arg("android.intent.action.VIEW")
                    .arg("-d")
                    .arg(target)
                    .status()
                    .await
            }
            MobilePlatform::Ios => {
                Command::new("xcrun")
                    .arg("simctl")
                    .arg("openurl")
                    .arg("booted")
                    .arg(target)
                    .status()
                    .await
            }
        }
        .map_err(DriverError::Io)?;

        self.bump("navigations");
        if status.success() {
            Ok(())
        } else {
            Err(DriverError::Unavailable {
                reason: format!("failed to launch target '{target}'"),
            })
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let (x, y) = self.resolve_point(selector).await?;
        let platform = self.platform.ok_or(DriverError::Unavailable {
            reason: "driver not initialized".to_string(),
        })?;
        let status = match platform {
            MobilePlatform::Android => {
                Command::new("adb")
                    .arg("shell")
                    .arg("input")
                    .arg("tap")
                    .arg(x.to_string())
                    .arg(y.to_string())
                    .status()
                    .await
            }
            MobilePlatform::Ios => {
                Command::new("xcrun")
                    .arg("simctl")
                    .arg("io")
                    .arg("booted")
                    .arg("tap")
                    .arg(x.to_string())
                    .arg(y.to_string())
                    .status()
                    .await
            }
        }
        .map_err(DriverError::Io)?;

        self.bump("clicks");
        if status.success() {
            Ok(())
        } else {
            Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            })
        }
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.click(selector).await?;
        let status = match self.platform {
            Some(MobilePlatform::Android) => {
                Command::new("adb")
                    .arg("shell")
                    .arg("input")
                    .arg("text")
                    .arg(value)
                    .status()
                    .await
            }
            _ => {
                return Err(DriverError::CapabilityUnavailable {
                    capability: "fill".to_string(),
                })
            }
        }
        .map_err(DriverError::Io)?;

        self.bump("fills");
        if status.success() {
            Ok(())
        } else {
            Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            })
        }
    }

    async fn submit(&mut self, selector: &str) -> Result<(), DriverError> {
        self.bump("submits");
        self.click(selector).await
    }

    async fn wait(&mut self, seconds: u64, token: &CancellationToken) -> Result<(), DriverError> {
        cancellable_sleep(seconds, token).await
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        let platform = self.platform.ok_or(DriverError::Unavailable {
            reason: "driver not initialized".to_string(),
        })?;

        match platform {
            MobilePlatform::Android => {
                let remote = "/sdcard/panoptic-screencap.png";
                let capture = Command::new("adb")
                    .arg("shell")
                    .arg("screencap")
                    .arg("-p")
                    .arg(remote)
                    .status()
                    .await
                    .map_err(DriverError::Io)?;
                if !capture.success() {
                    return Err(DriverError::CapabilityUnavailable {
                        capability: "screenshot".to_string(),
                    });
                }
                let pull = Command::new("adb")
                    .arg("pull")
                    .arg(remote)
                    .arg(path)
                    .status()
                    .await
                    .map_err(DriverError::Io)?;
                if !pull.success() {
                    return Err(DriverError::CapabilityUnavailable {
                        capability: "screenshot".to_string(),
                    });
                }
            }
            MobilePlatform::Ios => {
                let status = Command::new("xcrun")
                    .arg("simctl")
                    .arg("io")
                    .arg("booted")
                    .arg("screenshot")
                    .arg(path)
                    .status()
                    .await
                    .map_err(DriverError::Io)?;
                if !status.success() {
                    return Err(DriverError::CapabilityUnavailable {
                        capability: "screenshot".to_string(),
                    });
                }
            }
        }

        self.bump("screenshots");
        Ok(())
    }

    async fn start_recording(&mut self, path: &Path) -> Result<(), DriverError> {
        match self.platform {
            Some(MobilePlatform::Android) => {
                // screenrecord writes to the device, not a host path we
                // can hand back synchronously; treat as placeholder until
                // a pull-on-stop pipeline is wired in.
                debug!("android recording requested; falling back to placeholder container");
            }
            _ => {}
        }
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
        warn!("mobile driver closed; bridge connections are process-external and not torn down here");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wm_size_output() {
        let text = "Physical size: 1080x2400\n";
        assert_eq!(parse_wm_size(text), Some((1080, 2400)));
    }

    #[test]
    fn parses_wm_size_rejects_malformed() {
        assert_eq!(parse_wm_size("garbage"), None);
    }
}
