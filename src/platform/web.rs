use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ApplicationSpec, Scalar, Settings};
use crate::errors::DriverError;
use crate::platform::{cancellable_sleep, Driver, RecordingState};

/// CDP-backed driver, §4.4. `chromiumoxide::Browser` owns the child
/// process; `handler_task` keeps its event loop polled for the lifetime of
/// the driver.
pub struct WebDriver {
    settings: Settings,
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    page: Option<Page>,
    recording: RecordingState,
    metrics: HashMap<String, u64>,
}

impl WebDriver {
    pub fn new(settings: Settings) -> Self {
        WebDriver {
            settings,
            browser: None,
            handler_task: None,
            page: None,
            recording: RecordingState::new(),
            metrics: HashMap::new(),
        }
    }

    fn bump(&mut self, counter: &str) {
        *self.metrics.entry(counter.to_string()).or_insert(0) += 1;
    }

    fn page(&self) -> Result<&Page, DriverError> {
        self.page.as_ref().ok_or(DriverError::Unavailable {
            reason: "driver not initialized".to_string(),
        })
    }
}

#[async_trait]
impl Driver for WebDriver {
    async fn initialize(&mut self, _app: &ApplicationSpec) -> Result<(), DriverError> {
        let (width, height) = self.settings.window_size;
        let config = BrowserConfig::builder()
            .window_size(width, height)
            .request_timeout(std::time::Duration::from_secs(self.settings.navigation_timeout));
        let config = if self.settings.headless {
            config
        } else {
            config.with_head()
        };
        let config = config.build().map_err(|error| DriverError::Unavailable {
            reason: format!("invalid browser configuration: {error}"),
        })?;

        let (browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|error| DriverError::Unavailable {
                    reason: format!("could not launch browser: {error}"),
                })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    debug!("chromiumoxide handler event error: {error}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|error| DriverError::Unavailable {
                reason: format!("could not open blank page: {error}"),
            })?;

        self.browser = Some(browser);
        self.handler_task = Some(handler_task);
        self.page = Some(page);
        Ok(())
    }

    async fn navigate(&mut self, target: &str) -> Result<(), DriverError> {
        let timeout = std::time::Duration::from_secs(self.settings.navigation_timeout);
        let page = self.page()?.clone();
        let result = tokio::time::timeout(timeout, async {
            page.goto(target).await?;
            page.wait_for_navigation().await
        })
        .await;

        self.bump("navigations");
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(DriverError::Unavailable {
                reason: format!("navigation failed: {error}"),
            }),
            Err(_) => Err(DriverError::NavigationTimeout {
                target: target.to_string(),
                timeout_secs: self.settings.navigation_timeout,
            }),
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let timeout = std::time::Duration::from_secs(self.settings.element_timeout);
        let page = self.page()?.clone();
        let selector = selector.to_string();

        let primary = tokio::time::timeout(timeout, async {
            let element = page.find_element(&selector).await?;
            element.scroll_into_view().await?;
            element.click().await
        })
        .await;

        if matches!(primary, Ok(Ok(_))) {
            self.bump("clicks");
            return Ok(());
        }

        // Tap fallback: dispatches a JS-level click, which reaches elements
        // a native pointer click can't (covered by an overlay, zero-size
        // hit target, etc.) before giving up as unactionable.
        debug!("primary click on '{selector}' failed, attempting tap fallback");
        let tap = tokio::time::timeout(timeout, async {
            let element = page.find_element(&selector).await?;
            element
                .call_js_fn("function() { this.click(); }", true)
                .await
        })
        .await;

        self.bump("clicks");
        match tap {
            Ok(Ok(_)) => Ok(()),
            _ => Err(DriverError::ElementUnactionable { selector }),
        }
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        let timeout = std::time::Duration::from_secs(self.settings.element_timeout);
        let page = self.page()?.clone();
        let selector_owned = selector.to_string();
        let value_owned = value.to_string();
        let result = tokio::time::timeout(timeout, async {
            let element = page.find_element(&selector_owned).await?;
            element.click().await?;
            element.call_js_fn("function() { this.value = ''; }", false).await?;
            element.type_str(&value_owned).await
        })
        .await;

        self.bump("fills");
        match result {
            Ok(Ok(_)) => Ok(()),
            _ => Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            }),
        }
    }

    async fn submit(&mut self, selector: &str) -> Result<(), DriverError> {
        let timeout = std::time::Duration::from_secs(self.settings.element_timeout);
        let page = self.page()?.clone();
        let selector_owned = selector.to_string();
        let result = tokio::time::timeout(timeout, async {
            let element = page.find_element(&selector_owned).await?;
            element.press_key("Enter").await
        })
        .await;

        self.bump("submits");
        match result {
            Ok(Ok(_)) => Ok(()),
            _ => Err(DriverError::ElementUnactionable {
                selector: selector.to_string(),
            }),
        }
    }

    async fn wait(&mut self, seconds: u64, token: &CancellationToken) -> Result<(), DriverError> {
        cancellable_sleep(seconds, token).await
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        let page = self.page()?;
        let bytes = page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|error| DriverError::Unavailable {
                reason: format!("screenshot failed: {error}"),
            })?;

        let tmp = tempfile::NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))
            .map_err(DriverError::Io)?;
        tokio::fs::write(tmp.path(), &bytes)
            .await
            .map_err(DriverError::Io)?;
        tmp.persist(path)
            .map_err(|error| DriverError::Io(error.error))?;

        self.bump("screenshots");
        Ok(())
    }

    async fn start_recording(&mut self, path: &Path) -> Result<(), DriverError> {
        // Chrome DevTools Protocol has no frame-by-frame screen recorder
        // this driver drives directly; without a companion ffmpeg pipeline
        // configured, emit a placeholder container with a descriptive
        // marker rather than a fabricated video stream.
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
        match self.recording.stop() {
            Some(duration) => {
                self.metrics
                    .insert("recording_duration_ms".to_string(), duration.as_millis() as u64);
                Ok(())
            }
            None => Err(DriverError::NotRecording),
        }
    }

    fn get_metrics(&self) -> HashMap<String, Scalar> {
        let mut out: HashMap<String, Scalar> = self
            .metrics
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
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if let Err(error) = browser.close().await {
                warn!("error closing browser: {error}");
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        Ok(())
    }
}
