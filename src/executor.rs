use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::adapters::Adapters;
use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::{ApplicationSpec, Plan};
use crate::dispatch::dispatch;
use crate::errors::{ArtifactError, DispatchError};
use crate::formatter::Formatter;
use crate::platform::{self};
use crate::progress::{ApplicationFinished, ApplicationStarted};
use crate::result::{ActionOutcome, TestResult};

/// Per-application lifecycle state, §4.8. `FailedInit` and `Aborted` are
/// terminal-but-distinguishable so tests can assert which branch a run
/// took without string-matching the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppState {
    New,
    Initializing,
    Running,
    Finalizing,
    Done,
    FailedInit,
    Aborted,
}

type DriverFactory =
    dyn Fn(crate::config::ApplicationKind, &crate::config::Settings) -> Box<dyn platform::Driver> + Send + Sync;

pub struct Executor<'a> {
    plan: &'a Plan,
    artifacts: ArtifactStore,
    adapters: Adapters,
    formatter: &'a dyn Formatter,
    driver_factory: Box<DriverFactory>,
}

impl<'a> Executor<'a> {
    pub async fn bootstrap(
        plan: &'a Plan,
        output: &Path,
        formatter: &'a dyn Formatter,
    ) -> Result<Executor<'a>, ArtifactError> {
        let artifacts = ArtifactStore::create(output).await?;
        Ok(Executor {
            plan,
            artifacts,
            adapters: Adapters::default(),
            formatter,
            driver_factory: Box::new(platform::factory),
        })
    }

    pub fn with_adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = adapters;
        self
    }

    /// Test/embedding seam: substitutes the driver factory so a run can be
    /// exercised against a deterministic double instead of a real
    /// browser/OS/device.
    pub fn with_driver_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(crate::config::ApplicationKind, &crate::config::Settings) -> Box<dyn platform::Driver>
            + Send
            + Sync
            + 'static,
    {
        self.driver_factory = Box::new(factory);
        self
    }

    /// Runs every application sequentially (§5), returning results in
    /// plan order (P1). Never propagates a per-application failure; the
    /// only errors that escape are ones the caller already ruled out by
    /// calling `bootstrap` first (so in practice this never returns Err
    /// today, but keeps a `Result` shape for symmetry with the rest of
    /// the pipeline and future fatal-at-this-layer conditions).
    pub async fn run(&self, token: &CancellationToken) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(self.plan.applications.len());

        for app in &self.plan.applications {
            if token.is_cancelled() {
                results.push(cancelled_result(app));
                continue;
            }

            self.formatter.stage(
                &ApplicationStarted {
                    name: app.name.clone(),
                    kind: app.kind.to_string(),
                }
                .to_string(),
            );
            let (result, fatal_for_run) = self.run_one(app, token).await;
            self.formatter.message(
                &ApplicationFinished {
                    name: result.app_name.clone(),
                    success: result.success,
                    action_count: result.action_outcomes.len(),
                    duration_ms: result.duration_ms().max(0) as u128,
                }
                .to_string(),
            );
            results.push(result);

            if fatal_for_run {
                info!("cancellation observed, remaining applications will not be started");
                break;
            }
        }

        results
    }

    async fn run_one(&self, app: &ApplicationSpec, token: &CancellationToken) -> (TestResult, bool) {
        let app_token = token.child_token();
        let start_time = OffsetDateTime::now_utc();
        let mut state = AppState::New;
        let mut driver = (self.driver_factory)(app.kind, &self.plan.settings);

        state = AppState::Initializing;
        let init_result = driver.initialize(app).await;

        let mut action_outcomes = Vec::new();
        let mut screenshots = Vec::new();
        let mut videos = Vec::new();
        let mut success = true;
        let mut error = String::new();
        let mut fatal_for_run = false;
        // Path written by the most recent successful `record_start`, still
        // pending a matching `record_stop`. `record_start` and `record_stop`
        // normally have different `Name`s, so `record_stop` cannot just
        // reserve its own fresh path -- nothing would ever write to it.
        let mut active_recording_path: Option<PathBuf> = None;

        match init_result {
            Err(init_error) => {
                state = AppState::FailedInit;
                success = false;
                error = init_error.to_string();
                warn!("application '{}' failed to initialize: {}", app.name, init_error);
            }
            Ok(()) => {
                state = AppState::Running;
                for action in self.plan.actions_for(app) {
                    if app_token.is_cancelled() {
                        success = false;
                        error = "cancelled".to_string();
                        fatal_for_run = true;
                        state = AppState::Aborted;
                        break;
                    }

                    let action_start = OffsetDateTime::now_utc();
                    let artifact_path = if action.type_ == "record_stop" {
                        Ok(active_recording_path.clone())
                    } else {
                        self.reserve_artifact_path(app, action).await
                    };

                    let timeout_secs = effective_timeout(app, &self.plan.settings);

                    let outcome = match artifact_path {
                        Err(artifact_error) => Err(DispatchError::Driver(
                            crate::errors::DriverError::Io(std::io::Error::new(
                                std::io::ErrorKind::Other,
                                artifact_error.to_string(),
                            )),
                        )),
                        Ok(path) => {
                            let mut result_stub = TestResult {
                                app_name: app.name.clone(),
                                app_kind: app.kind,
                                start_time: action_start,
                                end_time: action_start,
                                screenshots: std::mem::take(&mut screenshots),
                                videos: std::mem::take(&mut videos),
                                metrics: Default::default(),
                                success: true,
                                error: String::new(),
                                action_outcomes: vec![],
                            };

                            let dispatch_future =
                                dispatch(
                                    driver.as_mut(),
                                    action,
                                    &mut result_stub,
                                    &self.plan.settings,
                                    &self.adapters,
                                    self.artifacts.root(),
                                    app,
                                    &app_token,
                                    path.clone(),
                                    &self.artifacts,
                                );

                            let outcome = match tokio::time::timeout(
                                std::time::Duration::from_secs(timeout_secs),
                                dispatch_future,
                            )
                            .await
                            {
                                Ok(inner) => inner,
                                Err(_) => Err(DispatchError::ActionTimeout { timeout_secs }),
                            };

                            screenshots = result_stub.screenshots;
                            videos = result_stub.videos;

                            if outcome.is_ok() {
                                if action.type_ == "record_start" {
                                    active_recording_path = path;
                                } else if action.type_ == "record_stop" {
                                    active_recording_path = None;
                                }
                            }

                            outcome
                        }
                    };

                    let action_end = OffsetDateTime::now_utc();
                    let (action_success, action_error, kind) = match &outcome {
                        Ok(()) => (true, String::new(), None),
                        Err(dispatch_error) => {
                            (false, dispatch_error.to_string(), Some(dispatch_error.kind()))
                        }
                    };

                    if !action_success {
                        success = false;
                        if error.is_empty() {
                            error = action_error.clone();
                        }
                    }

                    action_outcomes.push(ActionOutcome {
                        name: action.name.clone(),
                        type_: action.type_.clone(),
                        start: action_start,
                        end: action_end,
                        success: action_success,
                        error: action_error,
                        kind,
                    });

                    if let Some(kind) = kind {
                        if kind.is_fatal_for_app() {
                            state = AppState::Aborted;
                            break;
                        }
                        if kind.is_fatal_for_run() {
                            fatal_for_run = true;
                            state = AppState::Aborted;
                            break;
                        }
                    }
                }

                if state == AppState::Running {
                    state = AppState::Finalizing;
                }
            }
        }

        // FINALIZING always runs: defensive stop-recording, then close,
        // regardless of which branch above was taken.
        state = AppState::Finalizing;
        if let Err(stop_error) = driver.stop_recording().await {
            debug!(
                "defensive stop_recording for '{}' returned: {}",
                app.name, stop_error
            );
        }
        if let Err(close_error) = driver.close().await {
            warn!("error closing driver for '{}': {}", app.name, close_error);
        }

        let metrics = driver.get_metrics();
        state = AppState::Done;
        debug!("application '{}' reached state {:?}", app.name, state);

        let end_time = OffsetDateTime::now_utc();
        let result = TestResult {
            app_name: app.name.clone(),
            app_kind: app.kind,
            start_time,
            end_time,
            screenshots,
            videos,
            metrics,
            success,
            error,
            action_outcomes,
        };

        (result, fatal_for_run)
    }

    /// Reserves a fresh artifact path for actions that write a new file.
    /// `record_stop` is deliberately absent here: it doesn't get a path of
    /// its own, it reuses the one reserved for the matching `record_start`
    /// (tracked in `run_one` as `active_recording_path`).
    async fn reserve_artifact_path(
        &self,
        app: &ApplicationSpec,
        action: &crate::config::ActionSpec,
    ) -> Result<Option<PathBuf>, ArtifactError> {
        let settings = &self.plan.settings;
        let path = match action.type_.as_str() {
            "screenshot" => Some(
                self.artifacts
                    .reserve(
                        ArtifactKind::Screenshot,
                        &app.name,
                        &action.name,
                        settings.screenshot_format.extension(),
                    )
                    .await?,
            ),
            "record_start" => Some(
                self.artifacts
                    .reserve(
                        ArtifactKind::Video,
                        &app.name,
                        &action.name,
                        settings.video_format.extension(),
                    )
                    .await?,
            ),
            _ => None,
        };
        Ok(path)
    }

    pub fn artifact_store(&self) -> &ArtifactStore {
        &self.artifacts
    }
}

fn effective_timeout(app: &ApplicationSpec, settings: &crate::config::Settings) -> u64 {
    if app.timeout > 0 {
        app.timeout
    } else {
        settings.action_timeout
    }
}

fn cancelled_result(app: &ApplicationSpec) -> TestResult {
    let now = OffsetDateTime::now_utc();
    TestResult {
        app_name: app.name.clone(),
        app_kind: app.kind,
        start_time: now,
        end_time: now,
        screenshots: vec![],
        videos: vec![],
        metrics: Default::default(),
        success: false,
        error: "cancelled".to_string(),
        action_outcomes: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionSpec, ApplicationKind, Plan, Settings};
    use crate::formatter::StandardFormatter;
    use crate::platform::null::NullDriver;
    use tempfile::tempdir;

    fn null_factory(_kind: ApplicationKind, settings: &Settings) -> Box<dyn platform::Driver> {
        Box::new(NullDriver::new(settings.clone()))
    }

    fn minimal_plan(output: &Path) -> Plan {
        Plan {
            schema_version: 1,
            name: "test".into(),
            output: output.to_path_buf(),
            applications: vec![ApplicationSpec {
                name: "app1".into(),
                kind: ApplicationKind::Web,
                url: Some("about:blank".into()),
                ..Default::default()
            }],
            actions: vec![ActionSpec {
                name: "go".into(),
                type_: "navigate".into(),
                value: Some("about:blank".into()),
                ..Default::default()
            }],
            settings: Settings::default(),
        }
    }

    #[tokio::test]
    async fn produces_exactly_one_result_per_application() {
        let dir = tempdir().unwrap();
        let plan = minimal_plan(dir.path());
        let formatter = StandardFormatter::new(1);
        let executor = Executor::bootstrap(&plan, &dir.path().join("out"), &formatter)
            .await
            .unwrap()
            .with_driver_factory(null_factory);
        let token = CancellationToken::new();
        let results = executor.run(&token).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].app_name, "app1");
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn non_fatal_selector_failure_does_not_abort_remaining_actions() {
        let dir = tempdir().unwrap();
        let mut plan = minimal_plan(dir.path());
        plan.actions = vec![
            ActionSpec {
                name: "click".into(),
                type_: "click".into(),
                selector: Some("#missing".into()),
                ..Default::default()
            },
            ActionSpec {
                name: "shot".into(),
                type_: "screenshot".into(),
                ..Default::default()
            },
        ];
        let formatter = StandardFormatter::new(1);
        let executor = Executor::bootstrap(&plan, &dir.path().join("out"), &formatter)
            .await
            .unwrap()
            .with_driver_factory(null_factory);
        let token = CancellationToken::new();
        let results = executor.run(&token).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].action_outcomes.len(), 2);
        assert!(results[0].action_outcomes[1].success);
        assert_eq!(results[0].screenshots.len(), 1);
    }

    #[tokio::test]
    async fn unknown_action_is_non_fatal() {
        let dir = tempdir().unwrap();
        let mut plan = minimal_plan(dir.path());
        plan.actions = vec![
            ActionSpec {
                name: "go".into(),
                type_: "navigate".into(),
                value: Some("about:blank".into()),
                ..Default::default()
            },
            ActionSpec {
                name: "frobnicate".into(),
                type_: "frobnicate".into(),
                ..Default::default()
            },
        ];
        let formatter = StandardFormatter::new(1);
        let executor = Executor::bootstrap(&plan, &dir.path().join("out"), &formatter)
            .await
            .unwrap()
            .with_driver_factory(null_factory);
        let token = CancellationToken::new();
        let results = executor.run(&token).await;
        assert!(!results[0].success);
        assert_eq!(results[0].action_outcomes.len(), 2);
        assert!(results[0].action_outcomes[0].success);
        assert!(!results[0].action_outcomes[1].success);
    }

    #[tokio::test]
    async fn record_stop_references_the_record_start_path_and_it_exists() {
        let dir = tempdir().unwrap();
        let mut plan = minimal_plan(dir.path());
        plan.actions = vec![
            ActionSpec {
                name: "begin".into(),
                type_: "record_start".into(),
                ..Default::default()
            },
            ActionSpec {
                name: "end".into(),
                type_: "record_stop".into(),
                ..Default::default()
            },
        ];
        let formatter = StandardFormatter::new(1);
        let executor = Executor::bootstrap(&plan, &dir.path().join("out"), &formatter)
            .await
            .unwrap()
            .with_driver_factory(null_factory);
        let token = CancellationToken::new();
        let results = executor.run(&token).await;
        assert!(results[0].success);
        assert_eq!(results[0].videos.len(), 1);
        let video_path = Path::new(&results[0].videos[0]);
        assert!(video_path.exists(), "video path referenced in result must exist on disk");
        assert!(video_path.file_name().unwrap().to_str().unwrap().contains("begin"));
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_cancelled_results() {
        let dir = tempdir().unwrap();
        let plan = minimal_plan(dir.path());
        let formatter = StandardFormatter::new(1);
        let executor = Executor::bootstrap(&plan, &dir.path().join("out"), &formatter)
            .await
            .unwrap()
            .with_driver_factory(null_factory);
        let token = CancellationToken::new();
        token.cancel();
        let results = executor.run(&token).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].error, "cancelled");
    }
}
