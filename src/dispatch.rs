use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::adapters::{Adapters, ExecutionContext};
use crate::artifacts::ArtifactStore;
use crate::config::{ActionSpec, ApplicationSpec, Settings};
use crate::errors::DispatchError;
use crate::platform::Driver;
use crate::result::TestResult;

/// Flat match over `ActionSpec::type_`, §4.7. The Executor records
/// success/failure regardless of the outcome; this function only performs
/// the routed call and reports its artifacts back via `result`.
///
/// `driver` is the sole mutable handle to the underlying automation
/// resource; adapter arms reborrow it immutably through `ExecutionContext`
/// for the duration of their own call only, never concurrently with a
/// mutable driver call.
pub async fn dispatch(
    driver: &mut dyn Driver,
    action: &ActionSpec,
    result: &mut TestResult,
    settings: &Settings,
    adapters: &Adapters,
    output_dir: &Path,
    current_app: &ApplicationSpec,
    token: &CancellationToken,
    artifact_path: Option<PathBuf>,
    artifacts: &ArtifactStore,
) -> Result<(), DispatchError> {
    match action.type_.as_str() {
        "navigate" => {
            let value = action.value.as_deref().unwrap_or_default();
            driver.navigate(value).await.map_err(DispatchError::from)
        }
        "click" => {
            let selector = action.selector.as_deref().unwrap_or_default();
            driver.click(selector).await.map_err(DispatchError::from)
        }
        "fill" => {
            let selector = action.selector.as_deref().unwrap_or_default();
            let value = action.value.as_deref().unwrap_or_default();
            driver
                .fill(selector, value)
                .await
                .map_err(DispatchError::from)
        }
        "submit" => {
            let selector = action.selector.as_deref().unwrap_or_default();
            driver.submit(selector).await.map_err(DispatchError::from)
        }
        "wait" => {
            let seconds = action.wait_time.unwrap_or(0);
            driver.wait(seconds, token).await.map_err(DispatchError::from)
        }
        "screenshot" => {
            let path = artifact_path.expect("screenshot dispatch requires a reserved path");
            driver
                .screenshot(&path)
                .await
                .map(|_| result.screenshots.push(path.display().to_string()))
                .map_err(DispatchError::from)
        }
        "record_start" => {
            let path = artifact_path.expect("record_start dispatch requires a reserved path");
            driver
                .start_recording(&path)
                .await
                .map_err(DispatchError::from)
        }
        "record_stop" => {
            // `artifact_path` here is the path recorded at `record_start` time
            // (the executor tracks it across the two actions), not a fresh
            // reservation keyed on this action's own name -- the bytes only
            // ever land at the `record_start` path.
            driver
                .stop_recording()
                .await
                .map(|_| {
                    if let Some(path) = artifact_path {
                        result.videos.push(path.display().to_string());
                    }
                })
                .map_err(DispatchError::from)
        }
        other if other.starts_with("vision_") => {
            let ctx = ExecutionContext {
                output_dir,
                current_app,
                driver: &*driver,
                settings,
                artifacts,
            };
            adapters
                .vision
                .execute(action, &ctx)
                .await
                .map(|paths| merge_adapter_paths(result, paths))
        }
        other if other.starts_with("cloud_") => {
            let ctx = ExecutionContext {
                output_dir,
                current_app,
                driver: &*driver,
                settings,
                artifacts,
            };
            adapters
                .cloud
                .execute(action, &ctx)
                .await
                .map(|paths| merge_adapter_paths(result, paths))
        }
        other if other.starts_with("enterprise_") => {
            let ctx = ExecutionContext {
                output_dir,
                current_app,
                driver: &*driver,
                settings,
                artifacts,
            };
            adapters
                .enterprise
                .execute(action, &ctx)
                .await
                .map(|paths| merge_adapter_paths(result, paths))
        }
        other => Err(DispatchError::UnknownAction {
            action_type: other.to_string(),
        }),
    }
}

fn merge_adapter_paths(result: &mut TestResult, paths: Vec<crate::adapters::AdapterArtifact>) {
    for artifact in paths {
        match artifact {
            crate::adapters::AdapterArtifact::Screenshot(p) => {
                result.screenshots.push(p.display().to_string())
            }
            crate::adapters::AdapterArtifact::Video(p) => {
                result.videos.push(p.display().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_maps_to_unknown_action_error() {
        let action = ActionSpec {
            name: "x".into(),
            type_: "frobnicate".into(),
            ..Default::default()
        };
        // dispatch() itself is exercised end-to-end in executor's tests
        // (it needs a live driver); this just pins the recognized-prefix
        // rule that config::validate_action also relies on.
        assert!(!action.type_.starts_with("vision_"));
        assert!(!action.type_.starts_with("cloud_"));
        assert!(!action.type_.starts_with("enterprise_"));
    }
}
