use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::adapters::{Adapter, AdapterArtifact, ExecutionContext};
use crate::config::ActionSpec;
use crate::errors::DispatchError;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Serialize)]
struct PresignRequest<'a> {
    filename: &'a str,
}

#[derive(Deserialize)]
struct PresignResponse {
    upload_url: String,
}

/// Thin client over a presigned-URL upload flow, the same shape as the
/// teacher's `upload_to_s3`: request a presigned URL, then PUT the file
/// body straight to it.
pub struct CloudUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl CloudUploader {
    pub fn new(endpoint: String) -> Self {
        CloudUploader {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn upload_one(&self, path: &Path) -> Result<(), DispatchError> {
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("artifact");

        let presign_url = format!("{}/presigned-url", self.endpoint);
        let presign: PresignResponse = self
            .client
            .post(&presign_url)
            .json(&PresignRequest { filename })
            .send()
            .await
            .map_err(io_error)?
            .json()
            .await
            .map_err(io_error)?;

        let body = tokio::fs::read(path).await.map_err(|error| {
            DispatchError::Driver(crate::errors::DriverError::Io(error))
        })?;

        self.client
            .put(&presign.upload_url)
            .body(body)
            .send()
            .await
            .map_err(io_error)?
            .error_for_status()
            .map_err(io_error)?;

        Ok(())
    }
}

fn io_error(error: reqwest::Error) -> DispatchError {
    DispatchError::Driver(crate::errors::DriverError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        error,
    )))
}

/// Uploads a batch of files with bounded concurrency and per-file retries,
/// per §5: default 4 workers, `futures::stream::buffer_unordered`, default
/// 3 attempts with exponential backoff starting at 250ms.
async fn upload_batch(
    uploader: &CloudUploader,
    paths: Vec<PathBuf>,
    workers: usize,
    retries: u32,
) -> Result<(), DispatchError> {
    let progress = ProgressBar::new(paths.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("uploading [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let results: Vec<Result<(), DispatchError>> = stream::iter(paths.into_iter())
        .map(|path| {
            let uploader_ref = uploader;
            let progress = &progress;
            async move {
                let mut backoff = INITIAL_BACKOFF;
                let mut last_error = None;
                for attempt in 1..=retries {
                    match uploader_ref.upload_one(&path).await {
                        Ok(()) => {
                            progress.inc(1);
                            return Ok(());
                        }
                        Err(error) => {
                            debug!("upload attempt {attempt}/{retries} for {path:?} failed: {error}");
                            last_error = Some(error);
                            if attempt < retries {
                                tokio::time::sleep(backoff).await;
                                backoff *= 2;
                            }
                        }
                    }
                }
                progress.inc(1);
                Err(last_error.expect("at least one attempt is always made"))
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    progress.finish_and_clear();
    results.into_iter().collect()
}

pub struct CloudAdapter {
    uploader: Option<CloudUploader>,
    workers: usize,
    retries: u32,
}

impl CloudAdapter {
    pub fn disabled() -> Self {
        CloudAdapter {
            uploader: None,
            workers: DEFAULT_WORKERS,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        CloudAdapter {
            uploader: Some(CloudUploader::new(endpoint)),
            workers: DEFAULT_WORKERS,
            retries: DEFAULT_RETRIES,
        }
    }
}

#[async_trait]
impl Adapter for CloudAdapter {
    async fn execute(
        &self,
        action: &ActionSpec,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<AdapterArtifact>, DispatchError> {
        let uploader = self.uploader.as_ref().ok_or(DispatchError::FeatureDisabled {
            feature: format!("cloud ({})", action.type_),
        })?;

        let paths: Vec<PathBuf> = action
            .parameters
            .get("paths")
            .map(|scalar| scalar.to_string())
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| ctx.output_dir.join(s))
            .collect();

        upload_batch(uploader, paths, self.workers, self.retries).await?;
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_and_retry_counts_match_spec() {
        assert_eq!(DEFAULT_WORKERS, 4);
        assert_eq!(DEFAULT_RETRIES, 3);
        assert_eq!(INITIAL_BACKOFF, Duration::from_millis(250));
    }

    #[test]
    fn disabled_by_default() {
        let adapter = CloudAdapter::disabled();
        assert!(adapter.uploader.is_none());
    }
}
