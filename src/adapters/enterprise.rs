use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

use crate::adapters::{Adapter, AdapterArtifact, ExecutionContext};
use crate::artifacts::ArtifactKind;
use crate::config::ActionSpec;
use crate::errors::{DispatchError, DriverError};

#[derive(Serialize)]
struct ActionRecord<'a> {
    app: &'a str,
    action: &'a str,
    #[serde(rename = "type")]
    type_: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    recorded_at: OffsetDateTime,
}

/// Writes a JSON action record under `O/` per action — the surface the
/// out-of-scope enterprise user/team/audit CRUD would plug into.
pub struct EnterpriseAdapter {
    enabled: bool,
}

impl EnterpriseAdapter {
    pub fn disabled() -> Self {
        EnterpriseAdapter { enabled: false }
    }

    pub fn enabled() -> Self {
        EnterpriseAdapter { enabled: true }
    }
}

#[async_trait]
impl Adapter for EnterpriseAdapter {
    async fn execute(
        &self,
        action: &ActionSpec,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<AdapterArtifact>, DispatchError> {
        if !self.enabled {
            return Err(DispatchError::FeatureDisabled {
                feature: format!("enterprise ({})", action.type_),
            });
        }

        let record = ActionRecord {
            app: &ctx.current_app.name,
            action: &action.name,
            type_: &action.type_,
            recorded_at: now(),
        };

        let body = serde_json::to_vec_pretty(&record).map_err(|error| {
            DispatchError::Driver(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                error,
            )))
        })?;

        // Routed through ArtifactStore rather than a raw tokio::fs::write so
        // the filename scheme and containment check stay centrally
        // enforced, same as screenshots/videos.
        let path = ctx
            .artifacts
            .reserve(ArtifactKind::Log, &ctx.current_app.name, &action.name, "json")
            .await
            .map_err(|error| {
                DispatchError::Driver(DriverError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    error.to_string(),
                )))
            })?;

        ctx.artifacts.write(&path, &body).await.map_err(|error| {
            DispatchError::Driver(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                error.to_string(),
            )))
        })?;

        Ok(vec![])
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let adapter = EnterpriseAdapter::disabled();
        assert!(!adapter.enabled);
    }
}
