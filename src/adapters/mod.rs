pub mod cloud;
pub mod enterprise;
pub mod vision;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::artifacts::ArtifactStore;
use crate::config::{ApplicationSpec, Scalar, Settings};
use crate::errors::DispatchError;
use crate::platform::Driver;

/// Artifact an adapter produced, for the Executor to merge into
/// `result.Screenshots`/`result.Videos` per §4.9.
pub enum AdapterArtifact {
    Screenshot(PathBuf),
    Video(PathBuf),
}

/// Everything an adapter needs without depending on the Executor itself.
/// `driver` is a read-only view for vision actions that inspect the
/// current page/screen.
pub struct ExecutionContext<'a> {
    pub output_dir: &'a Path,
    pub current_app: &'a ApplicationSpec,
    pub driver: &'a dyn Driver,
    pub settings: &'a Settings,
    /// Adapters that write their own files route them through here so the
    /// §4.2 filename scheme and containment check stay centrally enforced
    /// instead of each adapter re-implementing its own.
    pub artifacts: &'a ArtifactStore,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn execute(
        &self,
        action: &crate::config::ActionSpec,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<AdapterArtifact>, DispatchError>;
}

/// The uniform shape of `(outcome, error)` from §4.9, used by adapters that
/// only need to report scalars rather than artifacts.
pub type AdapterOutcome = std::collections::HashMap<String, Scalar>;

/// Owns the three adapters dispatch routes `vision_*`/`cloud_*`/
/// `enterprise_*` actions to. Each slot defaults to its disabled form, so a
/// plan with no adapters configured still dispatches cleanly into
/// `ErrFeatureDisabled`.
pub struct Adapters {
    pub vision: vision::VisionAdapter,
    pub cloud: cloud::CloudAdapter,
    pub enterprise: enterprise::EnterpriseAdapter,
}

impl Default for Adapters {
    fn default() -> Self {
        Adapters {
            vision: vision::VisionAdapter::disabled(),
            cloud: cloud::CloudAdapter::disabled(),
            enterprise: enterprise::EnterpriseAdapter::disabled(),
        }
    }
}
