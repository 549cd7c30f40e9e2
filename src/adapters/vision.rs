use async_trait::async_trait;

use crate::adapters::{Adapter, AdapterArtifact, ExecutionContext};
use crate::config::ActionSpec;
use crate::errors::DispatchError;

/// Opaque vision/test-generation backend. The core never implements real
/// computer-vision analysis (out of scope); this trait exists so the
/// dispatch path is exercised by tests even with no model wired in.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn analyze(
        &self,
        action: &ActionSpec,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<AdapterArtifact>, DispatchError>;
}

pub struct NullVisionBackend;

#[async_trait]
impl VisionBackend for NullVisionBackend {
    async fn analyze(
        &self,
        action: &ActionSpec,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<AdapterArtifact>, DispatchError> {
        Err(DispatchError::FeatureDisabled {
            feature: format!("vision ({})", action.type_),
        })
    }
}

pub struct VisionAdapter {
    backend: Option<Box<dyn VisionBackend>>,
}

impl VisionAdapter {
    pub fn disabled() -> Self {
        VisionAdapter { backend: None }
    }

    pub fn with_backend(backend: Box<dyn VisionBackend>) -> Self {
        VisionAdapter {
            backend: Some(backend),
        }
    }
}

#[async_trait]
impl Adapter for VisionAdapter {
    async fn execute(
        &self,
        action: &ActionSpec,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<AdapterArtifact>, DispatchError> {
        match &self.backend {
            Some(backend) => backend.analyze(action, ctx).await,
            None => Err(DispatchError::FeatureDisabled {
                feature: format!("vision ({})", action.type_),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_adapter_has_no_backend() {
        let adapter = VisionAdapter::disabled();
        assert!(adapter.backend.is_none());
    }
}
