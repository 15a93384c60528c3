//! Shared fixtures for engine-level tests

#![allow(dead_code)]

use easel_core::{ContentHash, EaselError, Result};
use easel_gen::providers::mock::MockProvider;
use easel_gen::{
    AssetMetadata, AssetPublisher, CancelHandle, Engine, HealthPolicy, ImageResult,
    ProviderRegistry, PublishedAsset, TemplateEngine,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// In-memory publisher that records every upload
#[derive(Default)]
pub struct RecordingPublisher {
    uploads: Mutex<Vec<AssetMetadata>>,
    fail: bool,
    cancel_on_first_upload: Option<CancelHandle>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every upload
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Trigger `cancel` while the first upload is in progress
    pub fn cancelling(cancel: CancelHandle) -> Self {
        Self {
            cancel_on_first_upload: Some(cancel),
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<AssetMetadata> {
        self.uploads.lock().clone()
    }
}

impl AssetPublisher for RecordingPublisher {
    fn upload(&self, image: &ImageResult, metadata: &AssetMetadata) -> Result<PublishedAsset> {
        let first = {
            let mut uploads = self.uploads.lock();
            uploads.push(metadata.clone());
            uploads.len() == 1
        };
        if first {
            if let Some(cancel) = &self.cancel_on_first_upload {
                cancel.cancel();
            }
        }
        if self.fail {
            return Err(EaselError::UploadError("asset store unreachable".to_string()));
        }
        Ok(PublishedAsset {
            asset_id: ContentHash::of(image.url.as_bytes()).asset_id(),
            url: format!("memory://{}", metadata.name),
        })
    }
}

/// Failure thresholds used by the tests (60s window)
pub fn policy() -> HealthPolicy {
    HealthPolicy {
        degraded_after: 1,
        unhealthy_after: 3,
        failure_window: Duration::from_secs(60),
    }
}

/// An engine over the given mocks, in priority order
pub fn engine(
    providers: Vec<MockProvider>,
    publisher: Arc<dyn AssetPublisher>,
    slots: usize,
) -> Engine {
    let mut registry = ProviderRegistry::new(policy());
    for provider in providers {
        registry.register(provider).unwrap();
    }
    Engine::new(registry, TemplateEngine::with_builtin_presets(), publisher, slots).unwrap()
}

/// The scripted mock registered under `name`
pub fn mock(engine: &Engine, name: &str) -> Arc<easel_gen::Provider> {
    let provider = engine.registry().get(name).unwrap();
    assert!(provider.as_mock().is_some(), "{} is not a mock", name);
    provider
}
