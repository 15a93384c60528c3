//! The generation engine
//!
//! Owns the provider registry, template engine, publisher and worker pool,
//! and runs one coordinator per submitted request. The registry and pool are
//! shared by every request, so provider health and backoff are seen by all
//! of them.

use crate::config::EaselConfig;
use crate::coordinator::{CancelHandle, Coordinator, Observer};
use crate::pool::WorkerPool;
use crate::provider::HealthStatus;
use crate::publish::{AssetPublisher, LocalPublisher};
use crate::registry::{ProviderHealth, ProviderRegistry};
use crate::request::GenerationRequest;
use crate::state::GenerationState;
use crate::template::TemplateEngine;
use easel_core::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Entry point for running generation requests
pub struct Engine {
    registry: Arc<ProviderRegistry>,
    templates: TemplateEngine,
    publisher: Arc<dyn AssetPublisher>,
    pool: WorkerPool,
    default_style: String,
}

impl Engine {
    /// Assemble an engine from parts
    pub fn new(
        registry: ProviderRegistry,
        templates: TemplateEngine,
        publisher: Arc<dyn AssetPublisher>,
        max_in_flight: usize,
    ) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(registry),
            templates,
            publisher,
            pool: WorkerPool::new(max_in_flight)?,
            default_style: "cinematic".to_string(),
        })
    }

    /// Build everything from resolved configuration
    pub fn from_config(config: &EaselConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        let templates = TemplateEngine::load_dir(Path::new(&config.styles.dir))?;
        let publisher: Arc<dyn AssetPublisher> =
            Arc::new(LocalPublisher::from_config(&config.publish));

        let mut engine = Self::new(registry, templates, publisher, config.engine.max_in_flight)?;
        engine.default_style = config.styles.default.clone();
        log::info!(
            "Engine ready: providers [{}], {} worker(s), {} style preset(s)",
            engine.registry.names().join(", "),
            engine.pool.size(),
            engine.templates.preset_ids().len()
        );
        Ok(engine)
    }

    /// Preset used when a caller does not name one
    pub fn default_style(&self) -> &str {
        &self.default_style
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// Run a request to completion and return its final state
    pub fn submit(&self, request: &GenerationRequest) -> GenerationState {
        self.submit_with(request, &CancelHandle::new(), None)
    }

    /// Run a request with a cancellation handle and an optional progress observer
    pub fn submit_with(
        &self,
        request: &GenerationRequest,
        cancel: &CancelHandle,
        observer: Option<Observer<'_>>,
    ) -> GenerationState {
        Coordinator::new(&self.registry, &self.templates, &self.publisher, &self.pool)
            .run(request, cancel, observer)
    }

    /// Current health of every provider
    pub fn health_snapshot(&self) -> BTreeMap<String, ProviderHealth> {
        self.registry.health_snapshot()
    }

    /// Actively probe every provider, then return the updated snapshot
    pub fn probe_health(&self) -> BTreeMap<String, ProviderHealth> {
        let report = self.registry.probe_all();
        let unhealthy = report
            .values()
            .filter(|s| **s == HealthStatus::Unhealthy)
            .count();
        if unhealthy > 0 {
            log::warn!("{} of {} provider(s) unhealthy", unhealthy, report.len());
        }
        self.registry.health_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::registry::HealthPolicy;
    use crate::request::UnitStatus;
    use crate::state::OverallStatus;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("easel_engine_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_end_to_end_with_local_publisher() {
        let dir = temp_dir();
        let registry = ProviderRegistry::new(HealthPolicy::default())
            .with_provider(MockProvider::new("mock").with_render_dir(dir.join("renders")))
            .unwrap();
        let publisher: Arc<dyn AssetPublisher> =
            Arc::new(LocalPublisher::new(dir.join("store"), dir.join("assets")));
        let engine =
            Engine::new(registry, TemplateEngine::with_builtin_presets(), publisher, 2).unwrap();

        let request = GenerationRequest::concept("a lighthouse at dusk", 2, "concept-art")
            .unwrap()
            .with_aspect_ratio("1:1");
        let state = engine.submit(&request);

        assert_eq!(state.overall_status, OverallStatus::Completed);
        assert_eq!(state.completed_count, 2);
        for unit in &state.units {
            assert_eq!(unit.status, UnitStatus::Succeeded);
            let result = unit.result.as_ref().unwrap();
            assert!(result.asset_id.starts_with("sha256:"));
            assert!(std::path::Path::new(&result.url).exists());
            assert_eq!((result.width, result.height), (1024, 1024));
            assert!(unit
                .prompt
                .as_deref()
                .unwrap()
                .starts_with("Concept art of a lighthouse at dusk"));
        }

        let health = engine.health_snapshot();
        assert_eq!(health["mock"].total_requests, 2);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_probe_health_updates_snapshot() {
        let registry = ProviderRegistry::new(HealthPolicy::default())
            .with_provider(MockProvider::new("mock"))
            .unwrap();
        let publisher: Arc<dyn AssetPublisher> = Arc::new(LocalPublisher::new("unused", "unused"));
        let engine =
            Engine::new(registry, TemplateEngine::with_builtin_presets(), publisher, 1).unwrap();

        assert!(engine.health_snapshot()["mock"].last_checked_at.is_none());
        let snapshot = engine.probe_health();
        assert!(snapshot["mock"].last_checked_at.is_some());
        assert_eq!(snapshot["mock"].status, HealthStatus::Healthy);
    }
}
