//! Easel Gen - generation orchestration engine
//!
//! Turns textual creative descriptions into published images. Requests are
//! split into units, templated with a style preset, run against a prioritized
//! set of image providers (fal, OpenRouter, or a local mock) with health-aware
//! failover, and published to a content-addressed asset store.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod pool;
pub mod provider;
pub mod providers;
pub mod publish;
pub mod registry;
pub mod request;
pub mod state;
pub mod template;

pub use config::EaselConfig;
pub use coordinator::{CancelHandle, Coordinator};
pub use engine::Engine;
pub use pool::WorkerPool;
pub use provider::{
    GenerationParams, HealthStatus, ImageResult, ProviderAdapter, ProviderError, Quality,
    UnitKind,
};
pub use providers::{available_providers, create_provider, Provider};
pub use publish::{AssetMetadata, AssetPublisher, LocalPublisher, PublishedAsset};
pub use registry::{HealthPolicy, NoProviderAvailable, ProviderHealth, ProviderRegistry};
pub use request::{
    GenerationRequest, GenerationUnit, RequestKind, SceneSpec, UnitError, UnitResult, UnitStatus,
};
pub use state::{GenerationState, OverallStatus};
pub use template::{SceneAttributes, StylePreset, TemplateEngine, TemplateOutput};
