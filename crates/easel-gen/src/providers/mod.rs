//! Concrete provider bindings
//!
//! `Provider` is the closed set of backends the registry can hold. It
//! forwards every adapter operation to the concrete binding.

pub mod fal;
mod http;
pub mod mock;
pub mod openrouter;

use crate::config::EaselConfig;
use crate::provider::*;
use easel_core::{EaselError, Result};
use std::time::Duration;

/// Default directory for mock renders when none is configured
const DEFAULT_MOCK_RENDER_DIR: &str = ".easel/renders";

/// A configured provider binding
pub enum Provider {
    Fal(fal::FalProvider),
    OpenRouter(openrouter::OpenRouterProvider),
    Mock(mock::MockProvider),
}

impl Provider {
    /// The mock binding, if this is one (used to script test scenarios)
    pub fn as_mock(&self) -> Option<&mock::MockProvider> {
        match self {
            Provider::Mock(p) => Some(p),
            _ => None,
        }
    }
}

impl From<mock::MockProvider> for Provider {
    fn from(p: mock::MockProvider) -> Self {
        Provider::Mock(p)
    }
}

impl From<fal::FalProvider> for Provider {
    fn from(p: fal::FalProvider) -> Self {
        Provider::Fal(p)
    }
}

impl From<openrouter::OpenRouterProvider> for Provider {
    fn from(p: openrouter::OpenRouterProvider) -> Self {
        Provider::OpenRouter(p)
    }
}

impl ProviderAdapter for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::Fal(p) => p.name(),
            Provider::OpenRouter(p) => p.name(),
            Provider::Mock(p) => p.name(),
        }
    }

    fn supports(&self, kind: UnitKind) -> bool {
        match self {
            Provider::Fal(p) => p.supports(kind),
            Provider::OpenRouter(p) => p.supports(kind),
            Provider::Mock(p) => p.supports(kind),
        }
    }

    fn call_timeout(&self) -> Duration {
        match self {
            Provider::Fal(p) => p.call_timeout(),
            Provider::OpenRouter(p) => p.call_timeout(),
            Provider::Mock(p) => p.call_timeout(),
        }
    }

    fn generate_image(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> std::result::Result<ImageResult, ProviderError> {
        match self {
            Provider::Fal(p) => p.generate_image(prompt, negative_prompt, params),
            Provider::OpenRouter(p) => p.generate_image(prompt, negative_prompt, params),
            Provider::Mock(p) => p.generate_image(prompt, negative_prompt, params),
        }
    }

    fn upscale_image(
        &self,
        source_ref: &str,
        factor: u32,
    ) -> std::result::Result<ImageResult, ProviderError> {
        match self {
            Provider::Fal(p) => p.upscale_image(source_ref, factor),
            Provider::OpenRouter(p) => p.upscale_image(source_ref, factor),
            Provider::Mock(p) => p.upscale_image(source_ref, factor),
        }
    }

    fn check_health(&self) -> HealthStatus {
        match self {
            Provider::Fal(p) => p.check_health(),
            Provider::OpenRouter(p) => p.check_health(),
            Provider::Mock(p) => p.check_health(),
        }
    }

    fn request_count(&self) -> u64 {
        match self {
            Provider::Fal(p) => p.request_count(),
            Provider::OpenRouter(p) => p.request_count(),
            Provider::Mock(p) => p.request_count(),
        }
    }
}

/// Create a provider by name with configuration
pub fn create_provider(name: &str, config: &EaselConfig) -> Result<Provider> {
    match name {
        "fal" => Ok(fal::FalProvider::from_config(config)?.into()),
        "openrouter" => Ok(openrouter::OpenRouterProvider::from_config(config)?.into()),
        "mock" => {
            let render_dir = config
                .providers
                .get("mock")
                .and_then(|p| p.render_dir.clone())
                .unwrap_or_else(|| DEFAULT_MOCK_RENDER_DIR.to_string());
            let timeout = config.call_timeout("mock", Duration::from_secs(60));
            Ok(mock::MockProvider::new("mock")
                .with_call_timeout(timeout)
                .with_render_dir(render_dir)
                .into())
        }
        _ => Err(EaselError::UnknownProvider {
            name: name.to_string(),
            available: available_providers().join(", "),
        }),
    }
}

/// List all available provider names
pub fn available_providers() -> Vec<&'static str> {
    vec!["fal", "openrouter", "mock"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_unknown_provider() {
        let config = EaselConfig::default();
        let err = create_provider("midjourney", &config).err().unwrap();
        assert!(matches!(err, EaselError::UnknownProvider { ref name, .. } if name == "midjourney"));
    }

    #[test]
    fn test_create_mock_provider() {
        let config = EaselConfig::default();
        let provider = create_provider("mock", &config).unwrap();
        assert_eq!(provider.name(), "mock");
        assert!(provider.supports(UnitKind::Upscale));
        assert!(provider.as_mock().is_some());
    }

    #[test]
    fn test_http_providers_need_keys() {
        let config = EaselConfig::default();
        assert!(create_provider("fal", &config).is_err());
        assert!(create_provider("openrouter", &config).is_err());
    }

    #[test]
    fn test_dispatch_reaches_binding() {
        let provider: Provider = mock::MockProvider::new("scripted").into();
        provider.as_mock().unwrap().fail_always(ProviderError::auth("revoked"));
        let err = provider
            .generate_image("x", None, &GenerationParams::default())
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthError { .. }));
        assert_eq!(provider.request_count(), 1);
    }
}
