//! Provider adapter trait and request/result types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The kind of call a generation unit makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    TextToImage,
    Upscale,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::TextToImage => write!(f, "text_to_image"),
            UnitKind::Upscale => write!(f, "upscale"),
        }
    }
}

/// Requested output tier; providers map it onto their model line-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    High,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Standard => write!(f, "standard"),
            Quality::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Quality::Standard),
            "high" => Ok(Quality::High),
            other => Err(format!(
                "unknown quality '{}'; valid values: standard, high",
                other
            )),
        }
    }
}

/// Parameters sent to a provider alongside the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f64,
    pub aspect_ratio: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub quality: Quality,
    /// Provider-specific extras, passed through untouched
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            steps: 25,
            guidance_scale: 7.5,
            aspect_ratio: "1:1".to_string(),
            seed: None,
            quality: Quality::Standard,
            extra: BTreeMap::new(),
        }
    }
}

/// The result of a successful provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    /// Where the image bytes live: `https://`, `file://` or `data:` reference
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Model name reported by the provider
    pub model: String,
    /// Provider name
    pub provider: String,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Wall-clock time of the call in seconds
    pub duration_secs: f64,
    /// Any provider-specific metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Health reported by a provider or tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Selection rank, lower is preferred
    pub fn rank(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Failure taxonomy shared by every provider binding
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("rate limited{}", retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication failed: {message}")]
    AuthError { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("unsupported operation: {message}")]
    UnsupportedOperation { message: String },
}

impl ProviderError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    /// Provider-level outage signals: these count against health and drive failover
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::ProviderUnavailable { .. }
        )
    }

    /// Whether another provider may be tried for the same unit
    pub fn allows_failover(&self) -> bool {
        self.is_transient() || matches!(self, ProviderError::UnsupportedOperation { .. })
    }

    /// Provider-reported backoff window, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Capability interface implemented by each provider binding (fal, openrouter, mock)
pub trait ProviderAdapter: Send + Sync {
    /// Provider name (e.g. "fal", "openrouter", "mock")
    fn name(&self) -> &str;

    /// Whether this binding can run units of the given kind
    fn supports(&self, kind: UnitKind) -> bool;

    /// Per-call timeout; exceeding it yields `ProviderError::Timeout`
    fn call_timeout(&self) -> Duration;

    /// Generate one image from an enhanced prompt (blocks until complete)
    fn generate_image(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> Result<ImageResult, ProviderError>;

    /// Upscale an existing image by an integer factor
    fn upscale_image(&self, source_ref: &str, factor: u32) -> Result<ImageResult, ProviderError>;

    /// Probe the backend. Never fails; bounded by a short fixed timeout.
    fn check_health(&self) -> HealthStatus;

    /// Number of generate/upscale calls made through this adapter
    fn request_count(&self) -> u64;
}
