//! Generation requests and their units
//!
//! A request is one logical operation (a concept batch, a storyboard, or an
//! upscale) made of ordered units. Each unit is one provider call and moves
//! through `pending -> in_flight -> succeeded | failed`, never backwards.

use crate::provider::{GenerationParams, ProviderError, Quality, UnitKind};
use crate::template::SceneAttributes;
use chrono::{DateTime, Utc};
use easel_core::{EaselError, RequestId, Result, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Upscale factors accepted by the providers
pub const UPSCALE_FACTORS: std::ops::RangeInclusive<u32> = 2..=8;

/// What kind of logical operation a request is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Concept,
    Storyboard,
    Upscale,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Concept => write!(f, "concept"),
            RequestKind::Storyboard => write!(f, "storyboard"),
            RequestKind::Upscale => write!(f, "upscale"),
        }
    }
}

/// Lifecycle of a single unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Succeeded | UnitStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        matches!(
            (self, next),
            (UnitStatus::Pending, UnitStatus::InFlight)
                | (UnitStatus::Pending, UnitStatus::Failed)
                | (UnitStatus::InFlight, UnitStatus::Succeeded)
                | (UnitStatus::InFlight, UnitStatus::Failed)
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Pending => write!(f, "pending"),
            UnitStatus::InFlight => write!(f, "in_flight"),
            UnitStatus::Succeeded => write!(f, "succeeded"),
            UnitStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a unit failed. Unit failures are recorded, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnitError {
    #[error("unknown style preset '{preset}'")]
    UnknownStylePreset { preset: String },

    /// AuthError or InvalidRequest from a provider; not retried elsewhere
    #[error("rejected by {provider}: {error}")]
    Rejected {
        provider: String,
        error: ProviderError,
    },

    #[error("no provider available{}", last_error.as_ref().map(|e| format!(" (last error: {})", e)).unwrap_or_default())]
    NoProviderAvailable { last_error: Option<ProviderError> },

    #[error("publish failed: {message}")]
    PublishError { message: String },

    #[error("cancelled before dispatch")]
    Cancelled,
}

/// Outcome of a succeeded unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    /// Published asset id (`sha256:<hex>` for the local publisher)
    pub asset_id: String,
    /// Published asset location
    pub url: String,
    /// Image reference the provider returned
    pub source_url: String,
    pub provider: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    pub duration_secs: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One atomic generation call within a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationUnit {
    pub unit_id: UnitId,
    pub kind: UnitKind,
    /// Raw input text before templating
    pub description: String,
    #[serde(default)]
    pub attributes: SceneAttributes,
    /// Per-unit style preset overriding the request preset
    #[serde(default)]
    pub style_override: Option<String>,
    /// Image to upscale (upscale units only)
    #[serde(default)]
    pub source_ref: Option<String>,
    /// Upscale factor (upscale units only)
    #[serde(default)]
    pub factor: Option<u32>,
    /// Enhanced prompt, filled in by the template engine
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub parameters: Option<GenerationParams>,
    pub status: UnitStatus,
    #[serde(default)]
    pub result: Option<UnitResult>,
    #[serde(default)]
    pub error: Option<UnitError>,
    /// Providers tried for this unit, in order
    #[serde(default)]
    pub attempted_providers: Vec<String>,
}

impl GenerationUnit {
    /// A pending text-to-image unit
    pub fn text_to_image(unit_id: UnitId, description: impl Into<String>) -> Self {
        Self {
            unit_id,
            kind: UnitKind::TextToImage,
            description: description.into(),
            attributes: SceneAttributes::default(),
            style_override: None,
            source_ref: None,
            factor: None,
            prompt: None,
            negative_prompt: None,
            parameters: None,
            status: UnitStatus::Pending,
            result: None,
            error: None,
            attempted_providers: Vec::new(),
        }
    }

    /// A pending upscale unit
    pub fn upscale(unit_id: UnitId, source_ref: impl Into<String>, factor: u32) -> Self {
        let mut unit = Self::text_to_image(unit_id, format!("Upscale {}x", factor));
        unit.kind = UnitKind::Upscale;
        unit.source_ref = Some(source_ref.into());
        unit.factor = Some(factor);
        unit
    }

    pub fn with_attributes(mut self, attributes: SceneAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style_override = Some(style.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move `pending -> in_flight`. Returns false (unit unchanged) otherwise.
    pub fn mark_in_flight(&mut self) -> bool {
        if !self.status.can_transition_to(UnitStatus::InFlight) {
            return false;
        }
        self.status = UnitStatus::InFlight;
        true
    }

    /// Move `in_flight -> succeeded`. Returns false (unit unchanged) otherwise.
    pub fn succeed(&mut self, result: UnitResult, attempted: Vec<String>) -> bool {
        if !self.status.can_transition_to(UnitStatus::Succeeded) {
            return false;
        }
        self.status = UnitStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
        self.attempted_providers = attempted;
        true
    }

    /// Move `pending | in_flight -> failed`. Returns false (unit unchanged) otherwise.
    pub fn fail(&mut self, error: UnitError, attempted: Vec<String>) -> bool {
        if !self.status.can_transition_to(UnitStatus::Failed) {
            return false;
        }
        self.status = UnitStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.attempted_providers = attempted;
        true
    }
}

/// One storyboard scene as supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSpec {
    pub description: String,
    #[serde(flatten)]
    pub attributes: SceneAttributes,
    /// Per-scene style preset
    #[serde(default)]
    pub style: Option<String>,
}

impl SceneSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            attributes: SceneAttributes::default(),
            style: None,
        }
    }
}

/// One logical orchestrated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: RequestId,
    pub kind: RequestKind,
    #[serde(default)]
    pub project_id: Option<String>,
    pub units: Vec<GenerationUnit>,
    /// Preset applied to units without a style override
    pub style_preset: String,
    /// Provider to try first, if eligible
    #[serde(default)]
    pub provider_preference: Option<String>,
    /// Overrides the preset's aspect ratio
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Output tier passed to every unit
    #[serde(default)]
    pub quality: Quality,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// A request over caller-built units
    pub fn new(
        kind: RequestKind,
        units: Vec<GenerationUnit>,
        style_preset: impl Into<String>,
    ) -> Result<Self> {
        if units.is_empty() {
            return Err(EaselError::InvalidRequest(
                "a request needs at least one unit".to_string(),
            ));
        }
        Ok(Self {
            request_id: RequestId::new(),
            kind,
            project_id: None,
            units,
            style_preset: style_preset.into(),
            provider_preference: None,
            aspect_ratio: None,
            seed: None,
            quality: Quality::Standard,
            created_at: Utc::now(),
        })
    }

    /// `variations` renderings of one prompt
    pub fn concept(prompt: &str, variations: usize, style_preset: impl Into<String>) -> Result<Self> {
        if prompt.trim().is_empty() {
            return Err(EaselError::InvalidRequest(
                "concept prompt is empty".to_string(),
            ));
        }
        let units = (0..variations)
            .map(|i| GenerationUnit::text_to_image(UnitId::variation(i), prompt))
            .collect();
        Self::new(RequestKind::Concept, units, style_preset)
    }

    /// One frame per scene, in scene order
    pub fn storyboard(scenes: Vec<SceneSpec>, style_preset: impl Into<String>) -> Result<Self> {
        let units = scenes
            .into_iter()
            .enumerate()
            .map(|(i, scene)| {
                let mut unit = GenerationUnit::text_to_image(UnitId::scene(i), scene.description)
                    .with_attributes(scene.attributes);
                unit.style_override = scene.style;
                unit
            })
            .collect();
        Self::new(RequestKind::Storyboard, units, style_preset)
    }

    /// Upscale one existing image
    pub fn upscale(source_ref: &str, factor: u32, style_preset: impl Into<String>) -> Result<Self> {
        if source_ref.trim().is_empty() {
            return Err(EaselError::InvalidRequest(
                "upscale source is empty".to_string(),
            ));
        }
        if !UPSCALE_FACTORS.contains(&factor) {
            return Err(EaselError::InvalidRequest(format!(
                "upscale factor {} outside {}..={}",
                factor,
                UPSCALE_FACTORS.start(),
                UPSCALE_FACTORS.end()
            )));
        }
        let unit = GenerationUnit::upscale(UnitId::upscale(0), source_ref, factor);
        Self::new(RequestKind::Upscale, vec![unit], style_preset)
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_provider_preference(mut self, provider: impl Into<String>) -> Self {
        self.provider_preference = Some(provider.into());
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(aspect_ratio.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Preset a unit will be templated with
    pub fn style_for<'a>(&'a self, unit: &'a GenerationUnit) -> &'a str {
        unit.style_override.as_deref().unwrap_or(&self.style_preset)
    }
}
