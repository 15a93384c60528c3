//! OpenRouter image generation provider
//!
//! Sends generation requests through the chat-completions endpoint with an
//! `image_generation` extra block and pulls the image URL out of the reply.
//! A backup model is tried on the same provider when the primary model
//! rejects the request. High-quality requests lead with the backup model and
//! fall back to the standard one. Upscaling is not offered.

use super::http;
use crate::config::EaselConfig;
use crate::provider::*;
use easel_core::{EaselError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "black-forest-labs/flux-1-schnell";
const DEFAULT_BACKUP_MODEL: &str = "black-forest-labs/flux-1.1-pro";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const REFERER: &str = "https://github.com/easel-gen/easel";
const TITLE: &str = "Easel";

/// Provider backed by the OpenRouter API
pub struct OpenRouterProvider {
    api_key: String,
    base_url: String,
    model: String,
    backup_model: Option<String>,
    timeout: Duration,
    agent: ureq::Agent,
    requests: AtomicU64,
}

impl OpenRouterProvider {
    /// Create a new OpenRouterProvider from config
    pub fn from_config(config: &EaselConfig) -> Result<Self> {
        let api_key = config
            .api_key("openrouter")
            .ok_or_else(|| {
                EaselError::ConfigError(
                    "OpenRouter API key not configured. Set EASEL_OPENROUTER_API_KEY or add to .easel/config.toml"
                        .to_string(),
                )
            })?
            .to_string();

        let base_url = config
            .api_url("openrouter")
            .unwrap_or(DEFAULT_OPENROUTER_URL)
            .trim_end_matches('/')
            .to_string();

        let provider_config = config.providers.get("openrouter");
        let model = provider_config
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let backup_model = match provider_config.and_then(|p| p.backup_model.clone()) {
            Some(backup) if backup.is_empty() => None,
            Some(backup) => Some(backup),
            None => Some(DEFAULT_BACKUP_MODEL.to_string()),
        }
        .filter(|backup| *backup != model);

        let timeout = config.call_timeout("openrouter", DEFAULT_TIMEOUT);

        Ok(Self {
            api_key,
            base_url,
            model,
            backup_model,
            timeout,
            agent: http::build_agent(timeout),
            requests: AtomicU64::new(0),
        })
    }

    /// Lead model and fallback for a quality tier
    pub fn models_for(&self, quality: Quality) -> (&str, Option<&str>) {
        match (quality, self.backup_model.as_deref()) {
            (Quality::High, Some(backup)) => (backup, Some(self.model.as_str())),
            (_, backup) => (self.model.as_str(), backup),
        }
    }

    fn generate_with_model(
        &self,
        model: &str,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> std::result::Result<serde_json::Value, ProviderError> {
        let payload = build_chat_payload(model, prompt, negative_prompt, params);
        http::post_json(
            &self.agent,
            &format!("{}/chat/completions", self.base_url),
            &format!("Bearer {}", self.api_key),
            &[("HTTP-Referer", REFERER), ("X-Title", TITLE)],
            &payload,
            self.timeout,
        )
    }
}

/// Request body for a chat-completions image generation call
pub fn build_chat_payload(
    model: &str,
    prompt: &str,
    negative_prompt: Option<&str>,
    params: &GenerationParams,
) -> serde_json::Value {
    let mut generation = serde_json::json!({
        "width": params.width,
        "height": params.height,
        "steps": params.steps,
        "guidance_scale": params.guidance_scale,
        "num_images": 1
    });
    if let Some(seed) = params.seed {
        generation["seed"] = serde_json::json!(seed);
    }
    if let Some(negative) = negative_prompt.filter(|n| !n.is_empty()) {
        generation["negative_prompt"] = serde_json::json!(negative);
    }
    for (key, value) in &params.extra {
        generation[key.as_str()] = value.clone();
    }

    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "max_tokens": 1024,
        "temperature": 0.7,
        "extra": {"image_generation": generation}
    })
}

/// First image URL in the reply's message content
pub fn extract_image_url(response: &serde_json::Value) -> Option<String> {
    let content = response
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()?;
    find_url(content)
}

/// Build the `ImageResult` for a chat-completions reply produced by `model`
pub fn chat_result(
    response: &serde_json::Value,
    model: &str,
    params: &GenerationParams,
    elapsed: Duration,
) -> std::result::Result<ImageResult, ProviderError> {
    let url = extract_image_url(response).ok_or_else(|| {
        ProviderError::unavailable("No image URL found in OpenRouter response".to_string())
    })?;

    let mut metadata = BTreeMap::new();
    metadata.insert("steps".to_string(), params.steps.to_string());
    metadata.insert("guidance_scale".to_string(), params.guidance_scale.to_string());
    metadata.insert("quality".to_string(), params.quality.to_string());
    if let Some(used) = response.get("model").and_then(|m| m.as_str()) {
        metadata.insert("model_used".to_string(), used.to_string());
    }

    Ok(ImageResult {
        url,
        width: params.width,
        height: params.height,
        model: model.to_string(),
        provider: "openrouter".to_string(),
        seed: params.seed,
        duration_secs: elapsed.as_secs_f64(),
        metadata,
    })
}

fn find_url(content: &str) -> Option<String> {
    let start = content.find("https://").or_else(|| content.find("http://"))?;
    let url: String = content[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, ')' | '(' | '"' | '\'' | '<' | '>' | ']' | '['))
        .collect();
    Some(url.trim_end_matches(['.', ',', ';']).to_string())
}

impl ProviderAdapter for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn supports(&self, kind: UnitKind) -> bool {
        kind == UnitKind::TextToImage
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }

    fn generate_image(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> std::result::Result<ImageResult, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();

        let (mut model, fallback) = self.models_for(params.quality);
        let response = match self.generate_with_model(model, prompt, negative_prompt, params) {
            Err(ProviderError::InvalidRequest { message }) if fallback.is_some() => {
                let backup = fallback.unwrap_or(model);
                log::warn!(
                    "OpenRouter model {} rejected the request ({}), retrying with {}",
                    model,
                    message,
                    backup
                );
                model = backup;
                self.generate_with_model(model, prompt, negative_prompt, params)?
            }
            other => other?,
        };

        chat_result(&response, model, params, start.elapsed())
    }

    fn upscale_image(
        &self,
        _source_ref: &str,
        _factor: u32,
    ) -> std::result::Result<ImageResult, ProviderError> {
        Err(ProviderError::unsupported(
            "OpenRouter does not offer image upscaling",
        ))
    }

    fn check_health(&self) -> HealthStatus {
        http::probe(
            &format!("{}/models", self.base_url),
            Some(&format!("Bearer {}", self.api_key)),
            &[200],
        )
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}
