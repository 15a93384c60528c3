//! fal.ai image generation provider
//!
//! Text-to-image through the Flux model family and upscaling through the
//! clarity/esrgan upscalers. Calls are synchronous: fal's `fal.run` endpoint
//! answers with the finished image.

use super::http;
use crate::config::EaselConfig;
use crate::provider::*;
use easel_core::{EaselError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const DEFAULT_FAL_URL: &str = "https://fal.run/";
const DEFAULT_MODEL: &str = "fal-ai/flux/schnell";
const DEFAULT_HIGH_QUALITY_MODEL: &str = "fal-ai/flux/dev";
const CLARITY_UPSCALER: &str = "fal-ai/clarity-upscaler";
const ESRGAN_UPSCALER: &str = "fal-ai/esrgan";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider backed by the fal.ai REST API
pub struct FalProvider {
    api_key: String,
    base_url: String,
    model: String,
    high_quality_model: String,
    timeout: Duration,
    agent: ureq::Agent,
    requests: AtomicU64,
}

impl FalProvider {
    /// Create a new FalProvider from config
    pub fn from_config(config: &EaselConfig) -> Result<Self> {
        let api_key = config
            .api_key("fal")
            .ok_or_else(|| {
                EaselError::ConfigError(
                    "fal API key not configured. Set EASEL_FAL_API_KEY or add to .easel/config.toml"
                        .to_string(),
                )
            })?
            .to_string();

        let mut base_url = config.api_url("fal").unwrap_or(DEFAULT_FAL_URL).to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let provider_config = config.providers.get("fal");
        let model = provider_config
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let high_quality_model = provider_config
            .and_then(|p| p.high_quality_model.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_HIGH_QUALITY_MODEL.to_string());

        let timeout = config.call_timeout("fal", DEFAULT_TIMEOUT);

        Ok(Self {
            api_key,
            base_url,
            model,
            high_quality_model,
            timeout,
            agent: http::build_agent(timeout),
            requests: AtomicU64::new(0),
        })
    }

    /// Text-to-image model for a quality tier
    pub fn model_for(&self, quality: Quality) -> &str {
        match quality {
            Quality::Standard => &self.model,
            Quality::High => &self.high_quality_model,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}{}", self.base_url, model)
    }

    fn post(&self, model: &str, payload: &serde_json::Value) -> std::result::Result<serde_json::Value, ProviderError> {
        http::post_json(
            &self.agent,
            &self.endpoint(model),
            &format!("Key {}", self.api_key),
            &[],
            payload,
            self.timeout,
        )
    }
}

/// Model used for an upscale of `factor`
pub fn upscale_model(factor: u32) -> &'static str {
    if factor >= 4 {
        ESRGAN_UPSCALER
    } else {
        CLARITY_UPSCALER
    }
}

/// Request body for a text-to-image call
pub fn build_generation_payload(
    prompt: &str,
    negative_prompt: Option<&str>,
    params: &GenerationParams,
) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "prompt": prompt,
        "image_size": {
            "width": params.width,
            "height": params.height
        },
        "num_inference_steps": params.steps,
        "guidance_scale": params.guidance_scale,
        "num_images": 1,
        "enable_safety_checker": true,
        "format": "png"
    });

    if let Some(seed) = params.seed {
        payload["seed"] = serde_json::json!(seed);
    }
    if let Some(negative) = negative_prompt.filter(|n| !n.is_empty()) {
        payload["negative_prompt"] = serde_json::json!(negative);
    }
    for (key, value) in &params.extra {
        payload[key.as_str()] = value.clone();
    }
    payload
}

/// Image fields pulled out of a fal response
#[derive(Debug, Clone, PartialEq)]
pub struct FalImage {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Extract the first image from a text-to-image response (`images[0]`)
pub fn parse_generation_response(response: &serde_json::Value) -> Option<FalImage> {
    let image = response.get("images")?.as_array()?.first()?;
    parse_image(image)
}

/// Extract the image from an upscale response (`image`)
pub fn parse_upscale_response(response: &serde_json::Value) -> Option<FalImage> {
    parse_image(response.get("image")?)
}

/// Build the `ImageResult` for a text-to-image response from `model`
pub fn generation_result(
    response: &serde_json::Value,
    model: &str,
    params: &GenerationParams,
    elapsed: Duration,
) -> std::result::Result<ImageResult, ProviderError> {
    let image = parse_generation_response(response).ok_or_else(|| {
        ProviderError::unavailable("No images returned from fal".to_string())
    })?;

    let mut metadata = BTreeMap::new();
    metadata.insert("steps".to_string(), params.steps.to_string());
    metadata.insert("guidance_scale".to_string(), params.guidance_scale.to_string());
    metadata.insert("quality".to_string(), params.quality.to_string());
    if let Some(id) = request_id(response) {
        metadata.insert("fal_request_id".to_string(), id);
    }

    Ok(ImageResult {
        url: image.url,
        width: image.width.unwrap_or(params.width),
        height: image.height.unwrap_or(params.height),
        model: model.to_string(),
        provider: "fal".to_string(),
        seed: response.get("seed").and_then(|s| s.as_u64()).or(params.seed),
        duration_secs: elapsed.as_secs_f64(),
        metadata,
    })
}

fn parse_image(image: &serde_json::Value) -> Option<FalImage> {
    Some(FalImage {
        url: image.get("url")?.as_str()?.to_string(),
        width: image.get("width").and_then(|w| w.as_u64()).map(|w| w as u32),
        height: image.get("height").and_then(|h| h.as_u64()).map(|h| h as u32),
    })
}

fn request_id(response: &serde_json::Value) -> Option<String> {
    response
        .get("request_id")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
}

impl ProviderAdapter for FalProvider {
    fn name(&self) -> &str {
        "fal"
    }

    fn supports(&self, _kind: UnitKind) -> bool {
        true
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

        let model = self.model_for(params.quality);
        let payload = build_generation_payload(prompt, negative_prompt, params);
        let response = self.post(model, &payload)?;

        generation_result(&response, model, params, start.elapsed())
    }

    fn upscale_image(
        &self,
        source_ref: &str,
        factor: u32,
    ) -> std::result::Result<ImageResult, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();

        let model = upscale_model(factor);
        let payload = serde_json::json!({
            "image_url": source_ref,
            "scale": factor,
            "format": "png"
        });
        let response = self.post(model, &payload)?;

        let image = parse_upscale_response(&response).ok_or_else(|| {
            ProviderError::unavailable("No image returned from fal upscaler".to_string())
        })?;

        let mut metadata = BTreeMap::new();
        metadata.insert("original_url".to_string(), source_ref.to_string());
        metadata.insert("upscale_factor".to_string(), factor.to_string());
        if let Some(id) = request_id(&response) {
            metadata.insert("fal_request_id".to_string(), id);
        }

        Ok(ImageResult {
            url: image.url,
            width: image.width.unwrap_or(0),
            height: image.height.unwrap_or(0),
            model: model.to_string(),
            provider: "fal".to_string(),
            seed: None,
            duration_secs: start.elapsed().as_secs_f64(),
            metadata,
        })
    }

    fn check_health(&self) -> HealthStatus {
        // A GET on a generation endpoint answers 422 when the service is up
        http::probe(
            &self.endpoint(&self.model),
            Some(&format!("Key {}", self.api_key)),
            &[200, 422],
        )
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generation_response() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{
            "images": [
                {
                    "url": "https://fal.media/files/generated.png",
                    "width": 1024,
                    "height": 576,
                    "content_type": "image/png"
                }
            ],
            "seed": 42,
            "has_nsfw_concepts": [false],
            "prompt": "a lighthouse"
        }"#,
        )
        .unwrap();

        let image = parse_generation_response(&json).unwrap();
        assert_eq!(image.url, "https://fal.media/files/generated.png");
        assert_eq!(image.width, Some(1024));
        assert_eq!(image.height, Some(576));
    }

    #[test]
    fn test_parse_generation_response_invalid() {
        let json = serde_json::json!({"error": "something went wrong"});
        assert!(parse_generation_response(&json).is_none());
        let json = serde_json::json!({"images": []});
        assert!(parse_generation_response(&json).is_none());
    }

    #[test]
    fn test_parse_upscale_response() {
        let json = serde_json::json!({
            "image": {"url": "https://fal.media/files/up.png", "width": 2048}
        });
        let image = parse_upscale_response(&json).unwrap();
        assert_eq!(image.url, "https://fal.media/files/up.png");
        assert_eq!(image.width, Some(2048));
        assert_eq!(image.height, None);
    }

    #[test]
    fn test_upscale_model_selection() {
        assert_eq!(upscale_model(2), CLARITY_UPSCALER);
        assert_eq!(upscale_model(3), CLARITY_UPSCALER);
        assert_eq!(upscale_model(4), ESRGAN_UPSCALER);
        assert_eq!(upscale_model(8), ESRGAN_UPSCALER);
    }

    #[test]
    fn test_generation_payload() {
        let mut params = GenerationParams {
            width: 1024,
            height: 576,
            seed: Some(7),
            ..Default::default()
        };
        params
            .extra
            .insert("sync_mode".to_string(), serde_json::json!(true));

        let payload = build_generation_payload("a harbour", Some("blurry"), &params);
        assert_eq!(payload["image_size"]["height"], 576);
        assert_eq!(payload["seed"], 7);
        assert_eq!(payload["negative_prompt"], "blurry");
        assert_eq!(payload["sync_mode"], true);

        let payload = build_generation_payload("a harbour", Some(""), &GenerationParams::default());
        assert!(payload.get("negative_prompt").is_none());
        assert!(payload.get("seed").is_none());
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = EaselConfig::default();
        assert!(FalProvider::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_normalizes_url() {
        let mut config = EaselConfig::default();
        let entry = config.providers.entry("fal".to_string()).or_default();
        entry.api_key = Some("k".to_string());
        entry.api_url = Some("https://fal.example.com".to_string());
        entry.timeout_secs = Some(12);

        let provider = FalProvider::from_config(&config).unwrap();
        assert_eq!(provider.endpoint("fal-ai/flux/dev"), "https://fal.example.com/fal-ai/flux/dev");
        assert_eq!(provider.call_timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_quality_selects_model() {
        let mut config = EaselConfig::default();
        config.providers.entry("fal".to_string()).or_default().api_key = Some("k".to_string());
        let provider = FalProvider::from_config(&config).unwrap();
        assert_eq!(provider.model_for(Quality::Standard), DEFAULT_MODEL);
        assert_eq!(provider.model_for(Quality::High), DEFAULT_HIGH_QUALITY_MODEL);

        let params = GenerationParams {
            quality: Quality::High,
            ..Default::default()
        };
        let response = serde_json::json!({
            "images": [{"url": "https://fal.media/files/a.png", "width": 1024, "height": 1024}]
        });
        let model = provider.model_for(params.quality);
        let result = generation_result(&response, model, &params, Duration::from_millis(5)).unwrap();
        assert_eq!(result.model, "fal-ai/flux/dev");
        assert_eq!(result.metadata["quality"], "high");

        config.providers.get_mut("fal").unwrap().high_quality_model =
            Some("fal-ai/flux-pro".to_string());
        let provider = FalProvider::from_config(&config).unwrap();
        assert_eq!(provider.model_for(Quality::High), "fal-ai/flux-pro");
    }
}
