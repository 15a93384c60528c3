//! Mock provider for testing and dry runs
//!
//! Succeeds deterministically without any network calls. Failures and delays
//! can be scripted either as a FIFO queue (consumed one per call) or as rules
//! keyed on a prompt substring. When a render directory is set, successful
//! calls write a solid-color PNG there and return a `file://` URL.

use crate::provider::*;
use easel_core::{EaselError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const MOCK_MODEL: &str = "mock-diffusion-1";
const MOCK_HIGH_QUALITY_MODEL: &str = "mock-diffusion-1-hd";

/// What a single mock call does
#[derive(Debug, Clone, PartialEq)]
pub struct MockBehavior {
    /// Simulated latency before answering
    pub delay: Duration,
    /// Error to return after the delay, or `None` to succeed
    pub error: Option<ProviderError>,
}

impl MockBehavior {
    pub fn succeed() -> Self {
        Self {
            delay: Duration::ZERO,
            error: None,
        }
    }

    pub fn fail(error: ProviderError) -> Self {
        Self {
            delay: Duration::ZERO,
            error: Some(error),
        }
    }

    pub fn delay(delay: Duration) -> Self {
        Self { delay, error: None }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<MockBehavior>,
    rules: Vec<(String, MockBehavior)>,
}

/// A provider that answers locally from a script
pub struct MockProvider {
    name: String,
    supports_upscale: bool,
    call_timeout: Duration,
    render_dir: Option<PathBuf>,
    health: Mutex<HealthStatus>,
    script: Mutex<Script>,
    requests: AtomicU64,
    active: AtomicU64,
    peak_active: AtomicU64,
}

/// Marks one call as running for the lifetime of the guard
struct ActiveCall<'a>(&'a AtomicU64);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    /// A mock named `name` that supports both unit kinds
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supports_upscale: true,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            render_dir: None,
            health: Mutex::new(HealthStatus::Healthy),
            script: Mutex::new(Script::default()),
            requests: AtomicU64::new(0),
            active: AtomicU64::new(0),
            peak_active: AtomicU64::new(0),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn without_upscale(mut self) -> Self {
        self.supports_upscale = false;
        self
    }

    pub fn with_render_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.render_dir = Some(dir.into());
        self
    }

    /// Queue a behavior for the next unscripted call
    pub fn enqueue(&self, behavior: MockBehavior) {
        self.script.lock().queued.push_back(behavior);
    }

    /// Apply `behavior` to every call whose prompt (or upscale source) contains `needle`
    pub fn on_prompt(&self, needle: impl Into<String>, behavior: MockBehavior) {
        self.script.lock().rules.push((needle.into(), behavior));
    }

    /// Fail every call with `error`
    pub fn fail_always(&self, error: ProviderError) {
        self.on_prompt("", MockBehavior::fail(error));
    }

    /// Most calls ever running at the same time
    pub fn peak_concurrency(&self) -> u64 {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveCall<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        ActiveCall(&self.active)
    }

    /// Status returned by `check_health`
    pub fn set_health(&self, status: HealthStatus) {
        *self.health.lock() = status;
    }

    fn next_behavior(&self, input: &str) -> MockBehavior {
        let mut script = self.script.lock();
        if let Some(behavior) = script.queued.pop_front() {
            return behavior;
        }
        script
            .rules
            .iter()
            .find(|(needle, _)| input.contains(needle.as_str()))
            .map(|(_, behavior)| behavior.clone())
            .unwrap_or_else(MockBehavior::succeed)
    }

    /// Sleep out the scripted delay, capped at the call timeout
    fn run_script(&self, input: &str) -> std::result::Result<(), ProviderError> {
        let _active = self.enter();
        let behavior = self.next_behavior(input);
        if behavior.delay > self.call_timeout {
            std::thread::sleep(self.call_timeout);
            return Err(ProviderError::timeout(self.call_timeout));
        }
        if !behavior.delay.is_zero() {
            std::thread::sleep(behavior.delay);
        }
        match behavior.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn image_url(&self, seq: u64, width: u32, height: u32) -> std::result::Result<String, ProviderError> {
        let Some(dir) = &self.render_dir else {
            return Ok(format!("mock://{}/{}.png", self.name, seq));
        };
        let file_name = format!("{}-{}-{}.png", self.name, seq, uuid::Uuid::new_v4().simple());
        let path = generate_solid_png(dir, &file_name, width, height)
            .map_err(|e| ProviderError::unavailable(e.to_string()))?;
        let absolute = std::fs::canonicalize(&path).unwrap_or(path);
        Ok(format!("file://{}", absolute.display()))
    }

    fn result(
        &self,
        seq: u64,
        width: u32,
        height: u32,
        seed: Option<u64>,
        start: Instant,
        metadata: BTreeMap<String, String>,
    ) -> std::result::Result<ImageResult, ProviderError> {
        Ok(ImageResult {
            url: self.image_url(seq, width, height)?,
            width,
            height,
            model: MOCK_MODEL.to_string(),
            provider: self.name.clone(),
            seed,
            duration_secs: start.elapsed().as_secs_f64(),
            metadata,
        })
    }
}

impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, kind: UnitKind) -> bool {
        match kind {
            UnitKind::TextToImage => true,
            UnitKind::Upscale => self.supports_upscale,
        }
    }

    fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    fn generate_image(
        &self,
        prompt: &str,
        _negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> std::result::Result<ImageResult, ProviderError> {
        let seq = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        self.run_script(prompt)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("prompt".to_string(), prompt.to_string());
        let mut result = self.result(seq, params.width, params.height, params.seed, start, metadata)?;
        if params.quality == Quality::High {
            result.model = MOCK_HIGH_QUALITY_MODEL.to_string();
        }
        Ok(result)
    }

    fn upscale_image(
        &self,
        source_ref: &str,
        factor: u32,
    ) -> std::result::Result<ImageResult, ProviderError> {
        let seq = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.supports_upscale {
            return Err(ProviderError::unsupported(format!(
                "{} cannot upscale images",
                self.name
            )));
        }
        let start = Instant::now();
        self.run_script(source_ref)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), source_ref.to_string());
        metadata.insert("factor".to_string(), factor.to_string());
        let side = 512 * factor;
        self.result(seq, side, side, None, start, metadata)
    }

    fn check_health(&self) -> HealthStatus {
        *self.health.lock()
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Write a solid-color PNG whose color is derived from `name`
fn generate_solid_png(output_dir: &Path, name: &str, width: u32, height: u32) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let hash_val = name
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let color = image::Rgba([
        ((hash_val >> 16) & 0xFF) as u8,
        ((hash_val >> 8) & 0xFF) as u8,
        (hash_val & 0xFF) as u8,
        255,
    ]);

    let path = output_dir.join(name);
    let img = image::RgbaImage::from_pixel(width.max(1), height.max(1), color);
    img.save(&path)
        .map_err(|e| EaselError::ProviderError(format!("Failed to write mock PNG: {}", e)))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_succeeds_by_default() {
        let mock = MockProvider::new("mock");
        let result = mock
            .generate_image("a lighthouse", None, &GenerationParams::default())
            .unwrap();
        assert_eq!(result.provider, "mock");
        assert_eq!(result.model, MOCK_MODEL);
        assert_eq!(result.url, "mock://mock/1.png");
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_peak_concurrency_tracks_overlapping_calls() {
        let mock = MockProvider::new("mock");
        mock.on_prompt("", MockBehavior::delay(Duration::from_millis(40)));
        std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| mock.generate_image("x", None, &GenerationParams::default()));
            }
        });
        assert_eq!(mock.request_count(), 3);
        assert!(mock.peak_concurrency() >= 2);
        assert!(mock.peak_concurrency() <= 3);
    }

    #[test]
    fn test_high_quality_uses_hd_model() {
        let mock = MockProvider::new("mock");
        let params = GenerationParams {
            quality: Quality::High,
            ..Default::default()
        };
        let result = mock.generate_image("a lighthouse", None, &params).unwrap();
        assert_eq!(result.model, MOCK_HIGH_QUALITY_MODEL);
    }

    #[test]
    fn test_queue_takes_precedence_over_rules() {
        let mock = MockProvider::new("mock");
        mock.on_prompt("storm", MockBehavior::fail(ProviderError::unavailable("503")));
        mock.enqueue(MockBehavior::succeed());

        assert!(mock
            .generate_image("storm at sea", None, &GenerationParams::default())
            .is_ok());
        let err = mock
            .generate_image("storm at sea", None, &GenerationParams::default())
            .unwrap_err();
        assert!(matches!(err, ProviderError::ProviderUnavailable { .. }));
        assert!(mock
            .generate_image("calm sea", None, &GenerationParams::default())
            .is_ok());
    }

    #[test]
    fn test_delay_past_timeout_is_timeout() {
        let mock = MockProvider::new("slow").with_call_timeout(Duration::from_millis(20));
        mock.enqueue(MockBehavior::delay(Duration::from_secs(5)));

        let start = Instant::now();
        let err = mock
            .generate_image("x", None, &GenerationParams::default())
            .unwrap_err();
        assert_eq!(err, ProviderError::Timeout { after_ms: 20 });
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_upscale_unsupported() {
        let mock = MockProvider::new("text-only").without_upscale();
        assert!(!mock.supports(UnitKind::Upscale));
        let err = mock.upscale_image("file:///tmp/a.png", 2).unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_render_dir_writes_png() {
        let dir = std::env::temp_dir().join(format!("easel_mock_test_{}", uuid::Uuid::new_v4()));
        let mock = MockProvider::new("mock").with_render_dir(&dir);
        let params = GenerationParams {
            width: 64,
            height: 32,
            ..Default::default()
        };

        let result = mock.generate_image("x", None, &params).unwrap();
        let path = result.url.strip_prefix("file://").unwrap();
        let img = image::open(path).unwrap();
        assert_eq!((img.width(), img.height()), (64, 32));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_health_is_settable() {
        let mock = MockProvider::new("mock");
        assert_eq!(mock.check_health(), HealthStatus::Healthy);
        mock.set_health(HealthStatus::Degraded);
        assert_eq!(mock.check_health(), HealthStatus::Degraded);
    }
}
