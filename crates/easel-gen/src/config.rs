//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `EASEL_{PROVIDER}_API_KEY` (or `{PROVIDER}_API_KEY`)
//! 2. Project-local: `.easel/config.toml`
//! 3. Global: `~/.easel/config.toml`

use easel_core::{EaselError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provider names the environment layer knows about
const ENV_PROVIDERS: [&str; 2] = ["fal", "openrouter"];

/// Provider-specific configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    /// Default text-to-image model
    #[serde(default)]
    pub model: Option<String>,
    /// Secondary model (openrouter)
    #[serde(default)]
    pub backup_model: Option<String>,
    /// Model used for `quality = "high"` requests (fal)
    #[serde(default)]
    pub high_quality_model: Option<String>,
    /// Per-call timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory the mock provider renders PNGs into
    #[serde(default)]
    pub render_dir: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Engine-wide execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent execution slots shared by every request
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Provider priority, highest first. Empty means every enabled provider
    /// in the order `fal`, `openrouter`.
    #[serde(default)]
    pub provider_order: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            provider_order: Vec::new(),
        }
    }
}

fn default_max_in_flight() -> usize {
    3
}

/// Provider health thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: u32,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_after: default_degraded_after(),
            unhealthy_after: default_unhealthy_after(),
            failure_window_secs: default_failure_window_secs(),
        }
    }
}

fn default_degraded_after() -> u32 {
    1
}
fn default_unhealthy_after() -> u32 {
    3
}
fn default_failure_window_secs() -> u64 {
    60
}

/// Where published assets land
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_store_root")]
    pub store_root: String,
    #[serde(default = "default_assets_root")]
    pub assets_root: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            assets_root: default_assets_root(),
        }
    }
}

fn default_store_root() -> String {
    ".easel/assets".to_string()
}
fn default_assets_root() -> String {
    "assets".to_string()
}

/// Style preset source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesConfig {
    #[serde(default = "default_styles_dir")]
    pub dir: String,
    #[serde(default = "default_style")]
    pub default: String,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            dir: default_styles_dir(),
            default: default_style(),
        }
    }
}

fn default_styles_dir() -> String {
    "styles".to_string()
}
fn default_style() -> String {
    "cinematic".to_string()
}

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EaselConfigFile {
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub health: Option<HealthConfig>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub publish: Option<PublishConfig>,
    #[serde(default)]
    pub styles: Option<StylesConfig>,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct EaselConfig {
    pub engine: EngineConfig,
    pub health: HealthConfig,
    pub providers: HashMap<String, ProviderConfig>,
    pub publish: PublishConfig,
    pub styles: StylesConfig,
}

impl EaselConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = EaselConfigFile::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let global = Self::load_file(&global_path)?;
                Self::merge_into(&mut config, global);
            }
        }

        let local_path = PathBuf::from(".easel/config.toml");
        if local_path.exists() {
            let local = Self::load_file(&local_path)?;
            Self::merge_into(&mut config, local);
        }

        Self::apply_env_overrides(&mut config);
        Ok(Self::resolve(config))
    }

    /// Load config from a specific file path only (for testing)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(Self::resolve(config))
    }

    /// Get API key for a provider
    pub fn api_key(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_key.as_deref())
    }

    /// Get API URL for a provider (or None to use its default)
    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_url.as_deref())
    }

    /// Check if a provider is enabled
    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.providers
            .get(provider_name)
            .map(|p| p.enabled)
            .unwrap_or(true)
    }

    /// Per-call timeout for a provider, falling back to `default`
    pub fn call_timeout(&self, provider_name: &str, default: Duration) -> Duration {
        self.providers
            .get(provider_name)
            .and_then(|p| p.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Provider names in priority order.
    ///
    /// Uses `engine.provider_order` when set, otherwise every built-in HTTP
    /// provider that has an API key. Disabled providers are dropped either way.
    pub fn provider_order(&self) -> Vec<String> {
        let candidates: Vec<String> = if self.engine.provider_order.is_empty() {
            ENV_PROVIDERS
                .iter()
                .filter(|name| self.api_key(name).is_some())
                .map(|name| name.to_string())
                .collect()
        } else {
            self.engine.provider_order.clone()
        };

        candidates
            .into_iter()
            .filter(|name| self.is_enabled(name))
            .collect()
    }

    /// Failure window for health tracking
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.health.failure_window_secs)
    }

    fn resolve(file: EaselConfigFile) -> Self {
        EaselConfig {
            engine: file.engine.unwrap_or_default(),
            health: file.health.unwrap_or_default(),
            providers: file.providers,
            publish: file.publish.unwrap_or_default(),
            styles: file.styles.unwrap_or_default(),
        }
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".easel").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<EaselConfigFile> {
        let content = std::fs::read_to_string(path)?;
        let config: EaselConfigFile = toml::from_str(&content).map_err(|e| {
            EaselError::ConfigError(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    fn merge_into(base: &mut EaselConfigFile, overlay: EaselConfigFile) {
        for (name, provider) in overlay.providers {
            let entry = base.providers.entry(name).or_default();
            if provider.api_key.is_some() {
                entry.api_key = provider.api_key;
            }
            if provider.api_url.is_some() {
                entry.api_url = provider.api_url;
            }
            if provider.model.is_some() {
                entry.model = provider.model;
            }
            if provider.backup_model.is_some() {
                entry.backup_model = provider.backup_model;
            }
            if provider.high_quality_model.is_some() {
                entry.high_quality_model = provider.high_quality_model;
            }
            if provider.timeout_secs.is_some() {
                entry.timeout_secs = provider.timeout_secs;
            }
            if provider.render_dir.is_some() {
                entry.render_dir = provider.render_dir;
            }
            entry.enabled = provider.enabled;
        }

        // Whole tables replace lower layers
        if overlay.engine.is_some() {
            base.engine = overlay.engine;
        }
        if overlay.health.is_some() {
            base.health = overlay.health;
        }
        if overlay.publish.is_some() {
            base.publish = overlay.publish;
        }
        if overlay.styles.is_some() {
            base.styles = overlay.styles;
        }
    }

    fn apply_env_overrides(config: &mut EaselConfigFile) {
        for name in &ENV_PROVIDERS {
            let upper = name.to_uppercase();
            let key = std::env::var(format!("EASEL_{}_API_KEY", upper))
                .or_else(|_| std::env::var(format!("{}_API_KEY", upper)));
            if let Ok(key) = key {
                let entry = config.providers.entry(name.to_string()).or_default();
                entry.api_key = Some(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_config(content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("easel_config_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_config_from_file() {
        let config_str = r#"
[engine]
max_in_flight = 5
provider_order = ["fal", "openrouter"]

[health]
unhealthy_after = 4

[providers.fal]
api_key = "fal-test-key"
api_url = "https://fal.example.com/"
timeout_secs = 30

[providers.openrouter]
api_key = "or-test"
enabled = false

[styles]
dir = "my-styles"
default = "concept-art"
"#;
        let path = temp_config(config_str);
        let config = EaselConfig::load_from_file(&path).unwrap();

        assert_eq!(config.engine.max_in_flight, 5);
        assert_eq!(config.health.unhealthy_after, 4);
        assert_eq!(config.health.degraded_after, 1);
        assert_eq!(config.api_url("fal"), Some("https://fal.example.com/"));
        assert_eq!(
            config.call_timeout("fal", Duration::from_secs(60)),
            Duration::from_secs(30)
        );
        assert!(!config.is_enabled("openrouter"));
        assert_eq!(config.provider_order(), vec!["fal".to_string()]);
        assert_eq!(config.styles.default, "concept-art");

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_defaults() {
        let config = EaselConfig::default();
        assert_eq!(config.engine.max_in_flight, 3);
        assert_eq!(config.health.degraded_after, 1);
        assert_eq!(config.health.unhealthy_after, 3);
        assert_eq!(config.failure_window(), Duration::from_secs(60));
        assert_eq!(config.publish.store_root, ".easel/assets");
        assert_eq!(config.styles.default, "cinematic");
        assert!(config.is_enabled("nonexistent"));
        assert_eq!(config.api_key("nonexistent"), None);
    }

    #[test]
    fn test_env_var_override() {
        let config_str = r#"
[providers.openrouter]
api_key = "file-key"
"#;
        let path = temp_config(config_str);

        std::env::set_var("EASEL_OPENROUTER_API_KEY", "env-key-override");
        let config = EaselConfig::load_from_file(&path).unwrap();
        assert_eq!(config.api_key("openrouter"), Some("env-key-override"));

        std::env::remove_var("EASEL_OPENROUTER_API_KEY");
        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_merge_keeps_lower_layer_keys() {
        let mut base: EaselConfigFile = toml::from_str(
            r#"
[providers.fal]
api_key = "global-key"
model = "fal-ai/flux/dev"
"#,
        )
        .unwrap();
        let overlay: EaselConfigFile = toml::from_str(
            r#"
[providers.fal]
timeout_secs = 15

[engine]
max_in_flight = 8
"#,
        )
        .unwrap();

        EaselConfig::merge_into(&mut base, overlay);
        let config = EaselConfig::resolve(base);

        assert_eq!(config.api_key("fal"), Some("global-key"));
        assert_eq!(
            config.providers["fal"].model.as_deref(),
            Some("fal-ai/flux/dev")
        );
        assert_eq!(config.providers["fal"].timeout_secs, Some(15));
        assert_eq!(config.engine.max_in_flight, 8);
    }
}
