//! Style presets and prompt templating
//!
//! A style preset defines a base prompt, style modifiers, a negative prompt
//! and recommended generation settings. The template engine turns a raw
//! description plus optional scene attributes into the final prompt and
//! parameter set. It does no I/O after construction, so identical inputs
//! always produce identical outputs.

use crate::provider::{GenerationParams, Quality};
use easel_core::{EaselError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const BASE_SIZE: u32 = 1024;
const DESCRIPTION_PLACEHOLDER: &str = "{scene_description}";

/// A registered style preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylePreset {
    /// Human-readable name (e.g., "Concept Art")
    pub name: String,
    /// Base prompt containing `{scene_description}`
    pub base_prompt: String,
    /// Modifiers appended after the description and scene attributes
    #[serde(default)]
    pub style_modifiers: Vec<String>,
    /// Negative prompt (things to avoid)
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
}

fn default_steps() -> u32 {
    25
}
fn default_guidance_scale() -> f64 {
    7.5
}
fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

/// Optional scene metadata folded into the prompt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneAttributes {
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub camera_angle: Option<String>,
    #[serde(default)]
    pub lighting: Option<String>,
    /// Any further descriptors, appended in key order
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl SceneAttributes {
    pub fn is_empty(&self) -> bool {
        self.mood.is_none()
            && self.camera_angle.is_none()
            && self.lighting.is_none()
            && self.extra.is_empty()
    }

    fn phrases(&self) -> Vec<String> {
        let mut phrases = Vec::new();
        if let Some(mood) = self.mood.as_deref().filter(|s| !s.is_empty()) {
            phrases.push(format!("{} mood", mood));
        }
        if let Some(angle) = self.camera_angle.as_deref().filter(|s| !s.is_empty()) {
            phrases.push(angle.to_string());
        }
        if let Some(lighting) = self.lighting.as_deref().filter(|s| !s.is_empty()) {
            phrases.push(lighting.to_string());
        }
        for (key, value) in &self.extra {
            if !value.is_empty() {
                phrases.push(format!("{}: {}", key.replace('_', " "), value));
            }
        }
        phrases
    }
}

/// Output of template application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub params: GenerationParams,
    pub style_name: String,
}

/// TOML file wrapper for `*.style.toml`
#[derive(Debug, Deserialize)]
struct StyleFile {
    style: StyleFileEntry,
}

#[derive(Debug, Deserialize)]
struct StyleFileEntry {
    /// Preset key used in requests (e.g., "noir")
    id: String,
    #[serde(flatten)]
    preset: StylePreset,
}

/// Preset lookup plus prompt assembly
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    presets: BTreeMap<String, StylePreset>,
}

impl TemplateEngine {
    /// An engine with no presets registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// An engine preloaded with the built-in presets
    pub fn with_builtin_presets() -> Self {
        let mut engine = Self::empty();
        for (id, preset) in builtin_presets() {
            engine.register(id, preset);
        }
        engine
    }

    /// Built-in presets plus every `*.style.toml` in `dir` (missing dir is fine).
    /// File presets override built-ins with the same id.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut engine = Self::with_builtin_presets();
        if !dir.exists() {
            return Ok(engine);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(".style.toml"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            let (id, preset) = Self::load_file(&path)?;
            log::debug!("Loaded style preset '{}' from {}", id, path.display());
            engine.register(id, preset);
        }
        Ok(engine)
    }

    fn load_file(path: &Path) -> Result<(String, StylePreset)> {
        let content = std::fs::read_to_string(path)?;
        let file: StyleFile = toml::from_str(&content).map_err(|e| {
            EaselError::StyleError(format!(
                "Failed to parse style preset {}: {}",
                path.display(),
                e
            ))
        })?;
        if !file.style.preset.base_prompt.contains(DESCRIPTION_PLACEHOLDER) {
            return Err(EaselError::StyleError(format!(
                "Style preset {} has no {} placeholder",
                path.display(),
                DESCRIPTION_PLACEHOLDER
            )));
        }
        Ok((file.style.id, file.style.preset))
    }

    /// Register or replace a preset
    pub fn register(&mut self, id: impl Into<String>, preset: StylePreset) {
        self.presets.insert(id.into(), preset);
    }

    pub fn get(&self, id: &str) -> Option<&StylePreset> {
        self.presets.get(id)
    }

    /// Registered preset ids in sorted order
    pub fn preset_ids(&self) -> Vec<&str> {
        self.presets.keys().map(|k| k.as_str()).collect()
    }

    /// Build the enhanced prompt and parameter set for one unit
    pub fn apply(
        &self,
        description: &str,
        style_preset: &str,
        attributes: &SceneAttributes,
    ) -> Result<TemplateOutput> {
        let preset = self
            .presets
            .get(style_preset)
            .ok_or_else(|| EaselError::UnknownStylePreset(style_preset.to_string()))?;

        let mut parts = vec![preset
            .base_prompt
            .replace(DESCRIPTION_PLACEHOLDER, description.trim())];
        parts.extend(attributes.phrases());
        parts.extend(preset.style_modifiers.iter().cloned());

        let (width, height) = dimensions_for_aspect_ratio(&preset.aspect_ratio, BASE_SIZE);

        Ok(TemplateOutput {
            prompt: parts.join(", "),
            negative_prompt: preset.negative_prompt.clone(),
            params: GenerationParams {
                width,
                height,
                steps: preset.steps,
                guidance_scale: preset.guidance_scale,
                aspect_ratio: preset.aspect_ratio.clone(),
                seed: None,
                quality: Quality::Standard,
                extra: BTreeMap::new(),
            },
            style_name: preset.name.clone(),
        })
    }
}

/// Width and height for an aspect ratio string such as "16:9".
///
/// The longer side gets `base_size`; both sides are snapped down to a multiple
/// of 8. Unparseable ratios fall back to a square.
pub fn dimensions_for_aspect_ratio(aspect_ratio: &str, base_size: u32) -> (u32, u32) {
    let parsed = aspect_ratio.split_once(':').and_then(|(w, h)| {
        let w: u32 = w.trim().parse().ok()?;
        let h: u32 = h.trim().parse().ok()?;
        (w > 0 && h > 0).then_some((w, h))
    });

    let Some((w_ratio, h_ratio)) = parsed else {
        return (base_size, base_size);
    };

    let base = u64::from(base_size);
    let (w_ratio, h_ratio) = (u64::from(w_ratio), u64::from(h_ratio));
    let (width, height) = if w_ratio >= h_ratio {
        (base, base * h_ratio / w_ratio)
    } else {
        (base * w_ratio / h_ratio, base)
    };

    (snap_to_8(width), snap_to_8(height))
}

/// Round down to a multiple of 8, never below 8
fn snap_to_8(side: u64) -> u32 {
    let snapped = ((side / 8) * 8).max(8);
    u32::try_from(snapped).unwrap_or(u32::MAX - 7)
}

fn preset(
    name: &str,
    base_prompt: &str,
    modifiers: &[&str],
    negative: &str,
    steps: u32,
    guidance_scale: f64,
    aspect_ratio: &str,
) -> StylePreset {
    StylePreset {
        name: name.to_string(),
        base_prompt: base_prompt.to_string(),
        style_modifiers: modifiers.iter().map(|m| m.to_string()).collect(),
        negative_prompt: Some(negative.to_string()),
        steps,
        guidance_scale,
        aspect_ratio: aspect_ratio.to_string(),
    }
}

fn builtin_presets() -> Vec<(&'static str, StylePreset)> {
    vec![
        (
            "cinematic",
            preset(
                "Cinematic",
                "A cinematic {scene_description}, professional film quality, dramatic lighting",
                &[
                    "35mm film",
                    "cinematic composition",
                    "professional cinematography",
                    "film grain",
                    "depth of field",
                ],
                "amateur, low quality, blurry, overexposed, cartoon, anime",
                30,
                7.5,
                "16:9",
            ),
        ),
        (
            "concept-art",
            preset(
                "Concept Art",
                "Concept art of {scene_description}, digital painting, detailed illustration",
                &[
                    "matte painting",
                    "environment design",
                    "professional concept art",
                ],
                "photograph, realistic, amateur, sketch, low quality",
                25,
                8.0,
                "16:9",
            ),
        ),
        (
            "photorealistic",
            preset(
                "Photorealistic",
                "Photorealistic {scene_description}, high quality photography, realistic lighting",
                &["professional photography", "detailed", "sharp focus"],
                "cartoon, anime, painting, illustration, low quality, blurry",
                35,
                7.0,
                "3:2",
            ),
        ),
        (
            "anime",
            preset(
                "Anime",
                "Anime style {scene_description}, high quality anime art, detailed animation style",
                &["manga style", "cel shading", "vibrant colors"],
                "realistic, photograph, western cartoon, low quality, blurry",
                25,
                8.5,
                "16:9",
            ),
        ),
        (
            "artistic",
            preset(
                "Artistic",
                "Artistic interpretation of {scene_description}, creative style, expressive artwork",
                &["unique style", "artistic vision", "creative composition"],
                "boring, generic, low quality, amateur",
                28,
                7.5,
                "1:1",
            ),
        ),
        (
            "storyboard",
            preset(
                "Storyboard",
                "Storyboard frame of {scene_description}, professional storyboard art, clear composition",
                &["film pre-production", "sketch style", "black and white"],
                "colorful, detailed painting, photorealistic, low quality",
                20,
                6.5,
                "16:9",
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("easel_style_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_apply_is_deterministic() {
        let engine = TemplateEngine::with_builtin_presets();
        let attrs = SceneAttributes::default();
        let first = engine.apply("x", "cinematic", &attrs).unwrap();
        let second = engine.apply("x", "cinematic", &attrs).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_apply_with_scene_attributes() {
        let engine = TemplateEngine::with_builtin_presets();
        let attrs = SceneAttributes {
            mood: Some("tense".to_string()),
            camera_angle: Some("low angle".to_string()),
            lighting: Some("neon backlight".to_string()),
            extra: BTreeMap::from([("time_of_day".to_string(), "dusk".to_string())]),
        };

        let out = engine
            .apply("a detective in the rain", "storyboard", &attrs)
            .unwrap();

        assert!(out
            .prompt
            .starts_with("Storyboard frame of a detective in the rain, "));
        assert!(out.prompt.contains("tense mood, low angle, neon backlight, time of day: dusk"));
        assert!(out.prompt.ends_with("black and white"));
        assert_eq!(out.style_name, "Storyboard");
        assert_eq!(out.params.steps, 20);
        assert_eq!(out.params.aspect_ratio, "16:9");
        assert_eq!((out.params.width, out.params.height), (1024, 576));
    }

    #[test]
    fn test_unknown_preset() {
        let engine = TemplateEngine::with_builtin_presets();
        let err = engine
            .apply("x", "vaporwave", &SceneAttributes::default())
            .unwrap_err();
        assert!(matches!(err, EaselError::UnknownStylePreset(ref s) if s == "vaporwave"));
    }

    #[test]
    fn test_dimensions_for_aspect_ratio() {
        assert_eq!(dimensions_for_aspect_ratio("16:9", 1024), (1024, 576));
        assert_eq!(dimensions_for_aspect_ratio("9:16", 1024), (576, 1024));
        assert_eq!(dimensions_for_aspect_ratio("3:2", 1024), (1024, 680));
        assert_eq!(dimensions_for_aspect_ratio("1:1", 1024), (1024, 1024));
        assert_eq!(dimensions_for_aspect_ratio("wide", 1024), (1024, 1024));
        assert_eq!(dimensions_for_aspect_ratio("0:9", 1024), (1024, 1024));
    }

    #[test]
    fn test_dimensions_extreme_ratios() {
        assert_eq!(
            dimensions_for_aspect_ratio("5000000:4999999", 1024),
            (1024, 1016)
        );
        assert_eq!(dimensions_for_aspect_ratio("1:2000", 1024), (8, 1024));
        assert_eq!(dimensions_for_aspect_ratio("4294967295:1", 1024), (1024, 8));
    }

    #[test]
    fn test_builtin_presets_registered() {
        let engine = TemplateEngine::with_builtin_presets();
        assert_eq!(
            engine.preset_ids(),
            vec![
                "anime",
                "artistic",
                "cinematic",
                "concept-art",
                "photorealistic",
                "storyboard"
            ]
        );
    }

    #[test]
    fn test_load_dir_overrides_builtin() {
        let dir = temp_dir();
        let style = r#"
[style]
id = "cinematic"
name = "House Cinematic"
base_prompt = "Widescreen still of {scene_description}"
style_modifiers = ["anamorphic lens flare"]
steps = 40
aspect_ratio = "21:9"
"#;
        let mut f = std::fs::File::create(dir.join("house.style.toml")).unwrap();
        f.write_all(style.as_bytes()).unwrap();

        let engine = TemplateEngine::load_dir(&dir).unwrap();
        let out = engine
            .apply("a harbour", "cinematic", &SceneAttributes::default())
            .unwrap();
        assert_eq!(out.prompt, "Widescreen still of a harbour, anamorphic lens flare");
        assert_eq!(out.params.steps, 40);
        assert_eq!(out.negative_prompt, None);
        assert!(engine.get("anime").is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_dir_rejects_missing_placeholder() {
        let dir = temp_dir();
        let style = r#"
[style]
id = "broken"
name = "Broken"
base_prompt = "no placeholder here"
"#;
        std::fs::write(dir.join("broken.style.toml"), style).unwrap();
        assert!(TemplateEngine::load_dir(&dir).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_dir_missing_is_builtin_only() {
        let engine = TemplateEngine::load_dir(Path::new("definitely/not/here")).unwrap();
        assert_eq!(engine.preset_ids().len(), 6);
    }
}
