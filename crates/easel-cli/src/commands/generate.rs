//! Generation commands: concept, storyboard, upscale

use super::load_config;
use anyhow::{Context, Result};
use easel_gen::{
    CancelHandle, Engine, GenerationRequest, GenerationState, OverallStatus, Quality, SceneSpec,
    UnitStatus,
};
use serde::Deserialize;
use std::path::Path;

pub struct ConceptArgs {
    pub prompt: String,
    pub variations: usize,
    pub style: Option<String>,
    pub provider: Option<String>,
    pub aspect_ratio: Option<String>,
    pub seed: Option<u64>,
    pub quality: Quality,
}

pub fn concept(config: Option<&str>, args: ConceptArgs) -> Result<()> {
    let engine = build_engine(config)?;
    let style = args.style.unwrap_or_else(|| engine.default_style().to_string());

    let mut request = GenerationRequest::concept(&args.prompt, args.variations, style)?
        .with_quality(args.quality);
    if let Some(aspect_ratio) = args.aspect_ratio {
        request = request.with_aspect_ratio(aspect_ratio);
    }
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }
    run_request(&engine, request, args.provider)
}

pub fn storyboard(
    config: Option<&str>,
    scenes_path: &str,
    style: Option<String>,
    provider: Option<String>,
    quality: Quality,
) -> Result<()> {
    let scenes = load_scenes(Path::new(scenes_path))?;
    let engine = build_engine(config)?;
    let style = style.unwrap_or_else(|| engine.default_style().to_string());

    let request = GenerationRequest::storyboard(scenes, style)?.with_quality(quality);
    run_request(&engine, request, provider)
}

pub fn upscale(
    config: Option<&str>,
    source: &str,
    factor: u32,
    provider: Option<String>,
    quality: Quality,
) -> Result<()> {
    let engine = build_engine(config)?;
    let request = GenerationRequest::upscale(source, factor, engine.default_style().to_string())?
        .with_quality(quality);
    run_request(&engine, request, provider)
}

fn build_engine(config: Option<&str>) -> Result<Engine> {
    let config = load_config(config)?;
    Engine::from_config(&config).context("Failed to start generation engine")
}

fn run_request(
    engine: &Engine,
    mut request: GenerationRequest,
    provider: Option<String>,
) -> Result<()> {
    if let Some(provider) = provider {
        if engine.registry().get(&provider).is_none() {
            log::warn!(
                "Provider '{}' is not configured; available: {}",
                provider,
                engine.registry().names().join(", ")
            );
        }
        request = request.with_provider_preference(provider);
    }

    eprintln!(
        "Submitting {} request {} ({} unit(s))",
        request.kind,
        request.request_id.short(),
        request.units.len()
    );

    let mut settled = vec![false; request.units.len()];
    let mut report = |state: &GenerationState| {
        for (i, unit) in state.units.iter().enumerate() {
            if !unit.status.is_terminal() || settled[i] {
                continue;
            }
            settled[i] = true;
            match (&unit.status, &unit.error) {
                (UnitStatus::Succeeded, _) => eprintln!(
                    "  [{}/{}] {}  OK",
                    state.completed_count,
                    state.total_count,
                    unit.unit_id
                ),
                (_, Some(error)) => eprintln!("  {}  FAILED: {}", unit.unit_id, error),
                _ => eprintln!("  {}  FAILED", unit.unit_id),
            }
        }
    };

    let state = engine.submit_with(&request, &CancelHandle::new(), Some(&mut report));
    println!("{}", serde_json::to_string_pretty(&state)?);

    if state.overall_status == OverallStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

#[derive(Deserialize)]
struct SceneFile {
    scenes: Vec<SceneSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonScenes {
    Wrapped(SceneFile),
    Bare(Vec<SceneSpec>),
}

/// Read a scene list from TOML (`[[scenes]]`) or JSON (array or `{"scenes": [...]}`)
fn load_scenes(path: &Path) -> Result<Vec<SceneSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scene file {}", path.display()))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    parse_scenes(&content, is_json)
        .with_context(|| format!("Failed to parse scene file {}", path.display()))
}

fn parse_scenes(content: &str, is_json: bool) -> Result<Vec<SceneSpec>> {
    let scenes = if is_json {
        match serde_json::from_str::<JsonScenes>(content)? {
            JsonScenes::Wrapped(file) => file.scenes,
            JsonScenes::Bare(scenes) => scenes,
        }
    } else {
        toml::from_str::<SceneFile>(content)?.scenes
    };
    if scenes.is_empty() {
        anyhow::bail!("scene list is empty");
    }
    Ok(scenes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_scenes() {
        let content = r#"
[[scenes]]
description = "a detective enters the bar"
mood = "tense"
camera_angle = "low angle"

[[scenes]]
description = "close-up on the bartender"
style = "anime"
"#;
        let scenes = parse_scenes(content, false).unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].attributes.mood.as_deref(), Some("tense"));
        assert_eq!(scenes[0].attributes.camera_angle.as_deref(), Some("low angle"));
        assert_eq!(scenes[1].style.as_deref(), Some("anime"));
    }

    #[test]
    fn test_parse_json_scenes_bare_and_wrapped() {
        let bare = r#"[{"description": "a harbour at dawn", "lighting": "golden hour"}]"#;
        let scenes = parse_scenes(bare, true).unwrap();
        assert_eq!(scenes[0].attributes.lighting.as_deref(), Some("golden hour"));

        let wrapped = r#"{"scenes": [{"description": "a harbour at dawn"}]}"#;
        assert_eq!(parse_scenes(wrapped, true).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_scene_list_rejected() {
        assert!(parse_scenes("scenes = []", false).is_err());
    }
}
