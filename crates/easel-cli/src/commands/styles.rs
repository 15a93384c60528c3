//! Style preset listing

use super::load_config;
use anyhow::{Context, Result};
use easel_gen::TemplateEngine;
use std::path::Path;

pub fn run(config: Option<&str>) -> Result<()> {
    let config = load_config(config)?;
    let templates = TemplateEngine::load_dir(Path::new(&config.styles.dir))
        .with_context(|| format!("Failed to load styles from {}", config.styles.dir))?;

    let ids = templates.preset_ids();
    println!("{} style preset(s):\n", ids.len());
    for id in ids {
        let Some(preset) = templates.get(id) else {
            continue;
        };
        let marker = if id == config.styles.default { " (default)" } else { "" };
        println!("  {:<16} {}{}", id, preset.name, marker);
        println!("  {:<16} {} steps, guidance {}, {}", "", preset.steps, preset.guidance_scale, preset.aspect_ratio);
    }
    Ok(())
}
