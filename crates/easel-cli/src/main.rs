//! Easel CLI - Command-line front end for the Easel generation engine

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{generate, health, styles};
use easel_gen::Quality;

#[derive(Parser)]
#[command(name = "easel")]
#[command(about = "Turn creative descriptions into published images", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the layered defaults
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate concept art variations from a single prompt
    Concept {
        /// What to draw
        #[arg(long)]
        prompt: String,

        /// Number of variations
        #[arg(long, default_value = "1")]
        variations: usize,

        /// Style preset (defaults to the configured style)
        #[arg(long)]
        style: Option<String>,

        /// Preferred provider
        #[arg(long)]
        provider: Option<String>,

        /// Aspect ratio override (e.g., "16:9")
        #[arg(long)]
        aspect_ratio: Option<String>,

        /// Seed applied to every variation
        #[arg(long)]
        seed: Option<u64>,

        /// Quality tier: "standard" or "high"
        #[arg(long, default_value = "standard")]
        quality: Quality,
    },

    /// Generate one frame per scene from a TOML or JSON scene list
    Storyboard {
        /// Path to the scene file
        scenes: String,

        /// Style preset (defaults to the configured style)
        #[arg(long)]
        style: Option<String>,

        /// Preferred provider
        #[arg(long)]
        provider: Option<String>,

        /// Quality tier: "standard" or "high"
        #[arg(long, default_value = "standard")]
        quality: Quality,
    },

    /// Upscale an existing image
    Upscale {
        /// Image URL, file path, or data: URI
        source: String,

        /// Scale factor
        #[arg(long, default_value = "2")]
        factor: u32,

        /// Preferred provider
        #[arg(long)]
        provider: Option<String>,

        /// Quality tier: "standard" or "high"
        #[arg(long, default_value = "standard")]
        quality: Quality,
    },

    /// Show provider health
    Health {
        /// Actively probe every provider first
        #[arg(long)]
        probe: bool,
    },

    /// List available style presets
    Styles,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Concept {
            prompt,
            variations,
            style,
            provider,
            aspect_ratio,
            seed,
            quality,
        } => generate::concept(
            config,
            generate::ConceptArgs {
                prompt,
                variations,
                style,
                provider,
                aspect_ratio,
                seed,
                quality,
            },
        ),
        Commands::Storyboard {
            scenes,
            style,
            provider,
            quality,
        } => generate::storyboard(config, &scenes, style, provider, quality),
        Commands::Upscale {
            source,
            factor,
            provider,
            quality,
        } => generate::upscale(config, &source, factor, provider, quality),
        Commands::Health { probe } => health::run(config, probe),
        Commands::Styles => styles::run(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_flag_parses() {
        let cli = Cli::try_parse_from(["easel", "concept", "--prompt", "a lighthouse", "--quality", "high"])
            .unwrap();
        match cli.command {
            Commands::Concept { quality, .. } => assert_eq!(quality, Quality::High),
            _ => panic!("expected concept command"),
        }

        let cli = Cli::try_parse_from(["easel", "upscale", "shot.png"]).unwrap();
        match cli.command {
            Commands::Upscale { quality, .. } => assert_eq!(quality, Quality::Standard),
            _ => panic!("expected upscale command"),
        }

        assert!(Cli::try_parse_from(["easel", "storyboard", "scenes.toml", "--quality", "ultra"]).is_err());
    }
}
