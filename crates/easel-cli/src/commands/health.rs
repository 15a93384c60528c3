//! Provider health command

use super::load_config;
use anyhow::{Context, Result};
use easel_gen::{HealthPolicy, ProviderRegistry};

pub fn run(config: Option<&str>, probe: bool) -> Result<()> {
    let config = load_config(config)?;
    let registry =
        ProviderRegistry::from_config(&config).context("Failed to configure providers")?;

    if probe {
        eprintln!("Probing {} provider(s)...", registry.len());
        registry.probe_all();
    }

    let policy: &HealthPolicy = registry.policy();
    log::debug!(
        "Health policy: degraded after {}, unhealthy after {}, window {:?}",
        policy.degraded_after,
        policy.unhealthy_after,
        policy.failure_window
    );

    println!("{}", serde_json::to_string_pretty(&registry.health_snapshot())?);
    Ok(())
}
