//! Provider registry
//!
//! Holds the configured providers in priority order and the live health
//! record of each. Every provider call goes through [`ProviderRegistry::invoke`]
//! so outcomes feed back into selection.
//!
//! Health rules:
//! - success resets the failure streak and marks the provider healthy
//! - rate limits, timeouts and outages extend the streak; the provider turns
//!   degraded after `degraded_after` and unhealthy after `unhealthy_after`
//!   failures within the failure window
//! - a rate limit carrying a retry-after opens a backoff window during which
//!   the provider is not selected
//! - an unhealthy provider is skipped until its last failure is older than
//!   the failure window, then offered again as a recovery probe
//! - auth, invalid-request and unsupported-operation errors leave health alone

use crate::config::{EaselConfig, HealthConfig};
use crate::provider::{HealthStatus, ProviderAdapter, ProviderError, UnitKind};
use crate::providers::{create_provider, Provider};
use chrono::{DateTime, Utc};
use easel_core::{EaselError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Thresholds that turn failure streaks into health states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub degraded_after: u32,
    pub unhealthy_after: u32,
    pub failure_window: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}

impl HealthPolicy {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            degraded_after: config.degraded_after,
            unhealthy_after: config.unhealthy_after.max(config.degraded_after),
            failure_window: Duration::from_secs(config.failure_window_secs),
        }
    }

    fn status_for(&self, consecutive_failures: u32) -> HealthStatus {
        if consecutive_failures >= self.unhealthy_after {
            HealthStatus::Unhealthy
        } else if consecutive_failures >= self.degraded_after && consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health record of one provider, as exposed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    #[serde(default)]
    pub last_error: Option<String>,
    /// End of a provider-reported backoff window, if one is open
    #[serde(default)]
    pub backoff_until: Option<DateTime<Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_checked_at: None,
            consecutive_failures: 0,
            total_requests: 0,
            last_error: None,
            backoff_until: None,
        }
    }
}

/// Selection found no eligible provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no eligible provider for {kind} units")]
pub struct NoProviderAvailable {
    pub kind: UnitKind,
}

#[derive(Debug, Default)]
struct HealthRecord {
    health: ProviderHealth,
    streak_started: Option<Instant>,
    last_failure: Option<Instant>,
    backoff_until: Option<Instant>,
}

impl HealthRecord {
    fn is_eligible(&self, policy: &HealthPolicy, now: Instant) -> bool {
        if self.backoff_until.is_some_and(|until| now < until) {
            return false;
        }
        if self.health.status == HealthStatus::Unhealthy {
            return self
                .last_failure
                .map(|at| now.duration_since(at) >= policy.failure_window)
                .unwrap_or(true);
        }
        true
    }
}

struct RegistryEntry {
    provider: Arc<Provider>,
    record: Mutex<HealthRecord>,
}

/// Providers in priority order plus their live health
pub struct ProviderRegistry {
    entries: Vec<RegistryEntry>,
    policy: HealthPolicy,
}

impl ProviderRegistry {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
        }
    }

    /// Build providers from `config.provider_order()`
    pub fn from_config(config: &EaselConfig) -> Result<Self> {
        let order = config.provider_order();
        if order.is_empty() {
            return Err(EaselError::NoProvidersConfigured);
        }

        let mut registry = Self::new(HealthPolicy::from_config(&config.health));
        for name in order {
            let provider = create_provider(&name, config)?;
            registry.register(provider)?;
        }
        log::debug!("Provider order: {}", registry.names().join(" > "));
        Ok(registry)
    }

    /// Append a provider at the lowest priority
    pub fn register(&mut self, provider: impl Into<Provider>) -> Result<()> {
        let provider = provider.into();
        if self.get(provider.name()).is_some() {
            return Err(EaselError::ConfigError(format!(
                "Provider '{}' registered twice",
                provider.name()
            )));
        }
        self.entries.push(RegistryEntry {
            provider: Arc::new(provider),
            record: Mutex::new(HealthRecord::default()),
        });
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_provider(mut self, provider: impl Into<Provider>) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Provider names in priority order
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.provider.name().to_string())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        self.entry(name).map(|e| Arc::clone(&e.provider))
    }

    fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.provider.name() == name)
    }

    /// Pick the next provider for a unit of `kind`.
    ///
    /// Skips names in `excluding`, providers that cannot run `kind`, and
    /// ineligible providers. An eligible `preference` wins outright; otherwise
    /// the best health rank wins, ties broken by priority.
    pub fn select(
        &self,
        kind: UnitKind,
        excluding: &[String],
        preference: Option<&str>,
    ) -> std::result::Result<Arc<Provider>, NoProviderAvailable> {
        let now = Instant::now();
        let mut best: Option<(u8, usize)> = None;

        for (priority, entry) in self.entries.iter().enumerate() {
            let name = entry.provider.name();
            if excluding.iter().any(|e| e == name) || !entry.provider.supports(kind) {
                continue;
            }
            let record = entry.record.lock();
            if !record.is_eligible(&self.policy, now) {
                continue;
            }
            if preference == Some(name) {
                return Ok(Arc::clone(&entry.provider));
            }
            let rank = record.health.status.rank();
            if best.map(|(best_rank, _)| rank < best_rank).unwrap_or(true) {
                best = Some((rank, priority));
            }
        }

        best.map(|(_, index)| Arc::clone(&self.entries[index].provider))
            .ok_or(NoProviderAvailable { kind })
    }

    /// Run one provider call and record its outcome
    pub fn invoke<T, F>(&self, provider: &Provider, call: F) -> std::result::Result<T, ProviderError>
    where
        F: FnOnce(&Provider) -> std::result::Result<T, ProviderError>,
    {
        let outcome = call(provider);
        if let Some(entry) = self.entry(provider.name()) {
            let mut record = entry.record.lock();
            record.health.total_requests += 1;
            match &outcome {
                Ok(_) => self.record_success(provider.name(), &mut record),
                Err(error) if error.is_transient() => {
                    self.record_failure(provider.name(), &mut record, error)
                }
                Err(error) => {
                    log::debug!(
                        "Provider {} returned non-health error: {}",
                        provider.name(),
                        error
                    );
                }
            }
        }
        outcome
    }

    fn record_success(&self, name: &str, record: &mut HealthRecord) {
        if record.health.status != HealthStatus::Healthy {
            log::info!("Provider {} recovered", name);
        }
        record.health.status = HealthStatus::Healthy;
        record.health.consecutive_failures = 0;
        record.health.last_checked_at = Some(Utc::now());
        record.health.backoff_until = None;
        record.streak_started = None;
        record.backoff_until = None;
    }

    fn record_failure(&self, name: &str, record: &mut HealthRecord, error: &ProviderError) {
        let now = Instant::now();
        let streak_expired = record
            .streak_started
            .map(|started| now.duration_since(started) > self.policy.failure_window)
            .unwrap_or(true);

        if streak_expired || record.health.consecutive_failures == 0 {
            record.health.consecutive_failures = 1;
            record.streak_started = Some(now);
        } else {
            record.health.consecutive_failures += 1;
        }
        record.last_failure = Some(now);

        let previous = record.health.status;
        record.health.status = self.policy.status_for(record.health.consecutive_failures);
        record.health.last_error = Some(error.to_string());
        record.health.last_checked_at = Some(Utc::now());

        if let Some(retry_after) = error.retry_after() {
            record.backoff_until = Some(now + retry_after);
            record.health.backoff_until = chrono::Duration::from_std(retry_after)
                .ok()
                .map(|d| Utc::now() + d);
            log::warn!("Provider {} asked to back off for {:?}", name, retry_after);
        }

        if record.health.status != previous {
            log::warn!(
                "Provider {} is now {} after {} consecutive failure(s): {}",
                name,
                record.health.status,
                record.health.consecutive_failures,
                error
            );
        }
    }

    /// Probe every provider in parallel and record the reported status
    pub fn probe_all(&self) -> BTreeMap<String, HealthStatus> {
        let reports: Vec<HealthStatus> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .entries
                .iter()
                .map(|entry| scope.spawn(move || entry.provider.check_health()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(HealthStatus::Unhealthy))
                .collect()
        });

        let mut results = BTreeMap::new();
        for (entry, status) in self.entries.iter().zip(reports) {
            let name = entry.provider.name();
            let mut record = entry.record.lock();
            let now = Instant::now();
            match status {
                HealthStatus::Healthy => {
                    record.health.consecutive_failures = 0;
                    record.streak_started = None;
                }
                HealthStatus::Unhealthy => {
                    record.last_failure = Some(now);
                }
                HealthStatus::Degraded => {}
            }
            if record.health.status != status {
                log::info!("Probe reports provider {} as {}", name, status);
            }
            record.health.status = status;
            record.health.last_checked_at = Some(Utc::now());
            results.insert(name.to_string(), status);
        }
        results
    }

    /// Current health of one provider
    pub fn health(&self, name: &str) -> Option<ProviderHealth> {
        self.entry(name).map(|e| e.record.lock().health.clone())
    }

    /// Current health of every provider, keyed by name
    pub fn health_snapshot(&self) -> BTreeMap<String, ProviderHealth> {
        self.entries
            .iter()
            .map(|e| {
                (
                    e.provider.name().to_string(),
                    e.record.lock().health.clone(),
                )
            })
            .collect()
    }
}
