//! Per-request generation coordinator
//!
//! One coordinator drives one request. Templating and state bookkeeping
//! happen on the coordinator's thread; provider calls and uploads run on the
//! shared worker pool and report back over a channel. Each unit follows the
//! same protocol:
//!
//! 1. apply the style template (unknown preset fails the unit, undispatched)
//! 2. select a provider and call it, failing over on transient errors
//! 3. publish the image
//! 4. report `succeeded` or `failed` with the providers attempted
//!
//! Results are reported in request order whatever order units finish in.

use crate::pool::WorkerPool;
use crate::provider::{GenerationParams, ProviderAdapter, ProviderError, UnitKind};
use crate::publish::{AssetMetadata, AssetPublisher};
use crate::registry::ProviderRegistry;
use crate::request::{GenerationRequest, UnitError, UnitResult};
use crate::state::GenerationState;
use crate::template::{dimensions_for_aspect_ratio, TemplateEngine};
use chrono::Utc;
use crossbeam::channel::{unbounded, RecvTimeoutError, Sender};
use easel_core::EaselError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often the coordinator checks for cancellation while waiting
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const BASE_SIZE: u32 = 1024;

/// Callback receiving a snapshot after every unit transition
pub type Observer<'a> = &'a mut dyn FnMut(&GenerationState);

/// Shared flag used to cancel a running request
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching units that no worker has picked up yet
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum WorkerEvent {
    Started(usize),
    Finished {
        index: usize,
        outcome: Result<UnitResult, UnitError>,
        attempted: Vec<String>,
    },
}

/// Everything a worker needs to run one unit
struct UnitJob {
    index: usize,
    kind: UnitKind,
    prompt: String,
    negative_prompt: Option<String>,
    params: GenerationParams,
    source_ref: Option<String>,
    factor: u32,
    preference: Option<String>,
    metadata: AssetMetadata,
}

/// Drives one request to a terminal state
pub struct Coordinator<'e> {
    registry: &'e Arc<ProviderRegistry>,
    templates: &'e TemplateEngine,
    publisher: &'e Arc<dyn AssetPublisher>,
    pool: &'e WorkerPool,
}

impl<'e> Coordinator<'e> {
    pub fn new(
        registry: &'e Arc<ProviderRegistry>,
        templates: &'e TemplateEngine,
        publisher: &'e Arc<dyn AssetPublisher>,
        pool: &'e WorkerPool,
    ) -> Self {
        Self {
            registry,
            templates,
            publisher,
            pool,
        }
    }

    /// Run `request` to completion. Unit failures are recorded in the
    /// returned state, never raised.
    pub fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancelHandle,
        mut observer: Option<Observer<'_>>,
    ) -> GenerationState {
        let mut state = GenerationState::new(request);
        state.begin();
        log::info!(
            "Request {} started: {} with {} unit(s), style '{}'",
            request.request_id.short(),
            request.kind,
            state.total_count,
            request.style_preset
        );
        notify(&mut observer, &state);

        let (sender, receiver) = unbounded::<WorkerEvent>();
        let mut claims: BTreeMap<usize, Arc<AtomicBool>> = BTreeMap::new();

        for index in 0..request.units.len() {
            if cancel.is_cancelled() {
                state.record_failure(index, UnitError::Cancelled, Vec::new());
                notify(&mut observer, &state);
                continue;
            }

            let job = match self.prepare(request, index, &mut state) {
                Ok(job) => job,
                Err(error) => {
                    log::warn!(
                        "Request {} unit {} not dispatched: {}",
                        request.request_id.short(),
                        request.units[index].unit_id,
                        error
                    );
                    state.record_failure(index, error, Vec::new());
                    notify(&mut observer, &state);
                    continue;
                }
            };

            let claim = Arc::new(AtomicBool::new(false));
            match self.dispatch(job, Arc::clone(&claim), cancel.clone(), sender.clone()) {
                Ok(()) => {
                    claims.insert(index, claim);
                }
                Err(e) => {
                    log::error!("Failed to dispatch unit {}: {}", index, e);
                    state.record_failure(
                        index,
                        UnitError::NoProviderAvailable {
                            last_error: Some(ProviderError::unavailable(e.to_string())),
                        },
                        Vec::new(),
                    );
                    notify(&mut observer, &state);
                }
            }
        }
        // Only workers hold senders now; disconnect means every job has reported
        drop(sender);

        let mut outstanding = claims.len();
        let mut cancel_applied = false;
        while outstanding > 0 {
            if cancel.is_cancelled() && !cancel_applied {
                cancel_applied = true;
                for (&index, claim) in &claims {
                    if !claim.swap(true, Ordering::SeqCst) {
                        state.record_failure(index, UnitError::Cancelled, Vec::new());
                        outstanding -= 1;
                        notify(&mut observer, &state);
                    }
                }
                log::info!(
                    "Request {} cancelled; waiting for {} in-flight unit(s)",
                    request.request_id.short(),
                    outstanding
                );
                continue;
            }

            match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(WorkerEvent::Started(index)) => {
                    state.mark_in_flight(index);
                    notify(&mut observer, &state);
                }
                Ok(WorkerEvent::Finished {
                    index,
                    outcome,
                    attempted,
                }) => {
                    match outcome {
                        Ok(result) => state.record_success(index, result, attempted),
                        Err(error) => state.record_failure(index, error, attempted),
                    };
                    outstanding -= 1;
                    notify(&mut observer, &state);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!(
                        "Request {}: workers stopped with {} unit(s) unreported",
                        request.request_id.short(),
                        outstanding
                    );
                    break;
                }
            }
        }

        // Anything still open lost its worker
        for index in 0..state.units.len() {
            if !state.units[index].is_terminal() {
                let attempted = state.units[index].attempted_providers.clone();
                state.record_failure(
                    index,
                    UnitError::NoProviderAvailable {
                        last_error: Some(ProviderError::unavailable(
                            "worker exited before reporting",
                        )),
                    },
                    attempted,
                );
            }
        }
        state.refresh();

        log::info!(
            "Request {} finished: {} ({}/{} succeeded)",
            request.request_id.short(),
            state.overall_status,
            state.completed_count,
            state.total_count
        );
        state
    }

    /// Apply the template for one unit and build its job
    fn prepare(
        &self,
        request: &GenerationRequest,
        index: usize,
        state: &mut GenerationState,
    ) -> Result<UnitJob, UnitError> {
        let unit = &request.units[index];
        let style = request.style_for(unit);

        let output = self
            .templates
            .apply(&unit.description, style, &unit.attributes)
            .map_err(|e| match e {
                EaselError::UnknownStylePreset(preset) => UnitError::UnknownStylePreset { preset },
                _ => UnitError::UnknownStylePreset {
                    preset: style.to_string(),
                },
            })?;

        let mut params = output.params;
        if let Some(aspect_ratio) = &request.aspect_ratio {
            let (width, height) = dimensions_for_aspect_ratio(aspect_ratio, BASE_SIZE);
            params.aspect_ratio = aspect_ratio.clone();
            params.width = width;
            params.height = height;
        }
        if request.seed.is_some() {
            params.seed = request.seed;
        }
        params.quality = request.quality;

        let slot = &mut state.units[index];
        slot.prompt = Some(output.prompt.clone());
        slot.negative_prompt = output.negative_prompt.clone();
        slot.parameters = Some(params.clone());

        let mut properties = BTreeMap::new();
        if let Some(mood) = &unit.attributes.mood {
            properties.insert("mood".to_string(), mood.clone());
        }
        if let Some(angle) = &unit.attributes.camera_angle {
            properties.insert("camera_angle".to_string(), angle.clone());
        }
        if let Some(lighting) = &unit.attributes.lighting {
            properties.insert("lighting".to_string(), lighting.clone());
        }
        properties.insert("style_name".to_string(), output.style_name.clone());
        properties.insert("quality".to_string(), params.quality.to_string());

        let metadata = AssetMetadata {
            name: format!("{}-{}", request.request_id.short(), unit.unit_id),
            request_id: request.request_id.to_string(),
            unit_id: unit.unit_id.to_string(),
            kind: request.kind,
            prompt: output.prompt.clone(),
            negative_prompt: output.negative_prompt.clone(),
            style_preset: style.to_string(),
            provider: String::new(),
            model: String::new(),
            seed: params.seed,
            project_id: request.project_id.clone(),
            created_at: Utc::now(),
            properties,
        };

        Ok(UnitJob {
            index,
            kind: unit.kind,
            prompt: output.prompt,
            negative_prompt: output.negative_prompt,
            params,
            source_ref: unit.source_ref.clone(),
            factor: unit.factor.unwrap_or(2),
            preference: request.provider_preference.clone(),
            metadata,
        })
    }

    fn dispatch(
        &self,
        job: UnitJob,
        claim: Arc<AtomicBool>,
        cancel: CancelHandle,
        events: Sender<WorkerEvent>,
    ) -> easel_core::Result<()> {
        let registry = Arc::clone(self.registry);
        let publisher = Arc::clone(self.publisher);

        self.pool.execute(move || {
            // The coordinator claims unstarted units on cancellation
            if claim.swap(true, Ordering::SeqCst) {
                return;
            }
            if cancel.is_cancelled() {
                let _ = events.send(WorkerEvent::Finished {
                    index: job.index,
                    outcome: Err(UnitError::Cancelled),
                    attempted: Vec::new(),
                });
                return;
            }

            let _ = events.send(WorkerEvent::Started(job.index));
            let (outcome, attempted) = execute_unit(&job, &registry, publisher.as_ref());
            let _ = events.send(WorkerEvent::Finished {
                index: job.index,
                outcome,
                attempted,
            });
        })
    }
}

/// Failover loop plus publish for one unit (runs on a worker)
fn execute_unit(
    job: &UnitJob,
    registry: &ProviderRegistry,
    publisher: &dyn AssetPublisher,
) -> (Result<UnitResult, UnitError>, Vec<String>) {
    let mut attempted: Vec<String> = Vec::new();
    let mut last_error: Option<ProviderError> = None;

    let image = loop {
        let provider = match registry.select(job.kind, &attempted, job.preference.as_deref()) {
            Ok(provider) => provider,
            Err(_) => {
                log::warn!(
                    "Unit {} exhausted providers after {:?}",
                    job.metadata.unit_id,
                    attempted
                );
                return (Err(UnitError::NoProviderAvailable { last_error }), attempted);
            }
        };
        let name = provider.name().to_string();
        attempted.push(name.clone());

        let outcome = registry.invoke(&provider, |p| match job.kind {
            UnitKind::TextToImage => {
                p.generate_image(&job.prompt, job.negative_prompt.as_deref(), &job.params)
            }
            UnitKind::Upscale => p.upscale_image(job.source_ref.as_deref().unwrap_or_default(), job.factor),
        });

        match outcome {
            Ok(image) => break image,
            Err(error) if error.allows_failover() => {
                log::warn!(
                    "Unit {} failed on {} ({}), failing over",
                    job.metadata.unit_id,
                    name,
                    error
                );
                last_error = Some(error);
            }
            Err(error) => {
                log::warn!(
                    "Unit {} rejected by {}: {}",
                    job.metadata.unit_id,
                    name,
                    error
                );
                return (
                    Err(UnitError::Rejected {
                        provider: name,
                        error,
                    }),
                    attempted,
                );
            }
        }
    };

    let mut metadata = job.metadata.clone();
    metadata.provider = image.provider.clone();
    metadata.model = image.model.clone();
    if image.seed.is_some() {
        metadata.seed = image.seed;
    }
    if job.kind == UnitKind::Upscale {
        metadata.properties.insert("factor".to_string(), job.factor.to_string());
    }

    match publisher.upload(&image, &metadata) {
        Ok(published) => {
            let result = UnitResult {
                asset_id: published.asset_id,
                url: published.url,
                source_url: image.url,
                provider: image.provider,
                model: image.model,
                width: image.width,
                height: image.height,
                seed: image.seed,
                duration_secs: image.duration_secs,
                metadata: image.metadata,
            };
            (Ok(result), attempted)
        }
        Err(e) => {
            log::error!(
                "Publishing unit {} failed (provider {}, model {}, prompt {:?}): {}",
                metadata.unit_id,
                metadata.provider,
                metadata.model,
                metadata.prompt,
                e
            );
            (
                Err(UnitError::PublishError {
                    message: e.to_string(),
                }),
                attempted,
            )
        }
    }
}

fn notify(observer: &mut Option<Observer<'_>>, state: &GenerationState) {
    if let Some(observer) = observer {
        (*observer)(state);
    }
}

