//! CCA feature extractor
//!
//! Lifecycle:
//!
//! 1. [`CcaExtractor::setup`] validates the configuration, resolves the
//!    dispatch plan and, when the sample count is known, builds and replicates
//!    the reference template.
//! 2. [`CcaExtractor::prepare_voting`] takes ownership of the signal pool,
//!    centers it, checks its rank and learns the sample count if needed.
//! 3. [`CcaExtractor::extract_features`] (or the per-batch and per-unit entry
//!    points) computes the `[signals, voters, targets, features]` tensor.
//!
//! Setup steps take `&mut self` and extraction takes `&self`, so a template can
//! never be rebuilt while an extraction is reading it.

use crate::batch::{BatchDescriptor, assemble_batch, schedule_batches};
use crate::config::CcaConfig;
use crate::debundle::debundle;
use crate::device::{DeviceId, HostTemplate, TemplateReplica, TemplateReplicas};
use crate::dispatch::DispatchPlan;
use crate::engine::CorrelationEngine;
use crate::error::{CcaError, FatalHook, LogFatal, Result};
use crate::pool::SignalPool;
use crate::template::ReferenceTemplate;
use crate::voters::ChannelSelectionSet;
use ndarray::{Array2, Array3, Array4, ArrayView3, ArrayView4, Axis, s};
use rayon::ThreadPool;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Reference template with its device replicas
#[derive(Debug)]
struct PreparedTemplate {
    reference: ReferenceTemplate,
    replicas: TemplateReplicas,
    /// Host copy of the Q-template for per-unit extraction
    host_q: Arc<HostTemplate>,
}

impl PreparedTemplate {
    fn build(config: &CcaConfig, plan: &DispatchPlan, samples_count: usize) -> Result<Self> {
        let reference = ReferenceTemplate::build(config, samples_count)?;
        let replicas = TemplateReplicas::replicate(&reference, plan.backend())?;
        let host_q = match replicas.q_template.get(DeviceId(0))? {
            TemplateReplica::Host(host) => Arc::clone(host),
            #[cfg(feature = "gpu")]
            TemplateReplica::Device(_) => Arc::new(HostTemplate::new(reference.q_template())?),
        };
        Ok(Self {
            reference,
            replicas,
            host_q,
        })
    }
}

/// Everything extraction reads, fixed by `prepare_voting`
#[derive(Debug)]
struct VotingState {
    pool: SignalPool,
    selections: ChannelSelectionSet,
    engine: CorrelationEngine,
}

/// Extracted features, `[signals, voters, targets, features]`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    features: Array4<f64>,
}

impl FeatureTensor {
    pub fn new(features: Array4<f64>) -> Self {
        Self { features }
    }

    pub fn features(&self) -> ArrayView4<'_, f64> {
        self.features.view()
    }

    /// Features of one signal, `[voters, targets, features]`
    pub fn signal(&self, index: usize) -> ArrayView3<'_, f64> {
        self.features.index_axis(Axis(0), index)
    }

    pub fn signals_count(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    pub fn voters_count(&self) -> usize {
        self.features.len_of(Axis(1))
    }

    pub fn targets_count(&self) -> usize {
        self.features.len_of(Axis(2))
    }

    pub fn features_count(&self) -> usize {
        self.features.len_of(Axis(3))
    }

    pub fn into_inner(self) -> Array4<f64> {
        self.features
    }
}

/// SSVEP feature extractor based on canonical correlation analysis
pub struct CcaExtractor {
    config: CcaConfig,
    plan: DispatchPlan,
    template: Option<PreparedTemplate>,
    voting: Option<VotingState>,
    hook: Arc<dyn FatalHook>,
}

impl std::fmt::Debug for CcaExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CcaExtractor")
            .field("config", &self.config)
            .field("plan", &self.plan)
            .field("template", &self.template)
            .field("voting", &self.voting)
            .finish_non_exhaustive()
    }
}

impl CcaExtractor {
    /// Validate `config` and prepare the template if the sample count is known
    ///
    /// Errors are logged through [`LogFatal`] before being returned.
    pub fn setup(config: CcaConfig) -> Result<Self> {
        Self::setup_with_hook(config, Arc::new(LogFatal))
    }

    /// Like [`CcaExtractor::setup`], reporting fatal errors to `hook`
    pub fn setup_with_hook(config: CcaConfig, hook: Arc<dyn FatalHook>) -> Result<Self> {
        let (plan, template) = Self::prepare(&config).inspect_err(|e| hook.on_fatal(e))?;
        Ok(Self {
            config,
            plan,
            template,
            voting: None,
            hook,
        })
    }

    fn prepare(config: &CcaConfig) -> Result<(DispatchPlan, Option<PreparedTemplate>)> {
        config.validate()?;
        let plan = DispatchPlan::resolve(config)?;
        let template = config
            .samples_count
            .map(|samples| PreparedTemplate::build(config, &plan, samples))
            .transpose()?;
        Ok((plan, template))
    }

    /// Take ownership of the signal pool and fix the electrode selections
    ///
    /// `signals` is `[trials, electrodes, samples]`. It is centered in place.
    /// Fails with `RankDeficiency` if any trial is not full rank, before any
    /// correlation is computed.
    pub fn prepare_voting(
        &mut self,
        signals: Array3<f64>,
        selections: ChannelSelectionSet,
    ) -> Result<()> {
        let result = self.prepare_voting_inner(signals, selections);
        result.inspect_err(|e| self.hook.on_fatal(e))
    }

    /// [`CcaExtractor::prepare_voting`] with selections drawn from
    /// `voters_count` and `random_seed`
    pub fn prepare_voting_random(&mut self, signals: Array3<f64>) -> Result<()> {
        let electrodes = signals.len_of(Axis(1));
        let selections =
            ChannelSelectionSet::random(electrodes, self.config.voters_count, self.config.random_seed)
                .inspect_err(|e| self.hook.on_fatal(e))?;
        self.prepare_voting(signals, selections)
    }

    fn prepare_voting_inner(
        &mut self,
        signals: Array3<f64>,
        selections: ChannelSelectionSet,
    ) -> Result<()> {
        let pool = SignalPool::new(signals)?;
        if selections.electrodes_count() != pool.electrodes_count() {
            return Err(CcaError::ShapeMismatch(format!(
                "selections address {} electrodes, signal pool has {}",
                selections.electrodes_count(),
                pool.electrodes_count()
            )));
        }

        // A template learned from this pool is only kept once the pool is accepted
        let learned = match self.template.as_ref().map(|t| t.reference.samples_count()) {
            Some(expected) if expected != pool.samples_count() => {
                return Err(CcaError::ShapeMismatch(format!(
                    "signals have {} samples, template was built for {}",
                    pool.samples_count(),
                    expected
                )));
            }
            Some(_) => None,
            None => {
                debug!("Learning sample count from signal pool: {}", pool.samples_count());
                Some(PreparedTemplate::build(
                    &self.config,
                    &self.plan,
                    pool.samples_count(),
                )?)
            }
        };

        pool.validate_rank()?;

        let engine = CorrelationEngine::new(&self.config, pool.electrodes_count());
        info!(
            "Prepared voting: {} trials, {} electrodes, {} voters, {} features per target",
            pool.trials_count(),
            pool.electrodes_count(),
            selections.len(),
            engine.features_count()
        );
        if let Some(template) = learned {
            self.template = Some(template);
        }
        self.voting = Some(VotingState {
            pool,
            selections,
            engine,
        });
        Ok(())
    }

    /// Features of one batch, `[signals-in-slice, voters-in-batch, targets, features]`
    pub fn extract_batch(
        &self,
        descriptor: &BatchDescriptor,
        device: DeviceId,
    ) -> Result<Array4<f64>> {
        self.extract_batch_inner(descriptor, device)
            .inspect_err(|e| self.hook.on_fatal(e))
    }

    fn extract_batch_inner(
        &self,
        descriptor: &BatchDescriptor,
        device: DeviceId,
    ) -> Result<Array4<f64>> {
        let (template, state) = self.ready()?;
        descriptor.check_bounds(state.pool.trials_count(), state.selections.len())?;
        if descriptor.is_empty() {
            return Ok(Array4::zeros((
                descriptor.signals_in_slice(),
                descriptor.voters_in_batch,
                template.reference.targets_count(),
                state.engine.features_count(),
            )));
        }

        let replica = template.replicas.q_template.get(device)?;
        let batch = assemble_batch(&state.pool, &state.selections, descriptor)?;
        let raw = state.engine.canonical_correlations(batch.view(), replica)?;
        let reduced = state.engine.reduce(raw)?;
        debug!(
            "Batch voters {}..{}, signals {}..{}: {} items",
            descriptor.first_voter,
            descriptor.first_voter + descriptor.voters_in_batch,
            descriptor.first_signal,
            descriptor.last_signal,
            descriptor.len()
        );
        debundle(reduced, descriptor.voters_in_batch)
    }

    /// Features of a single (signal, voter) pair, `[targets, features]`
    pub fn extract_unit(&self, signal: usize, voter: usize) -> Result<Array2<f64>> {
        self.ready()
            .and_then(|(template, state)| unit_features(state, &template.host_q, signal, voter))
            .inspect_err(|e| self.hook.on_fatal(e))
    }

    /// Features of every (signal, voter) pair through the configured dispatch path
    pub fn extract_features(&self) -> Result<FeatureTensor> {
        self.extract_features_inner()
            .inspect_err(|e| self.hook.on_fatal(e))
    }

    fn extract_features_inner(&self) -> Result<FeatureTensor> {
        let (template, state) = self.ready()?;
        let start = Instant::now();

        let mut features = Array4::zeros((
            state.pool.trials_count(),
            state.selections.len(),
            template.reference.targets_count(),
            state.engine.features_count(),
        ));

        match self.plan.build_worker_pool()? {
            None => {
                let schedule = schedule_batches(
                    &state.selections,
                    state.pool.trials_count(),
                    self.config.max_batch_size,
                );
                for descriptor in &schedule {
                    let block = self.extract_batch_inner(descriptor, DeviceId(0))?;
                    features
                        .slice_mut(s![
                            descriptor.first_signal..descriptor.last_signal,
                            descriptor.first_voter
                                ..descriptor.first_voter + descriptor.voters_in_batch,
                            ..,
                            ..
                        ])
                        .assign(&block);
                }
                debug!("Processed {} batches", schedule.len());
            }
            Some(workers) => {
                extract_with_workers(&workers, state, &template.host_q, &mut features)?;
            }
        }

        info!(
            "Extracted features for {} signals x {} voters in {:.2?}",
            features.len_of(Axis(0)),
            features.len_of(Axis(1)),
            start.elapsed()
        );
        Ok(FeatureTensor::new(features))
    }

    fn ready(&self) -> Result<(&PreparedTemplate, &VotingState)> {
        match (&self.template, &self.voting) {
            (Some(template), Some(state)) => Ok((template, state)),
            _ => Err(CcaError::ConfigError(
                "prepare_voting must be called before extraction".to_string(),
            )),
        }
    }

    pub fn config(&self) -> &CcaConfig {
        &self.config
    }

    pub fn plan(&self) -> &DispatchPlan {
        &self.plan
    }

    /// Reference template, once the sample count is known
    pub fn template(&self) -> Option<&ReferenceTemplate> {
        self.template.as_ref().map(|t| &t.reference)
    }

    /// Device replicas of the template, once the sample count is known
    pub fn replicas(&self) -> Option<&TemplateReplicas> {
        self.template.as_ref().map(|t| &t.replicas)
    }

    /// Features per (signal, target), once voting is prepared
    pub fn features_count(&self) -> Option<usize> {
        self.voting.as_ref().map(|v| v.engine.features_count())
    }

    pub fn selections(&self) -> Option<&ChannelSelectionSet> {
        self.voting.as_ref().map(|v| &v.selections)
    }

    pub fn signal_pool(&self) -> Option<&SignalPool> {
        self.voting.as_ref().map(|v| &v.pool)
    }
}

fn unit_features(
    state: &VotingState,
    template: &HostTemplate,
    signal: usize,
    voter: usize,
) -> Result<Array2<f64>> {
    if signal >= state.pool.trials_count() {
        return Err(CcaError::ShapeMismatch(format!(
            "signal {} outside pool of {} trials",
            signal,
            state.pool.trials_count()
        )));
    }
    let selection = state.selections.get(voter).ok_or_else(|| {
        CcaError::ShapeMismatch(format!(
            "voter {} outside selection set of {}",
            voter,
            state.selections.len()
        ))
    })?;
    let unit = state.pool.trial(signal).select(Axis(0), selection);
    state.engine.correlate_unit(unit.view(), template)
}

/// One task per (signal, voter) pair, each writing its own output slice
fn extract_with_workers(
    workers: &ThreadPool,
    state: &VotingState,
    template: &HostTemplate,
    features: &mut Array4<f64>,
) -> Result<()> {
    let (signals, voters, targets, features_count) = features.dim();
    let mut flat = features
        .view_mut()
        .into_shape_with_order((signals * voters, targets, features_count))?;

    workers.install(|| {
        flat.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .try_for_each(|(unit, mut out)| {
                let values = unit_features(state, template, unit / voters, unit % voters)?;
                out.assign(&values);
                Ok::<(), CcaError>(())
            })
    })?;

    debug!(
        "Worker pool of {} threads processed {} units",
        workers.current_num_threads(),
        signals * voters
    );
    Ok(())
}
