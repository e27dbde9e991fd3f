//! Pipeline orchestration
//!
//! One run: admit cached element sets, propagate them in budgeted batches,
//! observe and fold passes per satellite on blocking workers, score, select
//! one pool per constellation concurrently, then validate the whole run.

use crate::cache::{ElementCache, IngestStats};
use crate::config::PlannerConfig;
use crate::passes::{summarize, ExtractionStats, PassExtractor, PassSummary, VisibilityWindow};
use crate::scheduler::{self, CancellationToken, PropagationSummary, SampleFailure, SatelliteTrajectory, TimeWindow};
use crate::scorer::{score_candidates, ScoringStats};
use crate::selector::{select_pool, PoolRequest};
use crate::validation::{validate, StageRecord, ValidationInput, ValidationReport};
use crate::{DynamicPool, PlannerError, PoolDiff, Result};
use chrono::{DateTime, Utc};
use orbital_mechanics::{
    parse_tle, GeometryEngine, GeometryStats, ObservationSample, ObserverLocation, OrbitalElementSet, ParseStats,
    Propagator,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub parse: ParseStats,
    pub cache: IngestStats,
    /// Entries dropped for fetch age after this ingest
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AdmissionStats {
    pub cached: usize,
    pub stale_fetch: usize,
    pub stale_epoch: usize,
    pub over_limit: usize,
    pub admitted: usize,
}

/// Everything one run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub reference_epoch: DateTime<Utc>,
    pub window: TimeWindow,
    pub step_seconds: f64,
    pub admission: AdmissionStats,
    pub propagation: PropagationSummary,
    pub propagation_failures: Vec<SampleFailure>,
    pub geometry: GeometryStats,
    pub passes: ExtractionStats,
    pub scoring: BTreeMap<String, ScoringStats>,
    pub pass_summaries: Vec<PassSummary>,
    pub windows: BTreeMap<u32, Vec<VisibilityWindow>>,
    pub pools: BTreeMap<String, DynamicPool>,
    pub diffs: BTreeMap<String, PoolDiff>,
    pub stages: Vec<StageRecord>,
    pub validation: ValidationReport,
}

/// Per-satellite result of the observe/extract stage
struct ObservedSatellite {
    satellite_id: u32,
    observations: Vec<ObservationSample>,
    windows: Vec<VisibilityWindow>,
    geometry: GeometryStats,
    passes: ExtractionStats,
}

fn observe_chunk(
    engine: &GeometryEngine,
    chunk: Vec<(SatelliteTrajectory, PassExtractor)>,
) -> Vec<ObservedSatellite> {
    chunk
        .into_iter()
        .map(|(trajectory, extractor)| {
            let (observations, geometry) = engine.observe_track(&trajectory.samples);
            let extraction = extractor.extract(&observations);
            ObservedSatellite {
                satellite_id: trajectory.satellite_id,
                observations,
                windows: extraction.windows,
                geometry,
                passes: extraction.stats,
            }
        })
        .collect()
}

pub struct Pipeline {
    config: PlannerConfig,
    propagator: Arc<dyn Propagator>,
}

impl Pipeline {
    /// Build with the propagator named in the configuration
    pub fn new(config: PlannerConfig) -> Result<Self> {
        let propagator = config.propagator.build();
        Self::with_propagator(config, propagator)
    }

    pub fn with_propagator(config: PlannerConfig, propagator: Arc<dyn Propagator>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, propagator })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Parse element text into the cache, then evict entries that have
    /// gone stale relative to `fetched_at`
    pub fn ingest(&self, cache: &mut ElementCache, text: &str, fetched_at: DateTime<Utc>) -> Result<IngestReport> {
        let parsed = parse_tle(text)?;
        if parsed.stats.skipped > 0 {
            warn!(
                "Skipped {} of {} element records",
                parsed.stats.skipped, parsed.stats.records_seen
            );
        }
        let cache_stats = cache.extend(parsed.elements, fetched_at);
        info!(
            "Ingested {} element sets ({} new, {} replaced, {} ignored)",
            parsed.stats.parsed, cache_stats.inserted, cache_stats.replaced, cache_stats.ignored
        );
        let evicted = cache.evict_stale(fetched_at);
        if evicted > 0 {
            info!("Evicted {} stale element sets, {} remain", evicted, cache.len());
        }
        Ok(IngestReport {
            parse: parsed.stats,
            cache: cache_stats,
            evicted,
        })
    }

    fn admit(&self, cache: &ElementCache, reference_epoch: DateTime<Utc>) -> (BTreeMap<String, Vec<OrbitalElementSet>>, AdmissionStats) {
        let max_epoch_age = self.config.cache.max_epoch_age();
        let mut stats = AdmissionStats {
            cached: cache.len(),
            ..Default::default()
        };
        let mut admitted = BTreeMap::new();
        let mut fresh = 0;

        for (constellation, sets) in cache.by_constellation(reference_epoch) {
            fresh += sets.len();
            let mut current: Vec<OrbitalElementSet> = sets
                .into_iter()
                .filter(|s| {
                    let ok = s.epoch_age(reference_epoch).abs() <= max_epoch_age;
                    if !ok {
                        stats.stale_epoch += 1;
                    }
                    ok
                })
                .collect();
            if let Some(limit) = self.config.profile_for(&constellation).sample_limit {
                if current.len() > limit {
                    stats.over_limit += current.len() - limit;
                    current.truncate(limit);
                }
            }
            stats.admitted += current.len();
            if !current.is_empty() {
                admitted.insert(constellation, current);
            }
        }
        stats.stale_fetch = stats.cached - fresh;
        (admitted, stats)
    }

    fn stage(name: &str, observer: ObserverLocation, healthy: bool) -> StageRecord {
        StageRecord {
            stage: name.to_string(),
            observer,
            processed_at: Utc::now(),
            healthy,
        }
    }

    /// Run every stage against the cache contents.
    ///
    /// Zero usable element sets is the only input that fails the run;
    /// everything else degrades and is reported in the output.
    pub async fn run(
        &self,
        cache: &ElementCache,
        reference_epoch: DateTime<Utc>,
        previous: &BTreeMap<String, DynamicPool>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let run_id = Uuid::new_v4();
        let config = &self.config;
        info!("Pipeline run {} at reference epoch {}", run_id, reference_epoch);

        let (admitted, admission) = self.admit(cache, reference_epoch);
        info!(
            "Admitted {} of {} cached element sets ({} stale fetch, {} stale epoch, {} over limit)",
            admission.admitted, admission.cached, admission.stale_fetch, admission.stale_epoch, admission.over_limit
        );
        if admission.admitted == 0 {
            return Err(PlannerError::NoUsableElements);
        }

        let constellation_of: BTreeMap<u32, String> = admitted
            .iter()
            .flat_map(|(name, sets)| sets.iter().map(move |s| (s.catalog_number(), name.clone())))
            .collect();
        let elements: Vec<OrbitalElementSet> = admitted.values().flatten().cloned().collect();

        // Propagation
        let window = config.sampling.window(reference_epoch)?;
        let step = config.sampling.step();
        let propagation = scheduler::propagate(
            Arc::clone(&self.propagator),
            &elements,
            window,
            step,
            &config.budget,
            cancel,
        )
        .await?;
        let mut stages = vec![Self::stage("propagation", config.observer, !propagation.summary.degraded)];

        // Geometry and pass extraction
        let engine = GeometryEngine::new(config.observer, config.carrier_frequency_hz);
        let work: Vec<(SatelliteTrajectory, PassExtractor)> = propagation
            .trajectories
            .into_values()
            .map(|trajectory| {
                let constellation = constellation_of
                    .get(&trajectory.satellite_id)
                    .map(String::as_str)
                    .unwrap_or_default();
                let extractor = PassExtractor::new(config.min_elevation_for(constellation))
                    .with_reference_pass(config.selection.reference_pass_minutes);
                (trajectory, extractor)
            })
            .collect();

        let workers = config.budget.max_workers.max(1);
        let chunk_size = work.len().div_ceil(workers).max(1);
        let mut in_flight = JoinSet::new();
        let mut work = work.into_iter().peekable();
        while work.peek().is_some() {
            let chunk: Vec<_> = work.by_ref().take(chunk_size).collect();
            let engine = engine.clone();
            in_flight.spawn_blocking(move || observe_chunk(&engine, chunk));
        }

        let mut observations: BTreeMap<u32, Vec<ObservationSample>> = BTreeMap::new();
        let mut windows: BTreeMap<u32, Vec<VisibilityWindow>> = BTreeMap::new();
        let mut geometry = GeometryStats::default();
        let mut passes = ExtractionStats::default();
        while let Some(joined) = in_flight.join_next().await {
            let chunk = joined.map_err(|e| PlannerError::Worker(e.to_string()))?;
            for observed in chunk {
                geometry.merge(&observed.geometry);
                passes.merge(&observed.passes);
                windows.insert(observed.satellite_id, observed.windows);
                observations.insert(observed.satellite_id, observed.observations);
            }
        }
        info!(
            "Observed {} samples ({} dropped), {} windows ({} truncated)",
            geometry.observed,
            geometry.dropped(),
            passes.windows,
            passes.truncated
        );
        let site = *engine.observer();
        stages.push(Self::stage("geometry", site, geometry.dropped() == 0));
        stages.push(Self::stage(
            "passes",
            site,
            passes.out_of_order + passes.invalid_elevation + passes.foreign_satellite == 0,
        ));

        let pass_summaries: Vec<PassSummary> = windows.iter().map(|(id, w)| summarize(*id, w)).collect();

        // Scoring and selection
        let mut scoring = BTreeMap::new();
        let mut selections = JoinSet::new();
        for (constellation, sets) in &admitted {
            let (candidates, stats) = score_candidates(sets, &windows, &config.selection, reference_epoch);
            debug!(
                "{}: {} candidates ({} without windows, {} low coverage)",
                constellation, stats.accepted, stats.no_windows, stats.low_coverage
            );
            scoring.insert(constellation.clone(), stats);

            let profile = config.profile_for(constellation);
            let request = PoolRequest {
                constellation: constellation.clone(),
                target_count: profile.pool_target,
                min_visible: profile.min_visible,
                reference_epoch,
                observer: site,
                evaluation: window,
            };
            let selection = config.selection.clone();
            let prior = previous.get(constellation).cloned();
            selections.spawn_blocking(move || select_pool(&candidates, &selection, &request, prior.as_ref()));
        }

        let mut pools = BTreeMap::new();
        while let Some(joined) = selections.join_next().await {
            let pool = joined.map_err(|e| PlannerError::Worker(e.to_string()))?;
            pools.insert(pool.constellation.clone(), pool);
        }
        let diffs: BTreeMap<String, PoolDiff> = pools
            .iter()
            .filter_map(|(name, pool)| previous.get(name).map(|p| (name.clone(), pool.diff(p))))
            .collect();
        stages.push(Self::stage("selection", site, pools.values().all(|p| !p.degraded)));
        // Earlier versions this run built on must come from the same site
        for (name, pool) in previous.iter().filter(|(name, _)| pools.contains_key(*name)) {
            if let Some(observer) = pool.observer {
                stages.push(Self::stage(&format!("previous:{name}"), observer, true));
            }
        }

        let elevation_overrides: BTreeMap<String, f64> = admitted
            .keys()
            .filter_map(|name| {
                let el = config.min_elevation_for(name);
                (el != config.min_elevation_deg).then(|| (name.clone(), el))
            })
            .collect();

        // Validation
        let validation = validate(
            &ValidationInput {
                observations: &observations,
                windows: &windows,
                constellations: &constellation_of,
                stages: &stages,
                horizon: window.duration(),
                min_elevation_deg: config.min_elevation_deg,
                elevation_overrides: &elevation_overrides,
                satellites_processed: elements.len(),
            },
            &config.validation,
        );

        Ok(PipelineOutput {
            run_id,
            generated_at: Utc::now(),
            reference_epoch,
            window,
            step_seconds: config.sampling.step_seconds,
            admission,
            propagation: propagation.summary,
            propagation_failures: propagation.failures,
            geometry,
            passes,
            scoring,
            pass_summaries,
            windows,
            pools,
            diffs,
            stages,
            validation,
        })
    }
}
