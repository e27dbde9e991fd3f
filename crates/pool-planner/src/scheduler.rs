//! Batch propagation scheduler
//!
//! Fans (satellite × timestamp) work out over at most `max_workers` blocking
//! tasks. Each worker builds its own accumulator and hands it back on
//! completion; the merge into the ordered result map happens on the driver,
//! so no lock is ever held across a batch. The cancellation token is checked
//! before each batch is dispatched; batches already running finish and their
//! trajectories stay valid.

use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::{OrbitalElementSet, Propagator, TrajectorySample};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Below this share of successful (satellite, time) pairs a run is degraded
pub const MIN_SUCCESS_RATE: f64 = 0.90;

/// Per-pair failure details kept; the failure counter itself is exact.
const MAX_RECORDED_FAILURES: usize = 10_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("invalid time window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("sampling step must be positive, got {0} ms")]
    InvalidStep(i64),
    #[error("resource budget infeasible: {0}")]
    BudgetInfeasible(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(SchedulerError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Sample instants from `start`, every `step`, up to and including `end`
    pub fn timestamps(&self, step: Duration) -> Result<Vec<DateTime<Utc>>> {
        if step <= Duration::zero() {
            return Err(SchedulerError::InvalidStep(step.num_milliseconds()));
        }
        let mut times = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.end {
            times.push(cursor);
            cursor += step;
        }
        Ok(times)
    }
}

/// Limits on one propagation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    pub max_memory_bytes: u64,
    pub max_batch_size: usize,
    pub max_workers: usize,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            max_batch_size: 100,
            max_workers: 4,
        }
    }
}

impl ResourceBudget {
    /// In-memory size of one propagated sample
    pub const SAMPLE_FOOTPRINT_BYTES: u64 = std::mem::size_of::<TrajectorySample>() as u64;

    /// Satellites per batch so one batch's samples fit `max_memory_bytes`
    pub fn batch_size(&self, points_per_satellite: usize) -> Result<usize> {
        if self.max_workers == 0 {
            return Err(SchedulerError::BudgetInfeasible("max_workers is zero".into()));
        }
        if self.max_batch_size == 0 {
            return Err(SchedulerError::BudgetInfeasible("max_batch_size is zero".into()));
        }

        let per_satellite = points_per_satellite as u64 * Self::SAMPLE_FOOTPRINT_BYTES;
        let by_memory = self.max_memory_bytes.checked_div(per_satellite).unwrap_or(u64::MAX);
        if by_memory == 0 {
            return Err(SchedulerError::BudgetInfeasible(format!(
                "one satellite needs {} bytes for {} samples, budget is {} bytes",
                per_satellite, points_per_satellite, self.max_memory_bytes
            )));
        }

        Ok(usize::try_from(by_memory).unwrap_or(usize::MAX).min(self.max_batch_size))
    }
}

/// Run-level cancellation flag, checked at batch boundaries
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleFailure {
    pub satellite_id: u32,
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

/// Successful samples of one satellite, in timestamp order
#[derive(Debug, Clone)]
pub struct SatelliteTrajectory {
    pub satellite_id: u32,
    pub samples: Vec<TrajectorySample>,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PropagationSummary {
    pub propagator: String,
    pub satellites_requested: usize,
    pub satellites_propagated: usize,
    pub unpropagatable: Vec<u32>,
    pub satellites_skipped: usize,
    pub pairs_requested: usize,
    pub pairs_attempted: usize,
    pub pairs_succeeded: usize,
    pub pairs_failed: usize,
    /// Failed pairs beyond the recorded-detail cap
    pub failures_unrecorded: usize,
    pub success_rate: f64,
    pub degraded: bool,
    pub cancelled: bool,
    pub batch_size: usize,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub worker_panics: usize,
}

#[derive(Debug, Clone)]
pub struct PropagationResult {
    /// Satellites with at least one sample; unpropagatable ones are absent
    pub trajectories: BTreeMap<u32, SatelliteTrajectory>,
    pub failures: Vec<SampleFailure>,
    pub summary: PropagationSummary,
}

#[derive(Debug, Default)]
struct BatchOutput {
    /// Every satellite the batch accounts for, including failed ones
    satellites: Vec<u32>,
    trajectories: Vec<SatelliteTrajectory>,
    failures: Vec<SampleFailure>,
    pairs_attempted: usize,
    pairs_succeeded: usize,
    panicked: bool,
}

impl BatchOutput {
    /// Every pair of `satellites` failed with `reason`
    fn lost(satellites: Vec<u32>, times: &[DateTime<Utc>], reason: &str) -> Self {
        let failures = satellites
            .iter()
            .flat_map(|&satellite_id| {
                times.iter().map(move |&timestamp| SampleFailure {
                    satellite_id,
                    timestamp,
                    error: reason.to_string(),
                })
            })
            .collect();
        Self {
            pairs_attempted: satellites.len() * times.len(),
            satellites,
            trajectories: Vec::new(),
            failures,
            pairs_succeeded: 0,
            panicked: false,
        }
    }

    fn panicked(batch: &[OrbitalElementSet], times: &[DateTime<Utc>]) -> Self {
        let ids = batch.iter().map(|e| e.catalog_number()).collect();
        Self {
            panicked: true,
            ..Self::lost(ids, times, "propagation worker panicked")
        }
    }
}

fn propagate_batch(
    propagator: &dyn Propagator,
    batch: &[OrbitalElementSet],
    times: &[DateTime<Utc>],
) -> BatchOutput {
    let mut output = BatchOutput::default();

    for elements in batch {
        let satellite_id = elements.catalog_number();
        let mut samples = Vec::with_capacity(times.len());
        let mut failed = 0;

        for (at, result) in times.iter().zip(propagator.propagate_series(elements, times)) {
            match result {
                Ok(state) => samples.push(TrajectorySample::from_state(satellite_id, &state)),
                Err(err) => {
                    failed += 1;
                    output.failures.push(SampleFailure {
                        satellite_id,
                        timestamp: *at,
                        error: err.to_string(),
                    });
                }
            }
        }

        output.satellites.push(satellite_id);
        output.pairs_attempted += times.len();
        output.pairs_succeeded += samples.len();
        output.trajectories.push(SatelliteTrajectory {
            satellite_id,
            samples,
            failed,
        });
    }

    output
}

/// Fold one batch into the run totals. Every attempted pair either succeeded
/// or has a failure, recorded in detail up to the cap.
fn merge_batch(
    output: BatchOutput,
    summary: &mut PropagationSummary,
    trajectories: &mut BTreeMap<u32, SatelliteTrajectory>,
    failures: &mut Vec<SampleFailure>,
) {
    summary.pairs_attempted += output.pairs_attempted;
    summary.pairs_succeeded += output.pairs_succeeded;
    for failure in output.failures {
        if failures.len() < MAX_RECORDED_FAILURES {
            failures.push(failure);
        } else {
            summary.failures_unrecorded += 1;
        }
    }
    for trajectory in output.trajectories {
        if trajectory.samples.is_empty() {
            debug!(satellite = trajectory.satellite_id, "No successful samples");
        } else {
            trajectories.insert(trajectory.satellite_id, trajectory);
        }
    }
}

fn run_batch(
    propagator: &dyn Propagator,
    batch: &[OrbitalElementSet],
    times: &[DateTime<Utc>],
) -> BatchOutput {
    panic::catch_unwind(AssertUnwindSafe(|| propagate_batch(propagator, batch, times)))
        .unwrap_or_else(|_| BatchOutput::panicked(batch, times))
}

/// Propagate every element set across `window` at `step`.
///
/// Per-sample failures are recorded and never abort the run. Only an
/// invalid window/step or an infeasible budget is a hard error.
pub async fn propagate(
    propagator: Arc<dyn Propagator>,
    elements: &[OrbitalElementSet],
    window: TimeWindow,
    step: Duration,
    budget: &ResourceBudget,
    cancel: &CancellationToken,
) -> Result<PropagationResult> {
    let times: Arc<[DateTime<Utc>]> = window.timestamps(step)?.into();
    let batch_size = budget.batch_size(times.len())?;
    let batches: Vec<Vec<OrbitalElementSet>> = elements.chunks(batch_size).map(|c| c.to_vec()).collect();

    let mut summary = PropagationSummary {
        propagator: propagator.name().to_string(),
        satellites_requested: elements.len(),
        pairs_requested: elements.len() * times.len(),
        batch_size,
        batches_total: batches.len(),
        ..Default::default()
    };

    info!(
        "Propagating {} satellites x {} points with {} ({} batches of <= {}, {} workers)",
        elements.len(),
        times.len(),
        summary.propagator,
        summary.batches_total,
        batch_size,
        budget.max_workers
    );

    let mut trajectories = BTreeMap::new();
    let mut failures = Vec::new();
    let mut attempted: Vec<u32> = Vec::with_capacity(elements.len());
    let mut outstanding: BTreeSet<u32> = BTreeSet::new();
    let mut pending = batches.into_iter();
    let mut in_flight = JoinSet::new();

    loop {
        while in_flight.len() < budget.max_workers && !summary.cancelled {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                warn!("Propagation cancelled, draining {} in-flight batches", in_flight.len());
                break;
            }
            let Some(batch) = pending.next() else { break };
            attempted.extend(batch.iter().map(|e| e.catalog_number()));
            outstanding.extend(batch.iter().map(|e| e.catalog_number()));

            let propagator = Arc::clone(&propagator);
            let times = Arc::clone(&times);
            in_flight.spawn_blocking(move || run_batch(propagator.as_ref(), &batch, &times));
        }

        match in_flight.join_next().await {
            Some(Ok(output)) => {
                summary.batches_completed += 1;
                if output.panicked {
                    summary.worker_panics += 1;
                    warn!("Propagation worker panicked; batch recorded as failed");
                }
                for id in &output.satellites {
                    outstanding.remove(id);
                }
                merge_batch(output, &mut summary, &mut trajectories, &mut failures);
            }
            Some(Err(err)) => warn!(error = %err, "Propagation worker could not be joined"),
            None => break,
        }
    }

    // Batches whose worker never reported back
    if !outstanding.is_empty() {
        warn!("{} satellites lost with their workers", outstanding.len());
        let lost = BatchOutput::lost(
            outstanding.into_iter().collect(),
            &times,
            "propagation worker could not be joined",
        );
        merge_batch(lost, &mut summary, &mut trajectories, &mut failures);
    }

    summary.satellites_skipped = pending.map(|b| b.len()).sum();
    summary.satellites_propagated = trajectories.len();
    summary.unpropagatable = attempted
        .into_iter()
        .filter(|id| !trajectories.contains_key(id))
        .collect();
    summary.unpropagatable.sort_unstable();
    summary.pairs_failed = summary.pairs_attempted - summary.pairs_succeeded;
    summary.success_rate = if summary.pairs_attempted > 0 {
        summary.pairs_succeeded as f64 / summary.pairs_attempted as f64
    } else {
        0.0
    };
    summary.degraded = summary.cancelled || summary.success_rate < MIN_SUCCESS_RATE;
    failures.sort_by(|a, b| (a.satellite_id, a.timestamp).cmp(&(b.satellite_id, b.timestamp)));

    info!(
        "Propagation done: {}/{} satellites, success rate {:.3}{}",
        summary.satellites_propagated,
        summary.satellites_requested,
        summary.success_rate,
        if summary.degraded { " (degraded)" } else { "" }
    );
    if !summary.unpropagatable.is_empty() {
        warn!("{} satellites unpropagatable", summary.unpropagatable.len());
    }

    Ok(PropagationResult {
        trajectories,
        failures,
        summary,
    })
}
