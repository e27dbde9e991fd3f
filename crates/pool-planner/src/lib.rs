//! Dynamic LEO Satellite Pool Planner
//!
//! Maintains a bounded, well-distributed working set of LEO satellites that
//! stay observable from a fixed ground point.
//!
//! # Pipeline
//!
//! ```text
//! TLE text -> ElementCache -> propagate (batched, budgeted)
//!          -> GeometryEngine -> PassExtractor -> score candidates
//!          -> select_pool (per constellation, concurrent) -> validate
//! ```
//!
//! # Pool Utility
//!
//! ```text
//! U(P) = Σ (w_c·C + w_s·S) + |P|·(w_φ·D_phase + w_Ω·D_raan)
//! ```
//!
//! | Term | Default weight | Description |
//! |------|----------------|-------------|
//! | D_phase | 0.35 | Dispersion of in-plane phase angles |
//! | D_raan  | 0.25 | Dispersion of ascending nodes |
//! | C       | 0.25 | Coverage quality (elevation, pass length, height band) |
//! | S       | 0.15 | Orbital stability (eccentricity, inclination band) |
//!
//! Members are added greedily by marginal utility; each member's composite
//! score is its marginal gain when it joined, so the scores sum to U(P).

use chrono::{DateTime, Utc};
use orbital_mechanics::{ObserverLocation, OrbitalElementSet, ParseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod diversity;
pub mod passes;
pub mod pipeline;
pub mod scheduler;
pub mod scorer;
pub mod selector;
pub mod validation;

pub use cache::{CacheConfig, ElementCache};
pub use config::{PlannerConfig, SamplingProfile, SelectionConfig, SelectionWeights};
pub use diversity::CircularStats;
pub use passes::{PassExtractor, PassSummary, VisibilityWindow};
pub use pipeline::{Pipeline, PipelineOutput};
pub use scheduler::{propagate, CancellationToken, PropagationResult, ResourceBudget, TimeWindow};
pub use selector::{select_pool, PoolRequest};
pub use validation::{validate, ValidationReport};

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Scheduling error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),
    #[error("Element parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("No usable element sets for this run")]
    NoUsableElements,
    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;

/// Why a pool came out empty or short. Never raised, only reported.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectionError {
    #[error("No candidates meet the minimum criteria for {constellation}")]
    NoCandidates { constellation: String },
    #[error("Selected {selected} of {target} requested members")]
    ShortPool { selected: usize, target: usize },
}

/// A visible satellite scored for pool membership
#[derive(Debug, Clone, Serialize)]
pub struct PoolCandidate {
    pub satellite_id: u32,
    pub name: String,
    pub constellation: String,
    pub elements: OrbitalElementSet,
    pub windows: Vec<VisibilityWindow>,
    /// Mean argument of latitude at the reference epoch (deg)
    pub phase_deg: f64,
    /// RAAN at the reference epoch (deg)
    pub raan_deg: f64,
    pub coverage_score: f64,
    pub stability_score: f64,
    /// Weighted coverage and stability terms; independent of the pool
    pub static_score: f64,
}

impl PoolCandidate {
    pub fn visible_at(&self, at: DateTime<Utc>) -> bool {
        self.windows.iter().any(|w| w.contains(at))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMember {
    pub satellite_id: u32,
    pub name: String,
    /// Marginal utility when the member joined
    pub composite_score: f64,
    pub phase_contribution: f64,
    pub raan_contribution: f64,
    pub coverage_score: f64,
    pub stability_score: f64,
    pub phase_deg: f64,
    pub raan_deg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub utility: f64,
    /// Weighted blend of phase and RAAN dispersion
    pub diversity_score: f64,
    pub phase_dispersion: f64,
    pub raan_dispersion: f64,
    pub raan_resultant_length: f64,
    /// 1 - coefficient of variation of the visible count
    pub coverage_uniformity: f64,
    /// Fraction of grid points with at least `min_visible` members up
    pub coverage_ratio: f64,
    pub mean_visible: f64,
    pub grid_points: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    Converged,
    IterationCap,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStats {
    pub candidates_considered: usize,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub retained_from_previous: usize,
    /// Repeated catalog numbers dropped before selection
    #[serde(default)]
    pub duplicates_dropped: usize,
}

/// One versioned selection result. Never edited; the next run replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicPool {
    pub constellation: String,
    pub version: u64,
    pub reference_epoch: DateTime<Utc>,
    /// Site the pool was planned for
    #[serde(default)]
    pub observer: Option<ObserverLocation>,
    pub target_count: usize,
    /// In selection order
    pub members: Vec<PoolMember>,
    pub metrics: PoolMetrics,
    pub stats: SelectionStats,
    pub degraded: bool,
    pub issues: Vec<SelectionError>,
}

impl DynamicPool {
    pub fn ids(&self) -> BTreeSet<u32> {
        self.members.iter().map(|m| m.satellite_id).collect()
    }

    pub fn contains(&self, satellite_id: u32) -> bool {
        self.members.iter().any(|m| m.satellite_id == satellite_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Membership change relative to an earlier version
    pub fn diff(&self, previous: &DynamicPool) -> PoolDiff {
        let now = self.ids();
        let before = previous.ids();
        let added: Vec<u32> = now.difference(&before).copied().collect();
        let removed: Vec<u32> = before.difference(&now).copied().collect();
        let retained: Vec<u32> = now.intersection(&before).copied().collect();
        let churn = added.len() + removed.len();
        let base = now.len().max(before.len());

        PoolDiff {
            from_version: previous.version,
            to_version: self.version,
            churn_rate: if base > 0 { churn as f64 / (2 * base) as f64 } else { 0.0 },
            churn,
            added,
            removed,
            retained,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDiff {
    pub from_version: u64,
    pub to_version: u64,
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
    pub retained: Vec<u32>,
    pub churn: usize,
    /// Churn over twice the larger pool size, in [0, 1]
    pub churn_rate: f64,
}
