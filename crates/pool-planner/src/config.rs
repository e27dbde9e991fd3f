//! Planner configuration
//!
//! Loaded from JSON; every section has defaults so a partial file is valid.

use crate::cache::CacheConfig;
use crate::scheduler::{ResourceBudget, TimeWindow};
use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::{ObserverLocation, PropagatorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid observer: {0}")]
    Observer(String),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Named sampling profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SamplingProfile {
    /// 200 points at 30 s
    Standard,
    /// 720 points at 10 s
    Dense,
}

impl SamplingProfile {
    pub fn points(self) -> usize {
        match self {
            SamplingProfile::Standard => 200,
            SamplingProfile::Dense => 720,
        }
    }

    pub fn step_seconds(self) -> f64 {
        match self {
            SamplingProfile::Standard => 30.0,
            SamplingProfile::Dense => 10.0,
        }
    }

    pub fn sampling(self) -> SamplingConfig {
        let step = self.step_seconds();
        SamplingConfig {
            start: None,
            duration_minutes: (self.points() - 1) as f64 * step / 60.0,
            step_seconds: step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Window start; the run's reference epoch when absent
    pub start: Option<DateTime<Utc>>,
    pub duration_minutes: f64,
    pub step_seconds: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingProfile::Standard.sampling()
    }
}

impl SamplingConfig {
    pub fn step(&self) -> Duration {
        Duration::milliseconds((self.step_seconds * 1000.0).round() as i64)
    }

    pub fn window(&self, reference: DateTime<Utc>) -> Result<TimeWindow> {
        let start = self.start.unwrap_or(reference);
        let end = start + Duration::milliseconds((self.duration_minutes * 60_000.0).round() as i64);
        TimeWindow::new(start, end).map_err(|e| invalid("sampling", e.to_string()))
    }

    /// Number of timestamps in the window, endpoints included
    pub fn points(&self) -> usize {
        if self.step_seconds <= 0.0 {
            return 0;
        }
        (self.duration_minutes * 60.0 / self.step_seconds).floor() as usize + 1
    }

    fn validate(&self) -> Result<()> {
        if !(self.step_seconds > 0.0) {
            return Err(invalid("sampling.step_seconds", "must be positive"));
        }
        if !(self.duration_minutes > 0.0) {
            return Err(invalid("sampling.duration_minutes", "must be positive"));
        }
        Ok(())
    }
}

/// Composite score weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    pub phase: f64,
    pub raan: f64,
    pub coverage: f64,
    pub stability: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            phase: 0.35,
            raan: 0.25,
            coverage: 0.25,
            stability: 0.15,
        }
    }
}

impl SelectionWeights {
    pub fn total(&self) -> f64 {
        self.phase + self.raan + self.coverage + self.stability
    }

    fn validate(&self) -> Result<()> {
        let all = [self.phase, self.raan, self.coverage, self.stability];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("selection.weights", "weights must be finite and non-negative"));
        }
        if self.total() <= 0.0 {
            return Err(invalid("selection.weights", "at least one weight must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub weights: SelectionWeights,
    /// Pool size for constellations without a profile
    pub target_count: usize,
    /// Minimum marginal gain to keep adding members
    pub convergence_threshold: f64,
    pub max_iterations: usize,
    /// Candidates scoring below this on coverage are rejected
    pub min_coverage_score: f64,
    pub min_altitude_km: f64,
    pub max_altitude_km: f64,
    pub min_inclination_deg: f64,
    pub max_inclination_deg: f64,
    pub max_eccentricity: f64,
    pub reference_pass_minutes: f64,
    /// Angular harmonics used by the diversity statistics
    pub harmonics: usize,
    pub evaluation_step_seconds: f64,
    /// Simultaneously visible members required for a grid point to count as covered
    pub min_visible: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            weights: SelectionWeights::default(),
            target_count: 20,
            convergence_threshold: 0.01,
            max_iterations: 100,
            min_coverage_score: 0.1,
            min_altitude_km: 500.0,
            max_altitude_km: 1250.0,
            min_inclination_deg: 40.0,
            max_inclination_deg: 100.0,
            max_eccentricity: 0.1,
            reference_pass_minutes: 10.0,
            harmonics: 4,
            evaluation_step_seconds: 60.0,
            min_visible: 5,
        }
    }
}

impl SelectionConfig {
    fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(self.convergence_threshold >= 0.0) {
            return Err(invalid("selection.convergence_threshold", "must be non-negative"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("selection.max_iterations", "must be positive"));
        }
        if self.harmonics == 0 {
            return Err(invalid("selection.harmonics", "must be positive"));
        }
        if self.min_altitude_km >= self.max_altitude_km {
            return Err(invalid("selection.altitude band", "min must be below max"));
        }
        if self.min_inclination_deg >= self.max_inclination_deg {
            return Err(invalid("selection.inclination band", "min must be below max"));
        }
        if !(self.max_eccentricity > 0.0 && self.max_eccentricity < 1.0) {
            return Err(invalid("selection.max_eccentricity", "must be in (0, 1)"));
        }
        if !(self.reference_pass_minutes > 0.0) || !(self.evaluation_step_seconds > 0.0) {
            return Err(invalid("selection", "reference pass and evaluation step must be positive"));
        }
        Ok(())
    }
}

/// Per-constellation overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstellationProfile {
    pub pool_target: usize,
    pub min_visible: usize,
    pub min_elevation_deg: Option<f64>,
    /// Maximum satellites admitted per run, lowest catalog numbers first
    pub sample_limit: Option<usize>,
}

impl Default for ConstellationProfile {
    fn default() -> Self {
        let selection = SelectionConfig::default();
        Self {
            pool_target: selection.target_count,
            min_visible: selection.min_visible,
            min_elevation_deg: None,
            sample_limit: None,
        }
    }
}

/// Visibility statistics expected for a constellation class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedVisibility {
    pub pass_duration_minutes: (f64, f64),
    pub max_elevation_deg: (f64, f64),
    pub passes_per_day: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Expected ranges keyed by constellation; `leo` is the fallback
    pub expected: BTreeMap<String, ExpectedVisibility>,
    pub pass_threshold: f64,
    pub position_tolerance_m: f64,
    pub time_tolerance_seconds: f64,
    /// Below-horizon samples are part of the observation set
    pub retain_below_horizon: bool,
    /// Fraction of the visible cap a LEO shell populates at once
    pub leo_coverage_factor: f64,
}

pub const FALLBACK_CLASS: &str = "leo";

impl Default for ValidationConfig {
    fn default() -> Self {
        let mut expected = BTreeMap::new();
        expected.insert(
            "starlink".to_string(),
            ExpectedVisibility {
                pass_duration_minutes: (4.0, 12.0),
                max_elevation_deg: (10.0, 85.0),
                passes_per_day: (8.0, 25.0),
            },
        );
        expected.insert(
            "oneweb".to_string(),
            ExpectedVisibility {
                pass_duration_minutes: (6.0, 18.0),
                max_elevation_deg: (10.0, 85.0),
                passes_per_day: (4.0, 12.0),
            },
        );
        expected.insert(
            FALLBACK_CLASS.to_string(),
            ExpectedVisibility {
                pass_duration_minutes: (4.0, 18.0),
                max_elevation_deg: (10.0, 90.0),
                passes_per_day: (4.0, 25.0),
            },
        );
        Self {
            expected,
            pass_threshold: 0.7,
            position_tolerance_m: 100.0,
            time_tolerance_seconds: 3600.0,
            retain_below_horizon: true,
            leo_coverage_factor: 0.15,
        }
    }
}

impl ValidationConfig {
    /// Expected ranges for a constellation, falling back to the generic class
    pub fn expected_for(&self, constellation: &str) -> Option<&ExpectedVisibility> {
        self.expected
            .get(constellation)
            .or_else(|| self.expected.get(FALLBACK_CLASS))
    }
}

/// Top-level planner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub observer: ObserverLocation,
    pub min_elevation_deg: f64,
    pub carrier_frequency_hz: f64,
    pub sampling: SamplingConfig,
    pub budget: ResourceBudget,
    pub propagator: PropagatorKind,
    pub selection: SelectionConfig,
    pub constellations: BTreeMap<String, ConstellationProfile>,
    pub validation: ValidationConfig,
    pub cache: CacheConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let mut constellations = BTreeMap::new();
        constellations.insert(
            "starlink".to_string(),
            ConstellationProfile {
                pool_target: 25,
                min_visible: 8,
                ..ConstellationProfile::default()
            },
        );
        constellations.insert(
            "oneweb".to_string(),
            ConstellationProfile {
                pool_target: 15,
                min_visible: 5,
                ..ConstellationProfile::default()
            },
        );
        Self {
            observer: ObserverLocation::default(),
            min_elevation_deg: 10.0,
            carrier_frequency_hz: 12.0e9,
            sampling: SamplingConfig::default(),
            budget: ResourceBudget::default(),
            propagator: PropagatorKind::default(),
            selection: SelectionConfig::default(),
            constellations,
            validation: ValidationConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PlannerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.observer
            .validate()
            .map_err(|e| ConfigError::Observer(e.to_string()))?;
        if !(-90.0..=90.0).contains(&self.min_elevation_deg) {
            return Err(invalid("min_elevation_deg", "must be within [-90, 90]"));
        }
        if !(self.carrier_frequency_hz > 0.0) {
            return Err(invalid("carrier_frequency_hz", "must be positive"));
        }
        self.sampling.validate()?;
        self.selection.validate()?;
        for (name, profile) in &self.constellations {
            if let Some(el) = profile.min_elevation_deg {
                if !(-90.0..=90.0).contains(&el) {
                    return Err(invalid("constellations.min_elevation_deg", format!("{name}: {el}")));
                }
            }
        }
        if !(0.0..=1.0).contains(&self.validation.pass_threshold) {
            return Err(invalid("validation.pass_threshold", "must be within [0, 1]"));
        }
        if !(self.cache.max_fetch_age_hours > 0.0 && self.cache.max_epoch_age_days > 0.0) {
            return Err(invalid("cache", "ages must be positive"));
        }
        Ok(())
    }

    /// Profile for a constellation, or one built from the selection defaults
    pub fn profile_for(&self, constellation: &str) -> ConstellationProfile {
        self.constellations
            .get(constellation)
            .cloned()
            .unwrap_or_else(|| ConstellationProfile {
                pool_target: self.selection.target_count,
                min_visible: self.selection.min_visible,
                min_elevation_deg: None,
                sample_limit: None,
            })
    }

    pub fn min_elevation_for(&self, constellation: &str) -> f64 {
        self.constellations
            .get(constellation)
            .and_then(|p| p.min_elevation_deg)
            .unwrap_or(self.min_elevation_deg)
    }

    pub fn with_profile(mut self, profile: SamplingProfile) -> Self {
        let start = self.sampling.start;
        self.sampling = SamplingConfig {
            start,
            ..profile.sampling()
        };
        self
    }
}
