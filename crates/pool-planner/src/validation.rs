//! Scientific validation
//!
//! Read-only checks over a finished run. Four categories feed one weighted
//! quality score:
//!
//! | Category | Weight | Passes at |
//! |----------|--------|-----------|
//! | Geometry bounds | 0.35 | 0.8 |
//! | Physical plausibility | 0.30 | 0.7 |
//! | Real-data sampling | 0.25 | 0.6 |
//! | Cross-stage consistency | 0.10 | 0.7 |
//!
//! A score below the configured threshold marks the report failed. The
//! verdict is advisory; nothing here blocks the pipeline.

use crate::config::{ExpectedVisibility, ValidationConfig};
use crate::passes::VisibilityWindow;
use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::{ObservationSample, ObserverLocation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const W_GEOMETRY: f64 = 0.35;
pub const W_PHYSICS: f64 = 0.30;
pub const W_SAMPLING: f64 = 0.25;
pub const W_CROSS_STAGE: f64 = 0.10;

const GEOMETRY_PASS: f64 = 0.8;
const PHYSICS_PASS: f64 = 0.7;
const SAMPLING_PASS: f64 = 0.6;
const CROSS_STAGE_PASS: f64 = 0.7;

/// Minimum horizon for a passes-per-day estimate
const PASSES_PER_DAY_MIN_HORIZON_HOURS: i64 = 12;

const SHORT_SERIES_POINTS: usize = 3;
const MAX_SHORT_SERIES_PENALTIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Geometry,
    Physics,
    Sampling,
    CrossStage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub category: Category,
    pub severity: Severity,
    pub message: String,
}

/// Observer and wall-clock time a stage ran with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub observer: ObserverLocation,
    pub processed_at: DateTime<Utc>,
    /// Stage finished without degrading its output
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub score: f64,
    pub passed: bool,
}

impl CategoryResult {
    fn new(score: f64, pass_at: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            score,
            passed: score >= pass_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub geometry: CategoryResult,
    pub physics: CategoryResult,
    pub sampling: CategoryResult,
    pub cross_stage: CategoryResult,
    pub quality_score: f64,
    pub validation_failed: bool,
    pub stage_flags: BTreeMap<String, bool>,
    pub anomalies: Vec<Anomaly>,
}

impl ValidationReport {
    pub fn max_severity(&self) -> Option<Severity> {
        self.anomalies.iter().map(|a| a.severity).max()
    }
}

/// Everything the checks read
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub observations: &'a BTreeMap<u32, Vec<ObservationSample>>,
    pub windows: &'a BTreeMap<u32, Vec<VisibilityWindow>>,
    /// Satellite -> constellation name
    pub constellations: &'a BTreeMap<u32, String>,
    pub stages: &'a [StageRecord],
    pub horizon: Duration,
    pub min_elevation_deg: f64,
    /// Constellation -> minimum elevation where it differs from the default
    pub elevation_overrides: &'a BTreeMap<String, f64>,
    /// Satellites that entered the run
    pub satellites_processed: usize,
}

impl ValidationInput<'_> {
    fn min_elevation_for(&self, constellation: &str) -> f64 {
        self.elevation_overrides
            .get(constellation)
            .copied()
            .unwrap_or(self.min_elevation_deg)
    }

    fn min_elevation_of(&self, satellite_id: u32) -> f64 {
        self.constellations
            .get(&satellite_id)
            .map_or(self.min_elevation_deg, |c| self.min_elevation_for(c))
    }

    /// Sum of per-constellation bounds, each at its own threshold.
    /// Satellites without a constellation use the default threshold.
    fn visibility_bound(&self, coverage_factor: f64) -> usize {
        let mut sizes: BTreeMap<&str, usize> = BTreeMap::new();
        for name in self.constellations.values() {
            *sizes.entry(name.as_str()).or_default() += 1;
        }
        let mapped: usize = sizes.values().sum();
        let unmapped = self.satellites_processed.saturating_sub(mapped);
        sizes
            .iter()
            .map(|(name, n)| theoretical_max_visible(*n, self.min_elevation_for(name), coverage_factor))
            .sum::<usize>()
            + theoretical_max_visible(unmapped, self.min_elevation_deg, coverage_factor)
    }
}

#[derive(Default)]
struct Findings {
    anomalies: Vec<Anomaly>,
}

impl Findings {
    fn push(&mut self, category: Category, severity: Severity, message: String) {
        self.anomalies.push(Anomaly {
            category,
            severity,
            message,
        });
    }
}

pub fn validate(input: &ValidationInput<'_>, config: &ValidationConfig) -> ValidationReport {
    let mut findings = Findings::default();

    let geometry = CategoryResult::new(check_geometry(input, config, &mut findings), GEOMETRY_PASS);
    let physics = CategoryResult::new(check_physics(input, config, &mut findings), PHYSICS_PASS);
    let sampling = CategoryResult::new(check_sampling(input, config, &mut findings), SAMPLING_PASS);
    let cross_stage = CategoryResult::new(check_cross_stage(input, config, &mut findings), CROSS_STAGE_PASS);

    let quality_score = W_GEOMETRY * geometry.score
        + W_PHYSICS * physics.score
        + W_SAMPLING * sampling.score
        + W_CROSS_STAGE * cross_stage.score;
    let validation_failed = quality_score < config.pass_threshold;

    let stage_flags = input
        .stages
        .iter()
        .map(|s| (s.stage.clone(), s.healthy))
        .collect();

    if validation_failed {
        warn!(
            "Validation failed: quality {:.3} < {:.3} ({} anomalies)",
            quality_score,
            config.pass_threshold,
            findings.anomalies.len()
        );
    } else {
        info!("Validation passed: quality {:.3}", quality_score);
    }

    ValidationReport {
        geometry,
        physics,
        sampling,
        cross_stage,
        quality_score,
        validation_failed,
        stage_flags,
        anomalies: findings.anomalies,
    }
}

fn sample_in_bounds(sample: &ObservationSample, retain_below_horizon: bool) -> bool {
    let low = if retain_below_horizon { -90.0 } else { 0.0 };
    (low..=90.0).contains(&sample.elevation_deg) && (0.0..360.0).contains(&sample.azimuth_deg)
}

fn check_geometry(input: &ValidationInput<'_>, config: &ValidationConfig, findings: &mut Findings) -> f64 {
    let total: usize = input.observations.values().map(Vec::len).sum();
    if total == 0 {
        findings.push(Category::Geometry, Severity::High, "No observation samples to check".into());
        return 0.0;
    }
    let violations = input
        .observations
        .values()
        .flatten()
        .filter(|s| !sample_in_bounds(s, config.retain_below_horizon))
        .count();
    let rate = violations as f64 / total as f64;

    if violations > 0 {
        let severity = if rate > 0.1 { Severity::High } else { Severity::Medium };
        findings.push(
            Category::Geometry,
            severity,
            format!("{violations} of {total} samples outside elevation/azimuth bounds ({:.1}%)", rate * 100.0),
        );
    }
    (1.0 - 3.0 * rate).max(0.0)
}

fn overlaps(range: (f64, f64), expected: (f64, f64)) -> bool {
    range.0 <= expected.1 && range.1 >= expected.0
}

fn check_physics(input: &ValidationInput<'_>, config: &ValidationConfig, findings: &mut Findings) -> f64 {
    let mut by_constellation: BTreeMap<&str, (Vec<&VisibilityWindow>, usize)> = BTreeMap::new();
    for (id, windows) in input.windows {
        let name = input.constellations.get(id).map(String::as_str).unwrap_or("unknown");
        let entry = by_constellation.entry(name).or_default();
        entry.0.extend(windows.iter());
        entry.1 += 1;
    }

    let horizon_days = input.horizon.num_seconds() as f64 / 86_400.0;
    let mut violations = 0usize;

    for (name, (windows, satellites)) in &by_constellation {
        let Some(expected) = config.expected_for(name) else {
            continue;
        };
        violations += physics_violations(name, windows, *satellites, horizon_days, input.horizon, expected, findings);
    }

    (1.0 - 0.2 * violations as f64).max(0.0)
}

fn physics_violations(
    name: &str,
    windows: &[&VisibilityWindow],
    satellites: usize,
    horizon_days: f64,
    horizon: Duration,
    expected: &ExpectedVisibility,
    findings: &mut Findings,
) -> usize {
    if windows.is_empty() {
        return 0;
    }
    let mut violations = 0;

    let complete: Vec<f64> = windows
        .iter()
        .filter(|w| !w.truncated)
        .map(|w| w.duration_minutes())
        .collect();
    if !complete.is_empty() {
        let mean = complete.iter().sum::<f64>() / complete.len() as f64;
        let (low, high) = expected.pass_duration_minutes;
        if mean < low || mean > high {
            violations += 1;
            findings.push(
                Category::Physics,
                Severity::Medium,
                format!("{name}: mean pass duration {mean:.1} min outside [{low}, {high}]"),
            );
        }
    }

    let peaks = windows.iter().map(|w| w.peak_elevation_deg);
    let observed = (
        peaks.clone().fold(f64::INFINITY, f64::min),
        peaks.fold(f64::NEG_INFINITY, f64::max),
    );
    if !overlaps(observed, expected.max_elevation_deg) {
        violations += 1;
        findings.push(
            Category::Physics,
            Severity::Medium,
            format!(
                "{name}: peak elevations [{:.1}, {:.1}] disjoint from expected {:?}",
                observed.0, observed.1, expected.max_elevation_deg
            ),
        );
    }

    if horizon >= Duration::hours(PASSES_PER_DAY_MIN_HORIZON_HOURS) && satellites > 0 {
        let per_day = windows.len() as f64 / satellites as f64 / horizon_days;
        let (low, high) = expected.passes_per_day;
        if per_day < low || per_day > high {
            violations += 1;
            findings.push(
                Category::Physics,
                Severity::Low,
                format!("{name}: {per_day:.1} passes/day outside [{low}, {high}]"),
            );
        }
    }
    violations
}

/// Upper bound on simultaneously visible satellites for a constellation size
pub fn theoretical_max_visible(constellation_size: usize, min_elevation_deg: f64, coverage_factor: f64) -> usize {
    let theta = (90.0 - min_elevation_deg).to_radians();
    let cap_fraction = 0.5 * (1.0 - theta.cos());
    (constellation_size as f64 * cap_fraction * coverage_factor).ceil() as usize
}

fn check_sampling(input: &ValidationInput<'_>, config: &ValidationConfig, findings: &mut Findings) -> f64 {
    let mut score = 1.0;

    // Peak concurrent visibility across the run
    let mut visible_at: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for sample in input.observations.values().flatten() {
        if sample_in_bounds(sample, true) && sample.elevation_deg >= input.min_elevation_of(sample.satellite_id) {
            *visible_at.entry(sample.timestamp).or_default() += 1;
        }
    }
    let peak_visible = visible_at.values().copied().max().unwrap_or(0);
    let bound = input.visibility_bound(config.leo_coverage_factor);

    if peak_visible == 0 {
        score *= 0.3;
        findings.push(Category::Sampling, Severity::High, "No satellite ever visible".into());
    } else if peak_visible > bound {
        score *= 0.7;
        findings.push(
            Category::Sampling,
            Severity::Medium,
            format!("{peak_visible} satellites visible at once exceeds the bound of {bound}"),
        );
    }

    // Constellation skew among satellites with at least one window
    let mut visible_per_constellation: BTreeMap<&str, usize> = BTreeMap::new();
    for (id, windows) in input.windows {
        if !windows.is_empty() {
            let name = input.constellations.get(id).map(String::as_str).unwrap_or("unknown");
            *visible_per_constellation.entry(name).or_default() += 1;
        }
    }
    if visible_per_constellation.len() >= 2 {
        let max = visible_per_constellation.values().copied().max().unwrap_or(0);
        let min = visible_per_constellation.values().copied().min().unwrap_or(0);
        if max > 0 && (min as f64 / max as f64) < 0.1 {
            score *= 0.8;
            findings.push(
                Category::Sampling,
                Severity::Low,
                format!("Constellation distribution skewed: {min} vs {max} visible satellites"),
            );
        }
    }

    // Series quality
    let total: usize = input.observations.values().map(Vec::len).sum();
    let invalid = input
        .observations
        .values()
        .flatten()
        .filter(|s| !sample_in_bounds(s, true))
        .count();
    if total > 0 {
        let ratio = invalid as f64 / total as f64;
        if ratio > 0.1 {
            score *= 1.0 - ratio;
            findings.push(
                Category::Sampling,
                Severity::High,
                format!("{:.1}% of samples carry invalid angles", ratio * 100.0),
            );
        }
    }
    let short = input
        .observations
        .values()
        .filter(|series| series.len() < SHORT_SERIES_POINTS)
        .count();
    if short > 0 {
        score *= 0.95f64.powi(short.min(MAX_SHORT_SERIES_PENALTIES) as i32);
        findings.push(
            Category::Sampling,
            Severity::Low,
            format!("{short} satellites with fewer than {SHORT_SERIES_POINTS} samples"),
        );
    }

    score
}

fn check_cross_stage(input: &ValidationInput<'_>, config: &ValidationConfig, findings: &mut Findings) -> f64 {
    let mut score = 1.0;

    if let Some(first) = input.stages.first() {
        let worst = input
            .stages
            .iter()
            .map(|s| (s, s.observer.distance_m(&first.observer)))
            .fold(None::<(&StageRecord, f64)>, |acc, (s, d)| match acc {
                Some((_, best)) if best >= d => acc,
                _ => Some((s, d)),
            });
        if let Some((stage, distance)) = worst {
            if distance > config.position_tolerance_m {
                score *= 0.5;
                findings.push(
                    Category::CrossStage,
                    Severity::High,
                    format!(
                        "Observer for stage '{}' is {distance:.0} m from '{}'",
                        stage.stage, first.stage
                    ),
                );
            }
        }

        let earliest = input.stages.iter().map(|s| s.processed_at).min();
        let latest = input.stages.iter().map(|s| s.processed_at).max();
        if let (Some(earliest), Some(latest)) = (earliest, latest) {
            let spread = latest.signed_duration_since(earliest).num_milliseconds() as f64 / 1000.0;
            if spread > config.time_tolerance_seconds {
                score *= 0.9;
                findings.push(
                    Category::CrossStage,
                    Severity::High,
                    format!("Stage timestamps spread over {spread:.0} s"),
                );
            }
        }
    }

    if input.satellites_processed > 0 {
        let visible = input.windows.values().filter(|w| !w.is_empty()).count();
        let retention = visible as f64 / input.satellites_processed as f64;
        if retention < 0.01 {
            score *= 0.6;
            findings.push(
                Category::CrossStage,
                Severity::High,
                format!("Only {:.2}% of processed satellites produced a window", retention * 100.0),
            );
        }
    }

    score
}
