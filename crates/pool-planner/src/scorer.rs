//! Candidate scoring
//!
//! Turns visible satellites into pool candidates with their pool-independent
//! sub-scores:
//! - Coverage C = 0.40·E + 0.35·T + 0.25·H
//!   (mean peak elevation, mean pass length vs a reference pass, height-band proximity)
//! - Stability S = 0.5·(1 - e/e_max) + 0.5·exp(-Δi/10°)
//!
//! The diversity terms depend on the partial pool and are left to the selector.

use crate::config::SelectionConfig;
use crate::passes::VisibilityWindow;
use crate::PoolCandidate;
use chrono::{DateTime, Utc};
use orbital_mechanics::OrbitalElementSet;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

pub const W_ELEVATION: f64 = 0.40;
pub const W_DURATION: f64 = 0.35;
pub const W_HEIGHT: f64 = 0.25;

/// Height-band decay length (km)
const HEIGHT_DECAY_KM: f64 = 200.0;

/// Inclination-band decay length (deg)
const INCLINATION_DECAY_DEG: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoringStats {
    pub considered: usize,
    pub accepted: usize,
    pub no_windows: usize,
    pub low_coverage: usize,
}

/// Distance outside `[low, high]`, zero inside
fn band_distance(value: f64, low: f64, high: f64) -> f64 {
    if value < low {
        low - value
    } else if value > high {
        value - high
    } else {
        0.0
    }
}

fn eccentricity_term(elements: &OrbitalElementSet, config: &SelectionConfig) -> f64 {
    (1.0 - elements.eccentricity() / config.max_eccentricity).clamp(0.0, 1.0)
}

/// Proximity of the orbit to the target height band, penalising eccentric orbits
pub fn height_score(elements: &OrbitalElementSet, config: &SelectionConfig) -> f64 {
    let d = band_distance(
        elements.mean_altitude_km(),
        config.min_altitude_km,
        config.max_altitude_km,
    );
    (-d / HEIGHT_DECAY_KM).exp() * eccentricity_term(elements, config)
}

pub fn coverage_score(
    elements: &OrbitalElementSet,
    windows: &[VisibilityWindow],
    config: &SelectionConfig,
) -> f64 {
    if windows.is_empty() {
        return 0.0;
    }
    let n = windows.len() as f64;
    let elevation = windows
        .iter()
        .map(|w| (w.peak_elevation_deg / 90.0).clamp(0.0, 1.0))
        .sum::<f64>()
        / n;
    let duration = windows
        .iter()
        .map(|w| (w.duration_minutes() / config.reference_pass_minutes).clamp(0.0, 1.0))
        .sum::<f64>()
        / n;

    W_ELEVATION * elevation + W_DURATION * duration + W_HEIGHT * height_score(elements, config)
}

pub fn stability_score(elements: &OrbitalElementSet, config: &SelectionConfig) -> f64 {
    let deviation = band_distance(
        elements.inclination_deg(),
        config.min_inclination_deg,
        config.max_inclination_deg,
    );
    0.5 * eccentricity_term(elements, config) + 0.5 * (-deviation / INCLINATION_DECAY_DEG).exp()
}

/// Score one satellite. `None` when it has no windows.
pub fn score_candidate(
    elements: &OrbitalElementSet,
    windows: &[VisibilityWindow],
    config: &SelectionConfig,
    reference_epoch: DateTime<Utc>,
) -> Option<PoolCandidate> {
    if windows.is_empty() {
        return None;
    }
    let coverage = coverage_score(elements, windows, config);
    let stability = stability_score(elements, config);
    let weights = &config.weights;

    Some(PoolCandidate {
        satellite_id: elements.catalog_number(),
        name: elements.name().to_string(),
        constellation: elements.constellation().to_string(),
        elements: elements.clone(),
        windows: windows.to_vec(),
        phase_deg: elements.phase_at(reference_epoch),
        raan_deg: elements.raan_at(reference_epoch),
        coverage_score: coverage,
        stability_score: stability,
        static_score: weights.coverage * coverage + weights.stability * stability,
    })
}

/// Score every element set that has windows and clears the coverage floor.
/// Output is in catalog order.
pub fn score_candidates(
    elements: &[OrbitalElementSet],
    windows: &BTreeMap<u32, Vec<VisibilityWindow>>,
    config: &SelectionConfig,
    reference_epoch: DateTime<Utc>,
) -> (Vec<PoolCandidate>, ScoringStats) {
    let mut stats = ScoringStats::default();
    let mut candidates = Vec::new();

    for set in elements {
        stats.considered += 1;
        let sat_windows = windows
            .get(&set.catalog_number())
            .map(|w| w.as_slice())
            .unwrap_or(&[]);

        match score_candidate(set, sat_windows, config, reference_epoch) {
            None => stats.no_windows += 1,
            Some(candidate) if candidate.coverage_score < config.min_coverage_score => {
                debug!(
                    "Rejecting {} (coverage {:.3} < {:.3})",
                    candidate.name, candidate.coverage_score, config.min_coverage_score
                );
                stats.low_coverage += 1;
            }
            Some(candidate) => {
                stats.accepted += 1;
                candidates.push(candidate);
            }
        }
    }

    candidates.sort_by_key(|c| c.satellite_id);
    (candidates, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use orbital_mechanics::MeanElements;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn make_set(catalog: u32, altitude_km: f64, inclination: f64) -> OrbitalElementSet {
        let m = MeanElements::circular(
            &format!("STARLINK-{catalog}"),
            catalog,
            epoch(),
            altitude_km,
            inclination,
            0.0,
            0.0,
        );
        OrbitalElementSet::from_mean_elements(&m).unwrap()
    }

    fn make_window(satellite_id: u32, minutes: i64, peak: f64) -> VisibilityWindow {
        VisibilityWindow {
            satellite_id,
            start: epoch(),
            end: epoch() + Duration::minutes(minutes),
            peak_time: epoch() + Duration::minutes(minutes / 2),
            peak_elevation_deg: peak,
            start_elevation_deg: 10.0,
            end_elevation_deg: 9.0,
            rise_azimuth_deg: 0.0,
            set_azimuth_deg: 180.0,
            sample_count: 10,
            truncated: false,
            quality: 0.5,
        }
    }

    #[test]
    fn test_in_band_orbit_scores_full_height_and_stability() {
        let config = SelectionConfig::default();
        let set = make_set(1, 550.0, 53.0);
        assert!((height_score(&set, &config) - 1.0).abs() < 1e-3);
        assert!((stability_score(&set, &config) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_low_orbit_penalised() {
        let config = SelectionConfig::default();
        let low = make_set(1, 300.0, 53.0);
        let nominal = make_set(2, 550.0, 53.0);
        assert!(height_score(&low, &config) < 0.5);
        assert!(height_score(&low, &config) < height_score(&nominal, &config));
    }

    #[test]
    fn test_inclination_outside_band_penalised() {
        let config = SelectionConfig::default();
        let equatorial = make_set(1, 550.0, 10.0);
        let s = stability_score(&equatorial, &config);
        // 30 deg below the band
        assert!((s - (0.5 + 0.5 * (-3.0f64).exp())).abs() < 1e-3);
    }

    #[test]
    fn test_coverage_rewards_high_long_passes() {
        let config = SelectionConfig::default();
        let set = make_set(1, 550.0, 53.0);
        let short_low = coverage_score(&set, &[make_window(1, 2, 15.0)], &config);
        let long_high = coverage_score(&set, &[make_window(1, 10, 85.0)], &config);
        assert!(long_high > short_low);
        assert!(long_high <= 1.0);
    }

    #[test]
    fn test_score_candidates_counts_rejections() {
        let mut config = SelectionConfig::default();
        config.min_coverage_score = 0.5;
        let sets = vec![make_set(3, 550.0, 53.0), make_set(1, 550.0, 53.0), make_set(2, 550.0, 53.0)];
        let mut windows = BTreeMap::new();
        windows.insert(1, vec![make_window(1, 10, 80.0)]);
        windows.insert(3, vec![make_window(3, 10, 60.0)]);
        windows.insert(2, vec![]);

        let (candidates, stats) = score_candidates(&sets, &windows, &config, epoch());
        assert_eq!(stats.considered, 3);
        assert_eq!(stats.no_windows, 1);
        assert_eq!(stats.accepted, 2);
        assert_eq!(candidates.iter().map(|c| c.satellite_id).collect::<Vec<_>>(), vec![1, 3]);

        config.min_coverage_score = 0.99;
        let (candidates, stats) = score_candidates(&sets, &windows, &config, epoch());
        assert!(candidates.is_empty());
        assert_eq!(stats.low_coverage, 2);
    }

    #[test]
    fn test_static_score_uses_weights() {
        let config = SelectionConfig::default();
        let set = make_set(1, 550.0, 53.0);
        let c = score_candidate(&set, &[make_window(1, 10, 90.0)], &config, epoch()).unwrap();
        let expected = 0.25 * c.coverage_score + 0.15 * c.stability_score;
        assert!((c.static_score - expected).abs() < 1e-12);
        assert!((c.raan_deg - 0.0).abs() < 1e-6 || (c.raan_deg - 360.0).abs() < 1e-6);
    }
}
