//! Greedy pool selection
//!
//! Grows a pool one member at a time, each step taking the candidate with
//! the largest marginal utility against the partial pool. Ties within
//! `TIE_EPSILON` go to members of the previous pool version, then to the
//! lower catalog number, so repeated runs on the same input agree.

use crate::config::SelectionConfig;
use crate::diversity::CircularStats;
use crate::scheduler::TimeWindow;
use crate::{
    DynamicPool, PoolCandidate, PoolMember, PoolMetrics, SelectionError, SelectionStats,
    StopReason,
};
use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::ObserverLocation;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

pub const TIE_EPSILON: f64 = 1e-9;

/// What to select for
#[derive(Debug, Clone)]
pub struct PoolRequest {
    pub constellation: String,
    pub target_count: usize,
    pub min_visible: usize,
    pub reference_epoch: DateTime<Utc>,
    /// Site the windows were observed from
    pub observer: ObserverLocation,
    /// Grid over which coverage metrics are evaluated
    pub evaluation: TimeWindow,
}

/// Diversity state of a partial pool
#[derive(Debug, Clone, Copy)]
struct PoolState {
    phase: CircularStats,
    raan: CircularStats,
    static_sum: f64,
}

impl PoolState {
    fn new(harmonics: usize) -> Self {
        Self {
            phase: CircularStats::new(harmonics),
            raan: CircularStats::new(harmonics),
            static_sum: 0.0,
        }
    }

    fn size(&self) -> f64 {
        self.phase.len() as f64
    }

    fn phase_term(&self, config: &SelectionConfig) -> f64 {
        self.size() * config.weights.phase * self.phase.dispersion()
    }

    fn raan_term(&self, config: &SelectionConfig) -> f64 {
        self.size() * config.weights.raan * self.raan.dispersion()
    }

    fn utility(&self, config: &SelectionConfig) -> f64 {
        self.static_sum + self.phase_term(config) + self.raan_term(config)
    }

    fn with(&self, candidate: &PoolCandidate) -> Self {
        Self {
            phase: self.phase.with(candidate.phase_deg),
            raan: self.raan.with(candidate.raan_deg),
            static_sum: self.static_sum + candidate.static_score,
        }
    }
}

/// Gain from adding one candidate, split by term
#[derive(Debug, Clone, Copy)]
struct Marginal {
    index: usize,
    gain: f64,
    phase: f64,
    raan: f64,
    next: PoolState,
}

fn marginal(state: &PoolState, index: usize, candidate: &PoolCandidate, config: &SelectionConfig) -> Marginal {
    let next = state.with(candidate);
    let phase = next.phase_term(config) - state.phase_term(config);
    let raan = next.raan_term(config) - state.raan_term(config);
    Marginal {
        index,
        gain: candidate.static_score + phase + raan,
        phase,
        raan,
        next,
    }
}

/// Does `challenger` beat `incumbent`? Candidates arrive in catalog order,
/// so an exact tie without a churn preference keeps the incumbent.
fn beats(challenger: &Marginal, incumbent: &Marginal, previous: &BTreeSet<u32>, candidates: &[PoolCandidate]) -> bool {
    if challenger.gain > incumbent.gain + TIE_EPSILON {
        return true;
    }
    if challenger.gain < incumbent.gain - TIE_EPSILON {
        return false;
    }
    let challenger_kept = previous.contains(&candidates[challenger.index].satellite_id);
    let incumbent_kept = previous.contains(&candidates[incumbent.index].satellite_id);
    challenger_kept && !incumbent_kept
}

/// Select a new pool version from `candidates`.
///
/// Never fails: an empty or short pool is returned `degraded` with the
/// reasons listed in `issues`.
pub fn select_pool(
    candidates: &[PoolCandidate],
    config: &SelectionConfig,
    request: &PoolRequest,
    previous: Option<&DynamicPool>,
) -> DynamicPool {
    let mut ordered: Vec<PoolCandidate> = candidates.to_vec();
    ordered.sort_by_key(|c| c.satellite_id);
    ordered.dedup_by_key(|c| c.satellite_id);
    let duplicates_dropped = candidates.len() - ordered.len();
    if duplicates_dropped > 0 {
        debug!(
            "{}: dropped {} duplicate candidates",
            request.constellation, duplicates_dropped
        );
    }

    let previous_ids = previous.map(|p| p.ids()).unwrap_or_default();
    let mut remaining: Vec<usize> = (0..ordered.len()).collect();
    let mut state = PoolState::new(config.harmonics);
    let mut members: Vec<PoolMember> = Vec::new();
    let mut chosen: Vec<usize> = Vec::new();
    let mut iterations = 0;

    let stop_reason = loop {
        if members.len() >= request.target_count {
            break StopReason::TargetReached;
        }
        if remaining.is_empty() {
            break StopReason::Exhausted;
        }
        if iterations >= config.max_iterations {
            break StopReason::IterationCap;
        }
        iterations += 1;

        let mut best: Option<Marginal> = None;
        for &index in &remaining {
            let m = marginal(&state, index, &ordered[index], config);
            best = match best {
                Some(b) if !beats(&m, &b, &previous_ids, &ordered) => Some(b),
                _ => Some(m),
            };
        }
        let Some(best) = best else {
            break StopReason::Exhausted;
        };
        if best.gain < config.convergence_threshold {
            debug!(
                "{}: best marginal gain {:.4} below {:.4}",
                request.constellation, best.gain, config.convergence_threshold
            );
            break StopReason::Converged;
        }

        let candidate = &ordered[best.index];
        members.push(PoolMember {
            satellite_id: candidate.satellite_id,
            name: candidate.name.clone(),
            composite_score: best.gain,
            phase_contribution: best.phase,
            raan_contribution: best.raan,
            coverage_score: candidate.coverage_score,
            stability_score: candidate.stability_score,
            phase_deg: candidate.phase_deg,
            raan_deg: candidate.raan_deg,
        });
        chosen.push(best.index);
        state = best.next;
        remaining.retain(|&i| i != best.index);
    };

    let selected: Vec<&PoolCandidate> = chosen.iter().map(|&i| &ordered[i]).collect();
    let metrics = pool_metrics(&state, &selected, config, request);

    let mut issues = Vec::new();
    if ordered.is_empty() {
        issues.push(SelectionError::NoCandidates {
            constellation: request.constellation.clone(),
        });
    }
    if members.len() < request.target_count {
        issues.push(SelectionError::ShortPool {
            selected: members.len(),
            target: request.target_count,
        });
    }
    let retained_from_previous = members
        .iter()
        .filter(|m| previous_ids.contains(&m.satellite_id))
        .count();

    let pool = DynamicPool {
        constellation: request.constellation.clone(),
        version: previous.map(|p| p.version + 1).unwrap_or(1),
        reference_epoch: request.reference_epoch,
        observer: Some(request.observer),
        target_count: request.target_count,
        members,
        metrics,
        stats: SelectionStats {
            candidates_considered: ordered.len(),
            iterations,
            stop_reason,
            retained_from_previous,
            duplicates_dropped,
        },
        degraded: !issues.is_empty(),
        issues,
    };

    if pool.degraded {
        warn!(
            "{} pool v{} degraded: {} of {} members ({:?})",
            pool.constellation,
            pool.version,
            pool.len(),
            pool.target_count,
            stop_reason
        );
    } else {
        info!(
            "{} pool v{}: {} members, utility {:.3}, diversity {:.3}",
            pool.constellation,
            pool.version,
            pool.len(),
            pool.metrics.utility,
            pool.metrics.diversity_score
        );
    }
    pool
}

fn pool_metrics(
    state: &PoolState,
    selected: &[&PoolCandidate],
    config: &SelectionConfig,
    request: &PoolRequest,
) -> PoolMetrics {
    let phase_dispersion = state.phase.dispersion();
    let raan_dispersion = state.raan.dispersion();
    let diversity_weight = config.weights.phase + config.weights.raan;
    let diversity_score = if diversity_weight > 0.0 {
        (config.weights.phase * phase_dispersion + config.weights.raan * raan_dispersion) / diversity_weight
    } else {
        0.5 * (phase_dispersion + raan_dispersion)
    };

    let step = Duration::milliseconds((config.evaluation_step_seconds * 1000.0).round() as i64);
    let grid = request.evaluation.timestamps(step).unwrap_or_default();
    let counts: Vec<f64> = grid
        .iter()
        .map(|&t| selected.iter().filter(|c| c.visible_at(t)).count() as f64)
        .collect();
    let (mean_visible, coverage_uniformity, coverage_ratio) = coverage_statistics(&counts, request.min_visible);

    PoolMetrics {
        utility: state.utility(config),
        diversity_score,
        phase_dispersion,
        raan_dispersion,
        raan_resultant_length: state.raan.resultant_length(),
        coverage_uniformity,
        coverage_ratio,
        mean_visible,
        grid_points: grid.len(),
    }
}

/// (mean, 1 - coefficient of variation, fraction at or above `min_visible`)
fn coverage_statistics(counts: &[f64], min_visible: usize) -> (f64, f64, f64) {
    if counts.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / n;
    let ratio = counts.iter().filter(|&&c| c >= min_visible as f64).count() as f64 / n;
    if mean <= 0.0 {
        return (0.0, 0.0, ratio);
    }
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    let uniformity = (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0);
    (mean, uniformity, ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diversity::gap_variance;
    use crate::passes::VisibilityWindow;
    use chrono::TimeZone;
    use fuzz_harness::prelude::*;
    use orbital_mechanics::{MeanElements, ObserverLocation, OrbitalElementSet};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn make_window(id: u32, start_min: i64, len_min: i64) -> VisibilityWindow {
        VisibilityWindow {
            satellite_id: id,
            start: epoch() + Duration::minutes(start_min),
            end: epoch() + Duration::minutes(start_min + len_min),
            peak_time: epoch() + Duration::minutes(start_min + len_min / 2),
            peak_elevation_deg: 45.0,
            start_elevation_deg: 10.0,
            end_elevation_deg: 9.0,
            rise_azimuth_deg: 0.0,
            set_azimuth_deg: 180.0,
            sample_count: 5,
            truncated: false,
            quality: 0.5,
        }
    }

    fn make_candidate(id: u32, raan: f64, phase: f64, static_score: f64) -> PoolCandidate {
        let m = MeanElements::circular(&format!("STARLINK-{id}"), id, epoch(), 550.0, 53.0, raan, phase);
        let elements = OrbitalElementSet::from_mean_elements(&m).unwrap();
        PoolCandidate {
            satellite_id: id,
            name: elements.name().to_string(),
            constellation: "starlink".into(),
            elements,
            windows: vec![make_window(id, (id as i64 % 6) * 10, 8)],
            phase_deg: phase,
            raan_deg: raan,
            coverage_score: 0.8,
            stability_score: 1.0,
            static_score,
        }
    }

    fn make_request(target: usize) -> PoolRequest {
        PoolRequest {
            constellation: "starlink".into(),
            target_count: target,
            min_visible: 1,
            reference_epoch: epoch(),
            observer: ObserverLocation::new(0.0, 0.0, 0.0).unwrap(),
            evaluation: TimeWindow::new(epoch(), epoch() + Duration::minutes(60)).unwrap(),
        }
    }

    fn evenly_spaced(n: u32) -> Vec<PoolCandidate> {
        (0..n)
            .map(|i| make_candidate(i + 1, i as f64 * 360.0 / n as f64, 0.0, 0.35))
            .collect()
    }

    #[test]
    fn test_selected_raans_spread_better_than_random_subsets() {
        let candidates = evenly_spaced(50);
        let pool = select_pool(&candidates, &SelectionConfig::default(), &make_request(8), None);
        assert_eq!(pool.len(), 8);
        assert_eq!(pool.stats.stop_reason, StopReason::TargetReached);

        let raans: Vec<f64> = pool.members.iter().map(|m| m.raan_deg).collect();
        let selected_gap = gap_variance(&raans);
        let selected_r = CircularStats::from_angles(1, raans.iter().copied()).resultant_length();

        let mut rng = StdRng::seed_from_u64(42);
        let mut random_gap = 0.0;
        let mut random_r = 0.0;
        for _ in 0..20 {
            let subset: Vec<f64> = candidates
                .choose_multiple(&mut rng, 8)
                .map(|c| c.raan_deg)
                .collect();
            random_gap += gap_variance(&subset) / 20.0;
            random_r += CircularStats::from_angles(1, subset).resultant_length() / 20.0;
        }

        assert!(selected_gap < 0.5 * random_gap, "gap {} vs {}", selected_gap, random_gap);
        assert!(selected_r < random_r, "resultant {} vs {}", selected_r, random_r);
        assert!(pool.metrics.raan_dispersion > 0.9);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut candidates = evenly_spaced(30);
        for (i, c) in candidates.iter_mut().enumerate() {
            c.phase_deg = (i as f64 * 47.0).rem_euclid(360.0);
        }
        let config = SelectionConfig::default();
        let a = select_pool(&candidates, &config, &make_request(10), None);
        candidates.reverse();
        let b = select_pool(&candidates, &config, &make_request(10), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_candidates_are_counted() {
        let mut candidates = evenly_spaced(6);
        candidates.push(candidates[2].clone());
        candidates.push(candidates[2].clone());
        let pool = select_pool(&candidates, &SelectionConfig::default(), &make_request(6), None);
        assert_eq!(pool.stats.candidates_considered, 6);
        assert_eq!(pool.stats.duplicates_dropped, 2);
        assert_eq!(pool.ids().len(), pool.len());
        assert_eq!(pool.observer, Some(make_request(6).observer));

        let clean = select_pool(&evenly_spaced(6), &SelectionConfig::default(), &make_request(6), None);
        assert_eq!(clean.stats.duplicates_dropped, 0);
    }

    #[test]
    fn test_ties_prefer_previous_members_then_lower_id() {
        // Identical candidates: every gain ties
        let candidates: Vec<PoolCandidate> = (1..=6).map(|id| make_candidate(id, 0.0, 0.0, 0.3)).collect();
        let config = SelectionConfig::default();

        let first = select_pool(&candidates, &config, &make_request(2), None);
        assert_eq!(first.ids().into_iter().collect::<Vec<_>>(), vec![1, 2]);

        let mut previous = first.clone();
        previous.members.retain(|m| m.satellite_id == 2);
        previous.members[0].satellite_id = 5;
        let second = select_pool(&candidates, &config, &make_request(2), Some(&previous));
        assert_eq!(second.members[0].satellite_id, 5);
        assert_eq!(second.members[1].satellite_id, 1);
        assert_eq!(second.version, previous.version + 1);
        assert_eq!(second.stats.retained_from_previous, 1);
    }

    #[test]
    fn test_member_scores_sum_to_utility() {
        let candidates = evenly_spaced(12);
        let pool = select_pool(&candidates, &SelectionConfig::default(), &make_request(6), None);
        let total: f64 = pool.members.iter().map(|m| m.composite_score).sum();
        assert!((total - pool.metrics.utility).abs() < 1e-9);
        // First member brings no diversity on its own
        assert_eq!(pool.members[0].raan_contribution, 0.0);
    }

    #[test]
    fn test_empty_candidates_degrade() {
        let pool = select_pool(&[], &SelectionConfig::default(), &make_request(5), None);
        assert!(pool.degraded);
        assert_eq!(pool.stats.stop_reason, StopReason::Exhausted);
        assert!(pool.issues.contains(&SelectionError::NoCandidates {
            constellation: "starlink".into()
        }));
        assert_eq!(pool.metrics.coverage_ratio, 0.0);
    }

    #[test]
    fn test_convergence_stops_early() {
        let candidates: Vec<PoolCandidate> = (1..=10).map(|id| make_candidate(id, 0.0, 0.0, 0.005)).collect();
        let pool = select_pool(&candidates, &SelectionConfig::default(), &make_request(5), None);
        assert_eq!(pool.stats.stop_reason, StopReason::Converged);
        assert!(pool.is_empty());
        assert!(pool.issues.contains(&SelectionError::ShortPool { selected: 0, target: 5 }));
    }

    #[test]
    fn test_iteration_cap() {
        let mut config = SelectionConfig::default();
        config.max_iterations = 3;
        let pool = select_pool(&evenly_spaced(10), &config, &make_request(8), None);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.stats.stop_reason, StopReason::IterationCap);
        assert!(pool.degraded);
    }

    #[test]
    fn test_coverage_statistics() {
        let (mean, uniformity, ratio) = coverage_statistics(&[2.0, 2.0, 2.0, 2.0], 2);
        assert_eq!((mean, uniformity, ratio), (2.0, 1.0, 1.0));

        let (mean, uniformity, ratio) = coverage_statistics(&[0.0, 4.0], 2);
        assert_eq!(mean, 2.0);
        assert_eq!(uniformity, 0.0);
        assert_eq!(ratio, 0.5);
    }

    proptest! {
        #[test]
        fn prop_phase_term_changes_by_member_contribution(angles in angle_set(2..20)) {
            let candidates: Vec<PoolCandidate> = angles
                .iter()
                .enumerate()
                .map(|(i, &a)| make_candidate(i as u32 + 1, 0.0, a, 0.5))
                .collect();
            let config = SelectionConfig::default();
            let pool = select_pool(&candidates, &config, &make_request(candidates.len()), None);

            // Replaying the members reproduces each recorded contribution
            let mut state = PoolState::new(config.harmonics);
            for member in &pool.members {
                let Some(c) = candidates.iter().find(|c| c.satellite_id == member.satellite_id) else {
                    return Err(TestCaseError::fail("member not among candidates"));
                };
                let next = state.with(c);
                let delta = next.phase_term(&config) - state.phase_term(&config);
                prop_assert!((delta - member.phase_contribution).abs() < 1e-9);
                state = next;
            }
        }
    }
}
