//! Pass/window extraction
//!
//! Folds one satellite's time-ordered observations into visibility windows
//! using a two-state machine: `Below` and `Above` the elevation threshold.
//! A window opens on the first sample at or above the threshold and closes
//! on the first sample below it. A window still open when the samples run
//! out is closed at the last sample and flagged `truncated`.

use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::ObservationSample;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Domain default minimum elevation (deg)
pub const DEFAULT_MIN_ELEVATION_DEG: f64 = 10.0;

/// Pass length treated as a full-quality pass (min)
pub const DEFAULT_REFERENCE_PASS_MINUTES: f64 = 10.0;

/// Discount applied to windows whose duration is only a lower bound
const TRUNCATED_QUALITY_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityWindow {
    pub satellite_id: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub peak_time: DateTime<Utc>,
    pub peak_elevation_deg: f64,
    pub start_elevation_deg: f64,
    pub end_elevation_deg: f64,
    pub rise_azimuth_deg: f64,
    pub set_azimuth_deg: f64,
    /// Samples at or above the threshold
    pub sample_count: usize,
    /// Window touched the edge of the sampled interval
    pub truncated: bool,
    pub quality: f64,
}

impl VisibilityWindow {
    pub fn duration(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 60_000.0
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub samples_seen: usize,
    pub samples_used: usize,
    pub out_of_order: usize,
    pub foreign_satellite: usize,
    pub invalid_elevation: usize,
    pub windows: usize,
    pub truncated: usize,
}

impl ExtractionStats {
    pub fn merge(&mut self, other: &ExtractionStats) {
        self.samples_seen += other.samples_seen;
        self.samples_used += other.samples_used;
        self.out_of_order += other.out_of_order;
        self.foreign_satellite += other.foreign_satellite;
        self.invalid_elevation += other.invalid_elevation;
        self.windows += other.windows;
        self.truncated += other.truncated;
    }
}

#[derive(Debug, Clone)]
pub struct PassExtraction {
    pub windows: Vec<VisibilityWindow>,
    pub stats: ExtractionStats,
}

#[derive(Debug, Clone)]
struct OpenWindow {
    start: ObservationSample,
    peak: ObservationSample,
    last: ObservationSample,
    sample_count: usize,
    open_at_first_sample: bool,
}

impl OpenWindow {
    fn open(sample: &ObservationSample, first: bool) -> Self {
        Self {
            start: *sample,
            peak: *sample,
            last: *sample,
            sample_count: 1,
            open_at_first_sample: first,
        }
    }

    fn update(&mut self, sample: &ObservationSample) {
        if sample.elevation_deg > self.peak.elevation_deg {
            self.peak = *sample;
        }
        self.last = *sample;
        self.sample_count += 1;
    }
}

#[derive(Debug, Clone)]
enum PassState {
    Below,
    Above(OpenWindow),
}

#[derive(Debug, Clone, Copy)]
pub struct PassExtractor {
    pub min_elevation_deg: f64,
    pub reference_pass_minutes: f64,
}

impl Default for PassExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ELEVATION_DEG)
    }
}

impl PassExtractor {
    pub fn new(min_elevation_deg: f64) -> Self {
        Self {
            min_elevation_deg,
            reference_pass_minutes: DEFAULT_REFERENCE_PASS_MINUTES,
        }
    }

    pub fn with_reference_pass(mut self, minutes: f64) -> Self {
        self.reference_pass_minutes = minutes;
        self
    }

    /// Extract windows from one satellite's observations.
    ///
    /// The satellite is taken from the first sample; samples of another
    /// satellite, with an elevation outside [-90, 90], or not strictly later
    /// than the previous accepted sample are skipped and counted.
    pub fn extract(&self, samples: &[ObservationSample]) -> PassExtraction {
        let mut stats = ExtractionStats::default();
        let mut windows = Vec::new();
        let mut state = PassState::Below;
        let mut previous: Option<&ObservationSample> = None;
        let satellite = samples.first().map(|s| s.satellite_id);

        for sample in samples {
            stats.samples_seen += 1;
            if Some(sample.satellite_id) != satellite {
                stats.foreign_satellite += 1;
                continue;
            }
            if !(-90.0..=90.0).contains(&sample.elevation_deg) {
                stats.invalid_elevation += 1;
                continue;
            }
            if previous.is_some_and(|p| sample.timestamp <= p.timestamp) {
                stats.out_of_order += 1;
                continue;
            }

            let first = previous.is_none();
            previous = Some(sample);
            stats.samples_used += 1;
            let visible = sample.elevation_deg >= self.min_elevation_deg;

            state = match (state, visible) {
                (PassState::Below, false) => PassState::Below,
                (PassState::Below, true) => PassState::Above(OpenWindow::open(sample, first)),
                (PassState::Above(mut open), true) => {
                    open.update(sample);
                    PassState::Above(open)
                }
                (PassState::Above(open), false) => {
                    windows.push(self.close(&open, sample, false));
                    PassState::Below
                }
            };
        }

        if let PassState::Above(open) = state {
            let last = open.last;
            windows.push(self.close(&open, &last, true));
        }

        stats.windows = windows.len();
        stats.truncated = windows.iter().filter(|w| w.truncated).count();
        if stats.samples_used < stats.samples_seen {
            debug!(
                satellite = ?satellite,
                skipped = stats.samples_seen - stats.samples_used,
                "Skipped observations during pass extraction"
            );
        }

        PassExtraction { windows, stats }
    }

    fn close(&self, open: &OpenWindow, end: &ObservationSample, at_interval_end: bool) -> VisibilityWindow {
        let truncated = at_interval_end || open.open_at_first_sample;
        let mut window = VisibilityWindow {
            satellite_id: open.start.satellite_id,
            start: open.start.timestamp,
            end: end.timestamp,
            peak_time: open.peak.timestamp,
            peak_elevation_deg: open.peak.elevation_deg,
            start_elevation_deg: open.start.elevation_deg,
            end_elevation_deg: end.elevation_deg,
            rise_azimuth_deg: open.start.azimuth_deg,
            set_azimuth_deg: end.azimuth_deg,
            sample_count: open.sample_count,
            truncated,
            quality: 0.0,
        };
        window.quality = self.quality(&window);
        window
    }

    /// Normalised peak elevation and duration, discounted when truncated
    pub fn quality(&self, window: &VisibilityWindow) -> f64 {
        let elevation_term = (window.peak_elevation_deg / 90.0).clamp(0.0, 1.0);
        let duration_term = if self.reference_pass_minutes > 0.0 {
            (window.duration_minutes() / self.reference_pass_minutes).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let quality = 0.6 * elevation_term + 0.4 * duration_term;
        if window.truncated {
            quality * TRUNCATED_QUALITY_FACTOR
        } else {
            quality
        }
    }
}

/// Per-satellite pass statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub satellite_id: u32,
    pub pass_count: usize,
    pub truncated_count: usize,
    pub total_visible_seconds: f64,
    pub mean_duration_minutes: f64,
    pub max_peak_elevation_deg: f64,
}

pub fn summarize(satellite_id: u32, windows: &[VisibilityWindow]) -> PassSummary {
    let total_visible_seconds: f64 = windows
        .iter()
        .map(|w| w.duration().num_milliseconds() as f64 / 1000.0)
        .sum();
    let pass_count = windows.len();

    PassSummary {
        satellite_id,
        pass_count,
        truncated_count: windows.iter().filter(|w| w.truncated).count(),
        total_visible_seconds,
        mean_duration_minutes: if pass_count > 0 {
            total_visible_seconds / 60.0 / pass_count as f64
        } else {
            0.0
        },
        max_peak_elevation_deg: windows
            .iter()
            .map(|w| w.peak_elevation_deg)
            .fold(0.0, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fuzz_harness::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn make_obs(satellite_id: u32, step: i64, elevation_deg: f64) -> ObservationSample {
        ObservationSample {
            satellite_id,
            timestamp: t0() + Duration::seconds(30 * step),
            elevation_deg,
            azimuth_deg: (step as f64 * 7.0).rem_euclid(360.0),
            range_km: 1000.0,
            range_rate_km_s: 0.0,
            doppler_shift_hz: 0.0,
            altitude_km: 550.0,
        }
    }

    fn series(elevations: &[f64]) -> Vec<ObservationSample> {
        elevations
            .iter()
            .enumerate()
            .map(|(i, &e)| make_obs(7, i as i64, e))
            .collect()
    }

    #[test]
    fn test_single_pass() {
        let obs = series(&[-5.0, 5.0, 12.0, 40.0, 60.0, 35.0, 11.0, 4.0, -3.0]);
        let result = PassExtractor::default().extract(&obs);

        assert_eq!(result.windows.len(), 1);
        let w = &result.windows[0];
        assert_eq!(w.start, obs[2].timestamp);
        assert_eq!(w.end, obs[7].timestamp);
        assert_eq!(w.peak_time, obs[4].timestamp);
        assert_eq!(w.peak_elevation_deg, 60.0);
        assert_eq!(w.sample_count, 5);
        assert_eq!(w.rise_azimuth_deg, obs[2].azimuth_deg);
        assert_eq!(w.set_azimuth_deg, obs[7].azimuth_deg);
        assert!(!w.truncated);
        assert!(w.quality > 0.0 && w.quality <= 1.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let obs = series(&[9.9, 10.0, 9.9]);
        let result = PassExtractor::default().extract(&obs);
        assert_eq!(result.windows.len(), 1);
        assert_eq!(result.windows[0].start, obs[1].timestamp);
    }

    #[test]
    fn test_multiple_passes() {
        let obs = series(&[0.0, 20.0, 0.0, 0.0, 30.0, 45.0, 0.0, 15.0, 0.0]);
        let result = PassExtractor::default().extract(&obs);
        assert_eq!(result.windows.len(), 3);
        assert_eq!(result.windows[1].peak_elevation_deg, 45.0);
        assert_eq!(result.stats.windows, 3);
        assert_eq!(result.stats.truncated, 0);
    }

    #[test]
    fn test_open_window_closed_at_last_sample() {
        let obs = series(&[0.0, 15.0, 30.0, 50.0]);
        let result = PassExtractor::default().extract(&obs);
        assert_eq!(result.windows.len(), 1);
        let w = &result.windows[0];
        assert!(w.truncated);
        assert_eq!(w.end, obs[3].timestamp);
        assert_eq!(w.end_elevation_deg, 50.0);
    }

    #[test]
    fn test_window_open_at_first_sample_is_truncated() {
        let obs = series(&[40.0, 20.0, 5.0]);
        let result = PassExtractor::default().extract(&obs);
        assert_eq!(result.windows.len(), 1);
        assert!(result.windows[0].truncated);
        assert_eq!(result.windows[0].start, obs[0].timestamp);
    }

    #[test]
    fn test_truncation_discounts_quality() {
        let extractor = PassExtractor::default();
        let full = extractor.extract(&series(&[0.0, 20.0, 45.0, 20.0, 0.0])).windows;
        let cut = extractor.extract(&series(&[0.0, 20.0, 45.0, 20.0])).windows;
        assert!(cut[0].quality < full[0].quality);
    }

    #[test]
    fn test_skips_out_of_order_and_invalid() {
        let mut obs = series(&[0.0, 20.0, 30.0, 20.0, 0.0]);
        obs.insert(3, make_obs(7, 1, 80.0)); // replayed timestamp
        obs.insert(2, make_obs(7, 2, 999.0)); // sentinel elevation
        obs.push(make_obs(8, 9, 50.0)); // another satellite

        let result = PassExtractor::default().extract(&obs);
        assert_eq!(result.stats.samples_seen, 8);
        assert_eq!(result.stats.out_of_order, 1);
        assert_eq!(result.stats.invalid_elevation, 1);
        assert_eq!(result.stats.foreign_satellite, 1);
        assert_eq!(result.stats.samples_used, 5);
        assert_eq!(result.windows.len(), 1);
        assert_eq!(result.windows[0].peak_elevation_deg, 30.0);
    }

    #[test]
    fn test_summary() {
        let obs = series(&[0.0, 20.0, 0.0, 0.0, 30.0, 45.0, 0.0]);
        let windows = PassExtractor::default().extract(&obs).windows;
        let summary = summarize(7, &windows);
        assert_eq!(summary.pass_count, 2);
        // 30 s and 60 s windows
        assert!((summary.total_visible_seconds - 90.0).abs() < 1e-9);
        assert!((summary.mean_duration_minutes - 0.75).abs() < 1e-9);
        assert_eq!(summary.max_peak_elevation_deg, 45.0);
    }

    #[test]
    fn test_empty_input() {
        let result = PassExtractor::default().extract(&[]);
        assert!(result.windows.is_empty());
        assert_eq!(result.stats, ExtractionStats::default());
        assert_eq!(summarize(1, &[]).mean_duration_minutes, 0.0);
    }

    #[test]
    fn test_single_arcs_yield_one_closed_window() {
        let extractor = PassExtractor::default();
        let mut runner = FuzzRunner::new(FuzzConfig::new().cases(300).seed(11));
        let result = runner.run_strategy("single_arc_windows", pass_arc(), |arc| {
            let extraction = extractor.extract(&series(arc));
            let peak = arc.iter().copied().fold(f64::MIN, f64::max);
            let expected = usize::from(peak >= extractor.min_elevation_deg);
            if extraction.windows.len() != expected {
                return Err(format!("peak {peak:.3}: {} windows", extraction.windows.len()));
            }
            match extraction.windows.first() {
                Some(w) if w.truncated => Err(format!("peak {peak:.3}: truncated")),
                Some(w) if (w.peak_elevation_deg - peak).abs() > 1e-12 => {
                    Err(format!("peak {peak:.3} reported as {:.3}", w.peak_elevation_deg))
                }
                _ => Ok(()),
            }
        });
        assert!(result.passed, "{:?}", result.failures);
        assert_eq!(result.cases_run, 300);
    }

    proptest! {
        #[test]
        fn prop_extraction_is_deterministic_and_consistent(elevations in elevation_series(1..200)) {
            let obs = series(&elevations);
            let extractor = PassExtractor::default();
            let first = extractor.extract(&obs);
            let second = extractor.extract(&obs);
            prop_assert_eq!(&first.windows, &second.windows);

            for w in &first.windows {
                prop_assert!(w.start <= w.peak_time && w.peak_time <= w.end);
                prop_assert!(w.peak_elevation_deg >= w.start_elevation_deg);
                prop_assert!(w.peak_elevation_deg >= w.end_elevation_deg);
                prop_assert!(w.peak_elevation_deg >= extractor.min_elevation_deg);
                prop_assert!((0.0..=1.0).contains(&w.quality));
            }
            for pair in first.windows.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
        }
    }
}
