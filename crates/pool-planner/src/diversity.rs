//! Angular diversity statistics
//!
//! Running cos/sin sums over the first few harmonics of a set of angles.
//! Adding an angle is O(H); the dispersion of a set grown by one more
//! angle can be read without touching the rest of the set.

use std::f64::consts::PI;

/// Upper bound on tracked harmonics
pub const MAX_HARMONICS: usize = 8;

pub const DEFAULT_HARMONICS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircularStats {
    harmonics: usize,
    count: usize,
    cos_sum: [f64; MAX_HARMONICS],
    sin_sum: [f64; MAX_HARMONICS],
}

impl Default for CircularStats {
    fn default() -> Self {
        Self::new(DEFAULT_HARMONICS)
    }
}

impl CircularStats {
    pub fn new(harmonics: usize) -> Self {
        Self {
            harmonics: harmonics.clamp(1, MAX_HARMONICS),
            count: 0,
            cos_sum: [0.0; MAX_HARMONICS],
            sin_sum: [0.0; MAX_HARMONICS],
        }
    }

    pub fn from_angles<I>(harmonics: usize, angles_deg: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut stats = Self::new(harmonics);
        for angle in angles_deg {
            stats.push(angle);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn push(&mut self, angle_deg: f64) {
        let theta = angle_deg.to_radians();
        for k in 0..self.harmonics {
            let arg = (k + 1) as f64 * theta;
            self.cos_sum[k] += arg.cos();
            self.sin_sum[k] += arg.sin();
        }
        self.count += 1;
    }

    /// Copy of these statistics with one more angle
    pub fn with(&self, angle_deg: f64) -> Self {
        let mut next = *self;
        next.push(angle_deg);
        next
    }

    /// Mean resultant length of harmonic `k` (1-based)
    pub fn resultant(&self, k: usize) -> f64 {
        if self.count == 0 || k == 0 || k > self.harmonics {
            return 0.0;
        }
        let n = self.count as f64;
        self.cos_sum[k - 1].hypot(self.sin_sum[k - 1]) / n
    }

    /// First-harmonic resultant length: 1 for identical angles, 0 when balanced
    pub fn resultant_length(&self) -> f64 {
        self.resultant(1)
    }

    /// Circular mean (deg) of the first harmonic, if defined
    pub fn mean_angle(&self) -> Option<f64> {
        if self.count == 0 || self.resultant_length() < 1e-12 {
            return None;
        }
        let mean = self.sin_sum[0].atan2(self.cos_sum[0]);
        Some(mean.rem_euclid(2.0 * PI).to_degrees())
    }

    /// 0 for a clustered set, 1 for an evenly spread one.
    ///
    /// Averages the squared resultant over harmonics 1..=min(H, n-1); an
    /// evenly spaced set of n angles cancels every harmonic below n.
    pub fn dispersion(&self) -> f64 {
        if self.count <= 1 {
            return 0.0;
        }
        let depth = self.harmonics.min(self.count - 1);
        let mean_sq: f64 = (1..=depth).map(|k| self.resultant(k).powi(2)).sum::<f64>() / depth as f64;
        (1.0 - mean_sq).clamp(0.0, 1.0)
    }
}

/// Variance of the gaps between consecutive sorted angles (deg^2)
pub fn gap_variance(angles_deg: &[f64]) -> f64 {
    if angles_deg.len() < 2 {
        return 0.0;
    }
    let mut sorted: Vec<f64> = angles_deg.iter().map(|a| a.rem_euclid(360.0)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut gaps: Vec<f64> = sorted.windows(2).map(|w| w[1] - w[0]).collect();
    if let (Some(first), Some(last)) = (sorted.first(), sorted.last()) {
        gaps.push(360.0 - last + first);
    }
    let mean = 360.0 / gaps.len() as f64;
    gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzz_harness::prelude::*;

    fn brute_dispersion(harmonics: usize, angles: &[f64]) -> f64 {
        let n = angles.len();
        if n <= 1 {
            return 0.0;
        }
        let depth = harmonics.min(n - 1);
        let mut total = 0.0;
        for k in 1..=depth {
            let (c, s) = angles.iter().fold((0.0, 0.0), |(c, s), a| {
                let arg = k as f64 * a.to_radians();
                (c + arg.cos(), s + arg.sin())
            });
            total += (c * c + s * s) / (n * n) as f64;
        }
        1.0 - total / depth as f64
    }

    #[test]
    fn test_clustered_and_spread() {
        let clustered = CircularStats::from_angles(4, vec![30.0; 6]);
        assert!(clustered.dispersion() < 1e-12);
        assert!((clustered.resultant_length() - 1.0).abs() < 1e-12);

        let spread = CircularStats::from_angles(4, (0..6).map(|i| i as f64 * 60.0));
        assert!((spread.dispersion() - 1.0).abs() < 1e-9);
        assert!(spread.resultant_length() < 1e-9);
        assert!(spread.mean_angle().is_none());
    }

    #[test]
    fn test_opposite_pair_is_fully_dispersed() {
        let pair = CircularStats::from_angles(4, [10.0, 190.0]);
        assert!((pair.dispersion() - 1.0).abs() < 1e-9);
        assert_eq!(CircularStats::from_angles(4, [10.0]).dispersion(), 0.0);
    }

    #[test]
    fn test_mean_angle_wraps() {
        let stats = CircularStats::from_angles(4, [350.0, 10.0]);
        let mean = stats.mean_angle().unwrap();
        assert!(mean < 1e-9 || (360.0 - mean) < 1e-9);
    }

    #[test]
    fn test_gap_variance() {
        let even: Vec<f64> = (0..8).map(|i| i as f64 * 45.0).collect();
        assert!(gap_variance(&even) < 1e-9);
        assert!(gap_variance(&[0.0, 1.0, 2.0, 180.0]) > 1000.0);
    }

    proptest! {
        #[test]
        fn prop_incremental_matches_recomputation(
            angles in angle_set(1..40),
            extra in 0.0f64..360.0,
            harmonics in 1usize..=MAX_HARMONICS,
        ) {
            let stats = CircularStats::from_angles(harmonics, angles.iter().copied());
            let grown = stats.with(extra);

            let mut all = angles.clone();
            all.push(extra);
            prop_assert_eq!(grown.len(), all.len());
            prop_assert!((grown.dispersion() - brute_dispersion(harmonics, &all)).abs() < 1e-9);
            prop_assert!((0.0..=1.0).contains(&grown.dispersion()));
            // `with` leaves the source untouched
            prop_assert_eq!(stats.len(), angles.len());
        }
    }
}
