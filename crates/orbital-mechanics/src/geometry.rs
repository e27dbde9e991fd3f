//! Ground-relative geometry
//!
//! Converts inertial trajectory samples into elevation, azimuth, slant range
//! and Doppler as seen from a fixed ground point. An engine holds only
//! immutable observer data; workers each build (or clone) their own.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::elements::seconds_between;
use crate::propagation::TrajectorySample;
use crate::transforms::{ecef_to_enu, ecef_to_geodetic, eci_to_ecef_position, eci_to_ecef_velocity, geodetic_to_ecef, gmst};
use crate::{OrbitalError, SPEED_OF_LIGHT_KM_S};

/// Below this slant range the look angles are undefined
const MIN_RANGE_KM: f64 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("satellite {satellite_id} at {timestamp}: zero slant range")]
    ZeroRange {
        satellite_id: u32,
        timestamp: DateTime<Utc>,
    },
    #[error("satellite {satellite_id} at {timestamp}: non-finite geometry")]
    NonFinite {
        satellite_id: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Fixed ground observer (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl Default for ObserverLocation {
    /// NTPU ground station
    fn default() -> Self {
        Self {
            latitude_deg: 24.944_166_7,
            longitude_deg: 121.371_388_9,
            altitude_m: 50.0,
        }
    }
}

impl ObserverLocation {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> crate::Result<Self> {
        let observer = Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        };
        observer.validate()?;
        Ok(observer)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude_deg) {
            return Err(OrbitalError::InvalidCoordinates(format!(
                "latitude {} outside [-90, 90]",
                self.latitude_deg
            )));
        }
        if !(-180.0..=360.0).contains(&self.longitude_deg) {
            return Err(OrbitalError::InvalidCoordinates(format!(
                "longitude {} outside [-180, 360]",
                self.longitude_deg
            )));
        }
        if !self.altitude_m.is_finite() || self.altitude_m < -500.0 {
            return Err(OrbitalError::InvalidCoordinates(format!(
                "altitude {} m not plausible",
                self.altitude_m
            )));
        }
        Ok(())
    }

    pub fn ecef_km(&self) -> Vector3<f64> {
        geodetic_to_ecef(self.latitude_deg, self.longitude_deg, self.altitude_m / 1000.0)
    }

    /// Straight-line separation in metres
    pub fn distance_m(&self, other: &ObserverLocation) -> f64 {
        (self.ecef_km() - other.ecef_km()).norm() * 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationSample {
    pub satellite_id: u32,
    pub timestamp: DateTime<Utc>,
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub range_km: f64,
    /// Positive when receding
    pub range_rate_km_s: f64,
    pub doppler_shift_hz: f64,
    pub altitude_km: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryStats {
    pub observed: usize,
    pub zero_range: usize,
    pub non_finite: usize,
    pub finite_difference: usize,
    pub missing_velocity: usize,
}

impl GeometryStats {
    pub fn dropped(&self) -> usize {
        self.zero_range + self.non_finite
    }

    pub fn merge(&mut self, other: &GeometryStats) {
        self.observed += other.observed;
        self.zero_range += other.zero_range;
        self.non_finite += other.non_finite;
        self.finite_difference += other.finite_difference;
        self.missing_velocity += other.missing_velocity;
    }

    fn record(&mut self, err: &GeometryError) {
        match err {
            GeometryError::ZeroRange { .. } => self.zero_range += 1,
            GeometryError::NonFinite { .. } => self.non_finite += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeometryEngine {
    observer: ObserverLocation,
    observer_ecef: Vector3<f64>,
    latitude_rad: f64,
    longitude_rad: f64,
    carrier_hz: f64,
}

impl GeometryEngine {
    pub fn new(observer: ObserverLocation, carrier_hz: f64) -> Self {
        Self {
            observer,
            observer_ecef: observer.ecef_km(),
            latitude_rad: observer.latitude_deg.to_radians(),
            longitude_rad: observer.longitude_deg.to_radians(),
            carrier_hz,
        }
    }

    pub fn observer(&self) -> &ObserverLocation {
        &self.observer
    }

    /// Observe a single sample. Without a velocity the range rate is zero;
    /// use [`observe_track`](Self::observe_track) to difference neighbours.
    pub fn observe(&self, sample: &TrajectorySample) -> Result<ObservationSample, GeometryError> {
        let g = gmst(sample.timestamp);
        let r_ecef = eci_to_ecef_position(&sample.position_km, g);
        let v_ecef = sample
            .velocity_km_s
            .map(|v| eci_to_ecef_velocity(&sample.position_km, &v, g));
        self.observe_ecef(sample.satellite_id, sample.timestamp, &r_ecef, v_ecef.as_ref())
    }

    /// Observe a time-ordered track, falling back to central differences of
    /// Earth-fixed position where a sample carries no velocity.
    pub fn observe_track(&self, samples: &[TrajectorySample]) -> (Vec<ObservationSample>, GeometryStats) {
        let mut stats = GeometryStats::default();
        let ecef: Vec<Vector3<f64>> = samples
            .iter()
            .map(|s| eci_to_ecef_position(&s.position_km, gmst(s.timestamp)))
            .collect();

        let mut observations = Vec::with_capacity(samples.len());
        for (i, sample) in samples.iter().enumerate() {
            let velocity = match sample.velocity_km_s {
                Some(v) => Some(eci_to_ecef_velocity(&sample.position_km, &v, gmst(sample.timestamp))),
                None => {
                    let fd = finite_difference(samples, &ecef, i);
                    if fd.is_some() {
                        stats.finite_difference += 1;
                    } else {
                        stats.missing_velocity += 1;
                    }
                    fd
                }
            };

            match self.observe_ecef(sample.satellite_id, sample.timestamp, &ecef[i], velocity.as_ref()) {
                Ok(observation) => {
                    stats.observed += 1;
                    observations.push(observation);
                }
                Err(err) => stats.record(&err),
            }
        }

        (observations, stats)
    }

    fn observe_ecef(
        &self,
        satellite_id: u32,
        timestamp: DateTime<Utc>,
        r_ecef: &Vector3<f64>,
        v_ecef: Option<&Vector3<f64>>,
    ) -> Result<ObservationSample, GeometryError> {
        let offset = r_ecef - self.observer_ecef;
        let range_km = offset.norm();
        if !range_km.is_finite() {
            return Err(GeometryError::NonFinite {
                satellite_id,
                timestamp,
            });
        }
        if range_km < MIN_RANGE_KM {
            return Err(GeometryError::ZeroRange {
                satellite_id,
                timestamp,
            });
        }

        let enu = ecef_to_enu(&offset, self.latitude_rad, self.longitude_rad);
        let horizontal = enu.x.hypot(enu.y);
        // atan2 keeps precision at both zenith and horizon
        let elevation_deg = enu.z.atan2(horizontal).to_degrees();
        let mut azimuth_deg = enu.x.atan2(enu.y).to_degrees().rem_euclid(360.0);
        if azimuth_deg >= 360.0 {
            azimuth_deg = 0.0;
        }

        // Observer is fixed in the Earth frame, so relative velocity is v_ecef
        let range_rate_km_s = v_ecef.map(|v| v.dot(&offset) / range_km).unwrap_or(0.0);
        let doppler_shift_hz = -self.carrier_hz * range_rate_km_s / SPEED_OF_LIGHT_KM_S;
        let (_, _, altitude_km) = ecef_to_geodetic(r_ecef);

        let observation = ObservationSample {
            satellite_id,
            timestamp,
            elevation_deg,
            azimuth_deg,
            range_km,
            range_rate_km_s,
            doppler_shift_hz,
            altitude_km,
        };

        if [elevation_deg, azimuth_deg, range_rate_km_s, doppler_shift_hz, altitude_km]
            .iter()
            .all(|v| v.is_finite())
        {
            Ok(observation)
        } else {
            Err(GeometryError::NonFinite {
                satellite_id,
                timestamp,
            })
        }
    }
}

fn finite_difference(samples: &[TrajectorySample], ecef: &[Vector3<f64>], i: usize) -> Option<Vector3<f64>> {
    let before = i.checked_sub(1);
    let after = (i + 1 < samples.len()).then_some(i + 1);
    let (lo, hi) = match (before, after) {
        (Some(b), Some(a)) => (b, a),
        (None, Some(a)) => (i, a),
        (Some(b), None) => (b, i),
        (None, None) => return None,
    };

    let dt = seconds_between(samples[lo].timestamp, samples[hi].timestamp);
    (dt > 0.0).then(|| (ecef[hi] - ecef[lo]) / dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{MeanElements, OrbitalElementSet};
    use crate::propagation::{Propagator, SimplifiedKeplerPropagator};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    const KU_BAND_HZ: f64 = 12.0e9;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    /// Inverse of the Earth-fixed rotation
    fn ecef_to_eci(ecef: &Vector3<f64>, g: f64) -> Vector3<f64> {
        let (s, c) = g.sin_cos();
        Vector3::new(ecef.x * c - ecef.y * s, ecef.x * s + ecef.y * c, ecef.z)
    }

    fn sample_at_ecef(ecef: Vector3<f64>) -> TrajectorySample {
        TrajectorySample {
            satellite_id: 1,
            timestamp: at(),
            position_km: ecef_to_eci(&ecef, gmst(at())),
            velocity_km_s: None,
        }
    }

    #[test]
    fn test_overhead_satellite_is_at_zenith() {
        for &(lat, lon) in &[(0.0, 0.0), (24.944, 121.371), (-45.0, -70.0), (80.0, 10.0)] {
            let observer = ObserverLocation::new(lat, lon, 0.0).unwrap();
            let engine = GeometryEngine::new(observer, KU_BAND_HZ);
            let sample = sample_at_ecef(geodetic_to_ecef(lat, lon, 550.0));

            let obs = engine.observe(&sample).unwrap();
            assert!((obs.elevation_deg - 90.0).abs() < 1e-6, "elevation {} at ({}, {})", obs.elevation_deg, lat, lon);
            assert!((0.0..360.0).contains(&obs.azimuth_deg));
            assert!((obs.range_km - 550.0).abs() < 1e-6);
            assert!((obs.altitude_km - 550.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_horizon_satellite_due_east() {
        let engine = GeometryEngine::new(ObserverLocation::new(0.0, 0.0, 0.0).unwrap(), KU_BAND_HZ);
        let observer_ecef = geodetic_to_ecef(0.0, 0.0, 0.0);
        let sample = sample_at_ecef(observer_ecef + Vector3::new(0.0, 2000.0, 0.0));

        let obs = engine.observe(&sample).unwrap();
        assert!(obs.elevation_deg.abs() < 1e-9, "elevation {}", obs.elevation_deg);
        assert!((obs.azimuth_deg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_azimuth_due_north_is_zero() {
        let engine = GeometryEngine::new(ObserverLocation::new(0.0, 0.0, 0.0).unwrap(), KU_BAND_HZ);
        let observer_ecef = geodetic_to_ecef(0.0, 0.0, 0.0);
        let sample = sample_at_ecef(observer_ecef + Vector3::new(100.0, 0.0, 1000.0));

        let obs = engine.observe(&sample).unwrap();
        assert!(obs.azimuth_deg < 1e-9 || obs.azimuth_deg > 360.0 - 1e-9);
        assert!(obs.azimuth_deg < 360.0);
    }

    #[test]
    fn test_zero_range_is_an_error() {
        let observer = ObserverLocation::new(10.0, 20.0, 0.0).unwrap();
        let engine = GeometryEngine::new(observer, KU_BAND_HZ);
        let sample = sample_at_ecef(observer.ecef_km());

        assert!(matches!(engine.observe(&sample), Err(GeometryError::ZeroRange { .. })));
        let (obs, stats) = engine.observe_track(&[sample]);
        assert!(obs.is_empty());
        assert_eq!(stats.zero_range, 1);
        assert_eq!(stats.dropped(), 1);
    }

    #[test]
    fn test_non_finite_position_is_an_error() {
        let engine = GeometryEngine::new(ObserverLocation::default(), KU_BAND_HZ);
        let mut sample = sample_at_ecef(Vector3::new(7000.0, 0.0, 0.0));
        sample.position_km.x = f64::NAN;
        assert!(matches!(engine.observe(&sample), Err(GeometryError::NonFinite { .. })));
    }

    #[test]
    fn test_invalid_observer_rejected() {
        assert!(ObserverLocation::new(91.0, 0.0, 0.0).is_err());
        assert!(ObserverLocation::new(0.0, 400.0, 0.0).is_err());
        assert!(ObserverLocation::new(0.0, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_observer_distance() {
        let a = ObserverLocation::new(0.0, 0.0, 0.0).unwrap();
        let b = ObserverLocation::new(0.0, 0.0, 100.0).unwrap();
        assert!((a.distance_m(&b) - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_doppler_sign_follows_range_rate() {
        let elements = MeanElements::circular("STARLINK-7", 45200, at(), 550.0, 53.0, 0.0, 350.0);
        let set = OrbitalElementSet::from_mean_elements(&elements).unwrap();
        let kepler = SimplifiedKeplerPropagator::default();
        let engine = GeometryEngine::new(ObserverLocation::new(0.0, 0.0, 0.0).unwrap(), KU_BAND_HZ);

        let samples: Vec<_> = (0..20)
            .map(|i| {
                let state = kepler.propagate_one(&set, at() + Duration::seconds(30 * i)).unwrap();
                TrajectorySample::from_state(set.catalog_number(), &state)
            })
            .collect();
        let (obs, _) = engine.observe_track(&samples);

        for pair in obs.windows(2) {
            let approaching = pair[1].range_km < pair[0].range_km;
            let mid_rate = 0.5 * (pair[0].range_rate_km_s + pair[1].range_rate_km_s);
            if mid_rate.abs() > 0.5 {
                assert_eq!(approaching, mid_rate < 0.0, "range {} -> {}, rate {}", pair[0].range_km, pair[1].range_km, mid_rate);
            }
        }
        for o in &obs {
            assert_eq!(o.doppler_shift_hz > 0.0, o.range_rate_km_s < 0.0);
        }
    }

    #[test]
    fn test_finite_difference_matches_propagated_velocity() {
        let elements = MeanElements::circular("STARLINK-8", 45201, at(), 550.0, 53.0, 0.0, 355.0);
        let set = OrbitalElementSet::from_mean_elements(&elements).unwrap();
        let kepler = SimplifiedKeplerPropagator::default();
        let engine = GeometryEngine::new(ObserverLocation::new(0.0, 0.0, 0.0).unwrap(), KU_BAND_HZ);

        let with_velocity: Vec<_> = (0..21)
            .map(|i| {
                let state = kepler.propagate_one(&set, at() + Duration::seconds(i)).unwrap();
                TrajectorySample::from_state(set.catalog_number(), &state)
            })
            .collect();
        let without: Vec<_> = with_velocity
            .iter()
            .map(|s| TrajectorySample {
                velocity_km_s: None,
                ..*s
            })
            .collect();

        let (exact, _) = engine.observe_track(&with_velocity);
        let (approx, stats) = engine.observe_track(&without);
        assert_eq!(stats.finite_difference, 21);
        for (e, a) in exact.iter().zip(&approx).skip(1).take(19) {
            assert!((e.range_rate_km_s - a.range_rate_km_s).abs() < 0.01, "exact {} fd {}", e.range_rate_km_s, a.range_rate_km_s);
            assert_eq!(e.elevation_deg, a.elevation_deg);
        }
    }

    #[test]
    fn test_single_sample_without_velocity_counts_missing() {
        let engine = GeometryEngine::new(ObserverLocation::default(), KU_BAND_HZ);
        let sample = sample_at_ecef(Vector3::new(7000.0, 0.0, 0.0));
        let (obs, stats) = engine.observe_track(&[sample]);
        assert_eq!(obs.len(), 1);
        assert_eq!(stats.missing_velocity, 1);
        assert_eq!(obs[0].range_rate_km_s, 0.0);
    }

    proptest! {
        #[test]
        fn prop_look_angles_in_range(
            lat in -90.0f64..=90.0,
            lon in -180.0f64..180.0,
            x in -9000.0f64..9000.0,
            y in -9000.0f64..9000.0,
            z in -9000.0f64..9000.0,
        ) {
            let observer = ObserverLocation::new(lat, lon, 0.0).unwrap();
            let engine = GeometryEngine::new(observer, KU_BAND_HZ);
            let position = Vector3::new(x, y, z);
            prop_assume!((position - observer.ecef_km()).norm() > 1.0);

            let obs = engine.observe(&sample_at_ecef(position)).unwrap();
            prop_assert!((-90.0..=90.0).contains(&obs.elevation_deg));
            prop_assert!((0.0..360.0).contains(&obs.azimuth_deg));
        }
    }
}
