//! Propagation capability
//!
//! The scheduler and everything downstream see only the [`Propagator`]
//! trait. Two backends are provided and chosen through [`PropagatorKind`]:
//! the `sgp4` crate and a two-body Kepler model with J2 secular drift.

use chrono::{DateTime, Utc};
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::sync::Arc;
use thiserror::Error;

use crate::elements::{seconds_between, OrbitalElementSet};
use crate::MU_EARTH_KM3_S2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropagationError {
    #[error("satellite {catalog}: backend rejected elements: {message}")]
    Elements { catalog: u32, message: String },
    #[error("satellite {catalog} at {at}: {message}")]
    Failed {
        catalog: u32,
        at: DateTime<Utc>,
        message: String,
    },
    #[error("satellite {catalog} at {at}: Kepler equation did not converge")]
    NoConvergence { catalog: u32, at: DateTime<Utc> },
    #[error("satellite {catalog} at {at}: non-finite state vector")]
    NonFinite { catalog: u32, at: DateTime<Utc> },
}

pub type Result<T> = std::result::Result<T, PropagationError>;

/// Inertial (TEME) state at a given instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateVector {
    pub epoch: DateTime<Utc>,
    pub position_km: Vector3<f64>,
    pub velocity_km_s: Vector3<f64>,
}

impl StateVector {
    fn checked(self, catalog: u32) -> Result<Self> {
        if self.position_km.iter().chain(self.velocity_km_s.iter()).all(|v| v.is_finite()) {
            Ok(self)
        } else {
            Err(PropagationError::NonFinite {
                catalog,
                at: self.epoch,
            })
        }
    }
}

/// One propagated point of a satellite trajectory.
///
/// Velocity is optional so externally sourced ephemerides without it can
/// still be observed (range rate then comes from finite differences).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectorySample {
    pub satellite_id: u32,
    pub timestamp: DateTime<Utc>,
    pub position_km: Vector3<f64>,
    pub velocity_km_s: Option<Vector3<f64>>,
}

impl TrajectorySample {
    pub fn from_state(satellite_id: u32, state: &StateVector) -> Self {
        Self {
            satellite_id,
            timestamp: state.epoch,
            position_km: state.position_km,
            velocity_km_s: Some(state.velocity_km_s),
        }
    }
}

pub trait Propagator: Send + Sync {
    fn name(&self) -> &'static str;

    fn propagate_one(&self, elements: &OrbitalElementSet, at: DateTime<Utc>) -> Result<StateVector>;

    /// Propagate to each timestamp; one result per timestamp, in order.
    fn propagate_series(
        &self,
        elements: &OrbitalElementSet,
        times: &[DateTime<Utc>],
    ) -> Vec<Result<StateVector>> {
        times.iter().map(|&at| self.propagate_one(elements, at)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagatorKind {
    #[default]
    Sgp4,
    SimplifiedKepler,
}

impl PropagatorKind {
    pub fn build(self) -> Arc<dyn Propagator> {
        match self {
            PropagatorKind::Sgp4 => Arc::new(Sgp4Propagator),
            PropagatorKind::SimplifiedKepler => Arc::new(SimplifiedKeplerPropagator::default()),
        }
    }
}

/// SGP4/SDP4 via the `sgp4` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgp4Propagator;

impl Sgp4Propagator {
    fn prepare(elements: &OrbitalElementSet) -> Result<(sgp4::Elements, sgp4::Constants)> {
        let catalog = elements.catalog_number();
        let (line1, line2) = elements.lines();

        let parsed = sgp4::Elements::from_tle(
            Some(elements.name().to_string()),
            line1.as_bytes(),
            line2.as_bytes(),
        )
        .map_err(|e| PropagationError::Elements {
            catalog,
            message: e.to_string(),
        })?;

        let constants = sgp4::Constants::from_elements(&parsed).map_err(|e| PropagationError::Elements {
            catalog,
            message: e.to_string(),
        })?;

        Ok((parsed, constants))
    }

    fn evaluate(
        catalog: u32,
        parsed: &sgp4::Elements,
        constants: &sgp4::Constants,
        at: DateTime<Utc>,
    ) -> Result<StateVector> {
        let minutes = parsed
            .datetime_to_minutes_since_epoch(&at.naive_utc())
            .map_err(|e| PropagationError::Failed {
                catalog,
                at,
                message: e.to_string(),
            })?;

        let prediction = constants.propagate(minutes).map_err(|e| PropagationError::Failed {
            catalog,
            at,
            message: e.to_string(),
        })?;

        StateVector {
            epoch: at,
            position_km: Vector3::from(prediction.position),
            velocity_km_s: Vector3::from(prediction.velocity),
        }
        .checked(catalog)
    }
}

impl Propagator for Sgp4Propagator {
    fn name(&self) -> &'static str {
        "sgp4"
    }

    fn propagate_one(&self, elements: &OrbitalElementSet, at: DateTime<Utc>) -> Result<StateVector> {
        let (parsed, constants) = Self::prepare(elements)?;
        Self::evaluate(elements.catalog_number(), &parsed, &constants, at)
    }

    // Initialise the model once per series
    fn propagate_series(
        &self,
        elements: &OrbitalElementSet,
        times: &[DateTime<Utc>],
    ) -> Vec<Result<StateVector>> {
        let catalog = elements.catalog_number();
        match Self::prepare(elements) {
            Ok((parsed, constants)) => times
                .iter()
                .map(|&at| Self::evaluate(catalog, &parsed, &constants, at))
                .collect(),
            Err(err) => times.iter().map(|_| Err(err.clone())).collect(),
        }
    }
}

/// Two-body Kepler propagation with optional J2 secular drift of RAAN and
/// argument of perigee. Adequate for geometry screening, not for tracking.
#[derive(Debug, Clone, Copy)]
pub struct SimplifiedKeplerPropagator {
    pub j2_secular: bool,
}

impl Default for SimplifiedKeplerPropagator {
    fn default() -> Self {
        Self { j2_secular: true }
    }
}

/// Solve M = E - e·sin(E) by Newton iteration
pub fn solve_kepler(mean_anomaly: f64, eccentricity: f64) -> Option<f64> {
    let mut ecc_anomaly = if eccentricity < 0.8 { mean_anomaly } else { PI };

    for _ in 0..50 {
        let f = ecc_anomaly - eccentricity * ecc_anomaly.sin() - mean_anomaly;
        let f_prime = 1.0 - eccentricity * ecc_anomaly.cos();
        let step = f / f_prime;
        ecc_anomaly -= step;
        if step.abs() < 1e-12 {
            return Some(ecc_anomaly);
        }
    }
    None
}

impl Propagator for SimplifiedKeplerPropagator {
    fn name(&self) -> &'static str {
        "simplified_kepler"
    }

    fn propagate_one(&self, elements: &OrbitalElementSet, at: DateTime<Utc>) -> Result<StateVector> {
        let catalog = elements.catalog_number();
        let dt = seconds_between(elements.epoch(), at);
        let rates = elements.secular_rates();
        let (raan_rate, argp_rate) = if self.j2_secular {
            (rates.raan, rates.arg_perigee)
        } else {
            (0.0, 0.0)
        };

        let a = elements.semi_major_axis_km();
        let e = elements.eccentricity();
        let inclination = elements.inclination_deg().to_radians();
        let raan = elements.raan_deg().to_radians() + raan_rate * dt;
        let arg_perigee = elements.arg_perigee_deg().to_radians() + argp_rate * dt;
        let mean_anomaly = (elements.mean_anomaly_deg().to_radians() + rates.mean_motion * dt).rem_euclid(TAU);

        let ecc_anomaly =
            solve_kepler(mean_anomaly, e).ok_or(PropagationError::NoConvergence { catalog, at })?;
        let half = 0.5 * ecc_anomaly;
        let true_anomaly = 2.0 * ((1.0 + e).sqrt() * half.sin()).atan2((1.0 - e).sqrt() * half.cos());
        let radius = a * (1.0 - e * ecc_anomaly.cos());
        let p = a * (1.0 - e * e);

        let (sin_nu, cos_nu) = true_anomaly.sin_cos();
        let position_pf = Vector3::new(radius * cos_nu, radius * sin_nu, 0.0);
        let velocity_pf = (MU_EARTH_KM3_S2 / p).sqrt() * Vector3::new(-sin_nu, e + cos_nu, 0.0);

        // Perifocal to inertial: Rz(Ω)·Rx(i)·Rz(ω)
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), raan)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), inclination)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), arg_perigee);

        StateVector {
            epoch: at,
            position_km: rotation * position_pf,
            velocity_km_s: rotation * velocity_pf,
        }
        .checked(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::MeanElements;
    use chrono::{Duration, TimeZone};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn circular(raan: f64, mean_anomaly: f64) -> OrbitalElementSet {
        let elements = MeanElements::circular("STARLINK-1", 45100, epoch(), 550.0, 53.0, raan, mean_anomaly);
        OrbitalElementSet::from_mean_elements(&elements).unwrap()
    }

    #[test]
    fn test_kepler_circular_radius_and_speed() {
        let set = circular(0.0, 0.0);
        let kepler = SimplifiedKeplerPropagator::default();
        let a = set.semi_major_axis_km();

        for minutes in [0, 7, 33, 90] {
            let state = kepler.propagate_one(&set, epoch() + Duration::minutes(minutes)).unwrap();
            assert!((state.position_km.norm() - a).abs() < 1e-6, "radius at {}min", minutes);
            let speed = (MU_EARTH_KM3_S2 / a).sqrt();
            assert!((state.velocity_km_s.norm() - speed).abs() < 1e-9);
        }
    }

    #[test]
    fn test_kepler_at_ascending_node() {
        let set = circular(0.0, 0.0);
        let state = SimplifiedKeplerPropagator::default().propagate_one(&set, epoch()).unwrap();
        let a = set.semi_major_axis_km();
        assert!((state.position_km.x - a).abs() < 1e-6);
        assert!(state.position_km.y.abs() < 1e-6 && state.position_km.z.abs() < 1e-6);
        // Moving north-east at 53 deg
        let v = state.velocity_km_s;
        assert!(v.z > 0.0 && v.y > 0.0);
        assert!(((v.z / v.y).atan().to_degrees() - 53.0).abs() < 1e-6);
    }

    #[test]
    fn test_kepler_returns_after_one_period_without_j2() {
        let set = circular(40.0, 10.0);
        let kepler = SimplifiedKeplerPropagator { j2_secular: false };
        let period_ms = (set.period_minutes() * 60_000.0).round() as i64;
        let start = kepler.propagate_one(&set, epoch()).unwrap();
        let later = kepler
            .propagate_one(&set, epoch() + Duration::milliseconds(period_ms))
            .unwrap();
        assert!((start.position_km - later.position_km).norm() < 0.1);
    }

    #[test]
    fn test_solve_kepler_eccentric() {
        let e = 0.7;
        for m in [0.1, 1.0, 3.0, 5.5] {
            let ecc_anomaly = solve_kepler(m, e).unwrap();
            assert!((ecc_anomaly - e * ecc_anomaly.sin() - m).abs() < 1e-10);
        }
    }

    #[test]
    fn test_sgp4_close_to_kepler_at_epoch() {
        let set = circular(120.0, 45.0);
        let sgp4 = Sgp4Propagator.propagate_one(&set, epoch()).unwrap();
        let kepler = SimplifiedKeplerPropagator::default().propagate_one(&set, epoch()).unwrap();

        let radius = sgp4.position_km.norm();
        assert!((radius - set.semi_major_axis_km()).abs() < 50.0, "sgp4 radius {}", radius);
        let separation = (sgp4.position_km - kepler.position_km).norm();
        assert!(separation < 100.0, "backends disagree by {} km", separation);
    }

    #[test]
    fn test_sgp4_series_matches_single_calls() {
        let set = circular(10.0, 200.0);
        let times: Vec<_> = (0..5).map(|i| epoch() + Duration::seconds(30 * i)).collect();
        let series = Sgp4Propagator.propagate_series(&set, &times);

        assert_eq!(series.len(), times.len());
        for (at, result) in times.iter().zip(series) {
            let single = Sgp4Propagator.propagate_one(&set, *at).unwrap();
            assert_eq!(result.unwrap(), single);
        }
    }

    #[test]
    fn test_kind_builds_named_backend() {
        assert_eq!(PropagatorKind::Sgp4.build().name(), "sgp4");
        assert_eq!(PropagatorKind::SimplifiedKepler.build().name(), "simplified_kepler");
        let kind: PropagatorKind = serde_json::from_str("\"simplified_kepler\"").unwrap();
        assert_eq!(kind, PropagatorKind::SimplifiedKepler);
    }
}
