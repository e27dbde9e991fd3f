//! Orbital Mechanics Library
//!
//! Two-line element extraction, pluggable propagation backends, frame
//! transforms and observer-relative geometry for LEO satellite pool planning.
//!
//! # Data flow
//!
//! ```text
//! TLE text ──parse_tle──▶ OrbitalElementSet ──Propagator──▶ StateVector
//!                                                              │
//!                          ObservationSample ◀──GeometryEngine─┘
//! ```

use thiserror::Error;

pub mod elements;
pub mod geometry;
pub mod propagation;
pub mod transforms;

pub use elements::{parse_tle, ElementParse, MeanElements, OrbitalElementSet, ParseError, ParseStats};
pub use geometry::{GeometryEngine, GeometryError, GeometryStats, ObservationSample, ObserverLocation};
pub use propagation::{
    PropagationError, Propagator, PropagatorKind, SimplifiedKeplerPropagator, Sgp4Propagator,
    StateVector, TrajectorySample,
};

/// Earth gravitational parameter (km³/s²)
pub const MU_EARTH_KM3_S2: f64 = 398_600.4418;

/// WGS84 equatorial radius (km)
pub const EARTH_RADIUS_KM: f64 = 6378.137;

/// WGS84 flattening
pub const EARTH_FLATTENING: f64 = 1.0 / 298.257223563;

/// Earth rotation rate (rad/s)
pub const EARTH_ROTATION_RAD_S: f64 = 7.292_115_146_706_979e-5;

/// Second zonal harmonic
pub const J2: f64 = 1.082_626_68e-3;

/// Speed of light (km/s)
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const MINUTES_PER_DAY: f64 = 1_440.0;

#[derive(Error, Debug)]
pub enum OrbitalError {
    #[error("Invalid TLE: {0}")]
    InvalidTle(#[from] ParseError),
    #[error("Propagation failed: {0}")]
    PropagationFailed(#[from] PropagationError),
    #[error("Geometry failed: {0}")]
    Geometry(#[from] GeometryError),
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

pub type Result<T> = std::result::Result<T, OrbitalError>;
