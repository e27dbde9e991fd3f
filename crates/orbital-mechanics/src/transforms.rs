//! Frame transforms: inertial (TEME) to Earth-fixed, geodetic, topocentric.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use std::f64::consts::TAU;

use crate::{EARTH_FLATTENING, EARTH_RADIUS_KM, EARTH_ROTATION_RAD_S};

const JULIAN_DATE_UNIX_EPOCH: f64 = 2_440_587.5;
const JULIAN_DATE_J2000: f64 = 2_451_545.0;

fn eccentricity_squared() -> f64 {
    EARTH_FLATTENING * (2.0 - EARTH_FLATTENING)
}

pub fn julian_date(at: DateTime<Utc>) -> f64 {
    let seconds = at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9;
    seconds / 86_400.0 + JULIAN_DATE_UNIX_EPOCH
}

/// Greenwich mean sidereal time (IAU 1982), radians in [0, 2π)
pub fn gmst(at: DateTime<Utc>) -> f64 {
    let jd = julian_date(at);
    let t = (jd - JULIAN_DATE_J2000) / 36_525.0;

    let gmst_sec = 67_310.548_41
        + (876_600.0 * 3_600.0 + 8_640_184.812_866) * t
        + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;

    (gmst_sec.rem_euclid(86_400.0) / 240.0).to_radians().rem_euclid(TAU)
}

/// Rotate an inertial position into the Earth-fixed frame
pub fn eci_to_ecef_position(position: &Vector3<f64>, gmst: f64) -> Vector3<f64> {
    let (sin_g, cos_g) = gmst.sin_cos();
    Vector3::new(
        position.x * cos_g + position.y * sin_g,
        -position.x * sin_g + position.y * cos_g,
        position.z,
    )
}

/// Earth-fixed velocity: rotated inertial velocity minus ω × r
pub fn eci_to_ecef_velocity(position: &Vector3<f64>, velocity: &Vector3<f64>, gmst: f64) -> Vector3<f64> {
    let rotated = eci_to_ecef_position(velocity, gmst);
    let r_ecef = eci_to_ecef_position(position, gmst);
    let omega = Vector3::new(0.0, 0.0, EARTH_ROTATION_RAD_S);
    rotated - omega.cross(&r_ecef)
}

/// WGS84 geodetic (deg, deg, km) to ECEF (km)
pub fn geodetic_to_ecef(latitude_deg: f64, longitude_deg: f64, altitude_km: f64) -> Vector3<f64> {
    let (sin_lat, cos_lat) = latitude_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = longitude_deg.to_radians().sin_cos();
    let e2 = eccentricity_squared();
    let n = EARTH_RADIUS_KM / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    Vector3::new(
        (n + altitude_km) * cos_lat * cos_lon,
        (n + altitude_km) * cos_lat * sin_lon,
        (n * (1.0 - e2) + altitude_km) * sin_lat,
    )
}

/// ECEF (km) to WGS84 geodetic (deg, deg, km), iterating on latitude
pub fn ecef_to_geodetic(ecef: &Vector3<f64>) -> (f64, f64, f64) {
    let e2 = eccentricity_squared();
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();
    let longitude = ecef.y.atan2(ecef.x);

    if p < 1e-9 {
        let b = EARTH_RADIUS_KM * (1.0 - EARTH_FLATTENING);
        let latitude = if ecef.z >= 0.0 { 90.0 } else { -90.0 };
        return (latitude, longitude.to_degrees(), ecef.z.abs() - b);
    }

    let mut latitude = ecef.z.atan2(p * (1.0 - e2));
    let mut altitude = 0.0;
    for _ in 0..8 {
        let sin_lat = latitude.sin();
        let n = EARTH_RADIUS_KM / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        altitude = p / latitude.cos() - n;
        let next = ecef.z.atan2(p * (1.0 - e2 * n / (n + altitude)));
        if (next - latitude).abs() < 1e-12 {
            latitude = next;
            break;
        }
        latitude = next;
    }

    (latitude.to_degrees(), longitude.to_degrees(), altitude)
}

/// Project an ECEF offset onto the local east/north/up axes
pub fn ecef_to_enu(offset: &Vector3<f64>, latitude_rad: f64, longitude_rad: f64) -> Vector3<f64> {
    let (sin_lat, cos_lat) = latitude_rad.sin_cos();
    let (sin_lon, cos_lon) = longitude_rad.sin_cos();

    let east = -sin_lon * offset.x + cos_lon * offset.y;
    let north = -sin_lat * cos_lon * offset.x - sin_lat * sin_lon * offset.y + cos_lat * offset.z;
    let up = cos_lat * cos_lon * offset.x + cos_lat * sin_lon * offset.y + sin_lat * offset.z;

    Vector3::new(east, north, up)
}
