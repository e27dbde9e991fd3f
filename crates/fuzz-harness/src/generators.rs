//! Orbital domain generators for property-based testing
//!
//! Angles are degrees, altitudes km, epochs UTC. Element strategies stay
//! inside the ranges the two-line format can encode so rendered records
//! always reparse.

use chrono::{DateTime, Utc};
use orbital_mechanics::elements::{mean_motion_for_altitude, render_tle};
use orbital_mechanics::{MeanElements, ObserverLocation};
use proptest::collection::{vec, SizeRange};
use proptest::prelude::*;

/// 2025-01-01T00:00:00Z
const BASE_EPOCH_UNIX: i64 = 1_735_689_600;

// ============================================================================
// Angles
// ============================================================================

/// Angle in [0, 360)
pub fn angle_deg() -> impl Strategy<Value = f64> {
    0.0f64..360.0
}

/// Set of angles in [0, 360), e.g. RAANs or phases of a pool
pub fn angle_set(size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<f64>> {
    vec(angle_deg(), size)
}

/// Elevation angle in [-90, 90]
pub fn elevation_deg() -> impl Strategy<Value = f64> {
    -90.0f64..=90.0
}

/// Arbitrary elevation series, not necessarily physical
pub fn elevation_series(size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<f64>> {
    vec(elevation_deg(), size)
}

/// Smooth single-pass elevation arc: rises from below the horizon to `peak`
/// and back, sampled at `len` points
pub fn pass_arc() -> impl Strategy<Value = Vec<f64>> {
    (0.0f64..=90.0, 3usize..120, -20.0f64..-1.0).prop_map(|(peak, len, floor)| {
        let last = (len - 1) as f64;
        (0..len)
            .map(|i| {
                let x = std::f64::consts::PI * i as f64 / last;
                floor + (peak - floor) * x.sin()
            })
            .collect()
    })
}

pub fn latitude_deg() -> impl Strategy<Value = f64> {
    -90.0f64..=90.0
}

pub fn longitude_deg() -> impl Strategy<Value = f64> {
    -180.0f64..=180.0
}

/// Ground observer between sea level and 5 km
pub fn observer_location() -> impl Strategy<Value = ObserverLocation> {
    (latitude_deg(), longitude_deg(), 0.0f64..=5_000.0).prop_map(
        |(latitude_deg, longitude_deg, altitude_m)| ObserverLocation {
            latitude_deg,
            longitude_deg,
            altitude_m,
        },
    )
}

// ============================================================================
// Orbits
// ============================================================================

/// LEO altitude (km)
pub fn altitude_leo_km() -> impl Strategy<Value = f64> {
    300.0f64..=2_000.0
}

pub fn inclination_deg() -> impl Strategy<Value = f64> {
    0.0f64..=180.0
}

/// Near-circular eccentricity (0 to 0.01)
pub fn eccentricity_circular() -> impl Strategy<Value = f64> {
    0.0f64..0.01
}

/// Catalog number within the five-digit field
pub fn catalog_number() -> impl Strategy<Value = u32> {
    1u32..=99_999
}

pub fn sat_name() -> impl Strategy<Value = String> {
    "(STARLINK|ONEWEB|IRIDIUM)-[0-9]{1,4}"
}

/// Epoch within a year of 2025-01-01, whole seconds
pub fn epoch() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..31_536_000).prop_filter_map("epoch out of range", |offset| {
        DateTime::from_timestamp(BASE_EPOCH_UNIX + offset, 0)
    })
}

/// Mean elements of a near-circular LEO orbit
pub fn mean_elements() -> impl Strategy<Value = MeanElements> {
    (
        (sat_name(), catalog_number(), epoch()),
        (
            altitude_leo_km(),
            inclination_deg(),
            angle_deg(),
            eccentricity_circular(),
            angle_deg(),
            angle_deg(),
        ),
    )
        .prop_map(|((name, catalog_number, epoch), (alt, inc, raan, ecc, argp, m))| MeanElements {
            name,
            catalog_number,
            epoch,
            inclination_deg: inc,
            raan_deg: raan,
            eccentricity: ecc,
            arg_perigee_deg: argp,
            mean_anomaly_deg: m,
            mean_motion_rev_day: mean_motion_for_altitude(alt),
        })
}

// ============================================================================
// Element text
// ============================================================================

/// Well-formed three-line record, newline terminated
pub fn tle_record() -> impl Strategy<Value = String> {
    mean_elements().prop_filter_map("unrenderable elements", |m| {
        render_tle(&m)
            .ok()
            .map(|(line1, line2)| format!("{}\n{}\n{}\n", m.name, line1, line2))
    })
}

/// Catalog text of well-formed records
pub fn tle_catalog(size: impl Into<SizeRange>) -> impl Strategy<Value = String> {
    vec(tle_record(), size).prop_map(|records| records.concat())
}

/// Damage applied to one record
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Shift the checksum digit of line 1 or 2
    Checksum { line: usize },
    /// Cut a data line to `keep` columns
    Truncate { line: usize, keep: usize },
    /// Overwrite one column of a data line
    Replace { line: usize, column: usize, with: char },
    /// Remove line 2 entirely
    DropLine2,
}

pub fn mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (1usize..=2).prop_map(|line| Mutation::Checksum { line }),
        (1usize..=2, 0usize..68).prop_map(|(line, keep)| Mutation::Truncate { line, keep }),
        (1usize..=2, 2usize..68, prop::char::range('!', '~'))
            .prop_map(|(line, column, with)| Mutation::Replace { line, column, with }),
        Just(Mutation::DropLine2),
    ]
}

/// Apply `mutation` to a three-line record
pub fn apply_mutation(record: &str, mutation: &Mutation) -> String {
    let mut lines: Vec<String> = record.lines().map(str::to_string).collect();
    if lines.len() < 3 {
        return record.to_string();
    }
    match *mutation {
        Mutation::Checksum { line } => {
            let target = &mut lines[line];
            if let Some(digit) = target.pop().and_then(|c| c.to_digit(10)) {
                target.push(char::from_digit((digit + 1) % 10, 10).unwrap_or('0'));
            }
        }
        Mutation::Truncate { line, keep } => lines[line].truncate(keep),
        Mutation::Replace { line, column, with } => {
            lines[line] = lines[line]
                .chars()
                .enumerate()
                .map(|(i, c)| if i == column { with } else { c })
                .collect();
        }
        Mutation::DropLine2 => {
            lines.pop();
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Record with one mutation applied
pub fn malformed_record() -> impl Strategy<Value = String> {
    (tle_record(), mutation()).prop_map(|(record, m)| apply_mutation(&record, &m))
}
