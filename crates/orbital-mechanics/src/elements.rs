//! Two-line element extraction
//!
//! Parses NORAD fixed-width element records into validated, immutable
//! [`OrbitalElementSet`]s. A malformed record never aborts the batch: it is
//! skipped and counted in [`ParseStats`].

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::f64::consts::PI;
use std::ops::Range;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::{EARTH_RADIUS_KM, J2, MINUTES_PER_DAY, MU_EARTH_KM3_S2, SECONDS_PER_DAY};

pub const TLE_LINE_LENGTH: usize = 69;

/// Plausible orbital period band (minutes)
pub const MIN_PERIOD_MINUTES: f64 = 30.0;
pub const MAX_PERIOD_MINUTES: f64 = 1440.0;

/// Diagnostics kept per parse; the skip counter is never capped.
const MAX_DIAGNOSTICS: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("no element records found in input")]
    NoRecords,
    #[error("record is missing data line {0}")]
    MissingLine(u8),
    #[error("data line {line} must start with \"{line} \"")]
    LineMarker { line: u8 },
    #[error("data line {line} has {len} characters, expected 69")]
    LineLength { line: u8, len: usize },
    #[error("data line {line} contains non-ASCII characters")]
    NonAscii { line: u8 },
    #[error("field {field} is not a number: {value:?}")]
    Field { field: &'static str, value: String },
    #[error("field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("catalog number mismatch: line 1 has {line1}, line 2 has {line2}")]
    CatalogMismatch { line1: u32, line2: u32 },
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Mean elements for building a synthetic element set.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanElements {
    pub name: String,
    pub catalog_number: u32,
    pub epoch: DateTime<Utc>,
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub eccentricity: f64,
    pub arg_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    pub mean_motion_rev_day: f64,
}

impl MeanElements {
    /// Circular orbit at the given altitude above the equatorial radius
    pub fn circular(
        name: &str,
        catalog_number: u32,
        epoch: DateTime<Utc>,
        altitude_km: f64,
        inclination_deg: f64,
        raan_deg: f64,
        mean_anomaly_deg: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            catalog_number,
            epoch,
            inclination_deg,
            raan_deg,
            eccentricity: 0.0,
            arg_perigee_deg: 0.0,
            mean_anomaly_deg,
            mean_motion_rev_day: mean_motion_for_altitude(altitude_km),
        }
    }
}

/// Mean motion (rev/day) of a circular orbit at `altitude_km`
pub fn mean_motion_for_altitude(altitude_km: f64) -> f64 {
    let a = EARTH_RADIUS_KM + altitude_km;
    (MU_EARTH_KM3_S2 / a.powi(3)).sqrt() * SECONDS_PER_DAY / (2.0 * PI)
}

/// Secular rates under J2 (rad/s)
#[derive(Debug, Clone, Copy)]
pub struct SecularRates {
    pub raan: f64,
    pub arg_perigee: f64,
    pub mean_motion: f64,
}

/// A validated element set. Never mutated; a newer epoch replaces it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrbitalElementSet {
    name: String,
    constellation: String,
    catalog_number: u32,
    epoch: DateTime<Utc>,
    inclination_deg: f64,
    raan_deg: f64,
    eccentricity: f64,
    arg_perigee_deg: f64,
    mean_anomaly_deg: f64,
    mean_motion_rev_day: f64,
    semi_major_axis_km: f64,
    period_minutes: f64,
    apogee_altitude_km: f64,
    perigee_altitude_km: f64,
    line1: String,
    line2: String,
}

impl OrbitalElementSet {
    /// Parse one record from its data lines and optional name line
    pub fn from_lines(name: Option<&str>, line1: &str, line2: &str) -> Result<Self> {
        check_line(line1, 1)?;
        check_line(line2, 2)?;

        let catalog_number: u32 = field(line1, 2..7, "catalog_number")?;
        let catalog_line2: u32 = field(line2, 2..7, "catalog_number")?;
        if catalog_number != catalog_line2 {
            return Err(ParseError::CatalogMismatch {
                line1: catalog_number,
                line2: catalog_line2,
            });
        }

        let year_2digit: i32 = field(line1, 18..20, "epoch_year")?;
        let day_of_year: f64 = field(line1, 20..32, "epoch_day")?;
        let epoch = epoch_from_tle(year_2digit, day_of_year)?;

        let inclination_deg: f64 = field(line2, 8..16, "inclination")?;
        let raan_deg: f64 = field(line2, 17..25, "raan")?;
        let eccentricity = implied_decimal(&line2[26..33])?;
        let arg_perigee_deg: f64 = field(line2, 34..42, "arg_perigee")?;
        let mean_anomaly_deg: f64 = field(line2, 43..51, "mean_anomaly")?;
        let mean_motion_rev_day: f64 = field(line2, 52..63, "mean_motion")?;

        check_range("inclination", inclination_deg, 0.0..=180.0)?;
        check_angle("raan", raan_deg)?;
        check_angle("arg_perigee", arg_perigee_deg)?;
        check_angle("mean_anomaly", mean_anomaly_deg)?;
        if !(0.0..1.0).contains(&eccentricity) {
            return Err(ParseError::OutOfRange {
                field: "eccentricity",
                value: eccentricity,
            });
        }
        if !(mean_motion_rev_day > 0.0) {
            return Err(ParseError::OutOfRange {
                field: "mean_motion",
                value: mean_motion_rev_day,
            });
        }

        let period_minutes = MINUTES_PER_DAY / mean_motion_rev_day;
        check_range(
            "period_minutes",
            period_minutes,
            MIN_PERIOD_MINUTES..=MAX_PERIOD_MINUTES,
        )?;

        // Kepler's third law
        let n_rad_s = mean_motion_rev_day * 2.0 * PI / SECONDS_PER_DAY;
        let semi_major_axis_km = (MU_EARTH_KM3_S2 / (n_rad_s * n_rad_s)).cbrt();
        let apogee_altitude_km = semi_major_axis_km * (1.0 + eccentricity) - EARTH_RADIUS_KM;
        let perigee_altitude_km = semi_major_axis_km * (1.0 - eccentricity) - EARTH_RADIUS_KM;
        if perigee_altitude_km < 0.0 {
            return Err(ParseError::OutOfRange {
                field: "perigee_altitude_km",
                value: perigee_altitude_km,
            });
        }

        let name = name
            .map(clean_name)
            .filter(|n| !n.is_empty());
        let constellation = name
            .as_deref()
            .and_then(constellation_of)
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            name: name.unwrap_or_else(|| format!("NORAD {}", catalog_number)),
            constellation,
            catalog_number,
            epoch,
            inclination_deg,
            raan_deg,
            eccentricity,
            arg_perigee_deg,
            mean_anomaly_deg,
            mean_motion_rev_day,
            semi_major_axis_km,
            period_minutes,
            apogee_altitude_km,
            perigee_altitude_km,
            line1: with_checksum(line1),
            line2: with_checksum(line2),
        })
    }

    /// Build a set from mean elements by rendering and re-parsing TLE lines,
    /// so stored values and lines agree to TLE precision.
    pub fn from_mean_elements(elements: &MeanElements) -> Result<Self> {
        let (line1, line2) = render_tle(elements)?;
        Self::from_lines(Some(&elements.name), &line1, &line2)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase constellation key derived from the name
    pub fn constellation(&self) -> &str {
        &self.constellation
    }

    pub fn catalog_number(&self) -> u32 {
        self.catalog_number
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    pub fn inclination_deg(&self) -> f64 {
        self.inclination_deg
    }

    pub fn raan_deg(&self) -> f64 {
        self.raan_deg
    }

    pub fn eccentricity(&self) -> f64 {
        self.eccentricity
    }

    pub fn arg_perigee_deg(&self) -> f64 {
        self.arg_perigee_deg
    }

    pub fn mean_anomaly_deg(&self) -> f64 {
        self.mean_anomaly_deg
    }

    pub fn mean_motion_rev_day(&self) -> f64 {
        self.mean_motion_rev_day
    }

    pub fn semi_major_axis_km(&self) -> f64 {
        self.semi_major_axis_km
    }

    pub fn period_minutes(&self) -> f64 {
        self.period_minutes
    }

    pub fn apogee_altitude_km(&self) -> f64 {
        self.apogee_altitude_km
    }

    pub fn perigee_altitude_km(&self) -> f64 {
        self.perigee_altitude_km
    }

    /// Mean of apogee and perigee altitude
    pub fn mean_altitude_km(&self) -> f64 {
        0.5 * (self.apogee_altitude_km + self.perigee_altitude_km)
    }

    /// Data lines with valid checksums
    pub fn lines(&self) -> (&str, &str) {
        (&self.line1, &self.line2)
    }

    pub fn epoch_age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.epoch)
    }

    pub fn secular_rates(&self) -> SecularRates {
        let n = self.mean_motion_rev_day * 2.0 * PI / SECONDS_PER_DAY;
        let p = self.semi_major_axis_km * (1.0 - self.eccentricity * self.eccentricity);
        let k = n * J2 * (EARTH_RADIUS_KM / p).powi(2);
        let cos_i = self.inclination_deg.to_radians().cos();

        SecularRates {
            raan: -1.5 * k * cos_i,
            arg_perigee: 0.75 * k * (5.0 * cos_i * cos_i - 1.0),
            mean_motion: n,
        }
    }

    /// RAAN (deg) at `at`, including J2 nodal regression
    pub fn raan_at(&self, at: DateTime<Utc>) -> f64 {
        let dt = seconds_between(self.epoch, at);
        (self.raan_deg + (self.secular_rates().raan * dt).to_degrees()).rem_euclid(360.0)
    }

    /// Mean argument of latitude (deg) at `at`: the in-plane phase angle
    pub fn phase_at(&self, at: DateTime<Utc>) -> f64 {
        let dt = seconds_between(self.epoch, at);
        let rates = self.secular_rates();
        let drift = (rates.arg_perigee + rates.mean_motion) * dt;
        (self.arg_perigee_deg + self.mean_anomaly_deg + drift.to_degrees()).rem_euclid(360.0)
    }
}

/// Signed seconds from `from` to `to`, at microsecond resolution
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to.signed_duration_since(from);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// Result of parsing a block of element text
#[derive(Debug, Clone)]
pub struct ElementParse {
    pub elements: Vec<OrbitalElementSet>,
    pub stats: ParseStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseStats {
    pub records_seen: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub diagnostics: Vec<ParseDiagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseDiagnostic {
    pub line: usize,
    pub error: String,
}

impl ParseStats {
    fn record_skip(&mut self, line: usize, error: &ParseError) {
        self.skipped += 1;
        if self.diagnostics.len() < MAX_DIAGNOSTICS {
            self.diagnostics.push(ParseDiagnostic {
                line,
                error: error.to_string(),
            });
        }
    }
}

/// Parse element text (3-line or 2-line records, blank lines ignored).
///
/// Fails only when the input holds no records at all; every malformed
/// record is skipped and counted.
pub fn parse_tle(text: &str) -> Result<ElementParse> {
    let records = segment(text);
    if records.is_empty() {
        return Err(ParseError::NoRecords);
    }

    let mut stats = ParseStats {
        records_seen: records.len(),
        ..Default::default()
    };
    let mut elements = Vec::with_capacity(records.len());

    for record in &records {
        match record.parse() {
            Ok(set) => elements.push(set),
            Err(err) => {
                debug!(line = record.first_line, error = %err, "Skipping malformed element record");
                stats.record_skip(record.first_line, &err);
            }
        }
    }
    stats.parsed = elements.len();

    info!(
        "Parsed {} element sets ({} skipped of {} records)",
        stats.parsed, stats.skipped, stats.records_seen
    );

    Ok(ElementParse { elements, stats })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LineKind {
    Data1,
    Data2,
    Other,
}

impl LineKind {
    fn of(line: &str) -> Self {
        if line.starts_with("1 ") {
            LineKind::Data1
        } else if line.starts_with("2 ") {
            LineKind::Data2
        } else {
            LineKind::Other
        }
    }
}

#[derive(Debug, Default)]
struct RawRecord<'a> {
    first_line: usize,
    name: Option<&'a str>,
    line1: Option<&'a str>,
    line2: Option<&'a str>,
}

impl<'a> RawRecord<'a> {
    fn start(first_line: usize, kind: LineKind, line: &'a str) -> Self {
        let mut record = RawRecord {
            first_line,
            ..Default::default()
        };
        match kind {
            LineKind::Data1 => record.line1 = Some(line),
            LineKind::Data2 => record.line2 = Some(line),
            LineKind::Other => record.name = Some(line),
        }
        record
    }

    fn parse(&self) -> Result<OrbitalElementSet> {
        let line1 = self.line1.ok_or(ParseError::MissingLine(1))?;
        let line2 = self.line2.ok_or(ParseError::MissingLine(2))?;
        OrbitalElementSet::from_lines(self.name, line1, line2)
    }
}

/// Group lines into records. A line with a broken marker occupies the
/// data-line slot it stands in for, so one damaged record is one skip.
fn segment(text: &str) -> Vec<RawRecord<'_>> {
    let mut records = Vec::new();
    let mut current: Option<RawRecord<'_>> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let kind = LineKind::of(line);

        current = match (current.take(), kind) {
            (None, kind) => Some(RawRecord::start(line_no, kind, line)),
            (Some(mut rec), LineKind::Data1) if rec.line1.is_none() && rec.line2.is_none() => {
                rec.line1 = Some(line);
                Some(rec)
            }
            (Some(mut rec), LineKind::Data2) if rec.line2.is_none() => {
                rec.line2 = Some(line);
                Some(rec)
            }
            (Some(mut rec), LineKind::Other)
                if rec.line2.is_none() && (rec.name.is_some() || rec.line1.is_some()) =>
            {
                if rec.line1.is_none() {
                    rec.line1 = Some(line);
                } else {
                    rec.line2 = Some(line);
                }
                Some(rec)
            }
            (Some(rec), kind) => {
                records.push(rec);
                Some(RawRecord::start(line_no, kind, line))
            }
        };
    }

    records.extend(current);
    records
}

fn check_line(line: &str, which: u8) -> Result<()> {
    if !line.is_ascii() {
        return Err(ParseError::NonAscii { line: which });
    }
    let marker = if which == 1 { "1 " } else { "2 " };
    if !line.starts_with(marker) {
        return Err(ParseError::LineMarker { line: which });
    }
    if line.len() != TLE_LINE_LENGTH {
        return Err(ParseError::LineLength {
            line: which,
            len: line.len(),
        });
    }
    Ok(())
}

fn field<T: FromStr>(line: &str, columns: Range<usize>, name: &'static str) -> Result<T> {
    let raw = line[columns].trim();
    raw.parse::<T>().map_err(|_| ParseError::Field {
        field: name,
        value: raw.to_string(),
    })
}

/// Eccentricity columns carry an implied leading "0."
fn implied_decimal(raw: &str) -> Result<f64> {
    let digits = raw.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::Field {
            field: "eccentricity",
            value: raw.to_string(),
        });
    }
    format!("0.{}", digits)
        .parse::<f64>()
        .map_err(|_| ParseError::Field {
            field: "eccentricity",
            value: raw.to_string(),
        })
}

fn check_range(
    field: &'static str,
    value: f64,
    range: std::ops::RangeInclusive<f64>,
) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ParseError::OutOfRange { field, value })
    }
}

fn check_angle(field: &'static str, value: f64) -> Result<()> {
    if (0.0..360.0).contains(&value) {
        Ok(())
    } else {
        Err(ParseError::OutOfRange { field, value })
    }
}

/// NORAD two-digit year convention: 57-99 are 1900s, 00-56 are 2000s
fn full_year(year_2digit: i32) -> i32 {
    if year_2digit < 57 {
        2000 + year_2digit
    } else {
        1900 + year_2digit
    }
}

fn epoch_from_tle(year_2digit: i32, day_of_year: f64) -> Result<DateTime<Utc>> {
    if !(0..100).contains(&year_2digit) {
        return Err(ParseError::OutOfRange {
            field: "epoch_year",
            value: year_2digit as f64,
        });
    }
    check_range("epoch_day", day_of_year, 1.0..=367.0)?;

    let year = full_year(year_2digit);
    let jan1 = NaiveDate::from_yo_opt(year, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or(ParseError::OutOfRange {
            field: "epoch_year",
            value: year as f64,
        })?;
    let offset = Duration::microseconds(((day_of_year - 1.0) * SECONDS_PER_DAY * 1e6).round() as i64);

    Ok(DateTime::<Utc>::from_naive_utc_and_offset(jan1, Utc) + offset)
}

fn clean_name(raw: &str) -> String {
    // 3LE name lines carry a leading "0 "
    raw.strip_prefix("0 ").unwrap_or(raw).trim().to_string()
}

fn constellation_of(name: &str) -> Option<String> {
    name.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .find(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

/// Modulo-10 checksum over the first 68 columns (minus signs count as 1)
pub fn checksum(line: &str) -> u32 {
    line.bytes()
        .take(TLE_LINE_LENGTH - 1)
        .map(|b| match b {
            b'0'..=b'9' => u32::from(b - b'0'),
            b'-' => 1,
            _ => 0,
        })
        .sum::<u32>()
        % 10
}

fn with_checksum(line: &str) -> String {
    format!("{}{}", &line[..TLE_LINE_LENGTH - 1], checksum(line))
}

/// Round to TLE angle precision, keeping the result in [0, 360)
fn tle_angle(deg: f64) -> f64 {
    let rounded = (deg.rem_euclid(360.0) * 1e4).round() / 1e4;
    if rounded >= 360.0 {
        0.0
    } else {
        rounded
    }
}

/// Render mean elements as a pair of 69-column data lines
pub fn render_tle(elements: &MeanElements) -> Result<(String, String)> {
    if elements.catalog_number > 99_999 {
        return Err(ParseError::OutOfRange {
            field: "catalog_number",
            value: elements.catalog_number as f64,
        });
    }
    check_range("inclination", elements.inclination_deg, 0.0..=180.0)?;
    if !(0.0..1.0).contains(&elements.eccentricity) {
        return Err(ParseError::OutOfRange {
            field: "eccentricity",
            value: elements.eccentricity,
        });
    }
    check_range("mean_motion", elements.mean_motion_rev_day, 1.0..=48.0)?;

    let epoch = elements.epoch;
    let year = epoch.year();
    if !(1957..=2056).contains(&year) {
        return Err(ParseError::OutOfRange {
            field: "epoch_year",
            value: year as f64,
        });
    }
    let seconds_of_day = f64::from(epoch.num_seconds_from_midnight())
        + f64::from(epoch.nanosecond()) / 1e9;
    let day_of_year = f64::from(epoch.ordinal()) + seconds_of_day / SECONDS_PER_DAY;

    let body1 = format!(
        "1 {:05}U {:<8} {:02}{:012.8} {} {} {} 0 {:>4}",
        elements.catalog_number,
        "00000A",
        year % 100,
        day_of_year,
        " .00000000",
        " 00000-0",
        " 00000-0",
        999
    );

    let ecc_digits = ((elements.eccentricity * 1e7).round() as u64).min(9_999_999);
    let body2 = format!(
        "2 {:05} {:8.4} {:8.4} {:07} {:8.4} {:8.4} {:11.8}{:05}",
        elements.catalog_number,
        elements.inclination_deg,
        tle_angle(elements.raan_deg),
        ecc_digits,
        tle_angle(elements.arg_perigee_deg),
        tle_angle(elements.mean_anomaly_deg),
        elements.mean_motion_rev_day,
        0
    );

    Ok((
        format!("{}{}", body1, checksum(&body1)),
        format!("{}{}", body2, checksum(&body2)),
    ))
}
