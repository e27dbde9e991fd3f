//! Named fuzz targets for the element parser

use crate::generators::{malformed_record, tle_catalog, tle_record};
use crate::runner::{FuzzConfig, FuzzResult, FuzzRunner};
use orbital_mechanics::parse_tle;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Parse `text`, turning a panic into a failure message
fn parse_counts(text: &str) -> Result<Option<(usize, usize, usize)>, String> {
    let parsed = catch_unwind(AssertUnwindSafe(|| parse_tle(text)))
        .map_err(|_| format!("parser panicked on {:?}", text))?;
    Ok(parsed
        .ok()
        .map(|p| (p.stats.parsed, p.stats.skipped, p.stats.records_seen)))
}

/// Every rendered record parses back as exactly one element set
pub fn rendered_records_parse(runner: &mut FuzzRunner) -> &FuzzResult {
    runner.run_strategy("rendered_records_parse", tle_record(), |record| {
        match parse_counts(record)? {
            Some((1, 0, 1)) => Ok(()),
            Some((parsed, skipped, seen)) => Err(format!(
                "{parsed} parsed, {skipped} skipped of {seen} records"
            )),
            None => Err("rendered record rejected".to_string()),
        }
    })
}

/// Damaged records never panic and every record is either kept or skipped
pub fn malformed_records_are_accounted(runner: &mut FuzzRunner) -> &FuzzResult {
    runner.run_strategy("malformed_records_are_accounted", malformed_record(), |record| {
        match parse_counts(record)? {
            Some((parsed, skipped, seen)) if parsed + skipped != seen => Err(format!(
                "{parsed} parsed + {skipped} skipped != {seen} seen"
            )),
            _ => Ok(()),
        }
    })
}

/// A catalog of well-formed records loses nothing
pub fn catalogs_parse_completely(runner: &mut FuzzRunner) -> &FuzzResult {
    runner.run_strategy("catalogs_parse_completely", tle_catalog(1..20), |catalog| {
        let records = catalog.lines().count() / 3;
        match parse_counts(catalog)? {
            Some((parsed, 0, seen)) if parsed == records && seen == records => Ok(()),
            other => Err(format!("{records} records, got {other:?}")),
        }
    })
}

/// Run every parser target with `config`
pub fn run_parser_targets(config: FuzzConfig) -> FuzzRunner {
    let mut runner = FuzzRunner::new(config);
    rendered_records_parse(&mut runner);
    malformed_records_are_accounted(&mut runner);
    catalogs_parse_completely(&mut runner);
    runner
}
