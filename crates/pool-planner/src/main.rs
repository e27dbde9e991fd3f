//! Dynamic Pool Planner CLI
//!
//! Ingests TLE files, runs one planning pass and writes the result as JSON.
//!
//! Usage:
//!   plan-pool --tle data/starlink.tle --tle data/oneweb.tle \
//!             --config planner.json --previous last_run.json \
//!             --profile dense --output pools.json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use pool_planner::{CancellationToken, DynamicPool, ElementCache, Pipeline, PlannerConfig, SamplingProfile};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "plan-pool", about = "Select dynamic LEO satellite pools for a ground observer")]
struct Args {
    /// TLE file (repeatable)
    #[arg(short, long = "tle", required = true)]
    tle: Vec<PathBuf>,

    /// Planner configuration JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Previous pools: a prior run's output or a constellation -> pool map
    #[arg(short, long)]
    previous: Option<PathBuf>,

    /// Sampling profile, overriding the configured window
    #[arg(long, value_enum)]
    profile: Option<SamplingProfile>,

    /// Reference epoch (RFC 3339); defaults to now
    #[arg(long)]
    epoch: Option<DateTime<Utc>>,

    /// Output JSON file; stdout when absent
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn load_previous(path: &Path) -> Result<BTreeMap<String, DynamicPool>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut value: serde_json::Value = serde_json::from_str(&text)?;
    if let Some(pools) = value.get_mut("pools") {
        value = pools.take();
    }
    Ok(serde_json::from_value(value)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => PlannerConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => PlannerConfig::default(),
    };
    if let Some(profile) = args.profile {
        config = config.with_profile(profile);
    }
    let pipeline = Pipeline::new(config)?;

    let fetched_at = Utc::now();
    let reference_epoch = args.epoch.unwrap_or(fetched_at);
    let mut cache = ElementCache::from_config(&pipeline.config().cache);
    for path in &args.tle {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let report = pipeline.ingest(&mut cache, &text, fetched_at)?;
        info!(
            "{}: {} parsed, {} skipped",
            path.display(),
            report.parse.parsed,
            report.parse.skipped
        );
    }

    let previous = match &args.previous {
        Some(path) => load_previous(path)?,
        None => BTreeMap::new(),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current batches");
            on_signal.cancel();
        }
    });

    let output = pipeline.run(&cache, reference_epoch, &previous, &cancel).await?;

    match &args.output {
        Some(path) => {
            info!("Writing output to {:?}", path);
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &output)?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &output)?;
            writeln!(writer)?;
        }
    }

    info!("{}", "=".repeat(60));
    info!("Run {}", output.run_id);
    for (name, pool) in &output.pools {
        info!(
            "  {}: v{} {}/{} members, diversity {:.3}, coverage ratio {:.3}{}",
            name,
            pool.version,
            pool.len(),
            pool.target_count,
            pool.metrics.diversity_score,
            pool.metrics.coverage_ratio,
            if pool.degraded { " (degraded)" } else { "" }
        );
    }
    info!(
        "  validation quality {:.3}{}",
        output.validation.quality_score,
        if output.validation.validation_failed { " (FAILED)" } else { "" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "plan-pool", "--tle", "a.tle", "--tle", "b.tle", "--profile", "dense", "-v",
        ])
        .unwrap();
        assert_eq!(args.tle.len(), 2);
        assert_eq!(args.profile, Some(SamplingProfile::Dense));
        assert!(args.verbose);
        assert!(Args::try_parse_from(["plan-pool"]).is_err());
    }

    #[test]
    fn test_load_previous_accepts_empty_map_and_run_output() {
        let mut bare = NamedTempFile::new().unwrap();
        write!(bare, "{{}}").unwrap();
        assert!(load_previous(bare.path()).unwrap().is_empty());

        let mut wrapped = NamedTempFile::new().unwrap();
        write!(wrapped, r#"{{"run_id": "x", "pools": {{}}}}"#).unwrap();
        assert!(load_previous(wrapped.path()).unwrap().is_empty());
    }
}
