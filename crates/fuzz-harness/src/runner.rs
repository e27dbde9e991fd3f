//! Seeded fuzz runner
//!
//! Drives a case closure over a fixed number of cases and collects a
//! serializable result, or hands its settings to proptest.

use proptest::strategy::{Strategy, ValueTree};
use proptest::test_runner::{Config, RngAlgorithm, TestRng, TestRunner};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Fuzz run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzConfig {
    /// Number of cases to run
    pub cases: u32,
    /// Maximum shrink iterations on failure
    pub max_shrink_iters: u32,
    /// Per-case timeout (ms), 0 disables
    pub timeout_ms: u64,
    /// RNG seed (0 = proptest default source)
    pub seed: u64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            cases: 1_000,
            max_shrink_iters: 1_000,
            timeout_ms: 5_000,
            seed: 0,
        }
    }
}

impl FuzzConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cases(mut self, n: u32) -> Self {
        self.cases = n;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Proptest config carrying these settings
    pub fn to_proptest_config(&self) -> Config {
        Config {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            timeout: self.timeout_ms.min(u64::from(u32::MAX)) as u32,
            rng_algorithm: RngAlgorithm::ChaCha,
            ..Config::default()
        }
    }

    /// Test runner; seeded runs are reproducible
    pub fn proptest_runner(&self) -> TestRunner {
        let config = self.to_proptest_config();
        if self.seed == 0 {
            return TestRunner::new(config);
        }
        let mut seed = [0u8; 32];
        for chunk in seed.chunks_mut(8) {
            chunk.copy_from_slice(&self.seed.to_le_bytes());
        }
        TestRunner::new_with_rng(config, TestRng::from_seed(RngAlgorithm::ChaCha, &seed))
    }
}

/// Result of one named fuzz run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzResult {
    pub name: String,
    pub cases_run: u64,
    pub cases_passed: u64,
    pub cases_failed: u64,
    /// Cases that finished but exceeded the per-case timeout
    pub cases_slow: u64,
    pub duration_ms: u64,
    /// Cases per second
    pub throughput: f64,
    pub failures: Vec<FuzzFailure>,
    pub passed: bool,
}

impl FuzzResult {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cases_run: 0,
            cases_passed: 0,
            cases_failed: 0,
            cases_slow: 0,
            duration_ms: 0,
            throughput: 0.0,
            failures: Vec::new(),
            passed: true,
        }
    }

    pub fn record_pass(&mut self) {
        self.cases_run += 1;
        self.cases_passed += 1;
    }

    pub fn record_fail(&mut self, failure: FuzzFailure) {
        self.cases_run += 1;
        self.cases_failed += 1;
        self.passed = false;
        self.failures.push(failure);
    }

    pub fn finalize(&mut self, duration: Duration) {
        self.duration_ms = duration.as_millis() as u64;
        let secs = duration.as_secs_f64();
        if secs > 0.0 {
            self.throughput = self.cases_run as f64 / secs;
        }
    }

    pub fn log_summary(&self) {
        info!(
            "{}: {} cases, {} passed, {} failed, {} slow in {} ms ({:.0} cases/s)",
            self.name,
            self.cases_run,
            self.cases_passed,
            self.cases_failed,
            self.cases_slow,
            self.duration_ms,
            self.throughput
        );
        for failure in self.failures.iter().take(5) {
            warn!("  case {}: {}", failure.case, failure.message);
        }
        if self.failures.len() > 5 {
            warn!("  ... and {} more", self.failures.len() - 5);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzFailure {
    pub case: u64,
    pub message: String,
}

pub struct FuzzRunner {
    config: FuzzConfig,
    results: Vec<FuzzResult>,
}

impl FuzzRunner {
    pub fn new(config: FuzzConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(FuzzConfig::default())
    }

    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    /// Run `test_fn` for every case index
    pub fn run<F>(&mut self, name: &str, mut test_fn: F) -> &FuzzResult
    where
        F: FnMut(u64) -> Result<(), String>,
    {
        let mut result = FuzzResult::new(name);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let start = Instant::now();

        for case in 0..u64::from(self.config.cases) {
            let case_start = Instant::now();
            match test_fn(case) {
                Ok(()) => result.record_pass(),
                Err(message) => result.record_fail(FuzzFailure { case, message }),
            }
            if self.config.timeout_ms > 0 && case_start.elapsed() > timeout {
                result.cases_slow += 1;
            }
        }

        result.finalize(start.elapsed());
        result.log_summary();
        self.results.push(result);
        &self.results[self.results.len() - 1]
    }

    /// Run `check` on one value drawn from `strategy` per case. Draws come
    /// from the configured seed, so a seeded run replays the same inputs.
    pub fn run_strategy<S, F>(&mut self, name: &str, strategy: S, check: F) -> &FuzzResult
    where
        S: Strategy,
        F: Fn(&S::Value) -> Result<(), String>,
    {
        let mut source = self.config.proptest_runner();
        self.run(name, |_| {
            let value = strategy
                .new_tree(&mut source)
                .map_err(|reason| format!("no input generated: {reason}"))?
                .current();
            check(&value)
        })
    }

    pub fn results(&self) -> &[FuzzResult] {
        &self.results
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.results)
    }
}
