use anyhow::{Context, Result};
use nalgebra::DMatrix;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::correlation::{CorrelationPolicy, matrix_from_rows};
use crate::error::SimulationError;

static RAYON_INIT: OnceLock<()> = OnceLock::new();

// ──────────────────────────────────────────────────────────────────────────────
// Defaults & Tolerances
// ──────────────────────────────────────────────────────────────────────────────

/// VaR / expected shortfall confidence level (e.g., 0.95 = worst 5% of outcomes).
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Seed used when the configuration does not name one.
pub const DEFAULT_SEED: u64 = 42;

/// Annual trading days; one simulation step per day in the presets.
pub const TRADING_DAYS: usize = 252;

/// Default number of simulated scenarios.
pub const DEFAULT_SCENARIOS: usize = 10_000;

/// Scenarios per parallel work unit. Fixed so results do not depend on thread count.
pub const PARALLEL_CHUNK_SIZE: usize = 2_048;

/// Percentiles reported for fan charts and terminal statistics.
pub const REPORT_PERCENTILES: &[f64] = &[0.05, 0.25, 0.50, 0.75, 0.95];

/// Allowed deviation of the weight sum from one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Allowed asymmetry / diagonal deviation in a correlation matrix.
pub const CORRELATION_TOLERANCE: f64 = 1e-10;

/// Cholesky pivots within this fraction of the largest variance count as zero.
pub const PSD_PIVOT_TOLERANCE: f64 = 1e-12;

pub const NEAREST_CORRELATION_MAX_ITERATIONS: usize = 200;
pub const NEAREST_CORRELATION_TOLERANCE: f64 = 1e-10;
/// Eigenvalue floor of a repaired correlation matrix, keeps it strictly positive definite.
pub const NEAREST_CORRELATION_MIN_EIGENVALUE: f64 = 1e-10;

pub const ENV_SEED: &str = "PORTFOLIO_MC_SEED";
pub const ENV_SCENARIOS: &str = "PORTFOLIO_MC_SCENARIOS";
pub const ENV_STEPS: &str = "PORTFOLIO_MC_STEPS";

fn default_confidence_level() -> f64 {
    DEFAULT_CONFIDENCE_LEVEL
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

// ──────────────────────────────────────────────────────────────────────────────
// Simulation Configuration
// ──────────────────────────────────────────────────────────────────────────────

/// Everything a simulation run needs. All vectors are indexed by asset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Portfolio value at time zero.
    pub initial_value: f64,
    pub initial_prices: Vec<f64>,
    /// Annualized drift per asset.
    pub drifts: Vec<f64>,
    /// Annualized volatility per asset.
    pub volatilities: Vec<f64>,
    /// Row-major asset correlation matrix.
    pub correlation: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
    /// Horizon in years.
    pub horizon_years: f64,
    pub num_steps: usize,
    pub num_scenarios: usize,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub correlation_policy: CorrelationPolicy,
}

impl SimulationConfig {
    pub fn n_assets(&self) -> usize {
        self.initial_prices.len()
    }

    /// Step size in years.
    pub fn dt(&self) -> f64 {
        self.horizon_years / self.num_steps as f64
    }

    /// `Σ wᵢ S0ᵢ`, the weighted price sum that maps onto `initial_value`.
    pub fn weighted_initial_price(&self) -> f64 {
        self.weights
            .iter()
            .zip(&self.initial_prices)
            .map(|(w, s)| w * s)
            .sum()
    }

    pub fn correlation_matrix(&self) -> crate::error::Result<DMatrix<f64>> {
        matrix_from_rows(&self.correlation)
    }

    /// Eager checks run before any simulation work. Positive semi-definiteness is
    /// checked later by the Cholesky factorization.
    pub fn validate(&self) -> crate::error::Result<()> {
        let n = self.n_assets();
        if n == 0 {
            return Err(SimulationError::invalid(
                "initial_prices",
                "at least one asset is required",
            ));
        }
        for (field, len) in [
            ("drifts", self.drifts.len()),
            ("volatilities", self.volatilities.len()),
            ("weights", self.weights.len()),
            ("correlation", self.correlation.len()),
        ] {
            if len != n {
                return Err(SimulationError::DimensionMismatch {
                    field,
                    expected: n,
                    actual: len,
                });
            }
        }
        matrix_from_rows(&self.correlation)?;

        if !(self.initial_value.is_finite() && self.initial_value > 0.0) {
            return Err(SimulationError::invalid(
                "initial_value",
                format!("must be finite and positive, got {}", self.initial_value),
            ));
        }
        let bad_price =
            self.initial_prices.iter().enumerate().find(|(_, s)| !(s.is_finite() && **s > 0.0));
        if let Some((i, s)) = bad_price {
            return Err(SimulationError::invalid(
                "initial_prices",
                format!("asset {i} has price {s}, expected a finite positive value"),
            ));
        }
        if let Some((i, mu)) = self.drifts.iter().enumerate().find(|(_, mu)| !mu.is_finite()) {
            return Err(SimulationError::invalid("drifts", format!("asset {i} has drift {mu}")));
        }
        let bad_sigma =
            self.volatilities.iter().enumerate().find(|(_, s)| !(s.is_finite() && **s >= 0.0));
        if let Some((i, s)) = bad_sigma {
            return Err(SimulationError::invalid(
                "volatilities",
                format!("asset {i} has volatility {s}, expected a finite non-negative value"),
            ));
        }
        if self.weights.iter().any(|w| !w.is_finite()) {
            return Err(SimulationError::invalid("weights", "all weights must be finite"));
        }
        let weight_sum: f64 = self.weights.iter().sum();
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(SimulationError::WeightsNotNormalized(weight_sum));
        }
        if self.weighted_initial_price() <= 0.0 {
            return Err(SimulationError::invalid(
                "weights",
                "weighted initial price must be positive to scale the portfolio value",
            ));
        }
        if !(self.horizon_years.is_finite() && self.horizon_years > 0.0) {
            return Err(SimulationError::invalid(
                "horizon_years",
                format!("must be finite and positive, got {}", self.horizon_years),
            ));
        }
        if self.num_steps == 0 {
            return Err(SimulationError::invalid("num_steps", "must be positive"));
        }
        if self.num_scenarios == 0 {
            return Err(SimulationError::invalid("num_scenarios", "must be positive"));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(SimulationError::invalid(
                "confidence_level",
                format!("must lie strictly between 0 and 1, got {}", self.confidence_level),
            ));
        }
        Ok(())
    }

    /// Single asset with a one-year daily grid.
    pub fn single_asset() -> Self {
        Self {
            initial_value: 100.0,
            initial_prices: vec![100.0],
            drifts: vec![0.1],
            volatilities: vec![0.1123],
            correlation: vec![vec![1.0]],
            weights: vec![1.0],
            horizon_years: 1.0,
            num_steps: TRADING_DAYS,
            num_scenarios: DEFAULT_SCENARIOS,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            seed: DEFAULT_SEED,
            correlation_policy: CorrelationPolicy::Strict,
        }
    }

    /// Three equicorrelated assets (ρ = 0.5) in a 40/30/30 portfolio worth 100,000.
    pub fn three_asset() -> Self {
        Self {
            initial_value: 100_000.0,
            initial_prices: vec![100.0, 50.0, 200.0],
            drifts: vec![0.08, 0.06, 0.10],
            volatilities: vec![0.20, 0.15, 0.25],
            correlation: vec![
                vec![1.0, 0.5, 0.5],
                vec![0.5, 1.0, 0.5],
                vec![0.5, 0.5, 1.0],
            ],
            weights: vec![0.4, 0.3, 0.3],
            horizon_years: 1.0,
            num_steps: TRADING_DAYS,
            num_scenarios: DEFAULT_SCENARIOS,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            seed: DEFAULT_SEED,
            correlation_policy: CorrelationPolicy::Strict,
        }
    }

    /// Applies `PORTFOLIO_MC_*` overrides from the process environment (and `.env`).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv();
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SEED) {
            self.seed = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_SEED}={raw} is not a valid u64"))?;
            info!("Seed overridden from {}: {}", ENV_SEED, self.seed);
        }
        if let Some(raw) = lookup(ENV_SCENARIOS) {
            self.num_scenarios = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_SCENARIOS}={raw} is not a valid scenario count"))?;
            info!("Scenario count overridden from {}: {}", ENV_SCENARIOS, self.num_scenarios);
        }
        if let Some(raw) = lookup(ENV_STEPS) {
            self.num_steps = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_STEPS}={raw} is not a valid step count"))?;
            info!("Step count overridden from {}: {}", ENV_STEPS, self.num_steps);
        }
        Ok(())
    }
}

/// Reads a JSON configuration file.
pub fn load_config(path: &Path) -> Result<SimulationConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SimulationConfig = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!(
        "Loaded config from {} ({} assets, {} scenarios, {} steps)",
        path.display(),
        config.n_assets(),
        config.num_scenarios,
        config.num_steps
    );
    Ok(config)
}

// ──────────────────────────────────────────────────────────────────────────────
// Thread Pool
// ──────────────────────────────────────────────────────────────────────────────

/// Builds the global rayon pool once. `None` uses every logical core.
pub fn init_cpu_parallelism(threads: Option<usize>) {
    RAYON_INIT.get_or_init(|| {
        let num_threads = threads.unwrap_or_else(num_cpus::get).max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!("Initialized Rayon thread pool with {} threads", num_threads),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). \
                 Using existing configuration.",
                e
            ),
        }
    });
}
