use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{PARALLEL_CHUNK_SIZE, SimulationConfig};
use crate::correlation::CovarianceStructure;
use crate::ensemble::{PortfolioValuePathEnsemble, PricePathEnsemble};
use crate::error::Result;
use crate::gbm::GbmStep;
use crate::risk::RiskSummary;
use crate::rng::{NormalStream, ShockSource};

/// Everything produced by one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationOutcome {
    pub prices: PricePathEnsemble,
    pub portfolio: PortfolioValuePathEnsemble,
    pub risk: RiskSummary,
}

/// Correlated multi-asset GBM simulator for a fixed, validated configuration.
///
/// The Cholesky factor is computed once in [`PortfolioSimulator::new`] and shared
/// by every run.
#[derive(Clone, Debug)]
pub struct PortfolioSimulator {
    config: SimulationConfig,
    covariance: CovarianceStructure,
    steps: Vec<GbmStep>,
    weights: DVector<f64>,
    value_scale: f64,
}

impl PortfolioSimulator {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let rho = config.correlation_matrix()?;
        let covariance =
            CovarianceStructure::new(&config.volatilities, &rho, config.correlation_policy)?;

        let dt = config.dt();
        let steps = config
            .drifts
            .iter()
            .zip(&config.volatilities)
            .map(|(&mu, &sigma)| GbmStep::new(mu, sigma, dt))
            .collect::<Result<Vec<_>>>()?;
        let weights = DVector::from_column_slice(&config.weights);
        let value_scale = config.initial_value / config.weighted_initial_price();

        Ok(Self {
            config,
            covariance,
            steps,
            weights,
            value_scale,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn covariance(&self) -> &CovarianceStructure {
        &self.covariance
    }

    /// Simulates `n_scenarios` price paths, advancing all scenarios one step at a time.
    ///
    /// Each step draws a `(scenarios × assets)` block of independent normals, couples
    /// it through the Cholesky factor and applies the GBM update to every entry.
    pub fn simulate_prices<S: ShockSource + ?Sized>(
        &self,
        n_scenarios: usize,
        source: &mut S,
    ) -> PricePathEnsemble {
        let n_assets = self.config.n_assets();
        let n_steps = self.config.num_steps;
        let s0 = &self.config.initial_prices;

        let mut current = DMatrix::from_fn(n_scenarios, n_assets, |_, a| s0[a]);
        let mut ensemble = PricePathEnsemble::with_initial(current.clone(), n_steps);
        let mut draws = vec![0.0; n_scenarios * n_assets];

        for _ in 0..n_steps {
            source.fill_standard_normal(&mut draws);
            let z = DMatrix::from_row_slice(n_scenarios, n_assets, &draws);
            let shocks = self.covariance.correlate(&z);

            for ((mut prices, shock), step) in current
                .column_iter_mut()
                .zip(shocks.column_iter())
                .zip(&self.steps)
            {
                for (price, &dw) in prices.iter_mut().zip(shock.iter()) {
                    *price = step.advance_scaled(*price, dw);
                }
            }
            ensemble.push_step(current.clone());
        }

        ensemble
    }

    /// `V(t) = V0 · Σ wᵢ Sᵢ(t) / Σ wᵢ S0ᵢ` for every scenario and time step.
    pub fn portfolio_values(&self, prices: &PricePathEnsemble) -> PortfolioValuePathEnsemble {
        prices.portfolio_values(&self.weights, self.value_scale)
    }

    fn summarize(&self, prices: PricePathEnsemble) -> SimulationOutcome {
        let portfolio = self.portfolio_values(&prices);
        let risk = RiskSummary::from_terminal_values(
            &portfolio.terminal_values(),
            self.config.initial_value,
            self.config.confidence_level,
        );
        info!(
            "VaR({:.0}%) = {:.2} ({:.2}%), ES = {:.2}, P(loss) = {:.4}",
            risk.confidence_level * 100.0,
            risk.value_at_risk,
            risk.value_at_risk_pct() * 100.0,
            risk.expected_shortfall,
            risk.probability_of_loss
        );
        SimulationOutcome {
            prices,
            portfolio,
            risk,
        }
    }

    /// Runs the configured number of scenarios as a single batch drawn from `source`.
    pub fn run_with<S: ShockSource + ?Sized>(&self, source: &mut S) -> SimulationOutcome {
        info!(
            "Simulating {} scenarios x {} steps x {} assets",
            self.config.num_scenarios,
            self.config.num_steps,
            self.config.n_assets()
        );
        let prices = self.simulate_prices(self.config.num_scenarios, source);
        self.summarize(prices)
    }

    fn chunk_sizes(&self) -> Vec<usize> {
        let total = self.config.num_scenarios;
        (0..total.div_ceil(PARALLEL_CHUNK_SIZE))
            .map(|i| PARALLEL_CHUNK_SIZE.min(total - i * PARALLEL_CHUNK_SIZE))
            .collect()
    }

    fn simulate_chunk(&self, index: usize, size: usize) -> PricePathEnsemble {
        debug!("Simulating chunk {} ({} scenarios)", index, size);
        let mut source = NormalStream::for_chunk(self.config.seed, index as u64);
        self.simulate_prices(size, &mut source)
    }

    /// Seeded run on the current thread.
    ///
    /// Scenarios are split into fixed-size chunks with one random stream each, so
    /// the output is identical to [`PortfolioSimulator::run_parallel`].
    pub fn run(&self) -> SimulationOutcome {
        let chunks = self.chunk_sizes();
        info!(
            "Simulating {} scenarios x {} steps x {} assets in {} chunks (seed {})",
            self.config.num_scenarios,
            self.config.num_steps,
            self.config.n_assets(),
            chunks.len(),
            self.config.seed
        );
        let parts: Vec<PricePathEnsemble> = chunks
            .iter()
            .enumerate()
            .map(|(i, &size)| self.simulate_chunk(i, size))
            .collect();
        self.summarize(PricePathEnsemble::concat(&parts))
    }

    /// Seeded run with chunks spread over the rayon thread pool.
    pub fn run_parallel(&self) -> SimulationOutcome {
        let chunks = self.chunk_sizes();
        info!(
            "Simulating {} scenarios x {} steps x {} assets in {} chunks on {} threads (seed {})",
            self.config.num_scenarios,
            self.config.num_steps,
            self.config.n_assets(),
            chunks.len(),
            rayon::current_num_threads(),
            self.config.seed
        );
        let parts: Vec<PricePathEnsemble> = chunks
            .par_iter()
            .enumerate()
            .map(|(i, &size)| self.simulate_chunk(i, size))
            .collect();
        self.summarize(PricePathEnsemble::concat(&parts))
    }
}

/// Validates `config`, factors its covariance and runs it with the configured seed.
pub fn simulate(config: &SimulationConfig) -> Result<SimulationOutcome> {
    Ok(PortfolioSimulator::new(config.clone())?.run())
}
