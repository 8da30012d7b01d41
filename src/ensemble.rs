use nalgebra::{DMatrix, DVector};

/// Simulated prices indexed by (scenario, time step, asset).
///
/// Stored as one `(scenarios × assets)` matrix per time step; step 0 holds the
/// initial prices. Built by appending steps in time order and read-only afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePathEnsemble {
    steps: Vec<DMatrix<f64>>,
}

impl PricePathEnsemble {
    pub(crate) fn with_initial(initial: DMatrix<f64>, n_steps: usize) -> Self {
        let mut steps = Vec::with_capacity(n_steps + 1);
        steps.push(initial);
        Self { steps }
    }

    pub(crate) fn push_step(&mut self, prices: DMatrix<f64>) {
        debug_assert_eq!(prices.shape(), self.steps[0].shape());
        self.steps.push(prices);
    }

    /// Stacks ensembles over disjoint scenario sets, in order.
    pub(crate) fn concat(parts: &[PricePathEnsemble]) -> Self {
        let Some(first) = parts.first() else {
            return Self { steps: Vec::new() };
        };
        let n_times = first.n_times();
        let n_assets = first.n_assets();
        let total: usize = parts.iter().map(|p| p.n_scenarios()).sum();

        let steps = (0..n_times)
            .map(|t| {
                let mut out = DMatrix::<f64>::zeros(total, n_assets);
                let mut offset = 0;
                for part in parts {
                    let block = &part.steps[t];
                    out.rows_mut(offset, block.nrows()).copy_from(block);
                    offset += block.nrows();
                }
                out
            })
            .collect();
        Self { steps }
    }

    pub fn n_scenarios(&self) -> usize {
        self.steps.first().map_or(0, |m| m.nrows())
    }

    /// Number of time points, `num_steps + 1`.
    pub fn n_times(&self) -> usize {
        self.steps.len()
    }

    pub fn n_assets(&self) -> usize {
        self.steps.first().map_or(0, |m| m.ncols())
    }

    pub fn price(&self, scenario: usize, time: usize, asset: usize) -> f64 {
        self.steps[time][(scenario, asset)]
    }

    /// Prices of every scenario and asset at one time step.
    pub fn at_step(&self, time: usize) -> &DMatrix<f64> {
        &self.steps[time]
    }

    pub fn terminal(&self) -> &DMatrix<f64> {
        &self.steps[self.steps.len() - 1]
    }

    /// One asset's path within one scenario.
    pub fn asset_path(&self, scenario: usize, asset: usize) -> Vec<f64> {
        self.steps.iter().map(|m| m[(scenario, asset)]).collect()
    }

    /// `ln(S_T / S_0)` per scenario and asset.
    pub fn terminal_log_returns(&self) -> DMatrix<f64> {
        let initial = &self.steps[0];
        self.terminal().zip_map(initial, |st, s0| (st / s0).ln())
    }

    /// Mean terminal price per asset.
    pub fn terminal_means(&self) -> Vec<f64> {
        self.terminal().column_iter().map(|c| c.mean()).collect()
    }

    /// Weighted, scaled portfolio value at every (scenario, time step).
    pub fn portfolio_values(
        &self,
        weights: &DVector<f64>,
        scale: f64,
    ) -> PortfolioValuePathEnsemble {
        let columns: Vec<DVector<f64>> = self.steps.iter().map(|m| (m * weights) * scale).collect();
        PortfolioValuePathEnsemble {
            values: DMatrix::from_columns(&columns),
        }
    }
}

/// Portfolio value per (scenario, time step): one row per scenario, one column per time.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioValuePathEnsemble {
    values: DMatrix<f64>,
}

impl PortfolioValuePathEnsemble {
    pub fn n_scenarios(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_times(&self) -> usize {
        self.values.ncols()
    }

    pub fn value(&self, scenario: usize, time: usize) -> f64 {
        self.values[(scenario, time)]
    }

    /// Full value path of one scenario.
    pub fn path(&self, scenario: usize) -> Vec<f64> {
        self.values.row(scenario).iter().copied().collect()
    }

    /// Values of all scenarios at one time step.
    pub fn at_step(&self, time: usize) -> Vec<f64> {
        self.values.column(time).iter().copied().collect()
    }

    pub fn terminal_values(&self) -> Vec<f64> {
        self.at_step(self.n_times() - 1)
    }

    /// Underlying `(scenarios × times)` matrix.
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.values
    }
}
