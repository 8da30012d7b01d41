use serde::Serialize;

use crate::config::REPORT_PERCENTILES;
use crate::ensemble::PortfolioValuePathEnsemble;

// ──────────────────────────────────────────────────────────────────────────────
// Empirical Quantiles
// ──────────────────────────────────────────────────────────────────────────────

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Empirical `p`-quantile of already sorted data, interpolating linearly between
/// order statistics (position `p * (n - 1)`).
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub fn quantile(values: &[f64], p: f64) -> f64 {
    quantile_sorted(&sorted_copy(values), p)
}

// ──────────────────────────────────────────────────────────────────────────────
// Tail Risk Metrics
// ──────────────────────────────────────────────────────────────────────────────

/// Loss not exceeded with probability `confidence`, as a positive magnitude
/// relative to `initial_value`. Negative when even the tail scenario gains.
pub fn value_at_risk(terminal: &[f64], initial_value: f64, confidence: f64) -> f64 {
    initial_value - quantile(terminal, 1.0 - confidence)
}

/// Mean loss across the scenarios at or beyond the VaR quantile.
pub fn expected_shortfall(terminal: &[f64], initial_value: f64, confidence: f64) -> f64 {
    if terminal.is_empty() {
        return f64::NAN;
    }
    let sorted = sorted_copy(terminal);
    let cutoff = quantile_sorted(&sorted, 1.0 - confidence);
    // The smallest value never exceeds the interpolated cutoff, so the tail is non-empty.
    let tail_len = sorted.partition_point(|&v| v <= cutoff);
    let tail_mean = sorted[..tail_len].iter().sum::<f64>() / tail_len as f64;
    initial_value - tail_mean
}

/// Fraction of scenarios ending strictly below `initial_value`.
pub fn probability_of_loss(terminal: &[f64], initial_value: f64) -> f64 {
    if terminal.is_empty() {
        return f64::NAN;
    }
    terminal.iter().filter(|&&v| v < initial_value).count() as f64 / terminal.len() as f64
}

// ──────────────────────────────────────────────────────────────────────────────
// Summaries
// ──────────────────────────────────────────────────────────────────────────────

/// Shape of the terminal portfolio value distribution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TerminalStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// `(p, value)` pairs for `REPORT_PERCENTILES`.
    pub percentiles: Vec<(f64, f64)>,
}

impl TerminalStatistics {
    pub fn from_values(values: &[f64]) -> Self {
        let sorted = sorted_copy(values);
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let std_dev = if sorted.len() > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Self {
            mean,
            std_dev,
            min: sorted.first().copied().unwrap_or(f64::NAN),
            max: sorted.last().copied().unwrap_or(f64::NAN),
            percentiles: REPORT_PERCENTILES
                .iter()
                .map(|&p| (p, quantile_sorted(&sorted, p)))
                .collect(),
        }
    }
}

/// Tail risk of the terminal portfolio value distribution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskSummary {
    pub initial_value: f64,
    pub confidence_level: f64,
    /// `initial_value` minus the `1 - confidence_level` quantile of terminal value.
    ///
    /// Positive for a loss. Kept signed, so it is negative when even the tail
    /// scenario ends above `initial_value`.
    pub value_at_risk: f64,
    /// Mean loss in the tail beyond the VaR quantile.
    pub expected_shortfall: f64,
    pub probability_of_loss: f64,
    pub terminal: TerminalStatistics,
}

impl RiskSummary {
    pub fn from_terminal_values(
        terminal: &[f64],
        initial_value: f64,
        confidence_level: f64,
    ) -> Self {
        Self {
            initial_value,
            confidence_level,
            value_at_risk: value_at_risk(terminal, initial_value, confidence_level),
            expected_shortfall: expected_shortfall(terminal, initial_value, confidence_level),
            probability_of_loss: probability_of_loss(terminal, initial_value),
            terminal: TerminalStatistics::from_values(terminal),
        }
    }

    /// VaR as a fraction of the initial value.
    pub fn value_at_risk_pct(&self) -> f64 {
        self.value_at_risk / self.initial_value
    }
}

/// One percentile line of a fan chart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PercentileBand {
    pub percentile: f64,
    /// Portfolio value at each time step.
    pub values: Vec<f64>,
}

/// Per-time-step percentiles of portfolio value across scenarios.
pub fn percentile_bands(
    portfolio: &PortfolioValuePathEnsemble,
    percentiles: &[f64],
) -> Vec<PercentileBand> {
    let sorted_steps: Vec<Vec<f64>> = (0..portfolio.n_times())
        .map(|t| sorted_copy(&portfolio.at_step(t)))
        .collect();
    percentiles
        .iter()
        .map(|&p| PercentileBand {
            percentile: p,
            values: sorted_steps.iter().map(|s| quantile_sorted(s, p)).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 5.0);
        assert_eq!(quantile(&values, 0.5), 3.0);
        assert!((quantile(&values, 0.1) - 1.4).abs() < 1e-12);
        assert_eq!(quantile(&[7.0], 0.3), 7.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_var_is_loss_magnitude() {
        // 101 evenly spaced outcomes from 80 to 130.
        let terminal: Vec<f64> = (0..=100).map(|i| 80.0 + 0.5 * i as f64).collect();
        let var = value_at_risk(&terminal, 100.0, 0.95);
        // 5th percentile sits at index 5 -> 82.5
        assert!((var - 17.5).abs() < 1e-9, "var = {var}");

        let es = expected_shortfall(&terminal, 100.0, 0.95);
        // Tail is 80.0..=82.5 -> mean 81.25
        assert!((es - 18.75).abs() < 1e-9, "es = {es}");
        assert!(es >= var);
    }

    #[test]
    fn test_probability_of_loss() {
        let terminal = [90.0, 100.0, 110.0, 95.0];
        assert!((probability_of_loss(&terminal, 100.0) - 0.5).abs() < 1e-12);
        assert_eq!(probability_of_loss(&[120.0, 130.0], 100.0), 0.0);
    }

    #[test]
    fn test_summary_on_gains_only() {
        let terminal = [110.0, 120.0, 130.0];
        let summary = RiskSummary::from_terminal_values(&terminal, 100.0, 0.95);
        // 5th percentile of 110/120/130 is 111, a gain of 11.
        assert!((summary.value_at_risk + 11.0).abs() < 1e-9, "VaR = {}", summary.value_at_risk);
        assert!(summary.value_at_risk_pct() < 0.0);
        assert_eq!(summary.probability_of_loss, 0.0);
        assert!((summary.terminal.mean - 120.0).abs() < 1e-12);
        assert!((summary.terminal.std_dev - 10.0).abs() < 1e-12);
        assert_eq!(summary.terminal.min, 110.0);
        assert_eq!(summary.terminal.max, 130.0);
        assert_eq!(summary.terminal.percentiles.len(), REPORT_PERCENTILES.len());
    }
}
