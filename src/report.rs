use serde::Serialize;

use crate::config::{REPORT_PERCENTILES, SimulationConfig};
use crate::engine::SimulationOutcome;
use crate::risk::{PercentileBand, RiskSummary, percentile_bands};

/// Serializable view of a run for callers that want JSON instead of the text box.
#[derive(Debug, Serialize)]
pub struct SimulationReport<'a> {
    pub config: &'a SimulationConfig,
    pub risk: &'a RiskSummary,
    pub correlation_repaired: bool,
    pub terminal_asset_means: Vec<f64>,
    pub percentile_bands: Vec<PercentileBand>,
}

impl<'a> SimulationReport<'a> {
    pub fn new(
        config: &'a SimulationConfig,
        outcome: &'a SimulationOutcome,
        correlation_repaired: bool,
    ) -> Self {
        Self {
            config,
            risk: &outcome.risk,
            correlation_repaired,
            terminal_asset_means: outcome.prices.terminal_means(),
            percentile_bands: percentile_bands(&outcome.portfolio, REPORT_PERCENTILES),
        }
    }
}

/// Pretty-prints the risk summary to stdout.
pub fn print_summary(config: &SimulationConfig, outcome: &SimulationOutcome) {
    let risk = &outcome.risk;
    let terminal = &risk.terminal;

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║           Monte Carlo Portfolio Risk Summary               ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  Assets / Scenarios / Steps : {:>3} / {:>7} / {:>5}         ║",
        config.n_assets(),
        config.num_scenarios,
        config.num_steps
    );
    println!(
        "║  Horizon                    : {:>7.2} years                ║",
        config.horizon_years
    );
    println!(
        "║  Initial Value              : {:>14.2}               ║",
        config.initial_value
    );
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  VaR ({:>4.1}%)                : {:>14.2} ({:>6.2}%)     ║",
        risk.confidence_level * 100.0,
        risk.value_at_risk,
        risk.value_at_risk_pct() * 100.0
    );
    println!(
        "║  Expected Shortfall         : {:>14.2}               ║",
        risk.expected_shortfall
    );
    println!(
        "║  Probability of Loss        : {:>13.2}%               ║",
        risk.probability_of_loss * 100.0
    );
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  Terminal Mean / Std        : {:>12.2} / {:>11.2}  ║",
        terminal.mean, terminal.std_dev
    );
    println!(
        "║  Terminal Min / Max         : {:>12.2} / {:>11.2}  ║",
        terminal.min, terminal.max
    );
    for (p, value) in &terminal.percentiles {
        println!(
            "║    P{:<3.0}                     : {:>14.2}               ║",
            p * 100.0,
            value
        );
    }
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Asset   Weight      S0        E[S_T]     Drift    Vol     ║");
    for (a, mean) in outcome.prices.terminal_means().iter().enumerate() {
        println!(
            "║  #{:<4} {:>6.1}%  {:>9.2}  {:>10.2}  {:>+6.2}%  {:>5.1}%  ║",
            a,
            config.weights[a] * 100.0,
            config.initial_prices[a],
            mean,
            config.drifts[a] * 100.0,
            config.volatilities[a] * 100.0
        );
    }
    println!("╚════════════════════════════════════════════════════════════╝");
}
