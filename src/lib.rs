//! Correlated Monte Carlo simulation of multi-asset portfolios under geometric
//! Brownian motion, with Value-at-Risk style tail statistics.
//!
//! ```no_run
//! use portfolio_mc::{SimulationConfig, simulate};
//!
//! let outcome = simulate(&SimulationConfig::three_asset())?;
//! println!("VaR(95%) = {:.2}", outcome.risk.value_at_risk);
//! # Ok::<(), portfolio_mc::SimulationError>(())
//! ```

pub mod config;
pub mod correlation;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod gbm;
pub mod report;
pub mod risk;
pub mod rng;

pub use config::SimulationConfig;
pub use correlation::{CorrelationPolicy, CovarianceStructure};
pub use engine::{PortfolioSimulator, SimulationOutcome, simulate};
pub use ensemble::{PortfolioValuePathEnsemble, PricePathEnsemble};
pub use error::{ErrorKind, SimulationError};
pub use risk::RiskSummary;
pub use rng::{NormalStream, ShockSource};
