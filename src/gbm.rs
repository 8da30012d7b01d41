use crate::error::{Result, SimulationError};
use crate::rng::ShockSource;

/// Single-asset GBM parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GbmParams {
    pub s0: f64,
    pub mu: f64,
    pub sigma: f64,
}

impl GbmParams {
    pub fn new(s0: f64, mu: f64, sigma: f64) -> Self {
        Self { s0, mu, sigma }
    }
}

/// Discrete GBM update for a fixed step size:
///
/// `S_next = S * exp((mu - 0.5*sigma^2)*dt + sigma*sqrt(dt)*Z)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GbmStep {
    drift: f64,
    sqrt_dt: f64,
    sigma: f64,
}

impl GbmStep {
    pub fn new(mu: f64, sigma: f64, dt: f64) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimulationError::invalid(
                "dt",
                format!("must be finite and positive, got {dt}"),
            ));
        }
        if !(sigma.is_finite() && sigma >= 0.0) {
            return Err(SimulationError::invalid(
                "sigma",
                format!("must be finite and non-negative, got {sigma}"),
            ));
        }
        if !mu.is_finite() {
            return Err(SimulationError::invalid("mu", format!("must be finite, got {mu}")));
        }
        Ok(Self {
            drift: (mu - 0.5 * sigma * sigma) * dt,
            sqrt_dt: dt.sqrt(),
            sigma,
        })
    }

    /// Advance one step from a standard-normal draw.
    #[inline]
    pub fn advance(&self, price: f64, z: f64) -> f64 {
        self.advance_scaled(price, self.sigma * z)
    }

    /// Advance one step from a shock that already carries the volatility,
    /// i.e. a draw with variance `sigma^2` such as a correlated shock.
    #[inline]
    pub fn advance_scaled(&self, price: f64, shock: f64) -> f64 {
        price * (self.drift + self.sqrt_dt * shock).exp()
    }
}

/// Deterministic reference `S0 * exp(mu * t)`, the mean of the GBM at time `t`.
pub fn expected_price(params: &GbmParams, t: f64) -> f64 {
    params.s0 * (params.mu * t).exp()
}

/// One GBM path of `n_steps + 1` points over `horizon` years.
///
/// `n_steps == 0` yields `[S0]`.
pub fn simulate_path<S: ShockSource + ?Sized>(
    params: &GbmParams,
    horizon: f64,
    n_steps: usize,
    source: &mut S,
) -> Result<Vec<f64>> {
    let mut path = Vec::with_capacity(n_steps + 1);
    path.push(params.s0);
    if n_steps == 0 {
        return Ok(path);
    }

    let step = GbmStep::new(params.mu, params.sigma, horizon / n_steps as f64)?;
    let mut shocks = vec![0.0; n_steps];
    source.fill_standard_normal(&mut shocks);

    let mut price = params.s0;
    for &z in &shocks {
        price = step.advance(price, z);
        path.push(price);
    }
    Ok(path)
}

/// `n_paths` independent GBM paths sharing the same parameters and time grid.
pub fn simulate_paths<S: ShockSource + ?Sized>(
    params: &GbmParams,
    horizon: f64,
    n_steps: usize,
    n_paths: usize,
    source: &mut S,
) -> Result<Vec<Vec<f64>>> {
    (0..n_paths)
        .map(|_| simulate_path(params, horizon, n_steps, source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::NormalStream;

    #[test]
    fn test_zero_steps_is_single_point() {
        let mut rng = NormalStream::seeded(1);
        let params = GbmParams::new(100.0, 0.05, 0.2);
        let path = simulate_path(&params, 1.0, 0, &mut rng).unwrap();
        assert_eq!(path, vec![100.0]);
    }

    #[test]
    fn test_zero_volatility_is_pure_drift() {
        let mut rng = NormalStream::seeded(2);
        let params = GbmParams::new(100.0, 0.08, 0.0);
        let n_steps = 12;
        let path = simulate_path(&params, 1.0, n_steps, &mut rng).unwrap();
        for (i, &price) in path.iter().enumerate() {
            let t = i as f64 / n_steps as f64;
            assert!((price - expected_price(&params, t)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_flat_path() {
        let mut rng = NormalStream::seeded(3);
        let params = GbmParams::new(42.0, 0.0, 0.0);
        let paths = simulate_paths(&params, 2.0, 50, 10, &mut rng).unwrap();
        assert_eq!(paths.len(), 10);
        for path in &paths {
            assert_eq!(path.len(), 51);
            assert!(path.iter().all(|&p| p == 42.0));
        }
    }

    #[test]
    fn test_prices_stay_positive() {
        let mut rng = NormalStream::seeded(4);
        let params = GbmParams::new(10.0, -0.5, 1.5);
        let paths = simulate_paths(&params, 5.0, 100, 200, &mut rng).unwrap();
        assert!(paths.iter().flatten().all(|&p| p > 0.0 && p.is_finite()));
    }

    #[test]
    fn test_step_depends_on_previous_price() {
        let step = GbmStep::new(0.1, 0.2, 0.5).unwrap();
        let first = step.advance(100.0, 0.3);
        let second = step.advance(first, -0.1);
        let direct = 100.0 * ((0.1 - 0.02) * 1.0 + 0.2 * 0.5_f64.sqrt() * 0.2).exp();
        assert!((second - direct).abs() < 1e-9);
        assert!((step.advance(100.0, 0.5) - step.advance_scaled(100.0, 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_step_size_rejected() {
        assert!(GbmStep::new(0.1, 0.2, 0.0).is_err());
        assert!(GbmStep::new(0.1, 0.2, -1.0).is_err());
        assert!(GbmStep::new(0.1, -0.2, 1.0).is_err());
        let mut rng = NormalStream::seeded(5);
        let params = GbmParams::new(100.0, 0.1, 0.2);
        assert!(simulate_path(&params, 0.0, 10, &mut rng).is_err());
    }

    #[test]
    fn test_terminal_mean_matches_drift() {
        let mut rng = NormalStream::seeded(6);
        let params = GbmParams::new(100.0, 0.1, 0.1123);
        let paths = simulate_paths(&params, 1.0, 252, 10_000, &mut rng).unwrap();
        let mean = paths.iter().map(|p| p[252]).sum::<f64>() / paths.len() as f64;
        let expected = expected_price(&params, 1.0);
        // Terminal std is roughly 12.4, so the standard error of the mean is ~0.12.
        assert!((mean - expected).abs() < 0.6, "mean = {mean}, expected = {expected}");
    }
}
