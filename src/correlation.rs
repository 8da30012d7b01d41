//! Covariance construction and Cholesky coupling of per-asset shocks.
//!
//! `Σ = outer(σ, σ) ⊙ ρ` is factored once into a lower-triangular `L` with
//! `L·Lᵗ = Σ`. A row vector of independent standard normals `z` then becomes a
//! correlated shock `z·Lᵗ` with covariance `Σ`.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{
    CORRELATION_TOLERANCE, NEAREST_CORRELATION_MAX_ITERATIONS, NEAREST_CORRELATION_MIN_EIGENVALUE,
    NEAREST_CORRELATION_TOLERANCE, PSD_PIVOT_TOLERANCE,
};
use crate::error::{Result, SimulationError};

/// What to do with a correlation matrix whose covariance is not positive semi-definite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationPolicy {
    /// Fail with a numerical error.
    #[default]
    Strict,
    /// Replace the matrix with its nearest correlation matrix and continue.
    NearestCorrelation,
}

/// Builds a square matrix from row vectors, rejecting ragged input.
pub fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<DMatrix<f64>> {
    let n = rows.len();
    if let Some(row) = rows.iter().find(|r| r.len() != n) {
        return Err(SimulationError::DimensionMismatch {
            field: "correlation row",
            expected: n,
            actual: row.len(),
        });
    }
    Ok(DMatrix::from_fn(n, n, |i, j| rows[i][j]))
}

/// Checks that `rho` is square, symmetric, unit-diagonal with entries in `[-1, 1]`.
///
/// Positive semi-definiteness is left to the factorization.
pub fn validate_correlation(rho: &DMatrix<f64>) -> Result<()> {
    let n = rho.nrows();
    if rho.ncols() != n {
        return Err(SimulationError::DimensionMismatch {
            field: "correlation columns",
            expected: n,
            actual: rho.ncols(),
        });
    }

    for i in 0..n {
        let diag = rho[(i, i)];
        if !diag.is_finite() || (diag - 1.0).abs() > CORRELATION_TOLERANCE {
            return Err(SimulationError::InvalidCorrelationEntry {
                row: i,
                col: i,
                value: diag,
                reason: "diagonal entries must be 1",
            });
        }
        for j in (i + 1)..n {
            let (upper, lower) = (rho[(i, j)], rho[(j, i)]);
            if !upper.is_finite() || upper.abs() > 1.0 + CORRELATION_TOLERANCE {
                return Err(SimulationError::InvalidCorrelationEntry {
                    row: i,
                    col: j,
                    value: upper,
                    reason: "entries must be finite and within [-1, 1]",
                });
            }
            if !lower.is_finite() {
                return Err(SimulationError::InvalidCorrelationEntry {
                    row: j,
                    col: i,
                    value: lower,
                    reason: "entries must be finite and within [-1, 1]",
                });
            }
            if (upper - lower).abs() > CORRELATION_TOLERANCE {
                return Err(SimulationError::AsymmetricCorrelation {
                    row: i,
                    col: j,
                    upper,
                    lower,
                });
            }
        }
    }
    Ok(())
}

/// `Σ = outer(sigma, sigma) ⊙ rho`.
pub fn covariance_matrix(sigma: &[f64], rho: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = sigma.len();
    if rho.nrows() != n || rho.ncols() != n {
        return Err(SimulationError::DimensionMismatch {
            field: "correlation",
            expected: n,
            actual: rho.nrows(),
        });
    }
    Ok(DMatrix::from_fn(n, n, |i, j| sigma[i] * sigma[j] * rho[(i, j)]))
}

/// Lower Cholesky factor of a symmetric positive semi-definite matrix.
///
/// Zero pivots (e.g. an asset with zero volatility) produce a zero column instead
/// of failing. A pivot below `-tol` means the matrix is not PSD.
pub fn cholesky_lower_psd(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = m.nrows();
    let scale = m.diagonal().iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
    let tol = PSD_PIVOT_TOLERANCE * scale.max(f64::MIN_POSITIVE);
    let mut l = DMatrix::<f64>::zeros(n, n);

    for j in 0..n {
        let mut pivot = m[(j, j)];
        for k in 0..j {
            pivot -= l[(j, k)] * l[(j, k)];
        }
        if pivot < -tol || !pivot.is_finite() {
            return Err(SimulationError::NotPositiveSemiDefinite { pivot: j, value: pivot });
        }
        let ljj = if pivot > tol { pivot.sqrt() } else { 0.0 };
        l[(j, j)] = ljj;

        for i in (j + 1)..n {
            let mut sum = m[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            if ljj > 0.0 {
                l[(i, j)] = sum / ljj;
            } else if sum.abs() > tol.sqrt() * scale.sqrt() {
                // A zero pivot with a non-zero coupling cannot be PSD.
                return Err(SimulationError::NotPositiveSemiDefinite { pivot: j, value: pivot });
            }
        }
    }

    Ok(l)
}

fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

fn project_psd(m: &DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    let eig = SymmetricEigen::new(symmetrize(m));
    let clipped = eig.eigenvalues.map(|v| v.max(floor));
    let d = DMatrix::from_diagonal(&clipped);
    symmetrize(&(&eig.eigenvectors * d * eig.eigenvectors.transpose()))
}

fn with_unit_diagonal(mut m: DMatrix<f64>) -> DMatrix<f64> {
    for i in 0..m.nrows() {
        m[(i, i)] = 1.0;
    }
    m
}

/// Nearest correlation matrix by alternating projections with Dykstra's correction.
///
/// Alternates between the PSD cone and the unit-diagonal set, then rescales the
/// final PSD iterate by its diagonal so the result is exactly unit-diagonal and
/// still positive semi-definite.
pub fn nearest_correlation(rho: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = rho.nrows();
    if n == 0 || rho.ncols() != n {
        return Err(SimulationError::RepairFailed("matrix must be square and non-empty".into()));
    }

    let mut y = with_unit_diagonal(symmetrize(rho));
    let mut correction = DMatrix::<f64>::zeros(n, n);

    for _ in 0..NEAREST_CORRELATION_MAX_ITERATIONS {
        let r = &y - &correction;
        let x = project_psd(&r, 0.0);
        correction = &x - &r;
        let next = with_unit_diagonal(x);
        let diff = (&next - &y).norm();
        y = next;
        if diff < NEAREST_CORRELATION_TOLERANCE {
            break;
        }
    }

    let x = project_psd(&y, NEAREST_CORRELATION_MIN_EIGENVALUE);
    let d: DVector<f64> = x.diagonal().map(|v| v.sqrt());
    if d.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
        return Err(SimulationError::RepairFailed("projection lost a diagonal entry".into()));
    }
    let repaired = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            1.0
        } else {
            (x[(i, j)] / (d[i] * d[j])).clamp(-1.0, 1.0)
        }
    });
    Ok(symmetrize(&repaired))
}

/// Sample correlation of the columns of `samples` (rows are observations).
///
/// Columns with zero variance report zero correlation with everything else.
pub fn empirical_correlation(samples: &DMatrix<f64>) -> DMatrix<f64> {
    let (rows, cols) = samples.shape();
    let mut centered = samples.clone();
    for j in 0..cols {
        let mean = samples.column(j).mean();
        centered.column_mut(j).add_scalar_mut(-mean);
    }
    let cov = centered.transpose() * &centered / (rows.max(2) - 1) as f64;

    DMatrix::from_fn(cols, cols, |i, j| {
        if i == j {
            return 1.0;
        }
        let denom = (cov[(i, i)] * cov[(j, j)]).sqrt();
        if denom > 0.0 { cov[(i, j)] / denom } else { 0.0 }
    })
}

/// Covariance matrix `Σ` of the assets together with its Cholesky factor `L`.
#[derive(Clone, Debug)]
pub struct CovarianceStructure {
    correlation: DMatrix<f64>,
    covariance: DMatrix<f64>,
    factor: DMatrix<f64>,
    factor_t: DMatrix<f64>,
    repaired: bool,
}

impl CovarianceStructure {
    pub fn new(sigma: &[f64], rho: &DMatrix<f64>, policy: CorrelationPolicy) -> Result<Self> {
        let bad_sigma = sigma.iter().enumerate().find(|(_, s)| !(s.is_finite() && **s >= 0.0));
        if let Some((i, &s)) = bad_sigma {
            return Err(SimulationError::invalid(
                "volatilities",
                format!("asset {i} has volatility {s}, expected a finite non-negative value"),
            ));
        }
        validate_correlation(rho)?;

        let covariance = covariance_matrix(sigma, rho)?;
        match (cholesky_lower_psd(&covariance), policy) {
            (Ok(factor), _) => {
                debug!("Cholesky factorization succeeded for {} assets", sigma.len());
                Ok(Self::assemble(rho.clone(), covariance, factor, false))
            }
            (Err(e), CorrelationPolicy::Strict) => Err(e),
            (Err(e), CorrelationPolicy::NearestCorrelation) => {
                let repaired = nearest_correlation(rho)?;
                warn!(
                    "Correlation matrix is not positive semi-definite ({}); \
                     replaced by nearest correlation matrix (Frobenius distance {:.3e})",
                    e,
                    (&repaired - rho).norm()
                );
                let covariance = covariance_matrix(sigma, &repaired)?;
                let factor = cholesky_lower_psd(&covariance)?;
                Ok(Self::assemble(repaired, covariance, factor, true))
            }
        }
    }

    fn assemble(
        correlation: DMatrix<f64>,
        covariance: DMatrix<f64>,
        factor: DMatrix<f64>,
        repaired: bool,
    ) -> Self {
        let factor_t = factor.transpose();
        Self {
            correlation,
            covariance,
            factor,
            factor_t,
            repaired,
        }
    }

    pub fn n_assets(&self) -> usize {
        self.factor.nrows()
    }

    /// Correlation matrix actually used; differs from the input only after repair.
    pub fn correlation(&self) -> &DMatrix<f64> {
        &self.correlation
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Lower-triangular `L` with `L·Lᵗ = Σ`.
    pub fn factor(&self) -> &DMatrix<f64> {
        &self.factor
    }

    pub fn was_repaired(&self) -> bool {
        self.repaired
    }

    /// `Z·Lᵗ` for a `(rows × assets)` block of independent standard normals.
    pub fn correlate(&self, z: &DMatrix<f64>) -> DMatrix<f64> {
        z * &self.factor_t
    }

    /// `L·Lᵗ`.
    pub fn reconstruct(&self) -> DMatrix<f64> {
        &self.factor * &self.factor_t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{NormalStream, ShockSource};

    fn equicorrelated(n: usize, rho: f64) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| if i == j { 1.0 } else { rho })
    }

    fn not_psd() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[1.0, 0.95, 0.95, 0.95, 1.0, -0.95, 0.95, -0.95, 1.0])
    }

    #[test]
    fn test_identity_gives_diagonal_factor() {
        let sigma = [0.2, 0.35, 0.1];
        let cs =
            CovarianceStructure::new(&sigma, &DMatrix::identity(3, 3), CorrelationPolicy::Strict)
                .unwrap();
        let l = cs.factor();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { sigma[i] } else { 0.0 };
                assert!((l[(i, j)] - expected).abs() < 1e-12);
            }
        }

        let z = DMatrix::from_row_slice(2, 3, &[1.0, -2.0, 0.5, 0.0, 1.0, -1.0]);
        let shocks = cs.correlate(&z);
        for r in 0..2 {
            for c in 0..3 {
                assert!((shocks[(r, c)] - sigma[c] * z[(r, c)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_reconstruction_round_trip() {
        let sigma = [0.15, 0.22, 0.3, 0.05];
        let rho = DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, 0.6, 0.3, -0.2, //
                0.6, 1.0, 0.4, 0.1, //
                0.3, 0.4, 1.0, 0.25, //
                -0.2, 0.1, 0.25, 1.0,
            ],
        );
        let cs = CovarianceStructure::new(&sigma, &rho, CorrelationPolicy::Strict).unwrap();
        let diff = (cs.reconstruct() - cs.covariance()).abs().max();
        assert!(diff < 1e-8, "max reconstruction error {diff}");
        assert!(!cs.was_repaired());

        let l = cs.factor();
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert_eq!(l[(i, j)], 0.0, "factor must be lower triangular");
            }
        }
    }

    #[test]
    fn test_semidefinite_input_factors() {
        // Perfect correlation and a zero-volatility asset are both singular but PSD.
        let rho = equicorrelated(3, 1.0);
        let cs = CovarianceStructure::new(&[0.2, 0.2, 0.0], &rho, CorrelationPolicy::Strict)
            .unwrap();
        assert!((cs.reconstruct() - cs.covariance()).abs().max() < 1e-12);
        assert!(cs.factor().row(2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_round_off_negative_pivot_treated_as_zero() {
        // Equicorrelation -0.5 is singular; nudging it down leaves a smallest
        // eigenvalue of about -3e-14, inside the pivot tolerance.
        let rho = equicorrelated(3, -0.5 - 1e-14);
        let min_eig = SymmetricEigen::new(rho.clone()).eigenvalues.min();
        assert!(min_eig < 0.0, "min eigenvalue {min_eig}");

        let cs = CovarianceStructure::new(&[1.0, 1.0, 1.0], &rho, CorrelationPolicy::Strict)
            .unwrap();
        assert!(!cs.was_repaired());
        assert_eq!(cs.factor()[(2, 2)], 0.0);
        assert!((cs.reconstruct() - cs.covariance()).abs().max() < 1e-12);
    }

    #[test]
    fn test_negative_pivot_beyond_tolerance_rejected() {
        // Third pivot is about -6e-10, well past 1e-12 times the largest variance.
        let rho = equicorrelated(3, -0.5 - 1e-10);
        assert!(validate_correlation(&rho).is_ok());
        let err = CovarianceStructure::new(&[1.0, 1.0, 1.0], &rho, CorrelationPolicy::Strict)
            .unwrap_err();
        match err {
            SimulationError::NotPositiveSemiDefinite { pivot, value } => {
                assert_eq!(pivot, 2);
                assert!(value < -PSD_PIVOT_TOLERANCE, "pivot value {value}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_zero_pivot_with_coupling_rejected() {
        // Assets 0 and 1 move together, so they cannot correlate differently with asset 2.
        let rho = DMatrix::from_row_slice(3, 3, &[1.0, 1.0, 0.5, 1.0, 1.0, 0.0, 0.5, 0.0, 1.0]);
        assert!(matches!(
            cholesky_lower_psd(&rho),
            Err(SimulationError::NotPositiveSemiDefinite { pivot: 1, .. })
        ));
        let err = CovarianceStructure::new(&[0.2, 0.2, 0.2], &rho, CorrelationPolicy::Strict)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Numerical);
    }

    #[test]
    fn test_non_finite_lower_entry_rejected() {
        let mut rho = equicorrelated(3, 0.3);
        rho[(1, 0)] = f64::NAN;
        for policy in [CorrelationPolicy::Strict, CorrelationPolicy::NearestCorrelation] {
            let err = CovarianceStructure::new(&[0.2, 0.2, 0.2], &rho, policy).unwrap_err();
            assert!(matches!(
                err,
                SimulationError::InvalidCorrelationEntry { row: 1, col: 0, .. }
            ));
            assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_not_psd_rejected() {
        let bad = not_psd();
        let err = CovarianceStructure::new(&[0.2, 0.2, 0.2], &bad, CorrelationPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, SimulationError::NotPositiveSemiDefinite { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Numerical);
    }

    #[test]
    fn test_asymmetric_rejected() {
        let rho = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.2, 1.0]);
        let err = CovarianceStructure::new(&[0.1, 0.1], &rho, CorrelationPolicy::NearestCorrelation)
            .unwrap_err();
        assert!(matches!(err, SimulationError::AsymmetricCorrelation { row: 0, col: 1, .. }));
    }

    #[test]
    fn test_bad_diagonal_and_range_rejected() {
        let rho = DMatrix::from_row_slice(2, 2, &[0.9, 0.3, 0.3, 1.0]);
        assert!(validate_correlation(&rho).is_err());
        let rho = DMatrix::from_row_slice(2, 2, &[1.0, 1.3, 1.3, 1.0]);
        assert!(validate_correlation(&rho).is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let rows = vec![vec![1.0, 0.2], vec![0.2]];
        assert!(matches!(
            matrix_from_rows(&rows),
            Err(SimulationError::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_nearest_correlation_repair() {
        let bad = not_psd();
        let cs =
            CovarianceStructure::new(&[0.2, 0.3, 0.25], &bad, CorrelationPolicy::NearestCorrelation)
                .unwrap();
        assert!(cs.was_repaired());

        let repaired = cs.correlation();
        assert!(validate_correlation(repaired).is_ok());
        let min_eig = SymmetricEigen::new(repaired.clone()).eigenvalues.min();
        assert!(min_eig > -1e-10, "min eigenvalue {min_eig}");
        assert!((cs.reconstruct() - cs.covariance()).abs().max() < 1e-8);
    }

    #[test]
    fn test_valid_matrix_untouched_by_repair_policy() {
        let rho = equicorrelated(3, 0.5);
        let cs =
            CovarianceStructure::new(&[0.1, 0.2, 0.3], &rho, CorrelationPolicy::NearestCorrelation)
                .unwrap();
        assert!(!cs.was_repaired());
        assert_eq!(cs.correlation(), &rho);
    }

    #[test]
    fn test_correlated_shocks_match_covariance() {
        let sigma = [0.2, 0.1, 0.3];
        let rho = equicorrelated(3, 0.5);
        let cs = CovarianceStructure::new(&sigma, &rho, CorrelationPolicy::Strict).unwrap();

        let rows = 50_000;
        let mut stream = NormalStream::seeded(11);
        let mut draws = vec![0.0; rows * 3];
        stream.fill_standard_normal(&mut draws);
        let z = DMatrix::from_row_slice(rows, 3, &draws);
        let shocks = cs.correlate(&z);

        let empirical_cov = shocks.transpose() * &shocks / rows as f64;
        let diff = (empirical_cov - cs.covariance()).abs().max();
        assert!(diff < 3e-3, "max covariance error {diff}");

        let corr = empirical_correlation(&shocks);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.5 };
                assert!((corr[(i, j)] - expected).abs() < 0.02);
            }
        }
    }
}
