//! Per-state emission distributions.
//!
//! The inference engine only sees the [`Emission`] capability: evaluate
//! log-densities for a whole observation sequence, and refit from weighted
//! observations. Any family implementing it can be plugged in.

use anyhow::{Result, anyhow, bail};
use nalgebra::{Cholesky, DMatrix, Dyn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Added to the diagonal after every covariance refit.
pub const COVARIANCE_RIDGE: f64 = 1e-6;

pub trait Emission: Send + Sync {
    /// Log-density of every row of `x` (T x D) under the current parameters.
    fn log_pdf(&self, x: ArrayView2<f64>) -> Result<Array1<f64>>;

    /// Weighted maximum-likelihood refit. `weights` has one non-negative
    /// entry per row of `x`. A zero total weight is an error and leaves the
    /// parameters untouched.
    fn max_likelihood(&mut self, x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Result<()>;
}

fn check_refit_inputs(x: ArrayView2<f64>, weights: ArrayView1<f64>, dim: usize) -> Result<f64> {
    if x.ncols() != dim {
        bail!("observation dimension {} does not match distribution dimension {}", x.ncols(), dim);
    }
    if weights.len() != x.nrows() {
        bail!("weights length {} does not match {} observations", weights.len(), x.nrows());
    }
    if let Some((t, w)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        bail!("weight at index {t} is invalid: {w}");
    }
    let total = weights.sum();
    if !(total > 0.0) {
        bail!("weights sum to zero; cannot refit emission distribution");
    }
    Ok(total)
}

fn weighted_mean(x: ArrayView2<f64>, weights: ArrayView1<f64>, total: f64) -> Array1<f64> {
    x.t().dot(&weights) / total
}

fn cholesky(covariance: &Array2<f64>) -> Result<Cholesky<f64, Dyn>> {
    let (n, m) = covariance.dim();
    if n != m {
        bail!("covariance must be square, got shape {:?}", covariance.shape());
    }
    if covariance.iter().any(|v| !v.is_finite()) {
        bail!("covariance has non-finite entries");
    }
    DMatrix::from_fn(n, n, |i, j| covariance[(i, j)])
        .cholesky()
        .ok_or_else(|| anyhow!("covariance is not positive definite"))
}

#[derive(Deserialize)]
struct GaussianRepr {
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

impl TryFrom<GaussianRepr> for Gaussian {
    type Error = anyhow::Error;

    fn try_from(repr: GaussianRepr) -> Result<Self> {
        Gaussian::new(repr.mean, repr.covariance)
    }
}

/// Multivariate normal with a full covariance matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GaussianRepr")]
pub struct Gaussian {
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

impl Gaussian {
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let d = mean.len();
        if d == 0 {
            bail!("gaussian mean must have at least one dimension");
        }
        if covariance.shape() != [d, d] {
            bail!(
                "covariance shape {:?} does not match mean dimension {}",
                covariance.shape(),
                d
            );
        }
        for i in 0..d {
            for j in 0..i {
                let (a, b) = (covariance[(i, j)], covariance[(j, i)]);
                if (a - b).abs() > 1e-9 * a.abs().max(b.abs()).max(1.0) {
                    bail!("covariance is not symmetric at ({i}, {j})");
                }
            }
        }
        cholesky(&covariance)?;
        Ok(Self { mean, covariance })
    }

    pub fn with_identity(mean: Array1<f64>) -> Self {
        let d = mean.len();
        Self {
            mean,
            covariance: Array2::eye(d),
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }
}

impl Emission for Gaussian {
    fn log_pdf(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let d = self.dim();
        if x.ncols() != d {
            bail!("observation dimension {} does not match gaussian dimension {}", x.ncols(), d);
        }
        if self.covariance.dim() != (d, d) {
            bail!(
                "covariance shape {:?} does not match gaussian dimension {}",
                self.covariance.shape(),
                d
            );
        }
        let l = cholesky(&self.covariance)?.l();
        let log_det = 2.0 * l.diagonal().iter().map(|v| v.ln()).sum::<f64>();
        let norm = d as f64 * (2.0 * PI).ln() + log_det;

        // Columns of L^-1 (x - mean)^T; the Mahalanobis term is their squared norm.
        let centered = DMatrix::from_fn(d, x.nrows(), |i, t| x[(t, i)] - self.mean[i]);
        let z = l
            .solve_lower_triangular(&centered)
            .ok_or_else(|| anyhow!("covariance factor is singular"))?;
        Ok(z.column_iter().map(|col| -0.5 * (norm + col.norm_squared())).collect())
    }

    fn max_likelihood(&mut self, x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Result<()> {
        let total = check_refit_inputs(x, weights, self.dim())?;
        let mean = weighted_mean(x, weights, total);
        let centered = &x - &mean.view().insert_axis(Axis(0));
        let weighted = &centered * &weights.insert_axis(Axis(1));
        let mut covariance = weighted.t().dot(&centered) / total;
        for i in 0..self.dim() {
            covariance[(i, i)] += COVARIANCE_RIDGE;
        }
        cholesky(&covariance)?;
        self.mean = mean;
        self.covariance = covariance;
        Ok(())
    }
}

#[derive(Deserialize)]
struct SphericalRepr {
    mean: Array1<f64>,
    variance: f64,
}

impl TryFrom<SphericalRepr> for SphericalGaussian {
    type Error = anyhow::Error;

    fn try_from(repr: SphericalRepr) -> Result<Self> {
        SphericalGaussian::new(repr.mean, repr.variance)
    }
}

/// Multivariate normal with covariance `variance * I`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SphericalRepr")]
pub struct SphericalGaussian {
    mean: Array1<f64>,
    variance: f64,
}

impl SphericalGaussian {
    pub fn new(mean: Array1<f64>, variance: f64) -> Result<Self> {
        if mean.is_empty() {
            bail!("gaussian mean must have at least one dimension");
        }
        if !(variance > 0.0 && variance.is_finite()) {
            bail!("variance must be positive and finite, got {variance}");
        }
        Ok(Self { mean, variance })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

impl Emission for SphericalGaussian {
    fn log_pdf(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let d = self.dim();
        if x.ncols() != d {
            bail!("observation dimension {} does not match gaussian dimension {}", x.ncols(), d);
        }
        let norm = d as f64 * (2.0 * PI * self.variance).ln();
        let out = x
            .rows()
            .into_iter()
            .map(|row| {
                let sq: f64 = row
                    .iter()
                    .zip(self.mean.iter())
                    .map(|(a, m)| (a - m) * (a - m))
                    .sum();
                -0.5 * (norm + sq / self.variance)
            })
            .collect();
        Ok(out)
    }

    fn max_likelihood(&mut self, x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Result<()> {
        let total = check_refit_inputs(x, weights, self.dim())?;
        let mean = weighted_mean(x, weights, total);
        let mut sq = 0.0;
        for (row, w) in x.rows().into_iter().zip(weights.iter()) {
            let d2: f64 = row.iter().zip(mean.iter()).map(|(a, m)| (a - m) * (a - m)).sum();
            sq += w * d2;
        }
        let variance = sq / (total * self.dim() as f64) + COVARIANCE_RIDGE;
        if !variance.is_finite() {
            bail!("refit produced a non-finite variance");
        }
        self.mean = mean;
        self.variance = variance;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceKind {
    Full,
    Spherical,
}

/// Either Gaussian family, selectable at runtime and stored in model files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmissionModel {
    Full(Gaussian),
    Spherical(SphericalGaussian),
}

impl EmissionModel {
    /// Unit-covariance distribution centred on `mean`.
    pub fn unit(kind: CovarianceKind, mean: Array1<f64>) -> Self {
        match kind {
            CovarianceKind::Full => EmissionModel::Full(Gaussian::with_identity(mean)),
            CovarianceKind::Spherical => {
                EmissionModel::Spherical(SphericalGaussian { mean, variance: 1.0 })
            }
        }
    }

    pub fn mean(&self) -> &Array1<f64> {
        match self {
            EmissionModel::Full(g) => g.mean(),
            EmissionModel::Spherical(g) => g.mean(),
        }
    }
}

impl Emission for EmissionModel {
    fn log_pdf(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        match self {
            EmissionModel::Full(g) => g.log_pdf(x),
            EmissionModel::Spherical(g) => g.log_pdf(x),
        }
    }

    fn max_likelihood(&mut self, x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Result<()> {
        match self {
            EmissionModel::Full(g) => g.max_likelihood(x, weights),
            EmissionModel::Spherical(g) => g.max_likelihood(x, weights),
        }
    }
}
