use anyhow::{Result, bail};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;

use crate::emission::Emission;
use crate::model::{check_observations, check_parameters};
use crate::utils::{logsumexp_axis, logsumexp_lane};

/// Log-domain forward and backward tables for one observation sequence,
/// together with the log-emission and log-transition matrices they were
/// built from. Only [`alpha_beta`] constructs it, so the tables always
/// cover at least one time step.
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    lalpha: Array2<f64>,
    lbeta: Array2<f64>,
    log_emissions: Array2<f64>,
    log_transition: Array2<f64>,
}

impl ForwardBackward {
    /// log p(u_1..u_t, q_t = k), T x K.
    pub fn lalpha(&self) -> ArrayView2<'_, f64> {
        self.lalpha.view()
    }

    /// log p(u_{t+1}..u_T | q_t = k), T x K; the last row is 0.
    pub fn lbeta(&self) -> ArrayView2<'_, f64> {
        self.lbeta.view()
    }

    pub fn log_emissions(&self) -> ArrayView2<'_, f64> {
        self.log_emissions.view()
    }

    pub fn log_transition(&self) -> ArrayView2<'_, f64> {
        self.log_transition.view()
    }

    pub fn n_steps(&self) -> usize {
        self.lalpha.nrows()
    }

    pub fn n_states(&self) -> usize {
        self.lalpha.ncols()
    }

    /// log p(q_t = k | whole sequence), T x K.
    pub fn smoothing(&self) -> Result<Array2<f64>> {
        smoothing(self.lalpha.view(), self.lbeta.view())
    }

    /// log p(q_t = i, q_{t+1} = j | whole sequence), T x K x K.
    pub fn pairwise_smoothing(&self) -> Result<Array3<f64>> {
        pairwise_from_logs(
            self.lalpha.view(),
            self.lbeta.view(),
            self.log_transition.view(),
            self.log_emissions.view(),
        )
    }

    pub fn log_likelihood(&self) -> f64 {
        let last = self.n_steps() - 1;
        joint_at(self.lalpha.view(), self.lbeta.view(), last)
    }
}

pub fn log_emissions<E: Emission>(x: ArrayView2<f64>, emissions: &[E]) -> Result<Array2<f64>> {
    let n_obs = x.nrows();
    let columns = emissions
        .par_iter()
        .map(|e| e.log_pdf(x))
        .collect::<Result<Vec<Array1<f64>>>>()?;

    let mut out = Array2::zeros((n_obs, emissions.len()));
    for (k, col) in columns.into_iter().enumerate() {
        if col.len() != n_obs {
            bail!(
                "emission {k} returned {} log-densities for {} observations",
                col.len(),
                n_obs
            );
        }
        if let Some(t) = col.iter().position(|v| v.is_nan()) {
            bail!("emission {k} returned NaN log-density at t={t}");
        }
        out.column_mut(k).assign(&col);
    }
    Ok(out)
}

/// Forward-backward pass. `a[(i, j)]` is p(q_{t+1} = j | q_t = i).
pub fn alpha_beta<E: Emission>(
    x: ArrayView2<f64>,
    pi: ArrayView1<f64>,
    a: ArrayView2<f64>,
    emissions: &[E],
) -> Result<ForwardBackward> {
    check_observations(x)?;
    check_parameters(pi, a, emissions.len())?;

    let log_emissions = log_emissions(x, emissions)?;
    let log_pi = pi.mapv(f64::ln);
    let log_transition = a.mapv(f64::ln);

    let lalpha = forward(log_pi.view(), log_transition.view(), log_emissions.view());
    let lbeta = backward(log_transition.view(), log_emissions.view());

    Ok(ForwardBackward {
        lalpha,
        lbeta,
        log_emissions,
        log_transition,
    })
}

fn forward(log_pi: ArrayView1<f64>, log_a: ArrayView2<f64>, lem: ArrayView2<f64>) -> Array2<f64> {
    let (n_obs, n_states) = lem.dim();
    let mut lalpha = Array2::zeros((n_obs, n_states));
    lalpha.row_mut(0).assign(&(&log_pi + &lem.row(0)));
    for t in 1..n_obs {
        // scores[i, k] = lalpha[t-1, i] + log A[i, k], reduced over i
        let scores = &log_a + &lalpha.row(t - 1).insert_axis(Axis(1));
        let next = logsumexp_axis(scores.view(), Axis(0)) + &lem.row(t);
        lalpha.row_mut(t).assign(&next);
    }
    lalpha
}

fn backward(log_a: ArrayView2<f64>, lem: ArrayView2<f64>) -> Array2<f64> {
    let (n_obs, n_states) = lem.dim();
    let mut lbeta = Array2::zeros((n_obs, n_states));
    for t in (0..n_obs - 1).rev() {
        // scores[i, j] = lbeta[t+1, j] + log A[i, j] + lem[t+1, j], reduced over j
        let next = &lbeta.row(t + 1) + &lem.row(t + 1);
        let scores = &log_a + &next.view().insert_axis(Axis(0));
        let row = logsumexp_axis(scores.view(), Axis(1));
        lbeta.row_mut(t).assign(&row);
    }
    lbeta
}

fn check_tables(lalpha: ArrayView2<f64>, lbeta: ArrayView2<f64>) -> Result<()> {
    if lalpha.dim() != lbeta.dim() {
        bail!(
            "alpha shape {:?} does not match beta shape {:?}",
            lalpha.shape(),
            lbeta.shape()
        );
    }
    if lalpha.nrows() == 0 || lalpha.ncols() == 0 {
        bail!("forward-backward tables are empty");
    }
    Ok(())
}

/// Single-step smoothing in log space; every row of `exp(result)` sums to 1.
pub fn smoothing(lalpha: ArrayView2<f64>, lbeta: ArrayView2<f64>) -> Result<Array2<f64>> {
    check_tables(lalpha, lbeta)?;
    let log_p = &lalpha + &lbeta;
    let norm = logsumexp_axis(log_p.view(), Axis(1));
    if let Some(t) = norm.iter().position(|v| *v == f64::NEG_INFINITY) {
        bail!("observation sequence has zero probability (time step {t})");
    }
    Ok(log_p - &norm.insert_axis(Axis(1)))
}

/// Pairwise smoothing in log space. For `t < T-1` the K x K slice of
/// `exp(result)` sums to 1 jointly over both indices; slice `T-1` is unused
/// and holds -inf.
pub fn pairwise_smoothing(
    lalpha: ArrayView2<f64>,
    lbeta: ArrayView2<f64>,
    a: ArrayView2<f64>,
    log_emissions: ArrayView2<f64>,
) -> Result<Array3<f64>> {
    let log_a = a.mapv(f64::ln);
    pairwise_from_logs(lalpha, lbeta, log_a.view(), log_emissions)
}

fn pairwise_from_logs(
    lalpha: ArrayView2<f64>,
    lbeta: ArrayView2<f64>,
    log_a: ArrayView2<f64>,
    lem: ArrayView2<f64>,
) -> Result<Array3<f64>> {
    check_tables(lalpha, lbeta)?;
    let (n_obs, n_states) = lalpha.dim();
    if lem.dim() != (n_obs, n_states) {
        bail!(
            "log-emission shape {:?} does not match tables {:?}",
            lem.shape(),
            lalpha.shape()
        );
    }
    if log_a.dim() != (n_states, n_states) {
        bail!(
            "transition matrix shape {:?} does not match {} states",
            log_a.shape(),
            n_states
        );
    }

    let mut log_p = Array3::from_elem((n_obs, n_states, n_states), f64::NEG_INFINITY);
    for t in 0..n_obs - 1 {
        let next = &lem.row(t + 1) + &lbeta.row(t + 1);
        let mut pair = &log_a + &lalpha.row(t).insert_axis(Axis(1));
        pair += &next.view().insert_axis(Axis(0));

        let norm = logsumexp_lane(logsumexp_axis(pair.view(), Axis(1)).view());
        if norm == f64::NEG_INFINITY {
            bail!("observation sequence has zero probability (time step {t})");
        }
        pair -= norm;
        log_p.slice_mut(s![t, .., ..]).assign(&pair);
    }
    Ok(log_p)
}

fn joint_at(lalpha: ArrayView2<f64>, lbeta: ArrayView2<f64>, t: usize) -> f64 {
    logsumexp_lane((&lalpha.row(t) + &lbeta.row(t)).view())
}

/// log p(u_1, ..., u_T) from the last time step.
pub fn log_likelihood(lalpha: ArrayView2<f64>, lbeta: ArrayView2<f64>) -> Result<f64> {
    check_tables(lalpha, lbeta)?;
    Ok(joint_at(lalpha, lbeta, lalpha.nrows() - 1))
}

/// Same marginal computed from `alpha_t + beta_t` at any time step.
pub fn log_likelihood_at(lalpha: ArrayView2<f64>, lbeta: ArrayView2<f64>, t: usize) -> Result<f64> {
    check_tables(lalpha, lbeta)?;
    if t >= lalpha.nrows() {
        bail!("time step {t} out of range for {} observations", lalpha.nrows());
    }
    Ok(joint_at(lalpha, lbeta, t))
}
