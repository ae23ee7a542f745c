use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::emission::Emission;
use crate::hmm::{ForwardBackward, alpha_beta};
use crate::viterbi::{ViterbiPath, viterbi};

/// Tolerance for "sums to one" checks on externally supplied parameters.
pub const STOCHASTIC_TOL: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct HmmModel<E> {
    pub pi: Array1<f64>,
    pub transition: Array2<f64>,
    pub emissions: Vec<E>,
}

impl<E: Emission> HmmModel<E> {
    pub fn new(pi: Array1<f64>, transition: Array2<f64>, emissions: Vec<E>) -> Result<Self> {
        check_parameters(pi.view(), transition.view(), emissions.len())?;
        Ok(Self {
            pi,
            transition,
            emissions,
        })
    }

    /// Model whose transition matrix is uniform `1/K` everywhere, the EM
    /// starting point.
    pub fn with_uniform_transitions(pi: Array1<f64>, emissions: Vec<E>) -> Result<Self> {
        let transition = uniform_transitions(emissions.len())?;
        Self::new(pi, transition, emissions)
    }

    pub fn n_states(&self) -> usize {
        self.pi.len()
    }

    pub fn forward_backward(&self, x: ArrayView2<f64>) -> Result<ForwardBackward> {
        alpha_beta(x, self.pi.view(), self.transition.view(), &self.emissions)
    }

    /// Posterior state probabilities (not logs), T x K.
    pub fn posteriors(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        Ok(self.forward_backward(x)?.smoothing()?.mapv(f64::exp))
    }

    pub fn log_likelihood(&self, x: ArrayView2<f64>) -> Result<f64> {
        Ok(self.forward_backward(x)?.log_likelihood())
    }

    pub fn viterbi(&self, x: ArrayView2<f64>) -> Result<ViterbiPath> {
        viterbi(x, self.pi.view(), self.transition.view(), &self.emissions)
    }
}

pub fn uniform_transitions(n_states: usize) -> Result<Array2<f64>> {
    if n_states == 0 {
        bail!("number of states must be > 0");
    }
    Ok(Array2::from_elem((n_states, n_states), 1.0 / n_states as f64))
}

pub(crate) fn check_distribution(name: &str, p: ArrayView1<f64>) -> Result<()> {
    if let Some((i, v)) = p.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0) {
        bail!("{name} has invalid entry {v} at index {i}");
    }
    let sum = p.sum();
    if (sum - 1.0).abs() > STOCHASTIC_TOL {
        bail!("{name} sums to {sum}, expected 1");
    }
    Ok(())
}

/// Validates the shape and stochasticity of `pi` and `a` against the number
/// of emission distributions.
pub fn check_parameters(pi: ArrayView1<f64>, a: ArrayView2<f64>, n_emissions: usize) -> Result<()> {
    let n_states = pi.len();
    if n_states == 0 {
        bail!("initial distribution is empty");
    }
    if a.nrows() != n_states || a.ncols() != n_states {
        bail!(
            "transition matrix shape {:?} does not match {} states",
            a.shape(),
            n_states
        );
    }
    if n_emissions != n_states {
        bail!(
            "got {} emission distributions for {} states",
            n_emissions,
            n_states
        );
    }
    check_distribution("initial distribution", pi)?;
    for (i, row) in a.rows().into_iter().enumerate() {
        check_distribution(&format!("transition row {i}"), row)?;
    }
    Ok(())
}

pub(crate) fn check_observations(x: ArrayView2<f64>) -> Result<()> {
    if x.nrows() == 0 {
        bail!("observation sequence is empty");
    }
    if x.ncols() == 0 {
        bail!("observations have zero dimensions");
    }
    if let Some(v) = x.iter().find(|v| !v.is_finite()) {
        bail!("observations contain a non-finite value: {v}");
    }
    Ok(())
}
