use anyhow::Result;
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::emission::Emission;
use crate::hmm::log_emissions;
use crate::model::{check_observations, check_parameters};

#[derive(Debug, Clone, PartialEq)]
pub struct ViterbiPath {
    /// Most likely state index at each time step, chronological.
    pub states: Vec<usize>,
    /// Joint log-probability of `states` and the observations.
    pub log_prob: f64,
}

/// Index of the largest value; ties go to the lowest index. NaN never wins.
fn argmax(vals: impl Iterator<Item = f64>) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in vals.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

/// MAP state sequence by max-sum dynamic programming with back-pointers.
pub fn viterbi<E: Emission>(
    x: ArrayView2<f64>,
    pi: ArrayView1<f64>,
    a: ArrayView2<f64>,
    emissions: &[E],
) -> Result<ViterbiPath> {
    check_observations(x)?;
    check_parameters(pi, a, emissions.len())?;

    let lem = log_emissions(x, emissions)?;
    let log_a = a.mapv(f64::ln);
    let (n_obs, n_states) = lem.dim();

    let mut lgamma = Array2::zeros((n_obs, n_states));
    let mut back = Array2::<usize>::zeros((n_obs, n_states));
    lgamma.row_mut(0).assign(&(&pi.mapv(f64::ln) + &lem.row(0)));

    for t in 1..n_obs {
        for k in 0..n_states {
            let (best_i, best) = argmax((0..n_states).map(|i| lgamma[(t - 1, i)] + log_a[(i, k)]));
            lgamma[(t, k)] = best + lem[(t, k)];
            back[(t, k)] = best_i;
        }
    }

    let (last, log_prob) = argmax(lgamma.row(n_obs - 1).iter().copied());
    let mut states = vec![last; n_obs];
    for t in (1..n_obs).rev() {
        states[t - 1] = back[(t, states[t])];
    }

    Ok(ViterbiPath { states, log_prob })
}
