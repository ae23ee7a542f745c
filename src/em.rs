use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::emission::Emission;
use crate::hmm::{ForwardBackward, alpha_beta};
use crate::model::{HmmModel, uniform_transitions};
use crate::progress;

#[derive(Debug, Clone)]
pub struct EmConfig {
    /// Exact number of EM iterations; there is no early stopping.
    pub n_iter: usize,
    pub progress: bool,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            n_iter: 10,
            progress: false,
        }
    }
}

/// Log-likelihood after initialization and after every iteration.
/// `loglike_test` stays empty when no held-out sequence is given.
#[derive(Debug, Clone, Default)]
pub struct EmHistory {
    pub loglike_train: Vec<f64>,
    pub loglike_test: Vec<f64>,
}

impl EmHistory {
    fn with_capacity(n: usize) -> Self {
        Self {
            loglike_train: Vec::with_capacity(n),
            loglike_test: Vec::with_capacity(n),
        }
    }

    pub(crate) fn record(&mut self, train: f64, test: Option<f64>) {
        self.loglike_train.push(train);
        if let Some(v) = test {
            self.loglike_test.push(v);
        }
    }

    pub fn last_train(&self) -> Option<f64> {
        self.loglike_train.last().copied()
    }

    pub fn last_test(&self) -> Option<f64> {
        self.loglike_test.last().copied()
    }
}

#[derive(Debug, Clone)]
pub struct EmFit<E> {
    pub model: HmmModel<E>,
    /// Posterior state probabilities of the training sequence under `model`.
    pub tau: Array2<f64>,
    pub history: EmHistory,
}

fn evaluate<E: Emission>(
    x: ArrayView2<f64>,
    x_test: Option<ArrayView2<f64>>,
    pi: ArrayView1<f64>,
    a: ArrayView2<f64>,
    emissions: &[E],
) -> Result<(ForwardBackward, Option<f64>)> {
    let (train, test) = rayon::join(
        || alpha_beta(x, pi, a, emissions),
        || {
            x_test
                .map(|xt| alpha_beta(xt, pi, a, emissions).map(|fb| fb.log_likelihood()))
                .transpose()
        },
    );
    let test = test.context("held-out forward-backward failed")?;
    Ok((train?, test))
}

pub(crate) fn normalized(p: ArrayView1<f64>) -> Result<Array1<f64>> {
    let total = p.sum();
    if !(total > 0.0 && total.is_finite()) {
        bail!("cannot normalize a distribution with total mass {total}");
    }
    Ok(&p / total)
}

/// Sums the pairwise posteriors over time and row-normalizes. A row with no
/// mass (the state is never occupied before the last step) keeps its
/// previous value.
fn reestimate_transitions(tau_pairs: &Array3<f64>, previous: ArrayView2<f64>) -> Array2<f64> {
    let counts = tau_pairs.sum_axis(Axis(0));
    let mut a = previous.to_owned();
    for (i, row) in counts.rows().into_iter().enumerate() {
        let total = row.sum();
        if total > 0.0 {
            a.row_mut(i).assign(&(&row / total));
        }
    }
    a
}

/// Refits emission `j` against column `j` of `tau`, one state per task.
pub(crate) fn refit_emissions<E: Emission>(
    x: ArrayView2<f64>,
    tau: ArrayView2<f64>,
    emissions: &mut [E],
) -> Result<()> {
    emissions
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(j, e)| {
            e.max_likelihood(x, tau.column(j))
                .with_context(|| format!("refit of state {j} failed"))
        })
}

/// Baum-Welch training for a fixed number of iterations.
///
/// The transition matrix starts uniform. `pi` and `init_emissions` are
/// copied, never mutated. Both traces have `n_iter + 1` entries, the first
/// one measured before any M-step.
pub fn em_train<E: Emission + Clone>(
    x: ArrayView2<f64>,
    pi: ArrayView1<f64>,
    init_emissions: &[E],
    x_test: Option<ArrayView2<f64>>,
    config: &EmConfig,
) -> Result<EmFit<E>> {
    let mut pi = pi.to_owned();
    let mut emissions = init_emissions.to_vec();
    let mut a = uniform_transitions(emissions.len())?;
    let mut history = EmHistory::with_capacity(config.n_iter + 1);

    let (mut fb, test_ll) = evaluate(x, x_test, pi.view(), a.view(), &emissions)?;
    history.record(fb.log_likelihood(), test_ll);
    debug!(loglike_train = fb.log_likelihood(), ?test_ll, "HMM EM initial state");

    let pb = progress::maybe_iterations(config.progress, config.n_iter, "HMM EM");
    for iter in 0..config.n_iter {
        // E-step
        let tau = fb.smoothing()?.mapv(f64::exp);
        let tau_pairs = fb.pairwise_smoothing()?.mapv(f64::exp);

        // M-step
        pi = normalized(tau.row(0))?;
        a = reestimate_transitions(&tau_pairs, a.view());
        refit_emissions(x, tau.view(), &mut emissions)?;

        let (next, test_ll) = evaluate(x, x_test, pi.view(), a.view(), &emissions)
            .with_context(|| format!("EM iteration {}", iter + 1))?;
        fb = next;
        let ll = fb.log_likelihood();
        history.record(ll, test_ll);
        debug!(iteration = iter + 1, loglike_train = ll, ?test_ll, "HMM EM iteration");

        if let Some(pb) = &pb {
            pb.set_message(format!("loglike {ll:.3}"));
            pb.inc(1);
        }
    }
    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }

    let tau = fb.smoothing()?.mapv(f64::exp);
    info!(
        n_iter = config.n_iter,
        loglike_train = ?history.last_train(),
        loglike_test = ?history.last_test(),
        "HMM EM finished"
    );

    Ok(EmFit {
        model: HmmModel {
            pi,
            transition: a,
            emissions,
        },
        tau,
        history,
    })
}
