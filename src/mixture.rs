//! Plain mixture EM: the same emission families with no temporal
//! dependence between observations. Used as a baseline next to the HMM and
//! to warm-start its emissions.

use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use tracing::{debug, info};

use crate::em::{EmConfig, EmHistory, normalized, refit_emissions};
use crate::emission::Emission;
use crate::hmm::log_emissions;
use crate::model::{check_distribution, check_observations};
use crate::progress;
use crate::utils::logsumexp_axis;

#[derive(Debug, Clone)]
pub struct MixtureFit<E> {
    pub weights: Array1<f64>,
    pub emissions: Vec<E>,
    /// Per-observation component responsibilities under the final parameters.
    pub tau: Array2<f64>,
    pub history: EmHistory,
}

struct Responsibilities {
    log_tau: Array2<f64>,
    loglike: f64,
}

fn responsibilities<E: Emission>(
    x: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    emissions: &[E],
) -> Result<Responsibilities> {
    check_observations(x)?;
    if weights.is_empty() {
        bail!("mixture has no components");
    }
    if weights.len() != emissions.len() {
        bail!(
            "got {} emission distributions for {} mixture weights",
            emissions.len(),
            weights.len()
        );
    }
    check_distribution("mixture weights", weights)?;

    let joint = log_emissions(x, emissions)? + &weights.mapv(f64::ln).insert_axis(Axis(0));
    let norm = logsumexp_axis(joint.view(), Axis(1));
    if let Some(t) = norm.iter().position(|v| *v == f64::NEG_INFINITY) {
        bail!("observation {t} has zero probability under every component");
    }
    let loglike = norm.sum();
    Ok(Responsibilities {
        log_tau: joint - &norm.insert_axis(Axis(1)),
        loglike,
    })
}

/// Total log-likelihood of i.i.d. observations under the mixture.
pub fn mixture_log_likelihood<E: Emission>(
    x: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    emissions: &[E],
) -> Result<f64> {
    Ok(responsibilities(x, weights, emissions)?.loglike)
}

fn evaluate<E: Emission>(
    x: ArrayView2<f64>,
    x_test: Option<ArrayView2<f64>>,
    weights: ArrayView1<f64>,
    emissions: &[E],
) -> Result<(Responsibilities, Option<f64>)> {
    let (train, test) = rayon::join(
        || responsibilities(x, weights, emissions),
        || {
            x_test
                .map(|xt| mixture_log_likelihood(xt, weights, emissions))
                .transpose()
        },
    );
    Ok((train?, test?))
}

/// Fixed-budget mixture EM. Inputs are copied; traces have `n_iter + 1`
/// entries.
pub fn em_mixture<E: Emission + Clone>(
    x: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    init_emissions: &[E],
    x_test: Option<ArrayView2<f64>>,
    config: &EmConfig,
) -> Result<MixtureFit<E>> {
    let mut weights = weights.to_owned();
    let mut emissions = init_emissions.to_vec();
    let mut history = EmHistory::default();

    let (mut resp, test_ll) = evaluate(x, x_test, weights.view(), &emissions)?;
    history.record(resp.loglike, test_ll);

    let pb = progress::maybe_iterations(config.progress, config.n_iter, "Mixture EM");
    for iter in 0..config.n_iter {
        let tau = resp.log_tau.mapv(f64::exp);
        weights = normalized(tau.sum_axis(Axis(0)).view())?;
        refit_emissions(x, tau.view(), &mut emissions)?;

        let (next, test_ll) = evaluate(x, x_test, weights.view(), &emissions)?;
        resp = next;
        history.record(resp.loglike, test_ll);
        debug!(iteration = iter + 1, loglike_train = resp.loglike, ?test_ll, "mixture EM iteration");

        if let Some(pb) = &pb {
            pb.set_message(format!("loglike {:.3}", resp.loglike));
            pb.inc(1);
        }
    }
    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    info!(
        n_iter = config.n_iter,
        loglike_train = ?history.last_train(),
        loglike_test = ?history.last_test(),
        "mixture EM finished"
    );

    Ok(MixtureFit {
        weights,
        emissions,
        tau: resp.log_tau.mapv(f64::exp),
        history,
    })
}
