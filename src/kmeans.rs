use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::SmallRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use crate::emission::{CovarianceKind, EmissionModel};
use crate::model::check_observations;

#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub max_iter: usize,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self { max_iter: 100 }
    }
}

#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub assignments: Vec<usize>,
    pub centers: Array2<f64>,
    /// Sum of squared distances from each point to its center.
    pub inertia: f64,
}

fn sq_dist(a: impl Iterator<Item = f64>, b: impl Iterator<Item = f64>) -> f64 {
    a.zip(b).map(|(u, v)| (u - v) * (u - v)).sum()
}

fn assign(x: ArrayView2<f64>, centers: ArrayView2<f64>) -> (Vec<usize>, f64) {
    let mut inertia = 0.0;
    let assignments = x
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = (0, f64::INFINITY);
            for (c, center) in centers.rows().into_iter().enumerate() {
                let d = sq_dist(row.iter().copied(), center.iter().copied());
                if d < best.1 {
                    best = (c, d);
                }
            }
            inertia += best.1;
            best.0
        })
        .collect();
    (assignments, inertia)
}

/// Lloyd's algorithm seeded with `k` distinct observations. A cluster that
/// loses all its points keeps its previous center.
pub fn kmeans<R: Rng + ?Sized>(
    x: ArrayView2<f64>,
    k: usize,
    config: &KMeansConfig,
    rng: &mut R,
) -> Result<KMeansResult> {
    check_observations(x)?;
    let (n, d) = x.dim();
    if k == 0 {
        bail!("k must be > 0");
    }
    if k > n {
        bail!("cannot form {k} clusters from {n} observations");
    }

    let mut centers = Array2::zeros((k, d));
    for (c, idx) in sample(rng, n, k).iter().enumerate() {
        centers.row_mut(c).assign(&x.row(idx));
    }

    let mut assignments: Vec<usize> = Vec::new();
    for _ in 0..config.max_iter {
        let (next, _) = assign(x, centers.view());
        if next == assignments {
            break;
        }
        assignments = next;

        let mut sums = Array2::<f64>::zeros((k, d));
        let mut counts = vec![0usize; k];
        for (row, &c) in x.rows().into_iter().zip(assignments.iter()) {
            let mut acc = sums.row_mut(c);
            acc += &row;
            counts[c] += 1;
        }
        for (c, &count) in counts.iter().enumerate() {
            if count > 0 {
                let mean = &sums.row(c) / count as f64;
                centers.row_mut(c).assign(&mean);
            }
        }
    }

    let (assignments, inertia) = assign(x, centers.view());
    Ok(KMeansResult {
        assignments,
        centers,
        inertia,
    })
}

/// Runs [`kmeans`] `n_trials` times from one seeded generator and keeps the
/// lowest-inertia result.
pub fn kmeans_best_of_n(
    x: ArrayView2<f64>,
    k: usize,
    n_trials: usize,
    config: &KMeansConfig,
    seed: u64,
) -> Result<KMeansResult> {
    if n_trials == 0 {
        bail!("n_trials must be > 0");
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut best = kmeans(x, k, config, &mut rng)?;
    for _ in 1..n_trials {
        let run = kmeans(x, k, config, &mut rng)?;
        if run.inertia < best.inertia {
            best = run;
        }
    }
    Ok(best)
}

/// Initial distribution from cluster proportions and unit-covariance
/// emissions centred on the cluster centers.
pub fn initial_parameters(
    clusters: &KMeansResult,
    kind: CovarianceKind,
) -> Result<(Array1<f64>, Vec<EmissionModel>)> {
    let k = clusters.centers.nrows();
    let mut counts = vec![0usize; k];
    for &c in &clusters.assignments {
        if c >= k {
            bail!("assignment {c} out of range for {k} clusters");
        }
        counts[c] += 1;
    }
    if let Some(c) = counts.iter().position(|&n| n == 0) {
        bail!("cluster {c} is empty; try fewer states or another seed");
    }
    let n = clusters.assignments.len() as f64;
    let pi = counts.iter().map(|&c| c as f64 / n).collect::<Array1<f64>>();
    let emissions = clusters
        .centers
        .rows()
        .into_iter()
        .map(|center| EmissionModel::unit(kind, center.to_owned()))
        .collect();
    Ok((pi, emissions))
}
