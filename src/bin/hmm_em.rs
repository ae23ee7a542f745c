use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use hmm_em::em::{EmConfig, em_train};
use hmm_em::io::obs::read_observations;
use hmm_em::io::params::{HmmParamsFile, save_params};
use hmm_em::kmeans::{KMeansConfig, initial_parameters, kmeans_best_of_n};
use hmm_em::mixture::em_mixture;
use hmm_em::progress;
use hmm_em::report::{SummaryRow, summary_table, viterbi_agreement, write_posterior_tsv};
use hmm_em::CovarianceKind;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Covariance {
    Full,
    Spherical,
}

impl From<Covariance> for CovarianceKind {
    fn from(c: Covariance) -> Self {
        match c {
            Covariance::Full => CovarianceKind::Full,
            Covariance::Spherical => CovarianceKind::Spherical,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hmm-em")]
#[command(about = "Gaussian-emission HMM: EM training, smoothing and Viterbi decoding", long_about = None)]
struct Cli {
    train_file: PathBuf,
    output_file: PathBuf,
    #[arg(long, help = "Held-out observations scored after every iteration")]
    test: Option<PathBuf>,
    #[arg(long, default_value_t = 4)]
    states: usize,
    #[arg(long, default_value_t = 10)]
    n_iter: usize,
    #[arg(long, default_value_t = 40, help = "EM iterations for the mixture warm start")]
    mixture_iters: usize,
    #[arg(long, default_value_t = 5)]
    kmeans_trials: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, value_enum, default_value_t = Covariance::Full)]
    covariance: Covariance,
    #[arg(long, help = "Write per-step posteriors and Viterbi states of the training data")]
    posterior_out: Option<PathBuf>,
    #[arg(long, requires = "test", help = "Write per-step posteriors and Viterbi states of the test data")]
    test_posterior_out: Option<PathBuf>,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long)]
    no_progress: bool,
}

fn load(path: &Path, show_progress: bool) -> Result<ndarray::Array2<f64>> {
    let pb = show_progress.then(|| progress::spinner("IO", &format!("Reading {}", path.display())));
    let x = read_observations(path).with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(pb) = pb {
        pb.finish_with_message(format!("Read {} x {} observations", x.nrows(), x.ncols()));
    }
    Ok(x)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hmm_em=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(n_threads) = cli.threads {
        if n_threads == 0 {
            bail!("--threads must be >= 1");
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| anyhow!("failed to configure Rayon global thread pool: {e}"))?;
    }
    if cli.states == 0 {
        bail!("--states must be >= 1");
    }
    let show_progress = !cli.no_progress;

    let x = load(&cli.train_file, show_progress)?;
    let x_test = match &cli.test {
        Some(path) => {
            let xt = load(path, show_progress)?;
            if xt.ncols() != x.ncols() {
                bail!(
                    "test observations have {} dimensions, training has {}",
                    xt.ncols(),
                    x.ncols()
                );
            }
            Some(xt)
        }
        None => None,
    };

    let clusters = kmeans_best_of_n(
        x.view(),
        cli.states,
        cli.kmeans_trials,
        &KMeansConfig::default(),
        cli.seed,
    )?;
    let (weights, emissions) = initial_parameters(&clusters, cli.covariance.into())?;

    let mixture = em_mixture(
        x.view(),
        weights.view(),
        &emissions,
        x_test.as_ref().map(|xt| xt.view()),
        &EmConfig {
            n_iter: cli.mixture_iters,
            progress: show_progress,
        },
    )
    .context("mixture EM failed")?;

    let fit = em_train(
        x.view(),
        mixture.weights.view(),
        &mixture.emissions,
        x_test.as_ref().map(|xt| xt.view()),
        &EmConfig {
            n_iter: cli.n_iter,
            progress: show_progress,
        },
    )
    .context("HMM EM failed")?;

    let path = fit.model.viterbi(x.view())?;
    println!("Viterbi log-probability (train): {:.3}", path.log_prob);
    println!(
        "Marginal MAP vs Viterbi agreement (train): {:.3}",
        viterbi_agreement(fit.tau.view(), &path.states)?
    );
    if let Some(xt) = &x_test {
        let test_path = fit.model.viterbi(xt.view())?;
        let tau_test = fit.model.posteriors(xt.view()).context("test posteriors failed")?;
        println!("Viterbi log-probability (test): {:.3}", test_path.log_prob);
        println!(
            "Marginal MAP vs Viterbi agreement (test): {:.3}",
            viterbi_agreement(tau_test.view(), &test_path.states)?
        );
        if let Some(out) = &cli.test_posterior_out {
            write_posterior_tsv(out, xt.view(), tau_test.view(), &test_path.states)?;
            println!("Test posteriors: {}", out.display());
        }
    }

    save_params(&cli.output_file, &HmmParamsFile::from_fit(&fit))?;
    println!("Model: {}", cli.output_file.display());

    if let Some(out) = &cli.posterior_out {
        write_posterior_tsv(out, x.view(), fit.tau.view(), &path.states)?;
        println!("Posteriors: {}", out.display());
    }

    let rows = [
        SummaryRow {
            name: "General GMM".to_string(),
            loglike_train: mixture.history.last_train().unwrap_or(f64::NAN),
            loglike_test: mixture.history.last_test(),
        },
        SummaryRow {
            name: "HMM".to_string(),
            loglike_train: fit.history.last_train().unwrap_or(f64::NAN),
            loglike_test: fit.history.last_test(),
        },
    ];
    print!("{}", summary_table(&rows));
    Ok(())
}
