use hmm_em::emission::COVARIANCE_RIDGE;
use hmm_em::{CovarianceKind, Emission, EmissionModel, Gaussian, SphericalGaussian};
use ndarray::{Array1, array};
use std::f64::consts::PI;

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

#[test]
fn gaussian_log_pdf_matches_closed_form() {
    let g = Gaussian::new(array![1.0, -1.0], array![[2.0, 0.0], [0.0, 0.5]]).expect("gaussian");
    let x = array![[1.0, -1.0], [2.0, -1.0]];
    let lp = g.log_pdf(x.view()).expect("log_pdf failed");
    // det = 1, so the peak is -log(2*pi)
    approx_eq(lp[0], -(2.0 * PI).ln(), 1e-12);
    approx_eq(lp[1], -(2.0 * PI).ln() - 0.25, 1e-12);

    let corr = Gaussian::new(array![0.0, 0.0], array![[1.0, 0.5], [0.5, 1.0]]).expect("gaussian");
    let x = array![[1.0, 1.0]];
    // inverse of [[1, .5], [.5, 1]] is (4/3) [[1, -.5], [-.5, 1]]; quad form = 4/3
    let expected = -0.5 * (2.0 * (2.0 * PI).ln() + 0.75f64.ln() + 4.0 / 3.0);
    approx_eq(corr.log_pdf(x.view()).expect("log_pdf failed")[0], expected, 1e-12);
}

#[test]
fn gaussian_rejects_bad_covariance_and_dimension() {
    assert!(Gaussian::new(array![0.0, 0.0], array![[1.0, 2.0], [2.0, 1.0]]).is_err());
    assert!(Gaussian::new(array![0.0, 0.0], array![[1.0, 0.2], [0.1, 1.0]]).is_err());
    assert!(Gaussian::new(array![0.0], array![[1.0, 0.0], [0.0, 1.0]]).is_err());

    let g = Gaussian::with_identity(array![0.0, 0.0]);
    let x = array![[1.0, 2.0, 3.0]];
    assert!(g.log_pdf(x.view()).is_err());
}

#[test]
fn weighted_refit_ignores_zero_weight_points() {
    let mut g = Gaussian::with_identity(array![5.0, 5.0]);
    let x = array![[0.0, 0.0], [2.0, 2.0], [100.0, -100.0]];
    let w = array![1.0, 1.0, 0.0];
    g.max_likelihood(x.view(), w.view()).expect("refit failed");
    approx_eq(g.mean()[0], 1.0, 1e-12);
    approx_eq(g.mean()[1], 1.0, 1e-12);
    let c = g.covariance();
    approx_eq(c[(0, 0)], 1.0 + COVARIANCE_RIDGE, 1e-12);
    approx_eq(c[(0, 1)], 1.0, 1e-12);
    approx_eq(c[(1, 0)], 1.0, 1e-12);
    approx_eq(c[(1, 1)], 1.0 + COVARIANCE_RIDGE, 1e-12);
}

#[test]
fn refit_is_invariant_to_weight_scale() {
    let x = array![[0.3, 1.0], [1.7, -0.2], [2.2, 0.4], [0.9, 0.9]];
    let w = array![0.1, 0.4, 0.2, 0.3];
    let mut a = Gaussian::with_identity(array![0.0, 0.0]);
    let mut b = a.clone();
    a.max_likelihood(x.view(), w.view()).expect("refit failed");
    b.max_likelihood(x.view(), (&w * 7.5).view()).expect("refit failed");
    for (p, q) in a.mean().iter().zip(b.mean().iter()) {
        approx_eq(*p, *q, 1e-12);
    }
    for (p, q) in a.covariance().iter().zip(b.covariance().iter()) {
        approx_eq(*p, *q, 1e-12);
    }
}

#[test]
fn zero_weights_fail_and_leave_parameters_untouched() {
    let x = array![[0.0, 1.0], [2.0, 3.0]];
    let zeros = Array1::<f64>::zeros(2);

    let mut g = Gaussian::with_identity(array![0.5, 0.5]);
    let before = g.clone();
    let err = g.max_likelihood(x.view(), zeros.view()).expect_err("zero weights must fail");
    assert!(err.to_string().contains("weights sum to zero"));
    assert_eq!(g, before);

    let mut s = SphericalGaussian::new(array![0.5, 0.5], 2.0).expect("spherical");
    let before = s.clone();
    assert!(s.max_likelihood(x.view(), zeros.view()).is_err());
    assert_eq!(s, before);
}

#[test]
fn invalid_weights_are_rejected() {
    let x = array![[0.0], [1.0]];
    let mut g = Gaussian::with_identity(array![0.0]);
    assert!(g.max_likelihood(x.view(), array![1.0, -0.5].view()).is_err());
    assert!(g.max_likelihood(x.view(), array![1.0, f64::NAN].view()).is_err());
    assert!(g.max_likelihood(x.view(), array![1.0].view()).is_err());
}

#[test]
fn spherical_refit_pools_variance_over_dimensions() {
    let mut s = SphericalGaussian::new(array![0.0, 0.0], 1.0).expect("spherical");
    let x = array![[1.0, 1.0], [-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0]];
    let w = array![1.0, 1.0, 1.0, 1.0];
    s.max_likelihood(x.view(), w.view()).expect("refit failed");
    approx_eq(s.mean()[0], 0.0, 1e-12);
    approx_eq(s.mean()[1], 0.0, 1e-12);
    approx_eq(s.variance(), 1.0 + COVARIANCE_RIDGE, 1e-12);

    let lp = s.log_pdf(array![[0.0, 0.0]].view()).expect("log_pdf failed");
    approx_eq(lp[0], -(2.0 * PI * s.variance()).ln(), 1e-12);
    assert!(SphericalGaussian::new(array![0.0], 0.0).is_err());
}

#[test]
fn emission_model_dispatches_to_its_family() {
    let full = EmissionModel::unit(CovarianceKind::Full, array![0.0, 0.0]);
    let spherical = EmissionModel::unit(CovarianceKind::Spherical, array![0.0, 0.0]);
    let x = array![[0.5, -0.5], [1.0, 2.0]];
    let a = full.log_pdf(x.view()).expect("log_pdf failed");
    let b = spherical.log_pdf(x.view()).expect("log_pdf failed");
    for (p, q) in a.iter().zip(b.iter()) {
        approx_eq(*p, *q, 1e-12);
    }
    assert!(matches!(full, EmissionModel::Full(_)));
    assert!(matches!(spherical, EmissionModel::Spherical(_)));
    assert_eq!(full.mean(), &array![0.0, 0.0]);
}
