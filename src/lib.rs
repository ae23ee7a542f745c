pub mod em;
pub mod emission;
pub mod hmm;
pub mod io;
pub mod kmeans;
pub mod mixture;
pub mod model;
pub mod progress;
pub mod report;
pub mod utils;
pub mod viterbi;

pub use emission::{CovarianceKind, Emission, EmissionModel, Gaussian, SphericalGaussian};
pub use model::HmmModel;
