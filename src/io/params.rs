use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::em::EmFit;
use crate::emission::EmissionModel;
use crate::model::HmmModel;

/// Trained model as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmParamsFile {
    pub n_states: usize,
    pub pi: Vec<f64>,
    pub transition: Vec<Vec<f64>>,
    pub emissions: Vec<EmissionModel>,
    #[serde(default)]
    pub loglike_train: Vec<f64>,
    #[serde(default)]
    pub loglike_test: Vec<f64>,
}

impl HmmParamsFile {
    pub fn from_fit(fit: &EmFit<EmissionModel>) -> Self {
        let model = &fit.model;
        Self {
            n_states: model.n_states(),
            pi: model.pi.to_vec(),
            transition: model.transition.rows().into_iter().map(|r| r.to_vec()).collect(),
            emissions: model.emissions.clone(),
            loglike_train: fit.history.loglike_train.clone(),
            loglike_test: fit.history.loglike_test.clone(),
        }
    }

    pub fn into_model(self) -> Result<HmmModel<EmissionModel>> {
        let k = self.n_states;
        if self.transition.len() != k {
            bail!("transition has {} rows, expected {}", self.transition.len(), k);
        }
        let mut flat = Vec::with_capacity(k * k);
        for (i, row) in self.transition.iter().enumerate() {
            if row.len() != k {
                bail!("transition row {} has {} entries, expected {}", i, row.len(), k);
            }
            flat.extend_from_slice(row);
        }
        let transition = Array2::from_shape_vec((k, k), flat).context("failed to reshape transition")?;
        if let Some(first) = self.emissions.first() {
            let d = first.mean().len();
            if let Some((j, e)) = self.emissions.iter().enumerate().find(|(_, e)| e.mean().len() != d) {
                bail!("emission {} has dimension {}, expected {}", j, e.mean().len(), d);
            }
        }
        HmmModel::new(Array1::from(self.pi), transition, self.emissions)
    }
}

pub fn save_params(path: &Path, params: &HmmParamsFile) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, params)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_params(path: &Path) -> Result<HmmParamsFile> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let params =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    Ok(params)
}
