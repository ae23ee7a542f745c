use anyhow::{Context, Result, bail};
use ndarray::ArrayView2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One line of the log-likelihood summary.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub name: String,
    pub loglike_train: f64,
    pub loglike_test: Option<f64>,
}

fn fmt_ll(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{v:.3}"),
        Some(v) => format!("{v}"),
        None => "-".to_string(),
    }
}

pub fn summary_table(rows: &[SummaryRow]) -> String {
    let mut out = format!("{:<14} {:>14} {:>14}\n", "", "train", "test");
    for row in rows {
        out.push_str(&format!(
            "{:<14} {:>14} {:>14}\n",
            row.name,
            fmt_ll(Some(row.loglike_train)),
            fmt_ll(row.loglike_test)
        ));
    }
    out
}

/// Most probable state of every row of `tau` (lowest index on ties).
pub fn map_states(tau: ArrayView2<f64>) -> Vec<usize> {
    tau.rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for k in 1..row.len() {
                if row[k] > row[best] {
                    best = k;
                }
            }
            best
        })
        .collect()
}

/// Fraction of steps where the marginal MAP state equals the Viterbi state.
pub fn viterbi_agreement(tau: ArrayView2<f64>, viterbi_states: &[usize]) -> Result<f64> {
    if tau.nrows() != viterbi_states.len() {
        bail!(
            "posterior rows {} do not match viterbi length {}",
            tau.nrows(),
            viterbi_states.len()
        );
    }
    if viterbi_states.is_empty() {
        bail!("cannot compare empty state sequences");
    }
    let same = map_states(tau)
        .iter()
        .zip(viterbi_states)
        .filter(|(a, b)| a == b)
        .count();
    Ok(same as f64 / viterbi_states.len() as f64)
}

/// Per-step posterior track: observation, Viterbi state, marginal MAP state
/// and the posterior of every state.
pub fn write_posterior_tsv(
    path: &Path,
    x: ArrayView2<f64>,
    tau: ArrayView2<f64>,
    viterbi_states: &[usize],
) -> Result<()> {
    let (n_obs, dim) = x.dim();
    if tau.nrows() != n_obs || viterbi_states.len() != n_obs {
        bail!(
            "posterior rows {} and viterbi length {} must match {} observations",
            tau.nrows(),
            viterbi_states.len(),
            n_obs
        );
    }
    let n_states = tau.ncols();

    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut w = BufWriter::new(file);

    let mut header = vec!["t".to_string()];
    header.extend((0..dim).map(|d| format!("x{d}")));
    header.push("viterbi_state".to_string());
    header.push("map_state".to_string());
    header.extend((0..n_states).map(|k| format!("p{k}")));
    writeln!(w, "{}", header.join("\t"))?;

    let map = map_states(tau);
    for (t, map_state) in map.into_iter().enumerate() {
        let mut fields = vec![t.to_string()];
        fields.extend(x.row(t).iter().map(|v| v.to_string()));
        fields.push(viterbi_states[t].to_string());
        fields.push(map_state.to_string());
        fields.extend(tau.row(t).iter().map(|p| format!("{p:.6}")));
        writeln!(w, "{}", fields.join("\t"))?;
    }
    w.flush().with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
