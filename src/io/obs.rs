use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

fn read_to_string(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read {:?}", path))?;
    Ok(content)
}

/// Reads a T x D observation matrix: one whitespace-separated row per line.
/// Blank lines and lines starting with `#` are skipped.
pub fn read_observations(path: &Path) -> Result<Array2<f64>> {
    let content = read_to_string(path)?;
    parse_observations(&content).with_context(|| format!("invalid observations in {:?}", path))
}

pub fn parse_observations(content: &str) -> Result<Array2<f64>> {
    let mut data = Vec::new();
    let mut dim = None;
    let mut rows = 0usize;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = data.len();
        for field in line.split_whitespace() {
            let v: f64 = field
                .parse()
                .with_context(|| format!("line {}: cannot parse {:?} as a number", lineno + 1, field))?;
            if !v.is_finite() {
                bail!("line {}: non-finite value {}", lineno + 1, v);
            }
            data.push(v);
        }
        let n = data.len() - before;
        match dim {
            None => dim = Some(n),
            Some(d) if d != n => {
                bail!("line {} has {} columns, expected {}", lineno + 1, n, d)
            }
            Some(_) => {}
        }
        rows += 1;
    }
    let Some(dim) = dim else {
        bail!("no observations found");
    };
    Array2::from_shape_vec((rows, dim), data).context("failed to reshape observations")
}
