use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// `log(sum(exp(vals)))`; an empty or all -inf slice gives -inf.
pub fn logsumexp(vals: &[f64]) -> f64 {
    logsumexp_lane(ArrayView1::from(vals))
}

/// Same reduction over a possibly strided lane.
pub fn logsumexp_lane(lane: ArrayView1<f64>) -> f64 {
    let max = lane.iter().fold(f64::NEG_INFINITY, |m, &v| if v > m { v } else { m });
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = lane.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// `log(sum(exp(a)))` along `axis`, one value per lane of the other axis.
///
/// A lane holding only -inf reduces to -inf rather than NaN.
pub fn logsumexp_axis(a: ArrayView2<f64>, axis: Axis) -> Array1<f64> {
    a.map_axis(axis, logsumexp_lane)
}
