//! Phase-plane trajectory density (Van Geit et al. 2007).
//!
//! A trace is mapped to its `(v, dV/dt)` trajectory and binned into a 2-D
//! histogram. Two traces are compared by the distance between their
//! normalized histograms, which is insensitive to spike timing.

use crate::FeatureError;
use ndarray::{Array1, Array2};

/// Default number of bins per axis
pub const PPTD_BINS: usize = 10;

/// Voltage against its time derivative, one sample shorter than the trace.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlane {
    pub v: Vec<f64>,
    pub dvdt: Vec<f64>,
}

impl PhasePlane {
    /// Keep only the samples whose derivative is above `threshold`.
    pub fn above(self, threshold: f64) -> Self {
        let (v, dvdt) = self
            .v
            .into_iter()
            .zip(self.dvdt)
            .filter(|&(_, d)| d > threshold)
            .unzip();
        Self { v, dvdt }
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }
}

/// Phase plane of a trace: `(v[..n-1], diff(v) / diff(t))`.
pub fn phase_plane(t: &[f64], v: &[f64]) -> PhasePlane {
    let n = t.len().min(v.len());
    if n < 2 {
        return PhasePlane {
            v: Vec::new(),
            dvdt: Vec::new(),
        };
    }
    let dvdt = (1..n)
        .map(|i| (v[i] - v[i - 1]) / (t[i] - t[i - 1]))
        .collect();
    PhasePlane {
        v: v[..n - 1].to_vec(),
        dvdt,
    }
}

/// Histogram of a phase plane; rows are dV/dt bins, columns voltage bins.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlaneDensity {
    pub counts: Array2<f64>,
    pub dvdt_edges: Array1<f64>,
    pub v_edges: Array1<f64>,
    dvdt_range: (f64, f64),
    v_range: (f64, f64),
}

impl PhasePlaneDensity {
    pub fn total(&self) -> f64 {
        self.counts.sum()
    }

    /// Axis ranges `[(dvdt_min, dvdt_max), (v_min, v_max)]` used for binning.
    ///
    /// These are the exact bounds, not the interpolated outer edges, so
    /// rebinning the same samples over them reproduces the same counts.
    pub fn range(&self) -> [(f64, f64); 2] {
        [self.dvdt_range, self.v_range]
    }
}

fn data_range(values: &[f64]) -> Option<(f64, f64)> {
    let mut finite = values.iter().copied().filter(|x| x.is_finite());
    let first = finite.next()?;
    let (lo, hi) = finite.fold((first, first), |(lo, hi), x| (lo.min(x), hi.max(x)));
    if lo == hi {
        Some((lo - 0.5, hi + 0.5))
    } else {
        Some((lo, hi))
    }
}

fn edges(range: (f64, f64), bins: usize) -> Array1<f64> {
    Array1::linspace(range.0, range.1, bins + 1)
}

/// Bin of `x` in `[lo, hi]`, the right edge belonging to the last bin.
fn bin_of(x: f64, (lo, hi): (f64, f64), bins: usize) -> Option<usize> {
    if !x.is_finite() || x < lo || x > hi {
        return None;
    }
    if x == hi {
        return Some(bins - 1);
    }
    let bin = ((x - lo) / (hi - lo) * bins as f64) as usize;
    Some(bin.min(bins - 1))
}

/// Phase-plane trajectory density of a trace.
///
/// Without a `range` the bins span the trajectory itself. Samples outside an
/// explicit range, or with non-finite coordinates, are not counted.
pub fn pptd(
    t: &[f64],
    v: &[f64],
    bins: usize,
    range: Option<[(f64, f64); 2]>,
    dvdt_threshold: Option<f64>,
) -> Result<PhasePlaneDensity, FeatureError> {
    if bins == 0 {
        return Err(FeatureError::EmptyDensity("zero bins"));
    }

    let mut plane = phase_plane(t, v);
    if let Some(threshold) = dvdt_threshold {
        plane = plane.above(threshold);
    }

    let [dvdt_range, v_range] = match range {
        Some(r) => r,
        None => [
            data_range(&plane.dvdt).ok_or(FeatureError::EmptyDensity("no finite samples"))?,
            data_range(&plane.v).ok_or(FeatureError::EmptyDensity("no finite samples"))?,
        ],
    };

    let mut counts = Array2::zeros((bins, bins));
    for (&x, &y) in plane.dvdt.iter().zip(&plane.v) {
        if let (Some(row), Some(col)) = (bin_of(x, dvdt_range, bins), bin_of(y, v_range, bins)) {
            counts[[row, col]] += 1.0;
        }
    }

    Ok(PhasePlaneDensity {
        counts,
        dvdt_edges: edges(dvdt_range, bins),
        v_edges: edges(v_range, bins),
        dvdt_range,
        v_range,
    })
}

/// Distance between the phase-plane densities of a model and a target trace.
///
/// Both traces are binned on the target's own edges and each histogram is
/// normalized by its total; the error is `(Σ sqrt|T - M|)²`. Identical
/// trajectories give 0.
pub fn pptd_error(
    t_model: &[f64],
    v_model: &[f64],
    t_target: &[f64],
    v_target: &[f64],
    dvdt_threshold: Option<f64>,
) -> Result<f64, FeatureError> {
    let target = pptd(t_target, v_target, PPTD_BINS, None, dvdt_threshold)?;
    let model = pptd(
        t_model,
        v_model,
        PPTD_BINS,
        Some(target.range()),
        dvdt_threshold,
    )?;

    let n_target = target.total();
    let n_model = model.total();
    if n_target == 0.0 {
        return Err(FeatureError::EmptyDensity("target"));
    }
    if n_model == 0.0 {
        return Err(FeatureError::EmptyDensity("model outside target range"));
    }

    let summed: f64 = target
        .counts
        .iter()
        .zip(model.counts.iter())
        .map(|(&tc, &mc)| (tc / n_target - mc / n_model).abs().sqrt())
        .sum();

    Ok(summed * summed)
}
