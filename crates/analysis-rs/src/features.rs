//! Spike train statistics and curve fits.
//!
//! Every function works on plain slices (spike times in ms, voltages in mV) so
//! they can be used outside of [`IClampAnalysis`](crate::IClampAnalysis).

use crate::extrema::TurningPoints;
use crate::FeatureError;
use nalgebra::{DMatrix, DVector};
use tracing::warn;

type FeatureResult = std::result::Result<f64, FeatureError>;

/// Offset keeping the log-transformed data of [`exp_fit`] finite
const EXP_FIT_EPSILON: f64 = 1e-9;

// ============================================================================
// FITS
// ============================================================================

/// Least-squares polynomial fit, coefficients from the highest power down.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> std::result::Result<Vec<f64>, FeatureError> {
    if x.len() != y.len() {
        return Err(FeatureError::LengthMismatch(x.len(), y.len()));
    }
    let n = x.len();
    let cols = degree + 1;
    if n < cols {
        return Err(FeatureError::InsufficientData {
            what: "polynomial fit",
            needed: cols,
            got: n,
        });
    }

    let vander = DMatrix::from_fn(n, cols, |r, c| x[r].powi((degree - c) as i32));

    // Column scaling keeps large time values from wrecking the conditioning
    let scale: Vec<f64> = (0..cols)
        .map(|c| {
            let norm = vander.column(c).norm();
            if norm > 0.0 {
                norm
            } else {
                1.0
            }
        })
        .collect();
    let scaled = DMatrix::from_fn(n, cols, |r, c| vander[(r, c)] / scale[c]);
    let rhs = DVector::from_column_slice(y);

    let svd = scaled.svd(true, true);
    let eps = svd.singular_values.max() * n as f64 * f64::EPSILON;
    let solution = svd.solve(&rhs, eps).map_err(FeatureError::FitFailed)?;

    let coefficients: Vec<f64> = (0..cols).map(|c| solution[c] / scale[c]).collect();
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(FeatureError::FitFailed("non-finite coefficients"));
    }
    Ok(coefficients)
}

/// Gradient `M` of the line `y = C + M x`.
pub fn linear_fit(t: &[f64], y: &[f64]) -> FeatureResult {
    polyfit(t, y, 1).map(|p| p[0])
}

/// Rate `K` of the exponential `y = A exp(K x)`.
///
/// The data is shifted to be positive before taking the logarithm, so only the
/// shape of the curve matters, not its offset.
pub fn exp_fit(t: &[f64], y: &[f64]) -> FeatureResult {
    let c = y.iter().copied().fold(f64::INFINITY, f64::min);
    let logged: Vec<f64> = y.iter().map(|&v| (v - c + EXP_FIT_EPSILON).ln()).collect();
    polyfit(t, &logged, 1).map(|p| p[0])
}

/// Linear gradient over the first three points only.
///
/// Initial action potential amplitudes may vary substantially and then
/// settle down; this captures the early trend.
pub fn three_spike_adaptation(t: &[f64], y: &[f64]) -> FeatureResult {
    let n = t.len().min(y.len()).min(3);
    linear_fit(&t[..n], &y[..n])
}

// ============================================================================
// SPIKE TIMING
// ============================================================================

pub(crate) fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

fn interspike_intervals(times: &[f64]) -> Vec<f64> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Instantaneous frequencies (Hz) and the time of the first spike of each pair.
pub fn spike_frequencies(times: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let frequencies = interspike_intervals(times)
        .into_iter()
        .map(|isi| 1000.0 / isi)
        .collect();
    let starts = times[..times.len().saturating_sub(1)].to_vec();
    (starts, frequencies)
}

/// Mean spike frequency (Hz) from the mean interspike interval; 0 with fewer
/// than two spikes.
pub fn mean_spike_frequency(times: &[f64]) -> f64 {
    if times.len() < 2 {
        return 0.0;
    }
    let frequency = 1000.0 / mean(&interspike_intervals(times));
    if frequency.is_finite() {
        frequency
    } else {
        0.0
    }
}

/// Coefficient of variation (population std / mean) of interspike intervals.
pub fn spike_covar(times: &[f64]) -> FeatureResult {
    if times.len() < 2 {
        return Err(FeatureError::InsufficientData {
            what: "interspike covariance",
            needed: 2,
            got: times.len(),
        });
    }
    let isis = interspike_intervals(times);
    let m = mean(&isis);
    let variance = isis.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / isis.len() as f64;
    Ok(variance.sqrt() / m)
}

/// Pearson correlation of spike times with their rank.
pub fn burst_analyser(times: &[f64]) -> FeatureResult {
    if times.len() < 2 {
        return Err(FeatureError::InsufficientData {
            what: "burst analysis",
            needed: 2,
            got: times.len(),
        });
    }
    let ranks: Vec<f64> = (0..times.len()).map(|i| i as f64).collect();
    let (mx, my) = (mean(&ranks), mean(times));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&x, &y) in ranks.iter().zip(times) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    Ok(sxy / (sxx * syy).sqrt())
}

/// Bursting measure B of van Elburg & van Ooyen (2004).
pub fn elburg_bursting(times: &[f64]) -> FeatureResult {
    if times.len() < 3 {
        return Err(FeatureError::InsufficientData {
            what: "Elburg bursting",
            needed: 3,
            got: times.len(),
        });
    }
    let isi_1 = interspike_intervals(times);
    let isi_2: Vec<f64> = isi_1.windows(2).map(|w| w[0] + w[1]).collect();

    let variance = |x: &[f64]| {
        let m = mean(x);
        x.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / x.len() as f64
    };
    let m = mean(&isi_1);

    Ok((2.0 * variance(&isi_1) - variance(&isi_2)) / (2.0 * m * m))
}

/// Phase of each minimum between its surrounding maxima (0 at the first
/// maximum, 1 at the second), paired with the minimum times.
pub fn minima_phases(points: &TurningPoints) -> (Vec<f64>, Vec<f64>) {
    let maxima = points.maxima();
    let phases = points
        .minima()
        .iter()
        .enumerate()
        .map(|(i, min)| {
            let (m0, m1) = (maxima[i].time, maxima[i + 1].time);
            (min.time - m0) / (m1 - m0)
        })
        .collect();
    (points.minima_times(), phases)
}

// ============================================================================
// SPIKE SHAPE
// ============================================================================

/// Linear interpolation of the time at which the trace passes `level`
/// between a sample at or below it and one above it.
fn crossing_time(level: f64, low: (f64, f64), high: (f64, f64)) -> f64 {
    let (t_low, v_low) = low;
    let (t_high, v_high) = high;
    t_low + (level - v_low) * (t_high - t_low) / (v_high - v_low)
}

/// Left and right baseline crossing times around the highest sample of `y`.
pub fn spike_crossings(
    y: &[f64],
    t: &[f64],
    baseline: f64,
) -> std::result::Result<(f64, f64), FeatureError> {
    let not_crossed = || FeatureError::BaselineNotCrossed { baseline };
    let n = y.len().min(t.len());

    let mut peak = 0;
    for i in 1..n {
        if y[i] > y[peak] {
            peak = i;
        }
    }
    if n == 0 || y[peak] <= baseline {
        return Err(not_crossed());
    }

    let mut left = peak;
    let left_time = loop {
        if left == 0 {
            return Err(not_crossed());
        }
        left -= 1;
        if y[left] <= baseline {
            break crossing_time(baseline, (t[left], y[left]), (t[left + 1], y[left + 1]));
        }
    };

    let mut right = peak;
    let right_time = loop {
        if right + 1 >= n {
            return Err(not_crossed());
        }
        right += 1;
        if y[right] <= baseline {
            break crossing_time(baseline, (t[right], y[right]), (t[right - 1], y[right - 1]));
        }
    };

    Ok((left_time, right_time))
}

/// Width of a single spike at height `baseline`.
///
/// The input must hold a single spike. Returns 0 when the peak is not above
/// the baseline or the trace does not come back down to it on both sides.
pub fn single_spike_width(y: &[f64], t: &[f64], baseline: f64) -> f64 {
    spike_crossings(y, t, baseline)
        .map(|(left, right)| right - left)
        .unwrap_or(0.0)
}

/// Width of every spike in a train, paired with the spike times.
///
/// Each spike is measured on the stretch of trace bounded by the minima on
/// either side of it (the trace ends for the first and last spikes).
pub fn spike_widths(
    v: &[f64],
    t: &[f64],
    points: &TurningPoints,
    baseline: f64,
) -> (Vec<f64>, Vec<f64>) {
    let maxima = points.maxima();
    let minima = points.minima();
    let n = v.len().min(t.len());

    let widths = (0..maxima.len())
        .map(|i| {
            let left = if i == 0 { 0 } else { minima[i - 1].index };
            let right = if i + 1 == maxima.len() {
                n
            } else {
                minima[i].index + 1
            };

            match spike_crossings(&v[left..right], &t[left..right], baseline) {
                Ok((l, r)) => r - l,
                Err(e) => {
                    warn!(spike = i, time = maxima[i].time, "{}, width taken as 0", e);
                    0.0
                }
            }
        })
        .collect();

    (points.maxima_times(), widths)
}

/// Width of the first spike over the mean width of the following spikes.
///
/// Undefined when the following spikes have no measurable width.
pub fn spike_broadening(widths: &[f64]) -> FeatureResult {
    if widths.len() < 2 {
        return Err(FeatureError::InsufficientData {
            what: "spike broadening",
            needed: 2,
            got: widths.len(),
        });
    }
    let following = mean(&widths[1..]);
    if following == 0.0 {
        return Err(FeatureError::Undefined("later spikes have zero width"));
    }
    let ratio = widths[0] / following;
    if ratio.is_finite() {
        Ok(ratio)
    } else {
        Err(FeatureError::Undefined("non-finite width ratio"))
    }
}
