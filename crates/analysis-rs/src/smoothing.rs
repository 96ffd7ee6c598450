//! Window-convolution smoothing of raw traces.
//!
//! The signal is extended with reflected copies of itself at both ends before
//! convolving, so the transient at the edges of the output is minimized.

use ndarray::{Array1, ArrayD, ArrayView1, Ix1};
use serde::{Deserialize, Serialize};
use spiketune_core::{Result, TuneError};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Smoothing window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Moving average
    Flat,
    Hanning,
    Hamming,
    Bartlett,
    Blackman,
}

impl WindowKind {
    pub const ALL: [WindowKind; 5] = [
        WindowKind::Flat,
        WindowKind::Hanning,
        WindowKind::Hamming,
        WindowKind::Bartlett,
        WindowKind::Blackman,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WindowKind::Flat => "flat",
            WindowKind::Hanning => "hanning",
            WindowKind::Hamming => "hamming",
            WindowKind::Bartlett => "bartlett",
            WindowKind::Blackman => "blackman",
        }
    }

    /// Unnormalized window coefficients of length `m`.
    pub fn coefficients(&self, m: usize) -> Array1<f64> {
        if m == 1 {
            return Array1::ones(1);
        }
        let span = (m - 1) as f64;
        Array1::from_shape_fn(m, |n| {
            let n = n as f64;
            match self {
                WindowKind::Flat => 1.0,
                WindowKind::Hanning => 0.5 - 0.5 * (2.0 * PI * n / span).cos(),
                WindowKind::Hamming => 0.54 - 0.46 * (2.0 * PI * n / span).cos(),
                WindowKind::Bartlett => {
                    if n <= span / 2.0 {
                        2.0 * n / span
                    } else {
                        2.0 - 2.0 * n / span
                    }
                }
                WindowKind::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * n / span).cos() + 0.08 * (4.0 * PI * n / span).cos()
                }
            }
        })
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowKind {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self> {
        WindowKind::ALL
            .iter()
            .copied()
            .find(|w| w.name() == s)
            .ok_or_else(|| {
                TuneError::InvalidInput(format!(
                    "window must be one of 'flat', 'hanning', 'hamming', 'bartlett', 'blackman', got '{}'",
                    s
                ))
            })
    }
}

/// Smoothing settings for an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Smoothing {
    /// Window length; should be odd
    pub window_len: usize,
    pub window: WindowKind,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            window_len: 11,
            window: WindowKind::Hanning,
        }
    }
}

impl Smoothing {
    pub fn apply(&self, x: ArrayView1<f64>) -> Result<Array1<f64>> {
        smooth(x, self.window_len, self.window)
    }
}

/// Smooth a signal by convolving it with a normalized window.
///
/// Returns `x.len() + window_len - 1 - 2 * (window_len / 2)` samples, which is
/// `x.len()` for odd windows. Windows shorter than 3 return the input as is.
pub fn smooth(x: ArrayView1<f64>, window_len: usize, window: WindowKind) -> Result<Array1<f64>> {
    if x.len() < window_len {
        return Err(TuneError::InvalidInput(
            "Input vector needs to be bigger than window size".into(),
        ));
    }
    if window_len < 3 {
        return Ok(x.to_owned());
    }

    let n = x.len();
    let wl = window_len;

    // [x[wl-1], ..., x[1]] ++ x ++ [x[n-1], ..., x[n-wl+1]]
    let mut padded = Vec::with_capacity(n + 2 * (wl - 1));
    padded.extend((1..wl).rev().map(|i| x[i]));
    padded.extend(x.iter().copied());
    padded.extend((0..wl - 1).map(|i| x[n - 1 - i]));

    let w = window.coefficients(wl);
    let kernel = &w / w.sum();

    let valid = padded.len() - wl + 1;
    let convolved: Vec<f64> = (0..valid)
        .map(|i| {
            (0..wl)
                .map(|j| kernel[j] * padded[i + wl - 1 - j])
                .sum::<f64>()
        })
        .collect();

    let edge = wl / 2;
    Ok(Array1::from(convolved[edge..valid - edge].to_vec()))
}

/// Smooth an array of arbitrary dimension, naming the window as a string.
///
/// Only one-dimensional input is accepted.
pub fn smooth_array(x: &ArrayD<f64>, window_len: usize, window: &str) -> Result<Array1<f64>> {
    let x = x
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| TuneError::InvalidInput("smooth only accepts 1 dimension arrays".into()))?;

    // Short windows pass through before the name is looked at
    let kind = if window_len < 3 {
        WindowKind::Flat
    } else {
        window.parse()?
    };
    smooth(x, window_len, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, ArrayD, IxDyn};

    #[test]
    fn test_constant_signal_is_preserved() {
        let x = Array1::from_elem(50, -65.0);
        for kind in WindowKind::ALL {
            for wl in [3, 5, 11] {
                let y = smooth(x.view(), wl, kind).unwrap();
                assert_eq!(y.len(), 50 + wl - 1 - 2 * (wl / 2));
                for &v in y.iter() {
                    assert_relative_eq!(v, -65.0, epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn test_short_window_is_passthrough() {
        let x = arr1(&[1.0, 5.0, -2.0, 3.0]);
        let y = smooth(x.view(), 2, WindowKind::Hanning).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_window_longer_than_input() {
        let x = arr1(&[1.0, 2.0, 3.0]);
        assert!(smooth(x.view(), 11, WindowKind::Flat).is_err());
    }

    #[test]
    fn test_flat_window_is_moving_average() {
        let x = arr1(&[0.0, 0.0, 3.0, 0.0, 0.0]);
        let y = smooth(x.view(), 3, WindowKind::Flat).unwrap();
        assert_eq!(y.len(), 5);
        assert_relative_eq!(y[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(y[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(y[3], 1.0, epsilon = 1e-12);
        assert_relative_eq!(y[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reflection_at_edges() {
        // Reflection repeats x[1] before x[0], so the first output averages x[1], x[0], x[1]
        let x = arr1(&[3.0, 0.0, 0.0, 0.0, 6.0]);
        let y = smooth(x.view(), 3, WindowKind::Flat).unwrap();
        assert_relative_eq!(y[0], 1.0, epsilon = 1e-12);
        // The tail starts with x[n-1] itself
        assert_relative_eq!(y[4], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_window_coefficients() {
        let h = WindowKind::Hanning.coefficients(5);
        assert_relative_eq!(h[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(h[2], 1.0, epsilon = 1e-12);

        let b = WindowKind::Bartlett.coefficients(5);
        assert_relative_eq!(b[1], 0.5, epsilon = 1e-12);

        let m = WindowKind::Hamming.coefficients(5);
        assert_relative_eq!(m[0], 0.08, epsilon = 1e-12);
    }

    #[test]
    fn test_smooth_array_validation() {
        let two_d = ArrayD::<f64>::zeros(IxDyn(&[4, 4]));
        assert!(smooth_array(&two_d, 3, "flat").is_err());

        let one_d = ArrayD::<f64>::ones(IxDyn(&[20]));
        assert!(smooth_array(&one_d, 5, "gaussian").is_err());
        assert_eq!(smooth_array(&one_d, 5, "blackman").unwrap().len(), 20);

        // Windows below 3 samples return the input whatever the name
        assert_eq!(smooth_array(&one_d, 2, "gaussian").unwrap().len(), 20);
        assert!(smooth_array(&one_d, 21, "hanning").is_err());
    }
}
