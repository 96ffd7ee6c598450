//! Maxima and inter-peak minima of a voltage trace.

use serde::{Deserialize, Serialize};
use spiketune_core::{Time, Voltage};

/// A single turning point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    pub value: Voltage,
    pub index: usize,
    pub time: Time,
}

/// Accepted maxima and the minima between consecutive maxima.
///
/// There is always exactly one minimum fewer than there are maxima (or none
/// at all), and both lists are ordered by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurningPoints {
    maxima: Vec<Extremum>,
    minima: Vec<Extremum>,
}

impl TurningPoints {
    pub fn maxima(&self) -> &[Extremum] {
        &self.maxima
    }

    pub fn minima(&self) -> &[Extremum] {
        &self.minima
    }

    pub fn maxima_number(&self) -> usize {
        self.maxima.len()
    }

    pub fn minima_number(&self) -> usize {
        self.minima.len()
    }

    pub fn maxima_values(&self) -> Vec<f64> {
        self.maxima.iter().map(|e| e.value).collect()
    }

    pub fn maxima_times(&self) -> Vec<f64> {
        self.maxima.iter().map(|e| e.time).collect()
    }

    pub fn maxima_locations(&self) -> Vec<usize> {
        self.maxima.iter().map(|e| e.index).collect()
    }

    pub fn minima_values(&self) -> Vec<f64> {
        self.minima.iter().map(|e| e.value).collect()
    }

    pub fn minima_times(&self) -> Vec<f64> {
        self.minima.iter().map(|e| e.time).collect()
    }

    pub fn minima_locations(&self) -> Vec<usize> {
        self.minima.iter().map(|e| e.index).collect()
    }
}

/// Find the maxima and minima of a trace.
///
/// A sample is a maximum where the first difference changes from positive to
/// negative. It is kept only if it rises more than `delta` above both
/// neighbours and, when `peak_threshold` is given, is at least that high. Each
/// minimum is the lowest sample strictly between two consecutive kept maxima.
pub fn find_extrema(
    v: &[Voltage],
    t: &[Time],
    delta: f64,
    peak_threshold: Option<f64>,
) -> TurningPoints {
    let n = v.len().min(t.len());
    if n < 3 {
        return TurningPoints::default();
    }

    let gradients: Vec<f64> = v[..n].windows(2).map(|w| w[1] - w[0]).collect();

    let mut maxima = Vec::new();
    for i in 1..gradients.len() {
        let (before, after) = (gradients[i - 1], gradients[i]);
        if !(before > 0.0 && after < 0.0 && before != after) {
            continue;
        }

        let value = v[i];
        let rises = (value - v[i - 1]) > delta && (value - v[i + 1]) > delta;
        let high_enough = peak_threshold.map_or(true, |threshold| value >= threshold);

        if rises && high_enough {
            maxima.push(Extremum {
                value,
                index: i,
                time: t[i],
            });
        }
    }

    let minima = maxima
        .windows(2)
        .filter_map(|pair| lowest_between(v, t, pair[0].index, pair[1].index))
        .collect();

    TurningPoints { maxima, minima }
}

/// Lowest sample with index in `(left, right)`, first occurrence on ties.
fn lowest_between(v: &[Voltage], t: &[Time], left: usize, right: usize) -> Option<Extremum> {
    let mut lowest: Option<Extremum> = None;
    for i in left + 1..right {
        if lowest.map_or(true, |e| v[i] < e.value) {
            lowest = Some(Extremum {
                value: v[i],
                index: i,
                time: t[i],
            });
        }
    }
    lowest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sawtooth() -> (Vec<f64>, Vec<f64>) {
        let v = vec![0.0, 5.0, 1.0, 6.0, -2.0, 4.0, 0.0];
        let t = (0..v.len()).map(|i| i as f64 * 0.5).collect();
        (v, t)
    }

    #[test]
    fn test_basic_extrema() {
        let (v, t) = sawtooth();
        let tp = find_extrema(&v, &t, 0.0, None);

        assert_eq!(tp.maxima_locations(), vec![1, 3, 5]);
        assert_eq!(tp.maxima_values(), vec![5.0, 6.0, 4.0]);
        assert_eq!(tp.maxima_times(), vec![0.5, 1.5, 2.5]);
        assert_eq!(tp.minima_locations(), vec![2, 4]);
        assert_eq!(tp.minima_values(), vec![1.0, -2.0]);
    }

    #[test]
    fn test_delta_rejects_small_peaks() {
        let (v, t) = sawtooth();
        // Peak at index 1 rises 5 and 4; index 3 rises 5 and 8; index 5 rises 6 and 4
        let tp = find_extrema(&v, &t, 4.5, None);
        assert_eq!(tp.maxima_locations(), vec![3]);
        assert_eq!(tp.minima_number(), 0);
    }

    #[test]
    fn test_peak_threshold() {
        let (v, t) = sawtooth();
        let tp = find_extrema(&v, &t, 0.0, Some(5.0));
        assert_eq!(tp.maxima_values(), vec![5.0, 6.0]);
        assert_eq!(tp.minima_values(), vec![1.0]);
    }

    #[test]
    fn test_plateau_is_not_a_peak() {
        let v = vec![0.0, 1.0, 1.0, 0.0];
        let t = vec![0.0, 1.0, 2.0, 3.0];
        assert_eq!(find_extrema(&v, &t, 0.0, None).maxima_number(), 0);
    }

    #[test]
    fn test_monotonic_has_no_extrema() {
        let v: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let tp = find_extrema(&v, &v, 0.0, None);
        assert_eq!(tp.maxima_number(), 0);
        assert_eq!(tp.minima_number(), 0);
    }

    #[test]
    fn test_minima_count_invariant() {
        let traces: Vec<Vec<f64>> = vec![
            vec![],
            vec![1.0],
            vec![0.0, 1.0, 0.0],
            (0..500).map(|i| (i as f64 * 0.3).sin()).collect(),
            (0..500).map(|i| ((i * 7919) % 13) as f64).collect(),
        ];
        for v in traces {
            let t: Vec<f64> = (0..v.len()).map(|i| i as f64).collect();
            let tp = find_extrema(&v, &t, 0.0, None);
            assert_eq!(tp.minima_number(), tp.maxima_number().saturating_sub(1));
        }
    }
}
