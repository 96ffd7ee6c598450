//! Analysis of whole-cell current injection traces.

use crate::cost::CostFunction;
use crate::extrema::{find_extrema, TurningPoints};
use crate::features::{
    exp_fit, linear_fit, mean, mean_spike_frequency, minima_phases, spike_broadening,
    spike_covar, spike_frequencies, spike_widths, three_spike_adaptation,
};
use crate::pptd::pptd_error;
use crate::smoothing::Smoothing;
use crate::FeatureError;
use ndarray::s;
use spiketune_core::{
    weight_of, worst_case_fitness, AnalysisVar, AnalysisWindow, Feature, FeatureSet, Result,
    Targets, Trace, Weights,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fewest maxima for which features are computed
pub const MIN_ANALYSABLE_PEAKS: usize = 3;

/// Feature extraction for one spiking trace.
///
/// Construction windows (and optionally smooths) the trace and runs peak
/// detection. Traces with fewer than [`MIN_ANALYSABLE_PEAKS`] maxima are not
/// analysable and always score the worst-case fitness.
#[derive(Debug, Clone)]
pub struct IClampAnalysis {
    trace: Trace,
    analysis_var: AnalysisVar,
    reference: Option<Arc<Trace>>,
    points: TurningPoints,
    analysable: bool,
    results: Option<FeatureSet>,
}

impl IClampAnalysis {
    pub fn new(
        trace: &Trace,
        window: &AnalysisWindow,
        analysis_var: AnalysisVar,
        smoothing: Option<Smoothing>,
    ) -> Result<Self> {
        let mut trace = trace.window(window)?;

        if let Some(smoothing) = smoothing {
            let smoothed = smoothing.apply(trace.v().view())?;
            // Even windows shorten the signal by one sample
            let t = trace.t().slice(s![..smoothed.len()]).to_owned();
            trace = Trace::new(t, smoothed)?;
        }

        let points = find_extrema(
            &trace.v().to_vec(),
            &trace.t().to_vec(),
            analysis_var.peak_delta,
            analysis_var.peak_threshold,
        );
        let analysable = points.maxima_number() >= MIN_ANALYSABLE_PEAKS;

        Ok(Self {
            trace,
            analysis_var,
            reference: None,
            points,
            analysable,
            results: None,
        })
    }

    /// Compare the trajectory density against `reference` during analysis.
    pub fn with_reference(mut self, reference: Arc<Trace>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// The windowed (and smoothed) trace being analysed
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn turning_points(&self) -> &TurningPoints {
        &self.points
    }

    pub fn is_analysable(&self) -> bool {
        self.analysable
    }

    /// Results of a previous [`analyse`](Self::analyse), if any
    pub fn results(&self) -> Option<&FeatureSet> {
        self.results.as_ref()
    }

    /// Treat the trace as non-analysable from now on.
    pub fn mark_unanalysable(&mut self) {
        self.analysable = false;
        self.results = None;
    }

    /// Compute every feature in one pass.
    ///
    /// Returns `None` for a non-analysable trace. Results are stored, so
    /// repeated calls are cheap. A failing trajectory-density comparison is
    /// scored 1 and an undefined spike broadening 0; any other failing feature
    /// is returned as an error.
    pub fn analyse(&mut self) -> std::result::Result<Option<&FeatureSet>, FeatureError> {
        if !self.analysable {
            warn!(
                maxima = self.points.maxima_number(),
                "data not suitable for analysis, fewer than {} spikes", MIN_ANALYSABLE_PEAKS
            );
            return Ok(None);
        }
        if self.results.is_none() {
            let features = self.compute()?;
            self.results = Some(features);
        }
        Ok(self.results.as_ref())
    }

    fn compute(&self) -> std::result::Result<FeatureSet, FeatureError> {
        let t = self.trace.t().to_vec();
        let v = self.trace.v().to_vec();
        let tp = &self.points;

        let maxima_times = tp.maxima_times();
        let maxima_values = tp.maxima_values();
        let minima_times = tp.minima_times();
        let minima_values = tp.minima_values();

        let mut results = FeatureSet::new();
        results.insert(Feature::AverageMinimum, mean(&minima_values));
        results.insert(Feature::AverageMaximum, mean(&maxima_values));
        results.insert(Feature::MinPeakNo, tp.minima_number() as f64);
        results.insert(Feature::MaxPeakNo, tp.maxima_number() as f64);
        results.insert(
            Feature::MeanSpikeFrequency,
            mean_spike_frequency(&maxima_times),
        );
        results.insert(Feature::InterspikeTimeCovar, spike_covar(&maxima_times)?);
        results.insert(Feature::FirstSpikeTime, maxima_times[0]);

        let (trough_times, phases) = minima_phases(tp);
        results.insert(
            Feature::TroughPhaseAdaptation,
            exp_fit(&trough_times, &phases)?,
        );

        let (width_times, widths) = spike_widths(&v, &t, tp, self.analysis_var.baseline);
        results.insert(
            Feature::SpikeWidthAdaptation,
            exp_fit(&width_times, &widths)?,
        );

        results.insert(
            Feature::PeakDecayExponent,
            three_spike_adaptation(&maxima_times, &maxima_values)?,
        );
        results.insert(
            Feature::TroughDecayExponent,
            three_spike_adaptation(&minima_times, &minima_values)?,
        );

        let (frequency_times, frequencies) = spike_frequencies(&maxima_times);
        results.insert(
            Feature::SpikeFrequencyAdaptation,
            exp_fit(&frequency_times, &frequencies)?,
        );
        let broadening = spike_broadening(&widths).unwrap_or_else(|e| {
            warn!("{}, spike broadening taken as 0", e);
            0.0
        });
        results.insert(Feature::SpikeBroadening, broadening);
        results.insert(
            Feature::PeakLinearGradient,
            linear_fit(&maxima_times, &maxima_values)?,
        );

        if let Some(reference) = &self.reference {
            let error = pptd_error(
                &t,
                &v,
                &reference.t().to_vec(),
                &reference.v().to_vec(),
                self.analysis_var.dvdt_threshold,
            )
            .unwrap_or_else(|e| {
                warn!("PPTD failure ({}), error taken as 1", e);
                1.0
            });
            results.insert(Feature::PptdError, error);
        }

        Ok(results)
    }

    /// Weighted sum of per-feature costs against `targets`.
    ///
    /// Non-analysable traces, or traces not yet analysed, score the sum of the
    /// target weights. A target feature that was not measured is charged its
    /// full weight.
    pub fn evaluate_fitness(
        &self,
        targets: &Targets,
        weights: Option<&Weights>,
        cost: &CostFunction,
    ) -> f64 {
        let results = match (&self.results, self.analysable) {
            (Some(results), true) => results,
            _ => {
                warn!("data is non-analysable");
                return worst_case_fitness(targets, weights);
            }
        };

        let mut fitness = 0.0;
        for (&feature, &target) in targets {
            let weight = weight_of(weights, feature);
            match results.get(feature) {
                Some(value) => {
                    let c = cost.cost(value, target);
                    debug!(%feature, value, target, weight, cost = c, "examining target");
                    fitness += weight * c;
                }
                None => {
                    warn!(%feature, "target feature was not measured, charging full weight");
                    fitness += weight;
                }
            }
        }
        fitness
    }
}
