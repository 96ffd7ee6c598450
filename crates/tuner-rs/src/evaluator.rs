//! Fitness evaluation of candidate batches.

use crate::controller::Controller;
use serde::{Deserialize, Serialize};
use spiketune_analysis::{load_csv_data, CostFunction, IClampAnalysis, Smoothing};
use spiketune_core::{
    worst_case_fitness, AnalysisVar, AnalysisWindow, Candidate, FeatureSet, Result, Targets,
    Time, Trace, TuneError, Weights,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Assigns one fitness value (lower is better) to each candidate.
pub trait Evaluator {
    fn evaluate(&self, candidates: &[Candidate]) -> Result<Vec<f64>>;
}

/// Settings of an [`IClampEvaluator`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub analysis_start_time: Time,
    /// Open-ended when unset
    pub analysis_end_time: Option<Time>,
    /// Reference recording (seconds, volts); an empty path means none
    pub target_data_path: Option<PathBuf>,
    /// Parameter names, aligned with candidate genes
    pub parameters: Vec<String>,
    pub analysis_var: AnalysisVar,
    pub weights: Option<Weights>,
    pub targets: Targets,
    /// Derive the targets from the reference recording
    pub automatic: bool,
    /// Smoothing applied to every simulated trace before analysis
    pub smoothing: Option<Smoothing>,
    pub cost_function: CostFunction,
}

impl EvaluatorConfig {
    pub fn window(&self) -> AnalysisWindow {
        AnalysisWindow {
            start: self.analysis_start_time,
            end: self.analysis_end_time,
        }
    }

    fn reference_path(&self) -> Option<&PathBuf> {
        self.target_data_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// Evaluates candidates by analysing the current-clamp traces a controller
/// produces for them.
pub struct IClampEvaluator<C> {
    config: EvaluatorConfig,
    controller: C,
    reference: Option<Arc<Trace>>,
}

impl<C: Controller> IClampEvaluator<C> {
    /// Build the evaluator, loading the reference trace once.
    ///
    /// With `automatic` set, the reference is smoothed (hanning, 11 samples)
    /// and analysed, and its features replace the configured targets.
    pub fn new(mut config: EvaluatorConfig, controller: C) -> Result<Self> {
        let reference = match config.reference_path() {
            Some(path) => Some(Arc::new(load_csv_data(path)?)),
            None => None,
        };

        if config.automatic {
            let trace = reference.as_deref().ok_or_else(|| {
                TuneError::InvalidInput("automatic targets need a target_data_path".into())
            })?;
            config.targets = reference_targets(trace, &config)?;
            info!(targets = ?config.targets, "obtained targets");
        }

        if config.targets.is_empty() {
            warn!("no fitting targets, every candidate will score 0");
        }

        Ok(Self {
            config,
            controller,
            reference,
        })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn targets(&self) -> &Targets {
        &self.config.targets
    }

    pub fn reference(&self) -> Option<&Trace> {
        self.reference.as_deref()
    }

    /// Fitness of a single simulated trace.
    pub fn trace_fitness(&self, trace: &Trace) -> f64 {
        let config = &self.config;
        let mut analysis = match IClampAnalysis::new(
            trace,
            &config.window(),
            config.analysis_var,
            config.smoothing,
        ) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("trace could not be prepared for analysis ({}), scoring worst case", e);
                return worst_case_fitness(&config.targets, config.weights.as_ref());
            }
        };
        if let Some(reference) = &self.reference {
            analysis = analysis.with_reference(Arc::clone(reference));
        }

        let failure = analysis.analyse().err();
        if let Some(e) = failure {
            warn!("analysis failed ({}), trace marked non-analysable", e);
            analysis.mark_unanalysable();
        }

        analysis.evaluate_fitness(
            &config.targets,
            config.weights.as_ref(),
            &config.cost_function,
        )
    }
}

fn reference_targets(reference: &Trace, config: &EvaluatorConfig) -> Result<Targets> {
    let smoothed = reference.with_voltage(Smoothing::default().apply(reference.v().view())?)?;
    let mut analysis =
        IClampAnalysis::new(&smoothed, &config.window(), config.analysis_var, None)?;

    let features = analysis
        .analyse()
        .map_err(|e| TuneError::InvalidInput(format!("reference trace analysis failed: {}", e)))?
        .ok_or_else(|| {
            TuneError::InvalidInput("reference trace has too few spikes to analyse".into())
        })?;
    Ok(finite_targets(features))
}

/// Measured features usable as targets; non-finite values are left out.
fn finite_targets(features: &FeatureSet) -> Targets {
    features
        .iter()
        .filter(|&(feature, value)| {
            if value.is_finite() {
                true
            } else {
                warn!(%feature, value, "reference feature is not finite, not used as a target");
                false
            }
        })
        .collect()
}

impl<C: Controller> Evaluator for IClampEvaluator<C> {
    fn evaluate(&self, candidates: &[Candidate]) -> Result<Vec<f64>> {
        info!(candidates = candidates.len(), "evaluating batch");

        let traces = self.controller.run(candidates, &self.config.parameters)?;
        if traces.len() != candidates.len() {
            return Err(TuneError::ControllerError(format!(
                "controller returned {} traces for {} candidates",
                traces.len(),
                candidates.len()
            )));
        }

        Ok(candidates
            .iter()
            .zip(&traces)
            .map(|(candidate, trace)| {
                let fitness = self.trace_fitness(trace);
                info!(?candidate, fitness, "candidate evaluated");
                fitness
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SineWaveController;
    use spiketune_core::{Feature, ParameterSet};
    use std::sync::Mutex;

    /// Records batch sizes; the first gene sets the number of spikes per second
    struct TaggingController {
        calls: Mutex<Vec<usize>>,
    }

    impl Controller for TaggingController {
        fn run(&self, candidates: &[Candidate], _parameters: &[String]) -> Result<Vec<Trace>> {
            self.calls.lock().unwrap().push(candidates.len());
            candidates
                .iter()
                .map(|c| {
                    // Spike count equals the first gene
                    let period = 1000.0 / c[0];
                    let t: Vec<f64> = (0..=10_000).map(|i| i as f64 * 0.1).collect();
                    let v = t
                        .iter()
                        .map(|&x| 65.0 * (2.0 * std::f64::consts::PI * x / period).sin())
                        .collect();
                    Trace::from_vecs(t, v)
                })
                .collect()
        }
    }

    fn sine_params() -> Vec<String> {
        vec!["amp".into(), "period".into(), "offset".into()]
    }

    #[test]
    fn test_order_preservation() {
        let mut targets = Targets::new();
        targets.insert(Feature::MaxPeakNo, 5.0);
        let config = EvaluatorConfig {
            parameters: vec!["rate".into()],
            targets,
            ..Default::default()
        };
        let controller = TaggingController {
            calls: Mutex::new(Vec::new()),
        };
        let evaluator = IClampEvaluator::new(config, controller).unwrap();

        let candidates = vec![vec![5.0], vec![8.0], vec![2.0], vec![5.0]];
        let fitness = evaluator.evaluate(&candidates).unwrap();

        assert_eq!(fitness.len(), 4);
        assert_eq!(fitness[0], 0.0);
        assert_eq!(fitness[3], 0.0);
        assert!(fitness[1] > 0.0);
        // Two spikes: not analysable, worst case
        assert_eq!(fitness[2], 1.0);
        assert_eq!(*evaluator.controller.calls.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_exact_reproduction_scores_zero() {
        let controller = SineWaveController::new(1000.0, 0.1);
        let params = ParameterSet::zip(&sine_params(), &[65.0, 250.0, -10.0]).unwrap();
        let reference = controller.simulate(&params).unwrap();

        let mut analysis =
            IClampAnalysis::new(&reference, &AnalysisWindow::default(), AnalysisVar::default(), None)
                .unwrap();
        let targets = analysis.analyse().unwrap().unwrap().to_targets();

        let config = EvaluatorConfig {
            parameters: sine_params(),
            targets,
            ..Default::default()
        };
        let evaluator = IClampEvaluator::new(config, controller).unwrap();
        let fitness = evaluator
            .evaluate(&[vec![65.0, 250.0, -10.0], vec![40.0, 200.0, 0.0]])
            .unwrap();

        assert_eq!(fitness[0], 0.0);
        assert!(fitness[1] > 0.0);
    }

    #[test]
    fn test_flat_trace_scores_sum_of_weights() {
        let mut targets = Targets::new();
        targets.insert(Feature::MaxPeakNo, 4.0);
        targets.insert(Feature::AverageMaximum, 55.0);
        let mut weights = Weights::new();
        weights.insert(Feature::MaxPeakNo, 2.0);
        weights.insert(Feature::AverageMaximum, 0.5);

        let config = EvaluatorConfig {
            parameters: sine_params(),
            targets,
            weights: Some(weights),
            ..Default::default()
        };
        let evaluator = IClampEvaluator::new(config, SineWaveController::new(1000.0, 0.1)).unwrap();
        let fitness = evaluator.evaluate(&[vec![0.0, 250.0, -65.0]]).unwrap();
        assert_eq!(fitness, vec![2.5]);
    }

    #[test]
    fn test_short_trace_scores_worst_case() {
        let mut targets = Targets::new();
        targets.insert(Feature::MaxPeakNo, 4.0);
        let config = EvaluatorConfig {
            parameters: sine_params(),
            targets,
            smoothing: Some(Smoothing::default()),
            ..Default::default()
        };
        // Five samples cannot be smoothed with an 11-sample window
        let evaluator = IClampEvaluator::new(config, SineWaveController::new(4.0, 1.0)).unwrap();
        assert_eq!(evaluator.evaluate(&[vec![65.0, 250.0, -10.0]]).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_controller_failure_fails_batch() {
        let config = EvaluatorConfig {
            parameters: vec!["amp".into()],
            ..Default::default()
        };
        let evaluator = IClampEvaluator::new(config, SineWaveController::new(10.0, 1.0)).unwrap();
        assert!(evaluator.evaluate(&[vec![1.0]]).is_err());
    }

    #[test]
    fn test_automatic_without_reference() {
        let config = EvaluatorConfig {
            automatic: true,
            target_data_path: Some(PathBuf::new()),
            ..Default::default()
        };
        assert!(IClampEvaluator::new(config, SineWaveController::new(10.0, 1.0)).is_err());
    }

    #[test]
    fn test_non_finite_features_are_not_targets() {
        let features: FeatureSet = [
            (Feature::MaxPeakNo, 4.0),
            (Feature::SpikeBroadening, f64::NAN),
            (Feature::MeanSpikeFrequency, f64::INFINITY),
        ]
        .into_iter()
        .collect();

        let targets = finite_targets(&features);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[&Feature::MaxPeakNo], 4.0);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "analysis_start_time": 0.0,
            "analysis_end_time": 900.0,
            "target_data_path": "",
            "parameters": ["amp", "period", "offset"],
            "analysis_var": {"peak_delta": 0.0, "baseline": 0.0, "dvdt_threshold": 2.0},
            "weights": {"average_maximum": 1.0, "spike_broadening": 0.5},
            "targets": {"average_maximum": 55.0, "spike_broadening": 1.0}
        }"#;
        let config: EvaluatorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.reference_path(), None);
        assert_eq!(config.window(), AnalysisWindow::new(0.0, 900.0));
        assert_eq!(config.analysis_var.dvdt_threshold, Some(2.0));
        assert_eq!(config.targets[&Feature::SpikeBroadening], 1.0);
        assert!(!config.automatic);
    }
}
