//! End-to-end fitting against a recorded reference trace.

use spiketune_core::{AnalysisVar, Feature, ParameterSet, Weights};
use spiketune_tuner::{
    Evaluator, EvaluatorConfig, EvolutionaryOptimizer, IClampEvaluator, Optimizer,
    OptimizerConfig, SineWaveController,
};
use std::path::PathBuf;

fn sine_params() -> Vec<String> {
    vec!["amp".into(), "period".into(), "offset".into()]
}

/// Write a sine recording in seconds and volts
fn write_reference(name: &str) -> PathBuf {
    let controller = SineWaveController::new(1000.0, 0.1);
    let params = ParameterSet::zip(&sine_params(), &[65.0, 250.0, -10.0]).unwrap();
    let trace = controller.simulate(&params).unwrap();

    let mut text = String::from("time,voltage\n");
    for (t, v) in trace.t().iter().zip(trace.v().iter()) {
        text.push_str(&format!("{},{}\n", t / 1000.0, v / 1000.0));
    }

    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// A pure sine has no adaptation, so these features measure rounding noise
fn ignore_adaptation() -> Weights {
    [
        Feature::InterspikeTimeCovar,
        Feature::TroughPhaseAdaptation,
        Feature::SpikeWidthAdaptation,
        Feature::SpikeFrequencyAdaptation,
        Feature::PeakDecayExponent,
        Feature::TroughDecayExponent,
        Feature::PeakLinearGradient,
    ]
    .into_iter()
    .map(|f| (f, 0.0))
    .collect()
}

#[test]
fn test_automatic_targets_from_reference() {
    let path = write_reference("spiketune_reference_automatic.csv");
    let config = EvaluatorConfig {
        target_data_path: Some(path.clone()),
        parameters: sine_params(),
        analysis_var: AnalysisVar::default(),
        weights: Some(ignore_adaptation()),
        automatic: true,
        ..Default::default()
    };
    let evaluator = IClampEvaluator::new(config, SineWaveController::new(1000.0, 0.1)).unwrap();
    std::fs::remove_file(&path).ok();

    let targets = evaluator.targets();
    assert_eq!(targets[&Feature::MaxPeakNo], 4.0);
    assert!((targets[&Feature::AverageMaximum] - 55.0).abs() < 0.5);
    assert!(evaluator.reference().is_some());

    let fitness = evaluator
        .evaluate(&[vec![65.0, 250.0, -10.0], vec![45.0, 180.0, -20.0]])
        .unwrap();
    assert!(fitness[0] < 0.05, "matching candidate scored {}", fitness[0]);
    assert!(fitness[1] > fitness[0]);
}

#[test]
fn test_optimizer_improves_on_reference() {
    let path = write_reference("spiketune_reference_search.csv");
    let config = EvaluatorConfig {
        target_data_path: Some(path.clone()),
        parameters: sine_params(),
        automatic: true,
        ..Default::default()
    };
    let evaluator = IClampEvaluator::new(config, SineWaveController::new(1000.0, 0.1)).unwrap();
    std::fs::remove_file(&path).ok();

    let optimizer_config = OptimizerConfig {
        population_size: 8,
        max_evaluations: 48,
        gaussian_stdev: 5.0,
        seed: Some(2024),
        ..OptimizerConfig::new(vec![40.0, 150.0, -20.0], vec![80.0, 350.0, 0.0])
    };
    let result = EvolutionaryOptimizer::new(optimizer_config)
        .unwrap()
        .optimize(&evaluator)
        .unwrap();

    assert!(result.best_fitness <= result.generations[0].best);
    let bounds = [(40.0, 80.0), (150.0, 350.0), (-20.0, 0.0)];
    for (gene, (lo, hi)) in result.best_candidate.iter().zip(bounds) {
        assert!(*gene >= lo && *gene <= hi);
    }
}
