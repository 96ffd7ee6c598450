//! # SpikeTune Tuner
//!
//! Fits model parameters so that simulated voltage traces reproduce the
//! features of a target.
//!
//! ## Components
//!
//! | Trait | Implementations |
//! |-------|-----------------|
//! | [`Controller`] | [`SineWaveController`], [`IzhikevichController`], [`CommandController`] |
//! | [`NetworkController`] | [`SingleTrace`] adapter, user models |
//! | [`Evaluator`] | [`IClampEvaluator`], [`NetworkEvaluator`] |
//! | [`Optimizer`] | [`EvolutionaryOptimizer`] |
//!
//! Per generation the optimizer hands the whole candidate batch to the
//! evaluator, which makes one controller call, analyses each returned trace
//! and returns one fitness per candidate in the same order.

pub mod controller;
pub mod evaluator;
pub mod network;
pub mod optimizer;

pub use controller::{
    CommandController, Controller, ControllerConfig, IzhikevichController, SineWaveController,
};
pub use evaluator::{Evaluator, EvaluatorConfig, IClampEvaluator};
pub use network::{
    NetworkController, NetworkEvaluator, NetworkEvaluatorConfig, NetworkTargets, NetworkWeights,
    SingleTrace, TargetKey, TraceMap,
};
pub use optimizer::{
    EvolutionaryOptimizer, GenerationStats, OptimizationResult, Optimizer, OptimizerConfig,
};

use serde::{Deserialize, Serialize};
use spiketune_core::{Result, TuneError};
use std::path::Path;

/// A complete fitting run: model, scoring and search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub controller: ControllerConfig,
    pub evaluator: EvaluatorConfig,
    pub optimizer: OptimizerConfig,
}

impl FitConfig {
    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: FitConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.optimizer.validate()?;
        let genes = self.optimizer.min_constraints.len();
        if self.evaluator.parameters.len() != genes {
            return Err(TuneError::InvalidInput(format!(
                "{} parameter names for {} bounded genes",
                self.evaluator.parameters.len(),
                genes
            )));
        }
        Ok(())
    }

    /// Build the evaluator and run the optimizer to completion.
    pub fn run(
        self,
        observer: impl FnMut(&GenerationStats) + 'static,
    ) -> Result<OptimizationResult> {
        self.validate()?;
        let evaluator = IClampEvaluator::new(self.evaluator, self.controller.build())?;
        EvolutionaryOptimizer::new(self.optimizer)?
            .with_observer(observer)
            .optimize(&evaluator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINE_FIT: &str = r#"{
        "controller": {"type": "sine_wave", "sim_time": 1000.0, "dt": 0.1},
        "evaluator": {
            "parameters": ["amp", "period", "offset"],
            "analysis_var": {"peak_delta": 0.0, "baseline": 0.0},
            "targets": {"max_peak_no": 4, "average_maximum": 55.0}
        },
        "optimizer": {
            "min_constraints": [40.0, 150.0, -20.0],
            "max_constraints": [80.0, 350.0, 0.0],
            "population_size": 6,
            "max_evaluations": 18,
            "seed": 11
        }
    }"#;

    #[test]
    fn test_fit_config_parses() {
        let config: FitConfig = serde_json::from_str(SINE_FIT).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer.tourn_size, 2);
        assert_eq!(config.evaluator.cost_function, Default::default());
    }

    #[test]
    fn test_parameter_count_must_match_bounds() {
        let mut config: FitConfig = serde_json::from_str(SINE_FIT).unwrap();
        config.evaluator.parameters.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fit_runs() {
        let config: FitConfig = serde_json::from_str(SINE_FIT).unwrap();
        let result = config.run(|_| {}).unwrap();

        assert_eq!(result.evaluations, 18);
        assert_eq!(result.generations.len(), 3);
        assert_eq!(result.best_candidate.len(), 3);
        assert!(result.best_fitness >= 0.0 && result.best_fitness <= 2.0);
    }
}
