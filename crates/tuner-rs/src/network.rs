//! Evaluation of models that record several traces per run.
//!
//! Targets are addressed as `"<trace>:<feature>"`, e.g. `"soma:max_peak_no"`.
//! Each named trace is analysed on its own and the weighted costs of all
//! targets are summed. There is no whole-candidate penalty: a target whose
//! feature could not be measured is charged its own weight and the rest are
//! scored normally.

use crate::controller::Controller;
use crate::evaluator::Evaluator;
use serde::{Deserialize, Serialize};
use spiketune_analysis::{CostFunction, IClampAnalysis, Smoothing};
use spiketune_core::{
    AnalysisVar, AnalysisWindow, Candidate, Feature, FeatureSet, Result, Time, Trace, TuneError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Named traces recorded in one simulation
pub type TraceMap = BTreeMap<String, Trace>;

/// Runs simulations that record several named traces.
pub trait NetworkController: Send + Sync {
    /// One trace map per candidate, in candidate order.
    fn run(&self, candidates: &[Candidate], parameters: &[String]) -> Result<Vec<TraceMap>>;
}

/// Exposes a single-trace [`Controller`] under a fixed trace name.
pub struct SingleTrace<C> {
    name: String,
    controller: C,
}

impl<C: Controller> SingleTrace<C> {
    pub fn new(name: impl Into<String>, controller: C) -> Self {
        Self {
            name: name.into(),
            controller,
        }
    }
}

impl<C: Controller> NetworkController for SingleTrace<C> {
    fn run(&self, candidates: &[Candidate], parameters: &[String]) -> Result<Vec<TraceMap>> {
        Ok(self
            .controller
            .run(candidates, parameters)?
            .into_iter()
            .map(|trace| TraceMap::from([(self.name.clone(), trace)]))
            .collect())
    }
}

// ============================================================================
// TARGET KEYS
// ============================================================================

/// A feature of one named trace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetKey {
    pub trace: String,
    pub feature: Feature,
}

impl TargetKey {
    pub fn new(trace: impl Into<String>, feature: Feature) -> Self {
        Self {
            trace: trace.into(),
            feature,
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.trace, self.feature)
    }
}

impl FromStr for TargetKey {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self> {
        let (trace, feature) = s.rsplit_once(':').ok_or_else(|| {
            TuneError::ParseError(format!("target '{}' is not of the form <trace>:<feature>", s))
        })?;
        if trace.is_empty() {
            return Err(TuneError::ParseError(format!("target '{}' has no trace name", s)));
        }
        Ok(Self::new(trace, feature.parse()?))
    }
}

impl TryFrom<String> for TargetKey {
    type Error = TuneError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TargetKey> for String {
    fn from(key: TargetKey) -> Self {
        key.to_string()
    }
}

pub type NetworkTargets = BTreeMap<TargetKey, f64>;
pub type NetworkWeights = BTreeMap<TargetKey, f64>;

// ============================================================================
// EVALUATOR
// ============================================================================

/// Settings of a [`NetworkEvaluator`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkEvaluatorConfig {
    pub analysis_start_time: Time,
    pub analysis_end_time: Option<Time>,
    pub parameters: Vec<String>,
    pub analysis_var: AnalysisVar,
    /// Missing entries weigh 1.0; targets weighing 0 are skipped
    pub weights: Option<NetworkWeights>,
    pub targets: NetworkTargets,
    pub smoothing: Option<Smoothing>,
    pub cost_function: CostFunction,
}

pub struct NetworkEvaluator<C> {
    config: NetworkEvaluatorConfig,
    controller: C,
}

impl<C: NetworkController> NetworkEvaluator<C> {
    pub fn new(config: NetworkEvaluatorConfig, controller: C) -> Self {
        Self { config, controller }
    }

    pub fn config(&self) -> &NetworkEvaluatorConfig {
        &self.config
    }

    fn weight(&self, key: &TargetKey) -> f64 {
        self.config
            .weights
            .as_ref()
            .and_then(|w| w.get(key).copied())
            .unwrap_or(1.0)
    }

    fn analyse(&self, name: &str, trace: &Trace) -> Option<FeatureSet> {
        let config = &self.config;
        let window = AnalysisWindow {
            start: config.analysis_start_time,
            end: config.analysis_end_time,
        };
        let mut analysis =
            match IClampAnalysis::new(trace, &window, config.analysis_var, config.smoothing) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(trace = name, "could not prepare trace for analysis: {}", e);
                    return None;
                }
            };
        match analysis.analyse() {
            Ok(features) => features.cloned(),
            Err(e) => {
                warn!(trace = name, "analysis failed: {}", e);
                None
            }
        }
    }

    /// Fitness of the traces of one simulation.
    pub fn traces_fitness(&self, traces: &TraceMap) -> f64 {
        let features: BTreeMap<&str, FeatureSet> = traces
            .iter()
            .filter_map(|(name, trace)| Some((name.as_str(), self.analyse(name, trace)?)))
            .collect();

        let mut fitness = 0.0;
        for (key, &target) in &self.config.targets {
            let weight = self.weight(key);
            if weight == 0.0 {
                continue;
            }

            let measured = features
                .get(key.trace.as_str())
                .and_then(|f| f.get(key.feature))
                .filter(|v| v.is_finite());

            match measured {
                Some(value) => {
                    let cost = self.config.cost_function.cost(value, target);
                    debug!(%key, value, target, weight, cost, "examining target");
                    fitness += weight * cost;
                }
                None => {
                    debug!(%key, weight, "target not measured, charging full weight");
                    fitness += weight;
                }
            }
        }
        fitness
    }
}

impl<C: NetworkController> Evaluator for NetworkEvaluator<C> {
    fn evaluate(&self, candidates: &[Candidate]) -> Result<Vec<f64>> {
        let runs = self.controller.run(candidates, &self.config.parameters)?;
        if runs.len() != candidates.len() {
            return Err(TuneError::ControllerError(format!(
                "controller returned {} results for {} candidates",
                runs.len(),
                candidates.len()
            )));
        }

        Ok(candidates
            .iter()
            .zip(&runs)
            .map(|(candidate, traces)| {
                let fitness = self.traces_fitness(traces);
                info!(?candidate, fitness, "candidate evaluated");
                fitness
            })
            .collect())
    }
}
