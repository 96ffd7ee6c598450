//! # SpikeTune Core
//!
//! Shared types for fitting excitable-cell models against recorded or
//! simulated voltage traces.
//!
//! ## Pipeline
//!
//! | Stage | Crate | Output |
//! |-------|-------|--------|
//! | Controller | `spiketune-tuner` | one [`Trace`] per candidate |
//! | Analysis | `spiketune-analysis` | one [`FeatureSet`] per trace |
//! | Evaluator | `spiketune-tuner` | one fitness value per candidate |
//!
//! ## Conventions
//!
//! 1. Time in milliseconds, voltage in millivolts
//! 2. Fitness is minimized: 0 is a perfect match
//! 3. Feature names form a closed vocabulary ([`Feature`])

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Common errors
#[derive(Debug, Error)]
pub enum TuneError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Controller error: {0}")]
    ControllerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TuneError>;

/// Time point (ms)
pub type Time = f64;

/// Voltage (mV)
pub type Voltage = f64;

/// Parameter vector proposed by an optimizer, aligned by index with the
/// parameter name list.
pub type Candidate = Vec<f64>;

// ============================================================================
// TRACES
// ============================================================================

/// A (time, voltage) recording.
///
/// Both arrays have the same length and `t` is strictly increasing. Traces are
/// never mutated after construction; windowing and smoothing produce new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    t: Array1<Time>,
    v: Array1<Voltage>,
}

impl Trace {
    /// Build a trace, validating length and time ordering.
    pub fn new(t: Array1<Time>, v: Array1<Voltage>) -> Result<Self> {
        if t.len() != v.len() {
            return Err(TuneError::InvalidInput(format!(
                "time and voltage lengths differ ({} vs {})",
                t.len(),
                v.len()
            )));
        }
        if let Some(i) = (1..t.len()).find(|&i| t[i] <= t[i - 1]) {
            return Err(TuneError::InvalidInput(format!(
                "time must be strictly increasing (t[{}] = {} follows {})",
                i,
                t[i],
                t[i - 1]
            )));
        }
        Ok(Self { t, v })
    }

    pub fn from_vecs(t: Vec<Time>, v: Vec<Voltage>) -> Result<Self> {
        Self::new(Array1::from(t), Array1::from(v))
    }

    pub fn t(&self) -> &Array1<Time> {
        &self.t
    }

    pub fn v(&self) -> &Array1<Voltage> {
        &self.v
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Replace the voltage samples, keeping the time base.
    pub fn with_voltage(&self, v: Array1<Voltage>) -> Result<Self> {
        Self::new(self.t.clone(), v)
    }

    /// Index of the first sample whose time is nearest to `target`.
    pub fn nearest_index(&self, target: Time) -> Option<usize> {
        nearest_index(self.t.as_slice()?, target)
    }

    /// Slice to `[nearest(start), nearest(end))`, or to the end of the trace
    /// when the window is open.
    pub fn window(&self, window: &AnalysisWindow) -> Result<Self> {
        let start = self.nearest_index(window.start).unwrap_or(0);
        let end = match window.end {
            Some(end) => self.nearest_index(end).unwrap_or(0),
            None => self.len(),
        };

        if end <= start {
            return Err(TuneError::InvalidInput(format!(
                "analysis window {:?} selects no samples",
                window
            )));
        }

        Ok(Self {
            t: self.t.slice(s![start..end]).to_owned(),
            v: self.v.slice(s![start..end]).to_owned(),
        })
    }
}

/// First index of the value nearest to `target`.
pub fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &x) in values.iter().enumerate() {
        let d = (x - target).abs();
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}

/// Time range of a trace to analyse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: Time,
    pub end: Option<Time>,
}

impl AnalysisWindow {
    pub fn new(start: Time, end: Time) -> Self {
        Self { start, end: Some(end) }
    }

    pub fn from_start(start: Time) -> Self {
        Self { start, end: None }
    }
}

impl Default for AnalysisWindow {
    fn default() -> Self {
        Self::from_start(0.0)
    }
}

// ============================================================================
// FEATURE VOCABULARY
// ============================================================================

/// Scalar features extracted from a spiking trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AverageMinimum,
    AverageMaximum,
    MinPeakNo,
    MaxPeakNo,
    MeanSpikeFrequency,
    InterspikeTimeCovar,
    FirstSpikeTime,
    TroughPhaseAdaptation,
    SpikeWidthAdaptation,
    PeakDecayExponent,
    TroughDecayExponent,
    SpikeFrequencyAdaptation,
    SpikeBroadening,
    PeakLinearGradient,
    /// Phase-plane trajectory density error against a reference trace
    PptdError,
}

impl Feature {
    pub const ALL: [Feature; 15] = [
        Feature::AverageMinimum,
        Feature::AverageMaximum,
        Feature::MinPeakNo,
        Feature::MaxPeakNo,
        Feature::MeanSpikeFrequency,
        Feature::InterspikeTimeCovar,
        Feature::FirstSpikeTime,
        Feature::TroughPhaseAdaptation,
        Feature::SpikeWidthAdaptation,
        Feature::PeakDecayExponent,
        Feature::TroughDecayExponent,
        Feature::SpikeFrequencyAdaptation,
        Feature::SpikeBroadening,
        Feature::PeakLinearGradient,
        Feature::PptdError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::AverageMinimum => "average_minimum",
            Feature::AverageMaximum => "average_maximum",
            Feature::MinPeakNo => "min_peak_no",
            Feature::MaxPeakNo => "max_peak_no",
            Feature::MeanSpikeFrequency => "mean_spike_frequency",
            Feature::InterspikeTimeCovar => "interspike_time_covar",
            Feature::FirstSpikeTime => "first_spike_time",
            Feature::TroughPhaseAdaptation => "trough_phase_adaptation",
            Feature::SpikeWidthAdaptation => "spike_width_adaptation",
            Feature::PeakDecayExponent => "peak_decay_exponent",
            Feature::TroughDecayExponent => "trough_decay_exponent",
            Feature::SpikeFrequencyAdaptation => "spike_frequency_adaptation",
            Feature::SpikeBroadening => "spike_broadening",
            Feature::PeakLinearGradient => "peak_linear_gradient",
            Feature::PptdError => "pptd_error",
        }
    }

    /// Units of the measured value
    pub fn units(&self) -> &'static str {
        match self {
            Feature::AverageMinimum | Feature::AverageMaximum => "mV",
            Feature::MeanSpikeFrequency => "Hz",
            Feature::FirstSpikeTime => "ms",
            Feature::PeakDecayExponent
            | Feature::TroughDecayExponent
            | Feature::PeakLinearGradient => "mV/ms",
            Feature::TroughPhaseAdaptation
            | Feature::SpikeWidthAdaptation
            | Feature::SpikeFrequencyAdaptation => "1/ms",
            _ => "",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self> {
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| TuneError::ParseError(format!("unknown feature '{}'", s)))
    }
}

/// Feature values measured on one trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet {
    values: BTreeMap<Feature, f64>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: Feature, value: f64) {
        self.values.insert(feature, value);
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.values.contains_key(&feature)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }

    /// Adopt the measured values as fitting targets.
    pub fn to_targets(&self) -> Targets {
        self.values.clone()
    }
}

impl FromIterator<(Feature, f64)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (Feature, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Target value per feature
pub type Targets = BTreeMap<Feature, f64>;

/// Weight per feature. Missing entries weigh 1.0.
pub type Weights = BTreeMap<Feature, f64>;

/// Weight applied to `feature`: 1.0 without a weight map or without an entry.
pub fn weight_of(weights: Option<&Weights>, feature: Feature) -> f64 {
    weights
        .and_then(|w| w.get(&feature).copied())
        .unwrap_or(1.0)
}

/// Fitness of a trace on which nothing could be measured.
pub fn worst_case_fitness(targets: &Targets, weights: Option<&Weights>) -> f64 {
    targets.keys().map(|&f| weight_of(weights, f)).sum()
}

// ============================================================================
// ANALYSIS CONFIGURATION
// ============================================================================

/// Peak detection and feature settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisVar {
    /// Amount by which a peak must exceed both neighbours (mV)
    pub peak_delta: f64,
    /// Height at which spike widths are measured (mV)
    pub baseline: f64,
    /// Phase-plane samples at or below this dV/dt are ignored (mV/ms)
    pub dvdt_threshold: Option<f64>,
    /// Peaks below this value are discarded (mV)
    pub peak_threshold: Option<f64>,
}

impl Default for AnalysisVar {
    fn default() -> Self {
        Self {
            peak_delta: 0.0,
            baseline: 0.0,
            dvdt_threshold: None,
            peak_threshold: None,
        }
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Named parameter values for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: Vec<(String, f64)>,
}

impl ParameterSet {
    /// Pair parameter names with a candidate's values by position.
    pub fn zip(names: &[String], candidate: &[f64]) -> Result<Self> {
        if names.len() != candidate.len() {
            return Err(TuneError::InvalidInput(format!(
                "{} parameter names for a candidate of length {}",
                names.len(),
                candidate.len()
            )));
        }
        Ok(Self {
            values: names.iter().cloned().zip(candidate.iter().copied()).collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| TuneError::MissingParameter(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect();
        f.write_str(&parts.join(" "))
    }
}
