//! # SpikeTune Analysis
//!
//! Feature extraction from current-clamp voltage traces.
//!
//! ## Stages
//!
//! - **Smoothing**: reflected-edge window convolution ([`smooth`])
//! - **Peak detection**: maxima and inter-peak minima ([`find_extrema`])
//! - **Features**: spike timing, shape and adaptation statistics
//! - **PPTD**: phase-plane trajectory density against a reference trace
//! - **Cost**: per-feature normalized distance to a target
//!
//! [`IClampAnalysis`] ties the stages together for one trace.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spiketune_analysis::{CostFunction, IClampAnalysis};
//! use spiketune_core::{AnalysisVar, AnalysisWindow};
//!
//! let mut analysis = IClampAnalysis::new(&trace, &AnalysisWindow::default(), AnalysisVar::default(), None)?;
//! if let Some(features) = analysis.analyse()? {
//!     println!("{} spikes", features.get(Feature::MaxPeakNo).unwrap_or(0.0));
//! }
//! ```

pub mod analysis;
pub mod cost;
pub mod extrema;
pub mod features;
pub mod io;
pub mod pptd;
pub mod smoothing;

pub use analysis::{IClampAnalysis, MIN_ANALYSABLE_PEAKS};
pub use cost::{alpha_normalised_cost_function, normalised_cost_function, CostFunction};
pub use extrema::{find_extrema, Extremum, TurningPoints};
pub use features::{
    burst_analyser, elburg_bursting, exp_fit, linear_fit, mean_spike_frequency, minima_phases,
    polyfit, single_spike_width, spike_broadening, spike_covar, spike_frequencies, spike_widths,
    three_spike_adaptation,
};
pub use io::{load_csv_data, parse_csv_data, parse_trace};
pub use pptd::{phase_plane, pptd, pptd_error, PhasePlane, PhasePlaneDensity};
pub use smoothing::{smooth, smooth_array, Smoothing, WindowKind};

use thiserror::Error;

/// Failure to compute a single feature
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("{what} needs at least {needed} values, got {got}")]
    InsufficientData {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("Fit failed: {0}")]
    FitFailed(&'static str),

    #[error("Spike does not cross baseline {baseline} mV")]
    BaselineNotCrossed { baseline: f64 },

    #[error("Phase-plane density is empty: {0}")]
    EmptyDensity(&'static str),

    #[error("Length mismatch: {0} vs {1}")]
    LengthMismatch(usize, usize),

    #[error("Undefined value: {0}")]
    Undefined(&'static str),
}
