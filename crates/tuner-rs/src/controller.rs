//! Controllers: turn candidate parameter vectors into voltage traces.
//!
//! A controller receives the whole batch of candidates for a generation and
//! must return exactly one trace per candidate, in the same order. The model
//! controllers here fan out over a rayon pool; `collect` on an indexed
//! parallel iterator keeps the input order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spiketune_analysis::parse_trace;
use spiketune_core::{Candidate, ParameterSet, Result, Time, Trace, TuneError};
use std::f64::consts::PI;
use std::process::Command;
use tracing::{debug, info};

/// Runs simulations for a batch of candidates.
pub trait Controller: Send + Sync {
    /// One trace per candidate, in candidate order.
    fn run(&self, candidates: &[Candidate], parameters: &[String]) -> Result<Vec<Trace>>;
}

impl<C: Controller + ?Sized> Controller for Box<C> {
    fn run(&self, candidates: &[Candidate], parameters: &[String]) -> Result<Vec<Trace>> {
        (**self).run(candidates, parameters)
    }
}

/// Run `simulate` for each candidate in parallel, keeping candidate order.
fn run_parallel<F>(candidates: &[Candidate], parameters: &[String], simulate: F) -> Result<Vec<Trace>>
where
    F: Fn(&ParameterSet) -> Result<Trace> + Sync,
{
    candidates
        .par_iter()
        .map(|candidate| {
            let params = ParameterSet::zip(parameters, candidate)?;
            debug!("running individual: {}", params);
            simulate(&params)
        })
        .collect()
}

/// Sample times `0, dt, 2dt, ...` up to and including `sim_time`.
fn time_base(sim_time: Time, dt: Time) -> Result<Vec<Time>> {
    if !(dt > 0.0) || !(sim_time >= 0.0) {
        return Err(TuneError::InvalidInput(format!(
            "need dt > 0 and sim_time >= 0, got dt = {}, sim_time = {}",
            dt, sim_time
        )));
    }
    // Tolerance keeps sim_time itself when sim_time / dt is an integer up to rounding
    let steps = (sim_time / dt + 1e-9).floor() as usize;
    Ok((0..=steps).map(|i| i as f64 * dt).collect())
}

// ============================================================================
// SINE WAVE
// ============================================================================

/// Sine surrogate `v = offset + amp * sin(2 pi t / period)`.
///
/// Cheap stand-in for a neuron model; parameters `amp`, `period`, `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SineWaveController {
    /// Simulated duration (ms)
    pub sim_time: Time,
    /// Sampling step (ms)
    pub dt: Time,
}

impl SineWaveController {
    pub fn new(sim_time: Time, dt: Time) -> Self {
        Self { sim_time, dt }
    }

    pub fn simulate(&self, params: &ParameterSet) -> Result<Trace> {
        let amp = params.require("amp")?;
        let period = params.require("period")?;
        let offset = params.require("offset")?;

        let t = time_base(self.sim_time, self.dt)?;
        let v = t
            .iter()
            .map(|&x| offset + amp * (2.0 * PI * x / period).sin())
            .collect();
        Trace::from_vecs(t, v)
    }
}

impl Controller for SineWaveController {
    fn run(&self, candidates: &[Candidate], parameters: &[String]) -> Result<Vec<Trace>> {
        run_parallel(candidates, parameters, |p| self.simulate(p))
    }
}

// ============================================================================
// IZHIKEVICH
// ============================================================================

/// Spike peak at which the membrane is reset (mV)
const IZHIKEVICH_PEAK: f64 = 30.0;

/// Izhikevich simple model under constant current injection.
///
/// ```text
/// dv/dt = 0.04 v² + 5 v + 140 - u + I
/// du/dt = a (b v - u)
/// if v >= 30 mV: v <- c, u <- u + d
/// ```
///
/// Parameters `a`, `b`, `c`, `d` and `i_ext`; any not supplied take the
/// regular-spiking values (0.02, 0.2, -65, 8) and `i_ext = 10`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IzhikevichController {
    pub sim_time: Time,
    pub dt: Time,
}

impl IzhikevichController {
    pub fn new(sim_time: Time, dt: Time) -> Self {
        Self { sim_time, dt }
    }

    pub fn simulate(&self, params: &ParameterSet) -> Result<Trace> {
        let a = params.get("a").unwrap_or(0.02);
        let b = params.get("b").unwrap_or(0.2);
        let c = params.get("c").unwrap_or(-65.0);
        let d = params.get("d").unwrap_or(8.0);
        let i_ext = params.get("i_ext").unwrap_or(10.0);

        let t = time_base(self.sim_time, self.dt)?;
        let dt = self.dt;

        let mut v = -65.0;
        let mut u = b * v;
        let mut trace = Vec::with_capacity(t.len());

        for _ in 0..t.len() {
            if v >= IZHIKEVICH_PEAK {
                trace.push(IZHIKEVICH_PEAK);
                v = c;
                u += d;
            } else {
                trace.push(v);
            }

            let dv = 0.04 * v * v + 5.0 * v + 140.0 - u + i_ext;
            let du = a * (b * v - u);
            v += dt * dv;
            u += dt * du;
        }

        Trace::from_vecs(t, trace)
    }
}

impl Controller for IzhikevichController {
    fn run(&self, candidates: &[Candidate], parameters: &[String]) -> Result<Vec<Trace>> {
        run_parallel(candidates, parameters, |p| self.simulate(p))
    }
}

// ============================================================================
// EXTERNAL COMMAND
// ============================================================================

/// Runs an external simulator once per candidate.
///
/// The program is called with `args` followed by one `name=value` argument per
/// parameter, and must print a two-column trace (ms, mV) on standard output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandController {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandController {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn simulate(&self, params: &ParameterSet) -> Result<Trace> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(params.iter().map(|(name, value)| format!("{}={}", name, value)))
            .output()
            .map_err(|e| {
                TuneError::ControllerError(format!("could not run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(TuneError::ControllerError(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let trace = parse_trace(&String::from_utf8_lossy(&output.stdout), 1.0)?;
        if trace.is_empty() {
            return Err(TuneError::ControllerError(format!(
                "'{}' produced no samples for {}",
                self.program, params
            )));
        }
        Ok(trace)
    }
}

impl Controller for CommandController {
    fn run(&self, candidates: &[Candidate], parameters: &[String]) -> Result<Vec<Trace>> {
        info!(program = %self.program, candidates = candidates.len(), "running external simulations");
        run_parallel(candidates, parameters, |p| self.simulate(p))
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Controller selection in a fit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerConfig {
    SineWave(SineWaveController),
    Izhikevich(IzhikevichController),
    Command(CommandController),
}

impl ControllerConfig {
    pub fn build(self) -> Box<dyn Controller> {
        match self {
            ControllerConfig::SineWave(c) => Box::new(c),
            ControllerConfig::Izhikevich(c) => Box::new(c),
            ControllerConfig::Command(c) => Box::new(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_time_base_includes_end() {
        let t = time_base(1000.0, 0.1).unwrap();
        assert_eq!(t.len(), 10_001);
        assert_relative_eq!(t[10_000], 1000.0, epsilon = 1e-9);
        assert!(time_base(10.0, 0.0).is_err());
    }

    #[test]
    fn test_sine_wave() {
        let controller = SineWaveController::new(1000.0, 0.1);
        let params = ParameterSet::zip(&names(&["amp", "period", "offset"]), &[65.0, 250.0, -10.0]).unwrap();
        let trace = controller.simulate(&params).unwrap();

        assert_eq!(trace.len(), 10_001);
        assert_relative_eq!(trace.v()[0], -10.0, epsilon = 1e-12);
        assert_relative_eq!(trace.v()[625], 55.0, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_parameter() {
        let controller = SineWaveController::new(10.0, 1.0);
        let err = controller
            .run(&[vec![1.0, 2.0]], &names(&["amp", "period"]))
            .unwrap_err();
        assert!(matches!(err, TuneError::MissingParameter(ref p) if p == "offset"));
    }

    #[test]
    fn test_batch_order_is_preserved() {
        let controller = SineWaveController::new(10.0, 1.0);
        let candidates: Vec<Candidate> = (0..64).map(|i| vec![0.0, 100.0, i as f64]).collect();
        let traces = controller
            .run(&candidates, &names(&["amp", "period", "offset"]))
            .unwrap();

        assert_eq!(traces.len(), 64);
        for (i, trace) in traces.iter().enumerate() {
            assert_eq!(trace.v()[0], i as f64);
        }
    }

    #[test]
    fn test_izhikevich_spikes() {
        let controller = IzhikevichController::new(500.0, 0.1);
        let params = ParameterSet::zip(&names(&["i_ext"]), &[10.0]).unwrap();
        let trace = controller.simulate(&params).unwrap();

        let spikes = trace.v().iter().filter(|&&v| v == IZHIKEVICH_PEAK).count();
        assert!(spikes >= 3, "expected tonic spiking, got {} spikes", spikes);
        assert!(trace.v().iter().all(|v| v.is_finite()));

        let silent = ParameterSet::zip(&names(&["i_ext"]), &[0.0]).unwrap();
        let rest = controller.simulate(&silent).unwrap();
        assert!(rest.v().iter().all(|&v| v < IZHIKEVICH_PEAK));
    }

    #[test]
    fn test_controller_config() {
        let json = r#"{"type": "sine_wave", "sim_time": 1000.0, "dt": 0.1}"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, ControllerConfig::SineWave(SineWaveController::new(1000.0, 0.1)));

        let json = r#"{"type": "command", "program": "./simulate.sh"}"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config, ControllerConfig::Command(ref c) if c.args.is_empty()));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_controller() {
        let controller = CommandController::new("sh").with_args(vec![
            "-c".into(),
            "printf '0 -65\\n0.1 -64\\n0.2 -63\\n'".into(),
        ]);
        let traces = controller
            .run(&[vec![1.0], vec![2.0]], &names(&["gbar"]))
            .unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].v()[2], -63.0);

        let failing = CommandController::new("sh").with_args(vec!["-c".into(), "exit 3".into()]);
        assert!(failing.run(&[vec![1.0]], &names(&["gbar"])).is_err());
    }
}
