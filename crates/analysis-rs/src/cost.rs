//! Per-feature cost functions.

use serde::{Deserialize, Serialize};

/// Normalized cost of a measured value against a target, in `[0, 1)`.
///
/// 0 is a complete match and values approach 1 as the two move apart. Without
/// an explicit sharpness `q`, it is chosen so that the cost is 0.7 when the
/// difference is ten times the target (`7/300` for a zero target). Higher `q`
/// gives a sharper function. Non-finite results are reported as 1.
pub fn normalised_cost_function(value: f64, target: f64, q: Option<f64>) -> f64 {
    if value == target {
        return 0.0;
    }
    let q = q.unwrap_or_else(|| {
        if target == 0.0 {
            7.0 / 300.0
        } else {
            7.0 / (300.0 * target * target)
        }
    });

    let cost = 1.0 - 1.0 / (q * (target - value).powi(2) + 1.0);
    if cost.is_finite() {
        cost
    } else {
        1.0
    }
}

/// Agreement of a value with a target, in `(0, 1]`: 1 is a complete match.
///
/// `base^(-x)` with `x = ((value - target) / (target + 0.01))²`.
pub fn alpha_normalised_cost_function(value: f64, target: f64, base: f64) -> f64 {
    let x = ((value - target) / (target + 0.01)).powi(2);
    base.powf(-x)
}

/// Cost function used to turn a feature mismatch into a fitness contribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostFunction {
    Normalised {
        #[serde(default)]
        q: Option<f64>,
    },
    /// One minus [`alpha_normalised_cost_function`], so that 0 is a match
    Alpha { base: f64 },
}

impl Default for CostFunction {
    fn default() -> Self {
        CostFunction::Normalised { q: None }
    }
}

impl CostFunction {
    pub fn cost(&self, value: f64, target: f64) -> f64 {
        match *self {
            CostFunction::Normalised { q } => normalised_cost_function(value, target, q),
            CostFunction::Alpha { base } => {
                let agreement = alpha_normalised_cost_function(value, target, base);
                if agreement.is_finite() {
                    1.0 - agreement
                } else {
                    1.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_match() {
        for target in [-65.0, 0.0, 0.3, 4.0, 1e6] {
            assert_eq!(normalised_cost_function(target, target, None), 0.0);
            assert_relative_eq!(alpha_normalised_cost_function(target, target, 10.0), 1.0);
            assert_eq!(CostFunction::Alpha { base: 10.0 }.cost(target, target), 0.0);
        }
    }

    #[test]
    fn test_default_sharpness() {
        // Difference of ten times the target costs 0.7
        let cost = normalised_cost_function(110.0, 10.0, None);
        assert_relative_eq!(cost, 0.7, epsilon = 1e-12);

        let zero_target = normalised_cost_function(10.0, 0.0, None);
        assert_relative_eq!(zero_target, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_range_and_monotonic() {
        let mut last = 0.0;
        for value in [5.0, 10.0, 50.0, 500.0, 5e6] {
            let cost = normalised_cost_function(value, 4.0, None);
            assert!(cost > last && cost < 1.0);
            last = cost;
        }
    }

    #[test]
    fn test_non_finite_is_worst() {
        assert_eq!(normalised_cost_function(f64::NAN, 4.0, None), 1.0);
        assert_eq!(normalised_cost_function(f64::INFINITY, 4.0, None), 1.0);
    }

    #[test]
    fn test_explicit_q() {
        assert_relative_eq!(normalised_cost_function(3.0, 1.0, Some(1.0)), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_cost_function_config() {
        let c: CostFunction = serde_json::from_str(r#"{"kind": "normalised"}"#).unwrap();
        assert_eq!(c, CostFunction::default());

        let a: CostFunction = serde_json::from_str(r#"{"kind": "alpha", "base": 2.0}"#).unwrap();
        assert_eq!(a, CostFunction::Alpha { base: 2.0 });
    }
}
