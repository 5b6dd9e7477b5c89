use serde::{Deserialize, Serialize};
use validator::Validate;

/// Power step of the inverse search. Golden scenarios depend on this exact value.
pub const DEFAULT_SEARCH_STEP: f64 = 100.0;
pub const DEFAULT_LOW: f64 = 20.0;
pub const DEFAULT_HIGH: f64 = 32.0;

/// Steady-state terminal condition (e.g. indoor temperature) reached by a
/// controllable load running at `power`.
///
/// Smooth S-curve from `high` at zero power down to `low` at rated power,
/// centred on half the rated capacity.
pub fn terminal_condition(rated_capacity: f64, power: f64, low: f64, high: f64) -> f64 {
    let x = -(power - rated_capacity / 2.0) / rated_capacity * 4.0;
    low + (high - low) * (1.0 + x.tanh()) / 2.0
}

/// Smallest power on the `step` grid over `[0, rated_capacity]` whose terminal
/// condition does not exceed `target`; `rated_capacity` when none does.
pub fn power_for_condition_with_step(
    target: f64,
    rated_capacity: f64,
    low: f64,
    high: f64,
    step: f64,
) -> f64 {
    let steps = (rated_capacity / step).floor() as u64;
    (0..=steps)
        .map(|i| i as f64 * step)
        .find(|&power| terminal_condition(rated_capacity, power, low, high) <= target)
        .unwrap_or(rated_capacity)
}

pub fn power_for_condition(target: f64, rated_capacity: f64, low: f64, high: f64) -> f64 {
    power_for_condition_with_step(target, rated_capacity, low, high, DEFAULT_SEARCH_STEP)
}

/// Signed capacity change, in the formulation's coarser unit (÷1000), needed to
/// move the terminal condition from `baseline` to `target`.
pub fn capacity_delta(target: f64, baseline: f64, rated_capacity: f64) -> f64 {
    let p_target = power_for_condition(target, rated_capacity, DEFAULT_LOW, DEFAULT_HIGH);
    let p_baseline = power_for_condition(baseline, rated_capacity, DEFAULT_LOW, DEFAULT_HIGH);
    (p_target - p_baseline) / 1000.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CurvePoint {
    pub power: f64,
    pub condition: f64,
}

/// Power/condition characteristic of the aggregated thermal load.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
#[validate(schema(function = "validate_bounds"))]
pub struct ComfortCurve {
    #[validate(range(exclusive_min = 0.0))]
    pub rated_capacity: f64,
    pub low: f64,
    pub high: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub search_step: f64,
    /// Condition the published response capacity was quoted at.
    pub baseline_condition: f64,
}

fn validate_bounds(curve: &ComfortCurve) -> Result<(), validator::ValidationError> {
    if curve.high > curve.low {
        Ok(())
    } else {
        Err(validator::ValidationError::new("high_must_exceed_low"))
    }
}

impl Default for ComfortCurve {
    fn default() -> Self {
        Self {
            rated_capacity: 20_000.0,
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
            search_step: DEFAULT_SEARCH_STEP,
            baseline_condition: 30.0,
        }
    }
}

impl ComfortCurve {
    pub fn condition_at(&self, power: f64) -> f64 {
        terminal_condition(self.rated_capacity, power, self.low, self.high)
    }

    pub fn power_for(&self, target: f64) -> f64 {
        power_for_condition_with_step(
            target,
            self.rated_capacity,
            self.low,
            self.high,
            self.search_step,
        )
    }

    /// Capacity delta relative to `baseline_condition`.
    pub fn delta_for(&self, target: f64) -> f64 {
        (self.power_for(target) - self.power_for(self.baseline_condition)) / 1000.0
    }

    /// Points over `[0, rated_capacity)` every `step`.
    pub fn sample(&self, step: f64) -> Vec<CurvePoint> {
        if step <= 0.0 {
            return Vec::new();
        }
        let steps = (self.rated_capacity / step).ceil() as u64;
        (0..steps)
            .map(|i| i as f64 * step)
            .filter(|&p| p < self.rated_capacity)
            .map(|power| CurvePoint {
                power,
                condition: self.condition_at(power),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn golden_inverse_values() {
        assert_eq!(power_for_condition(30.0, 20_000.0, 20.0, 32.0), 6000.0);
        assert_eq!(power_for_condition(25.0, 20_000.0, 20.0, 32.0), 10_900.0);
        assert_eq!(capacity_delta(25.0, 30.0, 20_000.0), 4.9);
    }

    #[test]
    fn unreachable_target_returns_rated_capacity() {
        assert_eq!(power_for_condition(19.0, 20_000.0, 20.0, 32.0), 20_000.0);
    }

    #[test]
    fn trivially_met_target_returns_zero() {
        assert_eq!(power_for_condition(40.0, 5_000.0, 20.0, 32.0), 0.0);
    }

    #[test]
    fn curve_struct_matches_free_functions() {
        let curve = ComfortCurve::default();
        assert!(curve.validate().is_ok());
        assert_eq!(curve.delta_for(25.0), 4.9);
        assert_eq!(curve.delta_for(30.0), 0.0);
    }

    #[test]
    fn inverted_bounds_fail_validation() {
        let curve = ComfortCurve {
            low: 32.0,
            high: 20.0,
            ..Default::default()
        };
        assert!(curve.validate().is_err());
    }

    #[test]
    fn sample_spans_half_open_range() {
        let curve = ComfortCurve {
            rated_capacity: 5000.0,
            ..Default::default()
        };
        let points = curve.sample(50.0);
        assert_eq!(points.len(), 100);
        assert_eq!(points[0].power, 0.0);
        assert_eq!(points.last().map(|p| p.power), Some(4950.0));
        assert!(curve.sample(0.0).is_empty());
    }

    proptest! {
        #[test]
        fn condition_is_non_increasing_in_power(
            rated in 1.0f64..100_000.0,
            low in -50.0f64..50.0,
            span in 0.1f64..40.0,
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
        ) {
            let high = low + span;
            let (p1, p2) = if a <= b {
                (a * rated, b * rated)
            } else {
                (b * rated, a * rated)
            };
            let c1 = terminal_condition(rated, p1, low, high);
            let c2 = terminal_condition(rated, p2, low, high);
            prop_assert!(c2 <= c1 + 1e-12);
            prop_assert!(c1 >= low - 1e-9 && c1 <= high + 1e-9);
        }

        #[test]
        fn equal_conditions_give_zero_delta(t in 15.0f64..40.0, rated in 100.0f64..50_000.0) {
            prop_assert_eq!(capacity_delta(t, t, rated), 0.0);
        }
    }
}
