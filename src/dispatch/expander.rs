use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::ResponseWindow;
use crate::baseline::BaselineDataset;
use crate::domain::{
    round2, AllocationEntry, DeviceCatalog, DeviceId, DevicePlan, DispatchPlan, DispatchRule,
    SeriesPoint,
};

/// Fixed response price per unit, used unless the caller overrides it.
pub const DEFAULT_UNIT_PRICE: f64 = 3.0;

/// Allocation and baseline do not line up. Fatal for the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("device `{0}` has no dispatch rule in the device catalog")]
    UnknownDevice(DeviceId),
    #[error("device `{0}` is allocated but absent from the baseline dataset")]
    MissingBaseline(DeviceId),
}

/// Expands aggregate per-device allocations into adjusted time series.
#[derive(Debug, Clone)]
pub struct DispatchExpander {
    catalog: Arc<DeviceCatalog>,
    window: ResponseWindow,
    unit_price: f64,
}

impl DispatchExpander {
    pub fn new(catalog: Arc<DeviceCatalog>, window: ResponseWindow) -> Self {
        Self {
            catalog,
            window,
            unit_price: DEFAULT_UNIT_PRICE,
        }
    }

    pub fn with_unit_price(mut self, unit_price: f64) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn window(&self) -> ResponseWindow {
        self.window
    }

    /// Builds the plan for every entry of `allocation`, in order.
    ///
    /// `cost` is keyed by device; a device without a cost entry is priced at zero
    /// cost. Every allocated device must exist in both the catalog and `baseline`.
    pub fn expand(
        &self,
        allocation: &[AllocationEntry],
        cost: &BTreeMap<DeviceId, f64>,
        baseline: &BaselineDataset,
    ) -> Result<DispatchPlan, DispatchError> {
        let window_idx = self.window.indices(baseline.timestamps());
        let intervals = window_idx.len();
        let mut devices = Vec::with_capacity(allocation.len());

        for entry in allocation {
            let rule = self
                .catalog
                .rule_for(&entry.device)
                .ok_or_else(|| DispatchError::UnknownDevice(entry.device.clone()))?;
            let series = baseline
                .series(&entry.device)
                .ok_or_else(|| DispatchError::MissingBaseline(entry.device.clone()))?;

            let mut adjusted = series.to_vec();
            // MW -> kW summed over the window
            let magnitude = entry.value * 1000.0 * intervals as f64;
            apply_rule(rule, &mut adjusted, &window_idx, entry.value, magnitude);

            let unit_cost = cost.get(&entry.device).copied().unwrap_or(0.0);
            let profit = round2((self.unit_price - unit_cost) * entry.value * 1000.0);
            debug!(
                device = %entry.device,
                allocated = entry.value,
                intervals,
                profit,
                "device expanded"
            );

            devices.push(DevicePlan {
                device_id: entry.device.clone(),
                display_name: self
                    .catalog
                    .display_name(&entry.device)
                    .unwrap_or(entry.device.as_str())
                    .to_string(),
                allocated_amount: entry.value,
                baseline: to_points(baseline, series),
                adjusted: to_points(baseline, &adjusted),
                unit_price: self.unit_price,
                unit_cost,
                profit,
            });
        }

        Ok(DispatchPlan {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            window_start: self.window.start,
            window_end: self.window.end,
            window_intervals: intervals,
            devices,
        })
    }
}

fn to_points(baseline: &BaselineDataset, values: &[f64]) -> Vec<SeriesPoint> {
    baseline
        .timestamps()
        .iter()
        .zip(values)
        .map(|(t, v)| SeriesPoint {
            time: *t,
            value: round2(*v),
        })
        .collect()
}

fn apply_rule(
    rule: DispatchRule,
    values: &mut [f64],
    window: &[usize],
    allocation: f64,
    magnitude: f64,
) {
    match rule {
        DispatchRule::PassThrough => {}
        DispatchRule::FullCurtailment => {
            if allocation > 0.0 {
                for &i in window {
                    values[i] = 0.0;
                }
            }
        }
        DispatchRule::UniformCurtailment => {
            if window.is_empty() {
                return;
            }
            let reduce_each = magnitude / window.len() as f64;
            for &i in window {
                values[i] = (values[i] - reduce_each).max(0.0);
            }
        }
        DispatchRule::HeadroomStorage { rated_magnitude } => {
            distribute_by_headroom(values, window, magnitude, rated_magnitude)
        }
    }
}

/// Room a storage sample has to absorb an increment.
fn headroom(value: f64, rated: f64) -> f64 {
    if value < 0.0 {
        value.abs()
    } else if value < rated {
        rated - value
    } else {
        0.0
    }
}

/// Spreads `magnitude` over the window in proportion to each sample's headroom.
///
/// A negative (discharging) sample is first pulled toward zero, any remainder is
/// added on top and capped at `rated`. With no headroom at all, or a
/// non-positive magnitude, the series is left as it is.
pub(crate) fn distribute_by_headroom(
    values: &mut [f64],
    window: &[usize],
    magnitude: f64,
    rated: f64,
) {
    if magnitude <= 0.0 {
        return;
    }
    let available: Vec<f64> = window.iter().map(|&i| headroom(values[i], rated)).collect();
    let total: f64 = available.iter().sum();
    if total <= 0.0 {
        return;
    }

    for (&i, room) in window.iter().zip(&available) {
        let increment = room / total * magnitude;
        let v = values[i];
        let next = if v < 0.0 {
            let offset = v.abs().min(increment);
            let leftover = increment - offset;
            if leftover > 0.0 {
                (v + offset + leftover).min(rated)
            } else {
                v + offset
            }
        } else {
            (v + increment).min(rated)
        };
        values[i] = round2(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineDataset;
    use chrono::{NaiveDate, NaiveDateTime};
    use proptest::prelude::*;
    use rstest::rstest;

    /// 15:30 .. 17:15 in 15 minute steps; window samples are indices 2..=5.
    fn axis() -> Vec<NaiveDateTime> {
        let start = NaiveDate::from_ymd_opt(2025, 8, 4)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap();
        (0..8)
            .map(|i| start + chrono::Duration::minutes(15 * i))
            .collect()
    }

    fn dataset() -> BaselineDataset {
        BaselineDataset::new(
            axis(),
            BTreeMap::from([
                ("PV".into(), vec![100.0, 95.5, 90.0, 80.0, 70.0, 60.0, 50.0, 40.0]),
                ("EV".into(), vec![20.0; 8]),
                (
                    "HVAC".into(),
                    vec![3000.0, 3000.0, 3000.0, 2500.0, 1000.0, 3000.0, 3000.0, 3000.0],
                ),
                ("ESS_HBN".into(), vec![0.0, 0.0, -400.0, 200.0, 1200.0, 600.0, 0.0, 0.0]),
                ("ESS_ML".into(), vec![1300.0; 8]),
            ]),
        )
        .unwrap()
    }

    fn expander() -> DispatchExpander {
        DispatchExpander::new(Arc::new(DeviceCatalog::default()), ResponseWindow::default())
    }

    fn alloc(device: &str, value: f64) -> Vec<AllocationEntry> {
        vec![AllocationEntry {
            device: device.into(),
            value,
        }]
    }

    fn values(plan: &DispatchPlan, device: &str) -> (Vec<f64>, Vec<f64>) {
        let d = plan.device(&device.into()).unwrap();
        (
            d.baseline.iter().map(|p| p.value).collect(),
            d.adjusted.iter().map(|p| p.value).collect(),
        )
    }

    #[rstest]
    #[case(0.0)]
    #[case(3.6)]
    #[case(-1.0)]
    fn pass_through_ignores_allocation(#[case] value: f64) {
        let plan = expander()
            .expand(&alloc("PV", value), &BTreeMap::new(), &dataset())
            .unwrap();
        let (base, adj) = values(&plan, "PV");
        assert_eq!(base, adj);
    }

    #[test]
    fn full_curtailment_zeroes_window_only() {
        let plan = expander()
            .expand(&alloc("EV", 2.2), &BTreeMap::new(), &dataset())
            .unwrap();
        let (base, adj) = values(&plan, "EV");
        for i in 0..8 {
            if (2..=5).contains(&i) {
                assert_eq!(adj[i], 0.0);
            } else {
                assert_eq!(adj[i], base[i]);
            }
        }
    }

    #[test]
    fn full_curtailment_needs_positive_allocation() {
        let plan = expander()
            .expand(&alloc("EV", 0.0), &BTreeMap::new(), &dataset())
            .unwrap();
        let (base, adj) = values(&plan, "EV");
        assert_eq!(base, adj);
    }

    #[test]
    fn uniform_curtailment_subtracts_evenly_with_floor() {
        let plan = expander()
            .expand(&alloc("HVAC", 2.0), &BTreeMap::new(), &dataset())
            .unwrap();
        let (_, adj) = values(&plan, "HVAC");
        // 2 MW over 4 intervals = 8000 spread as 2000 per interval
        assert_eq!(&adj[2..=5], &[1000.0, 500.0, 0.0, 1000.0]);
        assert_eq!(adj[0], 3000.0);
        assert_eq!(adj[7], 3000.0);
    }

    #[test]
    fn storage_offsets_discharge_then_charges_up_to_rating() {
        let plan = expander()
            .expand(&alloc("ESS_HBN", 0.5), &BTreeMap::new(), &dataset())
            .unwrap();
        let (base, adj) = values(&plan, "ESS_HBN");
        // headroom: 400, 1000, 0, 600 -> total 2000 == magnitude (0.5 * 1000 * 4)
        assert_eq!(&adj[2..=5], &[0.0, 1200.0, 1200.0, 1200.0]);
        assert_eq!(&adj[..2], &base[..2]);
        assert_eq!(&adj[6..], &base[6..]);
    }

    #[test]
    fn storage_without_headroom_is_untouched() {
        let plan = expander()
            .expand(&alloc("ESS_ML", 1.0), &BTreeMap::new(), &dataset())
            .unwrap();
        let (base, adj) = values(&plan, "ESS_ML");
        assert_eq!(base, adj);
    }

    #[test]
    fn profit_uses_unit_price_and_cost() {
        let cost = BTreeMap::from([("HVAC".into(), 0.1)]);
        let plan = expander()
            .with_unit_price(3.0)
            .expand(&alloc("HVAC", 6.0), &cost, &dataset())
            .unwrap();
        let d = plan.device(&"HVAC".into()).unwrap();
        assert_eq!(d.profit, 17400.0);
        assert_eq!(plan.window_intervals, 4);
        assert_eq!(plan.total_profit(), 17400.0);
    }

    #[test]
    fn timestamps_are_preserved() {
        let plan = expander()
            .expand(&alloc("ESS_HBN", 0.3), &BTreeMap::new(), &dataset())
            .unwrap();
        let d = plan.device(&"ESS_HBN".into()).unwrap();
        assert_eq!(d.adjusted.len(), d.baseline.len());
        assert!(d
            .adjusted
            .iter()
            .zip(&d.baseline)
            .all(|(a, b)| a.time == b.time));
    }

    #[test]
    fn device_missing_from_baseline_fails_loudly() {
        let err = expander()
            .expand(&alloc("ESS_HY", 1.0), &BTreeMap::new(), &dataset())
            .unwrap_err();
        assert_eq!(err, DispatchError::MissingBaseline("ESS_HY".into()));
    }

    #[test]
    fn device_outside_catalog_fails_loudly() {
        let err = expander()
            .expand(&alloc("WIND", 1.0), &BTreeMap::new(), &dataset())
            .unwrap_err();
        assert_eq!(err, DispatchError::UnknownDevice("WIND".into()));
    }

    proptest! {
        #[test]
        fn storage_stays_within_rating(
            base in proptest::collection::vec(-1200.0f64..1200.0, 6),
            magnitude in 0.0f64..20_000.0,
        ) {
            let rated = 1200.0;
            let window: Vec<usize> = (0..base.len()).collect();
            let mut values = base.clone();
            distribute_by_headroom(&mut values, &window, magnitude, rated);
            for v in &values {
                prop_assert!(v.abs() <= rated + 1e-9);
            }
        }

        #[test]
        fn storage_delivers_requested_magnitude_when_room_allows(
            base in proptest::collection::vec(-1200.0f64..1200.0, 6),
            share in 0.0f64..1.0,
        ) {
            let rated = 1200.0;
            let window: Vec<usize> = (0..base.len()).collect();
            let total_room: f64 = base.iter().map(|&v| headroom(v, rated)).sum();
            let magnitude = total_room * share;
            let mut values = base.clone();
            distribute_by_headroom(&mut values, &window, magnitude, rated);
            let delivered: f64 = values.iter().zip(&base).map(|(a, b)| a - b).sum();
            prop_assert!((delivered - magnitude).abs() <= 0.01 * base.len() as f64);
        }

        #[test]
        fn storage_never_moves_without_headroom(magnitude in 0.0f64..5_000.0) {
            let base = vec![1200.0, 1500.0, 1300.0];
            let mut values = base.clone();
            distribute_by_headroom(&mut values, &[0, 1, 2], magnitude, 1200.0);
            prop_assert_eq!(values, base);
        }
    }
}
