use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DeviceId, Formulation, Interpretation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub time: NaiveDateTime,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DevicePlan {
    pub device_id: DeviceId,
    pub display_name: String,
    /// Allocation in the formulation's unit (MW).
    pub allocated_amount: f64,
    pub baseline: Vec<SeriesPoint>,
    /// Same length and timestamps as `baseline`.
    pub adjusted: Vec<SeriesPoint>,
    pub unit_price: f64,
    pub unit_cost: f64,
    pub profit: f64,
}

/// Adjusted dispatch for every allocated device of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchPlan {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub window_intervals: usize,
    pub devices: Vec<DevicePlan>,
}

impl DispatchPlan {
    pub fn device(&self, id: &DeviceId) -> Option<&DevicePlan> {
        self.devices.iter().find(|d| &d.device_id == id)
    }

    pub fn total_profit(&self) -> f64 {
        round2(self.devices.iter().map(|d| d.profit).sum())
    }

    pub fn total_allocation(&self) -> f64 {
        self.devices.iter().map(|d| d.allocated_amount).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationRow {
    pub device_id: DeviceId,
    pub capacity: f64,
    pub allocated: f64,
    pub cost: f64,
    pub credit_score: f64,
}

/// Per-device view joining the formulation's arrays with the final allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationSummary {
    pub rows: Vec<AllocationRow>,
    pub total_allocated: f64,
}

impl AllocationSummary {
    pub fn build(formulation: &Formulation, interpretation: &Interpretation) -> Self {
        let capacity = formulation.capacity_by_device();
        let cost = formulation.cost_by_device();
        let credit = formulation.credit_by_device();
        let rows: Vec<AllocationRow> = interpretation
            .allocations
            .iter()
            .map(|entry| AllocationRow {
                device_id: entry.device.clone(),
                capacity: round2(capacity.get(&entry.device).copied().unwrap_or(0.0)),
                allocated: round2(entry.value),
                cost: round2(cost.get(&entry.device).copied().unwrap_or(0.0)),
                credit_score: round2(credit.get(&entry.device).copied().unwrap_or(0.0)),
            })
            .collect();
        let total_allocated = round2(interpretation.total_allocation());
        Self {
            rows,
            total_allocated,
        }
    }
}

/// Rounds half away from zero to two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
