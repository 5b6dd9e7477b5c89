use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::untrusted;
use super::DeviceId;

/// Solver status as reported by the result interpreter.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Error,
    Warning,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationEntry {
    pub device: DeviceId,
    pub value: f64,
}

/// Structured reading of one execution's raw output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interpretation {
    pub status: SolveStatus,
    pub allocations: Vec<AllocationEntry>,
    pub explanation: String,
}

impl Interpretation {
    /// Interpretation used when the interpreter itself failed.
    pub fn failed(devices: &[DeviceId], message: impl Into<String>) -> Self {
        Self {
            status: SolveStatus::Error,
            allocations: devices
                .iter()
                .map(|d| AllocationEntry {
                    device: d.clone(),
                    value: 0.0,
                })
                .collect(),
            explanation: message.into(),
        }
    }

    /// Reads an untrusted interpreter payload. Unknown statuses map to `Unknown`,
    /// entries without a readable name are skipped, unreadable values become 0.0.
    pub fn from_untrusted(payload: &Value) -> Self {
        let status = untrusted::text(payload.get("status"))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or_default();
        let allocations = match payload.get("variables") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    let name = untrusted::text(item.get("name"))?;
                    Some(AllocationEntry {
                        device: DeviceId::new(name.trim()),
                        value: item.get("value").and_then(untrusted::number).unwrap_or(0.0),
                    })
                })
                .collect(),
            _ => Vec::new(),
        };
        let explanation = untrusted::text(payload.get("interpretation"))
            .or_else(|| untrusted::text(payload.get("explanation")))
            .unwrap_or_else(|| "No interpretation provided".to_string());
        Self {
            status,
            allocations,
            explanation,
        }
    }

    /// Restricts the allocation list to `devices`, in that order, inserting 0.0
    /// for every device the interpreter did not mention. Returns the identifiers
    /// that were dropped because they were not requested.
    pub fn normalize(mut self, devices: &[DeviceId]) -> (Self, Vec<DeviceId>) {
        let dropped = self
            .allocations
            .iter()
            .filter(|e| !devices.contains(&e.device))
            .map(|e| e.device.clone())
            .collect();
        self.allocations = devices
            .iter()
            .map(|d| AllocationEntry {
                device: d.clone(),
                value: self
                    .allocations
                    .iter()
                    .find(|e| &e.device == d)
                    .map(|e| if e.value.is_finite() { e.value } else { 0.0 })
                    .unwrap_or(0.0),
            })
            .collect();
        (self, dropped)
    }

    pub fn value_of(&self, device: &DeviceId) -> Option<f64> {
        self.allocations
            .iter()
            .find(|e| &e.device == device)
            .map(|e| e.value)
    }

    pub fn total_allocation(&self) -> f64 {
        self.allocations.iter().map(|e| e.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(names: &[&str]) -> Vec<DeviceId> {
        names.iter().map(|n| DeviceId::from(*n)).collect()
    }

    #[test]
    fn unmentioned_devices_get_zero() {
        let raw = Interpretation::from_untrusted(&json!({
            "status": "Optimal",
            "variables": [{"name": "HVAC", "value": 6.0}, {"name": "EV", "value": "2.2"}],
            "interpretation": "ok"
        }));
        let (interp, dropped) = raw.normalize(&ids(&["HVAC", "ESS_HBN", "EV"]));
        assert!(dropped.is_empty());
        assert_eq!(interp.status, SolveStatus::Optimal);
        assert_eq!(
            interp
                .allocations
                .iter()
                .map(|e| (e.device.as_str(), e.value))
                .collect::<Vec<_>>(),
            vec![("HVAC", 6.0), ("ESS_HBN", 0.0), ("EV", 2.2)]
        );
        assert!((interp.total_allocation() - 8.2).abs() < 1e-9);
    }

    #[test]
    fn unrequested_devices_are_dropped_and_reported() {
        let raw = Interpretation::from_untrusted(&json!({
            "status": "feasible",
            "variables": [{"name": "WIND", "value": 1.0}]
        }));
        let (interp, dropped) = raw.normalize(&ids(&["PV"]));
        assert_eq!(dropped, ids(&["WIND"]));
        assert_eq!(interp.value_of(&"PV".into()), Some(0.0));
        assert_eq!(interp.explanation, "No interpretation provided");
    }

    #[test]
    fn garbage_status_reads_as_unknown() {
        let interp = Interpretation::from_untrusted(&json!({"status": 42, "variables": "none"}));
        assert_eq!(interp.status, SolveStatus::Unknown);
        assert!(interp.allocations.is_empty());
    }

    #[test]
    fn failed_interpretation_lists_every_device() {
        let interp = Interpretation::failed(&ids(&["HVAC", "PV"]), "boom");
        assert_eq!(interp.status, SolveStatus::Error);
        assert_eq!(interp.allocations.len(), 2);
    }
}
