use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::untrusted;
use super::{DeviceCatalog, DeviceId};

/// Malformed or incomplete formulation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FormulationError {
    #[error("formulation extraction failed: {0}")]
    Extraction(String),
    #[error("formulation payload is not an object")]
    NotAnObject,
    #[error("formulation lists no devices")]
    NoDevices,
    #[error("device `{0}` is not part of the device vocabulary")]
    UnknownDevice(DeviceId),
    #[error("device `{0}` is listed more than once")]
    DuplicateDevice(DeviceId),
    #[error("`{field}` has {actual} entries, expected {expected} (one per device)")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("`{field}[{index}]` is missing or not a finite number")]
    InvalidNumber { field: &'static str, index: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub name: String,
    pub domain: String,
    pub description: String,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ObjectiveSense {
    #[strum(to_string = "maximize", serialize = "max")]
    Maximize,
    #[strum(to_string = "minimize", serialize = "min")]
    Minimize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Objective {
    pub sense: ObjectiveSense,
    pub expression: String,
    pub description: String,
}

/// Parallel numeric arrays and constants the model text refers to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormulationNotes {
    pub arrays: BTreeMap<String, Vec<f64>>,
    pub remarks: String,
}

/// Structured optimization model derived from one request.
///
/// `device_names`, `response_cost`, `credit_scores` and `response_capacity` are
/// parallel: index `i` of every array describes `device_names[i]`. Callers get
/// identifier-keyed views through the `*_by_device` accessors, never positions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Formulation {
    pub variables: Vec<Variable>,
    pub objective: Objective,
    pub constraints: Vec<String>,
    pub notes: FormulationNotes,
    pub device_names: Vec<DeviceId>,
    pub response_cost: Vec<f64>,
    pub credit_scores: Vec<f64>,
    pub response_capacity: Vec<f64>,
}

impl Formulation {
    /// Checks the device-indexed invariants against the closed vocabulary.
    pub fn validate(&self, catalog: &DeviceCatalog) -> Result<(), FormulationError> {
        if self.device_names.is_empty() {
            return Err(FormulationError::NoDevices);
        }
        let mut seen = BTreeSet::new();
        for id in &self.device_names {
            if !catalog.contains(id) {
                return Err(FormulationError::UnknownDevice(id.clone()));
            }
            if !seen.insert(id) {
                return Err(FormulationError::DuplicateDevice(id.clone()));
            }
        }
        let expected = self.device_names.len();
        for (field, values) in [
            ("response_cost", &self.response_cost),
            ("credit_scores", &self.credit_scores),
            ("response_capacity", &self.response_capacity),
        ] {
            if values.len() != expected {
                return Err(FormulationError::LengthMismatch {
                    field,
                    expected,
                    actual: values.len(),
                });
            }
            if let Some(index) = values.iter().position(|v| !v.is_finite()) {
                return Err(FormulationError::InvalidNumber { field, index });
            }
        }
        Ok(())
    }

    fn keyed(&self, values: &[f64]) -> BTreeMap<DeviceId, f64> {
        self.device_names
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect()
    }

    pub fn cost_by_device(&self) -> BTreeMap<DeviceId, f64> {
        self.keyed(&self.response_cost)
    }

    pub fn credit_by_device(&self) -> BTreeMap<DeviceId, f64> {
        self.keyed(&self.credit_scores)
    }

    pub fn capacity_by_device(&self) -> BTreeMap<DeviceId, f64> {
        self.keyed(&self.response_capacity)
    }

    /// Builds a formulation from an untrusted JSON payload.
    ///
    /// Absent descriptive fields fall back to empty values; device arrays keep
    /// their positions so an unreadable entry surfaces as `InvalidNumber`.
    pub fn from_untrusted(payload: &Value) -> Result<Self, FormulationError> {
        let obj = payload.as_object().ok_or(FormulationError::NotAnObject)?;

        let variables = match obj.get("variables") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    let name = untrusted::text(item.get("name"))?;
                    Some(Variable {
                        name,
                        domain: untrusted::text(item.get("domain")).unwrap_or_default(),
                        description: untrusted::text(item.get("description"))
                            .unwrap_or_default(),
                    })
                })
                .collect(),
            _ => Vec::new(),
        };

        let objective_raw = obj.get("objective");
        let sense = untrusted::text(objective_raw.and_then(|o| o.get("type")))
            .or_else(|| untrusted::text(objective_raw.and_then(|o| o.get("sense"))))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(ObjectiveSense::Minimize);
        let objective = Objective {
            sense,
            expression: untrusted::text(objective_raw.and_then(|o| o.get("expression")))
                .unwrap_or_default(),
            description: untrusted::text(objective_raw.and_then(|o| o.get("description")))
                .unwrap_or_default(),
        };

        let notes = match obj.get("notes") {
            Some(Value::Object(map)) => FormulationNotes {
                arrays: map
                    .iter()
                    .filter_map(|(k, v)| {
                        let values = untrusted::numbers(Some(v));
                        if values.is_empty() {
                            return None;
                        }
                        Some((k.clone(), values.into_iter().flatten().collect()))
                    })
                    .collect(),
                remarks: untrusted::text(map.get("remarks")).unwrap_or_default(),
            },
            other => FormulationNotes {
                arrays: BTreeMap::new(),
                remarks: untrusted::text(other).unwrap_or_default(),
            },
        };

        let device_names = untrusted::texts(obj.get("device_names"))
            .into_iter()
            .map(|s| DeviceId::new(s.trim()))
            .collect();

        Ok(Self {
            variables,
            objective,
            constraints: untrusted::texts(obj.get("constraints")),
            notes,
            device_names,
            response_cost: positional("response_cost", obj.get("response_cost"))?,
            credit_scores: positional("credit_scores", obj.get("credit_scores"))?,
            response_capacity: positional("response_capacity", obj.get("response_capacity"))?,
        })
    }
}

fn positional(field: &'static str, value: Option<&Value>) -> Result<Vec<f64>, FormulationError> {
    untrusted::numbers(value)
        .into_iter()
        .enumerate()
        .map(|(index, v)| v.ok_or(FormulationError::InvalidNumber { field, index }))
        .collect()
}
