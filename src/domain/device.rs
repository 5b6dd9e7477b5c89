use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identifier of a dispatchable device, e.g. `HVAC` or `ESS_HBN`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How an aggregate allocation is turned into an adjusted time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchRule {
    /// Generation that is never touched (solar class).
    PassThrough,
    /// Controllable load switched off for the whole window (charging points).
    FullCurtailment,
    /// Thermal load reduced evenly across the window (HVAC class).
    UniformCurtailment,
    /// Storage absorbing the allocation in proportion to per-interval headroom.
    HeadroomStorage { rated_magnitude: f64 },
}

impl DispatchRule {
    pub fn rated_magnitude(&self) -> Option<f64> {
        match self {
            Self::HeadroomStorage { rated_magnitude } => Some(*rated_magnitude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub id: DeviceId,
    pub display_name: String,
    pub rule: DispatchRule,
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("device {0} is listed more than once")]
    DuplicateDevice(DeviceId),
    #[error("device {device} has rated magnitude {value}; it must be finite and positive")]
    InvalidRatedMagnitude { device: DeviceId, value: f64 },
}

/// Closed device vocabulary and the dispatch rule of every member.
///
/// Built once from configuration and shared read-only; nothing looks devices up
/// through module-level state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCatalog {
    devices: BTreeMap<DeviceId, DeviceSpec>,
}

impl DeviceCatalog {
    pub fn new(specs: impl IntoIterator<Item = DeviceSpec>) -> Self {
        Self {
            devices: specs.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    /// Like [`DeviceCatalog::new`], but rejects repeated ids and unusable storage ratings.
    pub fn try_new(specs: impl IntoIterator<Item = DeviceSpec>) -> Result<Self, CatalogError> {
        let mut devices = BTreeMap::new();
        for spec in specs {
            if let Some(value) = spec.rule.rated_magnitude() {
                if !value.is_finite() || value <= 0.0 {
                    return Err(CatalogError::InvalidRatedMagnitude {
                        device: spec.id,
                        value,
                    });
                }
            }
            if devices.contains_key(&spec.id) {
                return Err(CatalogError::DuplicateDevice(spec.id));
            }
            devices.insert(spec.id.clone(), spec);
        }
        Ok(Self { devices })
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceSpec> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn rule_for(&self, id: &DeviceId) -> Option<DispatchRule> {
        self.devices.get(id).map(|s| s.rule)
    }

    pub fn display_name(&self, id: &DeviceId) -> Option<&str> {
        self.devices.get(id).map(|s| s.display_name.as_str())
    }

    pub fn specs(&self) -> impl Iterator<Item = &DeviceSpec> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        let spec = |id: &str, name: &str, rule| DeviceSpec {
            id: DeviceId::from(id),
            display_name: name.to_string(),
            rule,
        };
        let storage = |rated_magnitude| DispatchRule::HeadroomStorage { rated_magnitude };
        Self::new([
            spec("HVAC", "HVAC", DispatchRule::UniformCurtailment),
            spec("ESS_HBN", "HBN storage", storage(1200.0)),
            spec("ESS_ML", "ML storage", storage(1300.0)),
            spec("ESS_HY", "HY storage", storage(1500.0)),
            spec("EV", "EV charging", DispatchRule::FullCurtailment),
            spec("PV", "Photovoltaic", DispatchRule::PassThrough),
        ])
    }
}
