use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::DeviceId;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BaselineError {
    #[error("baseline has no samples")]
    Empty,
    #[error("column `{device}` has {actual} samples, expected {expected}")]
    ColumnLength {
        device: DeviceId,
        expected: usize,
        actual: usize,
    },
    #[error("timestamps are not strictly increasing at sample {0}")]
    Unordered(usize),
    #[error("sampling interval changes at sample {index}: {found} instead of {expected}")]
    IrregularInterval {
        index: usize,
        expected: Duration,
        found: Duration,
    },
}

/// Immutable per-device baseline time series on a shared time axis.
///
/// Loaded once and shared between runs behind an `Arc`; nothing mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineDataset {
    timestamps: Vec<NaiveDateTime>,
    columns: BTreeMap<DeviceId, Vec<f64>>,
    sampling_interval: Option<Duration>,
}

impl BaselineDataset {
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        columns: BTreeMap<DeviceId, Vec<f64>>,
    ) -> Result<Self, BaselineError> {
        if timestamps.is_empty() {
            return Err(BaselineError::Empty);
        }
        for (device, values) in &columns {
            if values.len() != timestamps.len() {
                return Err(BaselineError::ColumnLength {
                    device: device.clone(),
                    expected: timestamps.len(),
                    actual: values.len(),
                });
            }
        }

        let mut sampling_interval = None;
        for (index, pair) in timestamps.windows(2).enumerate() {
            let step = pair[1] - pair[0];
            if step <= Duration::zero() {
                return Err(BaselineError::Unordered(index + 1));
            }
            match sampling_interval {
                None => sampling_interval = Some(step),
                Some(expected) if expected != step => {
                    return Err(BaselineError::IrregularInterval {
                        index: index + 1,
                        expected,
                        found: step,
                    })
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            timestamps,
            columns,
            sampling_interval,
        })
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn series(&self, device: &DeviceId) -> Option<&[f64]> {
        self.columns.get(device).map(Vec::as_slice)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.columns.keys()
    }

    pub fn sampling_interval(&self) -> Option<Duration> {
        self.sampling_interval
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Read-only source of the baseline snapshot.
pub trait BaselineProvider: Send + Sync {
    fn snapshot(&self) -> Arc<BaselineDataset>;
}

/// Provider over a dataset loaded once at startup.
#[derive(Debug, Clone)]
pub struct StaticBaseline {
    dataset: Arc<BaselineDataset>,
}

impl StaticBaseline {
    pub fn new(dataset: BaselineDataset) -> Self {
        Self {
            dataset: Arc::new(dataset),
        }
    }
}

impl BaselineProvider for StaticBaseline {
    fn snapshot(&self) -> Arc<BaselineDataset> {
        Arc::clone(&self.dataset)
    }
}
