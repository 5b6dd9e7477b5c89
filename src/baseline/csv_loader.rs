use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::info;

use super::BaselineDataset;
use crate::domain::{DeviceCatalog, DeviceId};

const TIME_COLUMN: &str = "time";
const TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Loads a `time,<device>,<device>,...` table. Every non-time column must be a
/// catalog device.
pub fn load_baseline_csv(path: &Path, catalog: &DeviceCatalog) -> Result<BaselineDataset> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening baseline {}", path.display()))?;
    let dataset = read_baseline(file, catalog)
        .with_context(|| format!("reading baseline {}", path.display()))?;
    info!(
        path = %path.display(),
        samples = dataset.len(),
        devices = dataset.devices().count(),
        "baseline loaded"
    );
    Ok(dataset)
}

pub fn read_baseline<R: Read>(reader: R, catalog: &DeviceCatalog) -> Result<BaselineDataset> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers().context("baseline header row")?.clone();

    let time_idx = headers
        .iter()
        .position(|h| h == TIME_COLUMN)
        .context("baseline is missing the `time` column")?;

    let mut devices = Vec::new();
    for (idx, name) in headers.iter().enumerate() {
        if idx == time_idx {
            continue;
        }
        let id = DeviceId::new(name);
        if !catalog.contains(&id) {
            bail!("baseline column `{name}` is not a known device");
        }
        devices.push((idx, id));
    }

    let mut timestamps = Vec::new();
    let mut columns: BTreeMap<DeviceId, Vec<f64>> = devices
        .iter()
        .map(|(_, id)| (id.clone(), Vec::new()))
        .collect();

    for (row_no, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("baseline row {}", row_no + 1))?;
        let raw_time = record.get(time_idx).unwrap_or_default();
        let time = parse_time(raw_time)
            .with_context(|| format!("row {}: unreadable time `{raw_time}`", row_no + 1))?;
        timestamps.push(time);
        for (idx, id) in &devices {
            let raw = record.get(*idx).unwrap_or_default();
            let value: f64 = raw
                .parse()
                .with_context(|| format!("row {}: `{id}` value `{raw}`", row_no + 1))?;
            if let Some(col) = columns.get_mut(id) {
                col.push(value);
            }
        }
    }

    Ok(BaselineDataset::new(timestamps, columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "time,HVAC,ESS_HBN,PV\n\
        2025-08-04 16:00:00,10,-200,100\n\
        2025-08-04 16:15:00,12, 300,90\n\
        2025-08-04 16:30:00,11,0,80\n";

    #[test]
    fn reads_device_columns() {
        let ds = read_baseline(SAMPLE.as_bytes(), &DeviceCatalog::default()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.series(&"ESS_HBN".into()), Some(&[-200.0, 300.0, 0.0][..]));
        assert_eq!(ds.sampling_interval(), Some(chrono::Duration::minutes(15)));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let err = read_baseline(
            "time,WIND\n2025-08-04 16:00:00,1\n".as_bytes(),
            &DeviceCatalog::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("WIND"));
    }

    #[test]
    fn missing_time_column_is_rejected() {
        assert!(read_baseline("HVAC\n1\n".as_bytes(), &DeviceCatalog::default()).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let ds = load_baseline_csv(file.path(), &DeviceCatalog::default()).unwrap();
        assert_eq!(ds.devices().count(), 3);
    }
}
