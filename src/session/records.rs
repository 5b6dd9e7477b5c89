//! One JSON record per completed run, stored as `<root>/<session>/run.json`,
//! `run(1).json`, `run(2).json`, ...

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::SessionId;
use crate::domain::{
    round2, DeviceId, DispatchPlan, Formulation, Interpretation, ProblemStatement,
};

const RECORD_STEM: &str = "run";
const MAX_SUFFIX: u32 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub session: SessionId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub problem: ProblemStatement,
    pub formulation: Formulation,
    pub interpretation: Interpretation,
    pub attempts: u32,
    pub degraded: bool,
    /// Session history at the time this run finished; the last entry is this run's plan.
    pub plan_history: Vec<DispatchPlan>,
}

impl RunRecord {
    pub fn plan(&self) -> Option<&DispatchPlan> {
        self.plan_history.last()
    }
}

/// Allocation of every device across the runs of one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonRow {
    pub device: DeviceId,
    /// One value per run, in run order; 0.0 when the run did not allocate the device.
    pub allocations: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunColumn {
    pub record: String,
    pub run_id: Uuid,
    pub degraded: bool,
    pub total_profit: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunComparison {
    pub runs: Vec<RunColumn>,
    pub rows: Vec<ComparisonRow>,
}

impl RunComparison {
    /// Device order comes from the run that allocated the most devices (first on ties).
    pub fn build(records: &[(String, RunRecord)]) -> Self {
        let mut widest: Option<&RunRecord> = None;
        for (_, record) in records {
            let n = record.interpretation.allocations.len();
            if widest.map_or(true, |w| n > w.interpretation.allocations.len()) {
                widest = Some(record);
            }
        }
        let order: Vec<DeviceId> = widest
            .map(|w| {
                w.interpretation
                    .allocations
                    .iter()
                    .map(|a| a.device.clone())
                    .collect()
            })
            .unwrap_or_default();

        let rows = order
            .into_iter()
            .map(|device| {
                let allocations = records
                    .iter()
                    .map(|(_, r)| round2(r.interpretation.value_of(&device).unwrap_or(0.0)))
                    .collect();
                ComparisonRow {
                    device,
                    allocations,
                }
            })
            .collect();

        let runs = records
            .iter()
            .map(|(name, r)| RunColumn {
                record: name.clone(),
                run_id: r.run_id,
                degraded: r.degraded,
                total_profit: r.plan().map(DispatchPlan::total_profit).unwrap_or(0.0),
            })
            .collect();

        Self { runs, rows }
    }
}

pub struct RunRecordStore {
    root: PathBuf,
}

impl RunRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }

    /// Writes the record under the first free name; never overwrites.
    ///
    /// The bytes land in a staging file first and are then hard-linked into
    /// place, so a record name never refers to a partially written file.
    pub async fn persist(&self, record: &RunRecord) -> Result<PathBuf> {
        let dir = self.session_dir(&record.session);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let bytes = serde_json::to_vec_pretty(record).context("serializing run record")?;

        let staging = dir.join(format!(".{}.pending", Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes)
            .await
            .with_context(|| format!("writing {}", staging.display()))?;
        let linked = link_first_free(&dir, &staging).await;
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            warn!(path = %staging.display(), error = %e, "staging file left behind");
        }
        let path = linked?;
        debug!(path = %path.display(), "run record persisted");
        Ok(path)
    }

    /// Record file names of the session in natural order (`run.json` first).
    pub async fn list(&self, session: &SessionId) -> Result<Vec<String>> {
        let dir = self.session_dir(session);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", dir.display())),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(n) = record_index(name) {
                    names.push((n, name.to_string()));
                }
            }
        }
        Ok(names.into_iter().sorted().map(|(_, name)| name).collect())
    }

    pub async fn load(&self, session: &SessionId, name: &str) -> Result<RunRecord> {
        let path = self.session_dir(session).join(name);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    /// Every readable record of the session; unreadable files are skipped.
    pub async fn load_all(&self, session: &SessionId) -> Result<Vec<(String, RunRecord)>> {
        let mut out = Vec::new();
        for name in self.list(session).await? {
            match self.load(session, &name).await {
                Ok(record) => out.push((name, record)),
                Err(e) => {
                    warn!(session = %session, record = %name, error = %e, "skipping run record");
                }
            }
        }
        Ok(out)
    }

    pub async fn compare(&self, session: &SessionId) -> Result<RunComparison> {
        Ok(RunComparison::build(&self.load_all(session).await?))
    }
}

async fn link_first_free(dir: &Path, staging: &Path) -> Result<PathBuf> {
    for n in 0..MAX_SUFFIX {
        let path = dir.join(record_name(n));
        match tokio::fs::hard_link(staging, &path).await {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("linking {}", path.display())),
        }
    }
    anyhow::bail!("no free record name left in {}", dir.display())
}

fn record_name(n: u32) -> String {
    if n == 0 {
        format!("{RECORD_STEM}.json")
    } else {
        format!("{RECORD_STEM}({n}).json")
    }
}

fn record_index(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(RECORD_STEM)?.strip_suffix(".json")?;
    if rest.is_empty() {
        return Some(0);
    }
    rest.strip_prefix('(')?.strip_suffix(')')?.parse().ok()
}
