use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::baseline::{load_baseline_csv, BaselineProvider, StaticBaseline};
use crate::collaborators::{Collaborators, HttpCollaborator};
use crate::comfort::ComfortCurve;
use crate::config::Config;
use crate::dispatch::DispatchExpander;
use crate::pipeline::PipelineOrchestrator;
use crate::sandbox::{ProgramExecutor, SubprocessSandbox};
use crate::session::{RunRecordStore, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub pipeline: Arc<PipelineOrchestrator>,
    pub sessions: Arc<SessionRegistry>,
    pub records: Arc<RunRecordStore>,
}

impl AppState {
    /// Wires the production pipeline: CSV baseline, HTTP collaborators, subprocess sandbox.
    pub async fn new(cfg: Config) -> Result<Self> {
        let catalog = cfg.dispatch.catalog();
        let path = cfg.baseline.path.clone();
        let dataset = {
            let catalog = catalog.clone();
            tokio::task::spawn_blocking(move || load_baseline_csv(&path, &catalog))
                .await
                .context("baseline loader panicked")??
        };
        let collaborators =
            HttpCollaborator::from_config(&cfg.collaborators)?.into_collaborators();
        let executor: Arc<dyn ProgramExecutor> =
            Arc::new(SubprocessSandbox::new(cfg.sandbox.clone()));
        info!(
            devices = catalog.len(),
            samples = dataset.len(),
            interpreter = %cfg.sandbox.interpreter,
            "pipeline components ready"
        );
        Ok(Self::with_components(
            cfg,
            collaborators,
            executor,
            Arc::new(StaticBaseline::new(dataset)),
        ))
    }

    /// Assembles the state around caller-supplied collaborators, executor and baseline.
    pub fn with_components(
        cfg: Config,
        collaborators: Collaborators,
        executor: Arc<dyn ProgramExecutor>,
        baseline: Arc<dyn BaselineProvider>,
    ) -> Self {
        let catalog = Arc::new(cfg.dispatch.catalog());
        let expander = DispatchExpander::new(Arc::clone(&catalog), cfg.dispatch.window())
            .with_unit_price(cfg.dispatch.unit_price);
        let sessions = Arc::new(SessionRegistry::new());
        let records = Arc::new(RunRecordStore::new(cfg.records.directory.clone()));
        let comfort: ComfortCurve = cfg.comfort.clone();

        let pipeline = Arc::new(PipelineOrchestrator {
            collaborators,
            executor,
            expander,
            catalog,
            comfort,
            baseline,
            sessions: Arc::clone(&sessions),
            records: Some(Arc::clone(&records)),
            settings: cfg.pipeline.clone(),
        });

        Self {
            cfg: Arc::new(cfg),
            pipeline,
            sessions,
            records,
        }
    }
}
