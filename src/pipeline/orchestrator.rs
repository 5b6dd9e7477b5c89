//! Bounded-retry state machine driving one demand-response run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{PipelineError, PipelineState, Stage};
use crate::baseline::BaselineProvider;
use crate::collaborators::{Collaborators, TextAdjuster};
use crate::comfort::ComfortCurve;
use crate::config::PipelineConfig;
use crate::dispatch::DispatchExpander;
use crate::domain::{
    AllocationSummary, DeviceCatalog, DispatchPlan, ExecutionResult, FaultKind, Formulation,
    FormulationError, GeneratedProgram, Interpretation, ProblemStatement, ValidationVerdict,
};
use crate::sandbox::ProgramExecutor;
use crate::session::{RunRecord, RunRecordStore, SessionId, SessionRegistry};

/// What a completed run hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub session: SessionId,
    pub stages: Vec<Stage>,
    /// Synthesis attempts made, including the first.
    pub attempts: u32,
    /// Retry budget ran out without a valid verdict.
    pub degraded: bool,
    pub interpretation: Interpretation,
    pub verdict: ValidationVerdict,
    pub plan: DispatchPlan,
    pub summary: AllocationSummary,
    pub comfort_delta: Option<f64>,
}

pub struct PipelineOrchestrator {
    pub collaborators: Collaborators,
    pub executor: Arc<dyn ProgramExecutor>,
    pub expander: DispatchExpander,
    pub catalog: Arc<DeviceCatalog>,
    pub comfort: ComfortCurve,
    pub baseline: Arc<dyn BaselineProvider>,
    pub sessions: Arc<SessionRegistry>,
    pub records: Option<Arc<RunRecordStore>>,
    pub settings: PipelineConfig,
}

impl PipelineOrchestrator {
    pub async fn run(
        &self,
        session: SessionId,
        problem: ProblemStatement,
    ) -> Result<RunOutcome, PipelineError> {
        let mut state = PipelineState::new(session, problem, self.settings.max_retries);
        let span = info_span!("pipeline_run", session = %state.session, run_id = %state.run_id);

        let result = self.drive(&mut state).instrument(span.clone()).await;
        if let Err(e) = &result {
            let _guard = span.enter();
            warn!(error = %e, failed_at = %state.stage, "run failed");
            state.enter(Stage::Failed);
        }
        result
    }

    fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.stage_timeout_seconds)
    }

    async fn guarded<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = T>,
    ) -> Result<T, PipelineError> {
        let limit = self.stage_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| PipelineError::StageTimeout {
                stage,
                timeout_ms: limit.as_millis() as u64,
            })
    }

    /// Runs a text stage; a failing or empty answer keeps the input text.
    async fn adjust_text(
        &self,
        stage: Stage,
        adjuster: &dyn TextAdjuster,
        text: &str,
        instructions: &str,
    ) -> Result<String, PipelineError> {
        match self
            .guarded(stage, adjuster.adjust(text, instructions))
            .await?
        {
            Ok(out) if !out.trim().is_empty() => Ok(out),
            Ok(_) => {
                warn!(stage = %stage, "text collaborator returned nothing, keeping input");
                Ok(text.to_string())
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "text collaborator failed, keeping input");
                Ok(text.to_string())
            }
        }
    }

    async fn drive(&self, state: &mut PipelineState) -> Result<RunOutcome, PipelineError> {
        let instructions = state.problem.instructions.clone().unwrap_or_default();
        state.text = self
            .adjust_text(
                Stage::Preprocess,
                self.collaborators.preprocessor.as_ref(),
                &state.text,
                &instructions,
            )
            .await?;

        state.enter(Stage::Translate);
        let translator = self.collaborators.translator.as_ref();
        state.text = self
            .adjust_text(Stage::Translate, translator, &state.text, "")
            .await?;

        state.enter(Stage::Adjust);
        if let Some(target) = state.problem.comfort_condition {
            let delta = self.comfort.delta_for(target);
            state.comfort_delta = Some(delta);
            debug!(target, delta, "comfort capacity delta");
            if delta != 0.0 {
                let instruction = capacity_instruction(delta, target);
                state.text = self
                    .adjust_text(
                        Stage::Adjust,
                        self.collaborators.capacity_adjuster.as_ref(),
                        &state.text,
                        &instruction,
                    )
                    .await?;
            }
        }

        state.enter(Stage::Formulate);
        let formulation = self.formulate(&state.text).await?;
        let devices = formulation.device_names.clone();
        state.formulation = Some(formulation.clone());

        let (interpretation, verdict) = loop {
            state.enter(Stage::Synthesize);
            state.synthesis_attempts += 1;
            let program = match self
                .guarded(
                    Stage::Synthesize,
                    self.collaborators
                        .synthesizer
                        .synthesize(&formulation, &state.retry.last_error),
                )
                .await?
            {
                Ok(p) => Ok(p),
                Err(e) => {
                    warn!(attempt = state.synthesis_attempts, error = %e, "synthesis failed");
                    Err(format!("synthesis failed: {e:#}"))
                }
            };

            state.enter(Stage::Execute);
            let (program, execution) = match program {
                Ok(p) if !p.is_empty() => {
                    let result = self
                        .guarded(Stage::Execute, self.executor.run(&p.declarations, &p.body))
                        .await?;
                    (p, result)
                }
                Ok(p) => (
                    p,
                    ExecutionResult::faulted(
                        FaultKind::Synthesis,
                        "synthesizer returned an empty program",
                        String::new(),
                        0,
                    ),
                ),
                Err(message) => (
                    GeneratedProgram::default(),
                    ExecutionResult::faulted(FaultKind::Synthesis, message, String::new(), 0),
                ),
            };
            debug!(
                attempt = state.synthesis_attempts,
                success = execution.is_success(),
                duration_ms = execution.duration_ms,
                "program executed"
            );

            state.enter(Stage::Interpret);
            let raw = execution.transcript();
            let interpretation = match self
                .guarded(
                    Stage::Interpret,
                    self.collaborators.interpreter.interpret(&raw, &devices),
                )
                .await?
            {
                Ok(i) => i,
                Err(e) => {
                    warn!(error = %e, "interpreter failed");
                    Interpretation::failed(&devices, format!("interpretation failed: {e:#}"))
                }
            };
            let (interpretation, dropped) = interpretation.normalize(&devices);
            if !dropped.is_empty() {
                warn!(?dropped, "interpreter reported devices outside the formulation");
            }

            state.enter(Stage::Validate);
            let verdict = match self
                .guarded(
                    Stage::Validate,
                    self.collaborators
                        .judge
                        .judge(execution.error_text(), &interpretation),
                )
                .await?
            {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "validity judge failed");
                    ValidationVerdict::invalid(format!("validation failed: {e:#}"))
                }
            };

            let corrective = if verdict.reason.trim().is_empty() {
                execution.error_text().to_string()
            } else {
                verdict.reason.clone()
            };
            state.program = Some(program);
            state.execution = Some(execution);
            state.interpretation = Some(interpretation.clone());
            state.verdict = Some(verdict.clone());

            if verdict.valid {
                break (interpretation, verdict);
            }
            if state.retry.record_failure(corrective) {
                debug!(
                    retry = state.retry.attempt,
                    bound = state.retry.bound,
                    "retrying synthesis"
                );
                state.enter(Stage::Retry);
                state.reset_attempt();
                continue;
            }
            warn!(
                attempts = state.synthesis_attempts,
                status = %interpretation.status,
                "retry budget exhausted, finalizing with last interpretation"
            );
            break (interpretation, verdict);
        };

        state.enter(Stage::Finalize);
        let degraded = !verdict.valid;
        state.enter(Stage::Expand);
        let baseline = self.baseline.snapshot();
        let costs = formulation.cost_by_device();
        let plan = self
            .expander
            .expand(&interpretation.allocations, &costs, &baseline)?;
        let summary = AllocationSummary::build(&formulation, &interpretation);
        state.plan_history = self.sessions.append(&state.session, plan.clone());
        state.enter(Stage::Done);

        info!(
            attempts = state.synthesis_attempts,
            degraded,
            status = %interpretation.status,
            total_profit = plan.total_profit(),
            history = state.plan_history.len(),
            "run finished"
        );

        self.persist(state, &formulation, &interpretation, degraded)
            .await;

        Ok(RunOutcome {
            run_id: state.run_id,
            session: state.session.clone(),
            stages: state.trace.clone(),
            attempts: state.synthesis_attempts,
            degraded,
            interpretation,
            verdict,
            plan,
            summary,
            comfort_delta: state.comfort_delta,
        })
    }

    async fn formulate(&self, text: &str) -> Result<Formulation, PipelineError> {
        let formulation = self
            .guarded(Stage::Formulate, self.collaborators.extractor.extract(text))
            .await?
            .map_err(|e| FormulationError::Extraction(format!("{e:#}")))?;
        formulation.validate(&self.catalog)?;
        debug!(devices = formulation.device_names.len(), "formulation accepted");
        Ok(formulation)
    }

    async fn persist(
        &self,
        state: &PipelineState,
        formulation: &Formulation,
        interpretation: &Interpretation,
        degraded: bool,
    ) {
        if !self.settings.persist_records {
            return;
        }
        let Some(store) = &self.records else {
            return;
        };
        let record = RunRecord {
            run_id: state.run_id,
            session: state.session.clone(),
            started_at: state.started_at,
            finished_at: Utc::now(),
            problem: state.problem.clone(),
            formulation: formulation.clone(),
            interpretation: interpretation.clone(),
            attempts: state.synthesis_attempts,
            degraded,
            plan_history: state.plan_history.clone(),
        };
        if let Err(e) = store.persist(&record).await {
            warn!(error = %e, "run record not persisted");
        }
    }
}

fn capacity_instruction(delta: f64, target: f64) -> String {
    format!(
        "With the indoor temperature held at or below {target}, the thermal load response \
         capacity changes by {delta:+} MW. Update that capacity in the text accordingly and \
         keep everything else unchanged."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_instruction_carries_signed_delta() {
        let text = capacity_instruction(4.9, 25.0);
        assert!(text.contains("+4.9 MW"));
        assert!(text.contains("25"));
        assert!(capacity_instruction(-1.2, 31.0).contains("-1.2 MW"));
    }
}
