use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    DispatchPlan, ExecutionResult, Formulation, GeneratedProgram, Interpretation, ProblemStatement,
    ValidationVerdict,
};
use crate::session::SessionId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Preprocess,
    Translate,
    Adjust,
    Formulate,
    Synthesize,
    Execute,
    Interpret,
    Validate,
    Retry,
    Finalize,
    Expand,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Whether the state machine may move from `self` to `next`.
    pub fn allows(self, next: Stage) -> bool {
        use Stage::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Preprocess, Translate)
                | (Translate, Adjust)
                | (Adjust, Formulate)
                | (Formulate, Synthesize)
                | (Synthesize, Execute)
                | (Execute, Interpret)
                | (Interpret, Validate)
                | (Validate, Retry)
                | (Validate, Finalize)
                | (Retry, Synthesize)
                | (Finalize, Expand)
                | (Expand, Done)
        )
    }
}

/// Corrective-attempt counter. Only ever increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempt: u32,
    pub bound: u32,
    /// Corrective context handed to the next synthesis call.
    pub last_error: String,
}

impl RetryState {
    pub fn new(bound: u32) -> Self {
        Self {
            attempt: 0,
            bound,
            last_error: String::new(),
        }
    }

    /// Counts an invalid verdict. Returns whether another attempt is allowed.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        self.attempt += 1;
        self.last_error = error.into();
        self.attempt <= self.bound
    }
}

/// Everything one run threads through the state machine.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub session: SessionId,
    pub started_at: DateTime<Utc>,
    pub stage: Stage,
    pub trace: Vec<Stage>,
    pub problem: ProblemStatement,
    /// Problem text after the text stages.
    pub text: String,
    pub comfort_delta: Option<f64>,
    pub formulation: Option<Formulation>,
    pub program: Option<GeneratedProgram>,
    pub execution: Option<ExecutionResult>,
    pub interpretation: Option<Interpretation>,
    pub verdict: Option<ValidationVerdict>,
    pub retry: RetryState,
    pub synthesis_attempts: u32,
    pub plan_history: Vec<DispatchPlan>,
}

impl PipelineState {
    pub fn new(session: SessionId, problem: ProblemStatement, retry_bound: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            session,
            started_at: Utc::now(),
            stage: Stage::Preprocess,
            trace: vec![Stage::Preprocess],
            text: problem.text.clone(),
            problem,
            comfort_delta: None,
            formulation: None,
            program: None,
            execution: None,
            interpretation: None,
            verdict: None,
            retry: RetryState::new(retry_bound),
            synthesis_attempts: 0,
            plan_history: Vec::new(),
        }
    }

    pub fn enter(&mut self, next: Stage) {
        debug_assert!(self.stage.allows(next), "illegal transition {} -> {}", self.stage, next);
        self.stage = next;
        self.trace.push(next);
    }

    /// Drops the per-attempt artifacts before a corrective attempt.
    pub fn reset_attempt(&mut self) {
        self.program = None;
        self.execution = None;
        self.interpretation = None;
        self.verdict = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn retry_budget_allows_bound_retries() {
        let mut r = RetryState::new(2);
        assert!(r.record_failure("a"));
        assert!(r.record_failure("b"));
        assert!(!r.record_failure("c"));
        assert_eq!(r.attempt, 3);
        assert_eq!(r.last_error, "c");
    }

    #[test]
    fn zero_bound_never_retries() {
        let mut r = RetryState::new(0);
        assert!(!r.record_failure("x"));
    }

    #[test]
    fn terminal_stages_go_nowhere() {
        for next in Stage::iter() {
            assert!(!Stage::Done.allows(next));
            assert!(!Stage::Failed.allows(next));
        }
        assert!(Stage::Execute.allows(Stage::Failed));
        assert!(Stage::Validate.allows(Stage::Retry));
        assert!(!Stage::Retry.allows(Stage::Execute));
    }

    #[test]
    fn stage_names_are_screaming() {
        assert_eq!(Stage::Synthesize.to_string(), "SYNTHESIZE");
        assert_eq!(serde_json::to_string(&Stage::Done).unwrap(), "\"DONE\"");
    }
}
