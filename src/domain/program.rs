use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::untrusted;

/// Incoming demand-response request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemStatement {
    pub text: String,
    /// Override instructions, e.g. devices out of service or to be preferred.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Upper bound on the steady-state comfort condition (indoor temperature).
    #[serde(default)]
    pub comfort_condition: Option<f64>,
}

impl ProblemStatement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            instructions: None,
            comfort_condition: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_comfort_condition(mut self, condition: f64) -> Self {
        self.comfort_condition = Some(condition);
        self
    }
}

/// Candidate program produced by the synthesizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedProgram {
    /// Free-text description of the program's approach.
    pub summary: String,
    pub declarations: String,
    pub body: String,
}

impl GeneratedProgram {
    pub fn is_empty(&self) -> bool {
        self.declarations.trim().is_empty() && self.body.trim().is_empty()
    }

    /// Full program text as it is handed to the interpreter.
    pub fn source(&self) -> String {
        format!("{}\n{}", self.declarations, self.body)
    }

    pub fn from_untrusted(payload: &Value) -> Self {
        Self {
            summary: untrusted::text(payload.get("prefix"))
                .or_else(|| untrusted::text(payload.get("summary")))
                .unwrap_or_default(),
            declarations: untrusted::text(payload.get("imports"))
                .or_else(|| untrusted::text(payload.get("declarations")))
                .unwrap_or_default(),
            body: untrusted::text(payload.get("code"))
                .or_else(|| untrusted::text(payload.get("body")))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    /// The synthesizer produced nothing runnable.
    Synthesis,
    /// The interpreter could not be started.
    Spawn,
    /// The program exited unsuccessfully.
    Runtime,
    /// The program was killed by a signal (memory ceiling, crash).
    Signal,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionFault {
    pub kind: FaultKind,
    pub message: String,
}

/// Captured output of one program run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub fault: Option<ExecutionFault>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(stdout: String, duration_ms: u64) -> Self {
        Self {
            stdout,
            fault: None,
            duration_ms,
        }
    }

    pub fn faulted(
        kind: FaultKind,
        message: impl Into<String>,
        partial: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            stdout: partial,
            fault: Some(ExecutionFault {
                kind,
                message: message.into(),
            }),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.fault.is_none()
    }

    /// Fault message, empty when the run succeeded.
    pub fn error_text(&self) -> &str {
        self.fault.as_ref().map_or("", |f| f.message.as_str())
    }

    /// Text handed to the result interpreter: the fault (if any) followed by
    /// whatever was printed before it.
    pub fn transcript(&self) -> String {
        match &self.fault {
            Some(fault) => format!("Execution error: {}\n{}", fault.message, self.stdout),
            None => self.stdout.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub reason: String,
}

impl ValidationVerdict {
    pub fn valid(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }

    /// Missing or unreadable validity reads as invalid.
    pub fn from_untrusted(payload: &Value) -> Self {
        Self {
            valid: untrusted::boolean(payload.get("valid")).unwrap_or(false),
            reason: untrusted::text(payload.get("reason")).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transcript_prefixes_fault() {
        let r = ExecutionResult::faulted(
            FaultKind::Runtime,
            "division by zero",
            "step 1\n".to_string(),
            5,
        );
        assert_eq!(r.transcript(), "Execution error: division by zero\nstep 1\n");
        assert_eq!(r.error_text(), "division by zero");
        assert!(!r.is_success());
        assert_eq!(ExecutionResult::success("x=1".into(), 1).transcript(), "x=1");
    }

    #[test]
    fn program_reads_either_field_naming() {
        let raw = json!({"imports": "import math", "code": "print(1)"});
        let p = GeneratedProgram::from_untrusted(&raw);
        assert_eq!(p.source(), "import math\nprint(1)");
        let p = GeneratedProgram::from_untrusted(&json!({"declarations": "", "body": "  "}));
        assert!(p.is_empty());
    }

    #[test]
    fn verdict_defaults_to_invalid() {
        let v = ValidationVerdict::from_untrusted(&json!({"reason": "no field"}));
        assert!(!v.valid);
        let v = ValidationVerdict::from_untrusted(&json!({"valid": "true", "reason": "fine"}));
        assert!(v.valid);
    }
}
