use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Environment variable through which a program learns where it may write files.
pub const OUTPUT_DIR_ENV: &str = "SANDBOX_OUTPUT_DIR";

/// Limits and interpreter settings for running generated programs.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Interpreter binary, resolved through `PATH`.
    #[validate(length(min = 1))]
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    /// File name the combined program is written to inside the scratch directory.
    #[validate(length(min = 1))]
    pub file_name: String,
    #[validate(range(min = 1))]
    pub max_duration_ms: u64,
    /// Address-space ceiling applied to the interpreter process (unix only).
    pub max_memory_bytes: Option<u64>,
    #[validate(range(min = 1))]
    pub max_output_bytes: usize,
    /// Variables copied from the host environment; everything else is cleared.
    pub env_passthrough: Vec<String>,
    /// Caller-provided directory exposed through [`OUTPUT_DIR_ENV`].
    pub output_dir: Option<PathBuf>,
}

impl SandboxPolicy {
    pub fn python_default() -> Self {
        Self {
            interpreter: "python3".into(),
            interpreter_args: vec!["-I".into()],
            file_name: "program.py".into(),
            max_duration_ms: 120_000,
            max_memory_bytes: Some(2 * 1024 * 1024 * 1024),
            max_output_bytes: 1_048_576,
            env_passthrough: vec!["PATH".into(), "LANG".into(), "LC_ALL".into()],
            output_dir: None,
        }
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::python_default()
    }
}
