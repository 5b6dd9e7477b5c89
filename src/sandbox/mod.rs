//! Isolated execution of synthesized programs.

pub mod policy;
pub mod subprocess;

pub use policy::*;
pub use subprocess::*;

use async_trait::async_trait;

use crate::domain::ExecutionResult;

/// Runs a program made of a declarations block followed by a body.
///
/// Implementations never return an error: every failure mode is reported
/// through the fault on [`ExecutionResult`].
#[async_trait]
pub trait ProgramExecutor: Send + Sync {
    async fn run(&self, declarations: &str, body: &str) -> ExecutionResult;
}
