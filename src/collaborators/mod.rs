//! Capability interfaces for the opaque transforms the pipeline delegates to.
//!
//! Every implementation is untrusted: the orchestrator validates or normalizes
//! whatever comes back, and converts failures into pipeline state.

pub mod http;

pub use http::*;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{DeviceId, Formulation, GeneratedProgram, Interpretation, ValidationVerdict};

/// Rewrites free text according to instructions.
#[async_trait]
pub trait TextAdjuster: Send + Sync {
    async fn adjust(&self, text: &str, instructions: &str) -> Result<String>;
}

#[async_trait]
pub trait FormulationExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Formulation>;
}

#[async_trait]
pub trait ProgramSynthesizer: Send + Sync {
    /// `prior_error` is empty on the first attempt.
    async fn synthesize(
        &self,
        formulation: &Formulation,
        prior_error: &str,
    ) -> Result<GeneratedProgram>;
}

#[async_trait]
pub trait ResultInterpreter: Send + Sync {
    async fn interpret(&self, raw_output: &str, devices: &[DeviceId]) -> Result<Interpretation>;
}

#[async_trait]
pub trait ValidityJudge: Send + Sync {
    async fn judge(
        &self,
        last_error: &str,
        interpretation: &Interpretation,
    ) -> Result<ValidationVerdict>;
}

/// Returns the text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAdjuster;

#[async_trait]
impl TextAdjuster for IdentityAdjuster {
    async fn adjust(&self, text: &str, _instructions: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// The full set of collaborators one pipeline needs.
#[derive(Clone)]
pub struct Collaborators {
    pub preprocessor: Arc<dyn TextAdjuster>,
    pub translator: Arc<dyn TextAdjuster>,
    pub capacity_adjuster: Arc<dyn TextAdjuster>,
    pub extractor: Arc<dyn FormulationExtractor>,
    pub synthesizer: Arc<dyn ProgramSynthesizer>,
    pub interpreter: Arc<dyn ResultInterpreter>,
    pub judge: Arc<dyn ValidityJudge>,
}

impl Collaborators {
    /// Collaborators with identity text stages; the structured stages are required.
    pub fn new(
        extractor: Arc<dyn FormulationExtractor>,
        synthesizer: Arc<dyn ProgramSynthesizer>,
        interpreter: Arc<dyn ResultInterpreter>,
        judge: Arc<dyn ValidityJudge>,
    ) -> Self {
        Self {
            preprocessor: Arc::new(IdentityAdjuster),
            translator: Arc::new(IdentityAdjuster),
            capacity_adjuster: Arc::new(IdentityAdjuster),
            extractor,
            synthesizer,
            interpreter,
            judge,
        }
    }

    pub fn with_text_stages(
        mut self,
        preprocessor: Arc<dyn TextAdjuster>,
        translator: Arc<dyn TextAdjuster>,
        capacity_adjuster: Arc<dyn TextAdjuster>,
    ) -> Self {
        self.preprocessor = preprocessor;
        self.translator = translator;
        self.capacity_adjuster = capacity_adjuster;
        self
    }
}
