use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tracing::debug;

use super::{
    Collaborators, FormulationExtractor, ProgramSynthesizer, ResultInterpreter, TextAdjuster,
    ValidityJudge,
};
use crate::config::CollaboratorConfig;
use crate::domain::{
    untrusted, DeviceId, Formulation, GeneratedProgram, Interpretation, ValidationVerdict,
};

/// JSON-over-HTTP client for a collaborator service exposing one route per task.
#[derive(Clone)]
pub struct HttpCollaborator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCollaborator {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_key: Option<&str>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_static("vpp-dispatch-planner/0.3");
        headers.insert(USER_AGENT, agent);
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
                .context("collaborator api key is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn from_config(cfg: &CollaboratorConfig) -> Result<Self> {
        Self::new(
            cfg.base_url.clone(),
            Duration::from_secs(cfg.http_timeout_seconds),
            cfg.api_key.as_deref(),
        )
    }

    fn url_for(&self, task: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), task)
    }

    /// Posts `payload` to the task route and returns the decoded JSON body.
    pub async fn call(&self, task: &str, payload: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(self.url_for(task))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("{task} request failed"))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("{task} read failed"))?;
        if !status.is_success() {
            anyhow::bail!("{task} collaborator error: HTTP {status}: {body}");
        }
        debug!(task, bytes = body.len(), "collaborator responded");
        serde_json::from_str(&body).with_context(|| format!("{task} JSON parse failed"))
    }

    /// Builds the full collaborator set backed by this client.
    pub fn into_collaborators(self) -> Collaborators {
        let shared = Arc::new(self);
        let text = |task| -> Arc<dyn TextAdjuster> {
            Arc::new(HttpTextAdjuster::new(Arc::clone(&shared), task))
        };
        let (preprocessor, translator, capacity_adjuster) =
            (text("preprocess"), text("translate"), text("capacity_adjust"));
        Collaborators::new(shared.clone(), shared.clone(), shared.clone(), shared)
            .with_text_stages(preprocessor, translator, capacity_adjuster)
    }
}

/// One text-rewriting route of a [`HttpCollaborator`].
#[derive(Clone)]
pub struct HttpTextAdjuster {
    http: Arc<HttpCollaborator>,
    task: &'static str,
}

impl HttpTextAdjuster {
    pub fn new(http: Arc<HttpCollaborator>, task: &'static str) -> Self {
        Self { http, task }
    }
}

#[async_trait]
impl TextAdjuster for HttpTextAdjuster {
    async fn adjust(&self, text: &str, instructions: &str) -> Result<String> {
        let payload = json!({ "text": text, "instructions": instructions });
        let resp = self.http.call(self.task, &payload).await?;
        match &resp {
            Value::String(s) => Ok(s.clone()),
            _ => untrusted::text(resp.get("text"))
                .with_context(|| format!("{} response has no text", self.task)),
        }
    }
}

#[async_trait]
impl FormulationExtractor for HttpCollaborator {
    async fn extract(&self, text: &str) -> Result<Formulation> {
        let resp = self.call("formulate", &json!({ "text": text })).await?;
        let payload = resp.get("formulation").unwrap_or(&resp);
        Ok(Formulation::from_untrusted(payload)?)
    }
}

#[async_trait]
impl ProgramSynthesizer for HttpCollaborator {
    async fn synthesize(
        &self,
        formulation: &Formulation,
        prior_error: &str,
    ) -> Result<GeneratedProgram> {
        let payload = json!({ "formulation": formulation, "error": prior_error });
        let resp = self.call("synthesize", &payload).await?;
        Ok(GeneratedProgram::from_untrusted(&resp))
    }
}

#[async_trait]
impl ResultInterpreter for HttpCollaborator {
    async fn interpret(&self, raw_output: &str, devices: &[DeviceId]) -> Result<Interpretation> {
        let payload = json!({ "raw_output": raw_output, "devices": devices });
        let resp = self.call("interpret", &payload).await?;
        Ok(Interpretation::from_untrusted(&resp))
    }
}

#[async_trait]
impl ValidityJudge for HttpCollaborator {
    async fn judge(
        &self,
        last_error: &str,
        interpretation: &Interpretation,
    ) -> Result<ValidationVerdict> {
        let payload = json!({ "error": last_error, "interpretation": interpretation });
        let resp = self.call("validate", &payload).await?;
        Ok(ValidationVerdict::from_untrusted(&resp))
    }
}
