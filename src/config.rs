use anyhow::{Context, Result};
use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::Validate;

use crate::comfort::ComfortCurve;
use crate::dispatch::{ResponseWindow, DEFAULT_UNIT_PRICE};
use crate::domain::{DeviceCatalog, DeviceSpec};
use crate::sandbox::SandboxPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[validate(nested)]
    pub pipeline: PipelineConfig,
    #[validate(nested)]
    pub comfort: ComfortCurve,
    #[validate(nested)]
    pub sandbox: SandboxPolicy,
    #[validate(nested)]
    pub dispatch: DispatchConfig,
    pub baseline: BaselineConfig,
    pub records: RecordsConfig,
    #[validate(nested)]
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[validate(range(min = 1))]
    pub request_timeout_seconds: u64,
    #[validate(range(min = 1024))]
    pub body_limit_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            request_timeout_seconds: 900,
            body_limit_bytes: 256 * 1024,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Corrective attempts after the first synthesis.
    #[validate(range(max = 10))]
    pub max_retries: u32,
    #[validate(range(min = 1))]
    pub stage_timeout_seconds: u64,
    pub persist_records: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            stage_timeout_seconds: 300,
            persist_records: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatchConfig {
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    #[validate(range(min = 0.0))]
    pub unit_price: f64,
    #[validate(length(min = 1))]
    pub devices: Vec<DeviceSpec>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let window = ResponseWindow::default();
        Self {
            window_start: window.start,
            window_end: window.end,
            unit_price: DEFAULT_UNIT_PRICE,
            devices: DeviceCatalog::default().specs().cloned().collect(),
        }
    }
}

impl DispatchConfig {
    pub fn window(&self) -> ResponseWindow {
        ResponseWindow::new(self.window_start, self.window_end)
    }

    pub fn catalog(&self) -> DeviceCatalog {
        DeviceCatalog::new(self.devices.iter().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub path: PathBuf,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/baseline.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    pub directory: PathBuf,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("records"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CollaboratorConfig {
    #[validate(length(min = 1))]
    pub base_url: String,
    #[validate(range(min = 1))]
    pub http_timeout_seconds: u64,
    pub api_key: Option<String>,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000/tasks".into(),
            http_timeout_seconds: 120,
            api_key: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("VPP__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("reading configuration")?;
        cfg.validate().context("invalid configuration")?;
        if cfg.dispatch.window_end <= cfg.dispatch.window_start {
            anyhow::bail!("invalid configuration: dispatch window must end after it starts");
        }
        DeviceCatalog::try_new(cfg.dispatch.devices.iter().cloned())
            .context("invalid configuration: dispatch.devices")?;
        if cfg.pipeline.stage_timeout_seconds.saturating_mul(1000) <= cfg.sandbox.max_duration_ms {
            anyhow::bail!(
                "invalid configuration: pipeline.stage_timeout_seconds must exceed \
                 sandbox.max_duration_ms so the sandbox can report its own timeout"
            );
        }
        Ok(cfg)
    }
}
