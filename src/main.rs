use anyhow::Result;
use tracing::{info, warn};
use vpp_dispatch_planner::{api, app::AppState, config::Config, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = Config::load()?;

    if cfg.auth.token.len() < 16 || cfg.auth.token.starts_with("__SET_VIA_ENV") {
        anyhow::bail!(
            "VPP__AUTH__TOKEN must be set to a random token of at least 16 characters \
            (e.g. `openssl rand -base64 32`)"
        );
    }

    let state = AppState::new(cfg.clone()).await?;
    let app = api::router(state, &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("binding to 0.0.0.0: the planner will be reachable from the network");
    }
    info!(
        %addr,
        max_retries = cfg.pipeline.max_retries,
        stage_timeout_seconds = cfg.pipeline.stage_timeout_seconds,
        "starting vpp dispatch planner"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}
