use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use super::{error::ApiError, response::ApiResponse};
use crate::{
    app::AppState,
    comfort::CurvePoint,
    domain::{DispatchPlan, ProblemStatement},
    pipeline::RunOutcome,
    session::{RunComparison, SessionId},
};

/// Upper bound on the number of points one curve request may return.
const MAX_CURVE_POINTS: f64 = 10_000.0;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions/:id/runs", post(start_run))
        .route("/sessions/:id/plans", get(list_plans))
        .route("/sessions/:id/comparison", get(compare_runs))
        .route("/comfort/curve", get(comfort_curve))
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate)]
pub struct RunRequest {
    #[validate(length(min = 1, max = 20000))]
    pub text: String,
    #[validate(length(max = 4000))]
    pub instructions: Option<String>,
    #[validate(range(min = -50.0, max = 80.0))]
    pub comfort_condition: Option<f64>,
}

impl From<RunRequest> for ProblemStatement {
    fn from(req: RunRequest) -> Self {
        ProblemStatement {
            text: req.text,
            instructions: req.instructions.filter(|i| !i.trim().is_empty()),
            comfort_condition: req.comfort_condition,
        }
    }
}

pub async fn start_run(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<ApiResponse<RunOutcome>, ApiError> {
    let session = SessionId::parse(&id)?;
    req.validate()?;
    let started = Instant::now();
    let outcome = st.pipeline.run(session, req.into()).await?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(outcome).with_duration(elapsed_ms))
}

pub async fn list_plans(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Vec<DispatchPlan>>, ApiError> {
    let session = SessionId::parse(&id)?;
    let plans = st.sessions.plans(&session);
    let count = plans.len();
    Ok(ApiResponse::success(plans).with_count(count))
}

pub async fn compare_runs(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<RunComparison>, ApiError> {
    let session = SessionId::parse(&id)?;
    let comparison = st.records.compare(&session).await?;
    if comparison.runs.is_empty() {
        return Err(ApiError::NotFound(format!("no recorded runs for session {session}")));
    }
    let count = comparison.runs.len();
    Ok(ApiResponse::success(comparison).with_count(count))
}

#[derive(Debug, Deserialize)]
pub struct CurveQuery {
    pub step: Option<f64>,
    /// Condition to report the required power and capacity delta for.
    pub target: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CurveResponse {
    pub rated_capacity: f64,
    pub low: f64,
    pub high: f64,
    pub baseline_condition: f64,
    pub points: Vec<CurvePoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetReading>,
}

#[derive(Debug, Serialize)]
pub struct TargetReading {
    pub condition: f64,
    pub power: f64,
    pub capacity_delta: f64,
}

pub async fn comfort_curve(
    State(st): State<AppState>,
    Query(q): Query<CurveQuery>,
) -> Result<ApiResponse<CurveResponse>, ApiError> {
    let curve = &st.cfg.comfort;
    let step = q.step.unwrap_or(50.0);
    if !step.is_finite() || step <= 0.0 {
        return Err(ApiError::BadRequest("step must be a positive number".into()));
    }
    if curve.rated_capacity / step > MAX_CURVE_POINTS {
        return Err(ApiError::BadRequest(format!(
            "step too small, at most {MAX_CURVE_POINTS} points per curve"
        )));
    }
    let points = curve.sample(step);
    let count = points.len();
    let target = q.target.filter(|t| t.is_finite()).map(|t| TargetReading {
        condition: t,
        power: curve.power_for(t),
        capacity_delta: curve.delta_for(t),
    });
    Ok(ApiResponse::success(CurveResponse {
        rated_capacity: curve.rated_capacity,
        low: curve.low,
        high: curve.high,
        baseline_condition: curve.baseline_condition,
        points,
        target,
    })
    .with_count(count))
}
