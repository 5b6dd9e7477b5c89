use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::PipelineError;
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// The run was understood but cannot be turned into a plan.
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::Unprocessable(_) => "Unprocessable",
            ApiError::GatewayTimeout(_) => "GatewayTimeout",
            ApiError::InternalError(_) => "InternalServerError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::InternalError(_) => {
                tracing::error!(error = %self, "API error occurred");
                "An internal error occurred".to_string()
            }
            ApiError::GatewayTimeout(_) | ApiError::Unprocessable(_) => {
                tracing::warn!(error = %self, "run rejected");
                self.to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Client error");
                self.to_string()
            }
        };

        let body = ErrorResponse {
            error: self.error_type().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Formulation(_) | PipelineError::Dispatch(_) => {
                ApiError::Unprocessable(error.to_string())
            }
            PipelineError::StageTimeout { .. } => ApiError::GatewayTimeout(error.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{error:#}"))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchError;
    use crate::domain::{DeviceId, FormulationError};
    use crate::pipeline::Stage;

    #[test]
    fn pipeline_errors_map_to_status_codes() {
        let dispatch: ApiError =
            PipelineError::Dispatch(DispatchError::MissingBaseline(DeviceId::from("PV"))).into();
        assert_eq!(dispatch.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let formulation: ApiError = PipelineError::Formulation(FormulationError::NoDevices).into();
        assert_eq!(formulation.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let timeout: ApiError = PipelineError::StageTimeout {
            stage: Stage::Execute,
            timeout_ms: 1000,
        }
        .into();
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.error_type(), "GatewayTimeout");
    }

    #[test]
    fn session_errors_are_bad_requests() {
        let e: ApiError = SessionError::Empty.into();
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
    }
}
