use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::sale::{status_for, SaleServiceError, ShareTokenError, StatementError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Json(serde_json::Error),
    Server(axum::Error),
    Sale(SaleServiceError),
    Share(ShareTokenError),
    Statement(StatementError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Json(err) => write!(f, "invalid record json: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Sale(err) => write!(f, "sale workflow error: {}", err),
            AppError::Share(err) => write!(f, "share token error: {}", err),
            AppError::Statement(err) => write!(f, "statement error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Json(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Sale(err) => Some(err),
            AppError::Share(err) => Some(err),
            AppError::Statement(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Sale(err) => status_for(err),
            AppError::Share(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Statement(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<SaleServiceError> for AppError {
    fn from(value: SaleServiceError) -> Self {
        Self::Sale(value)
    }
}

impl From<ShareTokenError> for AppError {
    fn from(value: ShareTokenError) -> Self {
        Self::Share(value)
    }
}

impl From<StatementError> for AppError {
    fn from(value: StatementError) -> Self {
        Self::Statement(value)
    }
}
