use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{error::Error, fmt::Display};

#[derive(Debug, Clone, Copy)]
pub enum ApiError {
    /// The service is untracked or has no records in the requested window.
    NoData,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoData => write!(f, "No uptime data for this service"),
        }
    }
}

impl Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NoData => (StatusCode::NOT_FOUND, self.to_string()),
        }
        .into_response()
    }
}
