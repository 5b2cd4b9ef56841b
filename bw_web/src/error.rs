//! ABOUTME: Error handling utilities for RFC 7807 Problem Details responses
//! ABOUTME: Maps store and query errors onto HTTP statuses

use crate::models::ProblemDetails;
use actix_web::{error::QueryPayloadError, HttpRequest, HttpResponse, ResponseError};
use std::fmt;

/// API error wrapper for RFC 7807 Problem Details
#[derive(Debug)]
pub struct ApiError {
    pub problem: ProblemDetails,
    pub status_code: u16,
}

impl ApiError {
    pub fn new(problem: ProblemDetails) -> Self {
        let status_code = problem.status.unwrap_or(500);
        Self {
            problem,
            status_code,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(ProblemDetails::validation_error(detail))
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        let problem = ProblemDetails::new(
            "https://datatracker.ietf.org/rfc/rfc7231.html#section-6.5.4",
            "Not Found",
        )
        .with_status(404)
        .with_detail(detail);

        Self::new(problem)
    }

    /// The store could not answer; reads never fabricate data
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        let problem = ProblemDetails::new(
            "https://datatracker.ietf.org/rfc/rfc7231.html#section-6.6.4",
            "Service Unavailable",
        )
        .with_status(503)
        .with_detail(detail);

        Self::new(problem)
    }

    pub fn internal_server_error(detail: impl Into<String>) -> Self {
        let problem = ProblemDetails::new(
            "https://datatracker.ietf.org/rfc/rfc7231.html#section-6.6.1",
            "Internal Server Error",
        )
        .with_status(500)
        .with_detail(detail);

        Self::new(problem)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.problem.title,
            self.problem.detail.as_deref().unwrap_or("No details available")
        )
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(self.status_code)
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("application/problem+json")
            .json(&self.problem)
    }
}

impl From<bw_core::Error> for ApiError {
    fn from(error: bw_core::Error) -> Self {
        match error {
            bw_core::Error::NotFound(msg) => Self::not_found(msg),
            bw_core::Error::Validation(msg) => Self::bad_request(msg),
            bw_core::Error::Database(msg) | bw_core::Error::StoreTransaction(msg) => {
                Self::service_unavailable(format!("Store unavailable: {}", msg))
            }
            other => Self::internal_server_error(other.to_string()),
        }
    }
}

/// Turn unparseable query strings into problem documents
pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::bad_request(format!("Invalid query parameters: {}", err)).into()
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
