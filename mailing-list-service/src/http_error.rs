//! Maps the shared error taxonomy (§7) onto HTTP status codes and a JSON
//! body, the way `common::rpc::error::RpcResponseError` implements
//! `actix_web::ResponseError` for the JSON-RPC transport — here adapted to
//! plain REST responses instead of a JSON-RPC envelope.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use mailing_list_core::error::CoreError;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match &self.0 {
            CoreError::Validation { field, message } => json!({
                "error": message,
                "field": field,
            }),
            other => json!({ "error": other.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
