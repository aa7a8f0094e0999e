// src/errors.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use thiserror::Error;

/// Every failure a handler can produce, mapped onto an HTTP status and a
/// JSON body of the form `{"error": <category>, "message": <detail>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("serialization error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn category(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Database(_) | ApiError::Bson(_) | ApiError::Internal(_) => "internal",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Bson(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error: {}", self);
        }
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.category(),
            "message": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_categories() {
        let cases = [
            (ApiError::Validation("bad".into()), StatusCode::BAD_REQUEST, "validation"),
            (ApiError::Unauthorized("who".into()), StatusCode::UNAUTHORIZED, "unauthorized"),
            (ApiError::Forbidden("no".into()), StatusCode::FORBIDDEN, "forbidden"),
            (ApiError::NotFound("gone".into()), StatusCode::NOT_FOUND, "not_found"),
            (ApiError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        ];
        for (err, status, category) in cases {
            assert_eq!(err.status_code(), status);
            assert_eq!(err.category(), category);
        }
    }

    #[test]
    fn error_response_is_json() {
        let resp = ApiError::NotFound("Sprint not found".into()).error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let content_type = resp
            .headers()
            .get(actix_web::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("application/json"));
    }
}
