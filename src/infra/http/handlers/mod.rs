//! Route handlers, one module per surface.

pub(super) mod export;
pub(super) mod session;
pub(super) mod title;
pub(super) mod uploads;

use axum::{extract::rejection::JsonRejection, http::StatusCode};

use crate::domain::error::DomainError;

use super::error::{ApiError, codes};

/// Map body extraction failures onto the JSON error envelope.
pub(super) fn json_rejection(rejection: JsonRejection) -> ApiError {
    match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::PAYLOAD_TOO_LARGE,
            "Request body too large",
            None,
        ),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            codes::UNSUPPORTED_MEDIA_TYPE,
            "Expected a JSON request body",
            None,
        ),
        _ => ApiError::bad_request("Invalid request body", Some(rejection.body_text())),
    }
}

pub(super) fn domain_error(err: DomainError) -> ApiError {
    let hint = Some(err.to_string());
    match err {
        DomainError::InvalidImagePath { .. } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_IMAGE_PATH,
            "Image path must start with `/`",
            hint,
        ),
        DomainError::InvalidImageName { .. } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_IMAGE_NAME,
            "Image file name is not allowed",
            hint,
        ),
        DomainError::DuplicateImageName { .. } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::DUPLICATE_IMAGE_NAME,
            "Two images share one file name",
            hint,
        ),
        DomainError::BlankCredentials => {
            ApiError::bad_request("Username and password are required", None)
        }
    }
}
