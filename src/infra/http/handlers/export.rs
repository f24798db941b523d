use axum::{
    Json,
    body::Body,
    extract::{Extension, State, rejection::JsonRejection},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::Response,
};
use bytes::Bytes;

use crate::{
    application::export::{ExportError, finalizer},
    domain::{
        export::{ExportRequest, ImageRef},
        identity::Identity,
    },
    infra::http::{
        AppState,
        error::{ApiError, codes},
        models::ExportPayload,
    },
};

use super::{domain_error, json_rejection};

const SOURCE: &str = "infra::http::export";

/// Package the submitted document and its images into a downloadable zip archive.
///
/// Validation happens before any filesystem work; the pipeline itself runs on the blocking
/// pool and the finished archive is returned as an attachment.
pub async fn export_document(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<ExportPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(json_rejection)?;

    let images = payload.images.into_iter().map(ImageRef::from).collect();
    let request =
        ExportRequest::new(payload.content, images, &payload.image_path).map_err(domain_error)?;

    let service = state.export.clone();
    let outcome = tokio::task::spawn_blocking(move || service.run(&identity, &request))
        .await
        .map_err(|err| {
            ApiError::internal(codes::EXPORT_FAILED, "Export failed").with_source(SOURCE, &err)
        })?
        .map_err(export_error)?;

    let bytes = finalizer::read_archive(&outcome.archive.path)
        .await
        .map_err(|err| {
            ApiError::internal(codes::EXPORT_FAILED, "Export failed").with_source(SOURCE, &err)
        })?;

    Ok(build_archive_response(&outcome.archive.file_name, bytes))
}

fn export_error(err: ExportError) -> ApiError {
    match err {
        ExportError::Invalid(err) => domain_error(err),
        other => {
            let kind = other.kind();
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::EXPORT_FAILED,
                "Export failed",
                Some(format!("{} error", kind.as_str())),
            )
            .with_source(SOURCE, &other)
        }
    }
}

fn build_archive_response(file_name: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&finalizer::attachment_disposition(file_name)) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
