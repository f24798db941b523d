use std::io::ErrorKind;

use axum::{
    Json,
    body::Body,
    extract::{Extension, Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::Response,
};
use axum_extra::extract::Multipart;
use bytes::Bytes;
use futures::StreamExt;
use metrics::counter;
use tracing::{info, warn};

use crate::{
    domain::identity::Identity,
    infra::{
        http::{
            AppState,
            error::{ApiError, codes},
            models::UploadResponse,
        },
        uploads::UploadStorageError,
    },
};

const SOURCE: &str = "infra::http::uploads";
const IMAGE_FIELD: &str = "image";

pub async fn upload_image(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let limit = state.uploads.max_file_bytes();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                let status = err.status();
                warn!(
                    target = SOURCE,
                    status = status.as_u16(),
                    error = %err,
                    "failed to read multipart payload"
                );
                return Err(if status == StatusCode::PAYLOAD_TOO_LARGE {
                    too_large(limit)
                } else {
                    ApiError::bad_request("Invalid multipart payload", None)
                });
            }
        };

        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::bad_request("No file selected", None))?;

        let stream = field.map(move |result| {
            result.map_err(|err| {
                if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    UploadStorageError::PayloadTooLarge { limit }
                } else {
                    UploadStorageError::stream(err)
                }
            })
        });

        return match state
            .uploads
            .store_stream(&identity, &file_name, stream)
            .await
        {
            Ok(stored) => {
                counter!("mdport_upload_total", "result" => "success").increment(1);
                info!(
                    target = SOURCE,
                    op = "uploads::store",
                    user = %identity.label(),
                    url = %stored.url,
                    size_bytes = stored.size_bytes,
                    "image uploaded"
                );
                Ok(Json(UploadResponse {
                    success: true,
                    url: stored.url,
                    filename: stored.file_name,
                }))
            }
            Err(err) => {
                counter!("mdport_upload_total", "result" => "failure").increment(1);
                Err(upload_error(err))
            }
        };
    }

    Err(ApiError::bad_request("No file uploaded", None))
}

pub async fn serve_upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    match state.uploads.read_owned(&identity, &path).await {
        Ok(bytes) => Ok(build_upload_response(&path, bytes)),
        Err(UploadStorageError::Forbidden) => Err(ApiError::forbidden()),
        Err(UploadStorageError::InvalidPath) => Err(ApiError::not_found("Image not found")),
        Err(UploadStorageError::Io(err))
            if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) =>
        {
            Err(ApiError::not_found("Image not found"))
        }
        Err(err) => Err(
            ApiError::internal(codes::UPLOAD_FAILED, "Failed to read image")
                .with_source(SOURCE, &err),
        ),
    }
}

fn upload_error(err: UploadStorageError) -> ApiError {
    match err {
        UploadStorageError::UnsupportedExtension { .. } => ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            codes::UNSUPPORTED_MEDIA_TYPE,
            "File type not allowed",
            Some(err.to_string()),
        ),
        UploadStorageError::PayloadTooLarge { limit } => too_large(limit),
        UploadStorageError::EmptyPayload => ApiError::bad_request("Uploaded file is empty", None),
        UploadStorageError::PayloadStream { .. } => {
            ApiError::bad_request("Failed to read upload", None).with_source(SOURCE, &err)
        }
        other => ApiError::internal(codes::UPLOAD_FAILED, "Upload failed")
            .with_source(SOURCE, &other),
    }
}

fn too_large(limit: u64) -> ApiError {
    ApiError::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        codes::PAYLOAD_TOO_LARGE,
        "File too large",
        Some(format!("limit is {} MiB", limit.div_ceil(1_048_576))),
    )
}

fn build_upload_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, max-age=3600"));
    response
}
