use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};

use crate::{
    application::title::TitleError,
    infra::http::{
        AppState,
        error::{ApiError, codes},
        models::{TitlePayload, TitleResponse},
    },
};

use super::json_rejection;

const SOURCE: &str = "infra::http::title";

pub async fn get_title(
    State(state): State<AppState>,
    payload: Result<Json<TitlePayload>, JsonRejection>,
) -> Result<Json<TitleResponse>, ApiError> {
    let Json(payload) = payload.map_err(json_rejection)?;

    let title = state
        .titles
        .fetch(&payload.url)
        .await
        .map_err(title_error)?;

    Ok(Json(TitleResponse { title }))
}

fn title_error(err: TitleError) -> ApiError {
    let message = match &err {
        TitleError::EmptyUrl => return ApiError::bad_request("URL is required", None),
        TitleError::InvalidUrl => {
            return ApiError::bad_request("URL must start with http:// or https://", None);
        }
        TitleError::Timeout => "Request timed out",
        TitleError::Connect => "Could not connect to the site",
        TitleError::NotFound => "Page not found",
        TitleError::Forbidden => "The site denied access",
        TitleError::Status(_) => "The site returned an error",
        TitleError::Request(_) => "Request failed",
        TitleError::Parse(_) => "Could not parse the page",
        TitleError::Missing => "The page has no title",
    };
    let hint = match &err {
        TitleError::Status(code) => Some(format!("HTTP {code}")),
        _ => None,
    };

    ApiError::new(
        StatusCode::BAD_REQUEST,
        codes::TITLE_FETCH_FAILED,
        message,
        hint,
    )
    .with_source(SOURCE, &err)
}
