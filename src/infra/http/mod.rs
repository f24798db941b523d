//! HTTP surface: session routes, image uploads, title lookup, and document export.

pub mod error;
mod handlers;
mod middleware;
pub mod models;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, post},
};

use crate::application::{
    export::ExportService,
    sessions::{IdentityProvider, SessionService},
    title::TitleFetcher,
};

use super::uploads::UploadStorage;

use self::middleware::{log_responses, require_identity, set_request_context};

pub use self::middleware::RequestContext;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "mdport_session";

/// Slack on top of the file limit for multipart framing and the other form fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    pub export_body_bytes: usize,
    pub upload_body_bytes: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub export: Arc<ExportService>,
    pub uploads: Arc<UploadStorage>,
    pub titles: Arc<TitleFetcher>,
    pub limits: HttpLimits,
}

impl AppState {
    /// Wire the services together; the session service doubles as the identity provider.
    pub fn new(
        sessions: Arc<SessionService>,
        export: Arc<ExportService>,
        uploads: Arc<UploadStorage>,
        titles: Arc<TitleFetcher>,
        export_body_bytes: usize,
    ) -> Self {
        let upload_body_bytes = usize::try_from(uploads.max_file_bytes())
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD_BYTES);
        Self {
            identity: sessions.clone(),
            sessions,
            export,
            uploads,
            titles,
            limits: HttpLimits {
                export_body_bytes,
                upload_body_bytes,
            },
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let uploads_route = format!("{}/{{*path}}", state.uploads.url_prefix());

    let protected = Router::new()
        .route("/session", get(handlers::session::current))
        .route(
            "/upload_image",
            post(handlers::uploads::upload_image)
                .layer(DefaultBodyLimit::max(state.limits.upload_body_bytes)),
        )
        .route(&uploads_route, get(handlers::uploads::serve_upload))
        .route("/get_title", post(handlers::title::get_title))
        .route(
            "/export",
            post(handlers::export::export_document)
                .layer(DefaultBodyLimit::max(state.limits.export_body_bytes)),
        )
        .route_layer(from_fn_with_state(state.clone(), require_identity));

    Router::new()
        .route("/login", post(handlers::session::login))
        .route("/logout", post(handlers::session::logout))
        .route("/_health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
}

async fn health() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
