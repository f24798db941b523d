use axum::{
    Json,
    extract::{Extension, State, rejection::JsonRejection},
    http::StatusCode,
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};

use crate::{
    application::sessions::SessionError,
    domain::identity::Identity,
    infra::http::{
        AppState, SESSION_COOKIE,
        error::{ApiError, codes},
        models::{LoginPayload, SessionResponse},
    },
};

use super::{domain_error, json_rejection};

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginPayload>, JsonRejection>,
) -> Result<(CookieJar, Json<SessionResponse>), ApiError> {
    let Json(payload) = payload.map_err(json_rejection)?;

    let grant = state
        .sessions
        .login(&payload.username, &payload.password)
        .map_err(|err| match err {
            SessionError::Domain(err) => domain_error(err),
            SessionError::InvalidCredentials => ApiError::new(
                StatusCode::UNAUTHORIZED,
                codes::INVALID_CREDENTIALS,
                "Invalid username or password",
                None,
            ),
        })?;

    let max_age = i64::try_from(state.sessions.ttl().as_secs()).unwrap_or(i64::MAX);
    let cookie = Cookie::build((SESSION_COOKIE, grant.token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age));

    Ok((jar.add(cookie), Json(session_response(grant.identity))))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.logout(cookie.value());
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, StatusCode::NO_CONTENT)
}

pub async fn current(Extension(identity): Extension<Identity>) -> Json<SessionResponse> {
    Json(session_response(identity))
}

fn session_response(identity: Identity) -> SessionResponse {
    SessionResponse {
        user_id: identity.user_id,
        username: identity.username,
    }
}
