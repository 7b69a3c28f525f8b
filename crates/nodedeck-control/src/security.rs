use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::Instrument;

use crate::auth::{ACCESS_COOKIE_NAME, validate_access_jwt};
use crate::error::json_error;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tags every request with an id (taken from the client or generated) and
/// runs it inside a span carrying that id.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(v) = HeaderValue::from_str(&id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, v);
    }

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(v) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

/// Rejects requests without a valid access cookie and exposes the caller as
/// an `AuthUser` extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let Some(token) = jar.get(ACCESS_COOKIE_NAME).map(|c| c.value().to_string()) else {
        return json_error(StatusCode::UNAUTHORIZED, "missing access token");
    };

    match validate_access_jwt(&state.config.jwt_secret, &token) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(_) => json_error(StatusCode::UNAUTHORIZED, "invalid access token"),
    }
}
