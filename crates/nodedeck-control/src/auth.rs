use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

use crate::error::json_error;
use crate::state::AppState;

pub const ACCESS_COOKIE_NAME: &str = "access";
const ISSUER: &str = "nodedeck";
const AUDIENCE: &str = "nodedeck-web";
const SESSION_HOURS: i64 = 12;

/// Authenticated caller, inserted into request extensions by
/// [`crate::security::require_auth`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    iat: usize,
    iss: String,
    aud: String,
}

fn build_access_cookie(jwt: String) -> Cookie<'static> {
    let mut c = Cookie::new(ACCESS_COOKIE_NAME, jwt);
    c.set_http_only(true);
    c.set_same_site(SameSite::Lax);
    c.set_path("/");
    c
}

fn clear_cookie(name: &'static str) -> Cookie<'static> {
    let mut c = Cookie::new(name, "");
    c.set_path("/");
    c.make_removal();
    c
}

pub fn make_access_jwt(secret: &[u8], username: &str) -> anyhow::Result<String> {
    let now = time::OffsetDateTime::now_utc();
    let exp = (now + time::Duration::hours(SESSION_HOURS)).unix_timestamp() as usize;
    let iat = now.unix_timestamp() as usize;

    let claims = Claims {
        sub: username.to_string(),
        exp,
        iat,
        iss: ISSUER.to_string(),
        aud: AUDIENCE.to_string(),
    };

    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret),
    )?)
}

pub fn validate_access_jwt(secret: &[u8], token: &str) -> anyhow::Result<AuthUser> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    validation.set_issuer(&[ISSUER]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret),
        &validation,
    )?;

    // The single configured account is its own owner id.
    Ok(AuthUser {
        user_id: data.claims.sub.clone(),
        username: data.claims.sub,
    })
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<LoginRequest>,
) -> Response {
    let cfg = &state.config;
    if input.username != cfg.admin_user || input.password != cfg.admin_pass {
        tracing::warn!(username = %input.username, "login rejected");
        return json_error(StatusCode::UNAUTHORIZED, "invalid credentials");
    }

    let access = match make_access_jwt(&cfg.jwt_secret, &input.username) {
        Ok(v) => v,
        Err(e) => {
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("jwt error: {e}"));
        }
    };

    tracing::info!(username = %input.username, "login");
    let jar = jar.add(build_access_cookie(access));
    (
        jar,
        Json(AuthUser {
            user_id: input.username.clone(),
            username: input.username,
        }),
    )
        .into_response()
}

pub async fn whoami(Extension(user): Extension<AuthUser>) -> impl IntoResponse {
    Json(user)
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (jar.remove(clear_cookie(ACCESS_COOKIE_NAME)), StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trips() {
        let secret = b"test-secret";
        let token = make_access_jwt(secret, "admin").unwrap();
        let user = validate_access_jwt(secret, &token).unwrap();
        assert_eq!(user.user_id, "admin");
        assert_eq!(user.username, "admin");
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = make_access_jwt(b"one", "admin").unwrap();
        assert!(validate_access_jwt(b"two", &token).is_err());
        assert!(validate_access_jwt(b"one", "not.a.jwt").is_err());
    }
}
