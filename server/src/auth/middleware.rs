//! Authentication extractor.
//!
//! Clients send the shared secret as a Bearer token. Without a configured
//! `AUTH_SECRET` the server runs open and requests are anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    /// True when the server has no secret configured
    pub anonymous: bool,
}

type AuthRejection = (StatusCode, &'static str);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(auth_header, state.config.auth_secret.as_deref())
    }
}

fn authorize(header: Option<&str>, secret: Option<&str>) -> Result<AuthUser, AuthRejection> {
    let Some(secret) = secret else {
        return Ok(AuthUser { anonymous: true });
    };

    match header {
        Some(header) => {
            let token = header
                .strip_prefix("Bearer ")
                .ok_or((StatusCode::UNAUTHORIZED, "Invalid authorization header format"))?;
            if token.is_empty() {
                return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
            }
            if token != secret {
                return Err((StatusCode::FORBIDDEN, "Invalid bearer token"));
            }
            Ok(AuthUser { anonymous: false })
        }
        None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
    }
}
