//! Moderator authentication with a pre-shared key.
//!
//! Only the moderation routes sit behind this layer; riders never
//! authenticate.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, ErrorResponse};

/// Header carrying the moderator key.
pub const MODERATOR_KEY_HEADER: &str = "x-moderator-key";

/// Reject requests without the moderator key. With no key configured the
/// routes are open.
pub async fn moderator_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    match presented_key(&request) {
        Some(key) if constant_time_compare(&key, &expected) => next.run(request).await,
        Some(_) => {
            tracing::warn!("Rejected moderator request with an invalid key");
            unauthorized_response("Invalid moderator key")
        }
        None => unauthorized_response("Missing moderator key"),
    }
}

/// Key from `x-moderator-key`, falling back to a bearer token.
fn presented_key(request: &Request) -> Option<String> {
    let headers = request.headers();
    headers
        .get(MODERATOR_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
        .map(|s| s.trim().to_string())
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorResponse::new(&AppError::Unauthorized(message.to_string()), 0);
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
