// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client bearer-key authentication.

use crate::AppState;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};
use toolgate_core::GatewayError;

/// The validated client key, exposed to handlers as a request extension.
#[derive(Debug, Clone)]
pub struct ClientKey(pub String);

/// Extract the bearer token from an `Authorization` header value.
fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Constant-time membership test against the allow-list.
///
/// Every candidate is compared regardless of earlier matches so timing does
/// not reveal which key (if any) matched.
fn key_allowed(key: &str, allowed: &[String]) -> bool {
    let mut found = Choice::from(0u8);
    for candidate in allowed {
        found |= candidate.as_bytes().ct_eq(key.as_bytes());
    }
    found.into()
}

/// Axum middleware enforcing the client allow-list before any upstream
/// contact.  On success the key is inserted as a [`ClientKey`] extension.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let config = state.config.current();

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(|t| t.to_string());

    let Some(token) = token else {
        return unauthorized();
    };
    if !key_allowed(&token, &config.client_authentication.allowed_keys) {
        return unauthorized();
    }

    req.extensions_mut().insert(ClientKey(token));
    next.run(req).await
}

fn unauthorized() -> Response {
    let err = GatewayError::Unauthorized;
    (
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::UNAUTHORIZED),
        Json(err.to_body()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn allow_list_membership() {
        let allowed = vec!["ck-1".to_string(), "ck-2".to_string()];
        assert!(key_allowed("ck-1", &allowed));
        assert!(key_allowed("ck-2", &allowed));
        assert!(!key_allowed("ck-3", &allowed));
        assert!(!key_allowed("", &allowed));
        assert!(!key_allowed("ck-1x", &allowed));
    }

    #[test]
    fn empty_allow_list_rejects_everything() {
        assert!(!key_allowed("anything", &[]));
    }
}
