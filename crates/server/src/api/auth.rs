//! Bearer token authentication for resource endpoints.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::oauth2::OAuth2State;
use crate::token::TokenClaims;

const REALM: &str = "oauth2-resource";

/// Error type for authentication failures
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthError {
    /// Error code ("unauthorized" or "invalid_token")
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl AuthError {
    pub fn unauthorized() -> Self {
        Self {
            error: "unauthorized".to_string(),
            error_description: Some(
                "Full authentication is required to access this resource".to_string(),
            ),
        }
    }

    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self {
            error: "invalid_token".to_string(),
            error_description: Some(description.into()),
        }
    }

    fn challenge(&self) -> String {
        if self.error == "invalid_token" {
            let description = self
                .error_description
                .as_deref()
                .unwrap_or_default()
                .replace('"', "'");
            format!(
                "Bearer realm=\"{REALM}\", error=\"invalid_token\", error_description=\"{description}\""
            )
        } else {
            format!("Bearer realm=\"{REALM}\"")
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let challenge = HeaderValue::from_str(&self.challenge())
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer"));
        let mut response = (StatusCode::UNAUTHORIZED, Json(self)).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, challenge);
        response
    }
}

/// Axum extractor that validates `Authorization: Bearer <jwt>` access tokens.
///
/// ```ignore
/// async fn handler(BearerAuth(claims): BearerAuth) -> impl IntoResponse {
///     format!("Hello, {}", claims.user_name)
/// }
/// ```
pub struct BearerAuth(pub TokenClaims);

impl FromRequestParts<OAuth2State> for BearerAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &OAuth2State,
    ) -> Result<Self, Self::Rejection> {
        let access_token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(AuthError::unauthorized)?;

        match state.issuer.verify_access_token(access_token) {
            Ok(claims) => Ok(BearerAuth(claims)),
            Err(err) => {
                tracing::debug!(error = %err, "rejected bearer token");
                Err(AuthError::invalid_token(match err {
                    crate::error::TokenError::InvalidToken(d)
                    | crate::error::TokenError::InvalidGrant(d) => d,
                    _ => "Invalid access token".to_string(),
                }))
            }
        }
    }
}

/// Token from an `Authorization` header value, scheme matched case-insensitively.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[test]
    fn challenges_name_the_realm() {
        let response = AuthError::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer realm=\"oauth2-resource\""
        );

        let response = AuthError::invalid_token("Access token expired").into_response();
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains("error=\"invalid_token\""));
        assert!(challenge.contains("Access token expired"));
    }
}
