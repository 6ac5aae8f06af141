//! OAuth2 HTTP endpoints.
//!
//! - `POST /oauth/token` - password and refresh_token grants
//! - `POST /oauth/check_token` - token introspection for registered clients
//! - `GET /oauth/token_key` - public verifier key

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::error::{ErrorResponse, OAuth2Error};
use crate::oauth2::grant::{self, ClientCredentials, TokenRequest};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use crate::token::{IssuedTokens, TokenInfo, TokenKey, format_scope};

/// Creates the OAuth2 router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(token))
        .routes(routes!(check_token))
        .routes(routes!(token_key))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes
    pub scope: String,
    pub jti: String,
}

impl TokenResponse {
    fn new(tokens: IssuedTokens, now: OffsetDateTime) -> Self {
        Self {
            expires_in: tokens.access.expires_in(now),
            scope: format_scope(tokens.access.scopes()),
            jti: tokens.access.claims.jti.clone(),
            access_token: tokens.access.value,
            token_type: "bearer".to_string(),
            refresh_token: tokens.refresh.map(|t| t.value),
        }
    }
}

#[derive(Default, Deserialize, ToSchema)]
pub struct CheckTokenRequest {
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Description returned for bodies that are not a usable form.
pub const MALFORMED_FORM: &str = "Malformed request body";

const NO_CACHE: [(header::HeaderName, &str); 2] = [
    (header::CACHE_CONTROL, "no-store"),
    (header::PRAGMA, "no-cache"),
];

// =============================================================================
// Handlers
// =============================================================================

/// Token endpoint
///
/// Exchanges resource owner credentials or a refresh token for an access token.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Malformed or disallowed request", body = ErrorResponse),
        (status = 401, description = "Bad client or resource owner credentials", body = ErrorResponse),
        (status = 500, description = "Directory or signing failure", body = ErrorResponse)
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let params = match form {
        Ok(Form(params)) => params,
        Err(rejection) => {
            return (NO_CACHE, malformed_form(rejection)).into_response();
        }
    };
    let credentials =
        extract_client_credentials(&headers, params.client_id.as_deref(), params.client_secret.as_deref());

    match grant::process_token_request(&state, credentials, &params).await {
        Ok(tokens) => (
            NO_CACHE,
            Json(TokenResponse::new(tokens, OffsetDateTime::now_utc())),
        )
            .into_response(),
        Err(err) => (NO_CACHE, err).into_response(),
    }
}

/// Extractor detail stays in the log; callers only learn the body was unusable.
fn malformed_form(rejection: FormRejection) -> OAuth2Error {
    tracing::debug!(error = %rejection, "malformed form body");
    OAuth2Error::InvalidRequest(MALFORMED_FORM.to_string())
}

/// Check token
///
/// Introspects an access token on behalf of a registered client.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/check_token",
    tag = OAUTH2_TAG,
    request_body(content = CheckTokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token introspection result", body = TokenInfo),
        (status = 400, description = "Missing token", body = ErrorResponse),
        (status = 401, description = "Bad client credentials", body = ErrorResponse)
    )
)]
pub async fn check_token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<CheckTokenRequest>, FormRejection>,
) -> Result<Json<TokenInfo>, OAuth2Error> {
    let Form(params) = form.map_err(malformed_form)?;
    let credentials =
        extract_client_credentials(&headers, params.client_id.as_deref(), params.client_secret.as_deref());
    let client = grant::authenticate_client(state.clients.as_ref(), credentials.as_ref()).await?;

    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuth2Error::InvalidRequest("Missing token".into()))?;
    let info = state.issuer.introspect(&token);
    tracing::debug!(client_id = %client.client_id, active = info.active, "token introspected");
    Ok(Json(info))
}

/// Token key
///
/// Publishes the key resource servers verify token signatures with. Only
/// available when tokens are signed with an asymmetric key.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/token_key",
    tag = OAUTH2_TAG,
    responses(
        (status = 200, description = "Verifier key", body = TokenKey),
        (status = 403, description = "Key is a shared secret", body = ErrorResponse)
    )
)]
pub async fn token_key(State(state): State<OAuth2State>) -> Response {
    match state.issuer.token_key() {
        Some(key) => Json(key).into_response(),
        None => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "access_denied".to_string(),
                error_description: Some("Token key is not published".to_string()),
            }),
        )
            .into_response(),
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Client credentials from HTTP Basic auth, falling back to the form body.
pub fn extract_client_credentials(
    headers: &HeaderMap,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Option<ClientCredentials> {
    // Try Basic auth first
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        return Some(ClientCredentials {
            client_id: decode_form_component(id),
            client_secret: decode_form_component(secret),
        });
    }

    // Fall back to form body
    Some(ClientCredentials {
        client_id: client_id.filter(|id| !id.is_empty())?.to_string(),
        client_secret: client_secret.unwrap_or_default().to_string(),
    })
}

/// Basic credentials are form-urlencoded before base64 (RFC 6749 §2.3.1).
fn decode_form_component(value: &str) -> String {
    urlencoding::decode(&value.replace('+', " "))
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}
