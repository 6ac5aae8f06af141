use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Why a resource owner could not be authenticated.
#[derive(Debug, Error)]
pub enum AuthenticationFailure {
    #[error("No such user")]
    NoSuchUser,
    #[error("Bad credentials")]
    BadCredentials,
    #[error("Directory unreachable: {0}")]
    DirectoryUnreachable(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid scope: {0}")]
    InvalidScope(String),
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("Token lifetime of {0}s overflows the clock")]
    Lifetime(i64),
}

/// OAuth2 error taxonomy returned by the authorization endpoints (RFC 6749 §5.2).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OAuth2Error {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client")]
    InvalidClient,
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("server_error")]
    ServerError,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuth2Error {
    pub fn code(&self) -> &'static str {
        match self {
            OAuth2Error::InvalidRequest(_) => "invalid_request",
            OAuth2Error::InvalidClient => "invalid_client",
            OAuth2Error::UnauthorizedClient(_) => "unauthorized_client",
            OAuth2Error::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuth2Error::InvalidGrant(_) => "invalid_grant",
            OAuth2Error::InvalidScope(_) => "invalid_scope",
            OAuth2Error::ServerError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuth2Error::InvalidClient | OAuth2Error::InvalidGrant(_) => StatusCode::UNAUTHORIZED,
            OAuth2Error::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn description(&self) -> Option<String> {
        match self {
            OAuth2Error::InvalidRequest(d)
            | OAuth2Error::UnauthorizedClient(d)
            | OAuth2Error::UnsupportedGrantType(d)
            | OAuth2Error::InvalidGrant(d)
            | OAuth2Error::InvalidScope(d) => Some(d.clone()),
            OAuth2Error::InvalidClient => Some("Bad client credentials".to_string()),
            OAuth2Error::ServerError => None,
        }
    }
}

impl IntoResponse for OAuth2Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.code().to_string(),
            error_description: self.description(),
        };
        let mut response = (status, Json(body)).into_response();
        if self == OAuth2Error::InvalidClient {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"oauth2/client\""),
            );
        }
        response
    }
}

impl From<AuthenticationFailure> for OAuth2Error {
    fn from(failure: AuthenticationFailure) -> Self {
        match failure {
            // Unknown users and wrong passwords are indistinguishable to the caller.
            AuthenticationFailure::NoSuchUser | AuthenticationFailure::BadCredentials => {
                OAuth2Error::InvalidGrant("Bad credentials".to_string())
            }
            AuthenticationFailure::DirectoryUnreachable(reason) => {
                tracing::error!(%reason, "directory unreachable during authentication");
                OAuth2Error::ServerError
            }
        }
    }
}

impl From<TokenError> for OAuth2Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidScope(d) => OAuth2Error::InvalidScope(d),
            TokenError::InvalidGrant(d) => OAuth2Error::InvalidGrant(d),
            TokenError::InvalidToken(d) => OAuth2Error::InvalidGrant(d),
            TokenError::Signing(e) => {
                tracing::error!(error = %e, "failed to sign token");
                OAuth2Error::ServerError
            }
            TokenError::Lifetime(ttl_seconds) => {
                tracing::error!(ttl_seconds, "token expiry out of range");
                OAuth2Error::ServerError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        let cases = [
            (OAuth2Error::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (OAuth2Error::InvalidClient, StatusCode::UNAUTHORIZED),
            (OAuth2Error::UnauthorizedClient("x".into()), StatusCode::BAD_REQUEST),
            (OAuth2Error::UnsupportedGrantType("x".into()), StatusCode::BAD_REQUEST),
            (OAuth2Error::InvalidGrant("x".into()), StatusCode::UNAUTHORIZED),
            (OAuth2Error::InvalidScope("x".into()), StatusCode::BAD_REQUEST),
            (OAuth2Error::ServerError, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{}", err.code());
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn invalid_client_carries_basic_challenge() {
        let response = OAuth2Error::InvalidClient.into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"oauth2/client\""
        );
    }

    #[test]
    fn credential_failures_collapse_to_invalid_grant() {
        assert_eq!(
            OAuth2Error::from(AuthenticationFailure::NoSuchUser),
            OAuth2Error::InvalidGrant("Bad credentials".into())
        );
        assert_eq!(
            OAuth2Error::from(AuthenticationFailure::BadCredentials),
            OAuth2Error::InvalidGrant("Bad credentials".into())
        );
        assert_eq!(
            OAuth2Error::from(AuthenticationFailure::DirectoryUnreachable(
                "connection refused".into()
            )),
            OAuth2Error::ServerError
        );
    }

    #[test]
    fn server_error_hides_detail() {
        assert_eq!(OAuth2Error::ServerError.description(), None);
        let err: OAuth2Error = TokenError::Signing(jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::InvalidRsaKey("bad".into()),
        ))
        .into();
        assert_eq!(err, OAuth2Error::ServerError);
        assert_eq!(
            OAuth2Error::from(TokenError::Lifetime(i64::MAX)),
            OAuth2Error::ServerError
        );
    }
}
