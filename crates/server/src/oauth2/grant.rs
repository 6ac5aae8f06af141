//! Token request processing.
//!
//! A token request passes through fixed stages, each of which may end it:
//!
//! 1. [`parse_grant_type`]
//! 2. [`authenticate_client`]
//! 3. [`ensure_grant_allowed`]
//! 4. password or refresh grant dispatch
//!
//! The endpoint turns the outcome into the token response or an OAuth2 error.

use std::fmt;

use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::clients::{Client, ClientRegistry, GrantType};
use crate::error::OAuth2Error;
use crate::oauth2::OAuth2State;
use crate::token::{IssuedTokens, effective_scopes, format_scope, parse_scope};

/// Form body of `POST /oauth/token`.
#[derive(Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    /// Space-separated list of requested scopes
    pub scope: Option<String>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Credentials a client presented, from Basic auth or the form body.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

pub fn parse_grant_type(raw: Option<&str>) -> Result<GrantType, OAuth2Error> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Err(OAuth2Error::InvalidRequest("Missing grant type".into())),
        Some(value) => value
            .parse()
            .map_err(OAuth2Error::UnsupportedGrantType),
    }
}

/// Resolve the client and verify its secret.
pub async fn authenticate_client(
    registry: &dyn ClientRegistry,
    credentials: Option<&ClientCredentials>,
) -> Result<Client, OAuth2Error> {
    let Some(credentials) = credentials else {
        warn!("token request without client credentials");
        return Err(OAuth2Error::InvalidClient);
    };
    let Some(client) = registry.find(&credentials.client_id).cloned() else {
        warn!(client_id = %credentials.client_id, "unknown client");
        return Err(OAuth2Error::InvalidClient);
    };

    let candidate = client.clone();
    let secret = credentials.client_secret.clone();
    let verified = tokio::task::spawn_blocking(move || candidate.verify_secret(&secret))
        .await
        .unwrap_or(false);
    if !verified {
        warn!(client_id = %client.client_id, "client secret mismatch");
        return Err(OAuth2Error::InvalidClient);
    }
    Ok(client)
}

pub fn ensure_grant_allowed(client: &Client, grant_type: GrantType) -> Result<(), OAuth2Error> {
    if client.allows_grant(grant_type) {
        Ok(())
    } else {
        Err(OAuth2Error::UnauthorizedClient(format!(
            "Unauthorized grant type: {}",
            grant_type.as_str()
        )))
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OAuth2Error> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuth2Error::InvalidRequest(format!("Missing {name}")))
}

async fn password_grant(
    state: &OAuth2State,
    client: &Client,
    request: &TokenRequest,
) -> Result<IssuedTokens, OAuth2Error> {
    let username = required(request.username.as_deref(), "username")?;
    let password = required(request.password.as_deref(), "password")?;
    let requested = parse_scope(request.scope.as_deref());
    // Scope problems are reported without touching the directory.
    effective_scopes(&requested, &client.allowed_scopes)?;

    let principal = state
        .authenticator
        .authenticate(username, password)
        .await
        .inspect_err(|failure| {
            warn!(client_id = %client.client_id, %username, %failure, "resource owner authentication failed")
        })?;
    Ok(state.issuer.issue(&principal, client, &requested)?)
}

fn refresh_grant(
    state: &OAuth2State,
    client: &Client,
    request: &TokenRequest,
) -> Result<IssuedTokens, OAuth2Error> {
    let refresh_token = required(request.refresh_token.as_deref(), "refresh_token")?;
    let requested = parse_scope(request.scope.as_deref());
    Ok(state.issuer.refresh(refresh_token, client, &requested)?)
}

/// Run a token request through every stage.
pub async fn process_token_request(
    state: &OAuth2State,
    credentials: Option<ClientCredentials>,
    request: &TokenRequest,
) -> Result<IssuedTokens, OAuth2Error> {
    let grant_type = parse_grant_type(request.grant_type.as_deref())?;
    let client = authenticate_client(state.clients.as_ref(), credentials.as_ref()).await?;
    ensure_grant_allowed(&client, grant_type)?;

    let tokens = match grant_type {
        GrantType::Password => password_grant(state, &client, request).await?,
        GrantType::RefreshToken => refresh_grant(state, &client, request)?,
    };
    info!(
        client_id = %client.client_id,
        grant_type = grant_type.as_str(),
        user = %tokens.access.subject(),
        scope = %format_scope(tokens.access.scopes()),
        "token granted"
    );
    Ok(tokens)
}
