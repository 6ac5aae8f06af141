//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderValue, header};
use axum_test::TestServer;
use base64::Engine;
use oauth2_ldap_server::api::build_router;
use oauth2_ldap_server::authentication::{AuthenticationManager, Principal};
use oauth2_ldap_server::clients::{GrantType, InMemoryClientRegistry};
use oauth2_ldap_server::config::{ClientConfig, CorsConfig};
use oauth2_ldap_server::error::AuthenticationFailure;
use oauth2_ldap_server::oauth2::OAuth2State;
use oauth2_ldap_server::token::JwtTokenIssuer;

pub const SIGNING_KEY: &[u8] = b"integration-test-signing-key-0123456789";

/// In-memory stand-in for the LDAP directory.
#[derive(Default)]
pub struct StaticDirectory {
    users: HashMap<String, (String, Vec<String>)>,
}

impl StaticDirectory {
    pub fn with_user(mut self, username: &str, password: &str, authorities: &[&str]) -> Self {
        self.users.insert(
            username.to_string(),
            (
                password.to_string(),
                authorities.iter().map(|a| a.to_string()).collect(),
            ),
        );
        self
    }
}

#[async_trait]
impl AuthenticationManager for StaticDirectory {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal, AuthenticationFailure> {
        let (expected, authorities) = self
            .users
            .get(username)
            .ok_or(AuthenticationFailure::NoSuchUser)?;
        if expected != password {
            return Err(AuthenticationFailure::BadCredentials);
        }
        Ok(Principal::new(username, authorities.iter().cloned()))
    }
}

/// A directory that is never reachable.
pub struct DownDirectory;

#[async_trait]
impl AuthenticationManager for DownDirectory {
    async fn authenticate(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<Principal, AuthenticationFailure> {
        Err(AuthenticationFailure::DirectoryUnreachable(
            "connection refused".into(),
        ))
    }
}

pub fn client(id: &str, secret: &str, scopes: &[&str], grants: &[GrantType]) -> ClientConfig {
    ClientConfig {
        client_id: id.to_string(),
        secret: Some(secret.to_string()),
        secret_hash: None,
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        grant_types: grants.to_vec(),
        access_token_ttl_seconds: 3600,
        refresh_token_ttl_seconds: 86400 * 30,
    }
}

/// Clients used across the tests:
/// - `henry`: password and refresh, scopes read/write
/// - `mobile`: password and refresh, scope read
/// - `legacy`: password only, scope read
/// - `refresher`: refresh only, scope read
pub fn clients() -> Vec<ClientConfig> {
    use GrantType::{Password, RefreshToken};
    vec![
        client("henry", "secret", &["read", "write"], &[Password, RefreshToken]),
        client("mobile", "mobile-secret", &["read"], &[Password, RefreshToken]),
        client("legacy", "legacy-secret", &["read"], &[Password]),
        client("refresher", "refresher-secret", &["read"], &[RefreshToken]),
    ]
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::default()
        .with_user("henry", "secret", &["ROLE_DEVELOPERS"])
        .with_user("alice", "wonderland", &["ROLE_DEVELOPERS", "ROLE_MANAGERS"])
}

pub fn state_with(authenticator: Arc<dyn AuthenticationManager>) -> OAuth2State {
    let registry =
        InMemoryClientRegistry::from_config_with_cost(&clients(), 4).expect("build registry");
    OAuth2State::new(
        Arc::new(registry),
        authenticator,
        Arc::new(JwtTokenIssuer::hs256(SIGNING_KEY)),
    )
}

pub fn state() -> OAuth2State {
    state_with(Arc::new(directory()))
}

pub fn server_with(state: OAuth2State, cors: &CorsConfig) -> TestServer {
    TestServer::new(build_router(state, cors)).expect("create test server")
}

pub fn server() -> TestServer {
    server_with(state(), &CorsConfig::default())
}

pub fn basic(client_id: &str, secret: &str) -> HeaderValue {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{secret}"));
    HeaderValue::from_str(&format!("Basic {encoded}")).expect("valid header")
}

pub fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).expect("valid header")
}

/// Run a password grant for `henry` and return the response body.
pub async fn henry_tokens(server: &TestServer) -> serde_json::Value {
    let response = server
        .post("/oauth/token")
        .add_header(header::AUTHORIZATION, basic("henry", "secret"))
        .form(&[
            ("grant_type", "password"),
            ("username", "henry"),
            ("password", "secret"),
            ("scope", "read write"),
        ])
        .await;
    response.assert_status_ok();
    response.json::<serde_json::Value>()
}
