//! OAuth2 state management.
//!
//! Holds the capabilities the authorization server endpoints depend on. Each
//! is immutable after startup and shared behind an `Arc`.

use std::sync::Arc;

use crate::authentication::{AuthenticationManager, LdapAuthenticator};
use crate::clients::{ClientRegistry, InMemoryClientRegistry};
use crate::config::AppConfig;
use crate::token::{JwtTokenIssuer, TokenIssuer};

#[derive(Clone)]
pub struct OAuth2State {
    pub clients: Arc<dyn ClientRegistry>,
    pub authenticator: Arc<dyn AuthenticationManager>,
    pub issuer: Arc<dyn TokenIssuer>,
}

impl OAuth2State {
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        authenticator: Arc<dyn AuthenticationManager>,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            clients,
            authenticator,
            issuer,
        }
    }

    /// Wire the production implementations from validated configuration.
    pub fn from_config(config: &AppConfig) -> color_eyre::Result<Self> {
        let clients = InMemoryClientRegistry::from_config(&config.clients)?;
        let authenticator = LdapAuthenticator::new(&config.ldap)?;
        let issuer = JwtTokenIssuer::from_config(&config.jwt)?;
        tracing::info!(
            clients = clients.len(),
            directory = %config.ldap.url,
            algorithm = ?config.jwt.algorithm,
            "authorization server configured"
        );
        Ok(Self::new(
            Arc::new(clients),
            Arc::new(authenticator),
            Arc::new(issuer),
        ))
    }
}
