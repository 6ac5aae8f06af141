//! Static OAuth2 client registry.
//!
//! Clients are declared in configuration, their secrets hashed with bcrypt
//! once at startup, and the registry is read-only afterwards.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::ClientConfig;

/// Grant types this server can execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    Password,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Password => "password",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(GrantType::Password),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(format!("Unsupported grant type: {other}")),
        }
    }
}

/// A registered client.
#[derive(Clone, Debug)]
pub struct Client {
    pub client_id: String,
    pub client_secret_hash: String,
    pub allowed_scopes: BTreeSet<String>,
    pub allowed_grant_types: BTreeSet<GrantType>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
}

impl Client {
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant_type)
    }

    /// Verify a presented secret against the stored bcrypt hash.
    pub fn verify_secret(&self, presented: &str) -> bool {
        bcrypt::verify(presented, &self.client_secret_hash).unwrap_or(false)
    }
}

/// Lookup of registered clients.
pub trait ClientRegistry: Send + Sync {
    fn find(&self, client_id: &str) -> Option<&Client>;
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to hash secret for client '{client_id}': {source}")]
pub struct RegistryError {
    pub client_id: String,
    #[source]
    pub source: bcrypt::BcryptError,
}

/// Immutable in-memory registry.
#[derive(Clone, Debug, Default)]
pub struct InMemoryClientRegistry {
    clients: HashMap<String, Client>,
}

impl InMemoryClientRegistry {
    /// Build from configuration, hashing plaintext secrets.
    pub fn from_config(configs: &[ClientConfig]) -> Result<Self, RegistryError> {
        Self::from_config_with_cost(configs, bcrypt::DEFAULT_COST)
    }

    pub fn from_config_with_cost(
        configs: &[ClientConfig],
        cost: u32,
    ) -> Result<Self, RegistryError> {
        let mut clients = HashMap::with_capacity(configs.len());
        for cfg in configs {
            let client_secret_hash = match (&cfg.secret_hash, &cfg.secret) {
                (Some(hash), _) => hash.clone(),
                (None, Some(plain)) => {
                    bcrypt::hash(plain, cost).map_err(|source| RegistryError {
                        client_id: cfg.client_id.clone(),
                        source,
                    })?
                }
                // Rejected by config validation.
                (None, None) => String::new(),
            };
            let client = Client {
                client_id: cfg.client_id.clone(),
                client_secret_hash,
                allowed_scopes: cfg.scopes.iter().cloned().collect(),
                allowed_grant_types: cfg.grant_types.iter().copied().collect(),
                access_token_ttl_seconds: cfg.access_token_ttl_seconds,
                refresh_token_ttl_seconds: cfg.refresh_token_ttl_seconds,
            };
            tracing::debug!(
                client_id = %client.client_id,
                scopes = ?client.allowed_scopes,
                grant_types = ?client.allowed_grant_types,
                "registered client"
            );
            clients.insert(client.client_id.clone(), client);
        }
        Ok(Self { clients })
    }

    pub fn insert(&mut self, client: Client) {
        self.clients.insert(client.client_id.clone(), client);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl ClientRegistry for InMemoryClientRegistry {
    fn find(&self, client_id: &str) -> Option<&Client> {
        self.clients.get(client_id)
    }
}
