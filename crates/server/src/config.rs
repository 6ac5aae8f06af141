use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;

use crate::clients::GrantType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Directory connection and lookup settings.
#[derive(Clone, Debug, Deserialize)]
pub struct LdapConfig {
    /// Directory URL including the base DN, e.g. `ldap://localhost:8389/dc=springframework,dc=org`.
    pub url: String,
    /// Patterns relative to the base DN; `{0}` is replaced by the username.
    #[serde(default = "default_user_dn_patterns")]
    pub user_dn_patterns: Vec<String>,
    /// Group search base relative to the base DN. Empty searches from the base DN itself.
    #[serde(default = "default_group_search_base")]
    pub group_search_base: String,
    /// `{0}` is the user's full DN, `{1}` the username.
    #[serde(default = "default_group_search_filter")]
    pub group_search_filter: String,
    #[serde(default = "default_group_role_attribute")]
    pub group_role_attribute: String,
    #[serde(default = "default_role_prefix")]
    pub role_prefix: String,
    #[serde(default = "default_password_attribute")]
    pub password_attribute: String,
    pub manager_dn: Option<String>,
    pub manager_password: Option<String>,
    #[serde(default = "default_ldap_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum SigningAlgorithm {
    #[default]
    HS256,
    RS256,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
    /// Shared secret for HS256, PEM private key for RS256.
    pub signing_key: String,
    /// PEM public key, required for RS256.
    pub verifier_key: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    /// Plaintext secret, hashed with bcrypt when the registry is built.
    pub secret: Option<String>,
    /// Pre-computed bcrypt hash of the secret.
    pub secret_hash: Option<String>,
    pub scopes: Vec<String>,
    pub grant_types: Vec<GrantType>,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_seconds: i64,
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_seconds: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CorsConfig {
    /// `*` reflects the request origin since credentials are allowed.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    pub ldap: LdapConfig,
    pub jwt: JwtConfig,
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_user_dn_patterns() -> Vec<String> {
    vec!["uid={0},ou=people".to_string()]
}

fn default_group_search_base() -> String {
    "ou=groups".to_string()
}

fn default_group_search_filter() -> String {
    "(uniqueMember={0})".to_string()
}

fn default_group_role_attribute() -> String {
    "cn".to_string()
}

fn default_role_prefix() -> String {
    "ROLE_".to_string()
}

fn default_password_attribute() -> String {
    "userPassword".to_string()
}

fn default_ldap_timeout_secs() -> u64 {
    5
}

fn default_access_token_ttl() -> i64 {
    3600
}

fn default_refresh_token_ttl() -> i64 {
    86400 * 30
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Minimum HS256 secret length in bytes.
pub const MIN_SHARED_SECRET_LEN: usize = 32;

/// Longest accepted token lifetime: ten years.
pub const MAX_TOKEN_TTL_SECONDS: i64 = 10 * 365 * 86400;

impl AppConfig {
    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ldap.validate()?;
        self.jwt.validate()?;

        if self.clients.is_empty() {
            return Err(ConfigError::Validation(
                "at least one client must be registered".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for client in &self.clients {
            client.validate()?;
            if !seen.insert(client.client_id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate client_id '{}'",
                    client.client_id
                )));
            }
        }

        for origin in &self.cors.allowed_origins {
            if origin != "*" && axum::http::HeaderValue::from_str(origin).is_err() {
                return Err(ConfigError::Validation(format!(
                    "cors.allowed_origins contains an invalid origin '{origin}'"
                )));
            }
        }
        Ok(())
    }
}

impl LdapConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        crate::authentication::DirectoryUrl::parse(&self.url)
            .map_err(|e| ConfigError::Validation(format!("ldap.url: {e}")))?;
        if self.user_dn_patterns.is_empty() {
            return Err(ConfigError::Validation(
                "ldap.user_dn_patterns must not be empty".into(),
            ));
        }
        if let Some(p) = self.user_dn_patterns.iter().find(|p| !p.contains("{0}")) {
            return Err(ConfigError::Validation(format!(
                "ldap.user_dn_patterns entry '{p}' has no {{0}} placeholder"
            )));
        }
        if self.password_attribute.is_empty() {
            return Err(ConfigError::Validation(
                "ldap.password_attribute must not be empty".into(),
            ));
        }
        if self.manager_dn.is_some() != self.manager_password.is_some() {
            return Err(ConfigError::Validation(
                "ldap.manager_dn and ldap.manager_password must be set together".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation("ldap.timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

impl JwtConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.algorithm {
            SigningAlgorithm::HS256 => {
                if self.signing_key.len() < MIN_SHARED_SECRET_LEN {
                    return Err(ConfigError::Validation(format!(
                        "jwt.signing_key must be at least {MIN_SHARED_SECRET_LEN} bytes for HS256"
                    )));
                }
            }
            SigningAlgorithm::RS256 => {
                if self.verifier_key.is_none() {
                    return Err(ConfigError::Validation(
                        "jwt.verifier_key is required for RS256".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let id = &self.client_id;
        if id.is_empty() {
            return Err(ConfigError::Validation("client_id must not be empty".into()));
        }
        if self.secret.is_some() == self.secret_hash.is_some() {
            return Err(ConfigError::Validation(format!(
                "client '{id}' needs exactly one of secret or secret_hash"
            )));
        }
        if self.scopes.is_empty() || self.scopes.iter().any(|s| s.is_empty() || s.contains(' ')) {
            return Err(ConfigError::Validation(format!(
                "client '{id}' needs non-empty scopes without spaces"
            )));
        }
        if self.grant_types.is_empty() {
            return Err(ConfigError::Validation(format!(
                "client '{id}' needs at least one grant type"
            )));
        }
        let ttls = [self.access_token_ttl_seconds, self.refresh_token_ttl_seconds];
        if ttls.iter().any(|ttl| !(1..=MAX_TOKEN_TTL_SECONDS).contains(ttl)) {
            return Err(ConfigError::Validation(format!(
                "client '{id}' token lifetimes must be between 1 and {MAX_TOKEN_TTL_SECONDS} seconds"
            )));
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `LDAP__URL`, `JWT__SIGNING_KEY`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
