//! OAuth2 Authorization Server module.
//!
//! Issues JWT access tokens to registered clients on behalf of users
//! authenticated against the LDAP directory.
//!
//! ## Supported Flows
//!
//! - Resource Owner Password Credentials
//! - Refresh Token
//!
//! ## Endpoints
//!
//! - `POST /oauth/token` - Token endpoint
//! - `POST /oauth/check_token` - Token introspection
//! - `GET /oauth/token_key` - Verifier key

pub mod endpoints;
pub mod grant;
mod state;

pub use endpoints::router;
pub use grant::{ClientCredentials, TokenRequest, process_token_request};
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
