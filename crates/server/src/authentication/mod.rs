//! Resource-owner authentication.
//!
//! The token endpoint only depends on the [`AuthenticationManager`] trait;
//! [`LdapAuthenticator`] is the production implementation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AuthenticationFailure;

pub mod ldap;

pub use ldap::{DirectoryUrl, LdapAuthenticator};

/// An authenticated resource owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    pub username: String,
    pub granted_authorities: BTreeSet<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>, authorities: impl IntoIterator<Item = String>) -> Self {
        Self {
            username: username.into(),
            granted_authorities: authorities.into_iter().collect(),
        }
    }
}

/// Verifies username/password pairs.
#[async_trait]
pub trait AuthenticationManager: Send + Sync {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal, AuthenticationFailure>;
}
