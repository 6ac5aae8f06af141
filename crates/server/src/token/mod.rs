//! Token issuance and validation.
//!
//! Tokens are self-contained JWTs: nothing is stored server-side, so a token
//! stays valid until it expires.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::authentication::Principal;
use crate::clients::Client;
use crate::error::TokenError;

pub mod jwt;
pub mod scope;

pub use jwt::JwtTokenIssuer;
pub use scope::{effective_scopes, format_scope, parse_scope};

/// Claims carried by every token this server signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_name: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub authorities: BTreeSet<String>,
    #[serde(default)]
    pub scope: BTreeSet<String>,
    pub client_id: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    /// Id of the access token a refresh token was minted with. Only present on refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ati: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenClaims {
    pub fn kind(&self) -> TokenKind {
        if self.ati.is_some() {
            TokenKind::Refresh
        } else {
            TokenKind::Access
        }
    }

    pub fn principal(&self) -> Principal {
        Principal {
            username: self.user_name.clone(),
            granted_authorities: self.authorities.clone(),
        }
    }
}

/// A signed token together with the claims it encodes.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub value: String,
    pub claims: TokenClaims,
}

impl SignedToken {
    pub fn kind(&self) -> TokenKind {
        self.claims.kind()
    }

    pub fn subject(&self) -> &str {
        &self.claims.user_name
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.claims.scope
    }

    pub fn issued_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.claims.iat).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.claims.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Whole seconds left before expiry, never negative.
    pub fn expires_in(&self, now: OffsetDateTime) -> i64 {
        (self.claims.exp - now.unix_timestamp()).max(0)
    }
}

/// Result of a successful grant.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access: SignedToken,
    /// Only issued to clients allowed the refresh_token grant.
    pub refresh: Option<SignedToken>,
}

/// Introspection result (RFC 7662 field names).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenInfo {
    pub active: bool,
    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(rename = "scope", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub scopes: BTreeSet<String>,
    /// Expiry as seconds since the epoch.
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub authorities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl TokenInfo {
    pub fn inactive() -> Self {
        Self::default()
    }
}

impl From<TokenClaims> for TokenInfo {
    fn from(claims: TokenClaims) -> Self {
        Self {
            active: true,
            subject: Some(claims.user_name),
            scopes: claims.scope,
            expires_at: Some(claims.exp),
            client_id: Some(claims.client_id),
            authorities: claims.authorities,
            jti: Some(claims.jti),
        }
    }
}

/// Public verifier key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenKey {
    pub alg: String,
    pub value: String,
}

/// Mints and validates tokens.
pub trait TokenIssuer: Send + Sync {
    /// Issue an access token (and a refresh token if the client may refresh).
    fn issue(
        &self,
        principal: &Principal,
        client: &Client,
        requested_scopes: &BTreeSet<String>,
    ) -> Result<IssuedTokens, TokenError>;

    /// Redeem a refresh token for a new access token. An empty scope set keeps the original scopes.
    fn refresh(
        &self,
        refresh_token: &str,
        client: &Client,
        requested_scopes: &BTreeSet<String>,
    ) -> Result<IssuedTokens, TokenError>;

    /// Claims of a valid, unexpired access token.
    fn verify_access_token(&self, token: &str) -> Result<TokenClaims, TokenError>;

    fn introspect(&self, token: &str) -> TokenInfo {
        match self.verify_access_token(token) {
            Ok(claims) => claims.into(),
            Err(_) => TokenInfo::inactive(),
        }
    }

    /// Verifier key, if it may be published.
    fn token_key(&self) -> Option<TokenKey>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_info_serializes_to_active_false_only() {
        let json = serde_json::to_value(TokenInfo::inactive()).unwrap();
        assert_eq!(json, serde_json::json!({ "active": false }));
    }

    #[test]
    fn active_info_uses_introspection_names() {
        let claims = TokenClaims {
            user_name: "henry".into(),
            authorities: ["ROLE_DEVELOPERS".to_string()].into(),
            scope: ["read".to_string(), "write".to_string()].into(),
            client_id: "henry".into(),
            jti: "abc".into(),
            iat: 100,
            exp: 3700,
            ati: None,
        };
        let json = serde_json::to_value(TokenInfo::from(claims)).unwrap();
        assert_eq!(json["active"], true);
        assert_eq!(json["sub"], "henry");
        assert_eq!(json["scope"], serde_json::json!(["read", "write"]));
        assert_eq!(json["exp"], 3700);
        assert_eq!(json["client_id"], "henry");
        assert_eq!(json["authorities"], serde_json::json!(["ROLE_DEVELOPERS"]));
    }

    #[test]
    fn refresh_claims_are_recognised_by_ati() {
        let mut claims = TokenClaims {
            user_name: "u".into(),
            authorities: BTreeSet::new(),
            scope: BTreeSet::new(),
            client_id: "c".into(),
            jti: "j".into(),
            iat: 0,
            exp: 1,
            ati: None,
        };
        assert_eq!(claims.kind(), TokenKind::Access);
        claims.ati = Some("j0".into());
        assert_eq!(claims.kind(), TokenKind::Refresh);
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["ati"], "j0");
        assert!(json.get("authorities").is_none());
    }
}
