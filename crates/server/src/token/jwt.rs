//! JWT implementation of [`TokenIssuer`].

use std::collections::{BTreeSet, HashSet};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::authentication::Principal;
use crate::clients::{Client, GrantType};
use crate::config::{ConfigError, JwtConfig, SigningAlgorithm};
use crate::error::TokenError;
use crate::token::{
    IssuedTokens, SignedToken, TokenClaims, TokenIssuer, TokenKey, TokenKind, effective_scopes,
    format_scope,
};

/// Expiry timestamp `ttl_seconds` after `now`.
fn expiry(now: OffsetDateTime, ttl_seconds: i64) -> Result<i64, TokenError> {
    now.checked_add(Duration::seconds(ttl_seconds))
        .map(OffsetDateTime::unix_timestamp)
        .ok_or_else(|| TokenError::Lifetime(ttl_seconds))
}

/// Signs tokens with a single key loaded at startup.
pub struct JwtTokenIssuer {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    /// PEM verifier key, only for asymmetric algorithms.
    public_key: Option<String>,
}

impl std::fmt::Debug for JwtTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenIssuer")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl JwtTokenIssuer {
    pub fn from_config(config: &JwtConfig) -> Result<Self, ConfigError> {
        match config.algorithm {
            SigningAlgorithm::HS256 => Ok(Self::hs256(config.signing_key.as_bytes())),
            SigningAlgorithm::RS256 => {
                let public = config.verifier_key.as_deref().ok_or_else(|| {
                    ConfigError::Validation("jwt.verifier_key is required for RS256".into())
                })?;
                Self::rs256(&config.signing_key, public)
            }
        }
    }

    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            public_key: None,
        }
    }

    pub fn rs256(private_pem: &str, public_pem: &str) -> Result<Self, ConfigError> {
        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| ConfigError::Validation(format!("jwt.signing_key: {e}")))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| ConfigError::Validation(format!("jwt.verifier_key: {e}")))?;
        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding,
            decoding,
            public_key: Some(public_pem.trim().to_string()),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        // Expiry is compared against our own clock in `check_expiry`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);
        validation
    }

    fn sign(&self, claims: TokenClaims) -> Result<SignedToken, TokenError> {
        let value = encode(&Header::new(self.algorithm), &claims, &self.encoding)?;
        Ok(SignedToken { value, claims })
    }

    /// Verify the signature and return the claims, ignoring expiry.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| TokenError::InvalidToken(format!("Cannot decode token: {e}")))
    }

    fn mint(
        &self,
        principal: &Principal,
        client: &Client,
        scopes: BTreeSet<String>,
        now: OffsetDateTime,
    ) -> Result<SignedToken, TokenError> {
        self.sign(TokenClaims {
            user_name: principal.username.clone(),
            authorities: principal.granted_authorities.clone(),
            scope: scopes,
            client_id: client.client_id.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.unix_timestamp(),
            exp: expiry(now, client.access_token_ttl_seconds)?,
            ati: None,
        })
    }

    fn mint_refresh(
        &self,
        access: &SignedToken,
        client: &Client,
        now: OffsetDateTime,
    ) -> Result<SignedToken, TokenError> {
        self.sign(TokenClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            exp: expiry(now, client.refresh_token_ttl_seconds)?,
            ati: Some(access.claims.jti.clone()),
            ..access.claims.clone()
        })
    }

    pub fn issue_at(
        &self,
        principal: &Principal,
        client: &Client,
        requested_scopes: &BTreeSet<String>,
        now: OffsetDateTime,
    ) -> Result<IssuedTokens, TokenError> {
        let scopes = effective_scopes(requested_scopes, &client.allowed_scopes)?;
        let access = self.mint(principal, client, scopes, now)?;
        let refresh = if client.allows_grant(GrantType::RefreshToken) {
            Some(self.mint_refresh(&access, client, now)?)
        } else {
            None
        };
        debug!(
            client_id = %client.client_id,
            user = %principal.username,
            scope = %format_scope(access.scopes()),
            jti = %access.claims.jti,
            "issued access token"
        );
        Ok(IssuedTokens { access, refresh })
    }

    pub fn refresh_at(
        &self,
        refresh_token: &str,
        client: &Client,
        requested_scopes: &BTreeSet<String>,
        now: OffsetDateTime,
    ) -> Result<IssuedTokens, TokenError> {
        let claims = self
            .decode(refresh_token)
            .map_err(|_| TokenError::InvalidGrant("Invalid refresh token".into()))?;
        if claims.kind() != TokenKind::Refresh {
            return Err(TokenError::InvalidGrant(
                "Encoded token is not a refresh token".into(),
            ));
        }
        if claims.exp <= now.unix_timestamp() {
            return Err(TokenError::InvalidGrant(
                "Invalid refresh token (expired)".into(),
            ));
        }
        if claims.client_id != client.client_id {
            return Err(TokenError::InvalidGrant(
                "Wrong client for this refresh token".into(),
            ));
        }

        let scopes = if requested_scopes.is_empty() {
            claims.scope.clone()
        } else if requested_scopes.is_subset(&claims.scope) {
            requested_scopes.clone()
        } else {
            return Err(TokenError::InvalidScope(format!(
                "Unable to narrow the scope of the client authentication to {}",
                format_scope(requested_scopes)
            )));
        };

        let access = self.mint(&claims.principal(), client, scopes, now)?;
        debug!(
            client_id = %client.client_id,
            user = %claims.user_name,
            jti = %access.claims.jti,
            "refreshed access token"
        );
        Ok(IssuedTokens {
            access,
            refresh: Some(SignedToken {
                value: refresh_token.to_string(),
                claims,
            }),
        })
    }

    pub fn verify_access_token_at(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<TokenClaims, TokenError> {
        let claims = self.decode(token)?;
        if claims.kind() == TokenKind::Refresh {
            return Err(TokenError::InvalidToken(
                "Encoded token is a refresh token".into(),
            ));
        }
        if claims.exp <= now.unix_timestamp() {
            return Err(TokenError::InvalidToken("Token has expired".into()));
        }
        Ok(claims)
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(
        &self,
        principal: &Principal,
        client: &Client,
        requested_scopes: &BTreeSet<String>,
    ) -> Result<IssuedTokens, TokenError> {
        self.issue_at(principal, client, requested_scopes, OffsetDateTime::now_utc())
    }

    fn refresh(
        &self,
        refresh_token: &str,
        client: &Client,
        requested_scopes: &BTreeSet<String>,
    ) -> Result<IssuedTokens, TokenError> {
        self.refresh_at(
            refresh_token,
            client,
            requested_scopes,
            OffsetDateTime::now_utc(),
        )
    }

    fn verify_access_token(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_access_token_at(token, OffsetDateTime::now_utc())
    }

    fn token_key(&self) -> Option<TokenKey> {
        self.public_key.as_ref().map(|value| TokenKey {
            alg: "SHA256withRSA".to_string(),
            value: value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn client(id: &str, grants: &[GrantType]) -> Client {
        Client {
            client_id: id.to_string(),
            client_secret_hash: String::new(),
            allowed_scopes: ["read".to_string(), "write".to_string()].into(),
            allowed_grant_types: grants.iter().copied().collect(),
            access_token_ttl_seconds: 3600,
            refresh_token_ttl_seconds: 7200,
        }
    }

    fn henry() -> Client {
        client("henry", &[GrantType::Password, GrantType::RefreshToken])
    }

    fn principal() -> Principal {
        Principal::new("ben", ["ROLE_DEVELOPERS".to_string()])
    }

    fn scopes(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn issue_then_introspect_round_trips() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let tokens = issuer
            .issue(&principal(), &henry(), &scopes(&["read"]))
            .unwrap();
        let info = issuer.introspect(&tokens.access.value);
        assert!(info.active);
        assert_eq!(info.subject.as_deref(), Some("ben"));
        assert_eq!(info.scopes, scopes(&["read"]));
        assert_eq!(info.client_id.as_deref(), Some("henry"));
        assert!(info.authorities.contains("ROLE_DEVELOPERS"));
        assert_eq!(info.expires_at, Some(tokens.access.claims.exp));
    }

    #[test]
    fn access_token_lifetime_follows_client() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let at = now();
        let tokens = issuer
            .issue_at(&principal(), &henry(), &BTreeSet::new(), at)
            .unwrap();
        assert_eq!(tokens.access.expires_in(at), 3600);
        assert_eq!(tokens.access.scopes(), &scopes(&["read", "write"]));
        let refresh = tokens.refresh.expect("refresh token issued");
        assert_eq!(refresh.claims.exp - at.unix_timestamp(), 7200);
        assert_eq!(refresh.claims.ati.as_deref(), Some(tokens.access.claims.jti.as_str()));
    }

    #[test]
    fn out_of_range_lifetime_is_an_error() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let mut long_lived = henry();
        long_lived.refresh_token_ttl_seconds = i64::MAX / 2;
        assert!(matches!(
            issuer.issue(&principal(), &long_lived, &BTreeSet::new()),
            Err(TokenError::Lifetime(_))
        ));

        let mut long_lived = henry();
        long_lived.access_token_ttl_seconds = i64::MAX;
        assert!(matches!(
            issuer.issue(&principal(), &long_lived, &BTreeSet::new()),
            Err(TokenError::Lifetime(_))
        ));
    }

    #[test]
    fn no_refresh_token_without_refresh_grant() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let password_only = client("henry", &[GrantType::Password]);
        let tokens = issuer
            .issue(&principal(), &password_only, &BTreeSet::new())
            .unwrap();
        assert!(tokens.refresh.is_none());
    }

    #[test]
    fn expired_access_token_is_inactive() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let issued = now() - Duration::hours(2);
        let tokens = issuer
            .issue_at(&principal(), &henry(), &BTreeSet::new(), issued)
            .unwrap();
        assert!(!issuer.introspect(&tokens.access.value).active);
        let exp = tokens.access.expires_at();
        assert!(issuer.verify_access_token_at(&tokens.access.value, exp - Duration::seconds(1)).is_ok());
        assert!(issuer.verify_access_token_at(&tokens.access.value, exp).is_err());
    }

    #[test]
    fn foreign_signature_is_inactive() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let other = JwtTokenIssuer::hs256(b"ffffffffffffffffffffffffffffffff");
        let tokens = other.issue(&principal(), &henry(), &BTreeSet::new()).unwrap();
        assert!(!issuer.introspect(&tokens.access.value).active);
        assert!(!issuer.introspect("not-a-jwt").active);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let tokens = issuer.issue(&principal(), &henry(), &BTreeSet::new()).unwrap();
        let refresh = tokens.refresh.unwrap();
        assert!(!issuer.introspect(&refresh.value).active);
        assert!(matches!(
            issuer.refresh(&tokens.access.value, &henry(), &BTreeSet::new()),
            Err(TokenError::InvalidGrant(_))
        ));
    }

    #[test]
    fn refresh_keeps_subject_and_scopes() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let tokens = issuer
            .issue(&principal(), &henry(), &scopes(&["read"]))
            .unwrap();
        let refresh = tokens.refresh.unwrap();
        let refreshed = issuer.refresh(&refresh.value, &henry(), &BTreeSet::new()).unwrap();
        assert_ne!(refreshed.access.value, tokens.access.value);
        assert_eq!(refreshed.access.subject(), "ben");
        assert_eq!(refreshed.access.scopes(), &scopes(&["read"]));
        assert_eq!(refreshed.refresh.unwrap().value, refresh.value);
        assert!(issuer.introspect(&refreshed.access.value).active);
    }

    #[test]
    fn refresh_may_only_narrow_scope() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let refresh = issuer
            .issue(&principal(), &henry(), &BTreeSet::new())
            .unwrap()
            .refresh
            .unwrap();
        let narrowed = issuer.refresh(&refresh.value, &henry(), &scopes(&["write"])).unwrap();
        assert_eq!(narrowed.access.scopes(), &scopes(&["write"]));

        let refresh = issuer
            .issue(&principal(), &henry(), &scopes(&["read"]))
            .unwrap()
            .refresh
            .unwrap();
        assert!(matches!(
            issuer.refresh(&refresh.value, &henry(), &scopes(&["read", "write"])),
            Err(TokenError::InvalidScope(_))
        ));
    }

    #[test]
    fn refresh_rejected_for_other_client() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let refresh = issuer
            .issue(&principal(), &henry(), &BTreeSet::new())
            .unwrap()
            .refresh
            .unwrap();
        let other = client("other", &[GrantType::Password, GrantType::RefreshToken]);
        let err = issuer.refresh(&refresh.value, &other, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, TokenError::InvalidGrant(ref d) if d.contains("Wrong client")));
    }

    #[test]
    fn expired_refresh_token_rejected() {
        let issuer = JwtTokenIssuer::hs256(SECRET);
        let refresh = issuer
            .issue_at(&principal(), &henry(), &BTreeSet::new(), now() - Duration::hours(3))
            .unwrap()
            .refresh
            .unwrap();
        assert!(matches!(
            issuer.refresh(&refresh.value, &henry(), &BTreeSet::new()),
            Err(TokenError::InvalidGrant(_))
        ));
    }

    #[test]
    fn shared_secret_is_never_published() {
        assert!(JwtTokenIssuer::hs256(SECRET).token_key().is_none());
    }

    #[test]
    fn rs256_round_trip_and_key_publication() {
        let issuer = JwtTokenIssuer::rs256(
            include_str!("../../tests/fixtures/rsa_private.pem"),
            include_str!("../../tests/fixtures/rsa_public.pem"),
        )
        .expect("valid key pair");
        let tokens = issuer.issue(&principal(), &henry(), &BTreeSet::new()).unwrap();
        assert!(issuer.introspect(&tokens.access.value).active);
        let key = issuer.token_key().expect("public key published");
        assert!(key.value.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(!JwtTokenIssuer::hs256(SECRET).introspect(&tokens.access.value).active);
    }
}
