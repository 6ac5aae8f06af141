//! An OAuth2 authorization server backed by an LDAP directory.
//!
//! Registered clients exchange a user's directory credentials (password grant)
//! or a refresh token for a signed JWT access token. Group memberships found in
//! the directory become the token's authorities.

pub mod api;
pub mod authentication;
pub mod clients;
pub mod config;
pub mod error;
pub mod oauth2;
pub mod token;
