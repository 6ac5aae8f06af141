//! LDAP-backed authentication.
//!
//! The user entry is located through DN patterns, its password attribute is
//! read and compared locally against the presented password with bcrypt.
//! Authorities come from the groups listing the user's DN as a member.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchResult};
use tracing::{debug, warn};

use crate::authentication::{AuthenticationManager, Principal};
use crate::config::{ConfigError, LdapConfig};
use crate::error::AuthenticationFailure;

/// LDAP result code for a missing entry.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Server address and base DN parsed from an `ldap://host:port/base` URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryUrl {
    pub server: String,
    pub base_dn: String,
}

impl DirectoryUrl {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let url = url::Url::parse(raw).map_err(|e| format!("invalid URL '{raw}': {e}"))?;
        let scheme = url.scheme();
        if scheme != "ldap" && scheme != "ldaps" {
            return Err(format!("unsupported scheme '{scheme}'"));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("missing host in '{raw}'"))?;
        let server = match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        };
        let base_dn = urlencoding::decode(url.path().trim_start_matches('/'))
            .map_err(|e| format!("invalid base DN encoding: {e}"))?
            .into_owned();
        Ok(Self { server, base_dn })
    }
}

/// Replace `{0}`, `{1}`, ... in a single pass so substituted values are never re-expanded.
fn substitute(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let index: usize = after[..end].parse().ok()?;
            Some((args.get(index)?, end))
        });
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn join_dn(relative: &str, base: &str) -> String {
    match (relative.is_empty(), base.is_empty()) {
        (_, true) => relative.to_string(),
        (true, false) => base.to_string(),
        (false, false) => format!("{relative},{base}"),
    }
}

/// Strip an optional `{bcrypt}` storage-scheme prefix.
fn strip_scheme(stored: &str) -> &str {
    if let Some(rest) = stored.strip_prefix('{')
        && let Some((scheme, hash)) = rest.split_once('}')
        && scheme.eq_ignore_ascii_case("bcrypt")
    {
        return hash;
    }
    stored
}

/// Compare a presented password with a stored bcrypt hash.
pub fn password_matches(presented: &str, stored: &str) -> bool {
    bcrypt::verify(presented, strip_scheme(stored)).unwrap_or(false)
}

fn attribute_values(entry: &SearchEntry, name: &str) -> Vec<String> {
    let text = entry
        .attrs
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .flat_map(|(_, v)| v.iter().cloned());
    let binary = entry
        .bin_attrs
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .flat_map(|(_, v)| v.iter().filter_map(|b| String::from_utf8(b.clone()).ok()));
    text.chain(binary).collect()
}

/// Whether a search result code means the searched base exists.
fn entry_exists(rc: u32, context: &str) -> Result<bool, AuthenticationFailure> {
    match rc {
        0 => Ok(true),
        RC_NO_SUCH_OBJECT => Ok(false),
        rc => Err(AuthenticationFailure::DirectoryUnreachable(format!(
            "{context} returned result code {rc}"
        ))),
    }
}

fn unreachable(context: &str, e: impl std::fmt::Display) -> AuthenticationFailure {
    AuthenticationFailure::DirectoryUnreachable(format!("{context}: {e}"))
}

/// What the directory knows about a user.
#[derive(Debug)]
struct UserEntry {
    dn: String,
    password_hash: Option<String>,
    authorities: BTreeSet<String>,
}

/// Authentication manager backed by an LDAP directory.
#[derive(Clone, Debug)]
pub struct LdapAuthenticator {
    server: String,
    base_dn: String,
    user_dn_patterns: Vec<String>,
    group_search_base: String,
    group_search_filter: String,
    group_role_attribute: String,
    role_prefix: String,
    password_attribute: String,
    manager: Option<(String, String)>,
    timeout: Duration,
}

impl LdapAuthenticator {
    pub fn new(config: &LdapConfig) -> Result<Self, ConfigError> {
        let url = DirectoryUrl::parse(&config.url)
            .map_err(|e| ConfigError::Validation(format!("ldap.url: {e}")))?;
        let group_search_base = join_dn(&config.group_search_base, &url.base_dn);
        Ok(Self {
            server: url.server,
            base_dn: url.base_dn,
            user_dn_patterns: config.user_dn_patterns.clone(),
            group_search_base,
            group_search_filter: config.group_search_filter.clone(),
            group_role_attribute: config.group_role_attribute.clone(),
            role_prefix: config.role_prefix.clone(),
            password_attribute: config.password_attribute.clone(),
            manager: config
                .manager_dn
                .clone()
                .zip(config.manager_password.clone()),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Full DN for a username under one pattern.
    pub fn user_dn(&self, pattern: &str, username: &str) -> String {
        let escaped = ldap3::dn_escape(username);
        join_dn(&substitute(pattern, &[escaped.as_ref()]), &self.base_dn)
    }

    pub fn group_filter(&self, user_dn: &str, username: &str) -> String {
        let dn = ldap3::ldap_escape(user_dn);
        let name = ldap3::ldap_escape(username);
        substitute(&self.group_search_filter, &[dn.as_ref(), name.as_ref()])
    }

    pub fn authority_for_role(&self, role: &str) -> String {
        format!("{}{}", self.role_prefix, role.to_uppercase())
    }

    async fn connect(&self) -> Result<Ldap, AuthenticationFailure> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.server)
            .await
            .map_err(|e| unreachable(&format!("LDAP connect to {} failed", self.server), e))?;

        ldap3::drive!(conn);

        if let Some((dn, password)) = &self.manager {
            ldap.simple_bind(dn, password)
                .await
                .map_err(|e| unreachable("LDAP manager bind failed", e))?
                .success()
                .map_err(|e| unreachable("LDAP manager bind rejected", e))?;
        }
        Ok(ldap)
    }

    async fn find_user(
        &self,
        ldap: &mut Ldap,
        username: &str,
    ) -> Result<(String, Option<String>), AuthenticationFailure> {
        for pattern in &self.user_dn_patterns {
            let dn = self.user_dn(pattern, username);
            let SearchResult(entries, result) = ldap
                .search(
                    &dn,
                    Scope::Base,
                    "(objectClass=*)",
                    vec![self.password_attribute.as_str()],
                )
                .await
                .map_err(|e| unreachable("LDAP user lookup failed", e))?;

            let entries = entries.into_iter().map(SearchEntry::construct).collect();
            if let Some(hash) = self.password_from_search(&dn, result.rc, entries)? {
                debug!(%dn, "located directory entry");
                return Ok((dn, hash));
            }
        }
        Err(AuthenticationFailure::NoSuchUser)
    }

    /// Stored password of the entry a base search at `dn` returned.
    ///
    /// `Ok(None)` means nothing lives at `dn` and the next pattern should be tried;
    /// `Ok(Some(None))` is an entry without a password attribute.
    fn password_from_search(
        &self,
        dn: &str,
        rc: u32,
        entries: Vec<SearchEntry>,
    ) -> Result<Option<Option<String>>, AuthenticationFailure> {
        if !entry_exists(rc, &format!("LDAP user lookup for {dn}"))? {
            return Ok(None);
        }
        Ok(entries.into_iter().next().map(|entry| {
            attribute_values(&entry, &self.password_attribute)
                .into_iter()
                .next()
        }))
    }

    async fn load_authorities(
        &self,
        ldap: &mut Ldap,
        user_dn: &str,
        username: &str,
    ) -> Result<BTreeSet<String>, AuthenticationFailure> {
        let filter = self.group_filter(user_dn, username);
        let SearchResult(entries, result) = ldap
            .search(
                &self.group_search_base,
                Scope::Subtree,
                &filter,
                vec![self.group_role_attribute.as_str()],
            )
            .await
            .map_err(|e| unreachable("LDAP group search failed", e))?;

        let entries = entries.into_iter().map(SearchEntry::construct).collect();
        self.authorities_from_search(result.rc, entries)
    }

    /// Authorities from a group search; a missing group base grants none.
    fn authorities_from_search(
        &self,
        rc: u32,
        entries: Vec<SearchEntry>,
    ) -> Result<BTreeSet<String>, AuthenticationFailure> {
        if !entry_exists(rc, "LDAP group search")? {
            return Ok(BTreeSet::new());
        }
        Ok(entries
            .iter()
            .flat_map(|entry| attribute_values(entry, &self.group_role_attribute))
            .map(|role| self.authority_for_role(&role))
            .collect())
    }

    async fn lookup(&self, username: &str) -> Result<UserEntry, AuthenticationFailure> {
        let mut ldap = self.connect().await?;
        let outcome = async {
            let (dn, password_hash) = self.find_user(&mut ldap, username).await?;
            let authorities = self.load_authorities(&mut ldap, &dn, username).await?;
            Ok::<_, AuthenticationFailure>(UserEntry {
                dn,
                password_hash,
                authorities,
            })
        }
        .await;
        ldap.unbind().await.ok();
        outcome
    }
}

#[async_trait]
impl AuthenticationManager for LdapAuthenticator {
    #[tracing::instrument(skip(self, password), fields(server = %self.server))]
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal, AuthenticationFailure> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthenticationFailure::BadCredentials);
        }

        let entry = match tokio::time::timeout(self.timeout, self.lookup(username)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AuthenticationFailure::DirectoryUnreachable(format!(
                    "directory did not answer within {:?}",
                    self.timeout
                )));
            }
        };

        let Some(stored) = entry.password_hash else {
            warn!(dn = %entry.dn, attribute = %self.password_attribute, "entry has no password attribute");
            return Err(AuthenticationFailure::BadCredentials);
        };

        let presented = password.to_owned();
        let matches = tokio::task::spawn_blocking(move || password_matches(&presented, &stored))
            .await
            .unwrap_or(false);
        if !matches {
            warn!(dn = %entry.dn, "password comparison failed");
            return Err(AuthenticationFailure::BadCredentials);
        }

        debug!(dn = %entry.dn, authorities = ?entry.authorities, "authenticated");
        Ok(Principal {
            username: username.to_string(),
            granted_authorities: entry.authorities,
        })
    }
}
