use std::collections::BTreeSet;

use crate::error::TokenError;

/// Split a space-delimited `scope` parameter.
pub fn parse_scope(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn format_scope(scopes: &BTreeSet<String>) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

/// Scopes granted for a request against a client's allowed set.
///
/// An empty request gets everything the client may have. Otherwise every
/// requested scope must be allowed; nothing is silently dropped.
pub fn effective_scopes(
    requested: &BTreeSet<String>,
    allowed: &BTreeSet<String>,
) -> Result<BTreeSet<String>, TokenError> {
    if requested.is_empty() {
        return Ok(allowed.clone());
    }
    let rejected: BTreeSet<String> = requested.difference(allowed).cloned().collect();
    if !rejected.is_empty() {
        return Err(TokenError::InvalidScope(format!(
            "Invalid scope: {}",
            format_scope(&rejected)
        )));
    }
    Ok(requested.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_splits_on_any_whitespace() {
        assert_eq!(parse_scope(Some("read  write\tread")), set(&["read", "write"]));
        assert!(parse_scope(Some("   ")).is_empty());
        assert!(parse_scope(None).is_empty());
    }

    #[test]
    fn empty_request_defaults_to_allowed() {
        let allowed = set(&["read", "write"]);
        assert_eq!(effective_scopes(&set(&[]), &allowed).unwrap(), allowed);
    }

    #[test]
    fn allowed_subset_is_granted_as_requested() {
        let allowed = set(&["read", "write"]);
        assert_eq!(
            effective_scopes(&set(&["read"]), &allowed).unwrap(),
            set(&["read"])
        );
    }

    #[test]
    fn partially_allowed_request_is_invalid_scope() {
        let allowed = set(&["read", "write"]);
        let err = effective_scopes(&set(&["read", "admin"]), &allowed).unwrap_err();
        assert!(matches!(err, TokenError::InvalidScope(ref d) if d == "Invalid scope: admin"));
    }

    #[test]
    fn disjoint_request_is_invalid_scope() {
        let allowed = set(&["read", "write"]);
        let err = effective_scopes(&set(&["admin"]), &allowed).unwrap_err();
        assert!(matches!(err, TokenError::InvalidScope(ref d) if d.contains("admin")));
    }

    #[test]
    fn format_is_sorted_and_space_separated() {
        assert_eq!(format_scope(&set(&["write", "read"])), "read write");
        assert_eq!(format_scope(&set(&[])), "");
    }
}
