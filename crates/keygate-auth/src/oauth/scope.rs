//! Space-delimited OAuth scope sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::AuthError;

/// An ordered, de-duplicated set of scope tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Parses a space-delimited scope string.
    ///
    /// Scope tokens are printable ASCII without spaces, quotes or backslashes
    /// (RFC 6749 §3.3).
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let mut set = BTreeSet::new();
        for token in raw.split_whitespace() {
            let valid = token
                .bytes()
                .all(|b| matches!(b, 0x21 | 0x23..=0x5B | 0x5D..=0x7E));
            if !valid {
                return Err(AuthError::invalid_scope(format!(
                    "malformed scope token '{token}'"
                )));
            }
            set.insert(token.to_string());
        }
        Ok(Self(set))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    #[must_use]
    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Scopes in `self` that `allowed` does not contain.
    #[must_use]
    pub fn excess_over<'a>(&'a self, allowed: &'a ScopeSet) -> Vec<&'a str> {
        self.0
            .difference(&allowed.0)
            .map(String::as_str)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(" "))
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ScopeSet::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dedupes_and_sorts() {
        let scopes = ScopeSet::parse("profile openid  profile").unwrap();
        assert_eq!(scopes.to_string(), "openid profile");
        assert!(scopes.contains("openid"));
    }

    #[test]
    fn test_subset() {
        let allowed = ScopeSet::parse("openid profile offline_access").unwrap();
        let requested = ScopeSet::parse("openid profile").unwrap();
        let too_much = ScopeSet::parse("openid admin").unwrap();

        assert!(requested.is_subset(&allowed));
        assert!(!too_much.is_subset(&allowed));
        assert_eq!(too_much.excess_over(&allowed), vec!["admin"]);
    }

    #[test]
    fn test_rejects_malformed_token() {
        assert!(matches!(
            ScopeSet::parse("openid \"quoted\""),
            Err(AuthError::InvalidScope { .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let scopes = ScopeSet::parse("b a").unwrap();
        let json = serde_json::to_string(&scopes).unwrap();
        assert_eq!(json, "\"a b\"");
        let back: ScopeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scopes);
    }
}
