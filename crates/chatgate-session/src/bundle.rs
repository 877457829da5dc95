use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use chatgate_common::unix_now;

/// The cached result of one browser login: cookies plus optional token plus
/// expiry. Created by the acquirer, owned on disk by the store, borrowed
/// read-only by adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBundle {
    pub provider_id: String,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Provider-specific fields, e.g. the raw Qwen token and the cookie value
    /// that get compressed together at send time.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    /// Seconds since epoch.
    pub created_at: i64,
    pub expires_at: i64,
}

impl SessionBundle {
    pub fn new(provider_id: impl Into<String>, ttl_secs: u64) -> Self {
        let created_at = unix_now();
        Self {
            provider_id: provider_id.into(),
            cookies: BTreeMap::new(),
            bearer_token: None,
            extra: BTreeMap::new(),
            created_at,
            expires_at: created_at + ttl_secs as i64,
        }
    }

    /// Bundle for an operator-pasted static token; no cookies, no browser.
    pub fn from_static_token(provider_id: impl Into<String>, token: &str, ttl_secs: u64) -> Self {
        let mut bundle = Self::new(provider_id, ttl_secs);
        bundle.bearer_token = Some(token.to_string());
        bundle
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Structural invariant check applied after every deserialization; a
    /// violating file is treated the same as a missing one.
    pub fn is_well_formed(&self) -> bool {
        !self.provider_id.is_empty() && self.expires_at > self.created_at
    }

    /// `Cookie` header value in stored order.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn has_cookies(&self) -> bool {
        !self.cookies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bundle_is_not_expired() {
        let bundle = SessionBundle::new("glm", 3600);
        assert!(!bundle.is_expired(unix_now()));
        assert!(bundle.is_well_formed());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let bundle = SessionBundle::new("glm", 10);
        assert!(bundle.is_expired(bundle.expires_at));
        assert!(!bundle.is_expired(bundle.expires_at - 1));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let mut bundle = SessionBundle::new("k2", 60);
        bundle.cookies.insert("a".to_string(), "1".to_string());
        bundle.cookies.insert("b".to_string(), "2".to_string());
        assert_eq!(bundle.cookie_header(), "a=1; b=2");
    }

    #[test]
    fn inverted_expiry_is_malformed() {
        let mut bundle = SessionBundle::new("qwen", 60);
        bundle.expires_at = bundle.created_at;
        assert!(!bundle.is_well_formed());
    }
}
