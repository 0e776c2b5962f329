use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::identity::Identity;
use super::scope::Scope;

/// Namespace a token string lives in.
///
/// The same string may be associated once per kind; the kinds never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessCode,
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    pub const ALL: [TokenKind; 3] = [
        TokenKind::AccessCode,
        TokenKind::AccessToken,
        TokenKind::RefreshToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::AccessCode => "access_code",
            TokenKind::AccessToken => "access_token",
            TokenKind::RefreshToken => "refresh_token",
        }
    }

    /// Lifetime used by [`GrantContext::issued`].
    pub fn default_lifetime(&self) -> Duration {
        match self {
            TokenKind::AccessCode => Duration::minutes(10),
            TokenKind::AccessToken => Duration::seconds(3600),
            TokenKind::RefreshToken => Duration::seconds(2_592_000), // 30 days
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata bound to a token when it is associated.
///
/// The named fields are the ones every backend understands; `extensions` carries
/// anything else an orchestrator wants to keep with the grant (redirect URI used
/// for a code, PKCE challenge, ...). A context is replaced wholesale, never
/// edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantContext {
    pub client: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_owner: Option<Identity>,
    pub scope: Scope,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl GrantContext {
    pub fn new(
        client: Identity,
        resource_owner: Option<Identity>,
        scope: Scope,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client,
            resource_owner,
            scope,
            expires_at,
            extensions: BTreeMap::new(),
        }
    }

    /// Build a context that expires after the default lifetime of `kind`.
    pub fn issued(
        kind: TokenKind,
        client: Identity,
        resource_owner: Option<Identity>,
        scope: Scope,
    ) -> Self {
        Self::new(
            client,
            resource_owner,
            scope,
            Utc::now() + kind.default_lifetime(),
        )
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    /// The principal the grant was issued to: the resource owner when present,
    /// otherwise the client itself (client credentials).
    pub fn subject(&self) -> &Identity {
        self.resource_owner.as_ref().unwrap_or(&self.client)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
