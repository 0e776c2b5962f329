use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated principal as handed out by a backend.
///
/// Resource owners and clients are separate identity domains; a value of one kind
/// is never accepted where the other is required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    ResourceOwner { id: String, username: String },
    Client { client_id: String },
}

impl Identity {
    pub fn resource_owner(id: impl Into<String>, username: impl Into<String>) -> Self {
        Identity::ResourceOwner {
            id: id.into(),
            username: username.into(),
        }
    }

    pub fn client(client_id: impl Into<String>) -> Self {
        Identity::Client {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            Identity::Client { client_id } => Some(client_id),
            Identity::ResourceOwner { .. } => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::ResourceOwner { username, .. } => Some(username),
            Identity::Client { .. } => None,
        }
    }

    /// Stable subject identifier: user id for resource owners, client id otherwise.
    pub fn subject(&self) -> &str {
        match self {
            Identity::ResourceOwner { id, .. } => id,
            Identity::Client { client_id } => client_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Identity::ResourceOwner { .. } => "resource_owner",
            Identity::Client { .. } => "client",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.subject())
    }
}
