use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_TENANT: &str = "default";

/// Caller-supplied context threaded through every backend call.
///
/// Backends partition all of their records by `tenant`, so a single backend
/// instance can serve several applications without shared mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppContext {
    pub tenant: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl AppContext {
    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::for_tenant(DEFAULT_TENANT)
    }
}
