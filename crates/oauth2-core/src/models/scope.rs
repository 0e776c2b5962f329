use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::error::BackendError;

/// A set of privilege identifiers.
///
/// On the wire (and in config) a scope is the OAuth2 space-delimited string, e.g.
/// `"read write"`. Deserialization also accepts a list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope(BTreeSet<String>);

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-delimited scope string. Repeated whitespace is ignored.
    pub fn parse(raw: &str) -> Self {
        raw.split_whitespace().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, privilege: &str) -> bool {
        self.0.contains(privilege)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_subset_of(&self, other: &Scope) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn intersection(&self, other: &Scope) -> Scope {
        Scope(self.0.intersection(&other.0).cloned().collect())
    }

    /// Narrow `requested` against `self`, the authorized ceiling.
    ///
    /// The result is the intersection of both sets. An empty request means "use
    /// the default", which is the full authorized scope. An empty result is
    /// rejected with [`BackendError::BadScope`]. The returned scope is always a
    /// subset of `self`.
    pub fn narrow(&self, requested: &Scope) -> Result<Scope, BackendError> {
        let granted = if requested.is_empty() {
            self.clone()
        } else {
            requested.intersection(self)
        };

        if granted.is_empty() {
            return Err(BackendError::BadScope);
        }

        Ok(granted)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for privilege in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(privilege)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Scope {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl<S: Into<String>> FromIterator<S> for Scope {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Scope(
            iter.into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        )
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            List(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(raw) => Scope::parse(&raw),
            Repr::List(items) => items.into_iter().collect(),
        })
    }
}
