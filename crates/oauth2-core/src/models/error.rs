use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure reported by a backend operation.
///
/// The first five variants form the domain taxonomy that callers are expected to
/// handle. The remaining variants describe infrastructure or wiring problems and
/// must never be mistaken for a domain failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The referenced entity does not exist in this backend's storage.
    NotFound,
    /// The resource owner exists but the password did not verify.
    BadPass,
    /// The client exists but the secret did not match.
    BadSecret,
    /// The redirection URI is not registered for the client.
    BadUri,
    /// The requested scope cannot be granted.
    BadScope,
    /// A uniqueness rule was violated (duplicate registration, revoked token reuse).
    Conflict(String),
    /// The underlying store failed.
    Storage(String),
    /// No backend has been configured.
    NotConfigured,
    /// The backend configuration is invalid.
    Misconfigured(String),
}

/// Coarse classification of a [`BackendError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    NotFound,
    CredentialMismatch,
    PolicyViolation,
    Infrastructure,
    Wiring,
}

impl BackendError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::Misconfigured(message.into())
    }

    /// Stable short code, suitable for metric labels and audit logs.
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::NotFound => "notfound",
            BackendError::BadPass => "badpass",
            BackendError::BadSecret => "badsecret",
            BackendError::BadUri => "baduri",
            BackendError::BadScope => "badscope",
            BackendError::Conflict(_) => "conflict",
            BackendError::Storage(_) => "storage",
            BackendError::NotConfigured => "not_configured",
            BackendError::Misconfigured(_) => "misconfigured",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::NotFound => ErrorClass::NotFound,
            BackendError::BadPass | BackendError::BadSecret => ErrorClass::CredentialMismatch,
            BackendError::BadUri | BackendError::BadScope => ErrorClass::PolicyViolation,
            BackendError::Conflict(_) | BackendError::Storage(_) => ErrorClass::Infrastructure,
            BackendError::NotConfigured | BackendError::Misconfigured(_) => ErrorClass::Wiring,
        }
    }

    /// True for failures that belong to the OAuth2 domain taxonomy.
    pub fn is_domain(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::NotFound | ErrorClass::CredentialMismatch | ErrorClass::PolicyViolation
        )
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotFound => write!(f, "notfound: entity does not exist"),
            BackendError::BadPass => write!(f, "badpass: password did not verify"),
            BackendError::BadSecret => write!(f, "badsecret: client secret mismatch"),
            BackendError::BadUri => write!(f, "baduri: redirection uri not registered"),
            BackendError::BadScope => write!(f, "badscope: requested scope not permitted"),
            BackendError::Conflict(msg) => write!(f, "conflict: {msg}"),
            BackendError::Storage(msg) => write!(f, "storage failure: {msg}"),
            BackendError::NotConfigured => write!(f, "no backend configured"),
            BackendError::Misconfigured(msg) => write!(f, "backend misconfigured: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        // Provide a stable, non-leaky mapping for common constraint violations.
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code().unwrap_or_default();
            let msg = db_err.message();

            // Postgres unique violation: 23505
            // SQLite constraint error codes vary by extended code; also match by message.
            let is_unique = code == "23505"
                || code == "2067"
                || code == "1555"
                || msg.contains("UNIQUE constraint failed")
                || msg.contains("duplicate key");

            if is_unique {
                return Self::conflict("duplicate key");
            }
        }

        Self::storage(err.to_string())
    }
}

/// Protocol-level error as returned to OAuth2 clients (RFC 6749 §5.2).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OAuth2Error {
    pub error: String,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
}

impl OAuth2Error {
    pub fn new(error: &str, description: Option<&str>) -> Self {
        Self {
            error: error.to_string(),
            error_description: description.map(|s| s.to_string()),
            error_uri: None,
        }
    }

    pub fn invalid_request(description: &str) -> Self {
        Self::new("invalid_request", Some(description))
    }

    pub fn invalid_client(description: &str) -> Self {
        Self::new("invalid_client", Some(description))
    }

    pub fn invalid_grant(description: &str) -> Self {
        Self::new("invalid_grant", Some(description))
    }

    pub fn invalid_scope(description: &str) -> Self {
        Self::new("invalid_scope", Some(description))
    }

    pub fn server_error(description: &str) -> Self {
        Self::new("server_error", Some(description))
    }
}

impl fmt::Display for OAuth2Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {:?}", self.error, self.error_description)
    }
}

impl std::error::Error for OAuth2Error {}

impl From<BackendError> for OAuth2Error {
    fn from(err: BackendError) -> Self {
        // Credential failures collapse into one response so callers cannot tell
        // which half of the credential was wrong.
        match err {
            BackendError::NotFound => Self::invalid_grant("Grant or entity not found"),
            BackendError::BadPass | BackendError::BadSecret => {
                Self::invalid_client("Authentication failed")
            }
            BackendError::BadScope => Self::invalid_scope("Requested scope is not permitted"),
            BackendError::BadUri => Self::invalid_request("Invalid redirect_uri"),
            other => Self::server_error(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_are_distinguishable_from_wiring() {
        assert!(BackendError::NotFound.is_domain());
        assert!(!BackendError::NotConfigured.is_domain());
        assert_eq!(BackendError::NotConfigured.class(), ErrorClass::Wiring);
        assert_ne!(BackendError::NotConfigured.code(), BackendError::NotFound.code());
    }

    #[test]
    fn credential_failures_keep_distinct_codes() {
        assert_eq!(BackendError::BadPass.code(), "badpass");
        assert_eq!(BackendError::NotFound.code(), "notfound");
        assert_eq!(
            BackendError::BadPass.class(),
            BackendError::BadSecret.class()
        );
    }

    #[test]
    fn maps_to_protocol_errors() {
        assert_eq!(OAuth2Error::from(BackendError::NotFound).error, "invalid_grant");
        assert_eq!(OAuth2Error::from(BackendError::BadPass).error, "invalid_client");
        assert_eq!(OAuth2Error::from(BackendError::BadScope).error, "invalid_scope");
        assert_eq!(OAuth2Error::from(BackendError::BadUri).error, "invalid_request");
        assert_eq!(
            OAuth2Error::from(BackendError::NotConfigured).error,
            "server_error"
        );
    }
}
