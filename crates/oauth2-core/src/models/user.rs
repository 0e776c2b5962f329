use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::BackendError;
use super::identity::Identity;
use super::scope::Scope;

/// A resource owner (end user) known to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOwner {
    pub id: String,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub email: String,
    /// Privileges the owner may delegate.
    pub scope: Scope,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceOwner {
    /// Create an enabled resource owner, hashing `password`.
    pub fn new(
        username: String,
        password: &str,
        email: String,
        scope: Scope,
    ) -> Result<Self, BackendError> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            username,
            password_hash: hash_password(password)?,
            email,
            scope,
            enabled: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn identity(&self) -> Identity {
        Identity::resource_owner(self.id.clone(), self.username.clone())
    }

    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_hash)
    }
}

pub fn hash_password(password: &str) -> Result<String, BackendError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| BackendError::storage(format!("salt encoding failed: {e}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| BackendError::storage(format!("password hashing failed: {e}")))
}

/// Verify `password` against a PHC hash. A malformed hash never verifies.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
