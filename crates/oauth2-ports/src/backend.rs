use async_trait::async_trait;
use std::sync::Arc;

use oauth2_core::{
    AppContext, BackendError, Client, GrantContext, Identity, ResourceOwner, Scope,
};

/// Capability contract every storage/identity backend implements.
///
/// Each operation completes before returning and reports failure only through its
/// `Result`. Domain failures use the `NotFound`/`BadPass`/`BadSecret`/`BadUri`/
/// `BadScope` variants of [`BackendError`]; everything else is infrastructure or
/// wiring. All records are partitioned by [`AppContext::tenant`].
///
/// Access codes, access tokens and refresh tokens are independent namespaces: the
/// same string associated as two kinds yields two unrelated grants.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Initialize the backing store (e.g., bootstrap schema / create indexes).
    async fn init(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Lightweight liveness/readiness check.
    ///
    /// Implementations may override to do something cheaper than `init()`.
    async fn healthcheck(&self) -> Result<(), BackendError> {
        self.init().await
    }

    // Provisioning
    async fn register_client(&self, client: &Client, app: &AppContext)
        -> Result<(), BackendError>;
    async fn register_resource_owner(
        &self,
        owner: &ResourceOwner,
        app: &AppContext,
    ) -> Result<(), BackendError>;

    // Authentication
    /// `NotFound` for unknown or disabled users, `BadPass` when the password fails.
    async fn authenticate_username_password(
        &self,
        username: &str,
        password: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError>;
    /// `NotFound` for unknown clients, `BadSecret` when the secret does not match.
    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError>;
    /// Look up a client without authenticating it (public client flows).
    async fn get_client_identity(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError>;

    // Token association. `NotFound` when the context references an absent client
    // or resource owner; `Conflict` when the token was revoked.
    async fn associate_access_code(
        &self,
        code: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError>;
    async fn associate_access_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError>;
    async fn associate_refresh_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError>;

    // Token resolution. `NotFound` for unknown or revoked tokens.
    async fn resolve_access_code(
        &self,
        code: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError>;
    async fn resolve_access_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError>;
    async fn resolve_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError>;

    // Token revocation. Permanent; revoking twice succeeds, revoking a token that
    // was never associated is `NotFound`.
    async fn revoke_access_code(&self, code: &str, app: &AppContext) -> Result<(), BackendError>;
    async fn revoke_access_token(&self, token: &str, app: &AppContext)
        -> Result<(), BackendError>;
    async fn revoke_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError>;

    // Redirection URIs
    async fn get_redirection_uri(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<String, BackendError>;
    async fn verify_redirection_uri(
        &self,
        client: &Identity,
        redirection_uri: &str,
        app: &AppContext,
    ) -> Result<(), BackendError>;

    // Scope verification. Each returns the narrowed scope, never wider than the
    // authority consulted.
    async fn verify_client_scope(
        &self,
        client: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError>;
    async fn verify_resowner_scope(
        &self,
        owner: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError>;
    async fn verify_scope(
        &self,
        valid: &Scope,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError>;
}

pub type DynBackend = Arc<dyn Backend>;
