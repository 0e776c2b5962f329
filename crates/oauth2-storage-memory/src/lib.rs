use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use oauth2_core::{
    verify_password, AppContext, BackendError, Client, GrantContext, Identity, ResourceOwner,
    Scope, TokenKind,
};
use oauth2_ports::Backend;

#[derive(Debug, Clone)]
enum GrantSlot {
    Live(GrantContext),
    /// Tombstone; keeps the token from ever resolving again.
    Revoked,
}

#[derive(Debug, Default)]
struct TenantStore {
    clients: HashMap<String, Client>,
    owners: HashMap<String, ResourceOwner>,
    grants: HashMap<(TokenKind, String), GrantSlot>,
}

impl TenantStore {
    fn owner(&self, identity: &Identity) -> Option<&ResourceOwner> {
        match identity {
            Identity::ResourceOwner { id, username } => self
                .owners
                .get(username)
                .filter(|owner| &owner.id == id),
            Identity::Client { .. } => None,
        }
    }

    fn client(&self, identity: &Identity) -> Option<&Client> {
        identity
            .client_id()
            .and_then(|client_id| self.clients.get(client_id))
    }
}

/// In-process backend holding every tenant's records behind one lock.
///
/// Intended for tests, demos and single-node deployments; nothing survives a
/// restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tenants: RwLock<HashMap<String, TenantStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, app: &AppContext, f: impl FnOnce(&TenantStore) -> T) -> T {
        let tenants = self.tenants.read().await;
        match tenants.get(&app.tenant) {
            Some(store) => f(store),
            None => f(&TenantStore::default()),
        }
    }

    /// Mutate the tenant's store, creating it first. Only registration does this.
    async fn write<T>(&self, app: &AppContext, f: impl FnOnce(&mut TenantStore) -> T) -> T {
        let mut tenants = self.tenants.write().await;
        f(tenants.entry(app.tenant.clone()).or_default())
    }

    /// Mutate an existing tenant's store; an unknown tenant is `NotFound`.
    async fn update<T>(
        &self,
        app: &AppContext,
        f: impl FnOnce(&mut TenantStore) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut tenants = self.tenants.write().await;
        let store = tenants
            .get_mut(&app.tenant)
            .ok_or(BackendError::NotFound)?;
        f(store)
    }

    async fn associate(
        &self,
        kind: TokenKind,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.update(app, |store| {
            if store.client(&grant.client).is_none() {
                return Err(BackendError::NotFound);
            }
            if let Some(owner) = &grant.resource_owner {
                if store.owner(owner).is_none() {
                    return Err(BackendError::NotFound);
                }
            }

            let key = (kind, token.to_string());
            if let Some(GrantSlot::Revoked) = store.grants.get(&key) {
                return Err(BackendError::conflict(format!("{kind} has been revoked")));
            }
            store.grants.insert(key, GrantSlot::Live(grant.clone()));
            Ok(())
        })
        .await
    }

    async fn resolve(
        &self,
        kind: TokenKind,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        self.read(app, |store| {
            match store.grants.get(&(kind, token.to_string())) {
                Some(GrantSlot::Live(grant)) => Ok(grant.clone()),
                Some(GrantSlot::Revoked) | None => Err(BackendError::NotFound),
            }
        })
        .await
    }

    async fn revoke(
        &self,
        kind: TokenKind,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.update(app, |store| {
            match store.grants.get_mut(&(kind, token.to_string())) {
                Some(slot) => {
                    *slot = GrantSlot::Revoked;
                    Ok(())
                }
                None => Err(BackendError::NotFound),
            }
        })
        .await
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn register_client(&self, client: &Client, app: &AppContext) -> Result<(), BackendError> {
        self.write(app, |store| {
            if store.clients.contains_key(&client.client_id) {
                return Err(BackendError::conflict("duplicate key"));
            }
            store
                .clients
                .insert(client.client_id.clone(), client.clone());
            Ok(())
        })
        .await
    }

    async fn register_resource_owner(
        &self,
        owner: &ResourceOwner,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.write(app, |store| {
            if store.owners.contains_key(&owner.username) {
                return Err(BackendError::conflict("duplicate key"));
            }
            store.owners.insert(owner.username.clone(), owner.clone());
            Ok(())
        })
        .await
    }

    async fn authenticate_username_password(
        &self,
        username: &str,
        password: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        let owner = self
            .read(app, |store| store.owners.get(username).cloned())
            .await
            .filter(|owner| owner.enabled)
            .ok_or(BackendError::NotFound)?;

        // Argon2 is deliberately slow; keep it outside the lock and off the async workers.
        let password = password.to_string();
        let password_hash = owner.password_hash.clone();
        let verified =
            tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
                .await
                .map_err(|e| BackendError::storage(format!("password verification aborted: {e}")))?;

        if verified {
            Ok(owner.identity())
        } else {
            Err(BackendError::BadPass)
        }
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        self.read(app, |store| match store.clients.get(client_id) {
            Some(client) if client.verify_secret(client_secret) => Ok(client.identity()),
            Some(_) => Err(BackendError::BadSecret),
            None => Err(BackendError::NotFound),
        })
        .await
    }

    async fn get_client_identity(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        self.read(app, |store| {
            store
                .clients
                .get(client_id)
                .map(Client::identity)
                .ok_or(BackendError::NotFound)
        })
        .await
    }

    async fn associate_access_code(
        &self,
        code: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.associate(TokenKind::AccessCode, code, grant, app).await
    }

    async fn associate_access_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.associate(TokenKind::AccessToken, token, grant, app)
            .await
    }

    async fn associate_refresh_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.associate(TokenKind::RefreshToken, token, grant, app)
            .await
    }

    async fn resolve_access_code(
        &self,
        code: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        self.resolve(TokenKind::AccessCode, code, app).await
    }

    async fn resolve_access_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        self.resolve(TokenKind::AccessToken, token, app).await
    }

    async fn resolve_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        self.resolve(TokenKind::RefreshToken, token, app).await
    }

    async fn revoke_access_code(&self, code: &str, app: &AppContext) -> Result<(), BackendError> {
        self.revoke(TokenKind::AccessCode, code, app).await
    }

    async fn revoke_access_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.revoke(TokenKind::AccessToken, token, app).await
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.revoke(TokenKind::RefreshToken, token, app).await
    }

    async fn get_redirection_uri(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<String, BackendError> {
        self.read(app, |store| {
            store
                .clients
                .get(client_id)
                .and_then(|client| client.default_redirect_uri())
                .map(str::to_string)
                .ok_or(BackendError::NotFound)
        })
        .await
    }

    async fn verify_redirection_uri(
        &self,
        client: &Identity,
        redirection_uri: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.read(app, |store| match store.client(client) {
            Some(c) if c.validate_redirect_uri(redirection_uri) => Ok(()),
            Some(_) => Err(BackendError::BadUri),
            None => Err(BackendError::NotFound),
        })
        .await
    }

    async fn verify_client_scope(
        &self,
        client: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        self.read(app, |store| {
            store
                .client(client)
                .ok_or(BackendError::NotFound)
                .and_then(|c| c.scope.narrow(requested))
        })
        .await
    }

    async fn verify_resowner_scope(
        &self,
        owner: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        self.read(app, |store| {
            store
                .owner(owner)
                .ok_or(BackendError::NotFound)
                .and_then(|o| o.scope.narrow(requested))
        })
        .await
    }

    async fn verify_scope(
        &self,
        valid: &Scope,
        requested: &Scope,
        _app: &AppContext,
    ) -> Result<Scope, BackendError> {
        valid.narrow(requested)
    }
}
