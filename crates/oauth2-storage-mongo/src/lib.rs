use async_trait::async_trait;
use chrono::Utc;
use mongodb::{
    bson::{self, doc, Document},
    options::{ClientOptions, IndexOptions, UpdateOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use oauth2_core::{
    verify_password, AppContext, BackendError, Client, GrantContext, Identity, ResourceOwner,
    Scope, TokenKind,
};
use oauth2_ports::Backend;

/// A record stored under a tenant. The record's own fields are flattened into the
/// document next to `tenant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TenantRecord<T> {
    tenant: String,
    #[serde(flatten)]
    record: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GrantDocument {
    tenant: String,
    kind: TokenKind,
    token: String,
    client_id: String,
    subject: String,
    context: GrantContext,
    revoked: bool,
}

/// MongoDB-backed backend implementation.
///
/// Notes:
/// - Uses the core models as documents via `serde`.
/// - Uniqueness is enforced with compound unique indexes that include the tenant.
/// - Revoked grants stay as tombstones; the unique index on
///   `(tenant, kind, token)` turns any attempt to re-associate them into a
///   duplicate key error.
pub struct MongoBackend {
    db: Database,
    clients: Collection<TenantRecord<Client>>,
    resource_owners: Collection<TenantRecord<ResourceOwner>>,
    grants: Collection<GrantDocument>,
}

impl MongoBackend {
    pub async fn new(uri: &str) -> Result<Self, BackendError> {
        let mut opts = ClientOptions::parse(uri)
            .await
            .map_err(Self::mongo_err_to_backend)?;
        if opts.app_name.is_none() {
            opts.app_name = Some("oauth2-storage-mongo".to_string());
        }

        let client = MongoClient::with_options(opts).map_err(Self::mongo_err_to_backend)?;

        // If URI doesn't specify a database, fall back to "oauth2".
        let db_name = client
            .default_database()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| "oauth2".to_string());

        let db = client.database(&db_name);

        let clients = db.collection::<TenantRecord<Client>>("clients");
        let resource_owners = db.collection::<TenantRecord<ResourceOwner>>("resource_owners");
        let grants = db.collection::<GrantDocument>("grants");

        Ok(Self {
            db,
            clients,
            resource_owners,
            grants,
        })
    }

    async fn ensure_indexes(&self) -> Result<(), BackendError> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.clients
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant": 1, "client_id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_backend)?;

        self.resource_owners
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant": 1, "username": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_backend)?;

        self.grants
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant": 1, "kind": 1, "token": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_backend)?;

        self.grants
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant": 1, "client_id": 1 })
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_backend)?;

        Ok(())
    }

    fn duplicate_key_error(err: &mongodb::error::Error) -> bool {
        // Canonical server-side message includes "E11000".
        err.to_string().contains("E11000")
    }

    fn mongo_err_to_backend(err: mongodb::error::Error) -> BackendError {
        if Self::duplicate_key_error(&err) {
            return BackendError::conflict("duplicate key");
        }

        BackendError::storage(err.to_string())
    }

    fn grant_filter(kind: TokenKind, token: &str, app: &AppContext) -> Document {
        doc! { "tenant": app.tenant.as_str(), "kind": kind.as_str(), "token": token }
    }

    async fn find_client(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<Option<Client>, BackendError> {
        self.clients
            .find_one(doc! { "tenant": app.tenant.as_str(), "client_id": client_id }, None)
            .await
            .map(|found| found.map(|r| r.record))
            .map_err(Self::mongo_err_to_backend)
    }

    async fn find_resource_owner(
        &self,
        username: &str,
        app: &AppContext,
    ) -> Result<Option<ResourceOwner>, BackendError> {
        self.resource_owners
            .find_one(doc! { "tenant": app.tenant.as_str(), "username": username }, None)
            .await
            .map(|found| found.map(|r| r.record))
            .map_err(Self::mongo_err_to_backend)
    }

    async fn client_for(
        &self,
        identity: &Identity,
        app: &AppContext,
    ) -> Result<Client, BackendError> {
        let client_id = identity.client_id().ok_or(BackendError::NotFound)?;
        self.find_client(client_id, app)
            .await?
            .ok_or(BackendError::NotFound)
    }

    async fn resource_owner_for(
        &self,
        identity: &Identity,
        app: &AppContext,
    ) -> Result<ResourceOwner, BackendError> {
        let Identity::ResourceOwner { id, username } = identity else {
            return Err(BackendError::NotFound);
        };

        self.find_resource_owner(username, app)
            .await?
            .filter(|owner| &owner.id == id)
            .ok_or(BackendError::NotFound)
    }

    async fn associate(
        &self,
        kind: TokenKind,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let client = self.client_for(&grant.client, app).await?;
        if let Some(owner) = &grant.resource_owner {
            self.resource_owner_for(owner, app).await?;
        }

        let context = bson::to_bson(grant)
            .map_err(|e| BackendError::storage(format!("grant context encoding failed: {e}")))?;

        // Only live (or absent) grants match; an upsert against a tombstone collides
        // with the unique index and surfaces as a conflict.
        let mut filter = Self::grant_filter(kind, token, app);
        filter.insert("revoked", doc! { "$ne": true });

        let update = doc! {
            "$set": {
                "client_id": client.client_id.as_str(),
                "subject": grant.subject().subject(),
                "context": context,
                "revoked": false,
            },
            "$setOnInsert": { "created_at": Utc::now().to_rfc3339() },
        };

        let options = UpdateOptions::builder().upsert(true).build();

        // Two first-time upserts of one token race on the unique index; the loser
        // retries once and then matches the winner's live document.
        let mut retried = false;
        loop {
            let attempt = self
                .grants
                .update_one(filter.clone(), update.clone(), options.clone())
                .await;

            match attempt {
                Ok(_) => return Ok(()),
                Err(err) if Self::duplicate_key_error(&err) && !retried => {
                    tracing::debug!(%kind, tenant = %app.tenant, "grant upsert raced; retrying");
                    retried = true;
                }
                Err(err) if Self::duplicate_key_error(&err) => {
                    return Err(BackendError::conflict(format!("{kind} has been revoked")));
                }
                Err(err) => return Err(Self::mongo_err_to_backend(err)),
            }
        }
    }

    async fn resolve(
        &self,
        kind: TokenKind,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        let found = self
            .grants
            .find_one(Self::grant_filter(kind, token, app), None)
            .await
            .map_err(Self::mongo_err_to_backend)?;

        match found {
            Some(grant) if !grant.revoked => Ok(grant.context),
            _ => Err(BackendError::NotFound),
        }
    }

    async fn revoke(
        &self,
        kind: TokenKind,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let result = self
            .grants
            .update_one(
                Self::grant_filter(kind, token, app),
                doc! { "$set": { "revoked": true } },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_backend)?;

        if result.matched_count == 0 {
            return Err(BackendError::NotFound);
        }

        Ok(())
    }
}

#[async_trait]
impl Backend for MongoBackend {
    async fn init(&self) -> Result<(), BackendError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(Self::mongo_err_to_backend)?;
        self.ensure_indexes().await
    }

    async fn healthcheck(&self) -> Result<(), BackendError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_backend)
    }

    async fn register_client(&self, client: &Client, app: &AppContext) -> Result<(), BackendError> {
        let record = TenantRecord {
            tenant: app.tenant.clone(),
            record: client.clone(),
        };
        self.clients
            .insert_one(record, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_backend)
    }

    async fn register_resource_owner(
        &self,
        owner: &ResourceOwner,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let record = TenantRecord {
            tenant: app.tenant.clone(),
            record: owner.clone(),
        };
        self.resource_owners
            .insert_one(record, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_backend)
    }

    async fn authenticate_username_password(
        &self,
        username: &str,
        password: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        let owner = self
            .find_resource_owner(username, app)
            .await?
            .filter(|owner| owner.enabled)
            .ok_or(BackendError::NotFound)?;

        // Argon2 is deliberately slow; keep it off the async workers.
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
        let client = self
            .find_client(client_id, app)
            .await?
            .ok_or(BackendError::NotFound)?;

        if client.verify_secret(client_secret) {
            Ok(client.identity())
        } else {
            Err(BackendError::BadSecret)
        }
    }

    async fn get_client_identity(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        self.find_client(client_id, app)
            .await?
            .map(|client| client.identity())
            .ok_or(BackendError::NotFound)
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
        self.find_client(client_id, app)
            .await?
            .and_then(|client| client.default_redirect_uri().map(str::to_string))
            .ok_or(BackendError::NotFound)
    }

    async fn verify_redirection_uri(
        &self,
        client: &Identity,
        redirection_uri: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let client = self.client_for(client, app).await?;
        if client.validate_redirect_uri(redirection_uri) {
            Ok(())
        } else {
            Err(BackendError::BadUri)
        }
    }

    async fn verify_client_scope(
        &self,
        client: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        self.client_for(client, app).await?.scope.narrow(requested)
    }

    async fn verify_resowner_scope(
        &self,
        owner: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        self.resource_owner_for(owner, app)
            .await?
            .scope
            .narrow(requested)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_record_flattens_into_one_document() {
        let client = Client::new(
            "client".to_string(),
            "secret".to_string(),
            vec!["https://app.example/cb".to_string()],
            Scope::parse("read"),
            "test".to_string(),
        );
        let record = TenantRecord {
            tenant: "acme".to_string(),
            record: client,
        };

        let doc = bson::to_document(&record).expect("record should serialize to bson document");
        assert_eq!(doc.get_str("tenant").ok(), Some("acme"));
        assert_eq!(doc.get_str("client_id").ok(), Some("client"));
        assert_eq!(doc.get_str("scope").ok(), Some("read"));
    }

    #[test]
    fn grant_document_roundtrips_through_bson() {
        let context = GrantContext::issued(
            TokenKind::RefreshToken,
            Identity::client("client"),
            Some(Identity::resource_owner("u-1", "alice")),
            Scope::parse("read write"),
        )
        .with_extension("rotation", serde_json::json!("1"));

        let grant = GrantDocument {
            tenant: "default".to_string(),
            kind: TokenKind::RefreshToken,
            token: "tok".to_string(),
            client_id: "client".to_string(),
            subject: "u-1".to_string(),
            context: context.clone(),
            revoked: false,
        };

        let doc = bson::to_document(&grant).expect("grant should serialize to bson document");
        assert_eq!(doc.get_str("kind").ok(), Some("refresh_token"));

        let decoded: GrantDocument = bson::from_document(doc).expect("grant should decode");
        assert_eq!(decoded.context, context);
    }
}
