use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth2_core::{
    verify_password, AppContext, BackendError, Client, GrantContext, Identity, ResourceOwner,
    Scope, TokenKind,
};
use oauth2_ports::Backend;
use sqlx::{Pool, Postgres, Sqlite};
use std::borrow::Cow;
use std::path::PathBuf;

use crate::schema::{self, postgres_placeholders};

#[derive(Clone, Debug)]
enum DatabasePool {
    Sqlite(Pool<Sqlite>),
    Postgres(Pool<Postgres>),
}

/// SQL-backed backend implementation (SQLite/Postgres) using SQLx.
pub struct SqlxBackend {
    pool: DatabasePool,
}

#[derive(sqlx::FromRow)]
struct ClientRow {
    id: String,
    client_id: String,
    client_secret: String,
    redirect_uris: String,
    scope: String,
    name: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ClientRow> for Client {
    type Error = BackendError;

    fn try_from(row: ClientRow) -> Result<Self, Self::Error> {
        Ok(Client {
            id: row.id,
            client_id: row.client_id,
            client_secret: row.client_secret,
            redirect_uris: serde_json::from_str(&row.redirect_uris)
                .map_err(|e| BackendError::storage(format!("invalid redirect_uris: {e}")))?,
            scope: Scope::parse(&row.scope),
            name: row.name,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResourceOwnerRow {
    id: String,
    username: String,
    password_hash: String,
    email: String,
    scope: String,
    enabled: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ResourceOwnerRow> for ResourceOwner {
    type Error = BackendError;

    fn try_from(row: ResourceOwnerRow) -> Result<Self, Self::Error> {
        Ok(ResourceOwner {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            email: row.email,
            scope: Scope::parse(&row.scope),
            enabled: row.enabled,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GrantRow {
    context: String,
    revoked: bool,
}

impl SqlxBackend {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // In containerized environments, a common failure mode is that the directory
        // for the sqlite DB file doesn't exist yet. Create the parent directory (when
        // we can infer one) and tell sqlx to create the database file if missing.
        let pool = if database_url.starts_with("postgres") {
            DatabasePool::Postgres(Pool::<Postgres>::connect(database_url).await?)
        } else {
            // Best-effort: if we can't create it (permissions, etc.), sqlx will surface the
            // underlying error on connect.
            if let Some(path) = sqlite_db_path(database_url) {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                }
            }

            let connect_url = sqlite_url_with_create_mode(database_url);
            DatabasePool::Sqlite(Pool::<Sqlite>::connect(connect_url.as_ref()).await?)
        };

        Ok(Self { pool })
    }

    pub fn db_system(&self) -> &'static str {
        match &self.pool {
            DatabasePool::Sqlite(_) => "sqlite",
            DatabasePool::Postgres(_) => "postgresql",
        }
    }

    async fn init_sqlx(&self) -> Result<(), sqlx::Error> {
        for statement in schema::SCHEMA {
            match &self.pool {
                DatabasePool::Sqlite(pool) => {
                    sqlx::query(statement).execute(pool).await?;
                }
                DatabasePool::Postgres(pool) => {
                    sqlx::query(statement).execute(pool).await?;
                }
            }
        }

        Ok(())
    }

    async fn fetch_client(
        &self,
        tenant: &str,
        client_id: &str,
    ) -> Result<Option<Client>, BackendError> {
        let row = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, ClientRow>(schema::SELECT_CLIENT)
                    .bind(tenant)
                    .bind(client_id)
                    .fetch_optional(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, ClientRow>(&postgres_placeholders(schema::SELECT_CLIENT))
                    .bind(tenant)
                    .bind(client_id)
                    .fetch_optional(pool)
                    .await?
            }
        };

        row.map(Client::try_from).transpose()
    }

    async fn fetch_resource_owner(
        &self,
        tenant: &str,
        username: &str,
    ) -> Result<Option<ResourceOwner>, BackendError> {
        let row = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, ResourceOwnerRow>(schema::SELECT_RESOURCE_OWNER)
                    .bind(tenant)
                    .bind(username)
                    .fetch_optional(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => sqlx::query_as::<_, ResourceOwnerRow>(
                &postgres_placeholders(schema::SELECT_RESOURCE_OWNER),
            )
            .bind(tenant)
            .bind(username)
            .fetch_optional(pool)
            .await?,
        };

        row.map(ResourceOwner::try_from).transpose()
    }

    async fn client_for(
        &self,
        identity: &Identity,
        app: &AppContext,
    ) -> Result<Client, BackendError> {
        let client_id = identity.client_id().ok_or(BackendError::NotFound)?;
        self.fetch_client(&app.tenant, client_id)
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

        self.fetch_resource_owner(&app.tenant, username)
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

        let context =
            serde_json::to_string(grant).map_err(|e| BackendError::storage(e.to_string()))?;
        let subject = grant.subject().subject().to_string();
        let expires_at = grant.expires_at.to_rfc3339();
        let created_at = Utc::now().to_rfc3339();

        let affected = match &self.pool {
            DatabasePool::Sqlite(pool) => sqlx::query(schema::UPSERT_GRANT)
                .bind(&app.tenant)
                .bind(kind.as_str())
                .bind(token)
                .bind(&client.client_id)
                .bind(&subject)
                .bind(&context)
                .bind(&expires_at)
                .bind(false)
                .bind(&created_at)
                .bind(false)
                .execute(pool)
                .await?
                .rows_affected(),
            DatabasePool::Postgres(pool) => {
                sqlx::query(&postgres_placeholders(schema::UPSERT_GRANT))
                    .bind(&app.tenant)
                    .bind(kind.as_str())
                    .bind(token)
                    .bind(&client.client_id)
                    .bind(&subject)
                    .bind(&context)
                    .bind(&expires_at)
                    .bind(false)
                    .bind(&created_at)
                    .bind(false)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if affected == 0 {
            return Err(BackendError::conflict(format!("{kind} has been revoked")));
        }

        Ok(())
    }

    async fn resolve(
        &self,
        kind: TokenKind,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        let row = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, GrantRow>(schema::SELECT_GRANT)
                    .bind(&app.tenant)
                    .bind(kind.as_str())
                    .bind(token)
                    .fetch_optional(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, GrantRow>(&postgres_placeholders(schema::SELECT_GRANT))
                    .bind(&app.tenant)
                    .bind(kind.as_str())
                    .bind(token)
                    .fetch_optional(pool)
                    .await?
            }
        };

        match row {
            Some(row) if !row.revoked => serde_json::from_str(&row.context)
                .map_err(|e| BackendError::storage(format!("corrupt grant context: {e}"))),
            _ => Err(BackendError::NotFound),
        }
    }

    async fn revoke(
        &self,
        kind: TokenKind,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let affected = match &self.pool {
            DatabasePool::Sqlite(pool) => sqlx::query(schema::REVOKE_GRANT)
                .bind(true)
                .bind(&app.tenant)
                .bind(kind.as_str())
                .bind(token)
                .execute(pool)
                .await?
                .rows_affected(),
            DatabasePool::Postgres(pool) => {
                sqlx::query(&postgres_placeholders(schema::REVOKE_GRANT))
                    .bind(true)
                    .bind(&app.tenant)
                    .bind(kind.as_str())
                    .bind(token)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if affected == 0 {
            return Err(BackendError::NotFound);
        }

        Ok(())
    }
}

#[async_trait]
impl Backend for SqlxBackend {
    async fn init(&self) -> Result<(), BackendError> {
        self.init_sqlx().await.map_err(Into::into)
    }

    async fn healthcheck(&self) -> Result<(), BackendError> {
        // Keep readiness/liveness cheap: don't run the schema bootstrap.
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }

        Ok(())
    }

    async fn register_client(&self, client: &Client, app: &AppContext) -> Result<(), BackendError> {
        let redirect_uris = serde_json::to_string(&client.redirect_uris)
            .map_err(|e| BackendError::storage(e.to_string()))?;
        let scope = client.scope.to_string();
        let created_at = client.created_at.to_rfc3339();
        let updated_at = client.updated_at.to_rfc3339();

        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(schema::INSERT_CLIENT)
                    .bind(&app.tenant)
                    .bind(&client.id)
                    .bind(&client.client_id)
                    .bind(&client.client_secret)
                    .bind(&redirect_uris)
                    .bind(&scope)
                    .bind(&client.name)
                    .bind(&created_at)
                    .bind(&updated_at)
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(&postgres_placeholders(schema::INSERT_CLIENT))
                    .bind(&app.tenant)
                    .bind(&client.id)
                    .bind(&client.client_id)
                    .bind(&client.client_secret)
                    .bind(&redirect_uris)
                    .bind(&scope)
                    .bind(&client.name)
                    .bind(&created_at)
                    .bind(&updated_at)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn register_resource_owner(
        &self,
        owner: &ResourceOwner,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let scope = owner.scope.to_string();
        let created_at = owner.created_at.to_rfc3339();
        let updated_at = owner.updated_at.to_rfc3339();

        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(schema::INSERT_RESOURCE_OWNER)
                    .bind(&app.tenant)
                    .bind(&owner.id)
                    .bind(&owner.username)
                    .bind(&owner.password_hash)
                    .bind(&owner.email)
                    .bind(&scope)
                    .bind(owner.enabled)
                    .bind(&created_at)
                    .bind(&updated_at)
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(&postgres_placeholders(schema::INSERT_RESOURCE_OWNER))
                    .bind(&app.tenant)
                    .bind(&owner.id)
                    .bind(&owner.username)
                    .bind(&owner.password_hash)
                    .bind(&owner.email)
                    .bind(&scope)
                    .bind(owner.enabled)
                    .bind(&created_at)
                    .bind(&updated_at)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn authenticate_username_password(
        &self,
        username: &str,
        password: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        let owner = self
            .fetch_resource_owner(&app.tenant, username)
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
            .fetch_client(&app.tenant, client_id)
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
        self.fetch_client(&app.tenant, client_id)
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
        self.fetch_client(&app.tenant, client_id)
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

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, BackendError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| BackendError::storage(format!("invalid timestamp {raw:?}: {e}")))
}

fn sqlite_db_path(database_url: &str) -> Option<PathBuf> {
    if !database_url.starts_with("sqlite:") {
        return None;
    }
    if database_url.starts_with("sqlite::memory:") {
        return None;
    }

    let mut rest = &database_url["sqlite:".len()..];

    // Normalize URL-ish forms into a filesystem-ish path by reducing multiple
    // leading slashes to a single leading slash.
    if rest.starts_with("///") {
        rest = &rest[2..];
    } else if rest.starts_with("//") {
        rest = &rest[1..];
    }

    // Drop any query string.
    let path_part = rest.split('?').next().unwrap_or(rest);
    if path_part.is_empty() {
        return None;
    }

    Some(PathBuf::from(path_part))
}

fn sqlite_url_with_create_mode(database_url: &str) -> Cow<'_, str> {
    if !database_url.starts_with("sqlite:") || database_url.starts_with("sqlite::memory:") {
        return Cow::Borrowed(database_url);
    }

    if database_url.contains("mode=") {
        return Cow::Borrowed(database_url);
    }

    let sep = if database_url.contains('?') { '&' } else { '?' };
    Cow::Owned(format!("{database_url}{sep}mode=rwc"))
}
