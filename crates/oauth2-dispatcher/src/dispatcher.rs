use async_trait::async_trait;

use oauth2_config::{Config, DEFAULT_TENANT};
use oauth2_core::{
    AppContext, BackendError, Client, GrantContext, Identity, ResourceOwner, Scope,
};
use oauth2_observability::Metrics;
use oauth2_ports::{Backend, DynBackend};

use crate::bootstrap::bootstrap;
use crate::factory::create_backend_with_metrics;

/// Routes every backend operation to the backend bound at construction.
///
/// The binding never changes afterwards, so a dispatcher can be cloned and
/// shared freely across tasks. Without a backend every operation fails with
/// [`BackendError::NotConfigured`]; results and errors of a bound backend are
/// passed through untouched.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Option<DynBackend>,
    default_tenant: String,
}

impl Dispatcher {
    pub fn new(backend: DynBackend) -> Self {
        Self {
            backend: Some(backend),
            default_tenant: DEFAULT_TENANT.to_string(),
        }
    }

    pub fn unconfigured() -> Self {
        tracing::warn!("no OAuth2 backend configured; backend operations will fail");
        Self {
            backend: None,
            default_tenant: DEFAULT_TENANT.to_string(),
        }
    }

    /// Build the backend named by `config.backend`, then register bootstrap seeds.
    pub async fn from_config(config: &Config) -> Result<Self, BackendError> {
        Self::build(config, None).await
    }

    pub async fn from_config_with_metrics(
        config: &Config,
        metrics: Metrics,
    ) -> Result<Self, BackendError> {
        Self::build(config, Some(metrics)).await
    }

    async fn build(config: &Config, metrics: Option<Metrics>) -> Result<Self, BackendError> {
        let default_tenant = config.backend.default_tenant.clone();

        let Some(backend) = create_backend_with_metrics(&config.backend, metrics).await? else {
            return Ok(Self::unconfigured().with_default_tenant(default_tenant));
        };

        if let Some(seeds) = &config.bootstrap {
            bootstrap(backend.as_ref(), seeds, &default_tenant).await?;
        }

        Ok(Self::new(backend).with_default_tenant(default_tenant))
    }

    pub fn with_default_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.default_tenant = tenant.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<&DynBackend> {
        self.backend.as_ref()
    }

    /// A context for the configured default tenant.
    pub fn default_context(&self) -> AppContext {
        AppContext::for_tenant(self.default_tenant.clone())
    }

    fn bound(&self) -> Result<&DynBackend, BackendError> {
        self.backend.as_ref().ok_or(BackendError::NotConfigured)
    }
}

#[async_trait]
impl Backend for Dispatcher {
    async fn init(&self) -> Result<(), BackendError> {
        self.bound()?.init().await
    }

    async fn healthcheck(&self) -> Result<(), BackendError> {
        self.bound()?.healthcheck().await
    }

    async fn register_client(&self, client: &Client, app: &AppContext) -> Result<(), BackendError> {
        self.bound()?.register_client(client, app).await
    }

    async fn register_resource_owner(
        &self,
        owner: &ResourceOwner,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.bound()?.register_resource_owner(owner, app).await
    }

    async fn authenticate_username_password(
        &self,
        username: &str,
        password: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        self.bound()?
            .authenticate_username_password(username, password, app)
            .await
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        self.bound()?
            .authenticate_client(client_id, client_secret, app)
            .await
    }

    async fn get_client_identity(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        self.bound()?.get_client_identity(client_id, app).await
    }

    async fn associate_access_code(
        &self,
        code: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.bound()?.associate_access_code(code, grant, app).await
    }

    async fn associate_access_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.bound()?.associate_access_token(token, grant, app).await
    }

    async fn associate_refresh_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.bound()?.associate_refresh_token(token, grant, app).await
    }

    async fn resolve_access_code(
        &self,
        code: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        self.bound()?.resolve_access_code(code, app).await
    }

    async fn resolve_access_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        self.bound()?.resolve_access_token(token, app).await
    }

    async fn resolve_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        self.bound()?.resolve_refresh_token(token, app).await
    }

    async fn revoke_access_code(&self, code: &str, app: &AppContext) -> Result<(), BackendError> {
        self.bound()?.revoke_access_code(code, app).await
    }

    async fn revoke_access_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.bound()?.revoke_access_token(token, app).await
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.bound()?.revoke_refresh_token(token, app).await
    }

    async fn get_redirection_uri(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<String, BackendError> {
        self.bound()?.get_redirection_uri(client_id, app).await
    }

    async fn verify_redirection_uri(
        &self,
        client: &Identity,
        redirection_uri: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        self.bound()?
            .verify_redirection_uri(client, redirection_uri, app)
            .await
    }

    async fn verify_client_scope(
        &self,
        client: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        self.bound()?
            .verify_client_scope(client, requested, app)
            .await
    }

    async fn verify_resowner_scope(
        &self,
        owner: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        self.bound()?
            .verify_resowner_scope(owner, requested, app)
            .await
    }

    async fn verify_scope(
        &self,
        valid: &Scope,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        self.bound()?.verify_scope(valid, requested, app).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2_core::TokenKind;
    use oauth2_storage_memory::MemoryBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn unconfigured_dispatcher_reports_not_configured() {
        let dispatcher = Dispatcher::unconfigured();
        let app = dispatcher.default_context();
        assert!(!dispatcher.is_configured());

        let err = dispatcher
            .authenticate_client("web", "secret", &app)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::NotConfigured);
        assert!(!err.is_domain());

        let grant = GrantContext::issued(
            TokenKind::AccessToken,
            Identity::client("web"),
            None,
            Scope::parse("read"),
        );
        assert_eq!(
            dispatcher
                .associate_access_token("tok", &grant, &app)
                .await
                .unwrap_err(),
            BackendError::NotConfigured
        );
        assert_eq!(
            dispatcher.healthcheck().await.unwrap_err(),
            BackendError::NotConfigured
        );
    }

    #[tokio::test]
    async fn forwards_errors_unchanged() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryBackend::new()));
        let app = AppContext::default();
        assert_eq!(
            dispatcher
                .resolve_refresh_token("missing", &app)
                .await
                .unwrap_err(),
            BackendError::NotFound
        );
        assert_eq!(
            dispatcher
                .verify_scope(&Scope::parse("read"), &Scope::parse("admin"), &app)
                .await
                .unwrap_err(),
            BackendError::BadScope
        );
    }

    #[tokio::test]
    async fn clones_share_the_bound_backend() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryBackend::new()));
        let clone = dispatcher.clone();
        let app = AppContext::default();

        let client = Client::new(
            "web".to_string(),
            "s3cret".to_string(),
            vec!["https://app.example.com/cb".to_string()],
            Scope::parse("read"),
            "Web".to_string(),
        );
        dispatcher.register_client(&client, &app).await.unwrap();

        assert_eq!(
            clone.get_client_identity("web", &app).await.unwrap(),
            Identity::client("web")
        );
    }

    #[tokio::test]
    async fn from_config_without_url_is_unconfigured() {
        let config = Config::from_hocon_str("backend { default_tenant = \"acme\" }").unwrap();
        let dispatcher = Dispatcher::from_config(&config).await.unwrap();
        assert!(!dispatcher.is_configured());
        assert_eq!(dispatcher.default_context().tenant, "acme");
    }
}
