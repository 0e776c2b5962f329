use async_trait::async_trait;
use std::future::Future;
use std::time::Instant;
use tracing::{field, Instrument, Span};

use oauth2_core::{
    AppContext, BackendError, Client, GrantContext, Identity, ResourceOwner, Scope,
};
use oauth2_ports::{Backend, DynBackend};

use crate::metrics::Metrics;
use crate::telemetry::annotate_span_with_trace_ids;

/// A thin wrapper around a `DynBackend` that creates a tracing span for each backend call.
///
/// Domain outcomes (`notfound`, `badpass`, ...) are logged at debug level; storage
/// and wiring failures at error level. Errors pass through unchanged. When
/// [`Metrics`] are attached, every call is counted by operation and outcome.
pub struct ObservedBackend {
    inner: DynBackend,
    db_system: String,
    metrics: Option<Metrics>,
}

impl ObservedBackend {
    pub fn new(inner: DynBackend, db_system: String) -> Self {
        Self {
            inner,
            db_system,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn db_system(&self) -> &str {
        &self.db_system
    }

    fn span(&self, operation: &'static str, app: Option<&AppContext>) -> Span {
        let span = tracing::info_span!(
            "backend",
            trace_id = field::Empty,
            span_id = field::Empty,
            db_system = %self.db_system,
            db_operation = operation,
            tenant = field::Empty,
            client_id = field::Empty,
            username = field::Empty,
            token_prefix = field::Empty,
            token_len = field::Empty
        );
        if let Some(app) = app {
            span.record("tenant", app.tenant.as_str());
        }
        annotate_span_with_trace_ids(&span);
        span
    }

    fn token_span(&self, operation: &'static str, token: &str, app: &AppContext) -> Span {
        let span = self.span(operation, Some(app));
        span.record("token_prefix", Self::token_prefix(token).as_str());
        span.record("token_len", token.len());
        span
    }

    /// At most 8 characters and never more than half the token.
    fn token_prefix(token: &str) -> String {
        let shown = (token.chars().count() / 2).min(8);
        token.chars().take(shown).collect::<String>()
    }

    async fn observe<T, F>(
        &self,
        operation: &'static str,
        span: Span,
        call: F,
    ) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>> + Send,
    {
        let started = Instant::now();
        let result = call.instrument(span.clone()).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.code(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record(operation, outcome, started.elapsed());
        }

        span.in_scope(|| match &result {
            Ok(_) => {}
            Err(err) if err.is_domain() => {
                tracing::debug!(outcome, "backend call rejected: {}", err)
            }
            Err(err) => tracing::error!(outcome, "backend call failed: {}", err),
        });

        result
    }
}

#[async_trait]
impl Backend for ObservedBackend {
    async fn init(&self) -> Result<(), BackendError> {
        let span = self.span("init", None);
        self.observe("init", span, self.inner.init()).await
    }

    async fn healthcheck(&self) -> Result<(), BackendError> {
        let span = self.span("healthcheck", None);
        self.observe("healthcheck", span, self.inner.healthcheck())
            .await
    }

    async fn register_client(&self, client: &Client, app: &AppContext) -> Result<(), BackendError> {
        let span = self.span("register_client", Some(app));
        span.record("client_id", client.client_id.as_str());
        self.observe("register_client", span, self.inner.register_client(client, app))
            .await
    }

    async fn register_resource_owner(
        &self,
        owner: &ResourceOwner,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let span = self.span("register_resource_owner", Some(app));
        span.record("username", owner.username.as_str());
        self.observe(
            "register_resource_owner",
            span,
            self.inner.register_resource_owner(owner, app),
        )
        .await
    }

    async fn authenticate_username_password(
        &self,
        username: &str,
        password: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        let span = self.span("authenticate_username_password", Some(app));
        span.record("username", username);
        self.observe(
            "authenticate_username_password",
            span,
            self.inner
                .authenticate_username_password(username, password, app),
        )
        .await
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        let span = self.span("authenticate_client", Some(app));
        span.record("client_id", client_id);
        self.observe(
            "authenticate_client",
            span,
            self.inner.authenticate_client(client_id, client_secret, app),
        )
        .await
    }

    async fn get_client_identity(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<Identity, BackendError> {
        let span = self.span("get_client_identity", Some(app));
        span.record("client_id", client_id);
        self.observe(
            "get_client_identity",
            span,
            self.inner.get_client_identity(client_id, app),
        )
        .await
    }

    async fn associate_access_code(
        &self,
        code: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let span = self.token_span("associate_access_code", code, app);
        self.observe(
            "associate_access_code",
            span,
            self.inner.associate_access_code(code, grant, app),
        )
        .await
    }

    async fn associate_access_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let span = self.token_span("associate_access_token", token, app);
        self.observe(
            "associate_access_token",
            span,
            self.inner.associate_access_token(token, grant, app),
        )
        .await
    }

    async fn associate_refresh_token(
        &self,
        token: &str,
        grant: &GrantContext,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let span = self.token_span("associate_refresh_token", token, app);
        self.observe(
            "associate_refresh_token",
            span,
            self.inner.associate_refresh_token(token, grant, app),
        )
        .await
    }

    async fn resolve_access_code(
        &self,
        code: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        let span = self.token_span("resolve_access_code", code, app);
        self.observe(
            "resolve_access_code",
            span,
            self.inner.resolve_access_code(code, app),
        )
        .await
    }

    async fn resolve_access_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        let span = self.token_span("resolve_access_token", token, app);
        self.observe(
            "resolve_access_token",
            span,
            self.inner.resolve_access_token(token, app),
        )
        .await
    }

    async fn resolve_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<GrantContext, BackendError> {
        let span = self.token_span("resolve_refresh_token", token, app);
        self.observe(
            "resolve_refresh_token",
            span,
            self.inner.resolve_refresh_token(token, app),
        )
        .await
    }

    async fn revoke_access_code(&self, code: &str, app: &AppContext) -> Result<(), BackendError> {
        let span = self.token_span("revoke_access_code", code, app);
        self.observe(
            "revoke_access_code",
            span,
            self.inner.revoke_access_code(code, app),
        )
        .await
    }

    async fn revoke_access_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let span = self.token_span("revoke_access_token", token, app);
        self.observe(
            "revoke_access_token",
            span,
            self.inner.revoke_access_token(token, app),
        )
        .await
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let span = self.token_span("revoke_refresh_token", token, app);
        self.observe(
            "revoke_refresh_token",
            span,
            self.inner.revoke_refresh_token(token, app),
        )
        .await
    }

    async fn get_redirection_uri(
        &self,
        client_id: &str,
        app: &AppContext,
    ) -> Result<String, BackendError> {
        let span = self.span("get_redirection_uri", Some(app));
        span.record("client_id", client_id);
        self.observe(
            "get_redirection_uri",
            span,
            self.inner.get_redirection_uri(client_id, app),
        )
        .await
    }

    async fn verify_redirection_uri(
        &self,
        client: &Identity,
        redirection_uri: &str,
        app: &AppContext,
    ) -> Result<(), BackendError> {
        let span = self.span("verify_redirection_uri", Some(app));
        if let Some(client_id) = client.client_id() {
            span.record("client_id", client_id);
        }
        self.observe(
            "verify_redirection_uri",
            span,
            self.inner.verify_redirection_uri(client, redirection_uri, app),
        )
        .await
    }

    async fn verify_client_scope(
        &self,
        client: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        let span = self.span("verify_client_scope", Some(app));
        if let Some(client_id) = client.client_id() {
            span.record("client_id", client_id);
        }
        self.observe(
            "verify_client_scope",
            span,
            self.inner.verify_client_scope(client, requested, app),
        )
        .await
    }

    async fn verify_resowner_scope(
        &self,
        owner: &Identity,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        let span = self.span("verify_resowner_scope", Some(app));
        if let Some(username) = owner.username() {
            span.record("username", username);
        }
        self.observe(
            "verify_resowner_scope",
            span,
            self.inner.verify_resowner_scope(owner, requested, app),
        )
        .await
    }

    async fn verify_scope(
        &self,
        valid: &Scope,
        requested: &Scope,
        app: &AppContext,
    ) -> Result<Scope, BackendError> {
        let span = self.span("verify_scope", Some(app));
        self.observe(
            "verify_scope",
            span,
            self.inner.verify_scope(valid, requested, app),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2_storage_memory::MemoryBackend;
    use std::sync::Arc;

    fn observed(metrics: &Metrics) -> ObservedBackend {
        ObservedBackend::new(Arc::new(MemoryBackend::new()), "memory".to_string())
            .with_metrics(metrics.clone())
    }

    #[test]
    fn token_prefix_is_bounded() {
        assert_eq!(
            ObservedBackend::token_prefix("abcdefghijklmnopqrstuvwxyz"),
            "abcdefgh"
        );
        assert_eq!(ObservedBackend::token_prefix("a1b2c3d4e5"), "a1b2c");
        assert_eq!(ObservedBackend::token_prefix("x"), "");

        for token in ["short", "a1b2c3d4e5", "abcdefghijkl", "ünïcödé"] {
            let prefix = ObservedBackend::token_prefix(token);
            assert_ne!(prefix, token, "{token} recorded in full");
            assert!(prefix.chars().count() * 2 <= token.chars().count());
        }
    }

    #[tokio::test]
    async fn errors_pass_through_and_are_counted() {
        let metrics = Metrics::new().expect("metrics");
        let backend = observed(&metrics);
        let app = AppContext::default();

        let err = backend
            .resolve_access_token("missing", &app)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::NotFound);

        let counted = metrics
            .backend_calls_total
            .with_label_values(&["resolve_access_token", "notfound"])
            .get();
        assert_eq!(counted, 1);
    }

    #[tokio::test]
    async fn successful_calls_are_counted_as_ok() {
        let metrics = Metrics::new().expect("metrics");
        let backend = observed(&metrics);
        let app = AppContext::default();

        let valid: Scope = "read write".parse().unwrap();
        let requested: Scope = "read".parse().unwrap();
        let narrowed = backend.verify_scope(&valid, &requested, &app).await.unwrap();
        assert_eq!(narrowed, requested);

        let counted = metrics
            .backend_calls_total
            .with_label_values(&["verify_scope", "ok"])
            .get();
        assert_eq!(counted, 1);
        assert_eq!(backend.db_system(), "memory");
    }
}
