mod common;

use rust_oauth2_backend::{
    config::Config,
    dispatcher::{create_backend, Dispatcher},
    models::ErrorClass,
    telemetry::{encode_prometheus_text, Metrics},
    AppContext, Backend, BackendError, Scope,
};

const CONFIG: &str = r#"
    backend {
      url = "memory:"
      default_tenant = "acme"
    }
    bootstrap {
      clients = [
        {
          client_id = "web"
          client_secret = "s3cret"
          redirect_uris = ["https://app.example.com/cb"]
          scope = "read write"
        }
      ]
      resource_owners = [
        { username = "alice", password = "wonderland", scope = "read" }
      ]
    }
"#;

#[tokio::test]
async fn dispatcher_from_config_binds_and_bootstraps() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_hocon_str(CONFIG)?;
    let dispatcher = Dispatcher::from_config(&config).await?;
    assert!(dispatcher.is_configured());

    let app = dispatcher.default_context();
    assert_eq!(app.tenant, "acme");

    dispatcher.healthcheck().await?;
    dispatcher.authenticate_client("web", "s3cret", &app).await?;
    let alice = dispatcher
        .authenticate_username_password("alice", "wonderland", &app)
        .await?;
    assert_eq!(
        dispatcher
            .verify_resowner_scope(&alice, &Scope::parse("read write"), &app)
            .await?,
        Scope::parse("read")
    );

    // Seeds went to the configured default tenant only.
    assert_eq!(
        dispatcher
            .authenticate_client("web", "s3cret", &AppContext::default())
            .await
            .unwrap_err(),
        BackendError::NotFound
    );
    Ok(())
}

#[tokio::test]
async fn unconfigured_dispatcher_is_distinct_from_not_found() {
    let config = Config::from_hocon_str("backend {}").expect("config");
    let dispatcher = Dispatcher::from_config(&config).await.expect("dispatcher");
    let app = dispatcher.default_context();

    let err = dispatcher
        .resolve_access_token("anything", &app)
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::NotConfigured);
    assert_ne!(err, BackendError::NotFound);
    assert_eq!(err.class(), ErrorClass::Wiring);
    assert_eq!(err.code(), "not_configured");
}

#[tokio::test]
async fn dispatcher_satisfies_the_backend_contract() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_hocon_str("backend { url = \"memory:\" }")?;
    let dispatcher = Dispatcher::from_config(&config).await?;
    common::run_backend_contract(&dispatcher).await
}

#[tokio::test]
async fn dispatcher_counts_calls_when_metrics_are_attached() -> Result<(), Box<dyn std::error::Error>>
{
    let metrics = Metrics::new()?;
    let config = Config::from_hocon_str(CONFIG)?;
    let dispatcher = Dispatcher::from_config_with_metrics(&config, metrics.clone()).await?;
    let app = dispatcher.default_context();

    let _ = dispatcher.authenticate_client("web", "wrong", &app).await;
    let _ = dispatcher.authenticate_client("web", "s3cret", &app).await;

    let bad_secret = metrics
        .backend_calls_total
        .with_label_values(&["authenticate_client", "badsecret"])
        .get();
    let ok = metrics
        .backend_calls_total
        .with_label_values(&["authenticate_client", "ok"])
        .get();
    assert_eq!((bad_secret, ok), (1, 1));

    let text = String::from_utf8(encode_prometheus_text(&metrics.registry)?)?;
    assert!(text.contains("oauth2_backend_call_duration_seconds"));
    Ok(())
}

#[tokio::test]
async fn factory_selects_sqlite_by_scheme() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("factory.db").display()
    );
    let config = Config::from_hocon_str(&format!("backend {{ url = \"{url}\" }}"))?;

    let backend = create_backend(&config.backend)
        .await?
        .ok_or_else(|| std::io::Error::other("sqlite url should configure a backend"))?;
    backend.healthcheck().await?;
    common::run_backend_contract(backend.as_ref()).await
}

#[tokio::test]
async fn factory_rejects_mongo_without_feature() {
    // This test intentionally runs only when the `mongo` feature is NOT enabled.
    // It ensures we fail fast with a clear error message.
    #[cfg(not(feature = "mongo"))]
    {
        let config = Config::from_hocon_str(
            "backend { url = \"mongodb://localhost:27017/oauth2_test\" }",
        )
        .expect("config");
        let err = create_backend(&config.backend)
            .await
            .err()
            .expect("should error when mongo backend requested without feature");

        assert_eq!(err.class(), ErrorClass::Wiring);
        assert!(
            err.to_string().contains("built without the `mongo` feature"),
            "unexpected error: {err}"
        );
    }

    // When `mongo` is enabled, this test becomes a no-op to avoid requiring a live Mongo instance.
    #[cfg(feature = "mongo")]
    {
        // nothing
    }
}
