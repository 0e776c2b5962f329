use oauth2_core::{
    AppContext, BackendError, Client, ErrorClass, GrantContext, Identity, ResourceOwner, Scope,
    TokenKind,
};
use oauth2_ports::Backend;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn app() -> AppContext {
    AppContext::for_tenant("contract")
}

fn web_client() -> Client {
    Client::new(
        "web".to_string(),
        "s3cret".to_string(),
        vec![
            "https://app.example.com/cb".to_string(),
            "https://app.example.com/alt".to_string(),
        ],
        Scope::parse("read write"),
        "Web app".to_string(),
    )
}

fn grant(kind: TokenKind, client: &str, owner: Option<&Identity>, scope: &str) -> GrantContext {
    GrantContext::issued(
        kind,
        Identity::client(client),
        owner.cloned(),
        Scope::parse(scope),
    )
}

/// A contract test suite that every `Backend` must satisfy.
///
/// This keeps backend parity honest (memory, SQLx, Mongo, and any future backends).
/// The backend must start empty.
pub async fn run_backend_contract(backend: &dyn Backend) -> TestResult {
    backend.healthcheck().await?;

    let owner = provision(backend).await?;
    authentication(backend).await?;
    token_lifecycle(backend, &owner).await?;
    redirection_uris(backend).await?;
    scopes(backend, &owner).await?;
    sparse_records(backend).await?;
    concurrent_first_association(backend, &owner).await?;
    tenant_isolation(backend).await?;

    Ok(())
}

async fn provision(backend: &dyn Backend) -> Result<Identity, Box<dyn std::error::Error>> {
    let app = app();
    backend.register_client(&web_client(), &app).await?;

    let dup = backend.register_client(&web_client(), &app).await;
    assert!(
        matches!(dup, Err(BackendError::Conflict(_))),
        "registering the same client_id twice should conflict, got {dup:?}"
    );

    let alice = ResourceOwner::new(
        "alice".to_string(),
        "wonderland",
        "alice@example.com".to_string(),
        Scope::parse("read profile"),
    )?;
    backend.register_resource_owner(&alice, &app).await?;

    let dup_owner = ResourceOwner::new(
        "alice".to_string(),
        "other",
        "alice2@example.com".to_string(),
        Scope::parse("read"),
    )?;
    let dup = backend.register_resource_owner(&dup_owner, &app).await;
    assert!(
        matches!(dup, Err(BackendError::Conflict(_))),
        "registering the same username twice should conflict, got {dup:?}"
    );

    Ok(alice.identity())
}

async fn authentication(backend: &dyn Backend) -> TestResult {
    let app = app();

    let identity = backend
        .authenticate_username_password("alice", "wonderland", &app)
        .await?;
    assert_eq!(identity.username(), Some("alice"));

    // Wrong password and unknown user must stay distinguishable.
    assert_eq!(
        backend
            .authenticate_username_password("alice", "wrong", &app)
            .await
            .unwrap_err(),
        BackendError::BadPass
    );
    assert_eq!(
        backend
            .authenticate_username_password("bob", "wonderland", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    assert_eq!(
        backend.authenticate_client("web", "s3cret", &app).await?,
        Identity::client("web")
    );
    assert_eq!(
        backend
            .authenticate_client("web", "nope", &app)
            .await
            .unwrap_err(),
        BackendError::BadSecret
    );
    assert_eq!(
        backend
            .authenticate_client("mobile", "s3cret", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    assert_eq!(
        backend.get_client_identity("web", &app).await?,
        Identity::client("web")
    );
    assert_eq!(
        backend
            .get_client_identity("mobile", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    Ok(())
}

async fn token_lifecycle(backend: &dyn Backend, owner: &Identity) -> TestResult {
    let app = app();

    // Round-trip, including extensions.
    let access = grant(TokenKind::AccessToken, "web", Some(owner), "read")
        .with_extension("aud", serde_json::json!("api.example.com"));
    backend
        .associate_access_token("shared-value", &access, &app)
        .await?;
    assert_eq!(
        backend.resolve_access_token("shared-value", &app).await?,
        access
    );

    // Same string, other namespaces.
    let refresh = grant(TokenKind::RefreshToken, "web", Some(owner), "read write");
    backend
        .associate_refresh_token("shared-value", &refresh, &app)
        .await?;
    let code = grant(TokenKind::AccessCode, "web", Some(owner), "read")
        .with_extension("redirect_uri", serde_json::json!("https://app.example.com/cb"));
    backend
        .associate_access_code("shared-value", &code, &app)
        .await?;

    backend.revoke_access_token("shared-value", &app).await?;
    assert_eq!(
        backend
            .resolve_access_token("shared-value", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );
    assert_eq!(
        backend
            .resolve_access_token("shared-value", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound,
        "revocation must be permanent"
    );
    assert_eq!(
        backend.resolve_refresh_token("shared-value", &app).await?,
        refresh
    );
    assert_eq!(backend.resolve_access_code("shared-value", &app).await?, code);

    // Revoking twice succeeds; revoking something never associated does not.
    backend.revoke_access_token("shared-value", &app).await?;
    assert_eq!(
        backend
            .revoke_refresh_token("never-issued", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    // A revoked token cannot be brought back.
    let again = backend
        .associate_access_token("shared-value", &access, &app)
        .await;
    assert!(
        matches!(again, Err(BackendError::Conflict(_))),
        "re-associating a revoked token should conflict, got {again:?}"
    );

    // Re-associating a live token replaces its context.
    let replacement = grant(TokenKind::RefreshToken, "web", Some(owner), "read");
    backend
        .associate_refresh_token("shared-value", &replacement, &app)
        .await?;
    assert_eq!(
        backend.resolve_refresh_token("shared-value", &app).await?,
        replacement
    );

    backend.revoke_access_code("shared-value", &app).await?;
    assert_eq!(
        backend
            .resolve_access_code("shared-value", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    // Client-credentials grants carry no resource owner.
    let client_only = grant(TokenKind::AccessToken, "web", None, "write");
    backend
        .associate_access_token("client-only", &client_only, &app)
        .await?;
    let resolved = backend.resolve_access_token("client-only", &app).await?;
    assert_eq!(resolved.subject(), &Identity::client("web"));

    // Never associated.
    for kind in TokenKind::ALL {
        let err = match kind {
            TokenKind::AccessCode => backend.resolve_access_code("missing", &app).await,
            TokenKind::AccessToken => backend.resolve_access_token("missing", &app).await,
            TokenKind::RefreshToken => backend.resolve_refresh_token("missing", &app).await,
        }
        .unwrap_err();
        assert_eq!(err, BackendError::NotFound, "{kind} should be absent");
    }

    // Grants must reference records the backend knows.
    let dangling = grant(TokenKind::AccessToken, "mobile", None, "read");
    assert_eq!(
        backend
            .associate_access_token("dangling", &dangling, &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    Ok(())
}

async fn redirection_uris(backend: &dyn Backend) -> TestResult {
    let app = app();
    let web = Identity::client("web");

    assert_eq!(
        backend.get_redirection_uri("web", &app).await?,
        "https://app.example.com/cb"
    );
    assert_eq!(
        backend
            .get_redirection_uri("mobile", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    backend
        .verify_redirection_uri(&web, "https://app.example.com/alt", &app)
        .await?;
    assert_eq!(
        backend
            .verify_redirection_uri(&web, "https://evil.example.com/cb", &app)
            .await
            .unwrap_err(),
        BackendError::BadUri
    );
    // Exact match only.
    assert_eq!(
        backend
            .verify_redirection_uri(&web, "https://app.example.com/cb/extra", &app)
            .await
            .unwrap_err(),
        BackendError::BadUri
    );

    Ok(())
}

async fn scopes(backend: &dyn Backend, owner: &Identity) -> TestResult {
    let app = app();

    // Partial overlap narrows to the intersection.
    let narrowed = backend
        .verify_scope(
            &Scope::parse("read write"),
            &Scope::parse("read admin"),
            &app,
        )
        .await?;
    assert_eq!(narrowed, Scope::parse("read"));

    assert_eq!(
        backend
            .verify_scope(&Scope::parse("read write"), &Scope::parse("admin"), &app)
            .await
            .unwrap_err(),
        BackendError::BadScope
    );

    let web = Identity::client("web");
    assert_eq!(
        backend
            .verify_client_scope(&web, &Scope::parse("write admin"), &app)
            .await?,
        Scope::parse("write")
    );
    // An empty request is granted the client's full scope.
    assert_eq!(
        backend.verify_client_scope(&web, &Scope::new(), &app).await?,
        Scope::parse("read write")
    );
    assert_eq!(
        backend
            .verify_client_scope(owner, &Scope::parse("read"), &app)
            .await
            .unwrap_err(),
        BackendError::NotFound,
        "a resource owner is not a client"
    );

    assert_eq!(
        backend
            .verify_resowner_scope(owner, &Scope::parse("read write"), &app)
            .await?,
        Scope::parse("read")
    );
    assert_eq!(
        backend
            .verify_resowner_scope(owner, &Scope::parse("admin"), &app)
            .await
            .unwrap_err(),
        BackendError::BadScope
    );
    assert_eq!(
        backend
            .verify_resowner_scope(&web, &Scope::parse("read"), &app)
            .await
            .unwrap_err(),
        BackendError::NotFound,
        "a client is not a resource owner"
    );

    Ok(())
}

/// Records with no redirect URIs, no scope, or a disabled flag.
async fn sparse_records(backend: &dyn Backend) -> TestResult {
    let app = app();

    let bare = Client::new(
        "bare".to_string(),
        "s3cret".to_string(),
        Vec::new(),
        Scope::new(),
        "No URIs, no scope".to_string(),
    );
    backend.register_client(&bare, &app).await?;

    assert_eq!(
        backend.get_redirection_uri("bare", &app).await.unwrap_err(),
        BackendError::NotFound
    );
    assert_eq!(
        backend
            .verify_redirection_uri(&bare.identity(), "https://app.example.com/cb", &app)
            .await
            .unwrap_err(),
        BackendError::BadUri
    );

    for requested in [Scope::new(), Scope::parse("read")] {
        assert_eq!(
            backend
                .verify_client_scope(&bare.identity(), &requested, &app)
                .await
                .unwrap_err(),
            BackendError::BadScope,
            "a client without scope cannot be granted {requested:?}"
        );
    }

    let carol = ResourceOwner::new(
        "carol".to_string(),
        "no-scope",
        "carol@example.com".to_string(),
        Scope::new(),
    )?;
    backend.register_resource_owner(&carol, &app).await?;
    for requested in [Scope::new(), Scope::parse("read")] {
        assert_eq!(
            backend
                .verify_resowner_scope(&carol.identity(), &requested, &app)
                .await
                .unwrap_err(),
            BackendError::BadScope,
            "a resource owner without scope cannot be granted {requested:?}"
        );
    }

    // A disabled account looks absent, even with the right password.
    let mut mallory = ResourceOwner::new(
        "mallory".to_string(),
        "correct-horse",
        "mallory@example.com".to_string(),
        Scope::parse("read"),
    )?;
    mallory.enabled = false;
    backend.register_resource_owner(&mallory, &app).await?;
    assert_eq!(
        backend
            .authenticate_username_password("mallory", "correct-horse", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );
    assert_eq!(
        backend
            .authenticate_username_password("mallory", "wrong", &app)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    Ok(())
}

/// Several first-time associations of one fresh token all succeed.
async fn concurrent_first_association(backend: &dyn Backend, owner: &Identity) -> TestResult {
    let app = app();
    let first = grant(TokenKind::RefreshToken, "web", Some(owner), "read");
    let second = grant(TokenKind::RefreshToken, "web", Some(owner), "write");

    let (a, b, c, d) = tokio::join!(
        backend.associate_refresh_token("raced", &first, &app),
        backend.associate_refresh_token("raced", &second, &app),
        backend.associate_refresh_token("raced", &first, &app),
        backend.associate_refresh_token("raced", &second, &app),
    );
    for outcome in [a, b, c, d] {
        assert_eq!(outcome, Ok(()), "a live token must never look revoked");
    }

    let resolved = backend.resolve_refresh_token("raced", &app).await?;
    assert!(resolved == first || resolved == second);

    Ok(())
}

async fn tenant_isolation(backend: &dyn Backend) -> TestResult {
    let other = AppContext::for_tenant("contract-other");

    let err = backend
        .authenticate_client("web", "s3cret", &other)
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::NotFound);
    assert_eq!(err.class(), ErrorClass::NotFound);

    assert_eq!(
        backend
            .resolve_refresh_token("shared-value", &other)
            .await
            .unwrap_err(),
        BackendError::NotFound
    );

    // The same client_id can be registered independently per tenant.
    backend.register_client(&web_client(), &other).await?;
    backend
        .authenticate_client("web", "s3cret", &other)
        .await?;

    Ok(())
}
