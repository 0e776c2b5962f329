use oauth2_config::BootstrapConfig;
use oauth2_core::{AppContext, BackendError, Client, ResourceOwner, Scope};
use oauth2_ports::Backend;

/// What [`bootstrap`] did with the configured seeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub registered: usize,
    pub skipped: usize,
}

/// Register configured clients and resource owners.
///
/// Seeds without a tenant go to `default_tenant`. Records that already exist
/// (`Conflict`) are skipped, so running this on every start is safe.
pub async fn bootstrap(
    backend: &dyn Backend,
    seeds: &BootstrapConfig,
    default_tenant: &str,
) -> Result<BootstrapReport, BackendError> {
    let mut report = BootstrapReport::default();

    for seed in &seeds.clients {
        let app = AppContext::for_tenant(seed.tenant.as_deref().unwrap_or(default_tenant));
        let client = Client::new(
            seed.client_id.clone(),
            seed.client_secret.clone(),
            seed.redirect_uris.clone(),
            Scope::parse(&seed.scope),
            seed.name.clone().unwrap_or_else(|| seed.client_id.clone()),
        );
        match backend.register_client(&client, &app).await {
            Ok(()) => report.registered += 1,
            Err(BackendError::Conflict(_)) => {
                tracing::debug!(client_id = %seed.client_id, tenant = %app.tenant, "client already registered");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    for seed in &seeds.resource_owners {
        let app = AppContext::for_tenant(seed.tenant.as_deref().unwrap_or(default_tenant));
        let owner = ResourceOwner::new(
            seed.username.clone(),
            &seed.password,
            seed.email.clone(),
            Scope::parse(&seed.scope),
        )?;
        match backend.register_resource_owner(&owner, &app).await {
            Ok(()) => report.registered += 1,
            Err(BackendError::Conflict(_)) => {
                tracing::debug!(username = %seed.username, tenant = %app.tenant, "resource owner already registered");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        registered = report.registered,
        skipped = report.skipped,
        "bootstrap complete"
    );
    Ok(report)
}
