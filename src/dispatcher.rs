pub use oauth2_dispatcher::{
    bootstrap, create_backend, create_backend_with_metrics, BootstrapReport, Dispatcher,
    ObservedBackend,
};

/// Module path for the in-memory adapter.
pub use oauth2_dispatcher::memory;

/// Module path for the SQLx adapter.
pub use oauth2_dispatcher::sqlx;

/// Module path for the Mongo adapter.
#[cfg(feature = "mongo")]
pub use oauth2_dispatcher::mongo;
