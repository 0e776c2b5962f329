//! Backend selection and dispatch.
//!
//! [`create_backend`] picks an implementation from the configured URL scheme and
//! wraps it with `ObservedBackend` for tracing. [`Dispatcher`] is the value
//! callers hold: it forwards every operation to the bound backend, or fails with
//! `NotConfigured` when none was bound.

mod bootstrap;
mod dispatcher;
mod factory;

pub use bootstrap::{bootstrap, BootstrapReport};
pub use dispatcher::Dispatcher;
pub use factory::{create_backend, create_backend_with_metrics};

pub use oauth2_observability::{Metrics, ObservedBackend};
pub use oauth2_ports::{Backend, DynBackend};

/// Module path for the in-memory adapter.
pub mod memory {
    pub use oauth2_storage_memory::MemoryBackend;
}

/// Module path for the SQLx adapter.
pub mod sqlx {
    pub use oauth2_storage_sqlx::SqlxBackend;
}

/// Module path for the Mongo adapter.
#[cfg(feature = "mongo")]
pub mod mongo {
    pub use oauth2_storage_mongo::MongoBackend;
}
