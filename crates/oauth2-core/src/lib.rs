//! Framework-agnostic domain types for the OAuth2 backend contract.
//!
//! Everything a storage/identity backend exchanges with the protocol layer lives
//! here: identities, grant contexts, scopes, the per-call application context and
//! the error taxonomy shared by all backends.

pub mod models;

pub use models::*;
