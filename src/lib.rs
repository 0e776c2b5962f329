//! Library exports.
//!
//! The root crate re-exports the workspace crates under stable module paths so
//! applications depend on one crate:
//! - `models`: identities, grants, scopes and the error taxonomy
//! - `backend`: the capability contract every backend implements
//! - `dispatcher`: backend selection, bootstrap and the [`Dispatcher`]
//! - `config` / `telemetry`: ambient setup

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod models;
pub mod telemetry;

pub use backend::{Backend, DynBackend};
pub use dispatcher::Dispatcher;
pub use models::{AppContext, BackendError, GrantContext, Identity, Scope, TokenKind};
