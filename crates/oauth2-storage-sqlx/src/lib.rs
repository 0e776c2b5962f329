//! SQL-backed implementation of the OAuth2 backend contract (SQLite/Postgres) using SQLx.

mod backend;
mod schema;

pub use backend::SqlxBackend;
