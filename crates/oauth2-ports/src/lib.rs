//! Integration ports for the OAuth2 backend contract.
//!
//! Implement [`Backend`] in your own crate to plug in custom persistence or an
//! external identity system without forking.

pub mod backend;

pub use backend::*;
