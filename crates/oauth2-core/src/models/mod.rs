pub mod client;
pub mod context;
pub mod error;
pub mod grant;
pub mod identity;
pub mod scope;
pub mod user;

pub use client::*;
pub use context::*;
pub use error::*;
pub use grant::*;
pub use identity::*;
pub use scope::*;
pub use user::*;
