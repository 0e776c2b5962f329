pub use oauth2_ports::{Backend, DynBackend};
