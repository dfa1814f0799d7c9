//! The Adapter Registry (`spec.md` §4.5): owns the adapter map exclusively,
//! independent of RelayCore's Maildir/SQLite/Matcher ownership.

mod error;
#[allow(clippy::module_inception)]
mod registry;

pub use error::RegistryError;
pub use registry::AdapterRegistry;
