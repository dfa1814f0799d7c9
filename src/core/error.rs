//! RelayCore error types (`spec.md` §7).

use thiserror::Error;

use crate::maildir::StorageError;
use crate::registry::RegistryError;
use crate::store::IndexError;
use crate::subject::InvalidSubject;

/// Errors surfaced synchronously from [`super::RelayCore`] public
/// operations. Everything else (adapter delivery failures, outbound
/// webhook retries) happens asynchronously after `publish` has already
/// resolved, and is reported via metrics/logging/dead-letter subjects
/// instead (`spec.md` §7 "Propagation policy").
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    InvalidSubject(#[from] InvalidSubject),

    #[error("maildir storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index store error: {0}")]
    Index(#[from] IndexError),

    #[error("relay is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("adapter {0} inbox saturated, delivery rejected")]
    Backpressure(String),

    #[error("adapter registry error: {0}")]
    Registry(#[from] RegistryError),
}
