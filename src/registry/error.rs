//! Adapter Registry error types (`spec.md` §4.5, §7).

use thiserror::Error;

use crate::adapter::AdapterError;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("adapter {0} is not registered")]
    NotFound(String),

    #[error("adapter {0} is already registered")]
    AlreadyRegistered(String),

    #[error("adapter {0} inbox saturated, delivery rejected")]
    Backpressure(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
