//! Maildir I/O errors.

use thiserror::Error;

use crate::util::EnvelopeId;

/// Maildir or filesystem I/O error (`spec.md` §7 `StorageError`).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to write envelope {id}: {source}")]
    Write {
        id: EnvelopeId,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename envelope {id} from {from} to {to}: {source}")]
    Rename {
        id: EnvelopeId,
        from: &'static str,
        to: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("envelope {0} not found in any maildir directory")]
    NotFound(EnvelopeId),

    #[error("maildir root {0} is not writable")]
    RootNotWritable(std::path::PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Storage errors are never transient from the caller's point of
    /// view — `publish` simply fails (`spec.md` §7).
    pub fn is_fatal_to_publish(&self) -> bool {
        matches!(self, StorageError::RootNotWritable(_))
    }
}
