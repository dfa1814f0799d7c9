//! Subject and pattern validation errors.

use thiserror::Error;

/// Subject or subscription pattern failed validation (`spec.md` §4.1, §7
/// `InvalidSubject`).
///
/// Raised synchronously; an invalid subject or pattern is never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidSubject {
    #[error("subject must not be empty")]
    Empty,

    #[error("subject token at position {0} is empty")]
    EmptyToken(usize),

    #[error("subject token {token:?} at position {position} contains a character outside [A-Za-z0-9_-]")]
    IllegalCharacter { position: usize, token: String },

    #[error("wildcard '*' is not allowed in a publish subject")]
    WildcardInPublish,

    #[error("wildcard '>' is not allowed in a publish subject")]
    TailWildcardInPublish,

    #[error("'>' must be the last token of a pattern")]
    TailWildcardNotLast,
}
