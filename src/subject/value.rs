//! The validated [`Subject`] newtype.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::InvalidSubject;
use super::matcher::validate_subject;

/// A subject string that has already passed [`validate_subject`] and may
/// safely be used to address a publish or a `reply_to` (never contains
/// wildcards). Subscription patterns are represented separately by
/// [`super::CompiledMatcher`], since they are allowed to carry wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Parse and validate a subject for publishing (wildcards rejected).
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidSubject> {
        let raw = raw.into();
        validate_subject(&raw, false)?;
        Ok(Self(raw))
    }

    /// Borrow the subject as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-delimited tokens.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
