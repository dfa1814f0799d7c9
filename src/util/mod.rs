//! Shared identifier and utility types.
//!
//! Mirrors the organization of the teacher crate's `util` module: small,
//! dependency-light newtypes used across every other module.

mod id;

pub use id::EnvelopeId;
