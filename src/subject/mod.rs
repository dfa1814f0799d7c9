//! Subject validation and wildcard pattern matching (`spec.md` §4.1).
//!
//! Pure and stateless — no I/O, no shared state. This is the lowest leaf
//! in the component tree (`spec.md` §2) and every other module depends on
//! it rather than the other way around.

mod error;
mod matcher;
mod value;

pub use error::InvalidSubject;
pub use matcher::{compile_pattern, validate_subject, CompiledMatcher};
pub use value::Subject;
