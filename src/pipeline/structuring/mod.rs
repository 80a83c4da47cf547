//! Raw extraction → `CanonicalReport`.
//!
//! Infallible by construction: every malformed or missing field is either
//! defaulted or dropped with a `warn!`.

pub mod types;
pub mod dates;
pub mod test_results;
pub mod normalizer;

pub use types::*;
pub use dates::*;
pub use test_results::*;
pub use normalizer::*;
