/* 📖 # Why have pathway_base as a core library?
pathway_base provides the error type and tracing setup used across all crates,
so the vfs library and the cli report failures the same way.
*/

pub mod error;
mod error_tests;
pub mod tracing;

pub use error::{ErrorKind, PathwayError, PathwayResult, ResultExt};
