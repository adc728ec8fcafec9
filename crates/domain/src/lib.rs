//! Shared domain types for the Reflector pipeline.
//!
//! Every other crate in the workspace depends on this one: the error enum,
//! the configuration tree, the transcript value types, and the DAG status
//! projection types all live here so that crate boundaries stay thin.

pub mod backoff;
pub mod config;
pub mod dag;
pub mod error;
pub mod transcript;

pub use backoff::Backoff;
pub use error::{Error, Result};
