//! Shared primitives for the bmclust workspace.
//!
//! `bmclust-core` provides the foundation the estimation crates build on:
//!
//! - **Error types** — [`BmclustError`] and [`Result`] for structured error handling
//! - **Traits** — small cross-crate abstractions like [`Scored`] and [`Summarizable`]

pub mod error;
pub mod traits;

pub use error::{BmclustError, Result};
pub use traits::*;
