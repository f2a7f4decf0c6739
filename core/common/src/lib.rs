//! Common utilities and types shared across Lockbox modules.
//!
//! This module provides the error taxonomy every layer reports through and
//! the small value types that cross crate boundaries.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ArtifactId, Secret};
