//! # keel-common
//!
//! Shared utilities and types for the Keel volume daemon.
//!
//! This crate provides common functionality used across all Keel crates:
//! - Volume name validation and slug normalization
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;

pub use error::{ErrorKind, FieldError, KeelError, KeelResult};
pub use name::{VolumeName, slugify};
pub use paths::KeelPaths;
