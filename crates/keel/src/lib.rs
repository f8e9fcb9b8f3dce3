//! # keel
//!
//! Volume lifecycle management for the Keel volume daemon.
//!
//! This crate provides:
//! - Backend configuration schemas and the volume model
//! - The volume registry (in-memory and SQLite)
//! - Host mount integration and per-backend mounters
//! - The lifecycle controller serving the plugin and admin APIs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel::{BackendRegistry, LifecycleController, SqliteRegistry, SystemMount};
//!
//! let config = keel::DaemonConfig::default();
//! let registry = Arc::new(SqliteRegistry::open(&config.database_path()).await?);
//! let mount = Arc::new(SystemMount::new(config.operation_timeout()));
//! let backends = BackendRegistry::standard(mount, config.enable_smb);
//! let controller = LifecycleController::new(registry, backends, config.paths());
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod mount;
pub mod registry;
pub mod volume;

pub use backend::{BackendRegistry, Mounter};
pub use config::DaemonConfig;
pub use controller::{Capabilities, LifecycleController, ReconcileReport};
pub use mount::{MountUtility, SystemMount};
pub use registry::{MemoryRegistry, Registry, SqliteRegistry};
pub use volume::{BackendConfig, BackendType, Volume};
