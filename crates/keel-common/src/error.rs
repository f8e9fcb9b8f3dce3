//! Common error types for Keel.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`KeelError`].
pub type KeelResult<T> = Result<T, KeelError>;

/// A single field-level validation failure.
///
/// Validation never stops at the first problem, so callers receive a list of
/// these and can render one message per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending field as it appears in the request (`exportPath`).
    pub field: String,
    /// Short rule identifier (`required`, `unknown`, `range`, `oneof`, ...).
    pub rule: String,
    /// Human readable explanation.
    pub message: String,
}

impl FieldError {
    /// Create a new field error.
    pub fn new(
        field: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Stable classification of a [`KeelError`].
///
/// Both the plugin protocol and the admin API map errors through this, so the
/// two reporting conventions never disagree on what kind of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input, including unsupported backends.
    Validation,
    /// The volume already exists.
    Conflict,
    /// The volume does not exist.
    NotFound,
    /// Attach or detach failed on the host.
    Backend,
    /// Anything else: registry, I/O, bugs.
    Internal,
}

/// Errors produced by Keel.
#[derive(Error, Diagnostic, Debug)]
pub enum KeelError {
    /// Volume name is not a canonical slug.
    #[error("Invalid volume name: '{name}'{}", suggestion_hint(.suggestion.as_deref()))]
    #[diagnostic(
        code(keel::volume::invalid_name),
        help("Volume names must be lowercase [a-z0-9_-] without repeated, leading or trailing separators")
    )]
    InvalidVolumeName {
        /// The rejected name.
        name: String,
        /// The canonical form of the name, when one exists.
        suggestion: Option<String>,
    },

    /// Request or backend configuration failed validation.
    #[error("Validation failed: {}", join_field_errors(.errors))]
    #[diagnostic(code(keel::validation))]
    Validation {
        /// Every failing field.
        errors: Vec<FieldError>,
    },

    /// Backend type is known but not available.
    #[error("Unsupported backend: {backend}")]
    #[diagnostic(
        code(keel::backend::unsupported),
        help("Supported backends are 'local' and 'nfs'; 'smb' must be enabled explicitly")
    )]
    UnsupportedBackend {
        /// The backend tag.
        backend: String,
    },

    /// A volume with this name already exists.
    #[error("Volume '{name}' already exists")]
    #[diagnostic(code(keel::volume::conflict))]
    Conflict {
        /// The duplicate name.
        name: String,
    },

    /// No volume with this name exists.
    #[error("Volume '{name}' not found")]
    #[diagnostic(code(keel::volume::not_found))]
    NotFound {
        /// The missing name.
        name: String,
    },

    /// Attaching backend storage failed.
    #[error("Failed to mount {}: {reason}", .target.display())]
    #[diagnostic(code(keel::backend::mount))]
    MountFailure {
        /// Mount target.
        target: PathBuf,
        /// Diagnostic from the mount utility.
        reason: String,
    },

    /// Detaching backend storage failed.
    #[error("Failed to unmount {}: {reason}", .target.display())]
    #[diagnostic(code(keel::backend::unmount))]
    UnmountFailure {
        /// Mount target.
        target: PathBuf,
        /// Diagnostic from the mount utility.
        reason: String,
    },

    /// Persistence failure.
    #[error("Registry error: {message}")]
    #[diagnostic(code(keel::registry))]
    Registry {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(keel::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(keel::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(keel::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(keel::internal),
        help("This is a bug, please report it at https://github.com/keel-volumes/keel/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl KeelError {
    /// Build a validation error from a single field failure.
    pub fn field(
        field: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            errors: vec![FieldError::new(field, rule, message)],
        }
    }

    /// Stable classification used by the transport adapters.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVolumeName { .. }
            | Self::Validation { .. }
            | Self::UnsupportedBackend { .. } => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::MountFailure { .. } | Self::UnmountFailure { .. } => ErrorKind::Backend,
            Self::Registry { .. }
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Config { .. }
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Field-level details, when this is a validation failure.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { errors } => errors,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for KeelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

fn suggestion_hint(suggestion: Option<&str>) -> String {
    suggestion
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = KeelError::NotFound {
            name: "data".to_string(),
        };
        assert_eq!(err.to_string(), "Volume 'data' not found");
    }

    #[test]
    fn validation_display_lists_fields() {
        let err = KeelError::Validation {
            errors: vec![
                FieldError::new("port", "required", "is required"),
                FieldError::new("version", "oneof", "must be one of: 3, 4"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Validation failed: port: is required; version: must be one of: 3, 4"
        );
        assert_eq!(err.field_errors().len(), 2);
    }

    #[test]
    fn invalid_name_suggests_slug() {
        let err = KeelError::InvalidVolumeName {
            name: "my--volume".into(),
            suggestion: Some("my-volume".into()),
        };
        assert_eq!(
            err.to_string(),
            "Invalid volume name: 'my--volume' (did you mean 'my-volume'?)"
        );
    }

    #[test]
    fn kinds() {
        assert_eq!(
            KeelError::UnsupportedBackend {
                backend: "smb".into()
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            KeelError::Conflict { name: "a".into() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            KeelError::UnmountFailure {
                target: "/mnt".into(),
                reason: "busy".into()
            }
            .kind(),
            ErrorKind::Backend
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KeelError = io_err.into();
        assert!(matches!(err, KeelError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
