//! Error types for the composition library.

use thiserror::Error;

use crate::pcp::CompositionError;
use crate::usd::EditValidationError;

/// Main error type for layer, stage and editing operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Path text could not be parsed or is not the required kind of path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Prim or property name is not a valid identifier
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// No spec exists at the given path
    #[error("No spec at {path} in layer {layer}")]
    SpecNotFound { layer: String, path: String },

    /// A spec already exists where one was about to be created
    #[error("Spec already exists at {path} in layer {layer}")]
    SpecExists { layer: String, path: String },

    /// Field exists but holds a different kind of value
    #[error("Field {field} has type {actual}, expected {expected}")]
    FieldType {
        field: String,
        expected: String,
        actual: String,
    },

    /// Layer identifier is unknown to the registry
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// Layer refuses edits
    #[error("Layer is not editable: {0}")]
    LayerNotEditable(String),

    /// Namespace edit failed validation
    #[error("Invalid namespace edit: {0}")]
    InvalidEdit(#[from] EditValidationError),

    /// Composition failure surfaced as a hard error
    #[error("Composition error: {0}")]
    Composition(#[from] CompositionError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid path error.
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create a spec-not-found error.
    pub fn spec_not_found(layer: &str, path: impl std::fmt::Display) -> Self {
        Self::SpecNotFound {
            layer: layer.to_string(),
            path: path.to_string(),
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;
