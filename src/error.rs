//! Error types for cifkit operations.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while reading, validating, mutating or writing
/// CIF data.
#[derive(Debug, Error)]
pub enum Error {
    /// Scanner or grammar violation; fatal to the current parse.
    #[error("parse error at line {line}: {message}")]
    Parse { line: u32, message: String },

    /// A tag or column name does not match the item-name grammar.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A value failed its type regex or enumeration, or a mandatory field
    /// is missing.
    #[error("when validating _{category}.{item}: {message}")]
    Validation {
        category: String,
        item: String,
        message: String,
    },

    /// A schema-level validation problem not tied to a single item.
    #[error("validation error: {0}")]
    Invalid(String),

    /// A write would leave a child row without a parent and cannot cascade.
    #[error("link violation: {0}")]
    LinkViolation(String),

    /// `find1` matched no row.
    #[error("no row in category {0} matches the condition")]
    NotFound(String),

    /// `find1` matched more than one row.
    #[error("multiple rows in category {0} match the condition")]
    Ambiguous(String),

    /// Underlying byte source or sink failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file contains no datablocks.
    #[error("file contains no datablocks")]
    EmptyFile,

    /// Top-level structure is not valid PDBx/mmCIF.
    #[error("not valid PDBx: {0}")]
    NotValidPdbx(String),

    /// A dictionary could not be located, read or interpreted.
    #[error("dictionary error: {0}")]
    Dictionary(String),

    /// An operation that requires a validator ran without one attached.
    #[error("no validator attached")]
    NoValidator,
}

impl Error {
    /// Create a parse error at a source line.
    pub fn parse(line: u32, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create a validation error with item context.
    pub fn validation(
        category: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            category: category.into(),
            item: item.into(),
            message: message.into(),
        }
    }

    /// Create a dictionary-load error.
    pub fn dictionary(message: impl Into<String>) -> Self {
        Self::Dictionary(message.into())
    }

    /// Create a link-violation error.
    pub fn link(message: impl Into<String>) -> Self {
        Self::LinkViolation(message.into())
    }
}
