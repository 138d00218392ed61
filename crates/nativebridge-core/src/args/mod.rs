//! Argument coercion.
//!
//! Application code hands the bridge loosely typed [`ArgValue`]s. Before a
//! call is issued they are coerced against an [`ArgumentSchema`] so that only
//! well-formed, wire-safe values reach the extension.

pub mod coerce;
pub mod schema;
pub mod value;

pub use coerce::{coerce, coerce_value, Coerced, CoercedArgs};
pub use schema::{ArgumentSchema, Predicate, SchemaEntry};
pub use value::{ArgValue, Function};

/// Why an argument list was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("Missing required argument '{name}' ({expected})")]
    Missing { name: String, expected: &'static str },

    #[error("Argument '{name}' ({expected}) must not be null")]
    InvalidNull { name: String, expected: &'static str },

    #[error("Argument '{name}' cannot be converted to {expected}: {detail}")]
    Conversion {
        name: String,
        expected: &'static str,
        detail: String,
    },

    #[error("Argument '{name}' ({expected}) rejected by validator")]
    Rejected { name: String, expected: &'static str },
}

impl ArgumentError {
    /// Name of the offending argument.
    pub fn argument(&self) -> &str {
        match self {
            ArgumentError::Missing { name, .. }
            | ArgumentError::InvalidNull { name, .. }
            | ArgumentError::Conversion { name, .. }
            | ArgumentError::Rejected { name, .. } => name,
        }
    }

    /// Kind the argument was expected to have.
    pub fn expected(&self) -> &'static str {
        match self {
            ArgumentError::Missing { expected, .. }
            | ArgumentError::InvalidNull { expected, .. }
            | ArgumentError::Conversion { expected, .. }
            | ArgumentError::Rejected { expected, .. } => expected,
        }
    }

    /// Short description without the argument name.
    pub(crate) fn detail(&self) -> String {
        match self {
            ArgumentError::Missing { .. } => "missing".to_string(),
            ArgumentError::InvalidNull { .. } => "null".to_string(),
            ArgumentError::Conversion { detail, .. } => detail.clone(),
            ArgumentError::Rejected { .. } => "rejected by validator".to_string(),
        }
    }
}
