//! Error types shared by the melt and SQL layers

use thiserror::Error;

/// A schema problem a store reports for a single insert.
///
/// These are retriable: the persister answers each one with a local DDL
/// correction and tries the same row again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaIssue {
    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("value of width {width} does not fit column '{column}'")]
    ValueTooWide { column: String, width: usize },

    #[error("value cannot be converted to the type of column '{column}'")]
    TypeMismatch { column: String },
}

impl SchemaIssue {
    pub fn column(&self) -> &str {
        match self {
            SchemaIssue::UnknownColumn { column }
            | SchemaIssue::ValueTooWide { column, .. }
            | SchemaIssue::TypeMismatch { column } => column,
        }
    }
}

/// Failure reported by a [`StoreDriver`](crate::sql::StoreDriver).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error(transparent)]
    Schema(#[from] SchemaIssue),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn other(message: impl Into<String>) -> Self {
        DriverError::Other(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid JSON input: {0}")]
    Input(#[from] serde_json::Error),

    #[error("invalid JSON input: {0}")]
    InputBytes(#[from] simd_json::Error),

    #[error("invalid JSON input: nested deeper than {limit} levels")]
    InputTooDeep { limit: usize },

    #[error("unsupported value in entity '{entity}': {reason}")]
    UnsupportedValue { entity: String, reason: String },

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("persisting table '{table}'{}: {source}", row_suffix(.row))]
    Persistence {
        table: String,
        row: Option<u64>,
        #[source]
        source: DriverError,
    },

    #[error("row {row} of table '{table}' still failing after {attempts} schema adjustments: {last}")]
    RetriesExhausted {
        table: String,
        row: u64,
        attempts: usize,
        last: SchemaIssue,
    },
}

fn row_suffix(row: &Option<u64>) -> String {
    match row {
        Some(row) => format!(" (row {})", row),
        None => String::new(),
    }
}

impl ConvertError {
    pub(crate) fn consistency(message: impl Into<String>) -> Self {
        ConvertError::Consistency(message.into())
    }

    pub(crate) fn persistence(table: &str, row: Option<u64>, source: DriverError) -> Self {
        ConvertError::Persistence {
            table: table.to_string(),
            row,
            source,
        }
    }
}

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;
