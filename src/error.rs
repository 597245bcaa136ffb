//! Error taxonomy for bulk operations.
//!
//! The first four kinds are detected before the target table is touched and are
//! never retried. [`EngineExecutionError`] means the destination engine rejected
//! a statement; the enclosing transaction is aborted and the error propagated.

use std::fmt;

use crate::datum::Type;
use crate::plan::OperationKind;

/// Top-level error returned by every bulk operation.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error(transparent)]
    InputShape(#[from] InputShapeError),
    #[error(transparent)]
    ColumnMapping(#[from] ColumnMappingError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    OperationPlan(#[from] OperationPlanError),
    #[error(transparent)]
    EngineExecution(#[from] EngineExecutionError),
}

impl BulkError {
    /// Returns the SQLSTATE reported by the engine, if this is an engine error.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            BulkError::EngineExecution(e) => e.source.code(),
            _ => None,
        }
    }
}

/// The row source is structurally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputShapeError {
    /// The source exposes no fields at all.
    #[error("row source exposes no fields")]
    NoFields,
    /// The same field name appears twice in the source's field list.
    #[error("field \"{name}\" appears more than once in the row source")]
    DuplicateField { name: String },
    /// A dynamic row carries a different field set than the first row.
    #[error("row {row} has fields {found:?}, expected the same fields as row 0 {expected:?}")]
    FieldSetMismatch {
        row: u64,
        expected: Vec<String>,
        found: Vec<String>,
    },
    /// A tabular or streamed row has the wrong number of values.
    #[error("row {row} has {found} values, expected {expected}")]
    ValueCountMismatch {
        row: u64,
        expected: usize,
        found: usize,
    },
}

/// A column, field or qualifier could not be resolved against the target table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColumnMappingError {
    #[error("invalid table name {name:?}")]
    InvalidTableName { name: String },
    #[error("table {table} does not exist")]
    TableNotFound { table: String },
    #[error("column \"{column}\" does not exist on table {table}")]
    UnknownColumn { table: String, column: String },
    #[error("mapped source field \"{field}\" does not exist in the row source")]
    UnknownField { field: String },
    #[error("column \"{column}\" is mapped more than once")]
    DuplicateColumn { column: String },
    #[error("column \"{column}\" is generated and cannot be written")]
    GeneratedColumn { column: String },
    #[error("no source field matches a column of table {table}")]
    NoColumns { table: String },
    #[error("qualifier \"{column}\" is not one of the mapped columns")]
    UnknownQualifier { column: String },
    #[error("table {table} has no mapped primary key or identity column; supply qualifiers")]
    NoQualifier { table: String },
    #[error("table {table} has no identity column to return")]
    NoIdentity { table: String },
    #[error("identity column \"{column}\" has no source field to receive generated values")]
    IdentityNotMapped { column: String },
}

/// A value could not be framed for the binary load channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("column \"{column}\", row {row}: {kind}")]
pub struct EncodingError {
    /// Destination column name.
    pub column: String,
    /// Absolute ordinal of the row within the source (0-based).
    pub row: u64,
    pub kind: EncodingErrorKind,
}

/// Why a value could not be encoded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodingErrorKind {
    #[error("cannot encode {found} value as {expected}")]
    TypeMismatch { expected: Type, found: &'static str },
    #[error("value out of range for {target}")]
    Overflow { target: Type },
    #[error("invalid {target} value: {reason}")]
    InvalidValue { target: Type, reason: String },
    #[error("column type {type_name} is not supported by the binary encoder")]
    Unsupported { type_name: String },
    #[error("value exceeds the maximum field length")]
    TooLarge,
    #[error("null value for a NOT NULL column")]
    NullNotAllowed,
}

/// The requested operation cannot be planned for the resolved shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationPlanError {
    #[error("{operation} requires at least one qualifier column")]
    EmptyQualifiers { operation: OperationKind },
    #[error("update of {table} has no non-qualifier columns to set")]
    NothingToUpdate { table: String },
    #[error("insert into {table} has no writable columns; only identity columns are mapped")]
    NothingToInsert { table: String },
    #[error(
        "native upsert on {table} cannot return generated identities: qualifier \"{column}\" is the identity column; use the standard merge or KeepIdentity"
    )]
    IdentityQualifiedUpsert { table: String, column: String },
    #[error("qualifiers {qualifiers:?} do not match a primary key or unique constraint of {table}")]
    NoMatchingConstraint {
        table: String,
        qualifiers: Vec<String>,
    },
}

/// Error reported by a [`Connection`](crate::conn::Connection) implementation.
#[derive(Debug)]
pub struct EngineError {
    message: String,
    code: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    /// Creates an error from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Wraps a driver error.
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: source.to_string(),
            code: None,
            source: Some(Box::new(source)),
        }
    }

    /// Replaces the display message, keeping the source.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attaches a SQLSTATE code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Returns the SQLSTATE code, if the driver reported one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Pipeline stage during which the engine rejected a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Catalog,
    Begin,
    CreateStaging,
    Load,
    Execute,
    DropStaging,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Catalog => "catalog lookup",
            Stage::Begin => "begin",
            Stage::CreateStaging => "staging create",
            Stage::Load => "binary load",
            Stage::Execute => "driving statement",
            Stage::DropStaging => "staging drop",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// The destination engine rejected a statement.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed during {stage}{}: {source}", batch_suffix(.batch))]
pub struct EngineExecutionError {
    pub operation: OperationKind,
    pub stage: Stage,
    /// 0-based batch ordinal, when the failure belongs to a batch.
    pub batch: Option<usize>,
    /// The statement that failed, shortened for display.
    pub statement: String,
    #[source]
    pub source: EngineError,
}

fn batch_suffix(batch: &Option<usize>) -> String {
    batch.map(|b| format!(" of batch {}", b)).unwrap_or_default()
}

const STATEMENT_EXCERPT: usize = 256;

impl EngineExecutionError {
    pub fn new(
        operation: OperationKind,
        stage: Stage,
        batch: Option<usize>,
        statement: &str,
        source: EngineError,
    ) -> Self {
        Self {
            operation,
            stage,
            batch,
            statement: excerpt(statement),
            source,
        }
    }
}

fn excerpt(statement: &str) -> String {
    if statement.len() <= STATEMENT_EXCERPT {
        return statement.to_string();
    }
    let mut end = STATEMENT_EXCERPT;
    while !statement.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &statement[..end])
}
