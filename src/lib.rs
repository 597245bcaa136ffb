//! Bulk insert, update, delete and merge for PostgreSQL.
//!
//! Rows are streamed in binary `COPY` format into a per-batch staging table,
//! and one set-based statement then applies them to the target:
//!
//! ```text
//! RowSource ─> resolve ─> plan ─> for each batch:
//!                                   CREATE staging ─> COPY (binary) ─> driving SQL
//!                                   ─> identity write-back ─> DROP staging
//! ```
//!
//! Start with [`bulk`] or the [`BulkExt`] methods on a [`Connection`].

pub mod batch;
pub mod bulk;
pub mod conn;
pub mod datum;
pub mod encoder;
pub mod error;
pub mod identity;
pub mod options;
pub mod plan;
pub mod protocol;
pub mod schema;
pub mod source;
pub mod staging;

pub use bulk::{BulkExt, bulk};
pub use conn::{Connection, CopyIn, OwnedTransaction, TextRow};
pub use datum::{Type, Value, ValueConversionError};
pub use error::{
    BulkError, ColumnMappingError, EncodingError, EncodingErrorKind, EngineError,
    EngineExecutionError, InputShapeError, OperationPlanError, Stage,
};
pub use options::{BulkOptions, IdentityBehavior, MergeCommandKind, StagingKind};
pub use plan::OperationKind;
pub use schema::{ColumnMapping, TableName};
pub use source::{BulkRow, DataTable, DynamicRow, Row, RowSource, SourceKind};
