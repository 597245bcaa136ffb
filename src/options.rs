//! Per-call configuration.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::schema::ColumnMapping;

/// Default size at which encoded COPY data is handed to the connection.
pub const DEFAULT_FLUSH_BYTES: usize = 64 * 1024;

/// What happens to identity column values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityBehavior {
    /// The engine assigns identities on insert; nothing is read back.
    #[default]
    Ignore,
    /// Caller-supplied identity values are written as-is.
    KeepIdentity,
    /// Generated identities are read back into the source rows.
    ReturnIdentity,
}

/// Kind of staging relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingKind {
    /// Session-temporary table, dropped at commit at the latest.
    #[default]
    Temporary,
    /// Uniquely named unlogged table in the target's schema.
    Physical,
}

/// Strategy for [`OperationKind::Merge`](crate::plan::OperationKind::Merge).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeCommandKind {
    /// Update matched rows, then insert unmatched rows.
    #[default]
    Standard,
    /// `INSERT ... ON CONFLICT (...) DO UPDATE` keyed on a unique constraint.
    NativeUpsert,
}

/// Options for one bulk call.
///
/// Usually built in code:
///
/// ```
/// use pgbulk::{BulkOptions, IdentityBehavior};
///
/// let options = BulkOptions::new()
///     .identity(IdentityBehavior::ReturnIdentity)
///     .batch_size(std::num::NonZeroUsize::new(5_000).unwrap());
/// assert_eq!(options.batch_size.map(|n| n.get()), Some(5_000));
/// ```
///
/// but it also deserializes from an application's configuration, with every
/// field optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// Explicit source-to-column mapping; by-name matching when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<ColumnMapping>,
    /// Columns used to match staging rows to target rows; defaults to the
    /// primary key or the identity column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifiers: Option<Vec<String>>,
    /// Rows per batch; one batch when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<NonZeroUsize>,
    pub identity: IdentityBehavior,
    pub staging: StagingKind,
    pub merge: MergeCommandKind,
    /// Update/merge only rows whose values actually differ.
    pub changed_only: bool,
    /// Encoded bytes buffered before they are sent to the load channel.
    pub flush_bytes: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            mapping: None,
            qualifiers: None,
            batch_size: None,
            identity: IdentityBehavior::default(),
            staging: StagingKind::default(),
            merge: MergeCommandKind::default(),
            changed_only: false,
            flush_bytes: DEFAULT_FLUSH_BYTES,
        }
    }
}

impl BulkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn qualifiers<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.qualifiers = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn batch_size(mut self, rows: NonZeroUsize) -> Self {
        self.batch_size = Some(rows);
        self
    }

    pub fn identity(mut self, behavior: IdentityBehavior) -> Self {
        self.identity = behavior;
        self
    }

    pub fn staging(mut self, kind: StagingKind) -> Self {
        self.staging = kind;
        self
    }

    pub fn merge(mut self, kind: MergeCommandKind) -> Self {
        self.merge = kind;
        self
    }

    pub fn changed_only(mut self, enabled: bool) -> Self {
        self.changed_only = enabled;
        self
    }

    pub fn flush_bytes(mut self, bytes: usize) -> Self {
        self.flush_bytes = bytes;
        self
    }

    /// Rows per batch as a plain number; `usize::MAX` for a single batch.
    pub(crate) fn rows_per_batch(&self) -> usize {
        self.batch_size.map_or(usize::MAX, NonZeroUsize::get)
    }

    /// Flush threshold, never zero.
    pub(crate) fn flush_threshold(&self) -> usize {
        self.flush_bytes.max(1)
    }
}
