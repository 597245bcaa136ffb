//! Row sources.
//!
//! Four input shapes are accepted and normalized behind [`RowSource`]:
//!
//! | Shape      | Constructor              | Fields from            | Write-back |
//! |------------|--------------------------|------------------------|------------|
//! | typed      | [`RowSource::typed`]     | [`BulkRow::fields`]    | via setter |
//! | dynamic    | [`RowSource::dynamic`]   | first row              | yes        |
//! | tabular    | [`RowSource::table`]     | [`DataTable`] columns  | yes        |
//! | stream     | [`RowSource::stream`]    | declared up front      | no         |
//!
//! The engine reads a source exactly once, front to back, through a
//! [`RowCursor`]. Streams are pulled one row at a time and never buffered.

mod cursor;
mod dynamic;
mod table;
mod typed;

use std::collections::HashMap;

use futures_util::stream::BoxStream;

use crate::datum::Value;
use crate::error::InputShapeError;

pub use cursor::RowCursor;
pub use table::DataTable;
pub use typed::BulkRow;

/// One row, with values aligned to the source's field list.
pub type Row = Vec<Value>;

/// A dynamic row: field name to value.
pub type DynamicRow = HashMap<String, Value>;

/// Random-access row storage shared by the addressable source shapes.
pub(crate) trait RowStore: Send {
    /// Field names, in the order values are returned by [`row`](RowStore::row).
    fn fields(&self) -> &[String];

    fn len(&self) -> usize;

    /// Returns a copy of the row at `index`, aligned with [`fields`](RowStore::fields).
    fn row(&self, index: usize) -> Result<Row, InputShapeError>;

    /// Writes `value` into `field` of the row at `index`.
    ///
    /// Returns false when the row cannot receive the value.
    fn assign(&mut self, index: usize, field: &str, value: Value) -> bool;
}

/// A forward-only stream of rows with a declared field list.
pub(crate) struct RowStream<'a> {
    pub(crate) fields: Vec<String>,
    pub(crate) rows: BoxStream<'a, Row>,
}

/// Input to a bulk operation.
pub struct RowSource<'a> {
    pub(crate) inner: SourceInner<'a>,
}

pub(crate) enum SourceInner<'a> {
    /// Typed rows, dynamic maps or a data table: indexable, writable.
    Addressable(Box<dyn RowStore + 'a>),
    /// A forward-only stream.
    Stream(RowStream<'a>),
}

/// Which input shape a source was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Addressable,
    Stream,
}

impl<'a> RowSource<'a> {
    /// Rows of a type implementing [`BulkRow`].
    pub fn typed<T: BulkRow + Send>(rows: &'a mut [T]) -> Self {
        RowSource::addressable(Box::new(typed::TypedRows::new(rows)))
    }

    /// Property maps. Field names come from the first row and every other row
    /// must carry the same set.
    pub fn dynamic(rows: &'a mut [DynamicRow]) -> Self {
        RowSource::addressable(Box::new(dynamic::DynamicRows::new(rows)))
    }

    /// An in-memory data table.
    pub fn table(table: &'a mut DataTable) -> Self {
        RowSource::addressable(Box::new(table::TableRows::new(table)))
    }

    /// A forward-only stream of rows whose values follow `fields`.
    ///
    /// Generated identities cannot be written back into a stream.
    pub fn stream<I, S>(fields: I, rows: BoxStream<'a, Row>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: SourceInner::Stream(RowStream {
                fields: fields.into_iter().map(Into::into).collect(),
                rows,
            }),
        }
    }

    fn addressable(store: Box<dyn RowStore + 'a>) -> Self {
        Self {
            inner: SourceInner::Addressable(store),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match &self.inner {
            SourceInner::Addressable(_) => SourceKind::Addressable,
            SourceInner::Stream(_) => SourceKind::Stream,
        }
    }

    /// Field names discoverable from the source.
    pub fn fields(&self) -> &[String] {
        match &self.inner {
            SourceInner::Addressable(store) => store.fields(),
            SourceInner::Stream(stream) => &stream.fields,
        }
    }

    /// Number of rows, when known without consuming the source.
    pub fn len_hint(&self) -> Option<usize> {
        match &self.inner {
            SourceInner::Addressable(store) => Some(store.len()),
            SourceInner::Stream(_) => None,
        }
    }

    /// Wraps the source in a single-pass cursor.
    pub fn into_cursor(self) -> RowCursor<'a> {
        RowCursor::new(self)
    }
}

/// Returns an error if `fields` is empty or contains a duplicate name.
pub(crate) fn check_fields(fields: &[String]) -> Result<(), InputShapeError> {
    if fields.is_empty() {
        return Err(InputShapeError::NoFields);
    }
    for (i, name) in fields.iter().enumerate() {
        if fields[..i].contains(name) {
            return Err(InputShapeError::DuplicateField { name: name.clone() });
        }
    }
    Ok(())
}
