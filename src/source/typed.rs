use super::{Row, RowStore};
use crate::datum::Value;
use crate::error::InputShapeError;

/// A statically shaped row type.
///
/// Object-to-row conversion lives with the caller; this trait is the seam the
/// engine reads through.
///
/// ```
/// use pgbulk::{BulkRow, Value};
///
/// struct Item {
///     id: i64,
///     name: String,
/// }
///
/// impl BulkRow for Item {
///     fn fields() -> &'static [&'static str] {
///         &["id", "name"]
///     }
///
///     fn values(&self) -> Vec<Value> {
///         vec![self.id.into(), self.name.clone().into()]
///     }
///
///     fn set_field(&mut self, field: &str, value: Value) -> bool {
///         match (field, i64::try_from(value)) {
///             ("id", Ok(id)) => {
///                 self.id = id;
///                 true
///             }
///             _ => false,
///         }
///     }
/// }
/// ```
pub trait BulkRow {
    /// Field names, in the order [`values`](BulkRow::values) returns them.
    fn fields() -> &'static [&'static str];

    /// The row's values, aligned with [`fields`](BulkRow::fields).
    fn values(&self) -> Vec<Value>;

    /// Receives a generated value (typically an identity) for `field`.
    ///
    /// Returns false if the field cannot be written. The default accepts nothing.
    fn set_field(&mut self, field: &str, value: Value) -> bool {
        let _ = (field, value);
        false
    }
}

pub(crate) struct TypedRows<'a, T> {
    fields: Vec<String>,
    rows: &'a mut [T],
}

impl<'a, T: BulkRow> TypedRows<'a, T> {
    pub(crate) fn new(rows: &'a mut [T]) -> Self {
        Self {
            fields: T::fields().iter().map(|f| f.to_string()).collect(),
            rows,
        }
    }
}

impl<T: BulkRow + Send> RowStore for TypedRows<'_, T> {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn row(&self, index: usize) -> Result<Row, InputShapeError> {
        let values = self.rows[index].values();
        if values.len() != self.fields.len() {
            return Err(InputShapeError::ValueCountMismatch {
                row: index as u64,
                expected: self.fields.len(),
                found: values.len(),
            });
        }
        Ok(values)
    }

    fn assign(&mut self, index: usize, field: &str, value: Value) -> bool {
        self.rows
            .get_mut(index)
            .is_some_and(|row| row.set_field(field, value))
    }
}
