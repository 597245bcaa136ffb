use futures_util::StreamExt;

use super::{Row, RowSource, SourceInner, SourceKind, check_fields};
use crate::datum::Value;
use crate::error::InputShapeError;

/// Single-pass, peekable reader over a [`RowSource`].
///
/// The cursor tracks the absolute ordinal of every row it hands out so that
/// generated values can later be assigned back to the same row.
pub struct RowCursor<'a> {
    source: RowSource<'a>,
    /// Ordinal of the next row [`next_row`](Self::next_row) returns.
    position: u64,
    /// A stream row pulled by [`has_next`](Self::has_next) but not yet returned.
    peeked: Option<Row>,
    stream_done: bool,
}

impl<'a> RowCursor<'a> {
    pub(crate) fn new(source: RowSource<'a>) -> Self {
        Self {
            source,
            position: 0,
            peeked: None,
            stream_done: false,
        }
    }

    pub fn fields(&self) -> &[String] {
        self.source.fields()
    }

    /// Validates the field list: non-empty and free of duplicates.
    pub fn check_fields(&self) -> Result<(), InputShapeError> {
        check_fields(self.fields())
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Returns true if [`assign`](Self::assign) can reach the caller's rows.
    pub fn is_writable(&self) -> bool {
        self.kind() == SourceKind::Addressable
    }

    /// Number of rows handed out so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns true if another row is available, pulling one row from a
    /// stream if necessary.
    pub async fn has_next(&mut self) -> bool {
        match &mut self.source.inner {
            SourceInner::Addressable(store) => (self.position as usize) < store.len(),
            SourceInner::Stream(stream) => {
                if self.peeked.is_none() && !self.stream_done {
                    self.peeked = stream.rows.next().await;
                    self.stream_done = self.peeked.is_none();
                }
                self.peeked.is_some()
            }
        }
    }

    /// Returns the next row, or `None` once the source is exhausted.
    pub async fn next_row(&mut self) -> Result<Option<Row>, InputShapeError> {
        if !self.has_next().await {
            return Ok(None);
        }
        let ordinal = self.position;
        let row = match &mut self.source.inner {
            SourceInner::Addressable(store) => store.row(ordinal as usize)?,
            SourceInner::Stream(stream) => {
                let row = self.peeked.take().unwrap_or_default();
                if row.len() != stream.fields.len() {
                    return Err(InputShapeError::ValueCountMismatch {
                        row: ordinal,
                        expected: stream.fields.len(),
                        found: row.len(),
                    });
                }
                row
            }
        };
        self.position += 1;
        Ok(Some(row))
    }

    /// Writes `value` into `field` of the row handed out at `ordinal`.
    ///
    /// Always false for streams: a forward-only source has no backing row to
    /// write into.
    pub fn assign(&mut self, ordinal: u64, field: &str, value: Value) -> bool {
        match &mut self.source.inner {
            SourceInner::Addressable(store) if ordinal < self.position => {
                store.assign(ordinal as usize, field, value)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::source::DataTable;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        futures_util::FutureExt::now_or_never(f).expect("future should be ready")
    }

    #[test]
    fn test_stream_is_pulled_lazily() {
        let rows = stream::iter(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]).boxed();
        let mut cursor = RowSource::stream(["n"], rows).into_cursor();
        assert!(!cursor.is_writable());
        assert!(block_on(cursor.has_next()));
        assert_eq!(cursor.position(), 0);
        assert_eq!(
            block_on(cursor.next_row()).unwrap(),
            Some(vec![Value::Int32(1)])
        );
        assert_eq!(
            block_on(cursor.next_row()).unwrap(),
            Some(vec![Value::Int32(2)])
        );
        assert_eq!(block_on(cursor.next_row()).unwrap(), None);
        assert_eq!(cursor.position(), 2);
        assert!(!cursor.assign(0, "n", Value::Int32(9)));
    }

    #[test]
    fn test_stream_row_width_checked() {
        let rows = stream::iter(vec![vec![Value::Int32(1), Value::Null]]).boxed();
        let mut cursor = RowSource::stream(["n"], rows).into_cursor();
        assert_eq!(
            block_on(cursor.next_row()),
            Err(InputShapeError::ValueCountMismatch {
                row: 0,
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn test_assign_only_reaches_rows_already_read() {
        let mut table = DataTable::new(["id"]);
        table.push_row(vec![Value::Null]);
        table.push_row(vec![Value::Null]);
        let mut cursor = RowSource::table(&mut table).into_cursor();
        block_on(cursor.next_row()).unwrap();
        assert!(cursor.assign(0, "id", Value::Int64(1)));
        assert!(!cursor.assign(1, "id", Value::Int64(2)));
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let rows = stream::iter(Vec::<Row>::new()).boxed();
        let cursor = RowSource::stream(["a", "a"], rows).into_cursor();
        assert_eq!(
            cursor.check_fields(),
            Err(InputShapeError::DuplicateField { name: "a".into() })
        );
    }
}
