use super::{Row, RowStore};
use crate::datum::Value;
use crate::error::InputShapeError;

/// Tabular in-memory data: named columns and rows of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl DataTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row. Its length is checked when the table is read.
    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns the value at (`row`, `column`).
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }
}

pub(crate) struct TableRows<'a> {
    table: &'a mut DataTable,
}

impl<'a> TableRows<'a> {
    pub(crate) fn new(table: &'a mut DataTable) -> Self {
        Self { table }
    }
}

impl RowStore for TableRows<'_> {
    fn fields(&self) -> &[String] {
        &self.table.columns
    }

    fn len(&self) -> usize {
        self.table.rows.len()
    }

    fn row(&self, index: usize) -> Result<Row, InputShapeError> {
        let row = &self.table.rows[index];
        if row.len() != self.table.columns.len() {
            return Err(InputShapeError::ValueCountMismatch {
                row: index as u64,
                expected: self.table.columns.len(),
                found: row.len(),
            });
        }
        Ok(row.clone())
    }

    fn assign(&mut self, index: usize, field: &str, value: Value) -> bool {
        let Some(column) = self.table.column_index(field) else {
            return false;
        };
        match self.table.rows.get_mut(index).and_then(|r| r.get_mut(column)) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }
}
