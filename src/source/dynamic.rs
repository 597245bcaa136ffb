use super::{DynamicRow, Row, RowStore};
use crate::datum::Value;
use crate::error::InputShapeError;

/// Property-map rows. The field list is the first row's keys, sorted so the
/// order does not depend on hashing.
pub(crate) struct DynamicRows<'a> {
    fields: Vec<String>,
    rows: &'a mut [DynamicRow],
}

impl<'a> DynamicRows<'a> {
    pub(crate) fn new(rows: &'a mut [DynamicRow]) -> Self {
        let fields = rows.first().map(sorted_keys).unwrap_or_default();
        Self { fields, rows }
    }
}

fn sorted_keys(row: &DynamicRow) -> Vec<String> {
    let mut keys: Vec<String> = row.keys().cloned().collect();
    keys.sort();
    keys
}

impl RowStore for DynamicRows<'_> {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn row(&self, index: usize) -> Result<Row, InputShapeError> {
        let row = &self.rows[index];
        let mismatch = || InputShapeError::FieldSetMismatch {
            row: index as u64,
            expected: self.fields.clone(),
            found: sorted_keys(row),
        };
        if row.len() != self.fields.len() {
            return Err(mismatch());
        }
        self.fields
            .iter()
            .map(|field| row.get(field).cloned().ok_or_else(mismatch))
            .collect()
    }

    fn assign(&mut self, index: usize, field: &str, value: Value) -> bool {
        match self.rows.get_mut(index) {
            Some(row) => {
                row.insert(field.to_string(), value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> DynamicRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_fields_from_first_row_sorted() {
        let mut rows = vec![row(&[("b", Value::Int32(1)), ("a", Value::Null)])];
        let store = DynamicRows::new(&mut rows);
        assert_eq!(store.fields(), &["a".to_string(), "b".to_string()]);
        assert_eq!(store.row(0).unwrap(), vec![Value::Null, Value::Int32(1)]);
    }

    #[test]
    fn test_heterogeneous_rows_rejected() {
        let mut rows = vec![
            row(&[("a", Value::Int32(1)), ("b", Value::Int32(2))]),
            row(&[("a", Value::Int32(1)), ("c", Value::Int32(2))]),
        ];
        let store = DynamicRows::new(&mut rows);
        assert!(store.row(0).is_ok());
        assert_eq!(
            store.row(1),
            Err(InputShapeError::FieldSetMismatch {
                row: 1,
                expected: vec!["a".into(), "b".into()],
                found: vec!["a".into(), "c".into()],
            })
        );
    }

    #[test]
    fn test_extra_field_rejected() {
        let mut rows = vec![
            row(&[("a", Value::Int32(1))]),
            row(&[("a", Value::Int32(1)), ("z", Value::Null)]),
        ];
        let store = DynamicRows::new(&mut rows);
        assert!(matches!(
            store.row(1),
            Err(InputShapeError::FieldSetMismatch { row: 1, .. })
        ));
    }

    #[test]
    fn test_assign_writes_into_map() {
        let mut rows = vec![row(&[("id", Value::Null)])];
        let mut store = DynamicRows::new(&mut rows);
        assert!(store.assign(0, "id", Value::Int64(9)));
        drop(store);
        assert_eq!(rows[0]["id"], Value::Int64(9));
    }
}
