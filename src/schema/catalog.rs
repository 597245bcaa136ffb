//! Target table metadata read from the system catalog.

use tracing::trace;

use super::name::TableName;
use crate::conn::{Connection, TextRow};
use crate::datum::Type;
use crate::error::EngineError;

/// How a column obtains generated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// `GENERATED ALWAYS AS IDENTITY`: explicit values need `OVERRIDING SYSTEM VALUE`.
    Always,
    /// `GENERATED BY DEFAULT AS IDENTITY`.
    ByDefault,
    /// A `serial`-style `nextval(...)` default.
    Serial,
}

/// One column of the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    /// Wire type, or `None` when the encoder has no binary form for it.
    pub ty: Option<Type>,
    pub type_name: String,
    pub nullable: bool,
    pub identity: Option<IdentityKind>,
    /// `GENERATED ALWAYS AS (...) STORED`; never writable.
    pub generated: bool,
}

impl CatalogColumn {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            ty: Some(ty),
            type_name: ty.to_string(),
            nullable: true,
            identity: None,
            generated: false,
        }
    }

    /// A column whose type the encoder does not support.
    pub fn unsupported(name: &str, type_name: &str) -> Self {
        Self {
            ty: None,
            type_name: type_name.to_string(),
            ..Self::new(name, Type::Text)
        }
    }

    pub fn identity(mut self, kind: IdentityKind) -> Self {
        self.identity = Some(kind);
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }
}

/// Columns and keys of the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: TableName,
    /// Columns in ordinal order.
    pub columns: Vec<CatalogColumn>,
    pub primary_key: Vec<String>,
    /// Key columns of every non-partial unique index, the primary key included.
    pub unique_keys: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn new(table: TableName, columns: Vec<CatalogColumn>) -> Self {
        Self {
            table,
            columns,
            primary_key: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self.unique_keys.insert(0, self.primary_key.clone());
        self
    }

    pub fn unique_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_keys
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn column(&self, name: &str) -> Option<&CatalogColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn identity_column(&self) -> Option<&CatalogColumn> {
        self.columns.iter().find(|c| c.identity.is_some())
    }

    /// Returns true if `columns` (in any order) is exactly the key of a unique index.
    pub fn has_unique_key(&self, columns: &[String]) -> bool {
        self.unique_keys.iter().any(|key| {
            key.len() == columns.len() && key.iter().all(|k| columns.contains(k))
        })
    }

    /// Reads the table's metadata. Returns `Ok(None)` if the table does not exist.
    pub async fn load<C: Connection>(
        conn: &mut C,
        table: &TableName,
    ) -> Result<Option<TableSchema>, EngineError> {
        let sql = columns_query(table);
        trace!(sql = %sql, "loading columns");
        let rows = conn.query(&sql).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let columns = rows
            .iter()
            .map(parse_column)
            .collect::<Result<Vec<_>, _>>()?;

        let sql = keys_query(table);
        trace!(sql = %sql, "loading keys");
        let mut schema = TableSchema::new(table.clone(), columns);
        for row in conn.query(&sql).await? {
            let (primary, key) = parse_key(&row)?;
            if primary {
                schema.primary_key = key.clone();
            }
            schema.unique_keys.push(key);
        }
        Ok(Some(schema))
    }
}

fn columns_query(table: &TableName) -> String {
    format!(
        "SELECT a.attname, \
                COALESCE(NULLIF(t.typbasetype, 0), a.atttypid)::int8, \
                format_type(a.atttypid, a.atttypmod), \
                a.attnotnull, \
                a.attidentity, \
                a.attgenerated, \
                COALESCE(pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval(%', false) \
         FROM pg_catalog.pg_attribute a \
         JOIN pg_catalog.pg_type t ON t.oid = a.atttypid \
         LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
         WHERE a.attrelid = to_regclass({}) AND a.attnum > 0 AND NOT a.attisdropped \
         ORDER BY a.attnum",
        table.literal()
    )
}

fn keys_query(table: &TableName) -> String {
    format!(
        "SELECT i.indisprimary, json_agg(a.attname ORDER BY k.ord)::text \
         FROM pg_catalog.pg_index i \
         CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) \
         JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum \
         WHERE i.indrelid = to_regclass({}) AND i.indisunique \
           AND i.indpred IS NULL AND i.indexprs IS NULL AND k.ord <= i.indnkeyatts \
         GROUP BY i.indexrelid, i.indisprimary \
         ORDER BY i.indisprimary DESC, i.indexrelid",
        table.literal()
    )
}

fn cell<'r>(row: &'r TextRow, index: usize) -> Result<&'r str, EngineError> {
    row.get(index)
        .and_then(|c| c.as_deref())
        .ok_or_else(|| EngineError::new(format!("catalog row is missing column {}", index)))
}

fn parse_column(row: &TextRow) -> Result<CatalogColumn, EngineError> {
    let name = cell(row, 0)?;
    let oid: u32 = cell(row, 1)?
        .parse()
        .map_err(|_| EngineError::new("catalog returned a non-numeric type oid"))?;
    let type_name = cell(row, 2)?;
    let not_null = cell(row, 3)? == "t";
    let identity = match cell(row, 4)? {
        "a" => Some(IdentityKind::Always),
        "d" => Some(IdentityKind::ByDefault),
        _ if cell(row, 6)? == "t" => Some(IdentityKind::Serial),
        _ => None,
    };
    Ok(CatalogColumn {
        name: name.to_string(),
        ty: Type::from_oid(oid),
        type_name: type_name.to_string(),
        nullable: !not_null,
        identity,
        generated: !cell(row, 5)?.is_empty(),
    })
}

fn parse_key(row: &TextRow) -> Result<(bool, Vec<String>), EngineError> {
    let primary = cell(row, 0)? == "t";
    let columns: Vec<String> = serde_json::from_str(cell(row, 1)?)
        .map_err(|e| EngineError::from_source(e).with_message("malformed index key list"))?;
    Ok((primary, columns))
}
