use super::{CatalogColumn, ColumnDescriptor, ColumnMapping, TableName, TableSchema};
use crate::datum::Type;
use crate::error::ColumnMappingError;
use crate::plan::OperationKind;

/// Inputs to [`resolve`] beyond the table and the source fields.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'r> {
    pub operation: OperationKind,
    pub mapping: Option<&'r ColumnMapping>,
    /// Explicit qualifiers, by destination column (or mapped source field) name.
    pub qualifiers: Option<&'r [String]>,
    /// Generated identities must be read back into the source rows.
    pub return_identity: bool,
}

/// Where generated identity values go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTarget {
    /// Identity column of the target table.
    pub column: String,
    pub ty: Option<Type>,
    /// Source field that receives the value.
    pub field: String,
}

/// The staging shape of one bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShape {
    pub table: TableName,
    /// Staging columns, in load order.
    pub columns: Vec<ColumnDescriptor>,
    /// For each staging column, the index of its source field.
    pub sources: Vec<usize>,
    /// Destination columns used to match staging rows to target rows.
    pub qualifiers: Vec<String>,
    pub identity: Option<IdentityTarget>,
    pub unique_keys: Vec<Vec<String>>,
}

impl ResolvedShape {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_qualifier(&self, name: &str) -> bool {
        self.qualifiers.iter().any(|q| q == name)
    }

    /// Returns true if the qualifier set is exactly the key of a unique index.
    pub fn qualifiers_are_unique_key(&self) -> bool {
        self.unique_keys.iter().any(|key| {
            key.len() == self.qualifiers.len() && key.iter().all(|k| self.is_qualifier(k))
        })
    }
}

/// Resolves the destination columns, qualifiers and identity target.
///
/// An explicit mapping wins; otherwise destination columns are matched to
/// source fields by exact name, and unmatched columns are left out of the
/// staging shape (and therefore never touched by updates or merges).
pub fn resolve(
    schema: &TableSchema,
    fields: &[String],
    request: &ResolveRequest<'_>,
) -> Result<ResolvedShape, ColumnMappingError> {
    let table = schema.table.to_string();
    let field_index = |name: &str| fields.iter().position(|f| f == name);

    let mut columns = Vec::new();
    let mut sources = Vec::new();
    match request.mapping {
        Some(mapping) => {
            for pair in mapping.pairs() {
                let column =
                    schema
                        .column(&pair.column)
                        .ok_or_else(|| ColumnMappingError::UnknownColumn {
                            table: table.clone(),
                            column: pair.column.clone(),
                        })?;
                if column.generated {
                    return Err(ColumnMappingError::GeneratedColumn {
                        column: column.name.clone(),
                    });
                }
                if columns.iter().any(|c: &ColumnDescriptor| c.name == column.name) {
                    return Err(ColumnMappingError::DuplicateColumn {
                        column: column.name.clone(),
                    });
                }
                let source =
                    field_index(&pair.source).ok_or_else(|| ColumnMappingError::UnknownField {
                        field: pair.source.clone(),
                    })?;
                columns.push(ColumnDescriptor::from(column));
                sources.push(source);
            }
        }
        None => {
            for column in schema.columns.iter().filter(|c| !c.generated) {
                if let Some(source) = field_index(&column.name) {
                    columns.push(ColumnDescriptor::from(column));
                    sources.push(source);
                }
            }
        }
    }
    if columns.is_empty() {
        return Err(ColumnMappingError::NoColumns { table });
    }

    let qualifiers = match request.qualifiers {
        Some(explicit) => resolve_explicit_qualifiers(explicit, &columns, request.mapping)?,
        None if request.operation == OperationKind::Insert => Vec::new(),
        None => default_qualifiers(schema, &columns)
            .ok_or_else(|| ColumnMappingError::NoQualifier {
                table: table.clone(),
            })?,
    };

    let identity = if request.return_identity && request.operation != OperationKind::Delete {
        Some(identity_target(schema, fields, &columns, &sources)?)
    } else {
        None
    };

    Ok(ResolvedShape {
        table: schema.table.clone(),
        columns,
        sources,
        qualifiers,
        identity,
        unique_keys: schema.unique_keys.clone(),
    })
}

fn resolve_explicit_qualifiers(
    explicit: &[String],
    columns: &[ColumnDescriptor],
    mapping: Option<&ColumnMapping>,
) -> Result<Vec<String>, ColumnMappingError> {
    let mut resolved: Vec<String> = Vec::new();
    for name in explicit {
        let column = columns
            .iter()
            .find(|c| &c.name == name)
            .or_else(|| {
                let mapped = mapping?.column_for(name)?;
                columns.iter().find(|c| c.name == mapped)
            })
            .ok_or_else(|| ColumnMappingError::UnknownQualifier {
                column: name.clone(),
            })?;
        if !resolved.contains(&column.name) {
            resolved.push(column.name.clone());
        }
    }
    Ok(resolved)
}

/// Primary key if fully mapped, else the identity column if mapped.
fn default_qualifiers(schema: &TableSchema, columns: &[ColumnDescriptor]) -> Option<Vec<String>> {
    let mapped = |name: &str| columns.iter().any(|c| c.name == name);
    if !schema.primary_key.is_empty() && schema.primary_key.iter().all(|k| mapped(k)) {
        return Some(schema.primary_key.clone());
    }
    schema
        .identity_column()
        .filter(|c| mapped(&c.name))
        .map(|c| vec![c.name.clone()])
}

fn identity_target(
    schema: &TableSchema,
    fields: &[String],
    columns: &[ColumnDescriptor],
    sources: &[usize],
) -> Result<IdentityTarget, ColumnMappingError> {
    let column: &CatalogColumn =
        schema
            .identity_column()
            .ok_or_else(|| ColumnMappingError::NoIdentity {
                table: schema.table.to_string(),
            })?;
    let field = columns
        .iter()
        .position(|c| c.name == column.name)
        .map(|i| fields[sources[i]].clone())
        .or_else(|| fields.iter().find(|f| **f == column.name).cloned())
        .ok_or_else(|| ColumnMappingError::IdentityNotMapped {
            column: column.name.clone(),
        })?;
    Ok(IdentityTarget {
        column: column.name.clone(),
        ty: column.ty,
        field,
    })
}
