//! Schema resolution: which destination columns a bulk call writes, with
//! which wire types, and which columns match staging rows to target rows.
//!
//! ```text
//! source fields ──┐
//! ColumnMapping ──┼──> resolve() ──> ResolvedShape
//! TableSchema ────┘       ^            (columns, sources, qualifiers, identity)
//!      ^                  |
//!      └── catalog ── Connection
//! ```

pub mod catalog;
pub mod mapping;
pub mod name;
pub mod resolve;

pub use catalog::{CatalogColumn, IdentityKind, TableSchema};
pub use mapping::{ColumnMapping, MappedColumn};
pub use name::{TableName, quote_ident, quote_literal};
pub use resolve::{IdentityTarget, ResolveRequest, ResolvedShape, resolve};

use crate::datum::Type;

/// A staging column: produced once per call, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Wire type, or `None` if the encoder cannot frame this column.
    pub ty: Option<Type>,
    pub type_name: String,
    pub nullable: bool,
    pub identity: Option<IdentityKind>,
}

impl From<&CatalogColumn> for ColumnDescriptor {
    fn from(column: &CatalogColumn) -> Self {
        Self {
            name: column.name.clone(),
            ty: column.ty,
            type_name: column.type_name.clone(),
            nullable: column.nullable,
            identity: column.identity,
        }
    }
}
