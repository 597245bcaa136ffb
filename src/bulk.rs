//! The public entry points.

use std::future::Future;

use tracing::{debug, info, instrument};

use crate::batch::{BatchContext, BatchCoordinator};
use crate::conn::Connection;
use crate::error::{BulkError, ColumnMappingError, Stage};
use crate::options::{BulkOptions, IdentityBehavior};
use crate::plan::{OperationKind, Planner};
use crate::schema::{ResolveRequest, TableName, TableSchema, resolve};
use crate::source::RowSource;

/// Applies one bulk operation of `rows` to `table` and returns the number of
/// affected target rows.
///
/// `table` is `name` or `schema.name`; either part may be double-quoted.
/// Resolution and planning errors are reported before any statement touches
/// the target. An empty source returns `Ok(0)` without using the connection.
#[instrument(
    name = "pgbulk::bulk",
    level = "debug",
    skip(conn, operation, rows, options),
    fields(operation = %operation, rows = ?rows.len_hint())
)]
pub async fn bulk<C: Connection>(
    conn: &mut C,
    operation: OperationKind,
    table: &str,
    rows: RowSource<'_>,
    options: &BulkOptions,
) -> Result<u64, BulkError> {
    let table = TableName::parse(table)?;
    let mut cursor = rows.into_cursor();
    if !cursor.has_next().await {
        debug!("row source is empty");
        return Ok(0);
    }
    cursor.check_fields()?;

    let ctx = BatchContext::new(operation, None);
    let schema = TableSchema::load(conn, &table)
        .await
        .map_err(|e| ctx.fail(Stage::Catalog, "catalog lookup", e))?
        .ok_or_else(|| ColumnMappingError::TableNotFound {
            table: table.to_string(),
        })?;

    let request = ResolveRequest {
        operation,
        mapping: options.mapping.as_ref(),
        qualifiers: options.qualifiers.as_deref(),
        return_identity: options.identity == IdentityBehavior::ReturnIdentity,
    };
    let shape = resolve(&schema, cursor.fields(), &request)?;
    let planner = Planner::new(operation, &shape, options)?;
    debug!(
        columns = shape.columns.len(),
        qualifiers = ?shape.qualifiers,
        "resolved staging shape"
    );

    let summary = BatchCoordinator::new(&shape, &planner, options)
        .run(conn, &mut cursor)
        .await?;
    info!(
        batches = summary.batches,
        rows = summary.rows,
        affected = summary.affected,
        "bulk {} complete",
        operation
    );
    Ok(summary.affected)
}

/// Bulk operations as methods on any [`Connection`].
///
/// ```no_run
/// # async fn demo(client: &mut tokio_postgres::Client) -> Result<(), pgbulk::BulkError> {
/// use pgbulk::{BulkExt, BulkOptions, DataTable, RowSource, Value};
///
/// let mut table = DataTable::new(["Name"]);
/// table.push_row(vec![Value::from("widget")]);
/// let inserted = client
///     .bulk_insert("public.item", RowSource::table(&mut table), &BulkOptions::default())
///     .await?;
/// assert_eq!(inserted, 1);
/// # Ok(())
/// # }
/// ```
pub trait BulkExt: Connection + Sized {
    fn bulk_insert(
        &mut self,
        table: &str,
        rows: RowSource<'_>,
        options: &BulkOptions,
    ) -> impl Future<Output = Result<u64, BulkError>> + Send {
        bulk(self, OperationKind::Insert, table, rows, options)
    }

    fn bulk_update(
        &mut self,
        table: &str,
        rows: RowSource<'_>,
        options: &BulkOptions,
    ) -> impl Future<Output = Result<u64, BulkError>> + Send {
        bulk(self, OperationKind::Update, table, rows, options)
    }

    fn bulk_delete(
        &mut self,
        table: &str,
        rows: RowSource<'_>,
        options: &BulkOptions,
    ) -> impl Future<Output = Result<u64, BulkError>> + Send {
        bulk(self, OperationKind::Delete, table, rows, options)
    }

    fn bulk_merge(
        &mut self,
        table: &str,
        rows: RowSource<'_>,
        options: &BulkOptions,
    ) -> impl Future<Output = Result<u64, BulkError>> + Send {
        bulk(self, OperationKind::Merge, table, rows, options)
    }
}

impl<C: Connection> BulkExt for C {}
