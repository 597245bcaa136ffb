//! Staging relations: created per batch, loaded once over binary COPY,
//! consumed by the driving statement, then dropped.

use tracing::{trace, warn};
use uuid::Uuid;

use crate::batch::BatchContext;
use crate::conn::{Connection, CopyIn};
use crate::encoder::CopyEncoder;
use crate::error::{BulkError, Stage};
use crate::options::StagingKind;
use crate::plan::Planner;
use crate::protocol::FormatCode;
use crate::schema::name::{MAX_IDENTIFIER_LEN, truncate_ident};
use crate::schema::{ResolvedShape, TableName, quote_ident};
use crate::source::RowCursor;

/// Batch-local row ordinal appended to staging rows when identities are
/// read back.
pub const ORDINAL_COLUMN: &str = "__pgbulk_ordinal";

const NAME_INFIX: &str = "_stg_";
const NAME_SUFFIX_LEN: usize = 12;

/// One batch's staging relation.
#[derive(Debug)]
pub struct StagingTable {
    name: TableName,
    kind: StagingKind,
    with_ordinal: bool,
    not_null: Vec<bool>,
}

impl StagingTable {
    /// A fresh, unique name for a staging relation of `target`.
    ///
    /// Temporary relations live in the session's temporary schema; physical
    /// ones next to the target.
    pub fn unique_name(target: &TableName, kind: StagingKind) -> TableName {
        let suffix = Uuid::new_v4().simple().to_string();
        let suffix = &suffix[..NAME_SUFFIX_LEN];
        let stem = truncate_ident(
            target.name(),
            MAX_IDENTIFIER_LEN - NAME_INFIX.len() - NAME_SUFFIX_LEN,
        );
        let name = format!("{stem}{NAME_INFIX}{suffix}");
        match kind {
            StagingKind::Temporary => TableName::new(None, &name),
            StagingKind::Physical => target.sibling(&name),
        }
    }

    /// Creates the staging relation with the shape's columns (and the
    /// ordinal column if the plan reads identities back), copying the
    /// target's column types.
    pub async fn open<C: Connection>(
        conn: &mut C,
        shape: &ResolvedShape,
        kind: StagingKind,
        planner: &Planner,
        ctx: &BatchContext,
    ) -> Result<Self, BulkError> {
        let staging = Self {
            name: Self::unique_name(&shape.table, kind),
            kind,
            with_ordinal: planner.with_ordinal(),
            not_null: planner.not_null_columns(shape),
        };
        let sql = staging.create_sql(shape);
        trace!(sql = %sql, "creating staging table");
        conn.execute(&sql)
            .await
            .map_err(|e| ctx.fail(Stage::CreateStaging, &sql, e))?;
        Ok(staging)
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn kind(&self) -> StagingKind {
        self.kind
    }

    fn create_sql(&self, shape: &ResolvedShape) -> String {
        let mut columns: Vec<String> = shape.columns.iter().map(|c| quote_ident(&c.name)).collect();
        if self.with_ordinal {
            columns.push(format!("NULL::int8 AS {}", quote_ident(ORDINAL_COLUMN)));
        }
        let create = match self.kind {
            StagingKind::Temporary => "CREATE TEMP TABLE",
            StagingKind::Physical => "CREATE UNLOGGED TABLE",
        };
        let on_commit = match self.kind {
            StagingKind::Temporary => " ON COMMIT DROP",
            StagingKind::Physical => "",
        };
        format!(
            "{create} {}{on_commit} AS SELECT {} FROM {} WITH NO DATA",
            self.name.qualified(),
            columns.join(", "),
            shape.table.qualified()
        )
    }

    fn copy_sql(&self, shape: &ResolvedShape) -> String {
        let mut columns: Vec<String> = shape.columns.iter().map(|c| quote_ident(&c.name)).collect();
        if self.with_ordinal {
            columns.push(quote_ident(ORDINAL_COLUMN));
        }
        format!(
            "COPY {} ({}) FROM STDIN (FORMAT {})",
            self.name.qualified(),
            columns.join(", "),
            FormatCode::Binary.copy_option()
        )
    }

    /// Streams up to `limit` rows from `cursor` into the staging relation in
    /// one COPY pass. Returns the number of rows loaded.
    ///
    /// On error the load channel is dropped unfinished, which aborts the COPY.
    /// A NULL bound for a NOT NULL column the statements write fails the load.
    pub async fn load<C: Connection>(
        &self,
        conn: &mut C,
        cursor: &mut RowCursor<'_>,
        shape: &ResolvedShape,
        limit: usize,
        flush_bytes: usize,
        ctx: &BatchContext,
    ) -> Result<usize, BulkError> {
        let sql = self.copy_sql(shape);
        trace!(sql = %sql, "starting binary load");
        let fail = |e| ctx.fail(Stage::Load, &sql, e);

        let mut sink = conn.copy_in(&sql).await.map_err(fail)?;
        let mut encoder =
            CopyEncoder::new(shape, self.with_ordinal).reject_null(self.not_null.clone());
        let mut loaded = 0usize;
        while loaded < limit {
            let Some(row) = cursor.next_row().await? else {
                break;
            };
            let ordinal = cursor.position() - 1;
            encoder.encode_row(&row, ordinal, loaded as i64)?;
            loaded += 1;
            if encoder.buffered() >= flush_bytes {
                sink.send(encoder.take()).await.map_err(fail)?;
            }
        }
        encoder.finish();
        sink.send(encoder.take()).await.map_err(fail)?;
        let copied = sink.finish().await.map_err(fail)?;
        trace!(rows = loaded, copied, "binary load finished");
        Ok(loaded)
    }

    /// Drops the staging relation.
    pub async fn close<C: Connection>(self, conn: &mut C, ctx: &BatchContext) -> Result<(), BulkError> {
        let sql = self.drop_sql();
        trace!(sql = %sql, "dropping staging table");
        conn.execute(&sql)
            .await
            .map(|_| ())
            .map_err(|e| ctx.fail(Stage::DropStaging, &sql, e))
    }

    /// Drops the staging relation after a failed batch. A failing drop is
    /// logged; the batch's own error is the one reported.
    pub async fn discard<C: Connection>(self, conn: &mut C) {
        let sql = self.drop_sql();
        if let Err(e) = conn.execute(&sql).await {
            warn!(staging = %self.name, error = %e, "failed to drop staging table");
        }
    }

    fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name.qualified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Type;
    use crate::schema::ColumnDescriptor;

    fn shape(table: TableName) -> ResolvedShape {
        let column = |name: &str| ColumnDescriptor {
            name: name.into(),
            ty: Some(Type::Text),
            type_name: "text".into(),
            nullable: true,
            identity: None,
        };
        ResolvedShape {
            table,
            columns: vec![column("Id"), column("Name")],
            sources: vec![0, 1],
            qualifiers: vec!["Id".into()],
            identity: None,
            unique_keys: vec![],
        }
    }

    #[test]
    fn test_unique_names() {
        let target = TableName::new(Some("sales"), "Order");
        let a = StagingTable::unique_name(&target, StagingKind::Temporary);
        let b = StagingTable::unique_name(&target, StagingKind::Temporary);
        assert_ne!(a, b);
        assert_eq!(a.schema(), None);
        assert!(a.name().starts_with("Order_stg_"));
        assert_eq!(a.name().len(), "Order_stg_".len() + NAME_SUFFIX_LEN);

        let physical = StagingTable::unique_name(&target, StagingKind::Physical);
        assert_eq!(physical.schema(), Some("sales"));
    }

    #[test]
    fn test_long_names_fit_identifier_limit() {
        let target = TableName::new(None, &"ä".repeat(40));
        let name = StagingTable::unique_name(&target, StagingKind::Temporary);
        assert!(name.name().len() <= MAX_IDENTIFIER_LEN);
        assert!(name.name().contains(NAME_INFIX));
    }

    #[test]
    fn test_temporary_create_and_copy_sql() {
        let shape = shape(TableName::new(Some("dbo"), "Item"));
        let staging = StagingTable {
            name: TableName::new(None, "Item_stg_x"),
            kind: StagingKind::Temporary,
            with_ordinal: true,
            not_null: vec![],
        };
        assert_eq!(
            staging.create_sql(&shape),
            r#"CREATE TEMP TABLE "Item_stg_x" ON COMMIT DROP AS SELECT "Id", "Name", NULL::int8 AS "__pgbulk_ordinal" FROM "dbo"."Item" WITH NO DATA"#
        );
        assert_eq!(
            staging.copy_sql(&shape),
            r#"COPY "Item_stg_x" ("Id", "Name", "__pgbulk_ordinal") FROM STDIN (FORMAT binary)"#
        );
        assert_eq!(staging.drop_sql(), r#"DROP TABLE IF EXISTS "Item_stg_x""#);
    }

    #[test]
    fn test_physical_create_sql() {
        let shape = shape(TableName::new(Some("dbo"), "Item"));
        let staging = StagingTable {
            name: TableName::new(Some("dbo"), "Item_stg_x"),
            kind: StagingKind::Physical,
            with_ordinal: false,
            not_null: vec![],
        };
        assert_eq!(
            staging.create_sql(&shape),
            r#"CREATE UNLOGGED TABLE "dbo"."Item_stg_x" AS SELECT "Id", "Name" FROM "dbo"."Item" WITH NO DATA"#
        );
    }
}
