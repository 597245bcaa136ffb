
use std::collections::HashMap;
use std::num::NonZeroUsize;

use futures_util::{FutureExt, StreamExt, stream};

use bulk_test_support::{
    FakeConnection, Item, Reply, column, identity_column, item_table, key, required_column,
};
use pgbulk::{
    BulkError, BulkExt, BulkOptions, ColumnMapping, ColumnMappingError, DataTable, DynamicRow,
    EncodingErrorKind, IdentityBehavior, InputShapeError, MergeCommandKind, OperationKind,
    OperationPlanError, RowSource, Stage, StagingKind, Value, bulk,
};

fn batch_size(rows: usize) -> NonZeroUsize {
    NonZeroUsize::new(rows).unwrap()
}

#[tokio::test]
async fn test_empty_source_touches_nothing() {
    let mut conn = item_table();
    let mut items: Vec<Item> = Vec::new();
    let affected = conn
        .bulk_insert("Item", RowSource::typed(&mut items), &BulkOptions::default())
        .await
        .unwrap();
    assert_eq!(affected, 0);
    assert!(conn.statements().is_empty());

    // an empty dynamic source has no fields either; still not an error
    let mut rows: Vec<DynamicRow> = Vec::new();
    let affected = conn
        .bulk_delete("Item", RowSource::dynamic(&mut rows), &BulkOptions::default())
        .await
        .unwrap();
    assert_eq!(affected, 0);
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn test_insert_single_batch_lifecycle() {
    let mut conn = item_table();
    let mut items = Item::many(3);
    let affected = conn
        .bulk_insert("Item", RowSource::typed(&mut items), &BulkOptions::default())
        .await
        .unwrap();
    assert_eq!(affected, 3);
    assert_eq!(
        conn.verbs(),
        ["CATALOG", "CATALOG", "BEGIN", "CREATE", "COPY", "INSERT", "DROP", "COMMIT"]
    );

    let create = &conn.statements_starting_with("CREATE")[0];
    assert!(create.starts_with(r#"CREATE TEMP TABLE "Item_stg_"#));
    assert!(create.ends_with(r#"ON COMMIT DROP AS SELECT "Id", "Name", "Qty" FROM "Item" WITH NO DATA"#));

    let insert = &conn.statements_starting_with("INSERT")[0];
    assert!(insert.starts_with(r#"INSERT INTO "Item" ("Name", "Qty") SELECT s."Name", s."Qty" FROM "Item_stg_"#));

    let copies = conn.copies();
    assert_eq!(copies.len(), 1);
    let tuples = copies[0].tuples();
    assert_eq!(tuples.len(), 3);
    assert_eq!(tuples[1][0], Some(0i64.to_be_bytes().to_vec()));
    assert_eq!(tuples[1][1], Some(b"item-1".to_vec()));
    assert_eq!(tuples[1][2], Some(1i32.to_be_bytes().to_vec()));
}

#[tokio::test]
async fn test_batches_follow_source_order() {
    let mut conn = item_table();
    let mut items = Item::many(5);
    let options = BulkOptions::new().batch_size(batch_size(2));
    let affected = conn
        .bulk_insert("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap();
    assert_eq!(affected, 5);
    assert_eq!(conn.statements_starting_with("BEGIN").len(), 1);
    assert_eq!(conn.statements_starting_with("COMMIT").len(), 1);
    assert_eq!(conn.statements_starting_with("CREATE").len(), 3);
    assert_eq!(conn.statements_starting_with("DROP").len(), 3);

    let names: Vec<Vec<u8>> = conn
        .copies()
        .iter()
        .flat_map(|c| c.tuples())
        .map(|t| t[1].clone().unwrap())
        .collect();
    let expected: Vec<Vec<u8>> = (0..5).map(|i| format!("item-{i}").into_bytes()).collect();
    assert_eq!(names, expected);

    // every batch gets its own staging table
    let creates = conn.statements_starting_with("CREATE");
    assert_ne!(creates[0], creates[1]);
}

#[tokio::test]
async fn test_batching_matches_single_batch_totals() {
    for size in [1, 2, 3, 7] {
        let mut conn = item_table();
        let mut items = Item::many(7);
        let options = BulkOptions::new().batch_size(batch_size(size));
        let affected = conn
            .bulk_update("Item", RowSource::typed(&mut items), &options)
            .await
            .unwrap();
        assert_eq!(affected, 7, "batch size {size}");
        assert_eq!(conn.copies().len(), 7usize.div_ceil(size));
    }
}

#[tokio::test]
async fn test_caller_transaction_is_reused() {
    let mut conn = item_table().in_caller_transaction();
    let mut items = Item::many(2);
    conn.bulk_delete("Item", RowSource::typed(&mut items), &BulkOptions::default())
        .await
        .unwrap();
    let verbs = conn.verbs();
    assert!(!verbs.contains(&"BEGIN".to_string()));
    assert!(!verbs.contains(&"COMMIT".to_string()));
    assert_eq!(
        conn.statements_starting_with("DELETE")[0].split(" USING ").next(),
        Some(r#"DELETE FROM "Item" AS t"#)
    );
}

#[tokio::test]
async fn test_failed_statement_rolls_back_owned_transaction() {
    let mut conn = item_table();
    conn.reply("UPDATE", Reply::fail_with_code("deadlock detected", "40P01"));
    let mut items = Item::many(4);
    let options = BulkOptions::new().batch_size(batch_size(2));
    let err = conn
        .bulk_update("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap_err();

    assert_eq!(err.sql_state(), Some("40P01"));
    match &err {
        BulkError::EngineExecution(e) => {
            assert_eq!(e.operation, OperationKind::Update);
            assert_eq!(e.stage, Stage::Execute);
            assert_eq!(e.batch, Some(0));
            assert!(e.statement.starts_with("UPDATE"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(conn.verbs().last().map(String::as_str), Some("ROLLBACK"));
    assert!(conn.statements_starting_with("COMMIT").is_empty());
    // the rollback discards the staging table
    assert!(conn.statements_starting_with("DROP").is_empty());
    // later batches never start
    assert_eq!(conn.copies().len(), 1);
}

#[tokio::test]
async fn test_failed_statement_in_caller_transaction_drops_staging() {
    let mut conn = item_table().in_caller_transaction();
    conn.reply("DELETE", Reply::fail("canceling statement"));
    conn.reply("DROP", Reply::fail("current transaction is aborted"));
    let mut items = Item::many(1);
    let err = conn
        .bulk_delete("Item", RowSource::typed(&mut items), &BulkOptions::default())
        .await
        .unwrap_err();
    // the original error wins over the failed cleanup
    assert!(err.to_string().contains("canceling statement"));
    assert_eq!(conn.statements_starting_with("DROP").len(), 1);
    assert!(conn.statements_starting_with("ROLLBACK").is_empty());
}

#[tokio::test]
async fn test_encoding_error_aborts_copy() {
    let mut conn = item_table();
    let mut table = DataTable::new(["Name", "Qty"]);
    table.push_row(vec![Value::from("ok"), Value::Int32(1)]);
    table.push_row(vec![Value::from("bad"), Value::Int64(i64::from(i32::MAX) + 1)]);
    let err = conn
        .bulk_insert("Item", RowSource::table(&mut table), &BulkOptions::default())
        .await
        .unwrap_err();
    match err {
        BulkError::Encoding(e) => {
            assert_eq!(e.column, "Qty");
            assert_eq!(e.row, 1);
            assert!(matches!(e.kind, EncodingErrorKind::Overflow { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(conn.aborted_copies(), 1);
    assert!(conn.copies().is_empty());
    assert_eq!(conn.verbs().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn test_dynamic_rows_with_different_fields() {
    let mut conn = item_table();
    let mut rows: Vec<DynamicRow> = vec![
        HashMap::from([("Name".to_string(), Value::from("a"))]),
        HashMap::from([("Qty".to_string(), Value::Int32(2))]),
    ];
    let err = conn
        .bulk_insert("Item", RowSource::dynamic(&mut rows), &BulkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BulkError::InputShape(InputShapeError::FieldSetMismatch { row: 1, .. })
    ));
}

#[tokio::test]
async fn test_missing_table() {
    let mut conn = FakeConnection::new();
    let mut items = Item::many(1);
    let err = conn
        .bulk_insert("sales.Missing", RowSource::typed(&mut items), &BulkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BulkError::ColumnMapping(ColumnMappingError::TableNotFound { table }) if table == r#""sales"."Missing""#
    ));
    assert!(conn.statements_starting_with("BEGIN").is_empty());
}

#[tokio::test]
async fn test_plan_errors_precede_any_write() {
    let mut conn = item_table();
    let mut items = Item::many(2);
    let options = BulkOptions::new()
        .merge(MergeCommandKind::NativeUpsert)
        .qualifiers(["Name"]);
    let err = conn
        .bulk_merge("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BulkError::OperationPlan(OperationPlanError::NoMatchingConstraint { .. })
    ));
    assert_eq!(conn.verbs(), ["CATALOG", "CATALOG"]);

    let options = BulkOptions::new().qualifiers(Vec::<String>::new());
    let err = conn
        .bulk_update("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BulkError::OperationPlan(OperationPlanError::EmptyQualifiers {
            operation: OperationKind::Update
        })
    ));
}

#[tokio::test]
async fn test_return_identity_on_insert() {
    let mut conn = item_table();
    conn.reply("INSERT", Reply::ids(&[11, 12]));
    conn.reply("INSERT", Reply::ids(&[13]));
    let mut items = Item::many(3);
    let options = BulkOptions::new()
        .identity(IdentityBehavior::ReturnIdentity)
        .batch_size(batch_size(2));
    let affected = conn
        .bulk_insert("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap();
    assert_eq!(affected, 3);
    let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, [11, 12, 13]);

    // staging rows carry their batch-local ordinal
    let second = conn.copies()[1].tuples();
    assert_eq!(second[0].last().unwrap(), &Some(0i64.to_be_bytes().to_vec()));
    assert!(conn.statements_starting_with("INSERT")[0].contains(r#"ORDER BY s."__pgbulk_ordinal" RETURNING "Id""#));
}

#[tokio::test]
async fn test_standard_merge_return_identity() {
    let mut conn = item_table();
    let mut items = vec![
        Item::new(0, "new-a", 1),
        Item::new(7, "existing", 2),
        Item::new(0, "new-b", 3),
    ];
    conn.reply("SELECT s.", Reply::ordinal_ids(&[(1, 7)]));
    conn.reply("UPDATE", Reply::Count(1));
    conn.reply("INSERT", Reply::ids(&[40, 41]));
    let options = BulkOptions::new().identity(IdentityBehavior::ReturnIdentity);
    let affected = conn
        .bulk_merge("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap();
    assert_eq!(affected, 3);
    let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, [40, 7, 41]);
    assert_eq!(
        conn.verbs(),
        [
            "CATALOG", "CATALOG", "BEGIN", "CREATE", "COPY", "SELECT", "UPDATE", "INSERT", "DROP",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn test_stream_source_stays_single_pass() {
    let mut conn = item_table();
    let rows = stream::iter((0..4).map(|i| vec![Value::from(format!("s{i}")), Value::Int32(i)])).boxed();
    let options = BulkOptions::new()
        .identity(IdentityBehavior::ReturnIdentity)
        .batch_size(batch_size(3))
        .mapping(ColumnMapping::new().map("label", "Name").map("n", "Qty"));
    conn.reply("INSERT", Reply::ids(&[1, 2, 3]));
    conn.reply("INSERT", Reply::ids(&[4]));
    let err = conn
        .bulk_insert("Item", RowSource::stream(["label", "n"], rows), &options)
        .await
        .unwrap_err();
    // the identity column has no field to receive values
    assert!(matches!(
        err,
        BulkError::ColumnMapping(ColumnMappingError::IdentityNotMapped { .. })
    ));

    let rows = stream::iter((0..4).map(|i| vec![Value::Int64(0), Value::from(format!("s{i}"))])).boxed();
    let options = options.mapping(ColumnMapping::new().map("label", "Name").map("Id", "Id"));
    let affected = conn
        .bulk_insert("Item", RowSource::stream(["Id", "label"], rows), &options)
        .await
        .unwrap();
    assert_eq!(affected, 4);
    assert_eq!(conn.copies().len(), 2);
}

#[tokio::test]
async fn test_flush_threshold_chunks_copy_data() {
    let mut conn = item_table();
    let mut items = Item::many(10);
    let options = BulkOptions::new().flush_bytes(1);
    conn.bulk_insert("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap();
    let copy = &conn.copies()[0];
    // one chunk per row plus the trailer
    assert_eq!(copy.chunks, 11);
    assert_eq!(copy.tuples().len(), 10);
}

#[tokio::test]
async fn test_physical_staging_in_target_schema() {
    let mut conn = FakeConnection::new().with_table(
        vec![column("code", 25, "text"), column("price", 1700, "numeric(10,2)")],
        vec![key(true, &["code"])],
    );
    let mut table = DataTable::new(["code", "price"]);
    table.push_row(vec![Value::from("A-1"), Value::Numeric("12.50".into())]);
    let options = BulkOptions::new().staging(StagingKind::Physical).changed_only(true);
    conn.bulk_merge("sales.price", RowSource::table(&mut table), &options)
        .await
        .unwrap();
    let create = &conn.statements_starting_with("CREATE")[0];
    assert!(create.starts_with(r#"CREATE UNLOGGED TABLE "sales"."price_stg_"#));
    let drop = &conn.statements_starting_with("DROP")[0];
    assert!(drop.starts_with(r#"DROP TABLE IF EXISTS "sales"."price_stg_"#));
    let update = &conn.statements_starting_with("UPDATE")[0];
    assert!(update.ends_with(r#"AND (t."price" IS DISTINCT FROM s."price")"#));
}

#[tokio::test]
async fn test_bulk_function_and_quoted_names() {
    let mut conn = item_table();
    let mut items = Item::many(1);
    let affected = bulk(
        &mut conn,
        OperationKind::Delete,
        r#""public"."Item""#,
        RowSource::typed(&mut items),
        &BulkOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(affected, 1);
    assert!(conn.statements_starting_with("DELETE")[0].starts_with(r#"DELETE FROM "public"."Item" AS t"#));

    let err = bulk(
        &mut conn,
        OperationKind::Delete,
        "a.b.c",
        RowSource::typed(&mut items),
        &BulkOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        BulkError::ColumnMapping(ColumnMappingError::InvalidTableName { .. })
    ));
}

#[tokio::test]
async fn test_dropped_call_rolls_back_owned_transaction() {
    let mut conn = item_table();
    // two rows for the first batch, one for the second, then a source that never ends
    let rows = stream::iter((0..3).map(|i| vec![Value::from(format!("s{i}")), Value::Int32(i)]))
        .chain(stream::pending())
        .boxed();
    let options = BulkOptions::new().batch_size(batch_size(2));
    let pending = conn
        .bulk_insert("Item", RowSource::stream(["Name", "Qty"], rows), &options)
        .now_or_never();
    assert!(pending.is_none());

    assert_eq!(conn.dropped_transactions(), 1);
    assert_eq!(conn.aborted_copies(), 1);
    assert_eq!(conn.copies().len(), 1);
    assert_eq!(conn.verbs().last().map(String::as_str), Some("ROLLBACK"));
    assert!(conn.statements_starting_with("COMMIT").is_empty());

    // the connection is left outside any transaction
    let before = conn.statements().len();
    let mut items = Item::many(1);
    conn.bulk_insert("Item", RowSource::typed(&mut items), &BulkOptions::default())
        .await
        .unwrap();
    assert_eq!(
        conn.verbs()[before..],
        ["CATALOG", "CATALOG", "BEGIN", "CREATE", "COPY", "INSERT", "DROP", "COMMIT"]
    );
    assert_eq!(conn.dropped_transactions(), 1);
}

#[tokio::test]
async fn test_native_upsert_cannot_return_identity_keyed_on_it() {
    let mut conn = item_table();
    let mut items = vec![Item::new(0, "new", 1), Item::new(7, "existing", 2)];
    let options = BulkOptions::new()
        .merge(MergeCommandKind::NativeUpsert)
        .identity(IdentityBehavior::ReturnIdentity);
    let err = conn
        .bulk_merge("Item", RowSource::typed(&mut items), &options)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BulkError::OperationPlan(OperationPlanError::IdentityQualifiedUpsert { ref column, .. })
            if column == "Id"
    ));
    assert_eq!(conn.verbs(), ["CATALOG", "CATALOG"]);
    assert_eq!(items[0].id, 0);
}

/// `"Tag" ("Id" bigint identity primary key, "Code" text not null unique)`.
fn tag_table() -> FakeConnection {
    FakeConnection::new().with_table(
        vec![identity_column("Id", 20, "bigint"), required_column("Code", 25, "text")],
        vec![key(true, &["Id"]), key(false, &["Code"])],
    )
}

#[tokio::test]
async fn test_keys_only_upsert_returns_identities() {
    let mut conn = tag_table();
    let mut table = DataTable::new(["Id", "Code"]);
    for code in ["a", "b", "c"] {
        table.push_row(vec![Value::Int64(0), Value::from(code)]);
    }
    conn.reply("SELECT s.", Reply::ordinal_ids(&[(1, 7)]));
    conn.reply("INSERT", Reply::ids(&[40, 41]));
    let options = BulkOptions::new()
        .merge(MergeCommandKind::NativeUpsert)
        .identity(IdentityBehavior::ReturnIdentity)
        .qualifiers(["Code"]);
    let affected = conn
        .bulk_merge("Tag", RowSource::table(&mut table), &options)
        .await
        .unwrap();
    // only the inserted rows are affected
    assert_eq!(affected, 2);
    let ids: Vec<i64> = (0..3)
        .map(|row| i64::try_from(table.get(row, "Id").unwrap().clone()).unwrap())
        .collect();
    assert_eq!(ids, [40, 7, 41]);

    assert_eq!(
        conn.verbs(),
        ["CATALOG", "CATALOG", "BEGIN", "CREATE", "COPY", "SELECT", "INSERT", "DROP", "COMMIT"]
    );
    let insert = &conn.statements_starting_with("INSERT")[0];
    assert!(insert.starts_with(r#"INSERT INTO "Tag" AS t ("Code") SELECT s."Code" FROM "Tag_stg_"#));
    assert!(insert.ends_with(r#"ON CONFLICT ("Code") DO NOTHING RETURNING t."Id""#));
}

#[tokio::test]
async fn test_null_for_not_null_column_fails_the_load() {
    let mut conn = tag_table();
    let mut table = DataTable::new(["Code"]);
    table.push_row(vec![Value::from("a")]);
    table.push_row(vec![Value::Null]);
    let err = conn
        .bulk_insert("Tag", RowSource::table(&mut table), &BulkOptions::default())
        .await
        .unwrap_err();
    match err {
        BulkError::Encoding(e) => {
            assert_eq!(e.column, "Code");
            assert_eq!(e.row, 1);
            assert_eq!(e.kind, EncodingErrorKind::NullNotAllowed);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(conn.aborted_copies(), 1);
    assert!(conn.statements_starting_with("INSERT").is_empty());
    assert_eq!(conn.verbs().last().map(String::as_str), Some("ROLLBACK"));

    // a delete never writes the column
    let mut table = DataTable::new(["Id", "Code"]);
    table.push_row(vec![Value::Int64(3), Value::Null]);
    let deleted = conn
        .bulk_delete("Tag", RowSource::table(&mut table), &BulkOptions::default())
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}
