//! End-to-end batch-write tests.
//!
//! Each test drives the full pipeline against the in-memory cluster:
//! normalization, deduplication, conflict probing, expansion, region
//! partitioning, and the two-phase commit.

use std::sync::Arc;
use std::time::Duration;

use caravel_codec::{
    encode_handle_value, encode_non_unique_index_key, encode_unique_index_key, Datum, Row,
};
use caravel_common::config::WriteConfig;
use caravel_common::error::CaravelError;
use caravel_common::schema::{ColumnInfo, FieldType, IndexInfo, TableInfo};
use caravel_common::types::{DatabaseId, Handle, IndexId, KvPair, TableId};
use caravel_store::memory::{MemoryCluster, SplitRequest};
use caravel_store::{CatalogClient, MetaClient, PdClient, SideChannel};
use caravel_writer::{BatchWriter, Record, VecDataset, WriteTarget};

const DB: &str = "app";

fn writer_for(cluster: &Arc<MemoryCluster>) -> BatchWriter {
    BatchWriter::new(
        Arc::clone(cluster) as Arc<dyn PdClient>,
        cluster.kv_factory(),
        Arc::clone(cluster) as Arc<dyn CatalogClient>,
        Arc::clone(cluster) as Arc<dyn MetaClient>,
    )
    .with_side_channel(Arc::clone(cluster) as Arc<dyn SideChannel>)
}

/// `t(a BIGINT NOT NULL, b BIGINT)`: surrogate handles, no indices.
fn plain_table() -> TableInfo {
    TableInfo::new(
        DatabaseId::new(1),
        TableId::new(101),
        "plain",
        vec![
            ColumnInfo::new("a", 0, FieldType::BigInt).not_null(),
            ColumnInfo::new("b", 1, FieldType::BigInt),
        ],
    )
}

/// `t(id BIGINT PRIMARY KEY, uk BIGINT UNIQUE, v VARCHAR)`: pk is handle.
fn pk_uk_table() -> TableInfo {
    TableInfo::new(
        DatabaseId::new(1),
        TableId::new(102),
        "accounts",
        vec![
            ColumnInfo::new("id", 0, FieldType::BigInt).not_null(),
            ColumnInfo::new("uk", 1, FieldType::BigInt),
            ColumnInfo::new("v", 2, FieldType::Varchar),
        ],
    )
    .with_pk_handle(0)
    .with_index(IndexInfo::new(IndexId::new(1), "uk", true, vec![1]))
}

/// `t(uk BIGINT UNIQUE, v VARCHAR)`: surrogate handles plus a unique index.
fn surrogate_uk_table() -> TableInfo {
    TableInfo::new(
        DatabaseId::new(1),
        TableId::new(103),
        "events",
        vec![
            ColumnInfo::new("uk", 0, FieldType::BigInt).not_null(),
            ColumnInfo::new("v", 1, FieldType::Varchar),
        ],
    )
    .with_index(IndexInfo::new(IndexId::new(1), "uk", true, vec![0]))
}

/// `t(id BIGINT AUTO_INCREMENT PRIMARY KEY, v VARCHAR NOT NULL)`.
fn auto_inc_table() -> TableInfo {
    TableInfo::new(
        DatabaseId::new(1),
        TableId::new(104),
        "seq",
        vec![
            ColumnInfo::new("id", 0, FieldType::BigInt)
                .not_null()
                .auto_increment(),
            ColumnInfo::new("v", 1, FieldType::Varchar).not_null(),
        ],
    )
    .with_pk_handle(0)
}

fn seed_account(cluster: &MemoryCluster, table: &TableInfo, id: i64, uk: i64, v: &str) {
    let row = Row::from_datums(vec![
        Datum::Int(id),
        Datum::Int(uk),
        Datum::Str(v.to_string()),
    ]);
    cluster.seed_row(table, Handle::new(id), &row).unwrap();
    let index = &table.indices[0];
    let ikey = encode_unique_index_key(table.table_id, index, &row).unwrap();
    cluster.seed_committed(vec![KvPair::new(ikey, encode_handle_value(Handle::new(id)))]);
}

/// E1: fresh insert into a table with surrogate handles and no indices,
/// two regions, write concurrency two.
#[tokio::test]
async fn test_fresh_insert_two_partitions() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = plain_table();
    cluster.register_table(DB, table.clone());
    cluster.set_regions_by_handle(table.table_id, &[1]);

    let dataset = VecDataset::single(vec![
        Record::new()
            .with_field("a", Datum::Int(1))
            .with_field("b", Datum::Int(2)),
        Record::new()
            .with_field("a", Datum::Int(3))
            .with_field("b", Datum::Int(4)),
    ]);
    let config = WriteConfig::for_testing().with_write_concurrency(2);
    let summary = writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "plain"), &config)
        .await
        .unwrap();

    assert_eq!(summary.rows_written, 2);
    assert!(summary.commit_ts > summary.start_ts);

    // Handles are contiguous from the allocator's base (fresh table: 0).
    let read = cluster.read_ts();
    let first = cluster.read_row(&table, Handle::new(0), read).unwrap().unwrap();
    assert_eq!(first.get(0), Some(&Datum::Int(1)));
    assert_eq!(first.get(1), Some(&Datum::Int(2)));
    let second = cluster.read_row(&table, Handle::new(1), read).unwrap().unwrap();
    assert_eq!(second.get(0), Some(&Datum::Int(3)));

    assert_eq!(cluster.lock_count(), 0);
    assert_eq!(cluster.open_client_count(), 0);
}

/// E2: replace on a unique-index conflict rewrites the stored row in the
/// same transaction and keeps the index pointing at the same handle.
#[tokio::test]
async fn test_replace_on_unique_index_conflict() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = pk_uk_table();
    cluster.register_table(DB, table.clone());
    seed_account(&cluster, &table, 1, 10, "a");

    let dataset = VecDataset::single(vec![Record::new()
        .with_field("id", Datum::Int(1))
        .with_field("uk", Datum::Int(10))
        .with_field("v", Datum::Str("b".to_string()))]);
    let config = WriteConfig::for_testing().with_replace(true);
    writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "accounts"), &config)
        .await
        .unwrap();

    let read = cluster.read_ts();
    let row = cluster.read_row(&table, Handle::new(1), read).unwrap().unwrap();
    assert_eq!(row.get(2), Some(&Datum::Str("b".to_string())));

    // The unique index entry still resolves to handle 1.
    let ikey = encode_unique_index_key(table.table_id, &table.indices[0], &row).unwrap();
    let ivalue = cluster.read_committed(&ikey, read).unwrap().unwrap();
    assert_eq!(
        caravel_codec::decode_handle_from_unique_index(&ivalue).unwrap(),
        Handle::new(1)
    );
}

/// E3: without replace, a conflict fails the write and leaves the store
/// untouched.
#[tokio::test]
async fn test_reject_on_conflict_leaves_store_unchanged() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = pk_uk_table();
    cluster.register_table(DB, table.clone());
    seed_account(&cluster, &table, 1, 10, "a");

    let dataset = VecDataset::single(vec![Record::new()
        .with_field("id", Datum::Int(1))
        .with_field("uk", Datum::Int(10))
        .with_field("v", Datum::Str("b".to_string()))]);
    let config = WriteConfig::for_testing().with_replace(false);
    let err = writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "accounts"), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, CaravelError::DataConflict { .. }));

    let read = cluster.read_ts();
    let row = cluster.read_row(&table, Handle::new(1), read).unwrap().unwrap();
    assert_eq!(row.get(2), Some(&Datum::Str("a".to_string())));
    assert_eq!(cluster.lock_count(), 0);
}

/// E4: two input rows share a unique key, and a third stored row holds the
/// same key. One representative survives dedup, the stored row is deleted,
/// and no key reaches the store as both put and delete.
#[tokio::test]
async fn test_insert_over_delete_merge() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = surrogate_uk_table();
    cluster.register_table(DB, table.clone());

    // Stored third row with uk = 5 at a handle far from fresh surrogates.
    let old = Row::from_datums(vec![Datum::Int(5), Datum::Str("old".to_string())]);
    let old_handle = Handle::new(9_000);
    cluster.seed_row(&table, old_handle, &old).unwrap();
    let old_ikey = encode_unique_index_key(table.table_id, &table.indices[0], &old).unwrap();
    cluster.seed_committed(vec![KvPair::new(old_ikey.clone(), encode_handle_value(old_handle))]);

    let dataset = VecDataset::single(vec![
        Record::new()
            .with_field("uk", Datum::Int(5))
            .with_field("v", Datum::Str("x".to_string())),
        Record::new()
            .with_field("uk", Datum::Int(5))
            .with_field("v", Datum::Str("y".to_string())),
    ]);
    let config = WriteConfig::for_testing().with_replace(true);
    let summary = writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "events"), &config)
        .await
        .unwrap();
    assert_eq!(summary.rows_written, 1);

    let read = cluster.read_ts();
    // The kept representative is the first input row, under the first
    // allocated surrogate handle.
    let kept = cluster.read_row(&table, Handle::new(0), read).unwrap().unwrap();
    assert_eq!(kept.get(1), Some(&Datum::Str("x".to_string())));
    // The old row is gone, and the unique index points at the kept row.
    assert!(cluster.read_row(&table, old_handle, read).unwrap().is_none());
    let ivalue = cluster.read_committed(&old_ikey, read).unwrap().unwrap();
    assert_eq!(
        caravel_codec::decode_handle_from_unique_index(&ivalue).unwrap(),
        Handle::new(0)
    );
}

/// E5: a schema change between prewrite and commit aborts the write; the
/// expired locks resolve to nothing.
#[tokio::test]
async fn test_schema_change_during_prewrite_aborts() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = plain_table();
    cluster.register_table(DB, table.clone());

    let write_cluster = Arc::clone(&cluster);
    let write = tokio::spawn(async move {
        let dataset = VecDataset::single(vec![Record::new()
            .with_field("a", Datum::Int(1))
            .with_field("b", Datum::Int(2))]);
        let config = WriteConfig {
            lock_ttl_seconds: 1,
            sleep_after_prewrite_primary_ms: 300,
            ..WriteConfig::for_testing()
        };
        writer_for(&write_cluster)
            .write(&dataset, &WriteTarget::new(DB, "plain"), &config)
            .await
    });

    // DDL lands while the primary lock is held.
    tokio::time::sleep(Duration::from_millis(100)).await;
    cluster.bump_update_timestamp(DB, "plain");

    let err = write.await.unwrap().unwrap_err();
    assert!(matches!(err, CaravelError::SchemaChanged { .. }));

    // After the lock TTL passes, readers roll the orphan locks back.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let read = cluster.read_ts();
    assert!(cluster.read_row(&table, Handle::new(0), read).unwrap().is_none());
    assert_eq!(cluster.lock_count(), 0);
}

/// E6: an omitted auto-increment column is filled `base + i` in input
/// order, and those values are the handles.
#[tokio::test]
async fn test_auto_increment_allocation() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = auto_inc_table();
    cluster.register_table(DB, table.clone());

    let dataset = VecDataset::single(vec![
        Record::new().with_field("v", Datum::Str("x".to_string())),
        Record::new().with_field("v", Datum::Str("y".to_string())),
        Record::new().with_field("v", Datum::Str("z".to_string())),
    ]);
    writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "seq"), &WriteConfig::for_testing())
        .await
        .unwrap();

    let read = cluster.read_ts();
    for (i, v) in ["x", "y", "z"].iter().enumerate() {
        let row = cluster
            .read_row(&table, Handle::new(i as i64), read)
            .unwrap()
            .unwrap();
        assert_eq!(row.get(0), Some(&Datum::Int(i as i64)));
        assert_eq!(row.get(1), Some(&Datum::Str((*v).to_string())));
    }
}

/// Duplicate unique keys within the input collapse to one persisted row.
#[tokio::test]
async fn test_input_dedup_persists_one_row() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = pk_uk_table();
    cluster.register_table(DB, table.clone());

    let dataset = VecDataset::single(vec![
        Record::new()
            .with_field("id", Datum::Int(7))
            .with_field("uk", Datum::Int(1))
            .with_field("v", Datum::Str("first".to_string())),
        Record::new()
            .with_field("id", Datum::Int(7))
            .with_field("uk", Datum::Int(2))
            .with_field("v", Datum::Str("second".to_string())),
    ]);
    let summary = writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "accounts"), &WriteConfig::for_testing())
        .await
        .unwrap();
    assert_eq!(summary.rows_written, 1);

    let read = cluster.read_ts();
    let row = cluster.read_row(&table, Handle::new(7), read).unwrap().unwrap();
    assert_eq!(row.get(2), Some(&Datum::Str("first".to_string())));
}

/// A table with neither pk-handle nor unique indices skips conflict
/// probing entirely: identical rows land under distinct handles.
#[tokio::test]
async fn test_plain_table_writes_identical_rows() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = plain_table();
    cluster.register_table(DB, table.clone());

    let record = Record::new()
        .with_field("a", Datum::Int(1))
        .with_field("b", Datum::Int(1));
    let dataset = VecDataset::single(vec![record.clone(), record]);
    let summary = writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "plain"), &WriteConfig::for_testing())
        .await
        .unwrap();
    assert_eq!(summary.rows_written, 2);

    let read = cluster.read_ts();
    assert!(cluster.read_row(&table, Handle::new(0), read).unwrap().is_some());
    assert!(cluster.read_row(&table, Handle::new(1), read).unwrap().is_some());
}

/// Every non-unique index key carries the row's handle as its tail and
/// stores the single-byte marker.
#[tokio::test]
async fn test_non_unique_index_entries() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = TableInfo::new(
        DatabaseId::new(1),
        TableId::new(105),
        "tagged",
        vec![
            ColumnInfo::new("tag", 0, FieldType::Varchar).not_null(),
            ColumnInfo::new("v", 1, FieldType::BigInt),
        ],
    )
    .with_index(IndexInfo::new(IndexId::new(1), "tag", false, vec![0]));
    cluster.register_table(DB, table.clone());

    let dataset = VecDataset::single(vec![
        Record::new()
            .with_field("tag", Datum::Str("red".to_string()))
            .with_field("v", Datum::Int(1)),
        Record::new()
            .with_field("tag", Datum::Str("red".to_string()))
            .with_field("v", Datum::Int(2)),
    ]);
    writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "tagged"), &WriteConfig::for_testing())
        .await
        .unwrap();

    // Both rows share the tag; the handle tail keeps their index keys
    // distinct.
    let read = cluster.read_ts();
    for handle in [Handle::new(0), Handle::new(1)] {
        let row = cluster.read_row(&table, handle, read).unwrap().unwrap();
        let ikey =
            encode_non_unique_index_key(table.table_id, &table.indices[0], &row, handle).unwrap();
        let ivalue = cluster.read_committed(&ikey, read).unwrap().unwrap();
        assert_eq!(ivalue.as_bytes(), b"0");
    }
}

/// Table-lock lifecycle: acquired before encoding, released after commit,
/// and the unsupported/short-delay servers are refused.
#[tokio::test]
async fn test_table_lock_paths() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.register_table(DB, plain_table());
    let dataset = VecDataset::single(vec![Record::new()
        .with_field("a", Datum::Int(1))
        .with_field("b", Datum::Int(2))]);
    let target = WriteTarget::new(DB, "plain");

    let config = WriteConfig {
        use_table_lock: true,
        ..WriteConfig::for_testing()
    };
    writer_for(&cluster).write(&dataset, &target, &config).await.unwrap();
    assert_eq!(cluster.locked_table(), None);

    cluster.set_table_lock_supported(false);
    let err = writer_for(&cluster)
        .write(&dataset, &target, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, CaravelError::TableLockUnsupported));

    let escape = WriteConfig {
        allow_write_without_lock: true,
        ..config.clone()
    };
    writer_for(&cluster).write(&dataset, &target, &escape).await.unwrap();

    cluster.set_table_lock_supported(true);
    cluster.set_delay_clean_ms(1_000);
    let err = writer_for(&cluster)
        .write(&dataset, &target, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, CaravelError::DelayCleanTableLockTooSmall { .. }));
}

/// Empty input succeeds without writing, but only after the same
/// timestamp and table-lock preconditions every other write goes
/// through.
#[tokio::test]
async fn test_empty_input_short_circuits() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.register_table(DB, plain_table());
    let dataset = VecDataset::single(Vec::new());
    let target = WriteTarget::new(DB, "plain");

    let summary = writer_for(&cluster)
        .write(&dataset, &target, &WriteConfig::for_testing())
        .await
        .unwrap();
    assert_eq!(summary.rows_written, 0);
    assert!(!summary.start_ts.is_zero());
    assert_eq!(summary.commit_ts, summary.start_ts);
    assert_eq!(cluster.open_client_count(), 0);
    assert_eq!(cluster.lock_count(), 0);

    // The table lock is taken and released even for an empty write.
    let locked = WriteConfig {
        use_table_lock: true,
        ..WriteConfig::for_testing()
    };
    writer_for(&cluster).write(&dataset, &target, &locked).await.unwrap();
    assert_eq!(cluster.locked_table(), None);

    // And its preconditions still fail an empty write.
    cluster.set_table_lock_supported(false);
    let err = writer_for(&cluster)
        .write(&dataset, &target, &locked)
        .await
        .unwrap_err();
    assert!(matches!(err, CaravelError::TableLockUnsupported));
}

/// Configuration rejections: disabled writer, partitioned table,
/// generated columns, missing table.
#[tokio::test]
async fn test_configuration_rejections() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.register_table(DB, plain_table().partitioned());
    let mut generated = plain_table();
    generated.name = "generated".to_string();
    generated.table_id = TableId::new(106);
    generated.columns[1] = ColumnInfo::new("b", 1, FieldType::BigInt).generated();
    cluster.register_table(DB, generated);

    let writer = writer_for(&cluster);
    let dataset = VecDataset::single(vec![Record::new()
        .with_field("a", Datum::Int(1))
        .with_field("b", Datum::Int(2))]);

    let disabled = WriteConfig {
        enabled: false,
        ..WriteConfig::for_testing()
    };
    assert!(matches!(
        writer.write(&dataset, &WriteTarget::new(DB, "plain"), &disabled).await,
        Err(CaravelError::BatchWriteDisabled)
    ));
    assert!(matches!(
        writer
            .write(&dataset, &WriteTarget::new(DB, "plain"), &WriteConfig::for_testing())
            .await,
        Err(CaravelError::TablePartitioned { .. })
    ));
    assert!(matches!(
        writer
            .write(&dataset, &WriteTarget::new(DB, "generated"), &WriteConfig::for_testing())
            .await,
        Err(CaravelError::GeneratedColumns { .. })
    ));
    assert!(matches!(
        writer
            .write(&dataset, &WriteTarget::new(DB, "missing"), &WriteConfig::for_testing())
            .await,
        Err(CaravelError::TableNotFound { .. })
    ));
}

/// With the secondary commit skipped, the primary alone makes the write
/// durable: readers roll the remaining locks forward once they expire.
#[tokio::test]
async fn test_skipped_secondaries_roll_forward() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = plain_table();
    cluster.register_table(DB, table.clone());

    let dataset = VecDataset::single(vec![
        Record::new()
            .with_field("a", Datum::Int(1))
            .with_field("b", Datum::Int(2)),
        Record::new()
            .with_field("a", Datum::Int(3))
            .with_field("b", Datum::Int(4)),
    ]);
    let config = WriteConfig {
        skip_commit_secondary_keys: true,
        lock_ttl_seconds: 1,
        ..WriteConfig::for_testing()
    };
    writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "plain"), &config)
        .await
        .unwrap();
    assert!(cluster.lock_count() > 0);

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let read = cluster.read_ts();
    assert!(cluster.read_row(&table, Handle::new(0), read).unwrap().is_some());
    assert!(cluster.read_row(&table, Handle::new(1), read).unwrap().is_some());
    assert_eq!(cluster.lock_count(), 0);
}

/// Split hints are emitted before the write when region splitting is on.
#[tokio::test]
async fn test_region_split_hints_emitted() {
    let cluster = Arc::new(MemoryCluster::new());
    let table = pk_uk_table();
    cluster.register_table(DB, table.clone());

    let dataset = VecDataset::single(vec![
        Record::new()
            .with_field("id", Datum::Int(10))
            .with_field("uk", Datum::Int(100))
            .with_field("v", Datum::Str("a".to_string())),
        Record::new()
            .with_field("id", Datum::Int(20))
            .with_field("uk", Datum::Int(200))
            .with_field("v", Datum::Str("b".to_string())),
    ]);
    let mut config = WriteConfig::for_testing().with_region_split(3);
    config.replace = false;
    writer_for(&cluster)
        .write(&dataset, &WriteTarget::new(DB, "accounts"), &config)
        .await
        .unwrap();

    let requests = cluster.split_requests();
    assert!(requests.iter().any(|r| matches!(
        r,
        SplitRequest::Table { regions: 3, lower: 0, .. }
    )));
    assert!(requests.iter().any(|r| matches!(
        r,
        SplitRequest::Index { regions: 3, .. }
    )));
}
