//! In-memory cluster for tests.
//!
//! A single-process stand-in for every external collaborator: percolator
//! KV store (lock, data, and write columns with primary-anchored locks),
//! timestamp oracle, catalog, meta service, and SQL side channel. The
//! integration suite drives the full write pipeline against this.
//!
//! The store is faithful where the protocol depends on it:
//!
//! - prewrite fails on a committed version newer than `start_ts` and on a
//!   foreign lock;
//! - commit converts a lock into a write record and is idempotent per
//!   `(key, start_ts)`;
//! - snapshot reads block on live locks, and resolve expired locks
//!   through the primary: roll forward if the primary committed, roll
//!   back otherwise.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use caravel_codec::{encode_row_key, encode_row_value, decode_row_value, Row};
use caravel_common::constants::MIN_DELAY_CLEAN_TABLE_LOCK_MS;
use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::TableInfo;
use caravel_common::types::{
    DatabaseId, Handle, Key, KvPair, RegionId, TableId, Timestamp, Value,
};

use crate::alloc::{CasOutcome, MetaClient};
use crate::catalog::CatalogClient;
use crate::pd::PdClient;
use crate::region::RegionInfo;
use crate::rpc::{Backoff, KvClientFactory, KvRpcClient};
use crate::sidechannel::SideChannel;

/// A split hint recorded by the in-memory side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitRequest {
    /// Table (row keyspace) split.
    Table {
        /// Database name.
        database: String,
        /// Table name.
        table: String,
        /// Lower handle bound.
        lower: i64,
        /// Upper handle bound.
        upper: i64,
        /// Requested region count.
        regions: u32,
    },
    /// Index keyspace split.
    Index {
        /// Database name.
        database: String,
        /// Table name.
        table: String,
        /// Index name.
        index: String,
        /// Lower bound, string form of the first indexed column.
        lower: String,
        /// Upper bound, string form of the first indexed column.
        upper: String,
        /// Requested region count.
        regions: u32,
    },
}

struct LockRecord {
    primary: Key,
    start_ts: u64,
    ttl_ms: u64,
    deadline: Instant,
}

#[derive(Default)]
struct KvColumns {
    /// Data column: key -> start_ts -> tentative value.
    data: HashMap<Key, BTreeMap<u64, Value>>,
    /// Lock column: key -> live lock.
    locks: HashMap<Key, LockRecord>,
    /// Write column: key -> commit_ts -> start_ts of the committed txn.
    writes: HashMap<Key, BTreeMap<u64, u64>>,
}

/// The whole in-memory cluster.
pub struct MemoryCluster {
    kv: Mutex<KvColumns>,
    last_ts: AtomicU64,
    supports_ttl: AtomicBool,
    open_clients: AtomicI64,

    catalog: Mutex<HashMap<(String, String), TableInfo>>,
    row_ids: Mutex<HashMap<(DatabaseId, TableId), u64>>,
    regions: Mutex<HashMap<TableId, Vec<RegionInfo>>>,
    next_region_id: AtomicU64,

    table_lock_supported: AtomicBool,
    delay_clean_ms: AtomicU64,
    locked_table: Mutex<Option<(String, String)>>,
    channel_closed: AtomicBool,
    split_requests: Mutex<Vec<SplitRequest>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Creates an empty cluster: TTL refresh supported, table locks
    /// supported, lock cleaner at the minimum tolerated delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kv: Mutex::new(KvColumns::default()),
            last_ts: AtomicU64::new(1),
            supports_ttl: AtomicBool::new(true),
            open_clients: AtomicI64::new(0),
            catalog: Mutex::new(HashMap::new()),
            row_ids: Mutex::new(HashMap::new()),
            regions: Mutex::new(HashMap::new()),
            next_region_id: AtomicU64::new(1),
            table_lock_supported: AtomicBool::new(true),
            delay_clean_ms: AtomicU64::new(MIN_DELAY_CLEAN_TABLE_LOCK_MS),
            locked_table: Mutex::new(None),
            channel_closed: AtomicBool::new(false),
            split_requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns a factory that connects clients to this cluster.
    #[must_use]
    pub fn kv_factory(self: &Arc<Self>) -> Arc<dyn KvClientFactory> {
        Arc::new(MemoryKvFactory {
            cluster: Arc::clone(self),
        })
    }

    // =========================================================================
    // Test configuration
    // =========================================================================

    /// Registers a table descriptor.
    pub fn register_table(&self, database: &str, info: TableInfo) {
        self.catalog
            .lock()
            .insert((database.to_string(), info.name.clone()), info);
    }

    /// Advances a table's schema version stamp, as DDL would.
    pub fn bump_update_timestamp(&self, database: &str, table: &str) {
        if let Some(info) = self
            .catalog
            .lock()
            .get_mut(&(database.to_string(), table.to_string()))
        {
            info.update_timestamp += 1;
        }
    }

    /// Splits a table's row keyspace at the given handles.
    ///
    /// With n split points the table gets n + 1 regions.
    pub fn set_regions_by_handle(&self, table_id: TableId, split_handles: &[i64]) {
        let mut bounds: Vec<Key> = split_handles
            .iter()
            .map(|&h| encode_row_key(table_id, Handle::new(h)))
            .collect();
        bounds.sort();

        let mut regions = Vec::with_capacity(bounds.len() + 1);
        let mut start = Key::empty();
        for bound in bounds {
            regions.push(RegionInfo::new(self.fresh_region_id(), start, bound.clone()));
            start = bound;
        }
        regions.push(RegionInfo::new(self.fresh_region_id(), start, Key::empty()));
        self.regions.lock().insert(table_id, regions);
    }

    /// Disables online TTL refresh (pre-3.0.5 server).
    pub fn set_supports_ttl(&self, supported: bool) {
        self.supports_ttl.store(supported, Ordering::SeqCst);
    }

    /// Toggles the server's table-lock support.
    pub fn set_table_lock_supported(&self, supported: bool) {
        self.table_lock_supported.store(supported, Ordering::SeqCst);
    }

    /// Sets the server's `delay-clean-table-lock` value.
    pub fn set_delay_clean_ms(&self, ms: u64) {
        self.delay_clean_ms.store(ms, Ordering::SeqCst);
    }

    /// Kills the side channel, as a dropped SQL connection would.
    pub fn close_side_channel(&self) {
        self.channel_closed.store(true, Ordering::SeqCst);
    }

    // =========================================================================
    // Test inspection
    // =========================================================================

    /// Number of KV clients connected and not yet closed.
    #[must_use]
    pub fn open_client_count(&self) -> i64 {
        self.open_clients.load(Ordering::SeqCst)
    }

    /// Number of live locks in the lock column.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.kv.lock().locks.len()
    }

    /// The split hints received so far.
    #[must_use]
    pub fn split_requests(&self) -> Vec<SplitRequest> {
        self.split_requests.lock().clone()
    }

    /// The table currently write-locked over the side channel, if any.
    #[must_use]
    pub fn locked_table(&self) -> Option<(String, String)> {
        self.locked_table.lock().clone()
    }

    /// A fresh timestamp for reading, without going through a client.
    pub fn read_ts(&self) -> Timestamp {
        self.next_timestamp()
    }

    /// Reads the committed value under `key` visible at `ts`, resolving
    /// expired locks; `None` for absent or deleted.
    pub fn read_committed(&self, key: &Key, ts: Timestamp) -> CaravelResult<Option<Value>> {
        let mut kv = self.kv.lock();
        Self::get_visible(&mut kv, key, ts)
    }

    /// Decodes the committed row at `(table, handle)` visible at `ts`.
    pub fn read_row(
        &self,
        table: &TableInfo,
        handle: Handle,
        ts: Timestamp,
    ) -> CaravelResult<Option<Row>> {
        let key = encode_row_key(table.table_id, handle);
        match self.read_committed(&key, ts)? {
            Some(value) => Ok(Some(decode_row_value(&value, handle, table)?)),
            None => Ok(None),
        }
    }

    /// Seeds a committed row (row KV only) bypassing the protocol.
    pub fn seed_committed(&self, pairs: Vec<KvPair>) {
        let start_ts = self.next_timestamp().version();
        let commit_ts = self.next_timestamp().version();
        let mut kv = self.kv.lock();
        for pair in pairs {
            kv.data
                .entry(pair.key.clone())
                .or_default()
                .insert(start_ts, pair.value);
            kv.writes.entry(pair.key).or_default().insert(commit_ts, start_ts);
        }
    }

    /// Seeds a committed row with its row KV encoded from `row`.
    pub fn seed_row(&self, table: &TableInfo, handle: Handle, row: &Row) -> CaravelResult<()> {
        let key = encode_row_key(table.table_id, handle);
        let value = encode_row_value(table, row)?;
        self.seed_committed(vec![KvPair::new(key, value)]);
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn fresh_region_id(&self) -> RegionId {
        RegionId::new(self.next_region_id.fetch_add(1, Ordering::SeqCst))
    }

    fn next_timestamp(&self) -> Timestamp {
        let physical = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let floor = Timestamp::compose(physical, 0).version();
        let version = self
            .last_ts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(prev.saturating_add(1).max(floor))
            })
            .expect("fetch_update closure always returns Some");
        Timestamp::from_version(version.saturating_add(1).max(floor))
    }

    fn prewrite(
        &self,
        primary: &Key,
        pairs: Vec<KvPair>,
        start_ts: Timestamp,
        ttl_ms: u64,
    ) -> CaravelResult<()> {
        let mut kv = self.kv.lock();
        let start = start_ts.version();

        for pair in &pairs {
            if let Some(writes) = kv.writes.get(&pair.key) {
                if let Some((&commit_ts, _)) = writes
                    .range((Bound::Excluded(start), Bound::Unbounded))
                    .next()
                {
                    return Err(CaravelError::WriteConflict {
                        key: pair.key.clone(),
                        committed_ts: Timestamp::from_version(commit_ts),
                        start_ts,
                    });
                }
            }
            if let Some(lock) = kv.locks.get(&pair.key) {
                if lock.start_ts != start {
                    return Err(CaravelError::KeyLocked {
                        key: pair.key.clone(),
                        lock_ts: Timestamp::from_version(lock.start_ts),
                    });
                }
            }
        }

        for pair in pairs {
            kv.locks.insert(
                pair.key.clone(),
                LockRecord {
                    primary: primary.clone(),
                    start_ts: start,
                    ttl_ms,
                    deadline: Instant::now() + std::time::Duration::from_millis(ttl_ms),
                },
            );
            kv.data.entry(pair.key).or_default().insert(start, pair.value);
        }
        Ok(())
    }

    fn commit_keys(
        &self,
        keys: Vec<Key>,
        start_ts: Timestamp,
        commit_ts: Timestamp,
    ) -> CaravelResult<()> {
        if commit_ts <= start_ts {
            return Err(CaravelError::CommitTsNotAscending {
                start_ts,
                commit_ts,
            });
        }
        let mut kv = self.kv.lock();
        let start = start_ts.version();

        for key in keys {
            let owned = matches!(kv.locks.get(&key), Some(lock) if lock.start_ts == start);
            if owned {
                kv.locks.remove(&key);
                kv.writes
                    .entry(key)
                    .or_default()
                    .insert(commit_ts.version(), start);
            } else {
                let already = kv
                    .writes
                    .get(&key)
                    .is_some_and(|w| w.values().any(|&s| s == start));
                if !already {
                    return Err(CaravelError::remote(
                        "kv",
                        format!("no lock at {start_ts} for key {key}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Committed read with percolator lock resolution.
    fn get_visible(kv: &mut KvColumns, key: &Key, ts: Timestamp) -> CaravelResult<Option<Value>> {
        if let Some(lock) = kv.locks.get(key) {
            if lock.start_ts < ts.version() {
                if Instant::now() < lock.deadline {
                    return Err(CaravelError::KeyLocked {
                        key: key.clone(),
                        lock_ts: Timestamp::from_version(lock.start_ts),
                    });
                }
                // Expired: resolve through the primary.
                let lock_start = lock.start_ts;
                let primary = lock.primary.clone();
                let primary_commit = kv
                    .writes
                    .get(&primary)
                    .and_then(|w| w.iter().find(|&(_, &s)| s == lock_start).map(|(&c, _)| c));
                kv.locks.remove(key);
                match primary_commit {
                    Some(commit_ts) => {
                        kv.writes
                            .entry(key.clone())
                            .or_default()
                            .insert(commit_ts, lock_start);
                    }
                    None => {
                        if let Some(data) = kv.data.get_mut(key) {
                            data.remove(&lock_start);
                        }
                    }
                }
            }
        }

        let Some(writes) = kv.writes.get(key) else {
            return Ok(None);
        };
        let Some((_, &start)) = writes.range(..=ts.version()).next_back() else {
            return Ok(None);
        };
        let value = kv
            .data
            .get(key)
            .and_then(|d| d.get(&start))
            .cloned()
            .unwrap_or_else(Value::empty);
        if value.is_delete() {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl PdClient for MemoryCluster {
    async fn get_timestamp(&self) -> CaravelResult<Timestamp> {
        Ok(self.next_timestamp())
    }

    async fn regions_for_table(&self, table_id: TableId) -> CaravelResult<Vec<RegionInfo>> {
        let mut regions = self.regions.lock();
        let list = regions.entry(table_id).or_insert_with(|| {
            vec![RegionInfo::new(
                self.fresh_region_id(),
                Key::empty(),
                Key::empty(),
            )]
        });
        Ok(list.clone())
    }
}

#[async_trait]
impl CatalogClient for MemoryCluster {
    async fn table_info(&self, database: &str, table: &str) -> CaravelResult<TableInfo> {
        self.catalog
            .lock()
            .get(&(database.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| CaravelError::TableNotFound {
                database: database.to_string(),
                table: table.to_string(),
            })
    }

    async fn table_update_timestamp(&self, database: &str, table: &str) -> CaravelResult<i64> {
        Ok(self.table_info(database, table).await?.update_timestamp)
    }
}

#[async_trait]
impl MetaClient for MemoryCluster {
    async fn row_id_high_water(&self, db: DatabaseId, table: TableId) -> CaravelResult<u64> {
        Ok(*self.row_ids.lock().get(&(db, table)).unwrap_or(&0))
    }

    async fn cas_row_id_high_water(
        &self,
        db: DatabaseId,
        table: TableId,
        expect: u64,
        next: u64,
    ) -> CaravelResult<CasOutcome> {
        let mut marks = self.row_ids.lock();
        let mark = marks.entry((db, table)).or_insert(0);
        if *mark != expect {
            return Ok(CasOutcome::Raced { actual: *mark });
        }
        *mark = next;
        Ok(CasOutcome::Swapped)
    }
}

#[async_trait]
impl SideChannel for MemoryCluster {
    async fn supports_table_lock(&self) -> CaravelResult<bool> {
        self.fail_if_closed()?;
        Ok(self.table_lock_supported.load(Ordering::SeqCst))
    }

    async fn delay_clean_table_lock_ms(&self) -> CaravelResult<u64> {
        self.fail_if_closed()?;
        Ok(self.delay_clean_ms.load(Ordering::SeqCst))
    }

    async fn lock_table_write(&self, database: &str, table: &str) -> CaravelResult<()> {
        self.fail_if_closed()?;
        let mut locked = self.locked_table.lock();
        if let Some((db, t)) = locked.as_ref() {
            return Err(CaravelError::remote(
                "side-channel",
                format!("table {db}.{t} already write-locked"),
            ));
        }
        *locked = Some((database.to_string(), table.to_string()));
        Ok(())
    }

    async fn unlock_tables(&self) -> CaravelResult<()> {
        self.fail_if_closed()?;
        *self.locked_table.lock() = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.channel_closed.load(Ordering::SeqCst)
    }

    async fn split_table_region(
        &self,
        database: &str,
        table: &str,
        lower: i64,
        upper: i64,
        regions: u32,
    ) -> CaravelResult<()> {
        self.fail_if_closed()?;
        self.split_requests.lock().push(SplitRequest::Table {
            database: database.to_string(),
            table: table.to_string(),
            lower,
            upper,
            regions,
        });
        Ok(())
    }

    async fn split_index_region(
        &self,
        database: &str,
        table: &str,
        index: &str,
        lower: &str,
        upper: &str,
        regions: u32,
    ) -> CaravelResult<()> {
        self.fail_if_closed()?;
        self.split_requests.lock().push(SplitRequest::Index {
            database: database.to_string(),
            table: table.to_string(),
            index: index.to_string(),
            lower: lower.to_string(),
            upper: upper.to_string(),
            regions,
        });
        Ok(())
    }
}

impl MemoryCluster {
    fn fail_if_closed(&self) -> CaravelResult<()> {
        if self.channel_closed.load(Ordering::SeqCst) {
            return Err(CaravelError::SideChannelClosed);
        }
        Ok(())
    }
}

struct MemoryKvFactory {
    cluster: Arc<MemoryCluster>,
}

#[async_trait]
impl KvClientFactory for MemoryKvFactory {
    async fn connect(&self) -> CaravelResult<Arc<dyn KvRpcClient>> {
        self.cluster.open_clients.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryKvClient {
            cluster: Arc::clone(&self.cluster),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryKvClient {
    cluster: Arc<MemoryCluster>,
    closed: AtomicBool,
}

impl MemoryKvClient {
    fn check_open(&self) -> CaravelResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CaravelError::remote("kv", "client already closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvRpcClient for MemoryKvClient {
    async fn prewrite_primary(
        &self,
        _backoff: Backoff,
        primary: KvPair,
        start_ts: Timestamp,
        lock_ttl_ms: u64,
    ) -> CaravelResult<()> {
        self.check_open()?;
        let key = primary.key.clone();
        self.cluster
            .prewrite(&key, vec![primary], start_ts, lock_ttl_ms)
    }

    async fn prewrite_secondaries(
        &self,
        primary: Key,
        pairs: Vec<KvPair>,
        start_ts: Timestamp,
        lock_ttl_ms: u64,
    ) -> CaravelResult<()> {
        self.check_open()?;
        self.cluster.prewrite(&primary, pairs, start_ts, lock_ttl_ms)
    }

    async fn commit_primary(
        &self,
        _backoff: Backoff,
        primary: Key,
        start_ts: Timestamp,
        commit_ts: Timestamp,
    ) -> CaravelResult<()> {
        self.check_open()?;
        self.cluster.commit_keys(vec![primary], start_ts, commit_ts)
    }

    async fn commit_secondaries(
        &self,
        keys: Vec<Key>,
        start_ts: Timestamp,
        commit_ts: Timestamp,
    ) -> CaravelResult<()> {
        self.check_open()?;
        self.cluster.commit_keys(keys, start_ts, commit_ts)
    }

    async fn txn_heartbeat(
        &self,
        primary: Key,
        start_ts: Timestamp,
        ttl_ms: u64,
    ) -> CaravelResult<u64> {
        self.check_open()?;
        let mut kv = self.cluster.kv.lock();
        let lock = kv.locks.get_mut(&primary).ok_or_else(|| {
            CaravelError::remote("kv", format!("no primary lock at {primary} to heartbeat"))
        })?;
        if lock.start_ts != start_ts.version() {
            return Err(CaravelError::remote("kv", "primary lock owned by another txn"));
        }
        lock.ttl_ms = lock.ttl_ms.max(ttl_ms);
        lock.deadline = Instant::now() + std::time::Duration::from_millis(lock.ttl_ms);
        Ok(lock.ttl_ms)
    }

    async fn snapshot_batch_get(
        &self,
        keys: Vec<Key>,
        ts: Timestamp,
    ) -> CaravelResult<Vec<KvPair>> {
        self.check_open()?;
        let mut kv = self.cluster.kv.lock();
        let mut hits = Vec::new();
        for key in keys {
            if let Some(value) = MemoryCluster::get_visible(&mut kv, &key, ts)? {
                hits.push(KvPair::new(key, value));
            }
        }
        Ok(hits)
    }

    fn supports_ttl_update(&self) -> bool {
        self.cluster.supports_ttl.load(Ordering::SeqCst)
    }

    async fn close(&self) -> CaravelResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cluster.open_clients.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
