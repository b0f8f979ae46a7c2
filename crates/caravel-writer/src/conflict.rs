//! Conflict detection against a store snapshot.
//!
//! Finds every stored row that collides with the input, by handle or by
//! any unique-index value, so the driver can delete it in the same
//! transaction that writes the replacement. All reads go through
//! `snapshot_batch_get` at `start_ts`, chunked by the configured batch
//! size.
//!
//! Unique indices force two passes: the index entry stores only the
//! handle, so the colliding row itself needs a second probe on
//! `row_key(old_handle)`. The codec forbids decoding a row out of an
//! index value, which is exactly why the second pass exists.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use caravel_codec::{
    decode_handle_from_unique_index, decode_row_key_handle, decode_row_value, encode_row_key,
    encode_unique_index_key, Datum, Row,
};
use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::TableInfo;
use caravel_common::types::{Handle, Key, Timestamp, Value};
use caravel_store::KvRpcClient;

/// Snapshot-probing conflict resolver for one write.
pub struct ConflictResolver<'a> {
    table: &'a TableInfo,
    client: Arc<dyn KvRpcClient>,
    start_ts: Timestamp,
    batch_size: usize,
    replace: bool,
}

impl<'a> ConflictResolver<'a> {
    /// Creates a resolver reading at `start_ts`.
    #[must_use]
    pub fn new(
        table: &'a TableInfo,
        client: Arc<dyn KvRpcClient>,
        start_ts: Timestamp,
        batch_size: usize,
        replace: bool,
    ) -> Self {
        Self {
            table,
            client,
            start_ts,
            batch_size,
            replace,
        }
    }

    /// Returns the stored rows colliding with `rows`, as rows to delete.
    ///
    /// With replace disabled, any collision fails the write instead.
    pub async fn resolve(&self, rows: &[(Row, Handle)]) -> CaravelResult<Vec<(Row, Handle)>> {
        if !self.table.constraint_check_needed() {
            return Ok(Vec::new());
        }

        // Collisions keyed by handle; BTreeMap keeps the output order
        // deterministic for the rest of the pipeline.
        let mut collisions: BTreeMap<Handle, Row> = BTreeMap::new();

        if self.table.pk_is_handle {
            self.probe_row_keys(
                rows.iter().map(|(_, handle)| *handle).collect(),
                &mut collisions,
            )
            .await?;
        }

        let old_handles = self.probe_unique_indices(rows).await?;
        self.probe_row_keys(old_handles, &mut collisions).await?;

        if !collisions.is_empty() {
            if !self.replace {
                return Err(CaravelError::DataConflict {
                    conflicts: collisions.len(),
                });
            }
            debug!(
                table = %self.table.name,
                conflicts = collisions.len(),
                "overwriting conflicting stored rows"
            );
        }

        Ok(collisions.into_iter().map(|(h, row)| (row, h)).collect())
    }

    /// Fetches `(old_row, handle)` for every handle whose row key exists.
    async fn probe_row_keys(
        &self,
        handles: Vec<Handle>,
        collisions: &mut BTreeMap<Handle, Row>,
    ) -> CaravelResult<()> {
        let keys: Vec<Key> = handles
            .iter()
            .filter(|h| !collisions.contains_key(h))
            .map(|&h| encode_row_key(self.table.table_id, h))
            .collect();
        let hits = self.batch_get(keys).await?;

        for (key, value) in &hits {
            let handle = decode_row_key_handle(self.table.table_id, key)?;
            let row = decode_row_value(value, handle, self.table)?;
            collisions.insert(handle, row);
        }
        Ok(())
    }

    /// Fetches the stored handle behind every colliding unique-index key.
    async fn probe_unique_indices(&self, rows: &[(Row, Handle)]) -> CaravelResult<Vec<Handle>> {
        let mut old_handles = Vec::new();
        for index in self.table.unique_indices() {
            let mut keys = Vec::with_capacity(rows.len());
            for (row, _) in rows {
                // A NULL in the indexed columns never collides.
                if index
                    .column_offsets
                    .iter()
                    .any(|&o| row.get(o).map_or(true, Datum::is_null))
                {
                    continue;
                }
                keys.push(encode_unique_index_key(self.table.table_id, index, row)?);
            }
            let hits = self.batch_get(keys).await?;
            for (_, value) in &hits {
                old_handles.push(decode_handle_from_unique_index(value)?);
            }
        }
        Ok(old_handles)
    }

    /// Chunked `snapshot_batch_get`, hits keyed by request key.
    async fn batch_get(&self, keys: Vec<Key>) -> CaravelResult<HashMap<Key, Value>> {
        let mut hits = HashMap::new();
        for chunk in keys.chunks(self.batch_size) {
            let pairs = self
                .client
                .snapshot_batch_get(chunk.to_vec(), self.start_ts)
                .await?;
            for pair in pairs {
                hits.insert(pair.key, pair.value);
            }
        }
        Ok(hits)
    }
}
