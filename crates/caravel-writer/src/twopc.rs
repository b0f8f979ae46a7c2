//! Two-phase commit driver.
//!
//! Drives one percolator transaction over the partitioned KV stream:
//!
//! 1. designate the first pair of the cached stream as primary;
//! 2. prewrite the primary on the coordinator;
//! 3. optionally start a TTL keep-alive pinging the primary lock;
//! 4. prewrite secondaries in parallel, one worker client per partition;
//! 5. acquire `commit_ts`, require it past `start_ts`;
//! 6. re-check the schema (unless the table write-lock is held) and the
//!    side channel's health;
//! 7. commit the primary — the transaction is durable from here;
//! 8. commit secondaries in parallel, swallowing errors: readers resolve
//!    residual secondary locks through the committed primary.
//!
//! Any failure before the primary commit aborts the write; the store's
//! lock resolver garbage-collects the partial locks once they expire.
//!
//! ```text
//! INIT -> LOCKED -> ENCODED -> PREWROTE_PRIMARY -> PREWROTE_ALL
//!      -> COMMITTED_PRIMARY -> DONE
//!                          \-> ABORTED (any failure before COMMITTED_PRIMARY)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use caravel_common::config::WriteConfig;
use caravel_common::constants::{MAX_TTL_REFRESH_MS, TTL_HEARTBEAT_DIVISOR};
use caravel_common::error::{CaravelError, CaravelResult};
use caravel_common::schema::TableInfo;
use caravel_common::types::{Key, KvPair, Timestamp};
use caravel_store::{Backoff, CatalogClient, KvClientFactory, KvRpcClient, PdClient, SideChannel};

/// Coordinator-side commit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// Nothing has happened yet.
    Init,
    /// The table write-lock is held.
    Locked,
    /// The KV stream is encoded and partitioned.
    Encoded,
    /// The primary pair is prewritten.
    PrewrotePrimary,
    /// Every secondary partition is prewritten.
    PrewroteAll,
    /// The primary is committed; the write is durable.
    CommittedPrimary,
    /// Secondaries handled; the write is finished.
    Done,
    /// The write failed before the primary commit.
    Aborted,
}

impl CommitState {
    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Locked)
                | (Self::Init | Self::Locked, Self::Encoded)
                | (Self::Encoded, Self::PrewrotePrimary | Self::Done)
                | (Self::PrewrotePrimary, Self::PrewroteAll)
                | (Self::PrewroteAll, Self::CommittedPrimary)
                | (Self::CommittedPrimary, Self::Done)
        ) || (next == Self::Aborted
            && !matches!(self, Self::CommittedPrimary | Self::Done | Self::Aborted))
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Locked => "LOCKED",
            Self::Encoded => "ENCODED",
            Self::PrewrotePrimary => "PREWROTE_PRIMARY",
            Self::PrewroteAll => "PREWROTE_ALL",
            Self::CommittedPrimary => "COMMITTED_PRIMARY",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        };
        write!(f, "{name}")
    }
}

/// Result of a finished commit.
#[derive(Debug, Clone, Copy)]
pub struct CommitOutcome {
    /// The transaction's commit timestamp.
    pub commit_ts: Timestamp,
    /// Total KV pairs written (primary included).
    pub keys_written: usize,
}

struct KeepAlive {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives one transaction's two-phase commit.
pub struct TwoPhaseCommitter {
    factory: Arc<dyn KvClientFactory>,
    pd: Arc<dyn PdClient>,
    catalog: Arc<dyn CatalogClient>,
    side_channel: Option<Arc<dyn SideChannel>>,
    config: WriteConfig,
    database: String,
    table: TableInfo,
    table_lock_held: bool,
    state: CommitState,
    keepalive: Option<KeepAlive>,
}

impl TwoPhaseCommitter {
    /// Creates a committer in `INIT`.
    #[must_use]
    pub fn new(
        factory: Arc<dyn KvClientFactory>,
        pd: Arc<dyn PdClient>,
        catalog: Arc<dyn CatalogClient>,
        side_channel: Option<Arc<dyn SideChannel>>,
        database: impl Into<String>,
        table: TableInfo,
        config: WriteConfig,
    ) -> Self {
        Self {
            factory,
            pd,
            catalog,
            side_channel,
            config,
            database: database.into(),
            table,
            table_lock_held: false,
            state: CommitState::Init,
            keepalive: None,
        }
    }

    /// Records that the caller holds the table write-lock, which also
    /// waives the schema-change guard.
    pub fn mark_locked(&mut self) -> CaravelResult<()> {
        self.advance(CommitState::Locked)?;
        self.table_lock_held = true;
        Ok(())
    }

    /// Current commit state.
    #[must_use]
    pub fn state(&self) -> CommitState {
        self.state
    }

    /// Runs the commit over the partitioned KV stream.
    ///
    /// The buckets are the cached stream: primary selection here and the
    /// commit phases below iterate the same materialized pairs, so the
    /// primary is stable across both phases.
    pub async fn execute(
        &mut self,
        buckets: Vec<Vec<KvPair>>,
        start_ts: Timestamp,
    ) -> CaravelResult<CommitOutcome> {
        self.advance(CommitState::Encoded)?;
        let result = self.run(buckets, start_ts).await;
        if result.is_err() && self.state.can_transition(CommitState::Aborted) {
            let from = self.state;
            self.state = CommitState::Aborted;
            warn!(table = %self.table.name, %from, "write aborted before primary commit");
        }
        result
    }

    async fn run(
        &mut self,
        buckets: Vec<Vec<KvPair>>,
        start_ts: Timestamp,
    ) -> CaravelResult<CommitOutcome> {
        let total: usize = buckets.iter().map(Vec::len).sum();
        let Some(primary) = buckets
            .iter()
            .find(|b| !b.is_empty())
            .map(|b| b[0].clone())
        else {
            self.advance(CommitState::Done)?;
            return Ok(CommitOutcome {
                commit_ts: start_ts,
                keys_written: 0,
            });
        };
        info!(
            table = %self.table.name,
            keys = total,
            partitions = buckets.iter().filter(|b| !b.is_empty()).count(),
            %start_ts,
            "starting two-phase commit"
        );

        let coordinator = self.factory.connect().await?;
        let outcome = self
            .drive(&coordinator, buckets, primary, start_ts, total)
            .await;
        self.stop_keepalive().await;
        if let Err(e) = coordinator.close().await {
            warn!(error = %e, "failed to close coordinator client");
        }
        outcome
    }

    async fn drive(
        &mut self,
        coordinator: &Arc<dyn KvRpcClient>,
        buckets: Vec<Vec<KvPair>>,
        primary: KvPair,
        start_ts: Timestamp,
        total: usize,
    ) -> CaravelResult<CommitOutcome> {
        let primary_key = primary.key.clone();
        let ttl_ms = self.config.lock_ttl_ms();

        coordinator
            .prewrite_primary(Backoff::batch_prewrite(), primary, start_ts, ttl_ms)
            .await?;
        self.advance(CommitState::PrewrotePrimary)?;

        if self.config.ttl_update_enabled {
            if !coordinator.supports_ttl_update() {
                return Err(CaravelError::invalid_config(
                    "ttl_update_enabled requires a server with online TTL refresh (>= 3.0.5)",
                ));
            }
            self.start_keepalive(
                Arc::clone(coordinator),
                primary_key.clone(),
                start_ts,
                ttl_ms,
            );
        }
        pause(self.config.sleep_after_prewrite_primary_ms).await;

        let secondaries = strip_primary(buckets, &primary_key);
        let mut prewrites: JoinSet<CaravelResult<()>> = JoinSet::new();
        for bucket in secondaries.iter().filter(|b| !b.is_empty()).cloned() {
            let factory = Arc::clone(&self.factory);
            let primary_key = primary_key.clone();
            prewrites.spawn(async move {
                let client = factory.connect().await?;
                let result = client
                    .prewrite_secondaries(primary_key, bucket, start_ts, ttl_ms)
                    .await;
                if let Err(e) = client.close().await {
                    warn!(error = %e, "failed to close prewrite worker client");
                }
                result
            });
        }
        while let Some(joined) = prewrites.join_next().await {
            joined.map_err(|e| CaravelError::internal(format!("prewrite worker died: {e}")))??;
        }
        self.advance(CommitState::PrewroteAll)?;
        pause(self.config.sleep_after_prewrite_secondary_ms).await;

        let commit_ts = self.pd.get_timestamp().await?;
        if commit_ts <= start_ts {
            return Err(CaravelError::CommitTsNotAscending {
                start_ts,
                commit_ts,
            });
        }
        pause(self.config.sleep_after_get_commit_ts_ms).await;

        if !self.table_lock_held {
            let now = self
                .catalog
                .table_update_timestamp(&self.database, &self.table.name)
                .await?;
            if now > self.table.update_timestamp {
                return Err(CaravelError::SchemaChanged {
                    table: self.table.name.clone(),
                    was: self.table.update_timestamp,
                    now,
                });
            }
        }

        if let Some(side_channel) = &self.side_channel {
            if side_channel.is_closed() {
                return Err(CaravelError::SideChannelClosed);
            }
        }

        coordinator
            .commit_primary(
                Backoff::primary_key_commit(),
                primary_key,
                start_ts,
                commit_ts,
            )
            .await?;
        self.advance(CommitState::CommittedPrimary)?;
        info!(table = %self.table.name, %commit_ts, "primary committed, write is durable");

        self.stop_keepalive().await;

        if self.config.skip_commit_secondary_keys {
            debug!("skipping secondary commit phase");
        } else {
            self.commit_secondaries(secondaries, start_ts, commit_ts).await;
        }

        self.advance(CommitState::Done)?;
        Ok(CommitOutcome {
            commit_ts,
            keys_written: total,
        })
    }

    /// Parallel best-effort secondary commit. Failures are logged, never
    /// propagated: the committed primary already makes the write durable.
    async fn commit_secondaries(
        &self,
        secondaries: Vec<Vec<KvPair>>,
        start_ts: Timestamp,
        commit_ts: Timestamp,
    ) {
        let mut commits: JoinSet<()> = JoinSet::new();
        for bucket in secondaries {
            if bucket.is_empty() {
                continue;
            }
            let factory = Arc::clone(&self.factory);
            let keys: Vec<Key> = bucket.into_iter().map(|p| p.key).collect();
            commits.spawn(async move {
                match factory.connect().await {
                    Ok(client) => {
                        if let Err(e) = client
                            .commit_secondaries(keys, start_ts, commit_ts)
                            .await
                        {
                            warn!(error = %e, "secondary commit failed, leaving locks to the resolver");
                        }
                        if let Err(e) = client.close().await {
                            warn!(error = %e, "failed to close commit worker client");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "could not connect secondary-commit worker");
                    }
                }
            });
        }
        while commits.join_next().await.is_some() {}
    }

    fn start_keepalive(
        &mut self,
        client: Arc<dyn KvRpcClient>,
        primary: Key,
        start_ts: Timestamp,
        ttl_ms: u64,
    ) {
        let (stop, mut rx) = watch::channel(false);
        let interval =
            Duration::from_millis((ttl_ms / u64::from(TTL_HEARTBEAT_DIVISOR)).max(200));
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(interval) => {
                        let elapsed = started.elapsed().as_millis() as u64;
                        let ttl = (elapsed + ttl_ms).min(MAX_TTL_REFRESH_MS);
                        match client.txn_heartbeat(primary.clone(), start_ts, ttl).await {
                            Ok(effective) => {
                                debug!(ttl_ms = effective, "extended primary lock TTL");
                            }
                            Err(e) => {
                                warn!(error = %e, "primary lock TTL heartbeat failed");
                            }
                        }
                    }
                }
            }
        });
        self.keepalive = Some(KeepAlive { stop, handle });
    }

    async fn stop_keepalive(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            let _ = keepalive.stop.send(true);
            let _ = keepalive.handle.await;
        }
    }

    fn advance(&mut self, next: CommitState) -> CaravelResult<()> {
        if !self.state.can_transition(next) {
            return Err(CaravelError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "commit state transition");
        self.state = next;
        Ok(())
    }
}

fn strip_primary(mut buckets: Vec<Vec<KvPair>>, primary: &Key) -> Vec<Vec<KvPair>> {
    for bucket in &mut buckets {
        if let Some(pos) = bucket.iter().position(|p| &p.key == primary) {
            bucket.remove(pos);
            break;
        }
    }
    buckets
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
