//! # Cluster-Aware Client
//!
//! Purpose: Route each command to the shard owning its slot, keep the
//! routing table current with a background refresher, and retry once when
//! the table turns out to be stale.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides slot routing, pooling and topology
//!    refresh behind `execute` and the typed command methods.
//! 2. **Copy-on-Refresh Snapshots**: Readers clone an `Arc<Snapshot>` under
//!    a read lock and release it before any network I/O; the refresher
//!    builds a new snapshot off-lock and swaps it in with one write.
//! 3. **Deferred Reclamation**: Replaced snapshots sit on a retirement list
//!    tagged with their generation until no reader holds them.
//! 4. **Bounded Waits**: Callers never wait on a refresh longer than
//!    `wait_retry_times * wait_retry_interval`.
//!
//! ## State Machine
//! ```text
//!   Valid --(MOVED / transport error)--> Invalid --(refresh ok)--> Valid
//!                                          |  ^
//!                                          +--+ refresh failed, back off
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ckv_common::{hash_slot, Endpoint, StatusCode};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::command::{fetch_slots, fetch_string, Command};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pool::{PinnedConnection, ShardPool};
use crate::topology::{
    cluster_enabled, parse_info, replica_endpoints, SlotAssignment, SlotRange, Topology,
};
use crate::transport::{Connector, TcpConnector};

/// One published routing state.
#[derive(Debug)]
struct Snapshot {
    generation: u64,
    topology: Topology,
    /// Every pool referenced by `topology`, in first-seen order. In
    /// single-server mode this is the one shard and `topology` is empty.
    pools: Vec<Arc<ShardPool>>,
}

impl Snapshot {
    fn route(&self, cluster: bool, slot: Option<u16>) -> Option<&Arc<ShardPool>> {
        if !cluster {
            return self.pools.first();
        }
        match slot {
            Some(slot) => self.topology.find_pool(slot),
            None => self.pools.iter().find(|pool| pool.is_valid()),
        }
    }

    fn pool_for(&self, address: &Endpoint) -> Option<&Arc<ShardPool>> {
        self.pools.iter().find(|pool| pool.address() == address)
    }
}

struct Retired {
    generation: u64,
    snapshot: Arc<Snapshot>,
}

#[derive(Default)]
struct Signal {
    pending: bool,
    exit: bool,
}

struct Shared {
    config: ClientConfig,
    cluster: bool,
    connector: Arc<dyn Connector>,
    snapshot: RwLock<Arc<Snapshot>>,
    retired: Mutex<Vec<Retired>>,
    signal: Mutex<Signal>,
    cond: Condvar,
    valid: AtomicBool,
    metrics: Metrics,
}

impl Shared {
    fn load(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn publish(&self, next: Snapshot) {
        let generation = next.generation;
        let previous = std::mem::replace(&mut *self.snapshot.write(), Arc::new(next));

        let mut retired = self.retired.lock();
        retired.retain(|entry| {
            let in_use = Arc::strong_count(&entry.snapshot) > 1;
            if !in_use {
                debug!(generation = entry.generation, "retired snapshot freed");
            }
            in_use
        });
        retired.push(Retired {
            generation: previous.generation,
            snapshot: previous,
        });
        debug!(generation, retired = retired.len(), "snapshot published");
    }

    /// Marks the table stale and wakes the refresher.
    fn request_refresh(&self) {
        let mut signal = self.signal.lock();
        self.valid.store(false, Ordering::Release);
        signal.pending = true;
        self.cond.notify_all();
    }

    /// Requests a refresh and polls until the table is valid again.
    fn force_refresh(&self) -> bool {
        self.metrics.record_forced_refresh();
        self.request_refresh();
        for _ in 0..self.config.wait_retry_times {
            if self.is_valid() {
                return true;
            }
            thread::sleep(self.config.wait_retry_interval_duration());
        }
        self.is_valid()
    }

    fn refresh(&self) -> bool {
        let ok = if self.cluster {
            match self.load_cluster_slots() {
                Ok(generation) => {
                    info!(generation, "cluster topology refreshed");
                    true
                }
                Err(err) => {
                    warn!(error = %err, "cluster topology refresh failed");
                    false
                }
            }
        } else {
            let snapshot = self.load();
            snapshot.pools.first().map_or(false, |pool| pool.rebuild())
        };
        self.metrics.record_refresh(ok);
        ok
    }

    /// Asks the known shards for `CLUSTER SLOTS` in turn and publishes the
    /// first answer.
    fn load_cluster_slots(&self) -> ClientResult<u64> {
        let current = self.load();
        for pool in &current.pools {
            let mut cmd = Command::new("CLUSTER").arg("SLOTS");
            let status = pool.request(&mut cmd);
            if status != StatusCode::Success {
                debug!(shard = %pool.address(), %status, "CLUSTER SLOTS failed");
                continue;
            }
            match cmd.fetch_result(fetch_slots) {
                (StatusCode::Success, Some(slots)) if !slots.is_empty() => {
                    return self.install(&current, slots);
                }
                (status, _) => {
                    debug!(shard = %pool.address(), %status, "unusable CLUSTER SLOTS reply");
                }
            }
        }
        Err(ClientError::Request("no shard answered CLUSTER SLOTS".into()))
    }

    /// Builds and publishes a snapshot from a `CLUSTER SLOTS` answer.
    ///
    /// A still-valid pool of the current snapshot is reused for an
    /// unchanged address; a shard whose new pool cannot connect fails the
    /// whole refresh and nothing is published.
    ///
    /// Overlapping ranges are rejected. A table with gaps is still
    /// published (with a warning); commands for an uncovered slot fail
    /// with `RequestError` and go through the usual refresh-and-retry.
    fn install(&self, current: &Snapshot, slots: Vec<SlotAssignment>) -> ClientResult<u64> {
        let mut by_address: HashMap<Endpoint, Arc<ShardPool>> = HashMap::new();
        let mut pools = Vec::new();
        let mut ranges = Vec::with_capacity(slots.len());

        for assignment in slots {
            let pool = match by_address.get(&assignment.master) {
                Some(pool) => pool.clone(),
                None => {
                    let pool = match current
                        .pool_for(&assignment.master)
                        .filter(|pool| pool.is_valid())
                    {
                        Some(pool) => pool.clone(),
                        None => {
                            let pool = Arc::new(ShardPool::open(
                                assignment.master.clone(),
                                self.config.pool_config(),
                                self.connector.clone(),
                            ));
                            if !pool.is_valid() {
                                return Err(ClientError::Request(format!(
                                    "cannot open pool for shard {}",
                                    assignment.master
                                )));
                            }
                            pool
                        }
                    };
                    by_address.insert(assignment.master.clone(), pool.clone());
                    pools.push(pool.clone());
                    pool
                }
            };
            pool.set_replicas(assignment.replicas);
            ranges.push(SlotRange {
                start: assignment.start,
                end: assignment.end,
                endpoint: assignment.master,
                pool,
            });
        }

        let topology = Topology::new(ranges);
        if topology.has_overlap() {
            return Err(ClientError::Request("overlapping slot ranges".into()));
        }
        let gaps = topology.gaps();
        if !gaps.is_empty() {
            warn!(?gaps, "slot table does not cover every slot");
        }

        let generation = current.generation + 1;
        self.publish(Snapshot {
            generation,
            topology,
            pools,
        });
        Ok(generation)
    }

    fn shutdown_pools(&self) {
        let snapshot = self.load();
        for pool in &snapshot.pools {
            pool.drain();
        }
        for entry in self.retired.lock().drain(..) {
            for pool in &entry.snapshot.pools {
                pool.drain();
            }
        }
    }
}

fn run_refresher(shared: Arc<Shared>) {
    debug!("topology refresher started");
    let tick = shared.config.refresh_interval_duration();
    loop {
        let periodic = {
            let mut signal = shared.signal.lock();
            let mut periodic = false;
            while !signal.exit && !signal.pending && shared.is_valid() {
                match tick {
                    Some(tick) => {
                        if shared.cond.wait_for(&mut signal, tick).timed_out() {
                            periodic = true;
                            break;
                        }
                    }
                    None => shared.cond.wait(&mut signal),
                }
            }
            if signal.exit {
                break;
            }
            signal.pending = false;
            periodic
        };

        // Rebuilding a healthy standalone pool on a timer only churns
        // connections.
        if periodic && !shared.cluster {
            continue;
        }

        if shared.refresh() {
            // A signal raised mid-refresh may postdate the table this
            // refresh read; stay invalid and go around again.
            let signal = shared.signal.lock();
            if signal.pending {
                debug!("refresh requested during refresh; repeating");
            } else {
                shared.valid.store(true, Ordering::Release);
            }
        } else if !shared.is_valid() {
            let mut signal = shared.signal.lock();
            if !signal.exit && !signal.pending {
                shared
                    .cond
                    .wait_for(&mut signal, shared.config.refresh_backoff_duration());
            }
        }
    }
    debug!("topology refresher stopped");
}

/// Client for a standalone server or a sharded cluster.
///
/// Safe to share between threads; every method takes `&self`.
pub struct Client {
    shared: Arc<Shared>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connects to `addr` (`"host"` or `"host:port"`) with default settings.
    pub fn connect(addr: &str) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr, 6379))
    }

    /// Connects over TCP with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Connects through a custom transport.
    ///
    /// Opens the seed pool, reads `INFO` to choose single-server or
    /// cluster mode, loads the slot table (cluster) or replica list
    /// (single), then starts the background refresher.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let seed = config.seed()?;

        let seed_pool = Arc::new(ShardPool::open(
            seed.clone(),
            config.pool_config(),
            connector.clone(),
        ));
        if !seed_pool.is_valid() {
            return Err(ClientError::Request(format!("seed {seed} unreachable")));
        }

        let mut cmd = Command::new("INFO");
        let status = seed_pool.request(&mut cmd);
        if status != StatusCode::Success {
            return Err(ClientError::from_status(status, cmd.error_message()));
        }
        let text = match cmd.fetch_result(fetch_string) {
            (StatusCode::Success, Some(text)) => String::from_utf8_lossy(&text).into_owned(),
            _ => return Err(ClientError::UnexpectedResponse),
        };
        let info = parse_info(&text).ok_or(ClientError::UnexpectedResponse)?;
        let cluster = cluster_enabled(&info).ok_or(ClientError::UnexpectedResponse)?;
        if !cluster {
            seed_pool.set_replicas(replica_endpoints(&info));
        }
        info!(seed = %seed, cluster, "client initializing");

        let shared = Arc::new(Shared {
            config,
            cluster,
            connector,
            snapshot: RwLock::new(Arc::new(Snapshot {
                generation: 0,
                topology: Topology::default(),
                pools: vec![seed_pool],
            })),
            retired: Mutex::new(Vec::new()),
            signal: Mutex::new(Signal::default()),
            cond: Condvar::new(),
            valid: AtomicBool::new(true),
            metrics: Metrics::new(),
        });

        if cluster && !shared.refresh() {
            return Err(ClientError::Request("initial slot table unavailable".into()));
        }

        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("ckv-refresher".into())
            .spawn(move || run_refresher(worker))?;

        Ok(Client {
            shared,
            refresher: Mutex::new(Some(handle)),
        })
    }

    pub fn is_cluster(&self) -> bool {
        self.shared.cluster
    }

    /// Whether the routing table is considered current.
    pub fn is_valid(&self) -> bool {
        self.shared.is_valid()
    }

    /// Generation of the published routing table; bumps on every
    /// successful cluster refresh.
    pub fn generation(&self) -> u64 {
        self.shared.load().generation
    }

    /// Published slot ranges as `(start, end, shard)`, end inclusive.
    pub fn slot_ranges(&self) -> Vec<(u16, u16, Endpoint)> {
        self.shared
            .load()
            .topology
            .ranges()
            .iter()
            .map(|range| (range.start, range.end, range.endpoint.clone()))
            .collect()
    }

    /// Shard currently serving `slot`.
    pub fn shard_for_slot(&self, slot: u16) -> Option<Endpoint> {
        let snapshot = self.shared.load();
        snapshot
            .route(self.shared.cluster, Some(slot))
            .map(|pool| pool.address().clone())
    }

    /// Whether both keys are served by the same shard right now.
    pub fn in_same_node(&self, key1: impl AsRef<[u8]>, key2: impl AsRef<[u8]>) -> bool {
        if !self.shared.cluster {
            return true;
        }
        let snapshot = self.shared.load();
        match (
            snapshot.topology.find_pool(hash_slot(key1)),
            snapshot.topology.find_pool(hash_slot(key2)),
        ) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Runs `cmd` on a pooled connection of the owning shard.
    ///
    /// A transport failure (or, in cluster mode, a MOVED redirect) forces
    /// a refresh and retries once. `NoResource` means the refresh did not
    /// finish within the wait budget.
    pub fn execute(&self, cmd: &mut Command) -> StatusCode {
        let started = Instant::now();
        let status = self.execute_with_retry(cmd);
        self.shared
            .metrics
            .record_request(started.elapsed(), status.is_error());
        status
    }

    fn execute_with_retry(&self, cmd: &mut Command) -> StatusCode {
        if !self.shared.is_valid() {
            return StatusCode::RequestError;
        }

        let status = self.simple_execute(cmd);
        let moved = self.shared.cluster && status == StatusCode::ReplyError && cmd.is_moved();
        if status != StatusCode::RequestError && !moved {
            return status;
        }

        if moved {
            self.shared.metrics.record_moved_retry();
            info!(command = ?cmd, redirect = ?cmd.error_message(), "slot moved; refreshing");
        } else {
            self.shared.metrics.record_transport_retry();
            warn!(command = ?cmd, "request failed; refreshing");
        }

        if !self.shared.force_refresh() {
            warn!(command = ?cmd, "refresh did not complete in time");
            return StatusCode::NoResource;
        }
        self.simple_execute(cmd)
    }

    fn simple_execute(&self, cmd: &mut Command) -> StatusCode {
        // The snapshot stays referenced until the request finishes.
        let snapshot = self.shared.load();
        match snapshot.route(self.shared.cluster, cmd.slot()) {
            Some(pool) => pool.request(cmd),
            None => {
                debug!(command = ?cmd, "no shard for slot");
                StatusCode::RequestError
            }
        }
    }

    /// Checks out a connection to the shard owning `slot`, for a
    /// transaction.
    ///
    /// # Errors
    /// `Request` when the table is stale or has no owner for `slot`;
    /// `PoolExhausted` when the shard's pool stays empty for the whole
    /// borrow retry window.
    pub fn attach(&self, slot: u16) -> ClientResult<PinnedConnection> {
        if !self.shared.is_valid() {
            return Err(ClientError::Request("routing table is refreshing".into()));
        }
        let snapshot = self.shared.load();
        let pool = snapshot
            .route(self.shared.cluster, Some(slot))
            .cloned()
            .ok_or_else(|| ClientError::Request(format!("no shard owns slot {slot}")))?;
        let conn = pool.borrow().ok_or(ClientError::PoolExhausted)?;
        debug!(slot, shard = %pool.address(), "connection attached");
        Ok(PinnedConnection::new(pool, conn))
    }

    /// `attach` for the slot of `key`.
    pub fn attach_key(&self, key: impl AsRef<[u8]>) -> ClientResult<PinnedConnection> {
        self.attach(hash_slot(key))
    }

    /// Returns a pinned connection.
    ///
    /// It rejoins its pool only when `slot` still maps to that pool;
    /// otherwise it is closed so no connection to a stale shard is reused.
    pub fn detach(&self, slot: u16, pinned: PinnedConnection) {
        let snapshot = self.shared.load();
        match snapshot.route(self.shared.cluster, Some(slot)) {
            Some(pool) if Arc::ptr_eq(pool, pinned.pool()) => pinned.release(),
            _ => {
                debug!(
                    slot,
                    shard = %pinned.pool().address(),
                    "slot moved; closing pinned connection"
                );
                pinned.discard();
            }
        }
    }

    /// Runs `cmd` on a pinned connection.
    ///
    /// Never retried: a MOVED redirect becomes `SlotChanged` and schedules
    /// a background refresh; the caller decides whether to start over.
    pub fn execute_on(&self, pinned: &mut PinnedConnection, cmd: &mut Command) -> StatusCode {
        if !self.shared.is_valid() {
            return StatusCode::RequestError;
        }
        let started = Instant::now();
        let mut status = pinned.request(cmd);
        if self.shared.cluster && status == StatusCode::ReplyError && cmd.is_moved() {
            info!(command = ?cmd, "slot moved under pinned connection");
            self.shared.request_refresh();
            status = StatusCode::SlotChanged;
        }
        self.shared
            .metrics
            .record_request(started.elapsed(), status.is_error());
        status
    }

    /// Stops the refresher and closes every pooled connection.
    ///
    /// Called by `Drop`; later calls fail with `RequestError`.
    pub fn shutdown(&self) {
        let Some(handle) = self.refresher.lock().take() else {
            return;
        };
        {
            let mut signal = self.shared.signal.lock();
            signal.exit = true;
            self.shared.valid.store(false, Ordering::Release);
            self.shared.cond.notify_all();
        }
        if handle.join().is_err() {
            warn!("topology refresher panicked");
        }
        self.shared.valid.store(false, Ordering::Release);
        self.shared.shutdown_pools();
        info!("client shut down");
    }

    #[cfg(test)]
    fn retired_generations(&self) -> Vec<u64> {
        self.shared
            .retired
            .lock()
            .iter()
            .map(|entry| entry.generation)
            .collect()
    }

    #[cfg(test)]
    fn wait_valid(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.is_valid() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.is_valid()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cluster", &self.shared.cluster)
            .field("valid", &self.is_valid())
            .field("generation", &self.generation())
            .finish()
    }
}
