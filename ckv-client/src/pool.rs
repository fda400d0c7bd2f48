//! # Shard Connection Pool
//!
//! Purpose: Keep a fixed set of reusable connections to one shard so each
//! request avoids a handshake, and hand out pinned connections for
//! multi-step transactions.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A bounded idle queue plus a count of every
//!    connection the pool owns, idle or borrowed.
//! 2. **Minimal Locking**: The mutex is held only while moving connections
//!    in or out of the idle queue, never across network I/O.
//! 3. **Bounded Waiting**: An exhausted pool is retried a few times with
//!    short sleeps, then reports `NoResource`.
//! 4. **Lazy Repair**: A connection that just failed still goes back to the
//!    idle queue; it reconnects on its next use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ckv_common::{Endpoint, StatusCode};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::connection::{Connection, ShardTarget};
use crate::transport::Connector;

/// Pool settings shared by every shard of one client.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened per shard.
    pub pool_size: usize,
    /// Connect and I/O timeout for each session.
    pub client_timeout: Duration,
    /// Idle time after which a session is assumed closed by the server.
    pub server_timeout: Duration,
    /// Borrow attempts before giving up with `NoResource`.
    pub borrow_retry_times: u32,
    /// Sleep between borrow attempts.
    pub borrow_retry_interval: Duration,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

/// Fixed-size pool of connections to one shard.
pub struct ShardPool {
    address: Endpoint,
    target: Arc<ShardTarget>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    valid: AtomicBool,
}

impl ShardPool {
    /// Creates the pool and eagerly opens `pool_size` connections.
    ///
    /// The pool is valid when at least one of them connected.
    pub fn open(address: Endpoint, config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let target = Arc::new(ShardTarget::new(
            address.clone(),
            config.client_timeout,
            config.server_timeout,
            connector,
        ));
        let pool = ShardPool {
            address,
            target,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.pool_size),
                total: 0,
            }),
            config,
            valid: AtomicBool::new(false),
        };
        pool.initialize();
        pool
    }

    /// Address this pool was created for.
    pub fn address(&self) -> &Endpoint {
        &self.address
    }

    /// Endpoint currently serving the shard (differs from `address` after
    /// a replica failover).
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.target.primary()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Connections owned by the pool, idle or borrowed.
    pub fn total(&self) -> usize {
        self.state.lock().total
    }

    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Drops every idle connection and reopens up to `pool_size`.
    ///
    /// Borrowed connections stay counted and rejoin the queue when
    /// released. Returns whether the pool is usable afterwards.
    pub fn rebuild(&self) -> bool {
        info!(shard = %self.address, "rebuilding shard pool");
        self.initialize()
    }

    /// Records replica endpoints to fail over to.
    pub fn set_replicas(&self, replicas: impl IntoIterator<Item = Endpoint>) {
        for replica in replicas {
            debug!(shard = %self.address, replica = %replica, "replica registered");
            self.target.add_candidate(replica);
        }
    }

    /// Failover candidates, the original address first.
    pub fn replicas(&self) -> Vec<Endpoint> {
        self.target.candidates()
    }

    /// Pops an idle connection, retrying with short sleeps when none is
    /// free.
    pub fn borrow(&self) -> Option<Connection> {
        let attempts = self.config.borrow_retry_times.max(1);
        for attempt in 0..attempts {
            if let Some(conn) = self.pop_idle() {
                return Some(conn);
            }
            if self.try_reserve() {
                // Replaces a connection discarded earlier; may still be
                // disconnected, in which case it reconnects on first use.
                return Some(Connection::open(self.target.clone()));
            }
            if attempt + 1 < attempts {
                thread::sleep(self.config.borrow_retry_interval);
            }
        }
        debug!(shard = %self.address, "pool exhausted");
        None
    }

    /// Returns a borrowed connection to the idle queue.
    pub fn release(&self, conn: Connection) {
        if !conn.belongs_to(&self.target) {
            warn!(shard = %self.address, "foreign connection released; dropping it");
            return;
        }
        self.state.lock().idle.push_back(conn);
    }

    /// Borrows a connection, runs `cmd` and releases the connection.
    pub fn request(&self, cmd: &mut Command) -> StatusCode {
        match self.acquire() {
            Some(mut conn) => conn.request(cmd),
            None => StatusCode::NoResource,
        }
    }

    /// Runs `cmd` on a connection the caller already holds.
    pub fn request_on(&self, conn: &mut Connection, cmd: &mut Command) -> StatusCode {
        conn.request(cmd)
    }

    /// Borrows a connection that returns itself to the pool on drop.
    pub fn acquire(&self) -> Option<PooledConnection<'_>> {
        self.borrow().map(|conn| PooledConnection {
            pool: self,
            conn: Some(conn),
        })
    }

    /// Closes idle connections and marks the pool unusable.
    pub fn drain(&self) {
        let mut state = self.state.lock();
        let closed = state.idle.len();
        state.idle.clear();
        state.total = state.total.saturating_sub(closed);
        self.valid.store(false, Ordering::Release);
        debug!(shard = %self.address, closed, "shard pool drained");
    }

    /// Forgets a borrowed connection that will not come back.
    pub(crate) fn discard(&self, conn: Connection) {
        drop(conn);
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn initialize(&self) -> bool {
        let borrowed = {
            let mut state = self.state.lock();
            let stale = state.idle.len();
            state.idle.clear();
            state.total = state.total.saturating_sub(stale);
            state.total
        };

        let wanted = self.config.pool_size.saturating_sub(borrowed);
        let mut opened = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            let conn = Connection::open(self.target.clone());
            if conn.is_connected() {
                opened.push(conn);
            }
        }

        let connected = opened.len();
        let valid = connected > 0 || (wanted == 0 && borrowed > 0);
        {
            let mut state = self.state.lock();
            state.total += connected;
            state.idle.extend(opened);
        }
        self.valid.store(valid, Ordering::Release);

        if valid {
            debug!(shard = %self.address, connected, wanted, "shard pool ready");
        } else {
            warn!(shard = %self.address, "no connection to shard could be opened");
        }
        valid
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.state.lock().idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.state.lock();
        if state.total >= self.config.pool_size {
            return false;
        }
        state.total += 1;
        true
    }
}

impl std::fmt::Debug for ShardPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardPool")
            .field("address", &self.address)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a ShardPool,
    conn: Option<Connection>,
}

impl PooledConnection<'_> {
    pub fn request(&mut self, cmd: &mut Command) -> StatusCode {
        match self.conn.as_mut() {
            Some(conn) => conn.request(cmd),
            None => StatusCode::RequestError,
        }
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.conn.as_ref().and_then(Connection::endpoint)
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// A connection checked out by the caller for a multi-step transaction.
///
/// Give it back with `Client::detach`; dropping it instead closes the
/// connection and frees its pool slot.
pub struct PinnedConnection {
    pool: Arc<ShardPool>,
    conn: Option<Connection>,
}

impl PinnedConnection {
    pub(crate) fn new(pool: Arc<ShardPool>, conn: Connection) -> Self {
        PinnedConnection {
            pool,
            conn: Some(conn),
        }
    }

    /// Pool this connection was borrowed from.
    pub fn pool(&self) -> &Arc<ShardPool> {
        &self.pool
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.conn.as_ref().and_then(Connection::endpoint)
    }

    pub(crate) fn request(&mut self, cmd: &mut Command) -> StatusCode {
        match self.conn.as_mut() {
            Some(conn) => self.pool.request_on(conn, cmd),
            None => StatusCode::RequestError,
        }
    }

    /// Hands the connection back to its pool.
    pub(crate) fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }

    /// Closes the connection instead of pooling it.
    pub(crate) fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

impl std::fmt::Debug for PinnedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedConnection")
            .field("shard", self.pool.address())
            .finish()
    }
}

impl Drop for PinnedConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(shard = %self.pool.address(), "pinned connection dropped without detach");
            self.pool.discard(conn);
        }
    }
}
