//! # Shard Connections
//!
//! Purpose: Own one transport session to one shard and keep it usable:
//! reconnect lazily when the session is gone or has sat idle past the
//! server's timeout, falling back to known replicas.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ckv_common::{Endpoint, StatusCode};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::transport::{Connector, Session};

/// Addresses of one shard: the current primary plus failover candidates.
#[derive(Debug, Clone, Default)]
struct Endpoints {
    primary: Option<Endpoint>,
    candidates: Vec<Endpoint>,
}

/// State shared by every connection of one shard pool.
pub(crate) struct ShardTarget {
    endpoints: Mutex<Endpoints>,
    client_timeout: Duration,
    server_timeout: Duration,
    connector: Arc<dyn Connector>,
}

impl ShardTarget {
    pub(crate) fn new(
        endpoint: Endpoint,
        client_timeout: Duration,
        server_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        ShardTarget {
            endpoints: Mutex::new(Endpoints {
                primary: Some(endpoint.clone()),
                candidates: vec![endpoint],
            }),
            client_timeout,
            server_timeout,
            connector,
        }
    }

    /// Current primary, or `None` after every candidate failed.
    pub(crate) fn primary(&self) -> Option<Endpoint> {
        self.endpoints.lock().primary.clone()
    }

    pub(crate) fn add_candidate(&self, endpoint: Endpoint) {
        let mut endpoints = self.endpoints.lock();
        if !endpoints.candidates.contains(&endpoint) {
            endpoints.candidates.push(endpoint);
        }
    }

    pub(crate) fn candidates(&self) -> Vec<Endpoint> {
        self.endpoints.lock().candidates.clone()
    }

    /// Opens a session to the primary, then to each candidate in order.
    ///
    /// The first candidate that answers becomes the new primary.
    fn open_session(&self) -> Option<Box<dyn Session>> {
        let Endpoints {
            primary,
            candidates,
        } = self.endpoints.lock().clone();

        if let Some(primary) = &primary {
            match self.connector.connect(primary, self.client_timeout) {
                Ok(session) => return Some(session),
                Err(err) => debug!(endpoint = %primary, error = %err, "primary connect failed"),
            }
        }

        for candidate in candidates
            .iter()
            .filter(|candidate| Some(*candidate) != primary.as_ref())
        {
            match self.connector.connect(candidate, self.client_timeout) {
                Ok(session) => {
                    info!(from = ?primary, to = %candidate, "shard failed over");
                    self.endpoints.lock().primary = Some(candidate.clone());
                    return Some(session);
                }
                Err(err) => debug!(endpoint = %candidate, error = %err, "candidate connect failed"),
            }
        }

        warn!(primary = ?primary, "no shard endpoint reachable");
        self.endpoints.lock().primary = None;
        None
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One transport session to one shard.
///
/// Owned by exactly one borrower at a time; never shared.
pub struct Connection {
    id: u64,
    target: Arc<ShardTarget>,
    session: Option<Box<dyn Session>>,
    last_used: Instant,
}

impl Connection {
    /// Creates a connection and tries to connect right away.
    pub(crate) fn open(target: Arc<ShardTarget>) -> Self {
        let mut conn = Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            target,
            session: None,
            last_used: Instant::now(),
        };
        conn.reconnect();
        conn
    }

    /// Process-unique id, stable for the connection's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Endpoint this connection currently talks to.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.target.primary()
    }

    pub(crate) fn belongs_to(&self, target: &Arc<ShardTarget>) -> bool {
        Arc::ptr_eq(&self.target, target)
    }

    fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_used) >= self.target.server_timeout
    }

    fn reconnect(&mut self) -> bool {
        self.session = self.target.open_session();
        if self.session.is_some() {
            self.last_used = Instant::now();
        }
        self.session.is_some()
    }

    /// Runs `cmd` on this connection.
    ///
    /// A missing or idle-expired session is reopened first. A transport
    /// failure drops the session and returns `RequestError`; the command is
    /// never resent here, and the next call reconnects.
    pub fn request(&mut self, cmd: &mut Command) -> StatusCode {
        if (self.session.is_none() || self.is_stale(Instant::now())) && !self.reconnect() {
            return StatusCode::RequestError;
        }

        let status = cmd.send(self.session.as_deref_mut());
        if status == StatusCode::RequestError {
            debug!(id = self.id, command = ?cmd, "transport failure; session dropped");
            self.session = None;
            return status;
        }

        self.last_used = Instant::now();
        status
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint())
            .field("connected", &self.is_connected())
            .finish()
    }
}
