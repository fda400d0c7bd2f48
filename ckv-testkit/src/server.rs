//! # Fake Cluster
//!
//! In-process RESP2 servers for client tests: one or more nodes sharing a
//! keyspace, with slot ownership enforced through `MOVED` redirects.
//!
//! ## Design Principles
//! 1. **Own Runtime**: The cluster runs on its own tokio runtime so
//!    synchronous tests can drive it without an async context.
//! 2. **Shared Keyspace**: Nodes read and write one map; migrating a slot
//!    only changes which node answers for it, so no data is copied.
//! 3. **Controllable Failure**: Tests can drop every open connection,
//!    stop a node's listener or move slots between nodes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use bytes::BytesMut;
use ckv_common::{hash_slot, Endpoint, SLOT_COUNT};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{
    resp_array, resp_bulk, resp_error, resp_integer, resp_null, resp_null_array, resp_simple,
    RespError, RespParser,
};

const DUMP_PREFIX: &[u8] = b"CKVDUMP1";

/// Commands whose first argument is a key.
const KEYED: &[&[u8]] = &[
    b"GET", b"SET", b"SETNX", b"SETEX", b"DEL", b"EXPIRE", b"TTL", b"DUMP", b"RESTORE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Standalone,
    Cluster,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<Vec<u8>, Entry>,
    /// Bumped on every write; WATCH compares these.
    versions: HashMap<Vec<u8>, u64>,
}

impl Keyspace {
    fn live(&mut self, key: &[u8]) -> Option<&Entry> {
        let now = Instant::now();
        if self.entries.get(key).map_or(false, |entry| entry.is_expired(now)) {
            self.entries.remove(key);
            self.touch(key);
        }
        self.entries.get(key)
    }

    fn version(&mut self, key: &[u8]) -> u64 {
        self.live(key);
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &[u8]) {
        *self.versions.entry(key.to_vec()).or_insert(0) += 1;
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_vec(), Entry { value, expires_at });
        self.touch(key);
    }
}

/// Per-connection transaction state.
#[derive(Default)]
struct ConnState {
    multi: bool,
    queued: Vec<Vec<Vec<u8>>>,
    watched: Vec<(Vec<u8>, u64)>,
}

struct Node {
    endpoint: Endpoint,
    listener: Mutex<Option<JoinHandle<()>>>,
    kill: watch::Sender<u64>,
    served: AtomicU64,
}

struct Shared {
    mode: Mode,
    nodes: Vec<Node>,
    /// Owning node index per slot.
    owners: Mutex<Vec<usize>>,
    keyspace: Mutex<Keyspace>,
    redirects: AtomicU64,
    slot_queries: AtomicU64,
}

/// A running set of fake nodes.
pub struct FakeCluster {
    runtime: Runtime,
    shared: Arc<Shared>,
}

impl FakeCluster {
    /// One standalone server (`cluster_enabled:0`).
    pub fn standalone() -> anyhow::Result<Self> {
        Self::start(Mode::Standalone, 1)
    }

    /// `nodes` cluster nodes with the slots split evenly between them.
    pub fn cluster(nodes: usize) -> anyhow::Result<Self> {
        if nodes == 0 {
            bail!("a cluster needs at least one node");
        }
        Self::start(Mode::Cluster, nodes)
    }

    fn start(mode: Mode, count: usize) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ckv-fake-cluster")
            .enable_all()
            .build()
            .context("building fake cluster runtime")?;

        let mut listeners = Vec::with_capacity(count);
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0"))?;
            let addr = listener.local_addr()?;
            let (kill, _) = watch::channel(0);
            nodes.push(Node {
                endpoint: Endpoint::new(addr.ip().to_string(), addr.port()),
                listener: Mutex::new(None),
                kill,
                served: AtomicU64::new(0),
            });
            listeners.push(listener);
        }

        let slots = usize::from(SLOT_COUNT);
        let owners = (0..slots).map(|slot| slot * count / slots).collect();
        let shared = Arc::new(Shared {
            mode,
            nodes,
            owners: Mutex::new(owners),
            keyspace: Mutex::new(Keyspace::default()),
            redirects: AtomicU64::new(0),
            slot_queries: AtomicU64::new(0),
        });

        let cluster = FakeCluster { runtime, shared };
        for (idx, listener) in listeners.into_iter().enumerate() {
            cluster.spawn_listener(idx, listener);
        }
        debug!(nodes = count, ?mode, "fake cluster started");
        Ok(cluster)
    }

    fn spawn_listener(&self, idx: usize, listener: TcpListener) {
        let shared = self.shared.clone();
        let handle = self.runtime.spawn(serve(listener, idx, shared));
        *self.shared.nodes[idx].listener.lock() = Some(handle);
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.shared.nodes.iter().map(|node| node.endpoint.clone()).collect()
    }

    /// Address of node `idx`.
    pub fn endpoint(&self, idx: usize) -> Endpoint {
        self.shared.nodes[idx].endpoint.clone()
    }

    /// Node that answers for `slot`.
    pub fn owner_of(&self, slot: u16) -> Endpoint {
        let idx = self.shared.owners.lock()[usize::from(slot)];
        self.endpoint(idx)
    }

    /// Index of the node that answers for `slot`.
    pub fn owner_index(&self, slot: u16) -> usize {
        self.shared.owners.lock()[usize::from(slot)]
    }

    /// Hands slots `start..=end` to node `to`.
    pub fn migrate(&self, start: u16, end: u16, to: usize) {
        assert!(to < self.shared.nodes.len(), "no node {to}");
        let mut owners = self.shared.owners.lock();
        for slot in start..=end {
            owners[usize::from(slot)] = to;
        }
        debug!(start, end, to, "slots migrated");
    }

    /// Closes every open connection on every node; listeners keep running.
    pub fn disconnect_all(&self) {
        for node in &self.shared.nodes {
            node.kill.send_modify(|generation| *generation += 1);
        }
    }

    /// Stops accepting on node `idx` and drops its connections.
    pub fn stop_node(&self, idx: usize) {
        let node = &self.shared.nodes[idx];
        let listener = node.listener.lock().take();
        if let Some(handle) = listener {
            handle.abort();
            let _ = self.runtime.block_on(handle);
        }
        node.kill.send_modify(|generation| *generation += 1);
        debug!(node = %node.endpoint, "node stopped");
    }

    /// Re-binds node `idx` on its original address.
    pub fn start_node(&self, idx: usize) -> anyhow::Result<()> {
        let endpoint = self.endpoint(idx);
        let addr: SocketAddr = endpoint.to_addr_string().parse()?;
        let mut attempts = 0;
        let listener = loop {
            match self.runtime.block_on(TcpListener::bind(addr)) {
                Ok(listener) => break listener,
                Err(err) if attempts < 50 => {
                    attempts += 1;
                    debug!(node = %endpoint, error = %err, "rebind failed; retrying");
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => return Err(err).context(format!("rebinding {endpoint}")),
            }
        };
        self.spawn_listener(idx, listener);
        debug!(node = %endpoint, "node restarted");
        Ok(())
    }

    /// `MOVED` replies sent so far.
    pub fn redirects(&self) -> u64 {
        self.shared.redirects.load(Ordering::Relaxed)
    }

    /// `CLUSTER SLOTS` queries answered so far.
    pub fn slot_queries(&self) -> u64 {
        self.shared.slot_queries.load(Ordering::Relaxed)
    }

    /// Commands node `idx` has answered.
    pub fn served(&self, idx: usize) -> u64 {
        self.shared.nodes[idx].served.load(Ordering::Relaxed)
    }
}

impl Drop for FakeCluster {
    fn drop(&mut self) {
        for node in &self.shared.nodes {
            if let Some(handle) = node.listener.lock().take() {
                handle.abort();
            }
            node.kill.send_modify(|generation| *generation += 1);
        }
    }
}

async fn serve(listener: TcpListener, idx: usize, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let kill = shared.nodes[idx].kill.subscribe();
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, idx, shared, kill).await {
                        debug!(error = %err, "connection closed with error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Handles a single TCP client connection.
async fn handle_connection(
    stream: TcpStream,
    idx: usize,
    shared: Arc<Shared>,
    mut kill: watch::Receiver<u64>,
) -> std::io::Result<()> {
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut conn = ConnState::default();

    loop {
        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    break;
                }
            }
            _ = kill.changed() => break,
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response = shared.dispatch(idx, &mut conn, &args);
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    stream.write_all(&resp_error("ERR protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

impl Shared {
    fn dispatch(&self, idx: usize, conn: &mut ConnState, args: &[Vec<u8>]) -> Vec<u8> {
        self.nodes[idx].served.fetch_add(1, Ordering::Relaxed);
        let Some(name) = args.first().map(|name| name.to_ascii_uppercase()) else {
            return resp_error("ERR empty command");
        };

        match name.as_slice() {
            b"MULTI" => {
                if conn.multi {
                    return resp_error("ERR MULTI calls can not be nested");
                }
                conn.multi = true;
                conn.queued.clear();
                resp_simple("OK")
            }
            b"EXEC" => {
                if !conn.multi {
                    return resp_error("ERR EXEC without MULTI");
                }
                conn.multi = false;
                let queued = std::mem::take(&mut conn.queued);
                let watched = std::mem::take(&mut conn.watched);
                let mut keyspace = self.keyspace.lock();
                if watched
                    .iter()
                    .any(|(key, version)| keyspace.version(key) != *version)
                {
                    return resp_null_array();
                }
                let replies = queued
                    .iter()
                    .map(|args| self.apply(idx, &mut keyspace, args))
                    .collect();
                resp_array(replies)
            }
            b"DISCARD" => {
                if !conn.multi {
                    return resp_error("ERR DISCARD without MULTI");
                }
                conn.multi = false;
                conn.queued.clear();
                conn.watched.clear();
                resp_simple("OK")
            }
            b"WATCH" => {
                if conn.multi {
                    return resp_error("ERR WATCH inside MULTI is not allowed");
                }
                if args.len() < 2 {
                    return resp_error("ERR wrong number of arguments for 'watch' command");
                }
                for key in &args[1..] {
                    if let Some(redirect) = self.redirect(idx, key) {
                        return redirect;
                    }
                }
                let mut keyspace = self.keyspace.lock();
                for key in &args[1..] {
                    let version = keyspace.version(key);
                    conn.watched.push((key.clone(), version));
                }
                resp_simple("OK")
            }
            b"UNWATCH" => {
                conn.watched.clear();
                resp_simple("OK")
            }
            _ => {
                if KEYED.contains(&name.as_slice()) && args.len() >= 2 {
                    if let Some(redirect) = self.redirect(idx, &args[1]) {
                        return redirect;
                    }
                }
                if conn.multi {
                    conn.queued.push(args.to_vec());
                    return resp_simple("QUEUED");
                }
                let mut keyspace = self.keyspace.lock();
                self.apply(idx, &mut keyspace, args)
            }
        }
    }

    /// `MOVED` reply when node `idx` does not own the slot of `key`.
    fn redirect(&self, idx: usize, key: &[u8]) -> Option<Vec<u8>> {
        if self.mode != Mode::Cluster {
            return None;
        }
        let slot = hash_slot(key);
        let owner = self.owners.lock()[usize::from(slot)];
        if owner == idx {
            return None;
        }
        self.redirects.fetch_add(1, Ordering::Relaxed);
        Some(resp_error(&format!(
            "MOVED {slot} {}",
            self.nodes[owner].endpoint
        )))
    }

    fn apply(&self, idx: usize, keyspace: &mut Keyspace, args: &[Vec<u8>]) -> Vec<u8> {
        let name = args[0].to_ascii_uppercase();
        match name.as_slice() {
            b"PING" => match args.len() {
                1 => resp_simple("PONG"),
                2 => resp_bulk(&args[1]),
                _ => arity_error("ping"),
            },
            b"INFO" => resp_bulk(self.info(idx).as_bytes()),
            b"TIME" => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                resp_array(vec![
                    resp_bulk(now.as_secs().to_string().as_bytes()),
                    resp_bulk(now.subsec_micros().to_string().as_bytes()),
                ])
            }
            b"CLUSTER" => self.cluster_command(args),
            b"GET" => {
                if args.len() != 2 {
                    return arity_error("get");
                }
                match keyspace.live(&args[1]) {
                    Some(entry) => resp_bulk(&entry.value),
                    None => resp_null(),
                }
            }
            b"SET" => handle_set(keyspace, args),
            b"SETNX" => {
                if args.len() != 3 {
                    return arity_error("setnx");
                }
                if keyspace.live(&args[1]).is_some() {
                    return resp_integer(0);
                }
                keyspace.put(&args[1], args[2].clone(), None);
                resp_integer(1)
            }
            b"SETEX" => {
                if args.len() != 4 {
                    return arity_error("setex");
                }
                match parse_u64(&args[2]) {
                    Some(secs) if secs > 0 => {
                        keyspace.put(&args[1], args[3].clone(), Some(Duration::from_secs(secs)));
                        resp_simple("OK")
                    }
                    _ => resp_error("ERR invalid expire time in 'setex' command"),
                }
            }
            b"DEL" => {
                if args.len() < 2 {
                    return arity_error("del");
                }
                let mut removed = 0;
                for key in &args[1..] {
                    if keyspace.live(key).is_some() {
                        keyspace.entries.remove(key.as_slice());
                        keyspace.touch(key);
                        removed += 1;
                    }
                }
                resp_integer(removed)
            }
            b"EXPIRE" => {
                if args.len() != 3 {
                    return arity_error("expire");
                }
                let Some(secs) = parse_u64(&args[2]) else {
                    return resp_error("ERR value is not an integer or out of range");
                };
                if keyspace.live(&args[1]).is_none() {
                    return resp_integer(0);
                }
                if let Some(entry) = keyspace.entries.get_mut(args[1].as_slice()) {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(secs));
                }
                keyspace.touch(&args[1]);
                resp_integer(1)
            }
            b"TTL" => {
                if args.len() != 2 {
                    return arity_error("ttl");
                }
                match keyspace.live(&args[1]) {
                    None => resp_integer(-2),
                    Some(Entry { expires_at: None, .. }) => resp_integer(-1),
                    Some(Entry {
                        expires_at: Some(at),
                        ..
                    }) => {
                        let remaining = at.saturating_duration_since(Instant::now());
                        resp_integer(remaining.as_secs() as i64)
                    }
                }
            }
            b"DUMP" => {
                if args.len() != 2 {
                    return arity_error("dump");
                }
                match keyspace.live(&args[1]) {
                    Some(entry) => resp_bulk(&[DUMP_PREFIX, entry.value.as_slice()].concat()),
                    None => resp_null(),
                }
            }
            b"RESTORE" => handle_restore(keyspace, args),
            _ => resp_error(&format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(&args[0])
            )),
        }
    }

    fn cluster_command(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if self.mode != Mode::Cluster {
            return resp_error("ERR This instance has cluster support disabled");
        }
        if args.len() != 2 || !args[1].eq_ignore_ascii_case(b"SLOTS") {
            return resp_error("ERR unsupported CLUSTER subcommand");
        }
        self.slot_queries.fetch_add(1, Ordering::Relaxed);

        let owners = self.owners.lock();
        let mut entries = Vec::new();
        let mut start = 0usize;
        while start < owners.len() {
            let owner = owners[start];
            let mut end = start;
            while end + 1 < owners.len() && owners[end + 1] == owner {
                end += 1;
            }
            let endpoint = &self.nodes[owner].endpoint;
            entries.push(resp_array(vec![
                resp_integer(start as i64),
                resp_integer(end as i64),
                resp_array(vec![
                    resp_bulk(endpoint.host.as_bytes()),
                    resp_integer(i64::from(endpoint.port)),
                    resp_bulk(format!("node-{owner}").as_bytes()),
                ]),
            ]));
            start = end + 1;
        }
        resp_array(entries)
    }

    fn info(&self, idx: usize) -> String {
        let enabled = u8::from(self.mode == Mode::Cluster);
        format!(
            "# Server\r\nredis_version:7.0.0\r\ntcp_port:{}\r\n\r\n\
             # Replication\r\nrole:master\r\nconnected_slaves:0\r\n\r\n\
             # Cluster\r\ncluster_enabled:{enabled}\r\n",
            self.nodes[idx].endpoint.port
        )
    }
}

fn handle_set(keyspace: &mut Keyspace, args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() < 3 {
        return arity_error("set");
    }
    let mut ttl = None;
    let mut only_new = false;
    let mut options = args[3..].iter();
    while let Some(option) = options.next() {
        let option = option.to_ascii_uppercase();
        match option.as_slice() {
            b"NX" => only_new = true,
            b"EX" | b"PX" => {
                let Some(amount) = options.next().and_then(|value| parse_u64(value)) else {
                    return resp_error("ERR value is not an integer or out of range");
                };
                if amount == 0 {
                    return resp_error("ERR invalid expire time in 'set' command");
                }
                ttl = Some(if option.as_slice() == b"EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
            }
            _ => return resp_error("ERR syntax error"),
        }
    }
    if only_new && keyspace.live(&args[1]).is_some() {
        return resp_null();
    }
    keyspace.put(&args[1], args[2].clone(), ttl);
    resp_simple("OK")
}

fn handle_restore(keyspace: &mut Keyspace, args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() < 4 {
        return arity_error("restore");
    }
    let replace = match &args[4..] {
        [] => false,
        [flag] if flag.eq_ignore_ascii_case(b"REPLACE") => true,
        _ => return resp_error("ERR syntax error"),
    };
    let Some(ttl_ms) = parse_u64(&args[2]) else {
        return resp_error("ERR Invalid TTL value, must be >= 0");
    };
    let Some(value) = args[3].strip_prefix(DUMP_PREFIX) else {
        return resp_error("ERR DUMP payload version or checksum are wrong");
    };
    if !replace && keyspace.live(&args[1]).is_some() {
        return resp_error("BUSYKEY Target key name already exists.");
    }
    let ttl = (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms));
    keyspace.put(&args[1], value.to_vec(), ttl);
    resp_simple("OK")
}

fn arity_error(command: &str) -> Vec<u8> {
    resp_error(&format!("ERR wrong number of arguments for '{command}' command"))
}

fn parse_u64(arg: &[u8]) -> Option<u64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn roundtrip(endpoint: &Endpoint, request: &[u8]) -> Vec<u8> {
        let mut stream = std::net::TcpStream::connect(endpoint.to_addr_string()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.write_all(request).unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn slots_split_evenly() {
        let cluster = FakeCluster::cluster(3).unwrap();
        assert_eq!(cluster.owner_index(0), 0);
        assert_eq!(cluster.owner_index(SLOT_COUNT - 1), 2);
        let reply = roundtrip(&cluster.endpoint(0), b"*2\r\n$7\r\nCLUSTER\r\n$5\r\nSLOTS\r\n");
        assert!(reply.starts_with(b"*3\r\n*3\r\n:0\r\n"));
        assert_eq!(cluster.slot_queries(), 1);
    }

    #[test]
    fn wrong_node_redirects() {
        let cluster = FakeCluster::cluster(2).unwrap();
        let slot = hash_slot("foo");
        let wrong = 1 - cluster.owner_index(slot);
        let reply = roundtrip(&cluster.endpoint(wrong), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        let expected = format!("-MOVED {slot} {}\r\n", cluster.owner_of(slot));
        assert_eq!(reply, expected.into_bytes());
        assert_eq!(cluster.redirects(), 1);
    }

    #[test]
    fn standalone_serves_everything() {
        let server = FakeCluster::standalone().unwrap();
        let endpoint = server.endpoint(0);
        assert_eq!(
            roundtrip(&endpoint, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"),
            b"+OK\r\n"
        );
        assert_eq!(roundtrip(&endpoint, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"), b"$1\r\nv\r\n");
        let info = roundtrip(&endpoint, b"*1\r\n$4\r\nINFO\r\n");
        assert!(String::from_utf8_lossy(&info).contains("cluster_enabled:0"));
    }

    #[test]
    fn exec_aborts_when_watched_key_changes() {
        let server = FakeCluster::standalone().unwrap();
        let mut conn = ConnState::default();
        let shared = &server.shared;
        let args = |parts: &[&str]| -> Vec<Vec<u8>> {
            parts.iter().map(|part| part.as_bytes().to_vec()).collect()
        };

        assert_eq!(shared.dispatch(0, &mut conn, &args(&["WATCH", "k"])), b"+OK\r\n");
        shared.dispatch(0, &mut ConnState::default(), &args(&["SET", "k", "other"]));
        assert_eq!(shared.dispatch(0, &mut conn, &args(&["MULTI"])), b"+OK\r\n");
        assert_eq!(shared.dispatch(0, &mut conn, &args(&["SET", "k", "v"])), b"+QUEUED\r\n");
        assert_eq!(shared.dispatch(0, &mut conn, &args(&["EXEC"])), b"*-1\r\n");

        assert_eq!(shared.dispatch(0, &mut conn, &args(&["MULTI"])), b"+OK\r\n");
        shared.dispatch(0, &mut conn, &args(&["SET", "k", "v"]));
        shared.dispatch(0, &mut conn, &args(&["GET", "k"]));
        assert_eq!(
            shared.dispatch(0, &mut conn, &args(&["EXEC"])),
            b"*2\r\n+OK\r\n$1\r\nv\r\n"
        );
    }

    #[test]
    fn restore_refuses_existing_key() {
        let server = FakeCluster::standalone().unwrap();
        let shared = &server.shared;
        let mut conn = ConnState::default();
        let payload = [DUMP_PREFIX, &b"v"[..]].concat();
        let restore = vec![b"RESTORE".to_vec(), b"k".to_vec(), b"0".to_vec(), payload];

        assert_eq!(shared.dispatch(0, &mut conn, &restore), b"+OK\r\n");
        assert!(shared
            .dispatch(0, &mut conn, &restore)
            .starts_with(b"-BUSYKEY"));
    }
}
