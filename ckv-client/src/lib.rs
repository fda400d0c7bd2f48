//! # ClusterKV Sync Client
//!
//! Purpose: A synchronous, thread-safe Redis client that routes each command
//! to the shard owning its key slot, with pooled connections per shard and
//! automatic recovery when the cluster topology changes.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Each shard keeps a fixed set of reusable TCP
//!    connections to avoid repeated handshakes.
//! 2. **Snapshot Routing**: Requests route against an immutable topology
//!    snapshot; a background thread replaces it when the cluster reshards.
//! 3. **One Retry**: A stale route or broken transport costs at most one
//!    refresh and one resend, never an unbounded loop.
//! 4. **Protocol Clarity**: RESP2 is encoded and parsed explicitly.
//!
//! ```no_run
//! use ckv_client::Client;
//!
//! let client = Client::connect("127.0.0.1:7000")?;
//! client.set("greeting", "hello")?;
//! assert_eq!(client.get("greeting")?, Some(b"hello".to_vec()));
//! # Ok::<(), ckv_client::ClientError>(())
//! ```

mod client;
mod command;
mod commands;
mod config;
mod connection;
mod error;
mod metrics;
mod pool;
mod resp;
mod topology;
mod transport;

pub use client::Client;
pub use command::{
    busy_key_status, fetch_integer, fetch_integer_array, fetch_map, fetch_slots, fetch_string,
    fetch_string_array, fetch_time, fetch_value, int_status, nil_status, ok_status, Command,
    Converter,
};
pub use commands::ClientTtl;
pub use config::ClientConfig;
pub use connection::Connection;
pub use error::{ClientError, ClientResult};
pub use metrics::{LatencySnapshot, MetricsSnapshot};
pub use pool::{PinnedConnection, PoolConfig, ShardPool};
pub use resp::RespValue;
pub use topology::{SlotAssignment, SlotRange, Topology};
pub use transport::{Connector, Session, TcpConnector, TcpSession};

pub use ckv_common::{hash_slot, Endpoint, StatusCode, Value, SLOT_COUNT};
