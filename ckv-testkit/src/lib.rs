//! # ClusterKV Test Kit
//!
//! In-process fake Redis nodes for exercising the client against real
//! sockets: standalone or sharded, with slot migration, forced disconnects
//! and node restarts under test control.

pub mod protocol;
pub mod server;

pub use server::FakeCluster;
