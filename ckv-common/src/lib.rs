// ckv-common - Shared types for the ClusterKV client
//
// Status codes, slot hashing, endpoints and decoded reply values.

pub mod error;
pub mod slot;
pub mod status;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use slot::*;
pub use status::*;
pub use types::*;
