//! # Error Types
//!
//! Parsing failures for the shared vocabulary types.

use thiserror::Error;

/// Result alias for the common crate.
pub type CkvResult<T> = Result<T, CkvError>;

/// Errors raised while building shared types from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CkvError {
    /// Address is not `host:port` or has an empty host / zero port.
    #[error("invalid endpoint: {0:?}")]
    InvalidEndpoint(String),

    /// Slot number outside `[0, SLOT_COUNT)`.
    #[error("slot {0} out of range")]
    SlotOutOfRange(i64),
}
