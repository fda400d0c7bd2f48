//! # Status Codes
//!
//! Numeric outcome codes returned by every client operation.
//!
//! ## Code Layout
//!
//! Non-negative codes describe how a request that reached the server ended
//! (plain success or an informational outcome such as "key already exists").
//! Negative codes are failures: caller misuse, a rejected or malformed reply,
//! a transport failure, pool exhaustion, or a topology change.
//!
//! ```text
//!    5  ResultEOF        -1  ParamError
//!    4  NoEffect         -2  ReplyError
//!    3  ObjectNotExist   -3  RequestError
//!    2  ObjectExists     -4  NoResource
//!    1  PartialSuccess   -6  NotSupported
//!    0  Success        -100  SlotChanged
//! ```

// ============================================================================
// CODE CONSTANTS
// ============================================================================

pub const RC_RESULT_EOF: i32 = 5;
pub const RC_NO_EFFECT: i32 = 4;
pub const RC_OBJ_NOT_EXIST: i32 = 3;
pub const RC_OBJ_EXIST: i32 = 2;
pub const RC_PART_SUCCESS: i32 = 1;
pub const RC_SUCCESS: i32 = 0;
pub const RC_PARAM_ERR: i32 = -1;
pub const RC_REPLY_ERR: i32 = -2;
pub const RC_RQST_ERR: i32 = -3;
pub const RC_NO_RESOURCE: i32 = -4;
pub const RC_NOT_SUPPORT: i32 = -6;
pub const RC_SLOT_CHANGED: i32 = -100;

// ============================================================================
// STATUS ENUMERATION
// ============================================================================

/// Outcome of a client operation.
///
/// Each variant corresponds to one of the `RC_*` constants above.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Request completed and the reply had the expected shape.
    Success = RC_SUCCESS,

    /// Composite reply decoded, but some elements had an unexpected shape.
    PartialSuccess = RC_PART_SUCCESS,

    /// The addressed key (or target name) already exists.
    ObjectExists = RC_OBJ_EXIST,

    /// The addressed key does not exist.
    ObjectNotExist = RC_OBJ_NOT_EXIST,

    /// The command was accepted but changed nothing.
    NoEffect = RC_NO_EFFECT,

    /// An iteration reached its end.
    ResultEOF = RC_RESULT_EOF,

    /// Caller misuse; never retried.
    ParamError = RC_PARAM_ERR,

    /// The server rejected the request or the reply had the wrong shape.
    ReplyError = RC_REPLY_ERR,

    /// Transport-level failure (connect, write, or read).
    RequestError = RC_RQST_ERR,

    /// No pooled connection became free within the retry window.
    NoResource = RC_NO_RESOURCE,

    /// Operation is not available in the current mode.
    NotSupported = RC_NOT_SUPPORT,

    /// The slot owning the key moved to another shard.
    SlotChanged = RC_SLOT_CHANGED,
}

impl StatusCode {
    /// Convert the status to its numeric code.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Try to create a status from its numeric code.
    pub const fn from_code(value: i32) -> Option<Self> {
        match value {
            RC_RESULT_EOF => Some(Self::ResultEOF),
            RC_NO_EFFECT => Some(Self::NoEffect),
            RC_OBJ_NOT_EXIST => Some(Self::ObjectNotExist),
            RC_OBJ_EXIST => Some(Self::ObjectExists),
            RC_PART_SUCCESS => Some(Self::PartialSuccess),
            RC_SUCCESS => Some(Self::Success),
            RC_PARAM_ERR => Some(Self::ParamError),
            RC_REPLY_ERR => Some(Self::ReplyError),
            RC_RQST_ERR => Some(Self::RequestError),
            RC_NO_RESOURCE => Some(Self::NoResource),
            RC_NOT_SUPPORT => Some(Self::NotSupported),
            RC_SLOT_CHANGED => Some(Self::SlotChanged),
            _ => None,
        }
    }

    /// Get human-readable status name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
            Self::ObjectExists => "OBJECT_EXISTS",
            Self::ObjectNotExist => "OBJECT_NOT_EXIST",
            Self::NoEffect => "NO_EFFECT",
            Self::ResultEOF => "RESULT_EOF",
            Self::ParamError => "PARAM_ERROR",
            Self::ReplyError => "REPLY_ERROR",
            Self::RequestError => "REQUEST_ERROR",
            Self::NoResource => "NO_RESOURCE",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::SlotChanged => "SLOT_CHANGED",
        }
    }

    /// True for `Success` only.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// True for every negative (failure) code.
    pub const fn is_error(self) -> bool {
        self.code() < 0
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

// ============================================================================
// TESTS
// ============================================================================
