//! # Commands
//!
//! Purpose: Represent one outgoing request together with its reply, and turn
//! that reply into a typed result plus a status code.
//!
//! ## Design Principles
//! 1. **Owned Arguments**: A command owns its argument vector; nothing is
//!    shared with the caller once built.
//! 2. **Decode vs. Convert**: Decoders only check reply *shape*; converters
//!    decide per-command *meaning* (e.g. integer 0 means "key missing").
//! 3. **Status First**: The engine speaks `StatusCode`; typed errors are
//!    produced later by the public wrappers.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use ckv_common::{checked_slot, hash_slot, Endpoint, StatusCode, Value};

use crate::resp::RespValue;
use crate::topology::SlotAssignment;
use crate::transport::Session;

/// Maps `(preliminary status, raw reply)` to the final status.
pub type Converter = Box<dyn Fn(StatusCode, Option<&RespValue>) -> StatusCode + Send + Sync>;

/// One request and its eventual reply.
pub struct Command {
    args: Vec<Vec<u8>>,
    slot: Option<u16>,
    reply: Option<RespValue>,
    converter: Converter,
}

impl Command {
    /// Creates a command with only its name set.
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        Command {
            args: vec![name.as_ref().to_vec()],
            slot: None,
            reply: None,
            converter: Box::new(|status, _| status),
        }
    }

    /// Creates a command whose first argument is `key`, routed by its slot.
    pub fn keyed(name: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref();
        let mut cmd = Command::new(name).arg(key);
        cmd.set_slot(hash_slot(key));
        cmd
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Replaces every argument after the command name.
    pub fn set_args<I, A>(&mut self, args: I)
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args.truncate(1);
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_vec()));
    }

    pub fn set_slot(&mut self, slot: u16) {
        self.slot = Some(slot);
    }

    pub fn with_converter(
        mut self,
        converter: impl Fn(StatusCode, Option<&RespValue>) -> StatusCode + Send + Sync + 'static,
    ) -> Self {
        self.set_converter(converter);
        self
    }

    pub fn set_converter(
        &mut self,
        converter: impl Fn(StatusCode, Option<&RespValue>) -> StatusCode + Send + Sync + 'static,
    ) {
        self.converter = Box::new(converter);
    }

    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Full argument vector, command name first.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn slot(&self) -> Option<u16> {
        self.slot
    }

    /// Sends the command over `session` and stores the reply.
    ///
    /// A missing session or a transport failure yields `RequestError`; an
    /// error reply yields `ReplyError` with the reply kept for inspection.
    pub fn send(&mut self, session: Option<&mut (dyn Session + 'static)>) -> StatusCode {
        self.reply = None;
        let Some(session) = session else {
            return StatusCode::RequestError;
        };
        match session.send_command(&self.args) {
            Ok(reply) => {
                let status = if reply.is_error() {
                    StatusCode::ReplyError
                } else {
                    StatusCode::Success
                };
                self.reply = Some(reply);
                status
            }
            Err(_) => StatusCode::RequestError,
        }
    }

    pub fn reply(&self) -> Option<&RespValue> {
        self.reply.as_ref()
    }

    /// Text of the error reply, if the server rejected the command.
    pub fn error_message(&self) -> Option<String> {
        self.reply.as_ref().and_then(RespValue::error_message)
    }

    /// Whether the server redirected the command to another shard.
    pub fn is_moved(&self) -> bool {
        matches!(&self.reply, Some(RespValue::Error(text)) if text.starts_with(b"MOVED"))
    }

    /// Decodes the stored reply and runs it through the converter.
    pub fn fetch_result<T>(
        &self,
        decode: impl FnOnce(&RespValue) -> (StatusCode, Option<T>),
    ) -> (StatusCode, Option<T>) {
        match &self.reply {
            Some(reply) => {
                let (status, value) = decode(reply);
                ((self.converter)(status, Some(reply)), value)
            }
            None => ((self.converter)(StatusCode::RequestError, None), None),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &String::from_utf8_lossy(self.name()))
            .field("argc", &self.args.len())
            .field("slot", &self.slot)
            .finish()
    }
}

// ============================================================================
// CONVERTERS
// ============================================================================

/// Expects `OK` (or `QUEUED` inside a transaction); anything else is a
/// reply error.
pub fn ok_status(status: StatusCode, reply: Option<&RespValue>) -> StatusCode {
    match (status, reply) {
        (StatusCode::Success, Some(RespValue::Simple(text) | RespValue::Bulk(Some(text))))
            if text.as_slice() == b"OK" || text.as_slice() == b"QUEUED" =>
        {
            StatusCode::Success
        }
        (StatusCode::Success, _) => StatusCode::ReplyError,
        (other, _) => other,
    }
}

/// Maps an integer reply equal to `sentinel` onto `code`.
pub fn int_status(
    code: StatusCode,
    sentinel: i64,
) -> impl Fn(StatusCode, Option<&RespValue>) -> StatusCode + Send + Sync + 'static {
    move |status: StatusCode, reply: Option<&RespValue>| match (status, reply) {
        (StatusCode::Success, Some(RespValue::Integer(value))) if *value == sentinel => code,
        (other, _) => other,
    }
}

/// Maps a nil reply onto `ObjectNotExist`.
pub fn nil_status(status: StatusCode, reply: Option<&RespValue>) -> StatusCode {
    match (status, reply) {
        (StatusCode::Success, Some(reply)) if reply.is_nil() => StatusCode::ObjectNotExist,
        (other, _) => other,
    }
}

/// Maps the "target key busy" error onto `ObjectExists`.
pub fn busy_key_status(status: StatusCode, reply: Option<&RespValue>) -> StatusCode {
    match (status, reply) {
        (StatusCode::ReplyError, Some(RespValue::Error(text)))
            if text.starts_with(b"BUSYKEY") || text.as_slice() == b"Target key name is busy" =>
        {
            StatusCode::ObjectExists
        }
        (other, _) => other,
    }
}

// ============================================================================
// DECODERS
// ============================================================================

pub fn fetch_integer(reply: &RespValue) -> (StatusCode, Option<i64>) {
    match reply {
        RespValue::Integer(value) => (StatusCode::Success, Some(*value)),
        RespValue::Bulk(None) => (StatusCode::ObjectNotExist, None),
        _ => (StatusCode::ReplyError, None),
    }
}

/// Bulk or status string; nil decodes to an empty string.
pub fn fetch_string(reply: &RespValue) -> (StatusCode, Option<Vec<u8>>) {
    match reply {
        RespValue::Simple(text) | RespValue::Bulk(Some(text)) => {
            (StatusCode::Success, Some(text.clone()))
        }
        RespValue::Bulk(None) => (StatusCode::Success, Some(Vec::new())),
        _ => (StatusCode::ReplyError, None),
    }
}

/// Array of integers; elements of another shape are dropped and the status
/// becomes `PartialSuccess`.
pub fn fetch_integer_array(reply: &RespValue) -> (StatusCode, Option<Vec<i64>>) {
    let RespValue::Array(Some(items)) = reply else {
        return (StatusCode::ReplyError, None);
    };
    let mut status = StatusCode::Success;
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match fetch_integer(item) {
            (StatusCode::Success, Some(value)) => values.push(value),
            _ => status = StatusCode::PartialSuccess,
        }
    }
    (status, Some(values))
}

/// Array of strings; nil decodes to an empty list.
pub fn fetch_string_array(reply: &RespValue) -> (StatusCode, Option<Vec<Vec<u8>>>) {
    let items = match reply {
        RespValue::Array(Some(items)) => items,
        RespValue::Array(None) | RespValue::Bulk(None) => {
            return (StatusCode::Success, Some(Vec::new()))
        }
        _ => return (StatusCode::ReplyError, None),
    };
    let mut status = StatusCode::Success;
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match fetch_string(item) {
            (StatusCode::Success, Some(value)) => values.push(value),
            _ => status = StatusCode::PartialSuccess,
        }
    }
    (status, Some(values))
}

/// Flat `field, value, field, value, ...` array.
pub fn fetch_map(reply: &RespValue) -> (StatusCode, Option<BTreeMap<Vec<u8>, Vec<u8>>>) {
    let RespValue::Array(Some(items)) = reply else {
        return (StatusCode::ReplyError, None);
    };
    if items.len() % 2 != 0 {
        return (StatusCode::ReplyError, None);
    }
    let mut map = BTreeMap::new();
    for pair in items.chunks_exact(2) {
        match (fetch_string(&pair[0]), fetch_string(&pair[1])) {
            ((StatusCode::Success, Some(field)), (StatusCode::Success, Some(value))) => {
                map.insert(field, value);
            }
            ((status, _), (StatusCode::Success, _)) | (_, (status, _)) => return (status, None),
        }
    }
    (StatusCode::Success, Some(map))
}

/// `TIME` reply: seconds and microseconds since the Unix epoch.
pub fn fetch_time(reply: &RespValue) -> (StatusCode, Option<Duration>) {
    let RespValue::Array(Some(items)) = reply else {
        return (StatusCode::ReplyError, None);
    };
    let [RespValue::Bulk(Some(secs)), RespValue::Bulk(Some(micros))] = items.as_slice() else {
        return (StatusCode::ReplyError, None);
    };
    match (parse_u64(secs), parse_u64(micros)) {
        (Some(secs), Some(micros)) => (
            StatusCode::Success,
            Some(Duration::from_secs(secs) + Duration::from_micros(micros)),
        ),
        _ => (StatusCode::ReplyError, None),
    }
}

/// `CLUSTER SLOTS` reply: `[start, end, [host, port, ..], replicas..]` per
/// range. End slots are inclusive.
pub fn fetch_slots(reply: &RespValue) -> (StatusCode, Option<Vec<SlotAssignment>>) {
    let RespValue::Array(Some(items)) = reply else {
        return (StatusCode::ReplyError, None);
    };
    let mut assignments = Vec::with_capacity(items.len());
    for item in items {
        match parse_slot_entry(item) {
            Some(assignment) => assignments.push(assignment),
            None => return (StatusCode::ReplyError, None),
        }
    }
    (StatusCode::Success, Some(assignments))
}

/// Any reply shape, decoded into a `Value` tree (used for `EXEC`).
pub fn fetch_value(reply: &RespValue) -> (StatusCode, Option<Value>) {
    match reply.to_value() {
        Some(value) => (StatusCode::Success, Some(value)),
        None => (StatusCode::ReplyError, None),
    }
}

fn parse_slot_entry(item: &RespValue) -> Option<SlotAssignment> {
    let RespValue::Array(Some(fields)) = item else {
        return None;
    };
    if fields.len() < 3 {
        return None;
    }
    let (RespValue::Integer(start), RespValue::Integer(end)) = (&fields[0], &fields[1]) else {
        return None;
    };
    let start = checked_slot(*start).ok()?;
    let end = checked_slot(*end).ok()?;
    if start > end {
        return None;
    }
    let master = parse_node(&fields[2])?;
    let replicas = fields[3..].iter().filter_map(parse_node).collect();
    Some(SlotAssignment {
        start,
        end,
        master,
        replicas,
    })
}

fn parse_node(node: &RespValue) -> Option<Endpoint> {
    let RespValue::Array(Some(fields)) = node else {
        return None;
    };
    let host = match fields.first()? {
        RespValue::Bulk(Some(host)) | RespValue::Simple(host) => {
            String::from_utf8(host.clone()).ok()?
        }
        _ => return None,
    };
    let port = match fields.get(1)? {
        RespValue::Integer(port) => u16::try_from(*port).ok()?,
        _ => return None,
    };
    if host.is_empty() || port == 0 {
        return None;
    }
    Some(Endpoint::new(host, port))
}

fn parse_u64(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}
