//! # Shared Types
//!
//! Addressing and reply types used on both sides of the wire.
//!
//! ## Design Principles
//!
//! 1. **Owned Data**: Values own their bytes; no borrowed reply buffers leak
//!    out of the transport.
//! 2. **Binary-Safe**: Strings are raw bytes, never assumed to be UTF-8.
//! 3. **Cheap Identity**: `Endpoint` is hashable so pools can be keyed by it.

use std::fmt;
use std::str::FromStr;

use crate::error::{CkvError, CkvResult};

/// Network address of one shard server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// Parses `"host:port"`, or a bare host combined with `default_port`.
    ///
    /// An explicit port in `addr` wins over `default_port`.
    ///
    /// # Errors
    /// Returns `CkvError::InvalidEndpoint` for an empty host, a zero port,
    /// or a port that is not a number.
    pub fn parse_with_default(addr: &str, default_port: u16) -> CkvResult<Self> {
        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| CkvError::InvalidEndpoint(addr.to_string()))?;
                (host, port)
            }
            None => (addr, default_port),
        };
        if host.is_empty() || port == 0 {
            return Err(CkvError::InvalidEndpoint(addr.to_string()));
        }
        Ok(Endpoint::new(host, port))
    }

    /// Formats the endpoint for socket resolution.
    pub fn to_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = CkvError;

    fn from_str(s: &str) -> CkvResult<Self> {
        if !s.contains(':') {
            return Err(CkvError::InvalidEndpoint(s.to_string()));
        }
        Endpoint::parse_with_default(s, 0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Decoded form of a server reply.
///
/// Used for composite results such as the reply to `EXEC`, where each
/// element is the reply to one queued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null bulk string or null array.
    Nil,
    /// Integer reply.
    Integer(i64),
    /// Bulk or status string.
    String(Vec<u8>),
    /// Nested replies.
    Array(Vec<Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse_host_port() {
        let ep: Endpoint = "127.0.0.1:7000".parse().unwrap();
        assert_eq!(ep, Endpoint::new("127.0.0.1", 7000));
        assert_eq!(ep.to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_endpoint_default_port() {
        let ep = Endpoint::parse_with_default("cache-a", 6379).unwrap();
        assert_eq!(ep, Endpoint::new("cache-a", 6379));

        // Explicit port in the host string overrides the default.
        let ep = Endpoint::parse_with_default("cache-a:6380", 6379).unwrap();
        assert_eq!(ep.port, 6380);
    }

    #[test]
    fn test_endpoint_rejects_malformed() {
        assert!(Endpoint::parse_with_default("", 6379).is_err());
        assert!(Endpoint::parse_with_default("host", 0).is_err());
        assert!(Endpoint::parse_with_default("host:abc", 6379).is_err());
        assert!(Endpoint::parse_with_default(":6379", 6379).is_err());
        assert!("no-port".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_value_accessors() {
        let nested = Value::Array(vec![
            Value::from(3),
            Value::from("ok"),
            Value::Array(vec![Value::Nil]),
        ]);
        let items = nested.as_array().unwrap();
        assert_eq!(items[0].as_integer(), Some(3));
        assert_eq!(items[1].as_bytes(), Some(&b"ok"[..]));
        assert!(items[2].as_array().unwrap()[0].is_nil());
        assert_eq!(nested.as_integer(), None);
    }
}
