//! Typed command helpers on top of [`Client::execute`].
//!
//! Pooled helpers route by key and retry through the client. The `*_on`
//! helpers run on a [`PinnedConnection`] and are never retried; inside
//! `MULTI` the server answers each of them with `QUEUED`, and the real
//! results arrive in the `EXEC` reply.
//!
//! Failures come back as `Err`; informational outcomes such as
//! `ObjectExists` or `ObjectNotExist` come back as `Ok(StatusCode)`.

use std::time::Duration;

use ckv_common::{StatusCode, Value};

use crate::client::Client;
use crate::command::{
    busy_key_status, fetch_integer, fetch_string, fetch_time, fetch_value, int_status, nil_status,
    ok_status, Command,
};
use crate::error::{ClientError, ClientResult};
use crate::pool::PinnedConnection;
use crate::resp::RespValue;

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl Client {
    /// Value of `key`, or `None` when it does not exist.
    pub fn get(&self, key: impl AsRef<[u8]>) -> ClientResult<Option<Vec<u8>>> {
        let cmd = Command::keyed("GET", key).with_converter(nil_status);
        match self.run(cmd, fetch_string)? {
            (StatusCode::ObjectNotExist, _) => Ok(None),
            (_, value) => Ok(value),
        }
    }

    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> ClientResult<()> {
        let cmd = Command::keyed("SET", key).arg(value).with_converter(ok_status);
        self.run(cmd, fetch_value).map(|_| ())
    }

    /// `SET key value PX ttl`; sub-millisecond TTLs round up to 1 ms.
    pub fn set_with_ttl(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> ClientResult<()> {
        let (millis, len) = encode_u64(ttl_millis(ttl));
        let cmd = Command::keyed("SET", key)
            .arg(value)
            .arg("PX")
            .arg(&millis[..len])
            .with_converter(ok_status);
        self.run(cmd, fetch_value).map(|_| ())
    }

    /// `SETNX`: `Success` when written, `ObjectExists` when the key was
    /// already there.
    pub fn setnx(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> ClientResult<StatusCode> {
        let cmd = Command::keyed("SETNX", key)
            .arg(value)
            .with_converter(int_status(StatusCode::ObjectExists, 0));
        self.run(cmd, fetch_integer).map(|(status, _)| status)
    }

    /// `SETEX key seconds value`.
    pub fn setex(
        &self,
        key: impl AsRef<[u8]>,
        seconds: u64,
        value: impl AsRef<[u8]>,
    ) -> ClientResult<()> {
        let (secs, len) = encode_u64(seconds);
        let cmd = Command::keyed("SETEX", key)
            .arg(&secs[..len])
            .arg(value)
            .with_converter(ok_status);
        self.run(cmd, fetch_value).map(|_| ())
    }

    /// `Success` when the key was removed, `ObjectNotExist` otherwise.
    pub fn del(&self, key: impl AsRef<[u8]>) -> ClientResult<StatusCode> {
        let cmd =
            Command::keyed("DEL", key).with_converter(int_status(StatusCode::ObjectNotExist, 0));
        self.run(cmd, fetch_integer).map(|(status, _)| status)
    }

    /// Sets a TTL in whole seconds; `ObjectNotExist` when the key is absent.
    pub fn expire(&self, key: impl AsRef<[u8]>, ttl: Duration) -> ClientResult<StatusCode> {
        let (secs, len) = encode_u64(ttl.as_secs());
        let cmd = Command::keyed("EXPIRE", key)
            .arg(&secs[..len])
            .with_converter(int_status(StatusCode::ObjectNotExist, 0));
        self.run(cmd, fetch_integer).map(|(status, _)| status)
    }

    pub fn ttl(&self, key: impl AsRef<[u8]>) -> ClientResult<ClientTtl> {
        let cmd = Command::keyed("TTL", key);
        match self.run(cmd, fetch_integer)? {
            (_, Some(-2)) => Ok(ClientTtl::Missing),
            (_, Some(-1)) => Ok(ClientTtl::NoExpiry),
            (_, Some(secs)) if secs >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(secs as u64)))
            }
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `PING`, echoing `payload` when given. Goes to the first shard.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let mut cmd = Command::new("PING");
        if let Some(data) = payload {
            cmd = cmd.arg(data);
        }
        match self.run(cmd, fetch_string)? {
            (_, Some(data)) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Raw `INFO` text of the first shard.
    pub fn info(&self) -> ClientResult<Vec<u8>> {
        match self.run(Command::new("INFO"), fetch_string)? {
            (_, Some(data)) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Server clock as time since the Unix epoch.
    pub fn time(&self) -> ClientResult<Duration> {
        match self.run(Command::new("TIME"), fetch_time)? {
            (_, Some(now)) => Ok(now),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Serialized value of `key`, or `None` when it does not exist.
    pub fn dump(&self, key: impl AsRef<[u8]>) -> ClientResult<Option<Vec<u8>>> {
        let cmd = Command::keyed("DUMP", key).with_converter(nil_status);
        match self.run(cmd, fetch_string)? {
            (StatusCode::ObjectNotExist, _) => Ok(None),
            (_, value) => Ok(value),
        }
    }

    /// Recreates `key` from a `dump` payload. A zero `ttl` means no expiry.
    /// `ObjectExists` when the key is already present.
    pub fn restore(
        &self,
        key: impl AsRef<[u8]>,
        ttl: Duration,
        payload: impl AsRef<[u8]>,
    ) -> ClientResult<StatusCode> {
        let millis = if ttl.is_zero() { 0 } else { ttl_millis(ttl) };
        let (millis, len) = encode_u64(millis);
        let cmd = Command::keyed("RESTORE", key)
            .arg(&millis[..len])
            .arg(payload)
            .with_converter(|status: StatusCode, reply: Option<&RespValue>| {
                busy_key_status(ok_status(status, reply), reply)
            });
        self.run(cmd, fetch_value).map(|(status, _)| status)
    }

    // ------------------------------------------------------------------
    // Pinned connections
    // ------------------------------------------------------------------

    pub fn get_on(
        &self,
        pinned: &mut PinnedConnection,
        key: impl AsRef<[u8]>,
    ) -> ClientResult<Value> {
        self.run_on(pinned, Command::keyed("GET", key), fetch_value)
            .map(|(_, value)| value.unwrap_or(Value::Nil))
    }

    pub fn set_on(
        &self,
        pinned: &mut PinnedConnection,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> ClientResult<()> {
        let cmd = Command::keyed("SET", key).arg(value).with_converter(ok_status);
        self.run_on(pinned, cmd, fetch_value).map(|_| ())
    }

    pub fn setnx_on(
        &self,
        pinned: &mut PinnedConnection,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> ClientResult<Value> {
        let cmd = Command::keyed("SETNX", key).arg(value);
        self.run_on(pinned, cmd, fetch_value)
            .map(|(_, value)| value.unwrap_or(Value::Nil))
    }

    pub fn setex_on(
        &self,
        pinned: &mut PinnedConnection,
        key: impl AsRef<[u8]>,
        seconds: u64,
        value: impl AsRef<[u8]>,
    ) -> ClientResult<()> {
        let (secs, len) = encode_u64(seconds);
        let cmd = Command::keyed("SETEX", key)
            .arg(&secs[..len])
            .arg(value)
            .with_converter(ok_status);
        self.run_on(pinned, cmd, fetch_value).map(|_| ())
    }

    pub fn del_on(
        &self,
        pinned: &mut PinnedConnection,
        key: impl AsRef<[u8]>,
    ) -> ClientResult<Value> {
        self.run_on(pinned, Command::keyed("DEL", key), fetch_value)
            .map(|(_, value)| value.unwrap_or(Value::Nil))
    }

    pub fn expire_on(
        &self,
        pinned: &mut PinnedConnection,
        key: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> ClientResult<Value> {
        let (secs, len) = encode_u64(ttl.as_secs());
        let cmd = Command::keyed("EXPIRE", key).arg(&secs[..len]);
        self.run_on(pinned, cmd, fetch_value)
            .map(|(_, value)| value.unwrap_or(Value::Nil))
    }

    /// `WATCH` on the pinned connection; a later `exec` aborts if any
    /// watched key changed.
    pub fn watch<K: AsRef<[u8]>>(
        &self,
        pinned: &mut PinnedConnection,
        keys: &[K],
    ) -> ClientResult<()> {
        if keys.is_empty() {
            return Err(ClientError::Param("WATCH needs at least one key".into()));
        }
        let mut cmd = Command::new("WATCH");
        for key in keys {
            cmd = cmd.arg(key);
        }
        self.run_on(pinned, cmd.with_converter(ok_status), fetch_value)
            .map(|_| ())
    }

    pub fn unwatch(&self, pinned: &mut PinnedConnection) -> ClientResult<()> {
        let cmd = Command::new("UNWATCH").with_converter(ok_status);
        self.run_on(pinned, cmd, fetch_value).map(|_| ())
    }

    pub fn multi(&self, pinned: &mut PinnedConnection) -> ClientResult<()> {
        let cmd = Command::new("MULTI").with_converter(ok_status);
        self.run_on(pinned, cmd, fetch_value).map(|_| ())
    }

    /// Runs the queued transaction.
    ///
    /// Returns one element per queued command, or `Value::Nil` when a
    /// watched key changed and the transaction was aborted.
    pub fn exec(&self, pinned: &mut PinnedConnection) -> ClientResult<Value> {
        self.run_on(pinned, Command::new("EXEC"), fetch_value)
            .map(|(_, value)| value.unwrap_or(Value::Nil))
    }

    /// Drops the queued transaction.
    pub fn discard(&self, pinned: &mut PinnedConnection) -> ClientResult<()> {
        let cmd = Command::new("DISCARD").with_converter(ok_status);
        self.run_on(pinned, cmd, fetch_value).map(|_| ())
    }

    fn run<T>(
        &self,
        mut cmd: Command,
        decode: impl FnOnce(&RespValue) -> (StatusCode, Option<T>),
    ) -> ClientResult<(StatusCode, Option<T>)> {
        let status = self.execute(&mut cmd);
        finish(&cmd, status, decode)
    }

    fn run_on<T>(
        &self,
        pinned: &mut PinnedConnection,
        mut cmd: Command,
        decode: impl FnOnce(&RespValue) -> (StatusCode, Option<T>),
    ) -> ClientResult<(StatusCode, Option<T>)> {
        let status = self.execute_on(pinned, &mut cmd);
        finish(&cmd, status, decode)
    }
}

/// Decodes the reply of a finished command and maps failures to errors.
///
/// Error replies still go through the converter so it can reinterpret
/// them (a busy-key error becomes `ObjectExists`).
fn finish<T>(
    cmd: &Command,
    status: StatusCode,
    decode: impl FnOnce(&RespValue) -> (StatusCode, Option<T>),
) -> ClientResult<(StatusCode, Option<T>)> {
    let (status, value) = match status {
        StatusCode::Success | StatusCode::ReplyError => cmd.fetch_result(decode),
        other => (other, None),
    };
    if status.is_error() {
        return Err(ClientError::from_status(status, cmd.error_message()));
    }
    Ok((status, value))
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    // Stack buffer keeps the conversion allocation-free.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::mock::{bulk, error, simple, MockConnector, Step};
    use ckv_common::Endpoint;
    use std::sync::Arc;

    fn seed() -> Endpoint {
        Endpoint::new("solo", 6379)
    }

    fn client() -> (Client, MockConnector) {
        let connector = MockConnector::with_handler(|_, argv| match argv[0].as_slice() {
            b"INFO" => Some(bulk("cluster_enabled:0\r\n")),
            _ => None,
        });
        let config = ClientConfig {
            pool_size: 1,
            wait_retry_times: 5,
            wait_retry_interval_ms: 5,
            ..ClientConfig::new("solo", 6379)
        };
        let client = Client::with_connector(config, Arc::new(connector.clone())).unwrap();
        (client, connector)
    }

    fn reply(connector: &MockConnector, value: RespValue) {
        connector.push(&seed(), Step::Reply(value));
    }

    fn last_sent(connector: &MockConnector) -> Vec<Vec<u8>> {
        connector.sent().last().map(|(_, argv)| argv.clone()).unwrap_or_default()
    }

    #[test]
    fn encode_u64_matches_display() {
        for value in [0, 7, 10, 1_000, u64::MAX] {
            let (buf, len) = encode_u64(value);
            assert_eq!(&buf[..len], value.to_string().as_bytes());
        }
    }

    #[test]
    fn get_maps_nil_to_none() {
        let (client, connector) = client();
        reply(&connector, bulk("v"));
        reply(&connector, RespValue::Bulk(None));
        assert_eq!(client.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(client.get("k").unwrap(), None);
    }

    #[test]
    fn set_with_ttl_uses_milliseconds() {
        let (client, connector) = client();
        client.set_with_ttl("k", "v", Duration::from_millis(1500)).unwrap();
        assert_eq!(
            last_sent(&connector),
            vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec(), b"PX".to_vec(), b"1500".to_vec()]
        );
        client.set_with_ttl("k", "v", Duration::from_micros(10)).unwrap();
        assert_eq!(last_sent(&connector)[4], b"1".to_vec());
    }

    #[test]
    fn set_rejects_unexpected_reply() {
        let (client, connector) = client();
        reply(&connector, simple("NOPE"));
        assert!(matches!(client.set("k", "v"), Err(ClientError::UnexpectedResponse)));
    }

    #[test]
    fn integer_sentinels_become_statuses() {
        let (client, connector) = client();
        reply(&connector, RespValue::Integer(1));
        reply(&connector, RespValue::Integer(0));
        reply(&connector, RespValue::Integer(0));
        reply(&connector, RespValue::Integer(1));
        assert_eq!(client.setnx("k", "v").unwrap(), StatusCode::Success);
        assert_eq!(client.setnx("k", "v").unwrap(), StatusCode::ObjectExists);
        assert_eq!(client.del("k").unwrap(), StatusCode::ObjectNotExist);
        assert_eq!(client.expire("k", Duration::from_secs(5)).unwrap(), StatusCode::Success);
        assert_eq!(last_sent(&connector)[2], b"5".to_vec());
    }

    #[test]
    fn ttl_states() {
        let (client, connector) = client();
        reply(&connector, RespValue::Integer(-2));
        reply(&connector, RespValue::Integer(-1));
        reply(&connector, RespValue::Integer(30));
        reply(&connector, RespValue::Integer(-7));
        assert_eq!(client.ttl("k").unwrap(), ClientTtl::Missing);
        assert_eq!(client.ttl("k").unwrap(), ClientTtl::NoExpiry);
        assert_eq!(client.ttl("k").unwrap(), ClientTtl::ExpiresIn(Duration::from_secs(30)));
        assert!(matches!(client.ttl("k"), Err(ClientError::UnexpectedResponse)));
    }

    #[test]
    fn server_errors_keep_their_text() {
        let (client, connector) = client();
        reply(
            &connector,
            error("WRONGTYPE Operation against a key holding the wrong kind of value"),
        );
        match client.get("k") {
            Err(ClientError::Server { message }) => assert!(message.starts_with("WRONGTYPE")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn restore_busy_key_is_object_exists() {
        let (client, connector) = client();
        reply(&connector, bulk("payload"));
        reply(&connector, error("BUSYKEY Target key name already exists."));
        reply(&connector, simple("OK"));

        let payload = client.dump("src").unwrap().unwrap();
        assert_eq!(
            client.restore("dst", Duration::ZERO, &payload).unwrap(),
            StatusCode::ObjectExists
        );
        assert_eq!(client.restore("dst", Duration::ZERO, &payload).unwrap(), StatusCode::Success);
        assert_eq!(last_sent(&connector)[2], b"0".to_vec());
    }

    #[test]
    fn time_and_ping() {
        let (client, connector) = client();
        reply(
            &connector,
            RespValue::Array(Some(vec![bulk("1700000000"), bulk("250000")])),
        );
        assert_eq!(
            client.time().unwrap(),
            Duration::from_secs(1_700_000_000) + Duration::from_millis(250)
        );

        reply(&connector, simple("PONG"));
        assert_eq!(client.ping(None).unwrap(), b"PONG".to_vec());
        reply(&connector, bulk("hi"));
        assert_eq!(client.ping(Some(&b"hi"[..])).unwrap(), b"hi".to_vec());
    }

    #[test]
    fn transaction_on_pinned_connection() {
        let (client, connector) = client();
        let mut pinned = client.attach_key("k").unwrap();

        client.watch(&mut pinned, &["k"]).unwrap();
        client.multi(&mut pinned).unwrap();
        reply(&connector, simple("QUEUED"));
        client.set_on(&mut pinned, "k", "v").unwrap();
        reply(&connector, simple("QUEUED"));
        assert_eq!(client.get_on(&mut pinned, "k").unwrap(), Value::from("QUEUED"));
        reply(
            &connector,
            RespValue::Array(Some(vec![simple("OK"), bulk("v")])),
        );
        assert_eq!(
            client.exec(&mut pinned).unwrap(),
            Value::Array(vec![Value::from("OK"), Value::from("v")])
        );

        reply(&connector, RespValue::Array(None));
        assert_eq!(client.exec(&mut pinned).unwrap(), Value::Nil);

        assert!(matches!(
            client.watch::<&str>(&mut pinned, &[]),
            Err(ClientError::Param(_))
        ));
        client.detach(ckv_common::hash_slot("k"), pinned);
    }

    #[test]
    fn pinned_transport_failure_is_not_retried() {
        let (client, connector) = client();
        let mut pinned = client.attach(0).unwrap();
        connector.push(&seed(), Step::Fail);
        assert!(matches!(
            client.del_on(&mut pinned, "k"),
            Err(ClientError::Request(_))
        ));
        assert_eq!(client.metrics().forced_refreshes, 0);
        let dels = connector
            .sent()
            .iter()
            .filter(|(_, argv)| argv[0].as_slice() == b"DEL")
            .count();
        assert_eq!(dels, 1);
        client.detach(0, pinned);
    }
}
