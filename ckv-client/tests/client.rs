use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ckv_client::{
    hash_slot, Client, ClientConfig, ClientError, ClientTtl, Endpoint, StatusCode, Value,
    SLOT_COUNT,
};
use ckv_testkit::FakeCluster;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(seed: &Endpoint) -> ClientConfig {
    ClientConfig {
        pool_size: 2,
        client_timeout_ms: 1_000,
        wait_retry_times: 20,
        wait_retry_interval_ms: 25,
        refresh_backoff_ms: 50,
        borrow_retry_times: 2,
        borrow_retry_interval_ms: 10,
        ..ClientConfig::new(seed.host.clone(), seed.port)
    }
}

fn wait_until(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn cluster_routes_every_key_to_its_owner() {
    init_tracing();
    let cluster = FakeCluster::cluster(3).expect("cluster");
    let client = Client::with_config(config(&cluster.endpoint(0))).expect("client");

    assert!(client.is_cluster());
    let ranges = client.slot_ranges();
    assert_eq!(ranges.len(), 3);
    assert_eq!(ranges[0].0, 0);
    assert_eq!(ranges[2].1, SLOT_COUNT - 1);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].1 + 1, pair[1].0);
    }

    for i in 0..100 {
        let key = format!("key:{i}");
        client.set(&key, format!("value:{i}")).expect("set");
        assert_eq!(
            client.shard_for_slot(hash_slot(&key)),
            Some(cluster.owner_of(hash_slot(&key)))
        );
    }
    for i in 0..100 {
        let value = client.get(format!("key:{i}")).expect("get");
        assert_eq!(value, Some(format!("value:{i}").into_bytes()));
    }

    assert_eq!(cluster.redirects(), 0);
    assert_eq!(client.get("missing").expect("get"), None);
}

#[test]
fn migrated_slot_costs_one_redirect() {
    init_tracing();
    let cluster = FakeCluster::cluster(3).expect("cluster");
    let client = Client::with_config(config(&cluster.endpoint(0))).expect("client");

    client.set("foo", "bar").expect("set");
    let slot = hash_slot("foo");
    let target = (cluster.owner_index(slot) + 1) % 3;
    cluster.migrate(slot, slot, target);

    assert_eq!(client.get("foo").expect("get"), Some(b"bar".to_vec()));
    assert_eq!(cluster.redirects(), 1);
    assert_eq!(client.shard_for_slot(slot), Some(cluster.endpoint(target)));

    let metrics = client.metrics();
    assert_eq!(metrics.moved_retries, 1);
    assert_eq!(metrics.forced_refreshes, 1);

    assert_eq!(client.get("foo").expect("get"), Some(b"bar".to_vec()));
    assert_eq!(cluster.redirects(), 1);
    assert!(client.slot_ranges().len() > 3);
}

#[test]
fn transaction_commits_and_aborts() {
    init_tracing();
    let cluster = FakeCluster::cluster(2).expect("cluster");
    let client = Client::with_config(config(&cluster.endpoint(0))).expect("client");
    let key = "{account}balance";
    let slot = hash_slot(key);
    client.set(key, "10").expect("seed value");

    let mut pinned = client.attach(slot).expect("attach");
    client.watch(&mut pinned, &[key]).expect("watch");
    client.multi(&mut pinned).expect("multi");
    client.set_on(&mut pinned, key, "20").expect("queue set");
    assert_eq!(client.get_on(&mut pinned, key).expect("queue get"), Value::from("QUEUED"));
    assert_eq!(
        client.exec(&mut pinned).expect("exec"),
        Value::Array(vec![Value::from("OK"), Value::from("20")])
    );

    client.watch(&mut pinned, &[key]).expect("watch");
    client.set(key, "99").expect("concurrent write");
    client.multi(&mut pinned).expect("multi");
    client.set_on(&mut pinned, key, "30").expect("queue set");
    assert_eq!(client.exec(&mut pinned).expect("exec"), Value::Nil);
    client.detach(slot, pinned);

    assert_eq!(client.get(key).expect("get"), Some(b"99".to_vec()));
}

#[test]
fn discard_drops_queued_commands() {
    let server = FakeCluster::standalone().expect("server");
    let client = Client::with_config(config(&server.endpoint(0))).expect("client");

    let mut pinned = client.attach_key("k").expect("attach");
    client.multi(&mut pinned).expect("multi");
    client.set_on(&mut pinned, "k", "v").expect("queue");
    client.discard(&mut pinned).expect("discard");
    client.detach(hash_slot("k"), pinned);

    assert_eq!(client.get("k").expect("get"), None);
}

#[test]
fn small_pool_is_exhausted_by_pinned_connection() {
    let server = FakeCluster::standalone().expect("server");
    let mut cfg = config(&server.endpoint(0));
    cfg.pool_size = 1;
    let client = Client::with_config(cfg).expect("client");

    let pinned = client.attach(0).expect("attach");
    assert!(matches!(client.attach(1), Err(ClientError::PoolExhausted)));
    match client.get("k") {
        Err(err) => assert_eq!(err.status(), StatusCode::NoResource),
        Ok(value) => panic!("pool should be exhausted, got {value:?}"),
    }
    client.detach(0, pinned);

    assert_eq!(client.get("k").expect("get"), None);
}

#[test]
fn dropped_connections_cost_one_retry() {
    init_tracing();
    let server = FakeCluster::standalone().expect("server");
    let client = Client::with_config(config(&server.endpoint(0))).expect("client");
    assert!(!client.is_cluster());

    client.set("k", "v").expect("set");
    server.disconnect_all();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(client.get("k").expect("get"), Some(b"v".to_vec()));
    let metrics = client.metrics();
    assert_eq!(metrics.transport_retries, 1);
    assert_eq!(metrics.forced_refreshes, 1);
}

#[test]
fn dropped_transaction_does_not_leak_queued_writes() {
    init_tracing();
    let server = FakeCluster::standalone().expect("server");
    let client = Client::with_config(config(&server.endpoint(0))).expect("client");

    let mut pinned = client.attach_key("k").expect("attach");
    client.watch(&mut pinned, &["k"]).expect("watch");
    client.multi(&mut pinned).expect("multi");
    server.disconnect_all();
    thread::sleep(Duration::from_millis(50));

    let err = client.set_on(&mut pinned, "k", "leaked").unwrap_err();
    assert_eq!(err.status(), StatusCode::RequestError);
    assert!(client.exec(&mut pinned).is_err());
    client.detach(hash_slot("k"), pinned);

    assert_eq!(client.get("k").expect("get"), None);
    assert_eq!(client.metrics().forced_refreshes, 1);
}

#[test]
fn standalone_recovers_after_restart() {
    init_tracing();
    let server = FakeCluster::standalone().expect("server");
    let client = Client::with_config(config(&server.endpoint(0))).expect("client");
    client.set("k", "v").expect("set");

    server.stop_node(0);
    assert!(client.get("k").is_err());

    server.start_node(0).expect("restart");
    assert!(wait_until(Duration::from_secs(5), || client.is_valid()));
    assert_eq!(client.get("k").expect("get"), Some(b"v".to_vec()));
    assert!(client.metrics().refresh_failed >= 1);
}

#[test]
fn expiry_commands() {
    let server = FakeCluster::standalone().expect("server");
    let client = Client::with_config(config(&server.endpoint(0))).expect("client");

    client.set_with_ttl("session", "x", Duration::from_secs(30)).expect("set");
    match client.ttl("session").expect("ttl") {
        ClientTtl::ExpiresIn(left) => assert!(left <= Duration::from_secs(30)),
        other => panic!("unexpected ttl {other:?}"),
    }

    client.set("plain", "x").expect("set");
    assert_eq!(client.ttl("plain").expect("ttl"), ClientTtl::NoExpiry);
    assert_eq!(client.ttl("absent").expect("ttl"), ClientTtl::Missing);

    assert_eq!(
        client.expire("plain", Duration::from_secs(60)).expect("expire"),
        StatusCode::Success
    );
    assert_eq!(
        client.expire("absent", Duration::from_secs(60)).expect("expire"),
        StatusCode::ObjectNotExist
    );

    client.setex("short", 5, "x").expect("setex");
    assert!(matches!(client.ttl("short").expect("ttl"), ClientTtl::ExpiresIn(_)));

    assert_eq!(client.setnx("plain", "y").expect("setnx"), StatusCode::ObjectExists);
    assert_eq!(client.setnx("fresh", "y").expect("setnx"), StatusCode::Success);
    assert_eq!(client.del("fresh").expect("del"), StatusCode::Success);
    assert_eq!(client.del("fresh").expect("del"), StatusCode::ObjectNotExist);
}

#[test]
fn dump_and_restore_across_shards() {
    let cluster = FakeCluster::cluster(2).expect("cluster");
    let client = Client::with_config(config(&cluster.endpoint(0))).expect("client");

    client.set("source", "payload").expect("set");
    let dumped = client.dump("source").expect("dump").expect("present");
    assert_eq!(client.dump("nothing").expect("dump"), None);

    assert_eq!(
        client.restore("copy", Duration::ZERO, &dumped).expect("restore"),
        StatusCode::Success
    );
    assert_eq!(
        client.restore("copy", Duration::ZERO, &dumped).expect("restore"),
        StatusCode::ObjectExists
    );
    assert_eq!(client.get("copy").expect("get"), Some(b"payload".to_vec()));
}

#[test]
fn server_utilities() {
    let cluster = FakeCluster::cluster(2).expect("cluster");
    let client = Client::with_config(config(&cluster.endpoint(0))).expect("client");

    assert_eq!(client.ping(None).expect("ping"), b"PONG".to_vec());
    assert_eq!(client.ping(Some(&b"echo"[..])).expect("ping"), b"echo".to_vec());
    let info = String::from_utf8(client.info().expect("info")).expect("utf8");
    assert!(info.contains("cluster_enabled:1"));
    assert!(client.time().expect("time") > Duration::from_secs(1_600_000_000));

    assert!(client.in_same_node("{user:1}:name", "{user:1}:email"));
}

#[test]
fn concurrent_callers_share_the_client() {
    init_tracing();
    let cluster = FakeCluster::cluster(3).expect("cluster");
    let client = Arc::new(Client::with_config(config(&cluster.endpoint(0))).expect("client"));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let client = client.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("w{worker}:k{i}");
                    client.set(&key, &key).expect("set");
                    assert_eq!(client.get(&key).expect("get"), Some(key.into_bytes()));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    let metrics = client.metrics();
    assert_eq!(metrics.requests_total, 8 * 50 * 2);
    assert_eq!(metrics.errors_total, 0);
}

#[test]
fn unreachable_seed_fails_initialization() {
    let server = FakeCluster::standalone().expect("server");
    let seed = server.endpoint(0);
    server.stop_node(0);

    let err = Client::with_config(config(&seed)).unwrap_err();
    assert_eq!(err.status(), StatusCode::RequestError);
}
