mod common;

use std::time::{Duration, Instant};

use serde_json::json;
use shardgate::{
    ConnectionState, Event, GatewayClient, GatewayError, Shard, ShardCoordinator, Snowflake,
};
use tokio::time::timeout;

use common::{config, init_log, is_dispatch, ready_payload, MockGateway, Recorder};

async fn within<F: std::future::Future>(f: F) -> F::Output {
    timeout(Duration::from_secs(15), f)
        .await
        .expect("did not finish in time")
}

fn disconnect_of(event: &Event) -> (&GatewayError, bool) {
    match event {
        Event::Disconnected {
            error, will_retry, ..
        } => (&**error, *will_retry),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_ready_waits_for_unavailable_guild() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let mut config = config(gateway.url());
    config.ready_quiet_period_ms = 10_000;
    let shard = Shard::new(config).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(41_250).await;

    let identify = conn.expect(2).await;
    assert_eq!(identify["d"]["token"], "test-token");
    assert_eq!(identify["d"]["shard"], json!([0, 1]));
    assert!(identify["d"].get("session_id").is_none());

    conn.dispatch(
        1,
        "READY",
        ready_payload(
            "session-1",
            gateway.url(),
            json!([
                { "id": "100", "unavailable": true },
                { "id": "200", "name": "second" },
            ]),
        ),
    )
    .await;

    let before_ready = events
        .collect_until(|seen| seen.last().map_or(false, |e| is_dispatch(e, "READY")))
        .await;
    let announced: Vec<_> = before_ready
        .iter()
        .filter(|e| matches!(***e, Event::GuildAvailable { .. }))
        .filter_map(|e| e.guild().map(|g| g.id))
        .collect();
    assert_eq!(announced, vec![Snowflake(200)]);

    assert_eq!(shard.session().session_id.as_deref(), Some("session-1"));
    let cache = shard.cache();
    assert!(!cache.guild(Snowflake(100)).unwrap().is_available());
    assert!(cache.guild(Snowflake(200)).unwrap().is_available());

    assert!(!shard.is_ready());
    assert!(timeout(Duration::from_millis(300), shard.wait_ready())
        .await
        .is_err());

    conn.dispatch(
        2,
        "GUILD_CREATE",
        json!({
            "id": "100",
            "name": "first",
            "channels": [{ "id": "101", "type": 0, "name": "general" }],
            "members": [{ "user": { "id": "2000", "username": "member" } }],
        }),
    )
    .await;

    let after = events
        .collect_until(|seen| {
            seen.iter().any(|e| matches!(**e, Event::Ready { .. }))
                && seen
                    .iter()
                    .any(|e| matches!(**e, Event::GuildAvailable { .. }))
        })
        .await;
    let available = after
        .iter()
        .find(|e| matches!(***e, Event::GuildAvailable { .. }))
        .unwrap();
    assert_eq!(available.guild().map(|g| g.id), Some(Snowflake(100)));

    within(shard.wait_ready()).await.unwrap();

    assert_eq!(shard.state(), ConnectionState::Connected);
    assert_eq!(shard.session().last_sequence, 2);

    let cache = shard.cache();
    assert!(cache.guild(Snowflake(100)).unwrap().is_available());
    assert_eq!(
        cache.channel(Snowflake(101)).unwrap().guild_id,
        Some(Snowflake(100))
    );
    assert!(cache.user(Snowflake(1000)).is_some());
    assert!(GatewayClient::user(&shard, Snowflake(2000)).is_some());

    shard.stop().await;
    assert_eq!(shard.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unknown_channel_and_member_events_are_dropped() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let mut config = config(gateway.url());
    config.message_cache_size = 10;
    let shard = Shard::new(config).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.dispatch(
        1,
        "READY",
        ready_payload(
            "session-1",
            gateway.url(),
            json!([{
                "id": "100",
                "name": "home",
                "channels": [{ "id": "101", "type": 0, "name": "general" }],
            }]),
        ),
    )
    .await;
    within(shard.wait_ready()).await.unwrap();

    conn.dispatch(
        2,
        "CHANNEL_CREATE",
        json!({ "id": "555", "type": 0, "guild_id": "999", "name": "orphan" }),
    )
    .await;
    conn.dispatch(
        3,
        "MESSAGE_CREATE",
        json!({ "id": "1", "channel_id": "777", "content": "lost" }),
    )
    .await;
    conn.dispatch(
        4,
        "MESSAGE_CREATE",
        json!({ "id": "2", "channel_id": "101", "guild_id": "100", "content": "kept" }),
    )
    .await;
    conn.dispatch(
        5,
        "GUILD_MEMBER_ADD",
        json!({ "guild_id": "999", "user": { "id": "3000", "username": "stranger" } }),
    )
    .await;
    conn.dispatch(6, "CHANNEL_DELETE", json!({ "id": "888", "type": 0 }))
        .await;
    conn.dispatch(7, "MESSAGE_DELETE", json!({ "id": "2", "channel_id": "777" }))
        .await;
    conn.dispatch(8, "TYPING_START", json!({ "channel_id": "101" }))
        .await;

    events
        .collect_until(|seen| seen.last().map_or(false, |e| is_dispatch(e, "TYPING_START")))
        .await;

    let cache = shard.cache();
    assert!(cache.guild(Snowflake(999)).is_none());
    assert!(cache.channel(Snowflake(555)).is_none());
    assert!(cache.messages(Snowflake(777)).is_empty());
    assert!(cache.user(Snowflake(3000)).is_none());

    let kept = cache.messages(Snowflake(101));
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].content, "kept");

    assert_eq!(shard.session().last_sequence, 8);
    assert_eq!(shard.state(), ConnectionState::Connected);

    shard.stop().await;
}

#[tokio::test]
async fn test_unknown_guild_events_are_dropped() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.dispatch(
        1,
        "READY",
        ready_payload(
            "session-1",
            gateway.url(),
            json!([{ "id": "100", "name": "home" }]),
        ),
    )
    .await;
    within(shard.wait_ready()).await.unwrap();

    conn.dispatch(2, "GUILD_UPDATE", json!({ "id": "999", "name": "ghost" }))
        .await;
    conn.dispatch(3, "GUILD_DELETE", json!({ "id": "999", "unavailable": true }))
        .await;
    conn.dispatch(4, "GUILD_DELETE", json!({ "id": "998" })).await;
    conn.dispatch(5, "GUILD_UPDATE", json!({ "id": "100", "name": "renamed" }))
        .await;
    conn.dispatch(6, "TYPING_START", json!({ "channel_id": "101" }))
        .await;

    let seen = events
        .collect_until(|seen| seen.last().map_or(false, |e| is_dispatch(e, "TYPING_START")))
        .await;
    assert!(!seen.iter().any(|e| matches!(
        **e,
        Event::GuildUnavailable { .. } | Event::LeftGuild { .. }
    )));

    let cache = shard.cache();
    assert!(cache.guild(Snowflake(999)).is_none());
    assert!(cache.guild(Snowflake(998)).is_none());
    assert_eq!(cache.guild_count(), 1);
    assert_eq!(
        cache.guild(Snowflake(100)).unwrap().name.as_deref(),
        Some("renamed")
    );

    shard.stop().await;
}

#[tokio::test]
async fn test_invalid_session_identifies_once() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.dispatch(1, "READY", ready_payload("session-1", gateway.url(), json!([])))
        .await;
    within(shard.wait_ready()).await.unwrap();
    assert_eq!(shard.identify_lock().acquisitions(), 1);

    conn.send(json!({ "op": 9, "d": true })).await;

    let identify = conn.expect(2).await;
    assert!(identify["d"].get("session_id").is_none());
    assert_eq!(identify["d"]["token"], "test-token");
    assert_eq!(shard.session().session_id, None);
    assert_eq!(shard.session().last_sequence, 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(shard.identify_lock().acquisitions(), 2);
    assert_eq!(shard.state(), ConnectionState::Connected);

    conn.dispatch(1, "READY", ready_payload("session-2", gateway.url(), json!([])))
        .await;
    within(async {
        while shard.session().session_id.as_deref() != Some("session-2") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    within(shard.wait_ready()).await.unwrap();

    shard.stop().await;
}

#[tokio::test]
async fn test_fatal_close_stops_retrying() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.close(4004, "Authentication failed.").await;

    let disconnected = events
        .wait_for(|e| matches!(e, Event::Disconnected { .. }))
        .await;
    let (error, will_retry) = disconnect_of(&disconnected);
    assert!(!will_retry);
    assert_eq!(error.close_code(), Some(4004));
    assert!(error.is_fatal());

    let waited = within(shard.wait_ready()).await.unwrap_err();
    assert_eq!(waited.close_code(), Some(4004));

    assert!(gateway.try_accept(Duration::from_secs(3)).await.is_none());
    assert_eq!(shard.state(), ConnectionState::Disconnected);

    shard.stop().await;
}

#[tokio::test]
async fn test_close_before_ready_retries() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.close(4000, "Unknown error.").await;

    let disconnected = events
        .wait_for(|e| matches!(e, Event::Disconnected { .. }))
        .await;
    let (error, will_retry) = disconnect_of(&disconnected);
    assert!(will_retry);
    assert_eq!(error.close_code(), Some(4000));

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    let identify = conn.expect(2).await;
    assert!(identify["d"].get("session_id").is_none());

    conn.dispatch(1, "READY", ready_payload("session-1", gateway.url(), json!([])))
        .await;
    within(shard.wait_ready()).await.unwrap();

    shard.stop().await;
}

#[tokio::test]
async fn test_dropped_socket_before_ready_retries() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    drop(conn);

    let disconnected = events
        .wait_for(|e| matches!(e, Event::Disconnected { .. }))
        .await;
    let (error, will_retry) = disconnect_of(&disconnected);
    assert!(will_retry);
    assert!(!error.is_fatal());

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;

    shard.stop().await;
    assert_eq!(shard.state(), ConnectionState::Disconnected);
    assert!(within(shard.wait_ready()).await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_stop_while_backing_off_fails_wait_ready() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.close(4000, "Unknown error.").await;

    events
        .wait_for(|e| matches!(e, Event::Disconnected { will_retry: true, .. }))
        .await;

    let waiting = tokio::spawn({
        let shard = shard.clone();
        async move { shard.wait_ready().await }
    });

    shard.stop().await;

    let error = within(waiting).await.unwrap().unwrap_err();
    assert!(error.is_cancelled());
    assert!(gateway.try_accept(Duration::from_secs(2)).await.is_none());
}

#[tokio::test]
async fn test_reconnect_request_resumes() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.dispatch(
        1,
        "READY",
        ready_payload("session-1", gateway.url(), json!([])),
    )
    .await;
    conn.dispatch(
        2,
        "GUILD_CREATE",
        json!({ "id": "300", "name": "joined later" }),
    )
    .await;
    events
        .wait_for(|e| matches!(e, Event::JoinedGuild { .. }))
        .await;

    conn.send(json!({ "op": 7, "d": null })).await;

    let disconnected = events
        .wait_for(|e| matches!(e, Event::Disconnected { .. }))
        .await;
    let (error, will_retry) = disconnect_of(&disconnected);
    assert!(will_retry);
    assert!(matches!(error, GatewayError::ReconnectRequested));

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;

    let resume = conn.expect(6).await;
    assert_eq!(resume["d"]["token"], "test-token");
    assert_eq!(resume["d"]["session_id"], "session-1");
    assert_eq!(resume["d"]["seq"], 2);

    conn.dispatch(3, "RESUMED", json!({})).await;

    let available = events
        .wait_for(|e| matches!(e, Event::GuildAvailable { .. }))
        .await;
    assert_eq!(available.guild().map(|g| g.id), Some(Snowflake(300)));

    within(shard.wait_ready()).await.unwrap();
    assert_eq!(shard.session().last_sequence, 3);
    assert_eq!(shard.identify_lock().acquisitions(), 1);

    shard.stop().await;
}

#[tokio::test]
async fn test_missed_heartbeat_reconnects() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let shard = Shard::new(config(gateway.url())).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(200).await;
    conn.expect(2).await;
    conn.dispatch(1, "READY", ready_payload("session-1", gateway.url(), json!([])))
        .await;
    let silent_since = Instant::now();

    let disconnected = events
        .wait_for(|e| matches!(e, Event::Disconnected { .. }))
        .await;
    let (error, will_retry) = disconnect_of(&disconnected);
    assert!(will_retry);
    assert!(matches!(error, GatewayError::HeartbeatMissed), "{:?}", error);
    assert!(
        silent_since.elapsed() < Duration::from_millis(1500),
        "stall grace applied outside warm up: {:?}",
        silent_since.elapsed()
    );

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    let resume = conn.expect(6).await;
    assert_eq!(resume["d"]["session_id"], "session-1");

    shard.stop().await;
}

#[tokio::test]
async fn test_late_heartbeat_ack_tolerated_during_warmup() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let mut config = config(gateway.url());
    config.ready_quiet_period_ms = 10_000;
    config.heartbeat_stall_grace_ms = 1_500;
    let shard = Shard::new(config).unwrap();
    let (recorder, mut events) = Recorder::new();
    shard.subscribe(recorder).await;

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(200).await;
    conn.expect(2).await;
    conn.dispatch(
        1,
        "READY",
        ready_payload(
            "session-1",
            gateway.url(),
            json!([{ "id": "100", "unavailable": true }]),
        ),
    )
    .await;
    let silent_since = Instant::now();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(shard.state(), ConnectionState::Connected);
    assert!(!shard.is_ready());

    let disconnected = events
        .wait_for(|e| matches!(e, Event::Disconnected { .. }))
        .await;
    let (error, will_retry) = disconnect_of(&disconnected);
    assert!(will_retry);
    assert!(matches!(error, GatewayError::HeartbeatMissed), "{:?}", error);
    assert!(
        silent_since.elapsed() >= Duration::from_millis(1600),
        "late ack not tolerated during warm up: {:?}",
        silent_since.elapsed()
    );

    shard.stop().await;
}

#[tokio::test]
async fn test_compressed_transport() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let mut config = config(gateway.url());
    config.compress = true;
    let shard = Shard::new(config).unwrap();

    shard.start().await.unwrap();

    let mut conn = gateway.accept().await;
    assert!(conn.uri.contains("compress=zlib-stream"));
    assert!(conn.uri.contains("v=10"));
    assert!(conn.uri.contains("encoding=json"));

    conn.compress();
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.dispatch(1, "READY", ready_payload("session-1", gateway.url(), json!([])))
        .await;

    within(shard.wait_ready()).await.unwrap();
    assert_eq!(shard.session().session_id.as_deref(), Some("session-1"));

    shard.stop().await;
}

#[tokio::test]
async fn test_shards_identify_with_cushion() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let mut config = config(gateway.url());
    config.total_shards = Some(2);
    config.identify_cushion_ms = 1_000;

    let coordinator = ShardCoordinator::new(config).await.unwrap();
    coordinator.start().await.unwrap();

    let mut identified = Vec::new();
    for _ in 0..2 {
        let mut conn = gateway.accept().await;
        identified.push(tokio::spawn(async move {
            conn.hello(45_000).await;
            let identify = conn.expect(2).await;
            let at = Instant::now();
            let shard = identify["d"]["shard"][0].as_u64().unwrap();
            conn.dispatch(
                1,
                "READY",
                ready_payload(&format!("session-{}", shard), "ws://unused", json!([])),
            )
            .await;
            (shard, at, conn)
        }));
    }

    let mut results = Vec::new();
    for handle in identified {
        results.push(handle.await.unwrap());
    }
    results.sort_by_key(|(_, at, _)| *at);

    let gap = results[1].1 - results[0].1;
    assert!(gap >= Duration::from_millis(900), "identify gap {:?}", gap);
    assert_ne!(results[0].0, results[1].0);

    within(coordinator.wait_ready()).await.unwrap();
    assert_eq!(coordinator.identify_lock().acquisitions(), 2);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_coordinator_wait_ready_fails_when_a_shard_stops() {
    init_log();
    let mut gateway = MockGateway::start().await;
    let mut config = config(gateway.url());
    config.total_shards = Some(2);

    let coordinator = ShardCoordinator::new(config).await.unwrap();
    coordinator.start().await.unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    conn.expect(2).await;
    conn.close(4014, "Disallowed intent(s).").await;

    let error = within(coordinator.wait_ready()).await.unwrap_err();
    assert_eq!(error.close_code(), Some(4014));

    coordinator.stop().await;
}
