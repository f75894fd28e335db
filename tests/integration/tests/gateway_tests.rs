//! Gateway Integration Tests
//!
//! Shards connect to a local WebSocket server over real sockets.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use chat_core::Snowflake;
use chat_gateway::protocol::{PresenceStatus, PresenceUpdatePayload};
use chat_gateway::{
    ConnectionStatus, GatewayError, GatewayEventType, GatewayMessage, OpCode, ShardEvent,
};
use integration_tests::{
    gateway_config, guild_for_shard, manager, session_for_shard, wait_for, FakeGateway,
    TEST_TOKEN,
};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_shard_reaches_ready() {
    let mut gateway = FakeGateway::start(1000).await.unwrap();
    let (manager, mut events) = manager(gateway_config(&gateway.url()));

    manager.spawn(1, None).await.unwrap();

    let identify = gateway.expect(OpCode::Identify).await.unwrap();
    let payload = identify.message.as_identify().unwrap();
    assert_eq!(payload.token, TEST_TOKEN);
    assert_eq!(payload.shard, Some([0, 1]));

    let ready = wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();
    match ready {
        ShardEvent::Ready {
            shard_id,
            session_id,
            guilds,
        } => {
            assert_eq!(shard_id, 0);
            assert_eq!(session_id, session_for_shard(0));
            assert_eq!(guilds, vec![Snowflake::new(guild_for_shard(0))]);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let connection = manager.get(0).unwrap();
    assert_eq!(connection.status(), ConnectionStatus::Ready);
    assert_eq!(connection.session_id().as_deref(), Some("session-0"));
    assert!(connection.owns_guild(Snowflake::new(guild_for_shard(0))));

    manager.destroy().await;
}

#[tokio::test]
async fn test_heartbeats_are_acknowledged() {
    let mut gateway = FakeGateway::start(100).await.unwrap();
    let (manager, mut events) = manager(gateway_config(&gateway.url()));

    manager.spawn(1, None).await.unwrap();
    wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    let heartbeat = gateway.expect(OpCode::Heartbeat).await.unwrap();
    assert!(heartbeat.message.as_heartbeat_seq().is_some());

    let connection = manager.get(0).unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while connection.latency().is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("latency never recorded");

    assert!(manager.stats().average_latency.is_some());
    manager.destroy().await;
}

// ============================================================================
// Reconnect Tests
// ============================================================================

#[tokio::test]
async fn test_resume_after_resumable_close() {
    let mut gateway = FakeGateway::start(1000).await.unwrap();
    let (manager, mut events) = manager(gateway_config(&gateway.url()));

    manager.spawn(1, None).await.unwrap();
    wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    gateway.close_all(4000);

    let reconnecting = wait_for(&mut events, |e| matches!(e, ShardEvent::Reconnecting { .. }))
        .await
        .unwrap();
    assert!(matches!(reconnecting, ShardEvent::Reconnecting { attempt: 1, .. }));

    let resume = gateway.expect(OpCode::Resume).await.unwrap();
    assert_eq!(resume.connection, 1);
    let payload = resume.message.as_resume().unwrap();
    assert_eq!(payload.session_id, session_for_shard(0));
    assert_eq!(payload.seq, 1);
    assert_eq!(payload.token, TEST_TOKEN);

    wait_for(&mut events, |e| matches!(e, ShardEvent::Resumed { .. }))
        .await
        .unwrap();
    assert_eq!(manager.get(0).unwrap().status(), ConnectionStatus::Ready);
    assert_eq!(gateway.connection_count(), 2);

    manager.destroy().await;
}

#[tokio::test]
async fn test_session_invalidating_close_identifies_again() {
    let mut gateway = FakeGateway::start(1000).await.unwrap();
    let (manager, mut events) = manager(gateway_config(&gateway.url()));

    manager.spawn(1, None).await.unwrap();
    gateway.expect(OpCode::Identify).await.unwrap();
    wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    gateway.close_all(4009);

    let identify = gateway.expect(OpCode::Identify).await.unwrap();
    assert_eq!(identify.connection, 1);
    wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    manager.destroy().await;
}

#[tokio::test]
async fn test_fatal_close_destroys_shard() {
    let gateway = FakeGateway::start(1000).await.unwrap();
    let (manager, mut events) = manager(gateway_config(&gateway.url()));

    manager.spawn(1, None).await.unwrap();
    wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    gateway.close_all(4004);

    let error = wait_for(&mut events, |e| matches!(e, ShardEvent::Error { .. }))
        .await
        .unwrap();
    match error {
        ShardEvent::Error {
            error: GatewayError::FatalClose(code),
            ..
        } => assert_eq!(code.as_u16(), 4004),
        other => panic!("unexpected event: {other:?}"),
    }
    wait_for(&mut events, |e| {
        matches!(e, ShardEvent::Destroyed { requested: false, .. })
    })
    .await
    .unwrap();

    assert_eq!(manager.get(0).unwrap().status(), ConnectionStatus::Destroyed);
    assert_eq!(gateway.connection_count(), 1);

    manager.destroy().await;
}

// ============================================================================
// Manager Tests
// ============================================================================

#[tokio::test]
async fn test_shards_identify_spawn_delay_apart() {
    let mut gateway = FakeGateway::start(1000).await.unwrap();
    let config = gateway_config(&gateway.url());
    let spawn_delay = config.spawn_delay;
    let (manager, mut events) = manager(config);

    manager.spawn(2, None).await.unwrap();

    let first = gateway.expect(OpCode::Identify).await.unwrap();
    let second = gateway.expect(OpCode::Identify).await.unwrap();
    assert_eq!(first.message.as_identify().unwrap().shard, Some([0, 2]));
    assert_eq!(second.message.as_identify().unwrap().shard, Some([1, 2]));

    // Socket setup time for the first shard can eat into the gap
    let gap = second.at.duration_since(first.at);
    assert!(gap >= spawn_delay - Duration::from_millis(50), "gap was {gap:?}");

    for _ in 0..2 {
        wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
            .await
            .unwrap();
    }

    let stats = manager.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.ready, 2);
    assert_eq!(stats.guilds, 2);
    assert_eq!(manager.shard_ids(), vec![0, 1]);

    manager.destroy().await;
}

#[tokio::test]
async fn test_dispatch_is_forwarded() {
    let gateway = FakeGateway::start(1000).await.unwrap();
    let (manager, mut events) = manager(gateway_config(&gateway.url()));

    manager.spawn(1, None).await.unwrap();
    wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    gateway.dispatch(
        "MESSAGE_CREATE",
        json!({"id": "5", "channel_id": "7", "content": "hi"}),
    );

    let event = wait_for(&mut events, |e| {
        matches!(e, ShardEvent::Dispatch(dispatch) if dispatch.name == "MESSAGE_CREATE")
    })
    .await
    .unwrap();
    let ShardEvent::Dispatch(dispatch) = event else {
        unreachable!()
    };
    assert_eq!(dispatch.shard_id, 0);
    assert_eq!(dispatch.sequence, 2);
    assert_eq!(dispatch.kind, Some(GatewayEventType::MessageCreate));
    assert_eq!(dispatch.data["content"], "hi");
    assert_eq!(manager.get(0).unwrap().sequence(), Some(2));

    manager.destroy().await;
}

#[tokio::test]
async fn test_routed_send_reaches_owning_shard() {
    let mut gateway = FakeGateway::start(1000).await.unwrap();
    let mut config = gateway_config(&gateway.url());
    config.spawn_delay = Duration::from_millis(50);
    let (manager, mut events) = manager(config);

    manager.spawn(2, None).await.unwrap();
    for _ in 0..2 {
        wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
            .await
            .unwrap();
    }

    // (id >> 22) % 2 == 1
    let guild = Snowflake::new(1 << 22);
    assert_eq!(manager.shard_for(guild), 1);

    let presence = GatewayMessage::presence_update(&PresenceUpdatePayload::new(
        PresenceStatus::Idle,
    ))
    .unwrap();
    manager.route_message(guild, presence).unwrap();

    // Shards are accepted in spawn order
    let received = gateway.expect(OpCode::PresenceUpdate).await.unwrap();
    assert_eq!(received.connection, 1);
    assert_eq!(received.message.d["status"], "idle");

    assert!(matches!(
        manager.send_to(5, GatewayMessage::heartbeat(None)),
        Err(GatewayError::InvalidShard { shard_id: 5, .. })
    ));

    manager.destroy().await;
}

#[tokio::test]
async fn test_destroy_closes_every_shard() {
    let gateway = FakeGateway::start(1000).await.unwrap();
    let mut config = gateway_config(&gateway.url());
    config.spawn_delay = Duration::from_millis(50);
    let (manager, mut events) = manager(config);

    manager.spawn(2, None).await.unwrap();
    for _ in 0..2 {
        wait_for(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
            .await
            .unwrap();
    }
    let shards: Vec<_> = manager
        .shard_ids()
        .into_iter()
        .filter_map(|id| manager.get(id))
        .collect();

    manager.destroy().await;

    for _ in 0..2 {
        wait_for(&mut events, |e| {
            matches!(e, ShardEvent::Destroyed { requested: true, .. })
        })
        .await
        .unwrap();
    }
    assert!(shards
        .iter()
        .all(|shard| shard.status() == ConnectionStatus::Destroyed));
    assert!(manager.is_empty());
    assert!(matches!(manager.spawn(1, None).await, Err(GatewayError::Destroyed)));
}
