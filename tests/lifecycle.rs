// Land lifecycle: realm shutdown and destroy-when-empty.

mod support;

use land_server::domain::ids::{ClientId, LandId, PlayerId, SessionId};
use land_server::interface_adapters::codec::{TransportCodec, WireEncoding};
use land_server::interface_adapters::connection::Connection;
use land_server::use_cases::keeper::{KeeperError, KeeperSettings};
use land_server::use_cases::{
    AdapterSettings, LandConfig, LandManager, LandServices, PlayerSession,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeConnection, client, connect, harness, join_frame, session, test_definition};

#[tokio::test]
async fn when_the_realm_shuts_down_then_lands_die_and_sessions_close() {
    let h = harness(true, WireEncoding::JsonArray).await;
    let sess = session("sess-1");
    let (conn, mut frames) = connect(&h.router, &sess, &client("client-1")).await;
    h.router
        .on_message(
            &sess,
            join_frame("r1", "basic-test", None, Some("player-1"), None),
        )
        .await;
    let response = frames.next_json().await;
    let land_id =
        LandId::parse(response[4].as_str().expect("expected land id")).expect("expected land id");
    let container = h
        .server
        .manager()
        .get_land(&land_id)
        .await
        .expect("expected the land");

    h.realm.shutdown().await;

    assert_eq!(h.server.manager().land_count().await, 0);
    assert!(conn.is_closed(), "shutdown should close every session");
    assert!(matches!(
        container.keeper.player_count().await,
        Err(KeeperError::Destroyed)
    ));
    // The realm forgets its servers; the land type is gone.
    assert!(h.realm.server_for("basic-test").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn when_a_land_sits_empty_past_the_interval_then_it_destroys_itself() {
    let manager = LandManager::new();
    let land_id = LandId::new("basic-test", "i-1");
    let container = manager
        .get_or_create_land(
            land_id.clone(),
            Arc::new(test_definition()),
            support::TestLand::default(),
            Arc::new(LandServices::new()),
            &LandConfig {
                codec: Arc::new(TransportCodec::new(WireEncoding::JsonArray)),
                path_hasher: None,
                keeper: KeeperSettings {
                    destroy_when_empty: Some(Duration::from_millis(200)),
                    ..Default::default()
                },
                adapter: AdapterSettings::default(),
            },
        )
        .await;

    let (conn, _frames) = FakeConnection::pair();
    let sess = SessionId::new("s1");
    container
        .adapter
        .perform_join(
            PlayerSession {
                player_id: PlayerId::new("p1"),
                device_id: "dev".to_string(),
                metadata: BTreeMap::new(),
            },
            ClientId::new("c1"),
            sess.clone(),
            None,
            conn as Arc<dyn Connection>,
        )
        .await
        .expect("expected join");

    // Occupied lands do not idle out.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(manager.land_count().await, 1);

    container.adapter.on_disconnect(&sess).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(manager.land_count().await, 0, "empty land should be gone");
    assert!(matches!(
        container.keeper.player_count().await,
        Err(KeeperError::Destroyed)
    ));

    // Recreation starts from the caller's fresh state.
    let fresh = manager
        .get_or_create_land(
            land_id,
            Arc::new(test_definition()),
            support::TestLand {
                counter: 41,
                ..Default::default()
            },
            Arc::new(LandServices::new()),
            &LandConfig {
                codec: Arc::new(TransportCodec::new(WireEncoding::JsonArray)),
                path_hasher: None,
                keeper: KeeperSettings::default(),
                adapter: AdapterSettings::default(),
            },
        )
        .await;
    let state = fresh.keeper.current_state().await.expect("expected state");
    assert_eq!(state.counter, 41);
    assert!(state.log.is_empty(), "no carryover from the destroyed land");
}
