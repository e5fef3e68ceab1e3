mod support;

use land_server::domain::ids::LandId;
use land_server::interface_adapters::codec::WireEncoding;
use land_server::interface_adapters::connection::WireFrame;
use serde_json::json;
use std::time::Duration;
use support::{client, connect, harness, join_frame, session};

#[tokio::test]
async fn when_a_join_auto_creates_a_land_then_response_and_first_sync_arrive() {
    let h = harness(true, WireEncoding::JsonArray).await;
    let sess = session("sess-1");
    let (_conn, mut frames) = connect(&h.router, &sess, &client("client-1")).await;

    h.router
        .on_message(
            &sess,
            join_frame("r1", "basic-test", None, Some("player-1"), Some("dev-1")),
        )
        .await;

    let response = frames.next_json().await;
    assert_eq!(response[0], 105);
    assert_eq!(response[1], "r1");
    assert_eq!(response[2], 1);
    assert_eq!(response[3], "player-1");
    let land_id = response[4].as_str().expect("expected land id");
    assert!(land_id.starts_with("basic-test:"));
    assert_eq!(response[5], 0);

    // The firstSync carries every broadcast and per-player field.
    let first_sync = frames.next_json().await;
    assert_eq!(first_sync[0], 2);
    let paths: Vec<&str> = first_sync
        .as_array()
        .expect("expected array")
        .iter()
        .skip(1)
        .map(|patch| patch[0].as_str().expect("expected string path"))
        .collect();
    assert!(paths.contains(&"/counter"), "paths: {paths:?}");
    assert!(paths.contains(&"/note"), "paths: {paths:?}");

    let bound = h
        .router
        .bound_land(&sess)
        .await
        .expect("expected session to be bound");
    assert_eq!(bound.land_type(), "basic-test");
    assert_eq!(bound, LandId::parse(land_id).expect("expected parseable id"));
}

#[tokio::test]
async fn when_a_second_joiner_names_the_instance_then_both_share_the_land() {
    let h = harness(true, WireEncoding::JsonArray).await;
    let sess_1 = session("sess-1");
    let (_conn_1, mut frames_1) = connect(&h.router, &sess_1, &client("client-1")).await;
    h.router
        .on_message(
            &sess_1,
            join_frame("r1", "basic-test", None, Some("player-1"), Some("dev-1")),
        )
        .await;
    let response = frames_1.next_json().await;
    let land_id = response[4].as_str().expect("expected land id").to_string();
    let instance = land_id.split_once(':').expect("expected two parts").1;

    let sess_2 = session("sess-2");
    let (_conn_2, mut frames_2) = connect(&h.router, &sess_2, &client("client-2")).await;
    h.router
        .on_message(
            &sess_2,
            join_frame(
                "r2",
                "basic-test",
                Some(instance),
                Some("player-2"),
                Some("dev-2"),
            ),
        )
        .await;
    let response_2 = frames_2.next_json().await;
    assert_eq!(response_2[2], 1);
    assert_eq!(response_2[4].as_str(), Some(land_id.as_str()));

    assert_eq!(h.router.bound_land(&sess_1).await, h.router.bound_land(&sess_2).await);

    let container = h
        .server
        .manager()
        .get_land(&LandId::parse(&land_id).expect("expected land id"))
        .await
        .expect("expected the shared land");
    let players = container
        .keeper
        .player_sessions()
        .await
        .expect("expected players");
    assert_eq!(players.len(), 2);
}

#[tokio::test]
async fn when_a_non_join_arrives_during_handshake_then_it_is_rejected_as_json() {
    let h = harness(true, WireEncoding::JsonArray).await;
    let sess = session("sess-3");
    let (_conn, mut frames) = connect(&h.router, &sess, &client("client-3")).await;

    h.router
        .on_message(
            &sess,
            WireFrame::Text(json!([101, "r9", "counter.add", {"amount": 1}]).to_string()),
        )
        .await;

    // Handshake rejections come back in the JSON object form.
    let response = frames.next_json().await;
    assert_eq!(response["type"], "joinResponse");
    assert_eq!(response["requestId"], "r9");
    assert_eq!(response["success"], false);
    assert_eq!(response["reason"], "handshake_required");
    assert!(!h.router.is_bound(&sess).await);

    // The session is not disconnected; a proper join still works.
    h.router
        .on_message(
            &sess,
            join_frame("r10", "basic-test", None, Some("player-3"), None),
        )
        .await;
    let response = frames.next_json().await;
    assert_eq!(response[0], 105);
    assert_eq!(response[2], 1);
    assert!(h.router.is_bound(&sess).await);
}

#[tokio::test]
async fn when_a_binary_frame_arrives_during_handshake_then_it_is_rejected() {
    let h = harness(true, WireEncoding::MessagePack).await;
    let sess = session("sess-4");
    let (_conn, mut frames) = connect(&h.router, &sess, &client("client-4")).await;

    let payload = rmp_serde::to_vec(&json!([104, "r1", "basic-test", null, null, null, null]))
        .expect("expected msgpack bytes");
    h.router
        .on_message(&sess, WireFrame::Binary(payload.into()))
        .await;

    let response = frames.next_json().await;
    assert_eq!(response["success"], false);
    assert_eq!(response["reason"], "handshake_required");
    assert!(!h.router.is_bound(&sess).await);
}

#[tokio::test]
async fn when_auto_create_is_off_and_no_instance_is_given_then_nothing_is_created() {
    let h = harness(false, WireEncoding::JsonArray).await;
    let sess = session("sess-5");
    let (_conn, mut frames) = connect(&h.router, &sess, &client("client-5")).await;

    h.router
        .on_message(
            &sess,
            join_frame("r1", "basic-test", None, Some("player-5"), None),
        )
        .await;

    let response = frames.next_json().await;
    assert_eq!(response["success"], false);
    assert_eq!(response["reason"], "instance_required");
    assert!(!h.router.is_bound(&sess).await);
    assert!(h.realm.list_all_lands().await.is_empty());
}

#[tokio::test]
async fn when_auto_create_is_off_and_the_instance_is_unknown_then_join_fails() {
    let h = harness(false, WireEncoding::JsonArray).await;
    let sess = session("sess-6");
    let (_conn, mut frames) = connect(&h.router, &sess, &client("client-6")).await;

    h.router
        .on_message(
            &sess,
            join_frame("r1", "basic-test", Some("missing"), Some("player-6"), None),
        )
        .await;

    let response = frames.next_json().await;
    assert_eq!(response["reason"], "instance_not_found");
    assert!(h.realm.list_all_lands().await.is_empty());
}

#[tokio::test]
async fn when_the_land_type_is_not_registered_then_join_fails() {
    let h = harness(true, WireEncoding::JsonArray).await;
    let sess = session("sess-7");
    let (_conn, mut frames) = connect(&h.router, &sess, &client("client-7")).await;

    h.router
        .on_message(&sess, join_frame("r1", "mystery", None, None, None))
        .await;

    let response = frames.next_json().await;
    assert_eq!(response["reason"], "unknown_land_type");
}

#[tokio::test]
async fn when_the_admission_rule_denies_then_its_reason_is_surfaced() {
    let h = harness(true, WireEncoding::JsonArray).await;
    let sess = session("sess-8");
    let (_conn, mut frames) = connect(&h.router, &sess, &client("client-8")).await;

    h.router
        .on_message(
            &sess,
            join_frame("r1", "basic-test", None, Some("banned"), None),
        )
        .await;

    let response = frames.next_json().await;
    assert_eq!(response["success"], false);
    assert_eq!(response["reason"], "banned_player");
    assert!(!h.router.is_bound(&sess).await);
    frames.expect_silence(Duration::from_millis(100)).await;
}
