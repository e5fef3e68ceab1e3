// Shared harness for the end-to-end tests: an in-process realm + router
// with a "basic-test" land type and channel-backed fake connections.
// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use async_trait::async_trait;
use land_server::domain::ids::{ClientId, PlayerId, SessionId};
use land_server::domain::state::LandState;
use land_server::domain::value::{SnapshotValue, ValueMap};
use land_server::interface_adapters::codec::{TransportCodec, WireEncoding};
use land_server::interface_adapters::connection::{Connection, ConnectionError, WireFrame};
use land_server::use_cases::keeper::KeeperSettings;
use land_server::use_cases::{
    AdapterSettings, JoinDecision, LandConfig, LandDefinition, LandRealm, LandRouter,
    LandServices, ManagedLandServer, RouterConfig, RuleError,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Land state used across the suite: one broadcast counter, a per-player
/// note slice, and an unprojected rule log for ordering assertions.
#[derive(Debug, Clone, Default)]
pub struct TestLand {
    pub counter: i64,
    pub notes: BTreeMap<String, String>,
    pub log: Vec<String>,
}

impl LandState for TestLand {
    fn project_broadcast(&self) -> ValueMap {
        ValueMap::from([("counter".to_string(), SnapshotValue::Int(self.counter))])
    }

    fn project_player(&self, player: &PlayerId) -> ValueMap {
        let note = self
            .notes
            .get(player.as_str())
            .map(|text| SnapshotValue::from(text.as_str()))
            .unwrap_or(SnapshotValue::Null);
        ValueMap::from([("note".to_string(), note)])
    }
}

pub fn test_definition() -> LandDefinition<TestLand> {
    LandDefinition::<TestLand>::new("basic-test")
        .with_can_join(|_state, session, _ctx| {
            if session.player_id.as_str() == "banned" {
                JoinDecision::Deny("banned_player".to_string())
            } else {
                JoinDecision::Allow(session.player_id.clone())
            }
        })
        .with_on_join(|state, ctx| {
            state.counter += 1;
            state.log.push(format!("join:{}", ctx.player_id));
            Ok(())
        })
        .with_on_leave(|state, ctx| {
            state.counter -= 1;
            state.notes.remove(ctx.player_id.as_str());
            state.log.push(format!("leave:{}", ctx.player_id));
            Ok(())
        })
        .with_action("counter.add", |state, payload, _ctx| {
            let amount = payload
                .get("amount")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| RuleError::new("amount_required"))?;
            state.counter += amount;
            Ok(json!({"counter": state.counter}))
        })
        .with_action("always.fails", |_state, _payload, _ctx| {
            Err(RuleError::new("nope"))
        })
        .with_event("note.set", |state, payload, ctx| {
            let text = payload
                .get("text")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            state
                .notes
                .insert(ctx.player_id.to_string(), text.to_string());
            Ok(())
        })
}

pub struct Harness {
    pub realm: Arc<LandRealm>,
    pub router: Arc<LandRouter>,
    pub server: Arc<ManagedLandServer<TestLand>>,
}

pub async fn harness(allow_auto_create: bool, encoding: WireEncoding) -> Harness {
    let codec = Arc::new(TransportCodec::new(encoding));
    let server = Arc::new(ManagedLandServer::new(
        test_definition(),
        TestLand::default,
        LandServices::new(),
        LandConfig {
            codec,
            path_hasher: None,
            keeper: KeeperSettings::default(),
            adapter: AdapterSettings::default(),
        },
    ));
    let realm = Arc::new(LandRealm::new());
    realm
        .register(server.clone() as Arc<dyn land_server::use_cases::LandServer>)
        .await
        .expect("expected land type to register");
    let router = Arc::new(LandRouter::new(
        Arc::clone(&realm),
        RouterConfig {
            allow_auto_create_on_join: allow_auto_create,
        },
    ));
    Harness {
        realm,
        router,
        server,
    }
}

/// Channel-backed fake socket with an optional artificial send delay.
pub struct FakeConnection {
    tx: mpsc::UnboundedSender<WireFrame>,
    closed: AtomicBool,
    delay_millis: AtomicU64,
}

impl FakeConnection {
    pub fn pair() -> (Arc<Self>, FrameStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                closed: AtomicBool::new(false),
                delay_millis: AtomicU64::new(0),
            }),
            FrameStream { rx },
        )
    }

    pub fn set_send_delay(&self, delay: Duration) {
        self.delay_millis
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&self, frame: WireFrame) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let delay = self.delay_millis.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.tx.send(frame).map_err(|_| ConnectionError::Closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Receiver half of a fake connection.
pub struct FrameStream {
    rx: mpsc::UnboundedReceiver<WireFrame>,
}

impl FrameStream {
    /// Next frame parsed as JSON; panics if nothing arrives in time.
    pub async fn next_json(&mut self) -> serde_json::Value {
        let frame = timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("expected a frame before the deadline")
            .expect("expected the connection to stay open");
        match frame {
            WireFrame::Text(text) => {
                serde_json::from_str(&text).expect("expected valid json frame")
            }
            WireFrame::Binary(bytes) => {
                rmp_serde::from_slice(&bytes).expect("expected valid msgpack frame")
            }
        }
    }

    /// Asserts quiescence: nothing further arrives within the window.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(frame)) = timeout(window, self.rx.recv()).await {
            panic!("expected no further frames, got {frame:?}");
        }
    }

    /// Drains everything currently queued without waiting.
    pub fn drain_now(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Waits for in-flight work to settle, then drains the queue.
    pub async fn drain_after(&mut self, window: Duration) -> Vec<WireFrame> {
        tokio::time::sleep(window).await;
        self.drain_now()
    }
}

pub fn session(id: &str) -> SessionId {
    SessionId::new(id)
}

pub fn client(id: &str) -> ClientId {
    ClientId::new(id)
}

/// A join request in the opcode-JSON-array handshake form.
pub fn join_frame(
    request_id: &str,
    land_type: &str,
    instance: Option<&str>,
    player: Option<&str>,
    device: Option<&str>,
) -> WireFrame {
    WireFrame::Text(
        json!([104, request_id, land_type, instance, player, device, null]).to_string(),
    )
}

/// Registers a fake connection with the router in handshake phase.
pub async fn connect(router: &LandRouter, session_id: &SessionId, client_id: &ClientId) -> (Arc<FakeConnection>, FrameStream) {
    let (conn, frames) = FakeConnection::pair();
    router
        .on_connect(
            session_id.clone(),
            client_id.clone(),
            None,
            conn.clone() as Arc<dyn Connection>,
        )
        .await;
    (conn, frames)
}
