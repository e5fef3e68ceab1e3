// Per-land transport adapter: owns every joined session of one land,
// marshals inbound messages to the keeper, and fans state updates and
// server events back out. Bookkeeping lives behind one async mutex so
// operations serialize like an actor; the sync latch coalesces overlapping
// sync requests into at most one trailing re-run.

use crate::domain::ids::{ClientId, LandId, PlayerId, SessionId};
use crate::domain::patch::StateUpdate;
use crate::domain::state::LandState;
use crate::interface_adapters::codec::{
    ActionOutcome, CodecError, EventDirection, TransportCodec, TransportMessage,
};
use crate::interface_adapters::connection::{Connection, WireFrame};
use crate::interface_adapters::path_hash::PathHasher;
use crate::interface_adapters::update_codec::{EncoderScope, UpdateEncoder};
use crate::use_cases::definition::{AuthenticatedInfo, PlayerSession};
use crate::use_cases::keeper::{ActionError, JoinError, KeeperHandle};
use crate::use_cases::slots::SlotAllocator;
use crate::use_cases::sync::SyncEngine;
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Which sync pass to run. `Full` subsumes `BroadcastOnly`, so coalesced
/// requests keep the strongest kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    BroadcastOnly,
    Full,
}

impl SyncKind {
    fn rank(self) -> u8 {
        match self {
            SyncKind::BroadcastOnly => 1,
            SyncKind::Full => 2,
        }
    }

    fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(SyncKind::BroadcastOnly),
            2 => Some(SyncKind::Full),
            _ => None,
        }
    }
}

/// Delivery target for a server event.
#[derive(Debug, Clone)]
pub enum EventTarget {
    Player(PlayerId),
    Session(SessionId),
    Broadcast,
    BroadcastExcept(PlayerId),
}

/// Returned to the router on a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinGrant {
    pub player_id: PlayerId,
    pub player_slot: u16,
}

/// Test/diagnostic view over the adapter bookkeeping.
#[derive(Debug, Clone)]
pub struct AdapterSnapshot {
    pub session_to_player: HashMap<SessionId, PlayerId>,
    pub player_slots: HashMap<PlayerId, u16>,
    pub session_count: usize,
}

#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Fan sends out concurrently instead of one socket at a time.
    pub parallel_send: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            parallel_send: true,
        }
    }
}

struct AdapterInner {
    session_to_player: HashMap<SessionId, PlayerId>,
    player_to_sessions: HashMap<PlayerId, HashSet<SessionId>>,
    session_to_client: HashMap<SessionId, ClientId>,
    session_to_auth: HashMap<SessionId, AuthenticatedInfo>,
    player_slots: HashMap<PlayerId, u16>,
    slots: SlotAllocator,
    connections: HashMap<SessionId, Arc<dyn Connection>>,
    sync: SyncEngine,
    encoder: UpdateEncoder,
}

pub struct TransportAdapter<S: LandState> {
    land_id: LandId,
    keeper: KeeperHandle<S>,
    codec: Arc<TransportCodec>,
    settings: AdapterSettings,
    inner: Mutex<AdapterInner>,
    sync_running: AtomicBool,
    pending_sync: AtomicU8,
    last_activity: Arc<AtomicU64>,
    // Self-handle so spawned work can outlive the current borrow.
    weak: Weak<TransportAdapter<S>>,
}

impl<S: LandState> TransportAdapter<S> {
    pub fn new(
        land_id: LandId,
        keeper: KeeperHandle<S>,
        codec: Arc<TransportCodec>,
        path_hasher: Option<Arc<PathHasher>>,
        settings: AdapterSettings,
        last_activity: Arc<AtomicU64>,
    ) -> Arc<Self> {
        let encoder = UpdateEncoder::new(codec.encoding(), path_hasher);
        Arc::new_cyclic(|weak| Self {
            land_id,
            keeper,
            codec,
            settings,
            inner: Mutex::new(AdapterInner {
                session_to_player: HashMap::new(),
                player_to_sessions: HashMap::new(),
                session_to_client: HashMap::new(),
                session_to_auth: HashMap::new(),
                player_slots: HashMap::new(),
                slots: SlotAllocator::new(),
                connections: HashMap::new(),
                sync: SyncEngine::new(),
                encoder,
            }),
            sync_running: AtomicBool::new(false),
            pending_sync: AtomicU8::new(0),
            last_activity: last_activity.clone(),
            weak: weak.clone(),
        })
    }

    pub fn land_id(&self) -> &LandId {
        &self.land_id
    }

    pub fn keeper(&self) -> &KeeperHandle<S> {
        &self.keeper
    }

    pub fn codec(&self) -> &Arc<TransportCodec> {
        &self.codec
    }

    /// Admits one session. On duplicate login the keeper displaces the old
    /// session first (kick-old); the new session installs only afterwards.
    pub async fn perform_join(
        &self,
        session: PlayerSession,
        client_id: ClientId,
        session_id: SessionId,
        auth: Option<AuthenticatedInfo>,
        conn: Arc<dyn Connection>,
    ) -> Result<JoinGrant, JoinError> {
        let join = self
            .keeper
            .join(session, client_id.clone(), session_id.clone())
            .await?;
        self.touch();

        let (kicked_conn, slot) = {
            let mut inner = self.inner.lock().await;
            let player_id = join.player_id.clone();
            let kicked_conn = join
                .displaced_session
                .as_ref()
                .and_then(|old| remove_session_bookkeeping(&mut inner, old, false))
                .and_then(|removed| removed.conn);
            if kicked_conn.is_some() {
                // The replacing connection is a fresh client; its view and
                // key table must re-seed from a firstSync.
                inner.sync.clear_cache_for_disconnected_player(&player_id);
                inner
                    .encoder
                    .drop_scope(&EncoderScope::Player(player_id.clone()));
            }
            inner
                .session_to_player
                .insert(session_id.clone(), player_id.clone());
            inner
                .player_to_sessions
                .entry(player_id.clone())
                .or_default()
                .insert(session_id.clone());
            inner.session_to_client.insert(session_id.clone(), client_id);
            if let Some(auth) = auth {
                inner.session_to_auth.insert(session_id.clone(), auth);
            }
            let slot = match inner.player_slots.get(&player_id) {
                Some(slot) => *slot,
                None => {
                    let slot = inner.slots.allocate();
                    inner.player_slots.insert(player_id.clone(), slot);
                    slot
                }
            };
            inner.connections.insert(session_id.clone(), conn);
            (kicked_conn, slot)
        };

        if let Some(old_conn) = kicked_conn {
            debug!(land_id = %self.land_id, player_id = %join.player_id, "kicking older session");
            self.send_on(
                &old_conn,
                &server_event("kicked", json!({"reason": "duplicate_login"})),
            )
            .await;
            old_conn.close().await;
        }

        Ok(JoinGrant {
            player_id: join.player_id,
            player_slot: slot,
        })
    }

    /// Computes and sends the initial firstSync for a freshly joined
    /// session, then lets everyone else catch up.
    pub async fn send_first_sync(&self, session_id: &SessionId) {
        let Ok(state) = self.keeper.current_state().await else {
            return;
        };
        let frame = {
            let mut inner = self.inner.lock().await;
            let Some(player_id) = inner.session_to_player.get(session_id).cloned() else {
                return;
            };
            let update = inner.sync.generate_diff(&player_id, &state);
            let scope = EncoderScope::Player(player_id.clone());
            match inner.encoder.encode(&scope, &update) {
                Ok(frame) => {
                    if matches!(update, StateUpdate::FirstSync(_)) {
                        inner.sync.mark_first_sync_received(&player_id);
                        // A fresh listener has an empty broadcast table; force
                        // re-definitions on the next broadcast emission.
                        inner
                            .encoder
                            .reset_scope_definitions(&EncoderScope::Broadcast);
                    }
                    inner
                        .connections
                        .get(session_id)
                        .cloned()
                        .map(|conn| (conn, frame))
                }
                Err(err) => {
                    warn!(land_id = %self.land_id, error = ?err, "failed to encode firstSync");
                    None
                }
            }
        };
        if let Some((conn, frame)) = frame {
            if conn.send(frame).await.is_err() {
                self.handle_send_failure(session_id.clone());
            }
        }
        self.schedule_sync(SyncKind::Full);
    }

    /// Inbound frame from a bound session. Replies go to `conn`, which is
    /// the sender's socket even if the session was displaced meanwhile.
    pub async fn on_message(
        &self,
        session_id: &SessionId,
        frame: &WireFrame,
        conn: &Arc<dyn Connection>,
    ) {
        self.touch();
        let player_id = {
            let inner = self.inner.lock().await;
            inner.session_to_player.get(session_id).cloned()
        };
        let Some(player_id) = player_id else {
            self.send_on(conn, &error_event("not_joined")).await;
            return;
        };

        let message = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(CodecError::UnknownKind) | Err(CodecError::UnknownEventOpcode(_)) => {
                self.send_on(conn, &error_event("unknown_message")).await;
                return;
            }
            Err(err) => {
                debug!(land_id = %self.land_id, %session_id, error = ?err, "failed to decode frame");
                self.send_on(conn, &error_event("decode_error")).await;
                return;
            }
        };

        match message {
            TransportMessage::ActionRequest {
                request_id,
                type_id,
                payload,
            } => {
                let result = self
                    .keeper
                    .handle_action(type_id.clone(), payload, player_id.clone())
                    .await;
                let (outcome, changed) = match result {
                    Ok(response) => (ActionOutcome::Ok(response), true),
                    Err(err) => (ActionOutcome::Err(err.reason()), false),
                };
                let response = TransportMessage::ActionResponse {
                    request_id,
                    type_id: Some(type_id),
                    outcome,
                };
                self.send_on(conn, &response).await;
                if changed {
                    self.schedule_sync(SyncKind::Full);
                }
            }
            TransportMessage::Event {
                direction: EventDirection::FromClient,
                name,
                payload,
            } => {
                match self
                    .keeper
                    .handle_event(name.clone(), payload, player_id.clone())
                    .await
                {
                    Ok(()) => self.schedule_sync(SyncKind::Full),
                    Err(ActionError::UnknownType(_)) => {
                        self.send_on(conn, &error_event("unknown_message")).await;
                    }
                    Err(err) => {
                        // Events carry no response envelope; log and move on.
                        debug!(
                            land_id = %self.land_id,
                            player_id = %player_id,
                            event = %name,
                            error = ?err,
                            "client event failed"
                        );
                    }
                }
            }
            TransportMessage::Join(_) => {
                // Duplicate join on an already-bound session is idempotent.
                trace!(land_id = %self.land_id, %session_id, "duplicate join ignored");
            }
            TransportMessage::Event { .. }
            | TransportMessage::ActionResponse { .. }
            | TransportMessage::JoinResponse(_) => {
                self.send_on(conn, &error_event("unknown_message")).await;
            }
        }
    }

    /// Session teardown. When the last session of a player closes, the
    /// player leaves the keeper and the rest of the land gets a broadcast
    /// delta.
    pub async fn on_disconnect(&self, session_id: &SessionId) {
        let departed_player = {
            let mut inner = self.inner.lock().await;
            remove_session_bookkeeping(&mut inner, session_id, true)
        };
        let Some(player_id) = departed_player_id(departed_player) else {
            return;
        };
        if let Err(err) = self.keeper.leave(player_id.clone()).await {
            debug!(land_id = %self.land_id, player_id = %player_id, error = ?err, "leave after disconnect");
        }
        self.schedule_sync(SyncKind::BroadcastOnly);
    }

    /// Sends one server event to the chosen target. Fan-out snapshots the
    /// current sessions; nothing is buffered for absent players.
    pub async fn send_event(&self, name: &str, payload: Value, target: EventTarget) {
        let message = server_event(name, payload);
        let frame = match self.codec.encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(land_id = %self.land_id, error = ?err, "failed to encode server event");
                return;
            }
        };
        let targets: Vec<(SessionId, Arc<dyn Connection>)> = {
            let inner = self.inner.lock().await;
            match &target {
                EventTarget::Session(session_id) => inner
                    .connections
                    .get(session_id)
                    .map(|conn| vec![(session_id.clone(), conn.clone())])
                    .unwrap_or_default(),
                EventTarget::Player(player_id) => sessions_of(&inner, player_id),
                EventTarget::Broadcast => inner
                    .connections
                    .iter()
                    .map(|(id, conn)| (id.clone(), conn.clone()))
                    .collect(),
                EventTarget::BroadcastExcept(player_id) => {
                    let excluded: HashSet<SessionId> = inner
                        .player_to_sessions
                        .get(player_id)
                        .cloned()
                        .unwrap_or_default();
                    inner
                        .connections
                        .iter()
                        .filter(|(id, _)| !excluded.contains(*id))
                        .map(|(id, conn)| (id.clone(), conn.clone()))
                        .collect()
                }
            }
        };
        self.fan_out(targets, frame).await;
    }

    /// Computes and sends per-player updates to every joined player.
    pub async fn sync_now(&self) {
        self.run_sync(SyncKind::Full).await;
    }

    /// Computes and sends only the broadcast-scope delta.
    pub async fn sync_broadcast_only(&self) {
        self.run_sync(SyncKind::BroadcastOnly).await;
    }

    /// Fire-and-forget sync request from a non-async context.
    pub fn schedule_sync(&self, kind: SyncKind) {
        let Some(adapter) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            adapter.run_sync(kind).await;
        });
    }

    /// Closes every session and clears bookkeeping. Called when the land
    /// is destroyed.
    pub async fn detach(&self) {
        let connections: Vec<Arc<dyn Connection>> = {
            let mut inner = self.inner.lock().await;
            let connections = inner.connections.drain().map(|(_, conn)| conn).collect();
            inner.session_to_player.clear();
            inner.player_to_sessions.clear();
            inner.session_to_client.clear();
            inner.session_to_auth.clear();
            inner.player_slots.clear();
            connections
        };
        for conn in connections {
            conn.close().await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn bookkeeping(&self) -> AdapterSnapshot {
        let inner = self.inner.lock().await;
        AdapterSnapshot {
            session_to_player: inner.session_to_player.clone(),
            player_slots: inner.player_slots.clone(),
            session_count: inner.connections.len(),
        }
    }

    async fn run_sync(&self, kind: SyncKind) {
        if self.sync_running.swap(true, Ordering::AcqRel) {
            // A sync is in flight; leave the strongest pending request.
            self.pending_sync.fetch_max(kind.rank(), Ordering::AcqRel);
            return;
        }
        let mut kind = kind;
        loop {
            self.sync_pass(kind).await;
            let pending = self.pending_sync.swap(0, Ordering::AcqRel);
            if let Some(next) = SyncKind::from_rank(pending) {
                kind = next;
                continue;
            }
            self.sync_running.store(false, Ordering::Release);
            // A request may have slipped in while we were releasing.
            let pending = self.pending_sync.swap(0, Ordering::AcqRel);
            let Some(next) = SyncKind::from_rank(pending) else {
                break;
            };
            if self.sync_running.swap(true, Ordering::AcqRel) {
                // Someone else took the latch; hand the request back.
                self.pending_sync.fetch_max(next.rank(), Ordering::AcqRel);
                break;
            }
            kind = next;
        }
    }

    async fn sync_pass(&self, kind: SyncKind) {
        let Ok(state) = self.keeper.current_state().await else {
            return;
        };
        let outgoing = {
            let mut inner = self.inner.lock().await;
            match kind {
                SyncKind::Full => collect_full_sync(&mut inner, &state, &self.land_id),
                SyncKind::BroadcastOnly => {
                    collect_broadcast_sync(&mut inner, &state, &self.land_id)
                }
            }
        };
        self.fan_out_frames(outgoing).await;
    }

    async fn fan_out_frames(
        &self,
        outgoing: Vec<(SessionId, Arc<dyn Connection>, WireFrame)>,
    ) {
        if self.settings.parallel_send {
            let sends = outgoing.into_iter().map(|(session_id, conn, frame)| async move {
                if conn.send(frame).await.is_err() {
                    self.handle_send_failure(session_id);
                }
            });
            join_all(sends).await;
        } else {
            for (session_id, conn, frame) in outgoing {
                if conn.send(frame).await.is_err() {
                    self.handle_send_failure(session_id);
                }
            }
        }
    }

    async fn fan_out(&self, targets: Vec<(SessionId, Arc<dyn Connection>)>, frame: WireFrame) {
        let outgoing = targets
            .into_iter()
            .map(|(session_id, conn)| (session_id, conn, frame.clone()))
            .collect();
        self.fan_out_frames(outgoing).await;
    }

    async fn send_on(&self, conn: &Arc<dyn Connection>, message: &TransportMessage) {
        match self.codec.encode(message) {
            Ok(frame) => {
                if conn.send(frame).await.is_err() {
                    debug!(land_id = %self.land_id, "send failed; peer will be cleaned up");
                }
            }
            Err(err) => {
                warn!(land_id = %self.land_id, error = ?err, "failed to encode message");
            }
        }
    }

    /// A failed send means the socket is gone; mark the session
    /// disconnected and clean it up off the sync path.
    fn handle_send_failure(&self, session_id: SessionId) {
        warn!(land_id = %self.land_id, %session_id, "send failed; scheduling disconnect");
        let Some(adapter) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            adapter.on_disconnect(&session_id).await;
        });
    }

    fn touch(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        self.last_activity.store(now, Ordering::Relaxed);
    }
}

/// Outcome of removing one session: the connection that was displaced and,
/// when its player has no sessions left, the departing player.
struct RemovedSession {
    conn: Option<Arc<dyn Connection>>,
    departed_player: Option<PlayerId>,
}

fn remove_session_bookkeeping(
    inner: &mut AdapterInner,
    session_id: &SessionId,
    release_slot: bool,
) -> Option<RemovedSession> {
    let player_id = inner.session_to_player.remove(session_id)?;
    inner.session_to_client.remove(session_id);
    inner.session_to_auth.remove(session_id);
    let conn = inner.connections.remove(session_id);
    let mut departed = None;
    if let Some(sessions) = inner.player_to_sessions.get_mut(&player_id) {
        sessions.remove(session_id);
        if sessions.is_empty() {
            inner.player_to_sessions.remove(&player_id);
            if release_slot {
                if let Some(slot) = inner.player_slots.remove(&player_id) {
                    inner.slots.release(slot);
                }
                inner.sync.clear_cache_for_disconnected_player(&player_id);
                inner
                    .encoder
                    .drop_scope(&EncoderScope::Player(player_id.clone()));
                departed = Some(player_id);
            }
        }
    }
    Some(RemovedSession {
        conn,
        departed_player: departed,
    })
}

fn departed_player_id(removed: Option<RemovedSession>) -> Option<PlayerId> {
    removed.and_then(|removed| removed.departed_player)
}

fn sessions_of(inner: &AdapterInner, player_id: &PlayerId) -> Vec<(SessionId, Arc<dyn Connection>)> {
    inner
        .player_to_sessions
        .get(player_id)
        .map(|sessions| {
            sessions
                .iter()
                .filter_map(|session_id| {
                    inner
                        .connections
                        .get(session_id)
                        .map(|conn| (session_id.clone(), conn.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn collect_full_sync<S: LandState>(
    inner: &mut AdapterInner,
    state: &S,
    land_id: &LandId,
) -> Vec<(SessionId, Arc<dyn Connection>, WireFrame)> {
    let entries: Vec<(PlayerId, Vec<SessionId>)> = inner
        .player_to_sessions
        .iter()
        .map(|(player, sessions)| (player.clone(), sessions.iter().cloned().collect()))
        .collect();
    let mut outgoing = Vec::new();
    for (player_id, sessions) in entries {
        let update = inner.sync.generate_diff(&player_id, state);
        if matches!(update, StateUpdate::NoChange) {
            continue;
        }
        let was_first_sync = matches!(update, StateUpdate::FirstSync(_));
        let scope = EncoderScope::Player(player_id.clone());
        let frame = match inner.encoder.encode(&scope, &update) {
            Ok(frame) => frame,
            Err(err) => {
                // The next sync retries from fresh state.
                warn!(%land_id, player_id = %player_id, error = ?err, "failed to encode update");
                continue;
            }
        };
        if was_first_sync {
            inner.sync.mark_first_sync_received(&player_id);
            inner
                .encoder
                .reset_scope_definitions(&EncoderScope::Broadcast);
        }
        for session_id in sessions {
            if let Some(conn) = inner.connections.get(&session_id) {
                outgoing.push((session_id, conn.clone(), frame.clone()));
            }
        }
    }
    inner.sync.refresh_broadcast_cache(state);
    outgoing
}

fn collect_broadcast_sync<S: LandState>(
    inner: &mut AdapterInner,
    state: &S,
    land_id: &LandId,
) -> Vec<(SessionId, Arc<dyn Connection>, WireFrame)> {
    let delta = inner.sync.generate_broadcast_delta(state);
    if matches!(delta, StateUpdate::NoChange) {
        return Vec::new();
    }
    let frame = match inner.encoder.encode(&EncoderScope::Broadcast, &delta) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%land_id, error = ?err, "failed to encode broadcast delta");
            return Vec::new();
        }
    };
    let entries: Vec<(PlayerId, Vec<SessionId>)> = inner
        .player_to_sessions
        .iter()
        .map(|(player, sessions)| (player.clone(), sessions.iter().cloned().collect()))
        .collect();
    let mut outgoing = Vec::new();
    for (player_id, sessions) in entries {
        // Players still waiting on their firstSync catch up there instead.
        if !inner.sync.has_first_sync(&player_id) {
            continue;
        }
        inner.sync.absorb_broadcast(&player_id);
        for session_id in sessions {
            if let Some(conn) = inner.connections.get(&session_id) {
                outgoing.push((session_id, conn.clone(), frame.clone()));
            }
        }
    }
    outgoing
}

fn server_event(name: &str, payload: Value) -> TransportMessage {
    TransportMessage::Event {
        direction: EventDirection::FromServer,
        name: name.to_string(),
        payload,
    }
}

fn error_event(kind: &str) -> TransportMessage {
    server_event("error", json!({"kind": kind}))
}
