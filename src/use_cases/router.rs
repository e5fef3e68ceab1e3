// Per-connection front end. A fresh connection sits in handshake phase
// until its first message, which must be a JSON join; after a successful
// join the connection is bound to exactly one land for its lifetime.

use crate::domain::ids::{ClientId, LandId, PlayerId, SessionId};
use crate::interface_adapters::codec::{
    JoinRequest, JoinResponse, TransportCodec, TransportMessage,
};
use crate::interface_adapters::connection::{Connection, WireFrame};
use crate::use_cases::definition::{AuthenticatedInfo, PlayerSession};
use crate::use_cases::keeper::JoinError;
use crate::use_cases::realm::{LandRealm, LandServer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const REASON_HANDSHAKE_REQUIRED: &str = "handshake_required";
pub const REASON_INSTANCE_NOT_FOUND: &str = "instance_not_found";
pub const REASON_INSTANCE_REQUIRED: &str = "instance_required";
pub const REASON_UNKNOWN_LAND_TYPE: &str = "unknown_land_type";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether a join may create the land it targets (or omit the instance
    /// entirely and get a fresh one).
    pub allow_auto_create_on_join: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            allow_auto_create_on_join: true,
        }
    }
}

enum Phase {
    Handshake,
    Bound {
        land_id: LandId,
        server: Arc<dyn LandServer>,
    },
}

struct ConnState {
    client_id: ClientId,
    auth: Option<AuthenticatedInfo>,
    conn: Arc<dyn Connection>,
    phase: Phase,
}

pub struct LandRouter {
    realm: Arc<LandRealm>,
    config: RouterConfig,
    sessions: Mutex<HashMap<SessionId, ConnState>>,
}

impl LandRouter {
    pub fn new(realm: Arc<LandRealm>, config: RouterConfig) -> Self {
        Self {
            realm,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn on_connect(
        &self,
        session_id: SessionId,
        client_id: ClientId,
        auth: Option<AuthenticatedInfo>,
        conn: Arc<dyn Connection>,
    ) {
        debug!(%session_id, %client_id, "connection registered");
        self.sessions.lock().await.insert(
            session_id,
            ConnState {
                client_id,
                auth,
                conn,
                phase: Phase::Handshake,
            },
        );
    }

    pub async fn on_message(&self, session_id: &SessionId, frame: WireFrame) {
        enum Route {
            Bound(LandId, Arc<dyn LandServer>, Arc<dyn Connection>),
            Handshake(ClientId, Option<AuthenticatedInfo>, Arc<dyn Connection>),
        }
        let route = {
            let sessions = self.sessions.lock().await;
            let Some(state) = sessions.get(session_id) else {
                debug!(%session_id, "message from unknown session dropped");
                return;
            };
            match &state.phase {
                Phase::Bound { land_id, server } => Route::Bound(
                    land_id.clone(),
                    Arc::clone(server),
                    Arc::clone(&state.conn),
                ),
                Phase::Handshake => Route::Handshake(
                    state.client_id.clone(),
                    state.auth.clone(),
                    Arc::clone(&state.conn),
                ),
            }
        };
        match route {
            Route::Bound(land_id, server, conn) => {
                server.on_message(&land_id, session_id, &frame, &conn).await;
            }
            Route::Handshake(client_id, auth, conn) => {
                self.handle_handshake(session_id, client_id, auth, conn, frame)
                    .await;
            }
        }
    }

    pub async fn on_disconnect(&self, session_id: &SessionId) {
        let state = self.sessions.lock().await.remove(session_id);
        let Some(state) = state else {
            return;
        };
        if let Phase::Bound { land_id, server } = state.phase {
            info!(%session_id, %land_id, "bound session disconnected");
            server.on_disconnect(&land_id, session_id).await;
        } else {
            debug!(%session_id, "session disconnected during handshake");
        }
    }

    pub async fn is_bound(&self, session_id: &SessionId) -> bool {
        let sessions = self.sessions.lock().await;
        matches!(
            sessions.get(session_id).map(|state| &state.phase),
            Some(Phase::Bound { .. })
        )
    }

    pub async fn bound_land(&self, session_id: &SessionId) -> Option<LandId> {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id).map(|state| &state.phase) {
            Some(Phase::Bound { land_id, .. }) => Some(land_id.clone()),
            _ => None,
        }
    }

    async fn handle_handshake(
        &self,
        session_id: &SessionId,
        client_id: ClientId,
        auth: Option<AuthenticatedInfo>,
        conn: Arc<dyn Connection>,
        frame: WireFrame,
    ) {
        // Handshake traffic is JSON-only whatever the configured encoding.
        let join = match TransportCodec::decode_handshake(&frame) {
            Ok(TransportMessage::Join(join)) => join,
            Ok(other) => {
                let request_id = request_id_of(&other);
                debug!(%session_id, "non-join message during handshake");
                deny(&conn, request_id, REASON_HANDSHAKE_REQUIRED).await;
                return;
            }
            Err(err) => {
                debug!(%session_id, error = ?err, "undecodable handshake frame");
                deny(&conn, String::new(), REASON_HANDSHAKE_REQUIRED).await;
                return;
            }
        };
        self.handle_join(session_id, client_id, auth, conn, join)
            .await;
    }

    async fn handle_join(
        &self,
        session_id: &SessionId,
        client_id: ClientId,
        auth: Option<AuthenticatedInfo>,
        conn: Arc<dyn Connection>,
        join: JoinRequest,
    ) {
        let request_id = join.request_id.clone();
        let Some(server) = self.realm.server_for(&join.land_type).await else {
            deny(&conn, request_id, REASON_UNKNOWN_LAND_TYPE).await;
            return;
        };

        let land_id = match &join.land_instance_id {
            Some(instance_id) => {
                let land_id = LandId::new(&join.land_type, instance_id.as_str());
                if !server.land_exists(&land_id).await {
                    if !self.config.allow_auto_create_on_join {
                        deny(&conn, request_id, REASON_INSTANCE_NOT_FOUND).await;
                        return;
                    }
                    server.ensure_land(&land_id).await;
                }
                land_id
            }
            None if self.config.allow_auto_create_on_join => {
                let land_id = LandId::new(&join.land_type, Uuid::new_v4().to_string());
                server.ensure_land(&land_id).await;
                land_id
            }
            None => {
                deny(&conn, request_id, REASON_INSTANCE_REQUIRED).await;
                return;
            }
        };

        let session = resolve_identity(session_id, &client_id, auth.as_ref(), &join);
        let grant = match server
            .perform_join(
                &land_id,
                session,
                client_id,
                session_id.clone(),
                auth,
                Arc::clone(&conn),
            )
            .await
        {
            Ok(grant) => grant,
            Err(JoinError::Denied(reason)) => {
                deny(&conn, request_id, reason).await;
                return;
            }
            Err(JoinError::Destroyed) => {
                deny(&conn, request_id, REASON_INSTANCE_NOT_FOUND).await;
                return;
            }
        };

        // Bind the session; if it vanished mid-join, undo the admission.
        let bound = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(session_id) {
                Some(state) => {
                    state.phase = Phase::Bound {
                        land_id: land_id.clone(),
                        server: Arc::clone(&server),
                    };
                    true
                }
                None => false,
            }
        };
        if !bound {
            warn!(%session_id, %land_id, "session vanished during join");
            server.on_disconnect(&land_id, session_id).await;
            return;
        }

        info!(
            %session_id,
            %land_id,
            player_id = %grant.player_id,
            player_slot = grant.player_slot,
            "session bound"
        );

        // Success responses use the land's configured encoding; the client
        // switches codecs on this boundary.
        let response = TransportMessage::JoinResponse(JoinResponse {
            request_id,
            success: true,
            player_id: Some(grant.player_id.to_string()),
            land_id: Some(land_id.clone()),
            player_slot: Some(grant.player_slot),
            reason: None,
        });
        match server.codec().encode(&response) {
            Ok(frame) => {
                if conn.send(frame).await.is_err() {
                    debug!(%session_id, "join response send failed");
                }
            }
            Err(err) => warn!(%session_id, error = ?err, "failed to encode join response"),
        }

        server.complete_join(&land_id, session_id).await;
    }
}

/// Identity precedence: join-message fields beat auth-info fields beat the
/// guest factory. Metadata is auth (or guest defaults) overlaid with the
/// join message's entries.
fn resolve_identity(
    session_id: &SessionId,
    client_id: &ClientId,
    auth: Option<&AuthenticatedInfo>,
    join: &JoinRequest,
) -> PlayerSession {
    let guest = PlayerSession::guest(session_id.as_str(), client_id.as_str());
    let player_id = join
        .player_id
        .as_deref()
        .map(PlayerId::new)
        .or_else(|| auth.map(|info| info.player_id.clone()))
        .unwrap_or(guest.player_id);
    let device_id = join
        .device_id
        .clone()
        .or_else(|| auth.map(|info| info.device_id.clone()))
        .unwrap_or(guest.device_id);
    let mut metadata = match auth {
        Some(info) => info.metadata.clone(),
        None => guest.metadata,
    };
    if let Some(extra) = &join.metadata {
        metadata.extend(extra.clone());
    }
    PlayerSession {
        player_id,
        device_id,
        metadata,
    }
}

fn request_id_of(message: &TransportMessage) -> String {
    match message {
        TransportMessage::ActionRequest { request_id, .. }
        | TransportMessage::ActionResponse { request_id, .. } => request_id.clone(),
        TransportMessage::Join(join) => join.request_id.clone(),
        TransportMessage::JoinResponse(response) => response.request_id.clone(),
        TransportMessage::Event { .. } => String::new(),
    }
}

/// Handshake rejections are always JSON and never unbind or disconnect.
async fn deny(conn: &Arc<dyn Connection>, request_id: String, reason: impl Into<String>) {
    let response = JoinResponse::denied(request_id, reason);
    let frame = TransportCodec::encode_handshake_response(&response);
    if conn.send(frame).await.is_err() {
        debug!("handshake rejection send failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::PlayerId;
    use std::collections::BTreeMap;

    fn join(player_id: Option<&str>, device_id: Option<&str>) -> JoinRequest {
        JoinRequest {
            request_id: "r1".to_string(),
            land_type: "arena".to_string(),
            land_instance_id: None,
            player_id: player_id.map(str::to_string),
            device_id: device_id.map(str::to_string),
            metadata: Some(BTreeMap::from([(
                "color".to_string(),
                "blue".to_string(),
            )])),
        }
    }

    fn auth() -> AuthenticatedInfo {
        AuthenticatedInfo {
            player_id: PlayerId::new("auth-player"),
            device_id: "auth-device".to_string(),
            metadata: BTreeMap::from([
                ("tier".to_string(), "gold".to_string()),
                ("color".to_string(), "red".to_string()),
            ]),
        }
    }

    #[test]
    fn when_the_join_names_a_player_then_it_beats_auth_and_guest() {
        let session = resolve_identity(
            &SessionId::new("s1"),
            &ClientId::new("c1"),
            Some(&auth()),
            &join(Some("explicit"), None),
        );
        assert_eq!(session.player_id, PlayerId::new("explicit"));
        assert_eq!(session.device_id, "auth-device");
        // Join metadata overrides the auth entry with the same key.
        assert_eq!(session.metadata.get("color").map(String::as_str), Some("blue"));
        assert_eq!(session.metadata.get("tier").map(String::as_str), Some("gold"));
    }

    #[test]
    fn when_nothing_is_provided_then_the_guest_factory_fills_identity() {
        let bare_join = JoinRequest {
            metadata: None,
            ..join(None, None)
        };
        let session = resolve_identity(
            &SessionId::new("s1"),
            &ClientId::new("c1"),
            None,
            &bare_join,
        );
        assert_eq!(session.player_id, PlayerId::new("s1"));
        assert_eq!(session.device_id, "c1");
        assert_eq!(
            session.metadata.get("isGuest").map(String::as_str),
            Some("true")
        );
    }
}
