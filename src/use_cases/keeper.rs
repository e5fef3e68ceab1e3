// The land keeper: one task per land, the single serialization point for
// state mutation. Commands drain in FIFO order; rule bodies run inside the
// current command against a scratch copy that only commits on success.

use crate::domain::ids::{ClientId, LandId, PlayerId, SessionId};
use crate::domain::state::LandState;
use crate::use_cases::definition::{
    JoinDecision, LandContext, LandDefinition, LandServices, PlayerSession,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct KeeperSettings {
    /// Destroy the land this long after the last player leaves.
    pub destroy_when_empty: Option<Duration>,
    pub mailbox_capacity: usize,
}

impl Default for KeeperSettings {
    fn default() -> Self {
        Self {
            destroy_when_empty: None,
            mailbox_capacity: 256,
        }
    }
}

/// One joined player as the keeper sees it.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub joined_at: Instant,
    device_id: String,
    metadata: BTreeMap<String, String>,
}

/// Successful admission. `displaced_session` is the older session that was
/// kicked when the same player logged in twice.
#[derive(Debug, Clone)]
pub struct KeeperJoin {
    pub player_id: PlayerId,
    pub displaced_session: Option<SessionId>,
}

#[derive(Debug)]
pub enum JoinError {
    Denied(String),
    Destroyed,
}

#[derive(Debug)]
pub enum ActionError {
    UnknownType(String),
    Failed(String),
    Destroyed,
}

impl ActionError {
    pub fn reason(&self) -> String {
        match self {
            ActionError::UnknownType(type_id) => format!("unknown_type:{type_id}"),
            ActionError::Failed(reason) => reason.clone(),
            ActionError::Destroyed => "land_destroyed".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum KeeperError {
    Destroyed,
}

enum KeeperCommand<S> {
    Join {
        session: PlayerSession,
        client_id: ClientId,
        session_id: SessionId,
        reply: oneshot::Sender<Result<KeeperJoin, JoinError>>,
    },
    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<()>,
    },
    Action {
        type_id: String,
        payload: Value,
        player_id: PlayerId,
        reply: oneshot::Sender<Result<Value, ActionError>>,
    },
    Event {
        type_id: String,
        payload: Value,
        player_id: PlayerId,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    CurrentState {
        reply: oneshot::Sender<S>,
    },
    PlayerCount {
        reply: oneshot::Sender<usize>,
    },
    PlayerSessions {
        reply: oneshot::Sender<HashMap<PlayerId, SessionId>>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap handle onto one keeper task. All methods are suspension points.
pub struct KeeperHandle<S> {
    land_id: LandId,
    tx: mpsc::Sender<KeeperCommand<S>>,
}

impl<S> Clone for KeeperHandle<S> {
    fn clone(&self) -> Self {
        Self {
            land_id: self.land_id.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<S: LandState> KeeperHandle<S> {
    pub fn land_id(&self) -> &LandId {
        &self.land_id
    }

    pub async fn join(
        &self,
        session: PlayerSession,
        client_id: ClientId,
        session_id: SessionId,
    ) -> Result<KeeperJoin, JoinError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::Join {
                session,
                client_id,
                session_id,
                reply,
            })
            .await
            .map_err(|_| JoinError::Destroyed)?;
        rx.await.map_err(|_| JoinError::Destroyed)?
    }

    pub async fn leave(&self, player_id: PlayerId) -> Result<(), KeeperError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::Leave { player_id, reply })
            .await
            .map_err(|_| KeeperError::Destroyed)?;
        rx.await.map_err(|_| KeeperError::Destroyed)
    }

    pub async fn handle_action(
        &self,
        type_id: String,
        payload: Value,
        player_id: PlayerId,
    ) -> Result<Value, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::Action {
                type_id,
                payload,
                player_id,
                reply,
            })
            .await
            .map_err(|_| ActionError::Destroyed)?;
        rx.await.map_err(|_| ActionError::Destroyed)?
    }

    pub async fn handle_event(
        &self,
        type_id: String,
        payload: Value,
        player_id: PlayerId,
    ) -> Result<(), ActionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::Event {
                type_id,
                payload,
                player_id,
                reply,
            })
            .await
            .map_err(|_| ActionError::Destroyed)?;
        rx.await.map_err(|_| ActionError::Destroyed)?
    }

    /// A read-only clone of the authoritative state.
    pub async fn current_state(&self) -> Result<S, KeeperError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::CurrentState { reply })
            .await
            .map_err(|_| KeeperError::Destroyed)?;
        rx.await.map_err(|_| KeeperError::Destroyed)
    }

    pub async fn player_count(&self) -> Result<usize, KeeperError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::PlayerCount { reply })
            .await
            .map_err(|_| KeeperError::Destroyed)?;
        rx.await.map_err(|_| KeeperError::Destroyed)
    }

    pub async fn player_sessions(&self) -> Result<HashMap<PlayerId, SessionId>, KeeperError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::PlayerSessions { reply })
            .await
            .map_err(|_| KeeperError::Destroyed)?;
        rx.await.map_err(|_| KeeperError::Destroyed)
    }

    pub async fn destroy(&self) -> Result<(), KeeperError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KeeperCommand::Destroy { reply })
            .await
            .map_err(|_| KeeperError::Destroyed)?;
        rx.await.map_err(|_| KeeperError::Destroyed)
    }
}

/// Spawns the keeper task. `on_destroyed` fires exactly once, after the
/// destroy hook ran, so the owner can unregister the land.
pub fn spawn_keeper<S: LandState>(
    land_id: LandId,
    definition: Arc<LandDefinition<S>>,
    initial_state: S,
    services: Arc<LandServices>,
    settings: KeeperSettings,
    on_destroyed: Box<dyn FnOnce(LandId) + Send>,
) -> KeeperHandle<S> {
    let (tx, rx) = mpsc::channel(settings.mailbox_capacity);
    let task = KeeperTask {
        land_id: land_id.clone(),
        definition,
        services,
        state: initial_state,
        players: HashMap::new(),
        destroy_when_empty: settings.destroy_when_empty,
        on_destroyed: Some(on_destroyed),
    };
    tokio::spawn(task.run(rx));
    KeeperHandle { land_id, tx }
}

struct KeeperTask<S> {
    land_id: LandId,
    definition: Arc<LandDefinition<S>>,
    services: Arc<LandServices>,
    state: S,
    players: HashMap<PlayerId, PlayerRecord>,
    destroy_when_empty: Option<Duration>,
    on_destroyed: Option<Box<dyn FnOnce(LandId) + Send>>,
}

impl<S: LandState> KeeperTask<S> {
    async fn run(mut self, mut rx: mpsc::Receiver<KeeperCommand<S>>) {
        // A keeper is born empty, so the idle clock starts immediately.
        let mut idle_deadline = self.idle_deadline();
        loop {
            let command = if let Some(deadline) = idle_deadline {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(command) => command,
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        if self.players.is_empty() {
                            info!(land_id = %self.land_id, "destroying idle empty land");
                            self.destroy();
                            return;
                        }
                        idle_deadline = None;
                        continue;
                    }
                }
            } else {
                match rx.recv().await {
                    Some(command) => command,
                    None => break,
                }
            };

            match command {
                KeeperCommand::Join {
                    session,
                    client_id,
                    session_id,
                    reply,
                } => {
                    let result = self.handle_join(session, client_id, session_id);
                    if result.is_ok() {
                        idle_deadline = None;
                    }
                    let _ = reply.send(result);
                }
                KeeperCommand::Leave { player_id, reply } => {
                    self.handle_leave(&player_id);
                    if self.players.is_empty() {
                        idle_deadline = self.idle_deadline();
                    }
                    let _ = reply.send(());
                }
                KeeperCommand::Action {
                    type_id,
                    payload,
                    player_id,
                    reply,
                } => {
                    let _ = reply.send(self.handle_action(&type_id, payload, &player_id));
                }
                KeeperCommand::Event {
                    type_id,
                    payload,
                    player_id,
                    reply,
                } => {
                    let _ = reply.send(self.handle_event(&type_id, payload, &player_id));
                }
                KeeperCommand::CurrentState { reply } => {
                    let _ = reply.send(self.state.clone());
                }
                KeeperCommand::PlayerCount { reply } => {
                    let _ = reply.send(self.players.len());
                }
                KeeperCommand::PlayerSessions { reply } => {
                    let sessions = self
                        .players
                        .iter()
                        .map(|(id, record)| (id.clone(), record.session_id.clone()))
                        .collect();
                    let _ = reply.send(sessions);
                }
                KeeperCommand::Destroy { reply } => {
                    info!(land_id = %self.land_id, "destroying land on request");
                    self.destroy();
                    let _ = reply.send(());
                    return;
                }
            }
        }
        // Every handle is gone; tear the land down best-effort.
        debug!(land_id = %self.land_id, "keeper mailbox closed");
        self.destroy();
    }

    fn idle_deadline(&self) -> Option<Instant> {
        self.destroy_when_empty.map(|after| Instant::now() + after)
    }

    fn context_for(
        &self,
        player_id: &PlayerId,
        device_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> LandContext {
        LandContext {
            player_id: player_id.clone(),
            device_id: device_id.to_string(),
            metadata: metadata.clone(),
            services: Arc::clone(&self.services),
        }
    }

    fn handle_join(
        &mut self,
        session: PlayerSession,
        client_id: ClientId,
        session_id: SessionId,
    ) -> Result<KeeperJoin, JoinError> {
        let admission_ctx =
            self.context_for(&session.player_id, &session.device_id, &session.metadata);
        let player_id = match self.definition.can_join(&self.state, &session, &admission_ctx) {
            JoinDecision::Allow(player_id) => player_id,
            JoinDecision::Deny(reason) => {
                debug!(land_id = %self.land_id, %session_id, %reason, "join denied");
                return Err(JoinError::Denied(reason));
            }
        };

        // Kick-old duplicate login: the departing session leaves first so
        // rules observe a consistent ordering.
        let displaced_session = if let Some(existing) = self.players.get(&player_id).cloned() {
            let old_ctx =
                self.context_for(&player_id, &existing.device_id, &existing.metadata);
            let mut scratch = self.state.clone();
            match self.definition.run_on_leave(&mut scratch, &old_ctx) {
                Ok(()) => self.state = scratch,
                Err(err) => {
                    warn!(
                        land_id = %self.land_id,
                        player_id = %player_id,
                        reason = %err,
                        "on_leave failed during duplicate-login kick"
                    );
                }
            }
            Some(existing.session_id)
        } else {
            None
        };

        let ctx = self.context_for(&player_id, &session.device_id, &session.metadata);
        let mut scratch = self.state.clone();
        if let Err(err) = self.definition.run_on_join(&mut scratch, &ctx) {
            debug!(land_id = %self.land_id, player_id = %player_id, reason = %err, "on_join failed");
            return Err(JoinError::Denied(err.reason));
        }
        self.state = scratch;

        self.players.insert(
            player_id.clone(),
            PlayerRecord {
                client_id,
                session_id: session_id.clone(),
                joined_at: Instant::now(),
                device_id: session.device_id,
                metadata: session.metadata,
            },
        );
        info!(land_id = %self.land_id, player_id = %player_id, %session_id, "player joined");
        Ok(KeeperJoin {
            player_id,
            displaced_session,
        })
    }

    fn handle_leave(&mut self, player_id: &PlayerId) {
        let Some(record) = self.players.remove(player_id) else {
            return;
        };
        let ctx = self.context_for(player_id, &record.device_id, &record.metadata);
        let mut scratch = self.state.clone();
        match self.definition.run_on_leave(&mut scratch, &ctx) {
            Ok(()) => self.state = scratch,
            Err(err) => {
                warn!(land_id = %self.land_id, player_id = %player_id, reason = %err, "on_leave failed");
            }
        }
        info!(land_id = %self.land_id, player_id = %player_id, "player left");
    }

    fn handle_action(
        &mut self,
        type_id: &str,
        payload: Value,
        player_id: &PlayerId,
    ) -> Result<Value, ActionError> {
        let Some(record) = self.players.get(player_id).cloned() else {
            return Err(ActionError::Failed("not_joined".to_string()));
        };
        let definition = Arc::clone(&self.definition);
        let Some(rule) = definition.action(type_id) else {
            return Err(ActionError::UnknownType(type_id.to_string()));
        };
        let ctx = self.context_for(player_id, &record.device_id, &record.metadata);
        let mut scratch = self.state.clone();
        match rule(&mut scratch, payload, &ctx) {
            Ok(response) => {
                self.state = scratch;
                Ok(response)
            }
            Err(err) => {
                debug!(land_id = %self.land_id, player_id = %player_id, type_id, reason = %err, "action failed");
                Err(ActionError::Failed(err.reason))
            }
        }
    }

    fn handle_event(
        &mut self,
        type_id: &str,
        payload: Value,
        player_id: &PlayerId,
    ) -> Result<(), ActionError> {
        let Some(record) = self.players.get(player_id).cloned() else {
            return Err(ActionError::Failed("not_joined".to_string()));
        };
        let definition = Arc::clone(&self.definition);
        let Some(rule) = definition.event(type_id) else {
            return Err(ActionError::UnknownType(type_id.to_string()));
        };
        let ctx = self.context_for(player_id, &record.device_id, &record.metadata);
        let mut scratch = self.state.clone();
        match rule(&mut scratch, payload, &ctx) {
            Ok(()) => {
                self.state = scratch;
                Ok(())
            }
            Err(err) => {
                debug!(land_id = %self.land_id, player_id = %player_id, type_id, reason = %err, "event failed");
                Err(ActionError::Failed(err.reason))
            }
        }
    }

    fn destroy(&mut self) {
        self.definition.run_on_destroy(&mut self.state);
        if let Some(on_destroyed) = self.on_destroyed.take() {
            on_destroyed(self.land_id.clone());
        }
    }
}
