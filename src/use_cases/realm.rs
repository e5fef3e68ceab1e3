// The realm composes land managers of unrelated state types behind one
// type-erased surface keyed by land type.

use crate::domain::ids::{ClientId, LandId, SessionId};
use crate::domain::state::LandState;
use crate::interface_adapters::codec::TransportCodec;
use crate::interface_adapters::connection::{Connection, WireFrame};
use crate::use_cases::adapter::JoinGrant;
use crate::use_cases::definition::{
    AuthenticatedInfo, LandDefinition, LandServices, PlayerSession,
};
use crate::use_cases::keeper::JoinError;
use crate::use_cases::manager::{LandConfig, LandManager, LandStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, PartialEq)]
pub enum RealmError {
    EmptyLandType,
    DuplicateLandType(String),
}

/// Type-erased handle onto one land type's manager, so lands with
/// different state types coexist in one process.
#[async_trait]
pub trait LandServer: Send + Sync {
    fn land_type(&self) -> &str;

    fn codec(&self) -> Arc<TransportCodec>;

    async fn land_exists(&self, land_id: &LandId) -> bool;

    /// Creates the land if needed, from the registered definition and a
    /// fresh initial state.
    async fn ensure_land(&self, land_id: &LandId);

    async fn perform_join(
        &self,
        land_id: &LandId,
        session: PlayerSession,
        client_id: ClientId,
        session_id: SessionId,
        auth: Option<AuthenticatedInfo>,
        conn: Arc<dyn Connection>,
    ) -> Result<JoinGrant, JoinError>;

    /// Post-join: sends the initial firstSync and lets the rest of the
    /// land catch up.
    async fn complete_join(&self, land_id: &LandId, session_id: &SessionId);

    async fn on_message(
        &self,
        land_id: &LandId,
        session_id: &SessionId,
        frame: &WireFrame,
        conn: &Arc<dyn Connection>,
    );

    async fn on_disconnect(&self, land_id: &LandId, session_id: &SessionId);

    async fn list_lands(&self) -> Vec<LandId>;

    async fn land_count(&self) -> usize;

    async fn land_stats(&self, land_id: &LandId) -> Option<LandStats>;

    async fn shutdown(&self) -> Result<(), String>;
}

/// The default `LandServer`: a manager plus the land type's registered
/// definition, initial-state factory, and wiring.
pub struct ManagedLandServer<S: LandState> {
    land_type: String,
    manager: Arc<LandManager<S>>,
    definition: Arc<LandDefinition<S>>,
    initial_state: Box<dyn Fn() -> S + Send + Sync>,
    services: Arc<LandServices>,
    config: LandConfig,
}

impl<S: LandState> ManagedLandServer<S> {
    pub fn new(
        definition: LandDefinition<S>,
        initial_state: impl Fn() -> S + Send + Sync + 'static,
        services: LandServices,
        config: LandConfig,
    ) -> Self {
        Self {
            land_type: definition.land_type().to_string(),
            manager: LandManager::new(),
            definition: Arc::new(definition),
            initial_state: Box::new(initial_state),
            services: Arc::new(services),
            config,
        }
    }

    pub fn manager(&self) -> &Arc<LandManager<S>> {
        &self.manager
    }
}

#[async_trait]
impl<S: LandState> LandServer for ManagedLandServer<S> {
    fn land_type(&self) -> &str {
        &self.land_type
    }

    fn codec(&self) -> Arc<TransportCodec> {
        Arc::clone(&self.config.codec)
    }

    async fn land_exists(&self, land_id: &LandId) -> bool {
        self.manager.get_land(land_id).await.is_some()
    }

    async fn ensure_land(&self, land_id: &LandId) {
        self.manager
            .get_or_create_land(
                land_id.clone(),
                Arc::clone(&self.definition),
                (self.initial_state)(),
                Arc::clone(&self.services),
                &self.config,
            )
            .await;
    }

    async fn perform_join(
        &self,
        land_id: &LandId,
        session: PlayerSession,
        client_id: ClientId,
        session_id: SessionId,
        auth: Option<AuthenticatedInfo>,
        conn: Arc<dyn Connection>,
    ) -> Result<JoinGrant, JoinError> {
        let Some(container) = self.manager.get_land(land_id).await else {
            return Err(JoinError::Destroyed);
        };
        container
            .adapter
            .perform_join(session, client_id, session_id, auth, conn)
            .await
    }

    async fn complete_join(&self, land_id: &LandId, session_id: &SessionId) {
        if let Some(container) = self.manager.get_land(land_id).await {
            container.adapter.send_first_sync(session_id).await;
        }
    }

    async fn on_message(
        &self,
        land_id: &LandId,
        session_id: &SessionId,
        frame: &WireFrame,
        conn: &Arc<dyn Connection>,
    ) {
        if let Some(container) = self.manager.get_land(land_id).await {
            container.adapter.on_message(session_id, frame, conn).await;
        }
    }

    async fn on_disconnect(&self, land_id: &LandId, session_id: &SessionId) {
        if let Some(container) = self.manager.get_land(land_id).await {
            container.adapter.on_disconnect(session_id).await;
        }
    }

    async fn list_lands(&self) -> Vec<LandId> {
        self.manager.list_lands().await
    }

    async fn land_count(&self) -> usize {
        self.manager.land_count().await
    }

    async fn land_stats(&self, land_id: &LandId) -> Option<LandStats> {
        self.manager.land_stats(land_id).await
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.manager.shutdown().await
    }
}

/// Process-wide registry of land types.
#[derive(Default)]
pub struct LandRealm {
    servers: RwLock<HashMap<String, Arc<dyn LandServer>>>,
}

impl LandRealm {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, server: Arc<dyn LandServer>) -> Result<(), RealmError> {
        let land_type = server.land_type().to_string();
        if land_type.is_empty() {
            return Err(RealmError::EmptyLandType);
        }
        let mut servers = self.servers.write().await;
        if servers.contains_key(&land_type) {
            return Err(RealmError::DuplicateLandType(land_type));
        }
        info!(%land_type, "land type registered");
        servers.insert(land_type, server);
        Ok(())
    }

    pub async fn server_for(&self, land_type: &str) -> Option<Arc<dyn LandServer>> {
        self.servers.read().await.get(land_type).cloned()
    }

    pub async fn list_all_lands(&self) -> Vec<LandId> {
        let servers: Vec<Arc<dyn LandServer>> =
            self.servers.read().await.values().cloned().collect();
        let mut lands = Vec::new();
        for server in servers {
            lands.extend(server.list_lands().await);
        }
        lands
    }

    /// Instance counts per land type.
    pub async fn health_check(&self) -> HashMap<String, usize> {
        let servers: Vec<Arc<dyn LandServer>> =
            self.servers.read().await.values().cloned().collect();
        let mut report = HashMap::new();
        for server in servers {
            report.insert(server.land_type().to_string(), server.land_count().await);
        }
        report
    }

    /// Stops every server; one failing server never aborts the rest.
    pub async fn shutdown(&self) {
        let servers: Vec<Arc<dyn LandServer>> =
            self.servers.read().await.values().cloned().collect();
        for server in servers {
            if let Err(reason) = server.shutdown().await {
                error!(land_type = server.land_type(), %reason, "server shutdown failed");
            }
        }
        self.servers.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::PlayerId;
    use crate::domain::value::{SnapshotValue, ValueMap};
    use crate::interface_adapters::codec::WireEncoding;
    use crate::use_cases::adapter::AdapterSettings;
    use crate::use_cases::keeper::KeeperSettings;

    #[derive(Debug, Clone, Default)]
    struct NullState;

    impl LandState for NullState {
        fn project_broadcast(&self) -> ValueMap {
            ValueMap::from([("ok".to_string(), SnapshotValue::Bool(true))])
        }

        fn project_player(&self, _player: &PlayerId) -> ValueMap {
            ValueMap::new()
        }
    }

    fn server(land_type: &str) -> Arc<dyn LandServer> {
        Arc::new(ManagedLandServer::new(
            LandDefinition::<NullState>::new(land_type),
            NullState::default,
            LandServices::new(),
            LandConfig {
                codec: Arc::new(TransportCodec::new(WireEncoding::JsonObject)),
                path_hasher: None,
                keeper: KeeperSettings::default(),
                adapter: AdapterSettings::default(),
            },
        ))
    }

    #[tokio::test]
    async fn when_a_land_type_is_registered_twice_then_the_second_is_rejected() {
        let realm = LandRealm::new();
        realm.register(server("arena")).await.expect("expected register");
        assert_eq!(
            realm.register(server("arena")).await,
            Err(RealmError::DuplicateLandType("arena".to_string()))
        );
    }

    #[tokio::test]
    async fn when_the_land_type_is_empty_then_registration_is_rejected() {
        let realm = LandRealm::new();
        assert_eq!(
            realm.register(server("")).await,
            Err(RealmError::EmptyLandType)
        );
    }

    #[tokio::test]
    async fn when_two_types_hold_lands_then_health_check_reports_both() {
        let realm = LandRealm::new();
        let arena = server("arena");
        let lobby = server("lobby");
        realm.register(Arc::clone(&arena)).await.expect("expected register");
        realm.register(Arc::clone(&lobby)).await.expect("expected register");
        arena.ensure_land(&LandId::new("arena", "a1")).await;
        arena.ensure_land(&LandId::new("arena", "a2")).await;
        lobby.ensure_land(&LandId::new("lobby", "l1")).await;

        let report = realm.health_check().await;
        assert_eq!(report.get("arena"), Some(&2));
        assert_eq!(report.get("lobby"), Some(&1));
        assert_eq!(realm.list_all_lands().await.len(), 3);
    }
}
