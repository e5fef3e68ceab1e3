// Land instance registry for one state type. Owns the keeper/adapter pair
// per land and is the sole root of that object graph; keepers report
// destruction back through a callback so no cycle forms.

use crate::domain::ids::LandId;
use crate::domain::state::LandState;
use crate::interface_adapters::codec::TransportCodec;
use crate::interface_adapters::path_hash::PathHasher;
use crate::use_cases::adapter::{AdapterSettings, TransportAdapter};
use crate::use_cases::definition::{LandDefinition, LandServices};
use crate::use_cases::keeper::{KeeperHandle, KeeperSettings, spawn_keeper};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Per-land-type wiring shared by every instance of that type.
#[derive(Clone)]
pub struct LandConfig {
    pub codec: Arc<TransportCodec>,
    pub path_hasher: Option<Arc<PathHasher>>,
    pub keeper: KeeperSettings,
    pub adapter: AdapterSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandStats {
    pub player_count: usize,
    pub created_at: SystemTime,
    pub last_activity_at: SystemTime,
}

/// One live land: its keeper and its transport adapter.
pub struct LandContainer<S: LandState> {
    pub land_id: LandId,
    pub keeper: KeeperHandle<S>,
    pub adapter: Arc<TransportAdapter<S>>,
    created_at: SystemTime,
    last_activity: Arc<AtomicU64>,
}

impl<S: LandState> Clone for LandContainer<S> {
    fn clone(&self) -> Self {
        Self {
            land_id: self.land_id.clone(),
            keeper: self.keeper.clone(),
            adapter: Arc::clone(&self.adapter),
            created_at: self.created_at,
            last_activity: Arc::clone(&self.last_activity),
        }
    }
}

pub struct LandManager<S: LandState> {
    lands: RwLock<HashMap<LandId, LandContainer<S>>>,
    // Handed to keepers so their destroy callback can find the registry.
    weak: Weak<LandManager<S>>,
}

impl<S: LandState> LandManager<S> {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            lands: RwLock::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    /// Idempotent create-or-lookup. Concurrent calls with the same id get
    /// the same container; a recreated id always starts from the caller's
    /// fresh initial state.
    pub async fn get_or_create_land(
        &self,
        land_id: LandId,
        definition: Arc<LandDefinition<S>>,
        initial_state: S,
        services: Arc<LandServices>,
        config: &LandConfig,
    ) -> LandContainer<S> {
        let mut lands = self.lands.write().await;
        if let Some(existing) = lands.get(&land_id) {
            return existing.clone();
        }

        let manager = self.weak.clone();
        let on_destroyed = Box::new(move |destroyed_id: LandId| {
            // Runs on the keeper task; hop off it so teardown cannot block
            // the keeper's final breath.
            if let Some(manager) = manager.upgrade() {
                tokio::spawn(async move {
                    manager.finish_destroyed(&destroyed_id).await;
                });
            }
        });

        let keeper = spawn_keeper(
            land_id.clone(),
            definition,
            initial_state,
            services,
            config.keeper.clone(),
            on_destroyed,
        );
        let last_activity = Arc::new(AtomicU64::new(0));
        let adapter = TransportAdapter::new(
            land_id.clone(),
            keeper.clone(),
            Arc::clone(&config.codec),
            config.path_hasher.clone(),
            config.adapter.clone(),
            Arc::clone(&last_activity),
        );
        let container = LandContainer {
            land_id: land_id.clone(),
            keeper,
            adapter,
            created_at: SystemTime::now(),
            last_activity,
        };
        lands.insert(land_id.clone(), container.clone());
        info!(%land_id, "land created");
        container
    }

    pub async fn get_land(&self, land_id: &LandId) -> Option<LandContainer<S>> {
        self.lands.read().await.get(land_id).cloned()
    }

    pub async fn list_lands(&self) -> Vec<LandId> {
        self.lands.read().await.keys().cloned().collect()
    }

    pub async fn land_count(&self) -> usize {
        self.lands.read().await.len()
    }

    pub async fn land_stats(&self, land_id: &LandId) -> Option<LandStats> {
        let container = self.get_land(land_id).await?;
        let player_count = container.keeper.player_count().await.unwrap_or(0);
        let last_millis = container.last_activity.load(Ordering::Relaxed);
        let last_activity_at = if last_millis == 0 {
            container.created_at
        } else {
            UNIX_EPOCH + Duration::from_millis(last_millis)
        };
        Some(LandStats {
            player_count,
            created_at: container.created_at,
            last_activity_at,
        })
    }

    /// Explicit destruction: unregister first, then stop the keeper and
    /// drop every session.
    pub async fn remove_land(&self, land_id: &LandId) {
        let container = {
            let mut lands = self.lands.write().await;
            lands.remove(land_id)
        };
        let Some(container) = container else {
            return;
        };
        if container.keeper.destroy().await.is_err() {
            debug!(%land_id, "keeper already gone during remove");
        }
        container.adapter.detach().await;
        info!(%land_id, "land removed");
    }

    /// Destroys every land. Per-land failures are logged, not propagated,
    /// so one stuck land cannot hold the process shutdown hostage.
    pub async fn shutdown(&self) -> Result<(), String> {
        let lands: Vec<LandId> = self.list_lands().await;
        let mut failures = Vec::new();
        for land_id in lands {
            let container = self.get_land(&land_id).await;
            if let Some(container) = container {
                if container.keeper.destroy().await.is_err() {
                    warn!(%land_id, "keeper unreachable during shutdown");
                    failures.push(land_id.to_string());
                }
                container.adapter.detach().await;
            }
            let mut map = self.lands.write().await;
            map.remove(&land_id);
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!("lands failed to stop cleanly: {}", failures.join(", ")))
        }
    }

    /// Keeper-signaled destruction (idle-empty or mailbox close).
    async fn finish_destroyed(&self, land_id: &LandId) {
        let container = {
            let mut lands = self.lands.write().await;
            lands.remove(land_id)
        };
        if let Some(container) = container {
            container.adapter.detach().await;
            info!(%land_id, "land destroyed");
        }
    }
}
