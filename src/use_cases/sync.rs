// Per-land sync engine: remembers the last view sent to each player and
// turns the current state into firstSync / diff / noChange updates.

use crate::domain::ids::PlayerId;
use crate::domain::patch::{StateUpdate, diff_value_maps};
use crate::domain::state::{LandState, project_full};
use crate::domain::value::ValueMap;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Default)]
pub struct SyncEngine {
    // Last full view each player has been told about.
    last_snapshot: HashMap<PlayerId, ValueMap>,
    // Which of the cached keys came from the broadcast projection.
    broadcast_keys: HashMap<PlayerId, BTreeSet<String>>,
    first_sync_sent: HashSet<PlayerId>,
    // Last broadcast view sent on the shared broadcast scope.
    broadcast_cache: ValueMap,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the full projection for one player and seeds the cache.
    /// Deliberately does NOT set the firstSync-sent flag: the transport
    /// decides whether to send this as a dedicated snapshot or let the
    /// next `generate_diff` fold it into a firstSync.
    pub fn late_join_snapshot<S: LandState>(
        &mut self,
        player: &PlayerId,
        state: &S,
    ) -> ValueMap {
        let projection = project_full(state, player);
        self.remember(player, state, projection.clone());
        projection
    }

    /// The next update for one player: a firstSync until the transport has
    /// confirmed one, then diffs against the cached view.
    pub fn generate_diff<S: LandState>(&mut self, player: &PlayerId, state: &S) -> StateUpdate {
        let projection = project_full(state, player);
        if !self.first_sync_sent.contains(player) {
            let patches = diff_value_maps(&ValueMap::new(), &projection);
            self.remember(player, state, projection);
            return StateUpdate::FirstSync(patches);
        }
        let old = self.last_snapshot.get(player).cloned().unwrap_or_default();
        let patches = diff_value_maps(&old, &projection);
        self.remember(player, state, projection);
        if patches.is_empty() {
            StateUpdate::NoChange
        } else {
            StateUpdate::Diff(patches)
        }
    }

    /// One delta for the shared broadcast scope, diffed against the last
    /// broadcast view and identical for every listening player.
    pub fn generate_broadcast_delta<S: LandState>(&mut self, state: &S) -> StateUpdate {
        let current = state.project_broadcast();
        let patches = diff_value_maps(&self.broadcast_cache, &current);
        self.broadcast_cache = current;
        if patches.is_empty() {
            StateUpdate::NoChange
        } else {
            StateUpdate::Diff(patches)
        }
    }

    /// Folds the current broadcast view into one player's cached view so a
    /// later full sync does not re-diff fields the broadcast delta covered.
    pub fn absorb_broadcast(&mut self, player: &PlayerId) {
        let Some(cache) = self.last_snapshot.get_mut(player) else {
            return;
        };
        if let Some(old_keys) = self.broadcast_keys.get(player) {
            for key in old_keys {
                if !self.broadcast_cache.contains_key(key) {
                    cache.remove(key);
                }
            }
        }
        for (key, value) in &self.broadcast_cache {
            cache.insert(key.clone(), value.clone());
        }
        self.broadcast_keys
            .insert(player.clone(), self.broadcast_cache.keys().cloned().collect());
    }

    /// Re-aligns the broadcast cache after a full per-player sync pass.
    pub fn refresh_broadcast_cache<S: LandState>(&mut self, state: &S) {
        self.broadcast_cache = state.project_broadcast();
    }

    pub fn mark_first_sync_received(&mut self, player: &PlayerId) {
        self.first_sync_sent.insert(player.clone());
    }

    pub fn has_first_sync(&self, player: &PlayerId) -> bool {
        self.first_sync_sent.contains(player)
    }

    /// Drops everything known about a player so a reconnect re-seeds from
    /// a fresh firstSync.
    pub fn clear_cache_for_disconnected_player(&mut self, player: &PlayerId) {
        self.last_snapshot.remove(player);
        self.broadcast_keys.remove(player);
        self.first_sync_sent.remove(player);
    }

    fn remember<S: LandState>(&mut self, player: &PlayerId, state: &S, projection: ValueMap) {
        self.broadcast_keys.insert(
            player.clone(),
            state.project_broadcast().keys().cloned().collect(),
        );
        self.last_snapshot.insert(player.clone(), projection);
    }
}
