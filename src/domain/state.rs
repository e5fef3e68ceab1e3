// The seam between a concrete land state type and the sync machinery.

use crate::domain::ids::PlayerId;
use crate::domain::value::ValueMap;

/// Implemented by each land's authoritative state type. Fields are either
/// broadcast (every player sees the same value) or a per-player slice
/// (each player sees only the entry keyed by their own id).
pub trait LandState: Clone + Send + Sync + 'static {
    /// Projection of every broadcast field.
    fn project_broadcast(&self) -> ValueMap;

    /// Projection of the per-player slice fields for one player only.
    /// Broadcast fields must not appear here.
    fn project_player(&self, player: &PlayerId) -> ValueMap;
}

/// The complete view a single player is entitled to.
pub fn project_full<S: LandState>(state: &S, player: &PlayerId) -> ValueMap {
    let mut view = state.project_broadcast();
    view.extend(state.project_player(player));
    view
}
