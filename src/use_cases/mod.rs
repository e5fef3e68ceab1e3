// Use cases layer: the land runtime itself.

pub mod adapter;
pub mod definition;
pub mod keeper;
pub mod manager;
pub mod realm;
pub mod router;
pub mod slots;
pub mod sync;

pub use adapter::{AdapterSettings, EventTarget, JoinGrant, SyncKind, TransportAdapter};
pub use definition::{
    AuthenticatedInfo, JoinDecision, LandContext, LandDefinition, LandServices, PlayerSession,
    RuleError,
};
pub use keeper::{KeeperHandle, KeeperSettings, spawn_keeper};
pub use manager::{LandConfig, LandManager, LandStats};
pub use realm::{LandRealm, LandServer, ManagedLandServer, RealmError};
pub use router::{LandRouter, RouterConfig};
pub use slots::SlotAllocator;
pub use sync::SyncEngine;
