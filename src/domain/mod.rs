// Domain layer: pure value types shared across the runtime. No I/O here.

pub mod ids;
pub mod patch;
pub mod state;
pub mod value;

pub use ids::{ClientId, LandId, PlayerId, SessionId};
pub use patch::{PatchError, PatchOp, StatePatch, StateUpdate};
pub use state::{LandState, project_full};
pub use value::{SnapshotValue, ValueMap};
