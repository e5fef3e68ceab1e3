// Land type definitions. A definition is opaque to the runtime: an initial
// state plus rules keyed by action/event type, with join/leave/destroy
// hooks. Rules mutate the state handed to them and must not call back
// into the keeper that is running them.

use crate::domain::ids::PlayerId;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Principal verified by an upstream middleware. Absence means guest mode.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedInfo {
    pub player_id: PlayerId,
    pub device_id: String,
    pub metadata: BTreeMap<String, String>,
}

/// The identity a join is admitted under.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub device_id: String,
    pub metadata: BTreeMap<String, String>,
}

impl PlayerSession {
    /// Default guest identity: the session stands in for the player, the
    /// client key for the device.
    pub fn guest(session_id: &str, client_id: &str) -> Self {
        Self {
            player_id: PlayerId::new(session_id),
            device_id: client_id.to_string(),
            metadata: BTreeMap::from([("isGuest".to_string(), "true".to_string())]),
        }
    }
}

/// Shared per-land services handed to rules. A small type map so land
/// definitions can smuggle their own collaborators in.
#[derive(Default)]
pub struct LandServices {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl LandServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }
}

impl fmt::Debug for LandServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LandServices")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Per-invocation context passed to every rule. `metadata` is the merged
/// view of auth info and join-message metadata (join fields win).
#[derive(Debug, Clone)]
pub struct LandContext {
    pub player_id: PlayerId,
    pub device_id: String,
    pub metadata: BTreeMap<String, String>,
    pub services: Arc<LandServices>,
}

/// Outcome of the admission rule.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinDecision {
    Allow(PlayerId),
    Deny(String),
}

/// Failure raised by a rule body; surfaced to the caller, never committed.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleError {
    pub reason: String,
}

impl RuleError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

pub type CanJoinRule<S> = dyn Fn(&S, &PlayerSession, &LandContext) -> JoinDecision + Send + Sync;
pub type LifecycleRule<S> = dyn Fn(&mut S, &LandContext) -> Result<(), RuleError> + Send + Sync;
pub type ActionRule<S> =
    dyn Fn(&mut S, Value, &LandContext) -> Result<Value, RuleError> + Send + Sync;
pub type EventRule<S> = dyn Fn(&mut S, Value, &LandContext) -> Result<(), RuleError> + Send + Sync;
pub type DestroyHook<S> = dyn Fn(&mut S) + Send + Sync;

/// The rule set for one land type.
pub struct LandDefinition<S> {
    land_type: String,
    can_join: Box<CanJoinRule<S>>,
    on_join: Option<Box<LifecycleRule<S>>>,
    on_leave: Option<Box<LifecycleRule<S>>>,
    on_destroy: Option<Box<DestroyHook<S>>>,
    actions: HashMap<String, Box<ActionRule<S>>>,
    events: HashMap<String, Box<EventRule<S>>>,
}

impl<S> LandDefinition<S> {
    /// A definition that admits everyone under their requested identity
    /// and handles nothing.
    pub fn new(land_type: impl Into<String>) -> Self {
        Self {
            land_type: land_type.into(),
            can_join: Box::new(|_, session, _| JoinDecision::Allow(session.player_id.clone())),
            on_join: None,
            on_leave: None,
            on_destroy: None,
            actions: HashMap::new(),
            events: HashMap::new(),
        }
    }

    pub fn land_type(&self) -> &str {
        &self.land_type
    }

    pub fn with_can_join(
        mut self,
        rule: impl Fn(&S, &PlayerSession, &LandContext) -> JoinDecision + Send + Sync + 'static,
    ) -> Self {
        self.can_join = Box::new(rule);
        self
    }

    pub fn with_on_join(
        mut self,
        rule: impl Fn(&mut S, &LandContext) -> Result<(), RuleError> + Send + Sync + 'static,
    ) -> Self {
        self.on_join = Some(Box::new(rule));
        self
    }

    pub fn with_on_leave(
        mut self,
        rule: impl Fn(&mut S, &LandContext) -> Result<(), RuleError> + Send + Sync + 'static,
    ) -> Self {
        self.on_leave = Some(Box::new(rule));
        self
    }

    pub fn with_on_destroy(mut self, hook: impl Fn(&mut S) + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Box::new(hook));
        self
    }

    pub fn with_action(
        mut self,
        type_id: impl Into<String>,
        rule: impl Fn(&mut S, Value, &LandContext) -> Result<Value, RuleError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.actions.insert(type_id.into(), Box::new(rule));
        self
    }

    pub fn with_event(
        mut self,
        type_id: impl Into<String>,
        rule: impl Fn(&mut S, Value, &LandContext) -> Result<(), RuleError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.events.insert(type_id.into(), Box::new(rule));
        self
    }

    pub fn can_join(
        &self,
        state: &S,
        session: &PlayerSession,
        ctx: &LandContext,
    ) -> JoinDecision {
        (self.can_join)(state, session, ctx)
    }

    pub fn run_on_join(&self, state: &mut S, ctx: &LandContext) -> Result<(), RuleError> {
        match &self.on_join {
            Some(rule) => rule(state, ctx),
            None => Ok(()),
        }
    }

    pub fn run_on_leave(&self, state: &mut S, ctx: &LandContext) -> Result<(), RuleError> {
        match &self.on_leave {
            Some(rule) => rule(state, ctx),
            None => Ok(()),
        }
    }

    pub fn run_on_destroy(&self, state: &mut S) {
        if let Some(hook) = &self.on_destroy {
            hook(state);
        }
    }

    pub fn action(&self, type_id: &str) -> Option<&ActionRule<S>> {
        self.actions.get(type_id).map(Box::as_ref)
    }

    pub fn event(&self, type_id: &str) -> Option<&EventRule<S>> {
        self.events.get(type_id).map(Box::as_ref)
    }

    pub fn action_types(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }
}

impl<S> fmt::Debug for LandDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LandDefinition")
            .field("land_type", &self.land_type)
            .field("actions", &self.actions.len())
            .field("events", &self.events.len())
            .finish()
    }
}
