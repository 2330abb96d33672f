//! Contracts the embedding application implements
//!
//! The sync engine never talks to a scene graph or UI directly. It reads and
//! writes avatar state through [`SceneHost`] and surfaces user-facing events
//! through [`SyncNotifier`]. Both are only ever called from the tick side.

use crate::networking::telemetry::TelemetrySnapshot;
use glam::{Quat, Vec3};
use std::collections::BTreeSet;

/// A target as the host exposes it at enumeration time
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDescriptor {
    pub name: String,
    pub position: Vec3,
    pub orientation: Quat,
}

/// A controllable avatar as the host exposes it at enumeration time
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarDescriptor {
    pub id: String,
    pub targets: Vec<TargetDescriptor>,
}

pub trait SceneHost {
    /// Snapshot of every controllable avatar, taken once per client
    fn enumerate_controllable_avatars(&self) -> Vec<AvatarDescriptor>;

    /// Current transform of a target, `None` if the host no longer has it
    fn live_transform(&self, avatar_id: &str, target: &str) -> Option<(Vec3, Quat)>;

    fn set_live_transform(&mut self, avatar_id: &str, target: &str, position: Vec3, orientation: Quat);

    fn worn_items(&self, avatar_id: &str) -> BTreeSet<String>;

    /// Request an item be worn or removed; the host may refuse
    fn set_item_worn(&mut self, avatar_id: &str, item: &str, worn: bool);
}

pub trait SyncNotifier {
    fn player_joined(&self, avatar_id: &str);

    fn player_left(&self, avatar_id: &str);

    /// A connection ended in a fault; called once per fault
    fn fatal_connection_error(&self, message: &str);

    fn server_notice(&self, _message: &str) {}

    fn telemetry(&self, _snapshot: &TelemetrySnapshot) {}
}
