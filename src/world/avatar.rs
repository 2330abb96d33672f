use crate::networking::protocol::TargetName;
use crate::world::host::{AvatarDescriptor, TargetDescriptor};
use glam::{Quat, Vec3};
use std::collections::BTreeSet;
use tracing::debug;

/// A named articulation point of an avatar
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Name as the host spells it
    pub name: String,
    /// `None` when the host exposes a controller the wire protocol has no token for
    pub kind: Option<TargetName>,
    pub position: Vec3,
    pub orientation: Quat,
    pub last_sent_position: Option<Vec3>,
    pub last_sent_orientation: Option<Quat>,
}

impl Target {
    pub fn from_descriptor(descriptor: TargetDescriptor) -> Self {
        let kind = TargetName::from_long(&descriptor.name).ok();
        if kind.is_none() {
            debug!("Target {} has no wire token, it will not be synced", descriptor.name);
        }
        Self {
            name: descriptor.name,
            kind,
            position: descriptor.position,
            orientation: descriptor.orientation,
            last_sent_position: None,
            last_sent_orientation: None,
        }
    }

    /// Whether the given transform matches what was last sent
    pub fn matches_last_sent(&self, position: Vec3, orientation: Quat) -> bool {
        self.last_sent_position == Some(position) && self.last_sent_orientation == Some(orientation)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WardrobeState {
    pub worn: BTreeSet<String>,
    /// Item set of the last wardrobe payload received for this avatar
    pub last_received: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Avatar {
    pub id: String,
    pub targets: Vec<Target>,
    pub wardrobe: WardrobeState,
    pub is_local: bool,
}

impl Avatar {
    pub fn from_descriptor(descriptor: AvatarDescriptor, worn: BTreeSet<String>, is_local: bool) -> Self {
        Self {
            id: descriptor.id,
            targets: descriptor
                .targets
                .into_iter()
                .map(Target::from_descriptor)
                .collect(),
            wardrobe: WardrobeState {
                worn,
                last_received: None,
            },
            is_local,
        }
    }

    pub fn target(&self, kind: TargetName) -> Option<&Target> {
        self.targets.iter().find(|t| t.kind == Some(kind))
    }

    /// Forget per-session state so the next connection starts clean
    pub fn reset_session_state(&mut self) {
        for target in &mut self.targets {
            target.last_sent_position = None;
            target.last_sent_orientation = None;
        }
        self.wardrobe.last_received = None;
    }
}
