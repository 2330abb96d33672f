//! In-memory scene host
//!
//! A plain data implementation of [`SceneHost`] used by the headless client
//! and the tests. Items listed with [`InMemoryScene::refuse_item`] are never
//! put on, which mimics a host that silently rejects a wardrobe change.

use crate::networking::protocol::TargetName;
use crate::world::host::{AvatarDescriptor, SceneHost, TargetDescriptor};
use glam::{Quat, Vec3};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, Default)]
struct SceneAvatar {
    targets: BTreeMap<String, (Vec3, Quat)>,
    order: Vec<String>,
    worn: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryScene {
    avatars: BTreeMap<String, SceneAvatar>,
    refused_items: HashSet<String>,
    /// Number of `set_item_worn` calls, for inspection
    pub wardrobe_calls: usize,
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an avatar with the given targets at the origin
    pub fn add_avatar<I, S>(&mut self, id: &str, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let avatar = self.avatars.entry(id.to_string()).or_default();
        for name in targets {
            let name = name.into();
            if avatar
                .targets
                .insert(name.clone(), (Vec3::ZERO, Quat::IDENTITY))
                .is_none()
            {
                avatar.order.push(name);
            }
        }
    }

    /// Add an avatar exposing every target of the name table
    pub fn add_full_rig(&mut self, id: &str) {
        self.add_avatar(id, TargetName::all().map(TargetName::long_name));
    }

    pub fn with_full_rig(mut self, id: &str) -> Self {
        self.add_full_rig(id);
        self
    }

    pub fn remove_target(&mut self, avatar_id: &str, target: &str) {
        if let Some(avatar) = self.avatars.get_mut(avatar_id) {
            avatar.targets.remove(target);
        }
    }

    pub fn wear(&mut self, avatar_id: &str, item: &str) {
        if let Some(avatar) = self.avatars.get_mut(avatar_id) {
            avatar.worn.insert(item.to_string());
        }
    }

    pub fn take_off(&mut self, avatar_id: &str, item: &str) {
        if let Some(avatar) = self.avatars.get_mut(avatar_id) {
            avatar.worn.remove(item);
        }
    }

    pub fn refuse_item(&mut self, item: &str) {
        self.refused_items.insert(item.to_string());
    }

    pub fn move_target(&mut self, avatar_id: &str, target: &str, position: Vec3, orientation: Quat) {
        self.set_live_transform(avatar_id, target, position, orientation);
    }
}

impl SceneHost for InMemoryScene {
    fn enumerate_controllable_avatars(&self) -> Vec<AvatarDescriptor> {
        self.avatars
            .iter()
            .map(|(id, avatar)| AvatarDescriptor {
                id: id.clone(),
                targets: avatar
                    .order
                    .iter()
                    .filter_map(|name| {
                        avatar.targets.get(name).map(|(position, orientation)| TargetDescriptor {
                            name: name.clone(),
                            position: *position,
                            orientation: *orientation,
                        })
                    })
                    .collect(),
            })
            .collect()
    }

    fn live_transform(&self, avatar_id: &str, target: &str) -> Option<(Vec3, Quat)> {
        self.avatars.get(avatar_id)?.targets.get(target).copied()
    }

    fn set_live_transform(&mut self, avatar_id: &str, target: &str, position: Vec3, orientation: Quat) {
        if let Some(slot) = self
            .avatars
            .get_mut(avatar_id)
            .and_then(|avatar| avatar.targets.get_mut(target))
        {
            *slot = (position, orientation);
        }
    }

    fn worn_items(&self, avatar_id: &str) -> BTreeSet<String> {
        self.avatars
            .get(avatar_id)
            .map(|avatar| avatar.worn.clone())
            .unwrap_or_default()
    }

    fn set_item_worn(&mut self, avatar_id: &str, item: &str, worn: bool) {
        self.wardrobe_calls += 1;
        if worn && self.refused_items.contains(item) {
            return;
        }
        if worn {
            self.wear(avatar_id, item);
        } else {
            self.take_off(avatar_id, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_targets_in_insertion_order() {
        let mut scene = InMemoryScene::new();
        scene.add_avatar("Alice", ["headControl", "lHandControl"]);
        let avatars = scene.enumerate_controllable_avatars();
        assert_eq!(avatars.len(), 1);
        let names: Vec<&str> = avatars[0].targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["headControl", "lHandControl"]);
    }

    #[test]
    fn refused_items_stay_off() {
        let mut scene = InMemoryScene::new().with_full_rig("Bob");
        scene.refuse_item("cape");
        scene.set_item_worn("Bob", "cape", true);
        scene.set_item_worn("Bob", "hat", true);
        assert_eq!(scene.worn_items("Bob"), BTreeSet::from(["hat".to_string()]));
        assert_eq!(scene.wardrobe_calls, 2);
    }
}
