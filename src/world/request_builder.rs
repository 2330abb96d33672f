//! Builds the per-tick request body for the local avatar

use crate::config::SyncSettings;
use crate::networking::protocol::codec::{self, PoseUpdate, Request, TargetSample};
use crate::world::avatar::Avatar;
use crate::world::host::SceneHost;
use tracing::{debug, warn};

/// Encode this tick's request, or an empty string when there is nothing to send
///
/// Reads live transforms from `host` and records them on `local` as the
/// last sent values.
pub fn build_request<H: SceneHost>(local: Option<&mut Avatar>, host: &H, settings: &SyncSettings) -> String {
    if settings.spectator_mode {
        return codec::encode_request(&Request::Spectator);
    }
    let Some(avatar) = local else {
        return String::new();
    };

    let mut samples = Vec::new();
    let mut first_unchanged = None;
    for target in &mut avatar.targets {
        let Some(kind) = target.kind else {
            continue;
        };
        if !settings.targets.is_updateable(kind) {
            continue;
        }
        let Some((position, orientation)) = host.live_transform(&avatar.id, &target.name) else {
            debug!("{} has no live transform for {}", avatar.id, target.name);
            continue;
        };
        target.position = position;
        target.orientation = orientation;

        let sample = TargetSample {
            target: kind,
            position,
            orientation,
        };
        if settings.send_only_changed && target.matches_last_sent(position, orientation) {
            first_unchanged.get_or_insert(sample);
            continue;
        }

        if settings.update_positions {
            target.last_sent_position = Some(position);
        }
        if settings.update_rotations {
            target.last_sent_orientation = Some(orientation);
        }
        samples.push(sample);
    }

    // the relay only answers requests that carry a pose, so an idle avatar
    // still sends one target to keep peer updates flowing
    if samples.is_empty() {
        match first_unchanged {
            Some(sample) => samples.push(sample),
            None => return String::new(),
        }
    }

    avatar.wardrobe.worn = host.worn_items(&avatar.id);
    let wardrobe = avatar
        .wardrobe
        .worn
        .iter()
        .filter(|item| {
            let safe = codec::is_wire_safe(item);
            if !safe {
                warn!("Item id {:?} cannot be sent, skipping it", item);
            }
            safe
        })
        .cloned()
        .collect();

    codec::encode_request(&Request::Pose(PoseUpdate {
        avatar_id: avatar.id.clone(),
        targets: samples,
        wardrobe: Some(wardrobe),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::protocol::{decode_request, TargetName};
    use crate::world::scene::InMemoryScene;
    use glam::{Quat, Vec3};

    fn local_avatar(scene: &InMemoryScene, id: &str) -> Avatar {
        let descriptor = scene
            .enumerate_controllable_avatars()
            .into_iter()
            .find(|d| d.id == id)
            .unwrap();
        Avatar::from_descriptor(descriptor, scene.worn_items(id), true)
    }

    fn pose(body: &str) -> PoseUpdate {
        match decode_request(body).unwrap() {
            Request::Pose(update) => update,
            Request::Spectator => panic!("expected a pose update"),
        }
    }

    #[test]
    fn spectator_mode_sends_sentinel_only() {
        let scene = InMemoryScene::new().with_full_rig("Alice");
        let mut avatar = local_avatar(&scene, "Alice");
        let settings = SyncSettings {
            spectator_mode: true,
            ..SyncSettings::default()
        };
        assert_eq!(build_request(Some(&mut avatar), &scene, &settings), "S");
        assert_eq!(build_request(None, &scene, &settings), "S");
    }

    #[test]
    fn sends_enabled_targets_and_full_wardrobe() {
        let mut scene = InMemoryScene::new().with_full_rig("Alice");
        scene.wear("Alice", "shoe2");
        scene.wear("Alice", "shoe1");
        let head = (Vec3::new(1.0, 2.0, 3.0), Quat::from_xyzw(0.0, 0.0, 0.0, 1.0));
        scene.move_target("Alice", "headControl", head.0, head.1);

        let mut avatar = local_avatar(&scene, "Alice");
        let mut settings = SyncSettings::default();
        settings.targets.set_all(false);
        settings.targets.set(TargetName::Head, true);

        let body = build_request(Some(&mut avatar), &scene, &settings);
        assert_eq!(body, "Alice;hc,1,2,3,1,0,0,0;CLOTHES,shoe1,shoe2");

        let head_target = avatar.target(TargetName::Head).unwrap();
        assert_eq!(head_target.last_sent_position, Some(head.0));
        assert_eq!(head_target.last_sent_orientation, Some(head.1));
    }

    #[test]
    fn disabled_tracking_leaves_snapshots_alone() {
        let scene = InMemoryScene::new().with_full_rig("Alice");
        let mut avatar = local_avatar(&scene, "Alice");
        let settings = SyncSettings {
            update_positions: false,
            ..SyncSettings::default()
        };
        build_request(Some(&mut avatar), &scene, &settings);
        let head = avatar.target(TargetName::Head).unwrap();
        assert_eq!(head.last_sent_position, None);
        assert_eq!(head.last_sent_orientation, Some(Quat::IDENTITY));
    }

    #[test]
    fn nothing_to_send_yields_empty_body() {
        let mut scene = InMemoryScene::new();
        scene.add_avatar("Alice", ["tailControl"]);
        let mut avatar = local_avatar(&scene, "Alice");
        assert_eq!(build_request(Some(&mut avatar), &scene, &SyncSettings::default()), "");
        assert_eq!(build_request(None, &scene, &SyncSettings::default()), "");
    }

    #[test]
    fn missing_live_transform_is_skipped() {
        let mut scene = InMemoryScene::new();
        scene.add_avatar("Alice", ["headControl", "lHandControl"]);
        let mut avatar = local_avatar(&scene, "Alice");
        scene.remove_target("Alice", "headControl");

        let update = pose(&build_request(Some(&mut avatar), &scene, &SyncSettings::default()));
        assert_eq!(update.targets.len(), 1);
        assert_eq!(update.targets[0].target, TargetName::LeftHand);
    }

    #[test]
    fn only_changed_targets_are_sent_when_requested() {
        let mut scene = InMemoryScene::new();
        scene.add_avatar("Alice", ["headControl", "lHandControl"]);
        let mut avatar = local_avatar(&scene, "Alice");
        let settings = SyncSettings {
            send_only_changed: true,
            ..SyncSettings::default()
        };

        assert_eq!(pose(&build_request(Some(&mut avatar), &scene, &settings)).targets.len(), 2);

        scene.move_target("Alice", "lHandControl", Vec3::X, Quat::IDENTITY);
        let update = pose(&build_request(Some(&mut avatar), &scene, &settings));
        assert_eq!(update.targets.len(), 1);
        assert_eq!(update.targets[0].target, TargetName::LeftHand);

        // idle avatar still sends one target so responses keep coming
        let update = pose(&build_request(Some(&mut avatar), &scene, &settings));
        assert_eq!(update.targets.len(), 1);
        assert!(update.wardrobe.is_some());
    }
}
