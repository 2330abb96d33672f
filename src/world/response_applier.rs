//! Applies relay frames to remote avatars and tracks who is online

use crate::config::SyncSettings;
use crate::networking::protocol::codec::{RelayFrame, RelayGroup};
use crate::world::avatar::Avatar;
use crate::world::host::{SceneHost, SyncNotifier};
use crate::world::roster::{OnlineRoster, RosterChange};
use std::collections::BTreeSet;
use tracing::{debug, info, trace};

/// Counts from applying one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
    pub roster: RosterChange,
}

#[derive(Debug, Default)]
pub struct ResponseApplier {
    roster: OnlineRoster,
}

impl ResponseApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn online(&self) -> &BTreeSet<String> {
        self.roster.online()
    }

    /// Forget the roster so the next frame primes it silently
    pub fn reset(&mut self) {
        self.roster.reset();
    }

    pub fn apply<H: SceneHost, N: SyncNotifier>(
        &mut self,
        frame: &RelayFrame,
        avatars: &mut [Avatar],
        host: &mut H,
        settings: &SyncSettings,
        notifier: &N,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut seen = BTreeSet::new();

        for group in &frame.groups {
            let Some(avatar) = avatars.iter_mut().find(|a| a.id == group.avatar_id()) else {
                trace!("Ignoring data for unknown avatar {}", group.avatar_id());
                report.skipped += 1;
                continue;
            };
            seen.insert(avatar.id.clone());

            let RelayGroup::Pose { sample, .. } = group else {
                // wardrobe changes go through the reconcile pass
                continue;
            };
            if avatar.is_local {
                report.skipped += 1;
                continue;
            }
            let Some(target) = avatar
                .targets
                .iter_mut()
                .find(|t| t.kind == Some(sample.target))
            else {
                debug!("{} has no {} target", avatar.id, sample.target);
                report.skipped += 1;
                continue;
            };

            if settings.update_positions {
                target.position = sample.position;
            }
            if settings.update_rotations {
                target.orientation = sample.orientation;
            }
            host.set_live_transform(&avatar.id, &target.name, target.position, target.orientation);
            report.applied += 1;
        }

        report.roster = self.roster.observe(seen);
        for id in &report.roster.left {
            info!("{} left", id);
            notifier.player_left(id);
        }
        for id in &report.roster.joined {
            info!("{} joined", id);
            notifier.player_joined(id);
        }
        report
    }
}
