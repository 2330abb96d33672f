//! Wardrobe change tracking
//!
//! Outbound, [`OutboundClothesFilter`] drops a request's trailing `CLOTHES`
//! group when the relay already has that exact value. It lives on the I/O
//! thread. Inbound, [`ClothingDiffTracker`] periodically reconciles remote
//! avatars' worn items against the last wardrobe payload received for them.
//! It lives on the tick side.

use crate::networking::protocol::codec;
use crate::world::avatar::Avatar;
use crate::world::host::SceneHost;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct OutboundClothesFilter {
    last_sent: Option<String>,
}

impl OutboundClothesFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip the trailing wardrobe group if it repeats the last sent one
    ///
    /// The group is kept when stripping it would leave a body the relay
    /// ignores. Returns the body to transmit and the wardrobe group it still
    /// carries, which must be passed to [`commit`](Self::commit) once fully
    /// sent.
    pub fn filter<'a>(&self, body: &'a str) -> (&'a str, Option<String>) {
        match codec::split_trailing_wardrobe(body) {
            Some((head, group))
                if self.last_sent.as_deref() == Some(group) && codec::relay_answers(head) =>
            {
                (head, None)
            }
            Some((_, group)) => (body, Some(group.to_string())),
            None => (body, None),
        }
    }

    /// Remember a wardrobe group the relay has now received
    pub fn commit(&mut self, sent: Option<String>) {
        if let Some(group) = sent {
            debug!("Wardrobe sent: {}", group);
            self.last_sent = Some(group);
        }
    }

}

/// Items to take off and put on to turn one wardrobe into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WardrobeDiff {
    pub to_remove: Vec<String>,
    pub to_add: Vec<String>,
}

impl WardrobeDiff {
    pub fn between(local: &BTreeSet<String>, remote: &BTreeSet<String>) -> Self {
        Self {
            to_remove: local.difference(remote).cloned().collect(),
            to_add: remote.difference(local).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

#[derive(Debug)]
pub struct ClothingDiffTracker {
    interval_ticks: u32,
    ticks: u64,
}

impl ClothingDiffTracker {
    pub fn new(interval_ticks: u32) -> Self {
        Self {
            interval_ticks: interval_ticks.max(1),
            ticks: 0,
        }
    }

    /// Count a tick; true when a reconcile pass is due
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        self.ticks % u64::from(self.interval_ticks) == 0
    }

    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    /// Record a wardrobe payload received for `avatar`
    pub fn capture(avatar: &mut Avatar, items: &[String]) {
        avatar.wardrobe.last_received = Some(items.iter().cloned().collect());
    }

    /// Bring every remote avatar's worn items in line with its last capture
    ///
    /// The host is re-read afterwards; a change it refused stays visible as
    /// a difference and is retried on the next pass. Returns the number of
    /// avatars that needed changes.
    pub fn reconcile<H: SceneHost>(&self, avatars: &mut [Avatar], host: &mut H) -> usize {
        let mut changed = 0;
        for avatar in avatars.iter_mut().filter(|a| !a.is_local) {
            let Some(remote) = avatar.wardrobe.last_received.as_ref() else {
                continue;
            };
            let diff = WardrobeDiff::between(&avatar.wardrobe.worn, remote);
            if diff.is_empty() {
                continue;
            }

            info!(
                "Updating wardrobe of {}: -{:?} +{:?}",
                avatar.id, diff.to_remove, diff.to_add
            );
            for item in &diff.to_remove {
                host.set_item_worn(&avatar.id, item, false);
            }
            for item in &diff.to_add {
                host.set_item_worn(&avatar.id, item, true);
            }
            avatar.wardrobe.worn = host.worn_items(&avatar.id);
            changed += 1;
        }
        changed
    }
}
