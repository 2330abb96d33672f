use std::collections::BTreeSet;

/// Avatars that appeared or vanished between two frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterChange {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

impl RosterChange {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Set of avatar ids present in the latest relay frame
///
/// The first frame after a reset only primes the roster; it never yields
/// join events for everyone already online.
#[derive(Debug, Default)]
pub struct OnlineRoster {
    online: BTreeSet<String>,
    primed: bool,
}

impl OnlineRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, seen: BTreeSet<String>) -> RosterChange {
        let change = if self.primed {
            RosterChange {
                joined: seen.difference(&self.online).cloned().collect(),
                left: self.online.difference(&seen).cloned().collect(),
            }
        } else {
            RosterChange::default()
        };
        self.online = seen;
        self.primed = true;
        change
    }

    pub fn online(&self) -> &BTreeSet<String> {
        &self.online
    }

    pub fn reset(&mut self) {
        self.online.clear();
        self.primed = false;
    }
}
