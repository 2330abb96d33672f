//! Target name table
//!
//! The host names its articulation points with verbose identifiers such as
//! `headControl`; the wire carries two-letter tokens such as `hc`. The table
//! below is the single source for both spellings and for the default
//! "updateable" toggle of each target.

use crate::networking::{SyncError, SyncResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetName {
    Control,
    Hip,
    Pelvis,
    Chest,
    Head,
    RightHand,
    LeftHand,
    RightFoot,
    LeftFoot,
    Neck,
    EyeTarget,
    RightNipple,
    LeftNipple,
    Testes,
    PenisBase,
    PenisMid,
    PenisTip,
    RightElbow,
    LeftElbow,
    RightKnee,
    LeftKnee,
    RightToe,
    LeftToe,
    Abdomen,
    Abdomen2,
    RightThigh,
    LeftThigh,
    RightArm,
    LeftArm,
    RightShoulder,
    LeftShoulder,
}

/// One row of the name table
#[derive(Debug)]
pub struct TargetEntry {
    pub name: TargetName,
    pub long: &'static str,
    pub short: &'static str,
    pub default_updateable: bool,
}

const fn entry(
    name: TargetName,
    long: &'static str,
    short: &'static str,
    default_updateable: bool,
) -> TargetEntry {
    TargetEntry { name, long, short, default_updateable }
}

// Row order must match the enum discriminants.
static TABLE: [TargetEntry; 31] = [
    entry(TargetName::Control, "control", "c", true),
    entry(TargetName::Hip, "hipControl", "Hc", true),
    entry(TargetName::Pelvis, "pelvisControl", "pc", true),
    entry(TargetName::Chest, "chestControl", "cc", true),
    entry(TargetName::Head, "headControl", "hc", true),
    entry(TargetName::RightHand, "rHandControl", "rh", true),
    entry(TargetName::LeftHand, "lHandControl", "lh", true),
    entry(TargetName::RightFoot, "rFootControl", "rf", true),
    entry(TargetName::LeftFoot, "lFootControl", "lf", true),
    entry(TargetName::Neck, "neckControl", "nc", false),
    entry(TargetName::EyeTarget, "eyeTargetControl", "et", false),
    entry(TargetName::RightNipple, "rNippleControl", "rn", false),
    entry(TargetName::LeftNipple, "lNippleControl", "ln", false),
    entry(TargetName::Testes, "testesControl", "tc", false),
    entry(TargetName::PenisBase, "penisBaseControl", "pb", false),
    entry(TargetName::PenisMid, "penisMidControl", "pm", false),
    entry(TargetName::PenisTip, "penisTipControl", "pt", false),
    entry(TargetName::RightElbow, "rElbowControl", "re", false),
    entry(TargetName::LeftElbow, "lElbowControl", "le", false),
    entry(TargetName::RightKnee, "rKneeControl", "rk", true),
    entry(TargetName::LeftKnee, "lKneeControl", "lk", true),
    entry(TargetName::RightToe, "rToeControl", "Rt", false),
    entry(TargetName::LeftToe, "lToeControl", "Lt", false),
    entry(TargetName::Abdomen, "abdomenControl", "ac", false),
    entry(TargetName::Abdomen2, "abdomen2Control", "a2", false),
    entry(TargetName::RightThigh, "rThighControl", "rt", true),
    entry(TargetName::LeftThigh, "lThighControl", "lt", true),
    entry(TargetName::RightArm, "rArmControl", "ra", true),
    entry(TargetName::LeftArm, "lArmControl", "la", true),
    entry(TargetName::RightShoulder, "rShoulderControl", "rs", true),
    entry(TargetName::LeftShoulder, "lShoulderControl", "ls", true),
];

impl TargetName {
    pub const COUNT: usize = 31;

    /// Every known target, in table order
    pub fn all() -> impl Iterator<Item = TargetName> {
        TABLE.iter().map(|e| e.name)
    }

    fn entry(self) -> &'static TargetEntry {
        &TABLE[self as usize]
    }

    pub fn long_name(self) -> &'static str {
        self.entry().long
    }

    pub fn short_token(self) -> &'static str {
        self.entry().short
    }

    pub fn default_updateable(self) -> bool {
        self.entry().default_updateable
    }

    pub fn from_long(long: &str) -> SyncResult<Self> {
        TABLE
            .iter()
            .find(|e| e.long == long)
            .map(|e| e.name)
            .ok_or_else(|| SyncError::NameNotFound { name: long.to_string() })
    }

    pub fn from_short(short: &str) -> SyncResult<Self> {
        TABLE
            .iter()
            .find(|e| e.short == short)
            .map(|e| e.name)
            .ok_or_else(|| SyncError::NameNotFound { name: short.to_string() })
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.long_name())
    }
}

/// Translate a verbose joint identifier into its wire token
pub fn long_to_short(long: &str) -> SyncResult<&'static str> {
    TargetName::from_long(long).map(TargetName::short_token)
}

/// Translate a wire token back into the verbose joint identifier
pub fn short_to_long(short: &str) -> SyncResult<&'static str> {
    TargetName::from_short(short).map(TargetName::long_name)
}
