//! Reference frame names.
//!
//! A frame is a named, possibly-moving coordinate space (a planet, a ship).
//! Only the frames listed in [`FrameName::WHITELIST`] are tracked across
//! processes; anything else a detector reports is invisible to the protocol.
//! `Sun` is the default/world frame and deliberately not whitelisted: it is
//! the fallback, never an assignment.

use serde::{Deserialize, Serialize};

/// Frames known to the sync layer. The wire carries the `i32` ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum FrameName {
    Sun = 0,
    SunStation = 1,
    TimberHearth = 2,
    TimberMoon = 3,
    BrittleHollow = 4,
    GiantsDeep = 5,
    DarkBramble = 6,
    Comet = 7,
    QuantumMoon = 8,
    WhiteHole = 9,
    Ship = 10,
}

impl FrameName {
    /// Frames eligible for cross-process tracking.
    pub const WHITELIST: &'static [FrameName] = &[
        FrameName::SunStation,
        FrameName::TimberHearth,
        FrameName::TimberMoon,
        FrameName::BrittleHollow,
        FrameName::GiantsDeep,
        FrameName::DarkBramble,
        FrameName::Comet,
        FrameName::QuantumMoon,
        FrameName::WhiteHole,
        FrameName::Ship,
    ];

    pub const ALL: &'static [FrameName] = &[
        FrameName::Sun,
        FrameName::SunStation,
        FrameName::TimberHearth,
        FrameName::TimberMoon,
        FrameName::BrittleHollow,
        FrameName::GiantsDeep,
        FrameName::DarkBramble,
        FrameName::Comet,
        FrameName::QuantumMoon,
        FrameName::WhiteHole,
        FrameName::Ship,
    ];

    /// Wire ordinal.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Reverse of [`FrameName::id`]. Unknown ordinals (peer running a newer
    /// whitelist) resolve to `None`.
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.id() == id)
    }

    pub fn is_whitelisted(self) -> bool {
        Self::WHITELIST.contains(&self)
    }

    /// Parses a detector-reported frame name. Unknown names are not an
    /// error; they are simply outside the protocol.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameName::Sun => "Sun",
            FrameName::SunStation => "SunStation",
            FrameName::TimberHearth => "TimberHearth",
            FrameName::TimberMoon => "TimberMoon",
            FrameName::BrittleHollow => "BrittleHollow",
            FrameName::GiantsDeep => "GiantsDeep",
            FrameName::DarkBramble => "DarkBramble",
            FrameName::Comet => "Comet",
            FrameName::QuantumMoon => "QuantumMoon",
            FrameName::WhiteHole => "WhiteHole",
            FrameName::Ship => "Ship",
        }
    }
}

impl std::fmt::Display for FrameName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        for &frame in FrameName::ALL {
            assert_eq!(FrameName::from_id(frame.id()), Some(frame));
        }
        assert_eq!(FrameName::from_id(-1), None);
        assert_eq!(FrameName::from_id(9999), None);
    }

    #[test]
    fn parse_known_and_unknown() {
        assert_eq!(FrameName::parse("TimberHearth"), Some(FrameName::TimberHearth));
        assert_eq!(FrameName::parse("Ship"), Some(FrameName::Ship));
        assert_eq!(FrameName::parse("CampfireTrigger"), None);
    }

    #[test]
    fn default_frame_is_not_whitelisted() {
        assert!(!FrameName::Sun.is_whitelisted());
        assert!(FrameName::TimberHearth.is_whitelisted());
        assert!(!FrameName::WHITELIST.contains(&FrameName::Sun));
    }
}
