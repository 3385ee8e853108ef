//! # Teams
//!
//! Teams drive PvP friend/foe decisions and cosmetic tinting. The per-team data
//! is a static table indexed by the variant, so lookups are a bounds-checked
//! array read.

use serde::{Deserialize, Serialize};

/// Plain RGB triple. Components may exceed 1.0 for emissive tints.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
}

impl Rgb {
    /// Creates a color.
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Plain white.
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);
}

/// Presentation data attached to a team.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TeamData {
    /// Id of the wings texture.
    pub texture_id: u8,
    /// Team color, used by the interface.
    pub color: Rgb,
    /// Whether the wings use the special tint.
    pub special_wing: bool,
    /// Color applied to the wings.
    pub wing_color: Rgb,
}

impl TeamData {
    const fn plain(texture_id: u8, color: Rgb) -> Self {
        Self { texture_id, color, special_wing: false, wing_color: Rgb::WHITE }
    }

    const fn special(texture_id: u8, color: Rgb) -> Self {
        Self {
            texture_id,
            color,
            special_wing: true,
            wing_color: Rgb::new(2.0, 1.0, 12.0),
        }
    }
}

/// All teams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Team {
    /// Default team.
    #[default]
    Yellow = 0,
    /// Red team.
    Red = 1,
    /// Green team.
    Green = 2,
    /// Blue team.
    Blue = 3,
    /// Pink team, the only one with tinted wings.
    Pink = 4,
}

const TEAM_TABLE: [TeamData; Team::COUNT] = [
    TeamData::plain(0, Rgb::new(1.0, 0.8, 0.3)),
    TeamData::plain(2, Rgb::new(1.0, 0.2, 0.1)),
    TeamData::plain(3, Rgb::new(0.0, 0.9, 0.4)),
    TeamData::plain(1, Rgb::new(0.0, 0.5, 1.0)),
    TeamData::special(1, Rgb::new(1.0, 0.3, 0.7)),
];

impl Team {
    /// Number of teams.
    pub const COUNT: usize = 5;

    /// Every team in wire order.
    pub const ALL: [Self; Self::COUNT] = [Self::Yellow, Self::Red, Self::Green, Self::Blue, Self::Pink];

    /// Returns the static data for this team.
    #[must_use]
    pub const fn data(self) -> &'static TeamData {
        &TEAM_TABLE[self as usize]
    }

    /// Wire discriminant.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire discriminant.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Yellow),
            1 => Some(Self::Red),
            2 => Some(Self::Green),
            3 => Some(Self::Blue),
            4 => Some(Self::Pink),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pink_has_special_wings() {
        for team in Team::ALL {
            let data = team.data();
            assert_eq!(data.special_wing, team == Team::Pink);
            if data.special_wing {
                assert_eq!(data.wing_color, Rgb::new(2.0, 1.0, 12.0));
            } else {
                assert_eq!(data.wing_color, Rgb::WHITE);
            }
        }
    }

    #[test]
    fn test_texture_ids() {
        assert_eq!(Team::Yellow.data().texture_id, 0);
        assert_eq!(Team::Red.data().texture_id, 2);
        assert_eq!(Team::Green.data().texture_id, 3);
        assert_eq!(Team::Blue.data().texture_id, 1);
        assert_eq!(Team::Pink.data().texture_id, 1);
    }

    #[test]
    fn test_wire_discriminant() {
        for team in Team::ALL {
            assert_eq!(Team::from_u8(team.to_u8()), Some(team));
        }
        assert_eq!(Team::from_u8(5), None);
    }
}
