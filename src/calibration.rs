use crate::constants::DEGREES_PER_TURN;
use crate::types::Direction;
use serde::{Deserialize, Serialize};

/// Maximum cumulative azimuth rotation allowed in each direction, expressed
/// as whole turns plus a remainder in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnLimit {
    pub negative_turns: u32,
    #[serde(default)]
    pub negative_offset_deg: f64,
    pub positive_turns: u32,
    #[serde(default)]
    pub positive_offset_deg: f64,
}

impl TurnLimit {
    pub fn symmetric(turns: u32) -> Self {
        TurnLimit {
            negative_turns: turns,
            negative_offset_deg: 0.0,
            positive_turns: turns,
            positive_offset_deg: 0.0,
        }
    }

    /// Builds a limit from plain degree magnitudes, e.g. 800° becomes
    /// 2 turns + 80°.
    pub fn from_degrees(negative: f64, positive: f64) -> Self {
        let (negative_turns, negative_offset_deg) = split_turns(negative.abs());
        let (positive_turns, positive_offset_deg) = split_turns(positive.abs());
        TurnLimit {
            negative_turns,
            negative_offset_deg,
            positive_turns,
            positive_offset_deg,
        }
    }

    /// Signed cumulative bound in the given direction.
    pub fn bound(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Positive => {
                self.positive_turns as f64 * DEGREES_PER_TURN + self.positive_offset_deg
            }
            Direction::Negative => {
                -(self.negative_turns as f64 * DEGREES_PER_TURN + self.negative_offset_deg)
            }
        }
    }

    pub fn contains(&self, cumulative: f64) -> bool {
        (self.bound(Direction::Negative)..=self.bound(Direction::Positive)).contains(&cumulative)
    }

    /// Offsets must be finite and below a full turn.
    pub fn is_valid(&self) -> bool {
        [self.negative_offset_deg, self.positive_offset_deg]
            .iter()
            .all(|offset| offset.is_finite() && *offset >= 0.0 && *offset < DEGREES_PER_TURN)
    }
}

impl Default for TurnLimit {
    fn default() -> Self {
        TurnLimit::symmetric(1)
    }
}

/// Magnitudes past `u32::MAX` turns leave an oversized remainder behind so
/// that `is_valid` rejects them.
fn split_turns(degrees: f64) -> (u32, f64) {
    let turns = (degrees / DEGREES_PER_TURN).floor().min(u32::MAX as f64);
    (turns as u32, degrees - turns * DEGREES_PER_TURN)
}

/// Tracked azimuth rotation since the power-on reference.
///
/// `offset_deg` is always normalised into `[0, 360)` so that the same
/// physical position has a single representation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WrapState {
    pub turns: i32,
    pub offset_deg: f64,
}

impl WrapState {
    pub fn from_degrees(cumulative: f64) -> Self {
        let turns = cumulative.div_euclid(DEGREES_PER_TURN);
        WrapState {
            turns: turns as i32,
            offset_deg: cumulative - turns * DEGREES_PER_TURN,
        }
    }

    pub fn cumulative_degrees(&self) -> f64 {
        self.turns as f64 * DEGREES_PER_TURN + self.offset_deg
    }

    /// Current bearing, `[0, 360)`.
    pub fn heading(&self) -> f64 {
        self.offset_deg
    }
}

/// Operator assertion of where the mount really is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recalibration {
    pub heading_deg: f64,
    pub turns: i32,
}

impl Recalibration {
    pub fn new(heading_deg: f64, turns: i32) -> Self {
        Recalibration { heading_deg, turns }
    }

    pub fn is_valid(&self) -> bool {
        self.heading_deg.is_finite()
    }

    pub fn into_state(self) -> WrapState {
        // Heading outside 0..360 is folded so the asserted turn count is
        // carried into the normalised representation.
        WrapState::from_degrees(self.turns as f64 * DEGREES_PER_TURN + self.heading_deg)
    }
}
