//! Eight-way direction model, counter-clockwise in 45° steps

use std::fmt;
use std::sync::OnceLock;

use super::geometry::{rotation_matrix, Rotation};
use super::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    ForwardLeft,
    Left,
    BackwardLeft,
    Backward,
    BackwardRight,
    Right,
    ForwardRight,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Forward,
        Direction::ForwardLeft,
        Direction::Left,
        Direction::BackwardLeft,
        Direction::Backward,
        Direction::BackwardRight,
        Direction::Right,
        Direction::ForwardRight,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Rotation of the direction relative to forward, in degrees
    pub fn degrees(self) -> f64 {
        self.index() as f64 * 45.0
    }

    pub fn rotation(self) -> Rotation {
        static ROTATIONS: OnceLock<[Rotation; 8]> = OnceLock::new();
        ROTATIONS.get_or_init(|| Direction::ALL.map(|d| rotation_matrix(d.degrees().to_radians())))
            [self.index()]
    }

    /// Next discrete position when moving `speed` cells from `current`
    /// towards `goal`, rotated by this direction
    ///
    /// Returns `current` unchanged when it already equals `goal`, since
    /// there is no heading to rotate.
    pub fn position(self, current: Position, goal: Position, speed: f64) -> Position {
        let view = goal - current;
        let length = view.norm();
        if length == 0.0 {
            return current.round();
        }

        let heading = self.rotation().apply(view * (1.0 / length));
        (current + heading * speed).round()
    }

    /// Buckets an angle in degrees into one of the eight sectors
    ///
    /// The angle is wrapped into `[0, 360)` and divided by 45, so each sector
    /// includes its lower bound only: 44.9° is forward, 45° is forward-left
    /// and -10° wraps to 350°, which is forward-right.
    pub fn from_angle(angle_degrees: f64) -> Direction {
        let wrapped = angle_degrees % 360.0;
        let wrapped = if wrapped < 0.0 { 360.0 + wrapped } else { wrapped };
        // tiny negative inputs round up to 360.0 exactly
        let sector = (wrapped / 45.0) as usize % Direction::ALL.len();
        Direction::ALL[sector]
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Forward => "forward",
            Direction::ForwardLeft => "forwardleft",
            Direction::Left => "left",
            Direction::BackwardLeft => "backwardleft",
            Direction::Backward => "backward",
            Direction::BackwardRight => "backwardright",
            Direction::Right => "right",
            Direction::ForwardRight => "forwardright",
        };
        f.write_str(name)
    }
}
