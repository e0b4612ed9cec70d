//! Vector math on lane/cell positions
//!
//! All vectors are `(lane, cell)` pairs; angles handed in or out are in
//! degrees unless a function says otherwise.

use super::types::{CellOffset, Position};

/// 2x2 rotation matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation([[f64; 2]; 2]);

impl Rotation {
    pub fn apply(&self, vector: Position) -> Position {
        let [[a, b], [c, d]] = self.0;
        Position::new(
            a * vector.lane + b * vector.cell,
            c * vector.lane + d * vector.cell,
        )
    }

    pub fn matrix(&self) -> [[f64; 2]; 2] {
        self.0
    }
}

/// Creates the rotation matrix for an angle given in radians
///
/// See <https://en.wikipedia.org/wiki/Rotation_matrix>
pub fn rotation_matrix(angle_radians: f64) -> Rotation {
    let (sin, cos) = angle_radians.sin_cos();
    Rotation([[cos, sin], [-sin, cos]])
}

/// Euclidean distance between two points
pub fn distance(a: Position, b: Position) -> f64 {
    (b - a).norm()
}

/// Angle between two vectors in degrees
///
/// Returns `None` when either vector has zero length.
pub fn angle(a: Position, b: Position) -> Option<f64> {
    let first = a.norm();
    let second = b.norm();
    if first == 0.0 || second == 0.0 {
        return None;
    }

    let cosine = (a.dot(&b) / (first * second)).clamp(-1.0, 1.0);
    Some(cosine.acos().to_degrees())
}

/// All integer offsets within `radius` of the origin, row-major by lane
pub fn cells_in_circle(radius: u32) -> Vec<CellOffset> {
    let radius = i64::from(radius);
    let limit = radius * radius;

    (-radius..=radius)
        .flat_map(|y| (-radius..=radius).map(move |x| (y, x)))
        .filter(|(y, x)| y * y + x * x <= limit)
        .collect()
}

/// Circle offsets whose `atan2(y, x)` angle lies in `[from, to]` degrees
pub fn cells_in_arc(radius: u32, from_degrees: f64, to_degrees: f64) -> Vec<CellOffset> {
    cells_in_circle(radius)
        .into_iter()
        .filter(|(y, x)| {
            let angle = (*y as f64).atan2(*x as f64).to_degrees();
            angle >= from_degrees && angle <= to_degrees
        })
        .collect()
}

/// Offsets inside a view cone of `view_angle` degrees around the lane axis
///
/// Keeps the historical boundary test: the angle is taken from
/// `atan(|y| / |x|)`, so the cone is mirrored into every quadrant, the origin
/// is excluded (0/0) and the upper bound is inclusive while the wrap-around
/// bound `>= 360 - half` can never match for cones narrower than 540°.
pub fn cells_in_view(radius: u32, view_angle: f64) -> Vec<CellOffset> {
    let half = 0.5 * view_angle;
    let radius = i64::from(radius);

    (-radius..=radius)
        .flat_map(|y| (-radius..=radius).map(move |x| (y, x)))
        .filter(|(y, x)| inside_view_angle(*y as f64, *x as f64, half))
        .collect()
}

fn inside_view_angle(y: f64, x: f64, half_angle: f64) -> bool {
    let angle = (y.abs() / x.abs()).atan().to_degrees();
    (!angle.is_nan() && angle >= 360.0 - half_angle) || angle <= half_angle
}

/// Liang-Barsky clipping of a segment against an axis-aligned rectangle
///
/// Returns the part of `start..end` inside `[rect_min, rect_max]`, or `None`
/// when the segment misses the rectangle.
pub fn line_clip(
    rect_min: Position,
    rect_max: Position,
    start: Position,
    end: Position,
) -> Option<(Position, Position)> {
    let delta = end - start;
    let p = [-delta.cell, delta.cell, -delta.lane, delta.lane];
    let q = [
        start.cell - rect_min.cell,
        rect_max.cell - start.cell,
        start.lane - rect_min.lane,
        rect_max.lane - start.lane,
    ];

    let mut u1 = 0.0_f64;
    let mut u2 = 1.0_f64;

    for (p, q) in p.iter().zip(q.iter()) {
        if *p == 0.0 {
            // parallel to this edge and outside of it
            if *q < 0.0 {
                return None;
            }
            continue;
        }

        let t = q / p;
        if *p < 0.0 {
            u1 = u1.max(t);
        } else {
            u2 = u2.min(t);
        }
    }

    if u1 > u2 {
        return None;
    }

    Some((start + delta * u1, start + delta * u2))
}
