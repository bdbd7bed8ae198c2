//! Geometry Primitives
//!
//! Pure 2D queries over resolved sketch geometry. Sketch entities only store
//! ids and scalar parameters; the sketch resolves them into the value types
//! here before any measurement is taken.

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Direction reported for zero-length segments
pub const DEFAULT_DIRECTION: DVec2 = DVec2::X;

/// Lengths below this are treated as degenerate
pub const DEGENERATE_LENGTH: f64 = 1e-12;

/// Euclidean distance between two points
pub fn distance(a: DVec2, b: DVec2) -> f64 {
    (b - a).length()
}

/// Unsigned angle between two directions in degrees, in `[0, 180]`
pub fn angle_between(d1: DVec2, d2: DVec2) -> f64 {
    let cross = d1.perp_dot(d2);
    let dot = d1.dot(d2);
    cross.abs().atan2(dot).to_degrees()
}

/// A line segment with resolved endpoint positions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start position
    pub start: DVec2,
    /// End position
    pub end: DVec2,
}

impl Segment {
    /// Create a new segment
    pub fn new(start: DVec2, end: DVec2) -> Self {
        Self { start, end }
    }

    /// Vector from start to end
    pub fn vector(&self) -> DVec2 {
        self.end - self.start
    }

    /// Segment length
    pub fn length(&self) -> f64 {
        self.vector().length()
    }

    /// Whether the segment has (numerically) zero length
    pub fn is_degenerate(&self) -> bool {
        self.length() < DEGENERATE_LENGTH
    }

    /// Orientation of the segment in degrees, measured from +X
    pub fn angle(&self) -> f64 {
        let v = self.vector();
        v.y.atan2(v.x).to_degrees()
    }

    /// Unit direction from start to end
    ///
    /// A degenerate segment has no direction of its own and reports
    /// [`DEFAULT_DIRECTION`].
    pub fn direction(&self) -> DVec2 {
        let v = self.vector();
        let len = v.length();
        if len < DEGENERATE_LENGTH {
            DEFAULT_DIRECTION
        } else {
            v / len
        }
    }

    /// Midpoint of the segment
    pub fn midpoint(&self) -> DVec2 {
        (self.start + self.end) * 0.5
    }

    /// Projection parameter of `p` onto the segment, clamped to `[0, 1]`
    pub fn project(&self, p: DVec2) -> f64 {
        let v = self.vector();
        let len_sq = v.length_squared();
        if len_sq < DEGENERATE_LENGTH * DEGENERATE_LENGTH {
            return 0.0;
        }
        ((p - self.start).dot(v) / len_sq).clamp(0.0, 1.0)
    }

    /// Point at parameter `t` (0 = start, 1 = end)
    pub fn point_at(&self, t: f64) -> DVec2 {
        self.start + self.vector() * t
    }

    /// Closest point on the segment to `p`
    pub fn nearest_point(&self, p: DVec2) -> DVec2 {
        self.point_at(self.project(p))
    }

    /// Distance from `p` to the segment
    pub fn distance_to(&self, p: DVec2) -> f64 {
        distance(p, self.nearest_point(p))
    }

    /// Perpendicular distance from `p` to the infinite carrier line
    ///
    /// Falls back to the distance from the start point when the segment is
    /// degenerate.
    pub fn line_distance(&self, p: DVec2) -> f64 {
        if self.is_degenerate() {
            return distance(p, self.start);
        }
        self.direction().perp_dot(p - self.start).abs()
    }

    /// Mirror image of `p` across the carrier line
    pub fn reflect(&self, p: DVec2) -> DVec2 {
        let u = self.direction();
        let rel = p - self.start;
        let along = u * rel.dot(u);
        self.start + along * 2.0 - rel
    }
}

/// A circle (or the carrier circle of an arc) with a resolved center
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleShape {
    /// Center position
    pub center: DVec2,
    /// Radius
    pub radius: f64,
}

impl CircleShape {
    /// Create a new circle shape
    pub fn new(center: DVec2, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Closest point on the circle to `p`
    ///
    /// A query point at the center has no preferred direction; the point at
    /// [`DEFAULT_DIRECTION`] is returned.
    pub fn nearest_point(&self, p: DVec2) -> DVec2 {
        let offset = p - self.center;
        let len = offset.length();
        let dir = if len < DEGENERATE_LENGTH {
            DEFAULT_DIRECTION
        } else {
            offset / len
        };
        self.center + dir * self.radius
    }

    /// Distance from `p` to the circle
    pub fn distance_to(&self, p: DVec2) -> f64 {
        distance(p, self.nearest_point(p))
    }
}
