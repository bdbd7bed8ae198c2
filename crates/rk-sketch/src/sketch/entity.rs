//! Sketch Geometric Entities
//!
//! Defines the basic geometric elements that can be used in sketches and the
//! typed ids that reference them.

use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Raw id shared by all entity kinds of a sketch
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Id of a point entity
    PointId,
    "P"
);
entity_id!(
    /// Id of a line entity
    LineId,
    "L"
);
entity_id!(
    /// Id of a circle entity
    CircleId,
    "C"
);
entity_id!(
    /// Id of an arc entity
    ArcId,
    "A"
);

/// Reference to any sketch entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityRef {
    Point(PointId),
    Line(LineId),
    Circle(CircleId),
    Arc(ArcId),
}

impl EntityRef {
    /// Raw id of the referenced entity
    pub fn raw(self) -> u32 {
        match self {
            EntityRef::Point(id) => id.raw(),
            EntityRef::Line(id) => id.raw(),
            EntityRef::Circle(id) => id.raw(),
            EntityRef::Arc(id) => id.raw(),
        }
    }

    /// Type name of the referenced entity kind
    pub fn type_name(self) -> &'static str {
        match self {
            EntityRef::Point(_) => "Point",
            EntityRef::Line(_) => "Line",
            EntityRef::Circle(_) => "Circle",
            EntityRef::Arc(_) => "Arc",
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Point(id) => write!(f, "{}", id),
            EntityRef::Line(id) => write!(f, "{}", id),
            EntityRef::Circle(id) => write!(f, "{}", id),
            EntityRef::Arc(id) => write!(f, "{}", id),
        }
    }
}

impl From<PointId> for EntityRef {
    fn from(id: PointId) -> Self {
        EntityRef::Point(id)
    }
}

impl From<LineId> for EntityRef {
    fn from(id: LineId) -> Self {
        EntityRef::Line(id)
    }
}

impl From<CircleId> for EntityRef {
    fn from(id: CircleId) -> Self {
        EntityRef::Circle(id)
    }
}

impl From<ArcId> for EntityRef {
    fn from(id: ArcId) -> Self {
        EntityRef::Arc(id)
    }
}

/// Reference to a radius-bearing entity (circle or arc)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CurveId {
    Circle(CircleId),
    Arc(ArcId),
}

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", EntityRef::from(*self))
    }
}

impl From<CurveId> for EntityRef {
    fn from(id: CurveId) -> Self {
        match id {
            CurveId::Circle(c) => EntityRef::Circle(c),
            CurveId::Arc(a) => EntityRef::Arc(a),
        }
    }
}

impl From<CircleId> for CurveId {
    fn from(id: CircleId) -> Self {
        CurveId::Circle(id)
    }
}

impl From<ArcId> for CurveId {
    fn from(id: ArcId) -> Self {
        CurveId::Arc(id)
    }
}

/// A point in 2D space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Unique identifier
    pub id: PointId,
    /// Position in sketch coordinates
    pub position: DVec2,
    /// Excluded from the solver's variables
    pub fixed: bool,
    /// Display-only helper geometry
    pub construction: bool,
}

/// A line segment between two points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Unique identifier
    pub id: LineId,
    /// Start point
    pub start: PointId,
    /// End point
    pub end: PointId,
    /// Display-only helper geometry
    pub construction: bool,
}

/// A full circle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Unique identifier
    pub id: CircleId,
    /// Center point
    pub center: PointId,
    /// Radius
    pub radius: f64,
    /// Display-only helper geometry
    pub construction: bool,
}

/// A circular arc, counter-clockwise from `start_angle` to `end_angle`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    /// Unique identifier
    pub id: ArcId,
    /// Center point
    pub center: PointId,
    /// Radius
    pub radius: f64,
    /// Start angle in degrees
    pub start_angle: f64,
    /// End angle in degrees
    pub end_angle: f64,
    /// Display-only helper geometry
    pub construction: bool,
}

impl Arc {
    /// Counter-clockwise sweep from start to end, in `[0, 360)` degrees
    pub fn sweep_angle(&self) -> f64 {
        (self.end_angle - self.start_angle).rem_euclid(360.0)
    }
}

/// A geometric entity in a sketch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SketchEntity {
    Point(Point),
    Line(Line),
    Circle(Circle),
    Arc(Arc),
}

impl SketchEntity {
    /// Reference to this entity
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            SketchEntity::Point(p) => EntityRef::Point(p.id),
            SketchEntity::Line(l) => EntityRef::Line(l.id),
            SketchEntity::Circle(c) => EntityRef::Circle(c.id),
            SketchEntity::Arc(a) => EntityRef::Arc(a.id),
        }
    }

    /// Raw id of this entity
    pub fn raw_id(&self) -> u32 {
        self.entity_ref().raw()
    }

    /// Get the type name of this entity
    pub fn type_name(&self) -> &'static str {
        self.entity_ref().type_name()
    }

    /// Whether this is construction geometry
    pub fn is_construction(&self) -> bool {
        match self {
            SketchEntity::Point(p) => p.construction,
            SketchEntity::Line(l) => l.construction,
            SketchEntity::Circle(c) => c.construction,
            SketchEntity::Arc(a) => a.construction,
        }
    }

    /// Get all point IDs referenced by this entity
    pub fn referenced_points(&self) -> Vec<PointId> {
        match self {
            SketchEntity::Point(_) => vec![],
            SketchEntity::Line(l) => vec![l.start, l.end],
            SketchEntity::Circle(c) => vec![c.center],
            SketchEntity::Arc(a) => vec![a.center],
        }
    }
}
