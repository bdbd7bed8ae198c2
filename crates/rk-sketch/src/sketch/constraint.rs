//! Sketch Constraints
//!
//! Defines geometric and dimensional constraints that can be applied
//! to sketch entities.

use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{CurveId, EntityRef, LineId, PointId};
use super::{Sketch, SketchError};

/// Id of a constraint; ids grow with insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(pub u32);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The relation a constraint imposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    // ============== Geometric Constraints ==============
    /// A point is pinned at a position; the point leaves the variable set
    Fixed {
        /// Point to fix
        point: PointId,
        /// Target position
        at: DVec2,
    },

    /// Two points are at the same location
    Coincident {
        /// First point
        point1: PointId,
        /// Second point
        point2: PointId,
    },

    /// A line is horizontal (parallel to X axis)
    Horizontal {
        /// Line to constrain
        line: LineId,
    },

    /// A line is vertical (parallel to Y axis)
    Vertical {
        /// Line to constrain
        line: LineId,
    },

    /// Two lines are parallel
    Parallel {
        /// First line
        line1: LineId,
        /// Second line
        line2: LineId,
    },

    /// Two lines are perpendicular
    Perpendicular {
        /// First line
        line1: LineId,
        /// Second line
        line2: LineId,
    },

    /// Two lines have equal length
    EqualLength {
        /// First line
        line1: LineId,
        /// Second line
        line2: LineId,
    },

    /// A point lies on a line segment
    PointOnLine {
        /// Point to constrain
        point: PointId,
        /// Target line
        line: LineId,
    },

    /// A point lies at the midpoint of a line
    Midpoint {
        /// Point to constrain
        point: PointId,
        /// Line
        line: LineId,
    },

    /// A line is tangent to a circle or arc
    Tangent {
        /// Line
        line: LineId,
        /// Circle or arc
        curve: CurveId,
    },

    /// Two circles/arcs share a center
    Concentric {
        /// First circle/arc
        curve1: CurveId,
        /// Second circle/arc
        curve2: CurveId,
    },

    /// Two circles/arcs have equal radius
    EqualRadius {
        /// First circle/arc
        curve1: CurveId,
        /// Second circle/arc
        curve2: CurveId,
    },

    /// A point lies on a circle or on the carrier circle of an arc
    PointOnCircle {
        /// Point to constrain
        point: PointId,
        /// Circle or arc
        curve: CurveId,
    },

    /// Two points are mirror images about a line
    Symmetric {
        /// First point
        point1: PointId,
        /// Second point
        point2: PointId,
        /// Symmetry axis
        axis: LineId,
    },

    // ============== Dimensional Constraints ==============
    /// Length of a line
    Length {
        /// Line to constrain
        line: LineId,
        /// Required length
        value: f64,
    },

    /// Distance between two points
    Distance {
        /// First point
        point1: PointId,
        /// Second point
        point2: PointId,
        /// Required distance
        value: f64,
    },

    /// Horizontal distance between two points
    HorizontalDistance {
        /// First point
        point1: PointId,
        /// Second point
        point2: PointId,
        /// Required horizontal distance
        value: f64,
    },

    /// Vertical distance between two points
    VerticalDistance {
        /// First point
        point1: PointId,
        /// Second point
        point2: PointId,
        /// Required vertical distance
        value: f64,
    },

    /// Angle between two lines
    Angle {
        /// First line
        line1: LineId,
        /// Second line
        line2: LineId,
        /// Angle in degrees, in `[0, 180]`
        value: f64,
    },

    /// Radius of a circle or arc
    Radius {
        /// Circle or arc to constrain
        curve: CurveId,
        /// Required radius
        value: f64,
    },

    /// Diameter of a circle or arc
    Diameter {
        /// Circle or arc to constrain
        curve: CurveId,
        /// Required diameter
        value: f64,
    },
}

impl ConstraintKind {
    /// Get the type name of this constraint
    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::Fixed { .. } => "Fixed",
            ConstraintKind::Coincident { .. } => "Coincident",
            ConstraintKind::Horizontal { .. } => "Horizontal",
            ConstraintKind::Vertical { .. } => "Vertical",
            ConstraintKind::Parallel { .. } => "Parallel",
            ConstraintKind::Perpendicular { .. } => "Perpendicular",
            ConstraintKind::EqualLength { .. } => "EqualLength",
            ConstraintKind::PointOnLine { .. } => "PointOnLine",
            ConstraintKind::Midpoint { .. } => "Midpoint",
            ConstraintKind::Tangent { .. } => "Tangent",
            ConstraintKind::Concentric { .. } => "Concentric",
            ConstraintKind::EqualRadius { .. } => "EqualRadius",
            ConstraintKind::PointOnCircle { .. } => "PointOnCircle",
            ConstraintKind::Symmetric { .. } => "Symmetric",
            ConstraintKind::Length { .. } => "Length",
            ConstraintKind::Distance { .. } => "Distance",
            ConstraintKind::HorizontalDistance { .. } => "HorizontalDistance",
            ConstraintKind::VerticalDistance { .. } => "VerticalDistance",
            ConstraintKind::Angle { .. } => "Angle",
            ConstraintKind::Radius { .. } => "Radius",
            ConstraintKind::Diameter { .. } => "Diameter",
        }
    }

    /// Get all entities referenced by this constraint
    pub fn referenced_entities(&self) -> Vec<EntityRef> {
        match self {
            ConstraintKind::Fixed { point, .. } => vec![(*point).into()],
            ConstraintKind::Coincident { point1, point2 }
            | ConstraintKind::Distance { point1, point2, .. }
            | ConstraintKind::HorizontalDistance { point1, point2, .. }
            | ConstraintKind::VerticalDistance { point1, point2, .. } => {
                vec![(*point1).into(), (*point2).into()]
            }
            ConstraintKind::Horizontal { line }
            | ConstraintKind::Vertical { line }
            | ConstraintKind::Length { line, .. } => vec![(*line).into()],
            ConstraintKind::Parallel { line1, line2 }
            | ConstraintKind::Perpendicular { line1, line2 }
            | ConstraintKind::EqualLength { line1, line2 }
            | ConstraintKind::Angle { line1, line2, .. } => {
                vec![(*line1).into(), (*line2).into()]
            }
            ConstraintKind::PointOnLine { point, line }
            | ConstraintKind::Midpoint { point, line } => {
                vec![(*point).into(), (*line).into()]
            }
            ConstraintKind::Tangent { line, curve } => vec![(*line).into(), (*curve).into()],
            ConstraintKind::Concentric { curve1, curve2 }
            | ConstraintKind::EqualRadius { curve1, curve2 } => {
                vec![(*curve1).into(), (*curve2).into()]
            }
            ConstraintKind::PointOnCircle { point, curve } => {
                vec![(*point).into(), (*curve).into()]
            }
            ConstraintKind::Symmetric {
                point1,
                point2,
                axis,
            } => vec![(*point1).into(), (*point2).into(), (*axis).into()],
            ConstraintKind::Radius { curve, .. } | ConstraintKind::Diameter { curve, .. } => {
                vec![(*curve).into()]
            }
        }
    }

    /// Check if this constraint references an entity
    pub fn references_entity(&self, entity: EntityRef) -> bool {
        self.referenced_entities().contains(&entity)
    }

    /// Number of degrees of freedom this constraint removes
    pub fn dof_weight(&self) -> usize {
        match self {
            ConstraintKind::Fixed { .. }
            | ConstraintKind::Coincident { .. }
            | ConstraintKind::Midpoint { .. }
            | ConstraintKind::Concentric { .. }
            | ConstraintKind::Symmetric { .. } => 2,
            _ => 1,
        }
    }

    /// Check if this is a dimensional constraint (has a value)
    pub fn is_dimensional(&self) -> bool {
        self.value().is_some()
    }

    /// Get the value of a dimensional constraint
    pub fn value(&self) -> Option<f64> {
        match self {
            ConstraintKind::Length { value, .. }
            | ConstraintKind::Distance { value, .. }
            | ConstraintKind::HorizontalDistance { value, .. }
            | ConstraintKind::VerticalDistance { value, .. }
            | ConstraintKind::Angle { value, .. }
            | ConstraintKind::Radius { value, .. }
            | ConstraintKind::Diameter { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Set the value of a dimensional constraint
    ///
    /// Returns false for constraints without a value.
    pub fn set_value(&mut self, new_value: f64) -> bool {
        match self {
            ConstraintKind::Length { value, .. }
            | ConstraintKind::Distance { value, .. }
            | ConstraintKind::HorizontalDistance { value, .. }
            | ConstraintKind::VerticalDistance { value, .. }
            | ConstraintKind::Angle { value, .. }
            | ConstraintKind::Radius { value, .. }
            | ConstraintKind::Diameter { value, .. } => {
                *value = new_value;
                true
            }
            _ => false,
        }
    }

    // ============== Factory Methods ==============

    /// Create a fixed constraint
    pub fn fixed(point: PointId, at: DVec2) -> Self {
        ConstraintKind::Fixed { point, at }
    }

    /// Create a coincident constraint
    pub fn coincident(point1: PointId, point2: PointId) -> Self {
        ConstraintKind::Coincident { point1, point2 }
    }

    /// Create a horizontal constraint
    pub fn horizontal(line: LineId) -> Self {
        ConstraintKind::Horizontal { line }
    }

    /// Create a vertical constraint
    pub fn vertical(line: LineId) -> Self {
        ConstraintKind::Vertical { line }
    }

    /// Create a parallel constraint
    pub fn parallel(line1: LineId, line2: LineId) -> Self {
        ConstraintKind::Parallel { line1, line2 }
    }

    /// Create a perpendicular constraint
    pub fn perpendicular(line1: LineId, line2: LineId) -> Self {
        ConstraintKind::Perpendicular { line1, line2 }
    }

    /// Create an equal length constraint
    pub fn equal_length(line1: LineId, line2: LineId) -> Self {
        ConstraintKind::EqualLength { line1, line2 }
    }

    /// Create a point-on-line constraint
    pub fn point_on_line(point: PointId, line: LineId) -> Self {
        ConstraintKind::PointOnLine { point, line }
    }

    /// Create a midpoint constraint
    pub fn midpoint(point: PointId, line: LineId) -> Self {
        ConstraintKind::Midpoint { point, line }
    }

    /// Create a tangent constraint
    pub fn tangent(line: LineId, curve: impl Into<CurveId>) -> Self {
        ConstraintKind::Tangent {
            line,
            curve: curve.into(),
        }
    }

    /// Create a concentric constraint
    pub fn concentric(curve1: impl Into<CurveId>, curve2: impl Into<CurveId>) -> Self {
        ConstraintKind::Concentric {
            curve1: curve1.into(),
            curve2: curve2.into(),
        }
    }

    /// Create an equal radius constraint
    pub fn equal_radius(curve1: impl Into<CurveId>, curve2: impl Into<CurveId>) -> Self {
        ConstraintKind::EqualRadius {
            curve1: curve1.into(),
            curve2: curve2.into(),
        }
    }

    /// Create a point-on-circle constraint
    pub fn point_on_circle(point: PointId, curve: impl Into<CurveId>) -> Self {
        ConstraintKind::PointOnCircle {
            point,
            curve: curve.into(),
        }
    }

    /// Create a symmetric constraint
    pub fn symmetric(point1: PointId, point2: PointId, axis: LineId) -> Self {
        ConstraintKind::Symmetric {
            point1,
            point2,
            axis,
        }
    }

    /// Create a length constraint
    pub fn length(line: LineId, value: f64) -> Self {
        ConstraintKind::Length { line, value }
    }

    /// Create a distance constraint
    pub fn distance(point1: PointId, point2: PointId, value: f64) -> Self {
        ConstraintKind::Distance {
            point1,
            point2,
            value,
        }
    }

    /// Create a horizontal distance constraint
    pub fn horizontal_distance(point1: PointId, point2: PointId, value: f64) -> Self {
        ConstraintKind::HorizontalDistance {
            point1,
            point2,
            value,
        }
    }

    /// Create a vertical distance constraint
    pub fn vertical_distance(point1: PointId, point2: PointId, value: f64) -> Self {
        ConstraintKind::VerticalDistance {
            point1,
            point2,
            value,
        }
    }

    /// Create an angle constraint (degrees)
    pub fn angle(line1: LineId, line2: LineId, value: f64) -> Self {
        ConstraintKind::Angle {
            line1,
            line2,
            value,
        }
    }

    /// Create a radius constraint
    pub fn radius(curve: impl Into<CurveId>, value: f64) -> Self {
        ConstraintKind::Radius {
            curve: curve.into(),
            value,
        }
    }

    /// Create a diameter constraint
    pub fn diameter(curve: impl Into<CurveId>, value: f64) -> Self {
        ConstraintKind::Diameter {
            curve: curve.into(),
            value,
        }
    }
}

/// A constraint owned by a sketch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Unique identifier
    pub id: ConstraintId,
    /// What the constraint requires
    pub kind: ConstraintKind,
    /// Disabled constraints are ignored everywhere
    pub enabled: bool,
    /// Reference (non-driving) constraints only measure
    pub driving: bool,
    /// Multiplier on the residual in the solver objective
    pub weight: f64,
}

impl Constraint {
    /// Create an enabled, driving constraint with unit weight
    pub fn new(id: ConstraintId, kind: ConstraintKind) -> Self {
        Self {
            id,
            kind,
            enabled: true,
            driving: true,
            weight: 1.0,
        }
    }

    /// Whether the constraint takes part in solving and DOF counting
    pub fn is_active(&self) -> bool {
        self.enabled && self.driving
    }

    /// Whether the constraint counts toward the weighted constraint total
    pub fn counts_toward_dof(&self) -> bool {
        self.is_active() && !matches!(self.kind, ConstraintKind::Fixed { .. })
    }

    /// Short label used in messages, e.g. `Length #4`
    pub fn label(&self) -> String {
        format!("{} {}", self.kind.name(), self.id)
    }

    /// Check that the constraint is structurally valid for `sketch`
    ///
    /// Every reference must resolve to an entity of the right kind, numeric
    /// targets must be finite and in range, and pairwise kinds must name two
    /// distinct entities.
    pub fn validate(&self, sketch: &Sketch) -> Result<(), SketchError> {
        let invalid = |reason: String| SketchError::InvalidConstraint {
            id: self.id,
            reason,
        };

        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(invalid(format!("weight {} must be positive", self.weight)));
        }

        for entity in self.kind.referenced_entities() {
            if !sketch.contains(entity) {
                return Err(invalid(format!(
                    "missing {} reference {}",
                    entity.type_name().to_lowercase(),
                    entity
                )));
            }
        }

        if let ConstraintKind::Fixed { at, .. } = &self.kind
            && !at.is_finite()
        {
            return Err(invalid("fixed position is not finite".to_string()));
        }

        if let Some(value) = self.kind.value() {
            if !value.is_finite() {
                return Err(invalid(format!("target value {} is not finite", value)));
            }
            match &self.kind {
                ConstraintKind::Radius { .. } | ConstraintKind::Diameter { .. } if value <= 0.0 => {
                    return Err(invalid(format!("target value {} must be positive", value)));
                }
                ConstraintKind::Angle { .. } if !(0.0..=180.0).contains(&value) => {
                    return Err(invalid(format!(
                        "angle {} must lie in [0, 180] degrees",
                        value
                    )));
                }
                _ if value < 0.0 => {
                    return Err(invalid(format!("target value {} must not be negative", value)));
                }
                _ => {}
            }
        }

        let same_twice = match &self.kind {
            ConstraintKind::Coincident { point1, point2 }
            | ConstraintKind::Distance { point1, point2, .. }
            | ConstraintKind::HorizontalDistance { point1, point2, .. }
            | ConstraintKind::VerticalDistance { point1, point2, .. }
            | ConstraintKind::Symmetric { point1, point2, .. } => point1 == point2,
            ConstraintKind::Parallel { line1, line2 }
            | ConstraintKind::Perpendicular { line1, line2 }
            | ConstraintKind::EqualLength { line1, line2 }
            | ConstraintKind::Angle { line1, line2, .. } => line1 == line2,
            ConstraintKind::Concentric { curve1, curve2 }
            | ConstraintKind::EqualRadius { curve1, curve2 } => curve1 == curve2,
            _ => false,
        };
        if same_twice {
            return Err(invalid("references the same entity twice".to_string()));
        }

        Ok(())
    }
}
