//! 2D Sketch
//!
//! A sketch owns its entities and constraints. Entities live in an arena and
//! are addressed by stable ids; geometry references points by id, and
//! constraints reference entities by typed ids.

mod constraint;
mod entity;
pub mod residual;
mod variables;

pub use constraint::{Constraint, ConstraintId, ConstraintKind};
pub use entity::{
    Arc, ArcId, Circle, CircleId, CurveId, EntityRef, Line, LineId, Point, PointId, SketchEntity,
};
pub(crate) use variables::VariableMap;

use glam::DVec2;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

use crate::diagnostics::{DiagnosticsResult, SketchAnalyzer, SuggestionInfo};
use crate::geometry::{CircleShape, Segment};
use crate::solver::{SketchSolver, SolverResult};

/// Error type for sketch operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SketchError {
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityRef),

    #[error("Constraint not found: {0}")]
    ConstraintNotFound(ConstraintId),

    #[error("Non-finite {field} on {entity}: {value}")]
    NonFinite {
        entity: EntityRef,
        field: &'static str,
        value: f64,
    },

    #[error("Invalid radius on {entity}: {radius} (must be positive)")]
    InvalidRadius { entity: EntityRef, radius: f64 },

    #[error("Invalid constraint {id}: {reason}")]
    InvalidConstraint { id: ConstraintId, reason: String },

    #[error("Constraint {0} has no value to edit")]
    NotDimensional(ConstraintId),
}

/// A 2D sketch
#[derive(Debug, Clone)]
pub struct Sketch {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    entities: Vec<SketchEntity>,
    index: HashMap<u32, usize>,
    constraints: Vec<Constraint>,
    next_entity_id: u32,
    next_constraint_id: u32,
    removed: BTreeSet<u32>,
}

impl Sketch {
    /// Create an empty sketch
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            entities: Vec::new(),
            index: HashMap::new(),
            constraints: Vec::new(),
            next_entity_id: 0,
            next_constraint_id: 0,
            removed: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    fn push_entity(&mut self, entity: SketchEntity) {
        self.index.insert(entity.raw_id(), self.entities.len());
        self.entities.push(entity);
    }

    fn reindex(&mut self) {
        self.index = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.raw_id(), i))
            .collect();
    }

    // ============== Construction ==============

    /// Add a free point
    pub fn add_point(&mut self, position: DVec2) -> PointId {
        let id = PointId(self.allocate());
        self.push_entity(SketchEntity::Point(Point {
            id,
            position,
            fixed: false,
            construction: false,
        }));
        id
    }

    /// Add a point that is never moved by the solver
    pub fn add_fixed_point(&mut self, position: DVec2) -> PointId {
        let id = self.add_point(position);
        if let Some(point) = self.point_mut(id) {
            point.fixed = true;
        }
        id
    }

    /// Add a line between two existing points
    pub fn add_line(&mut self, start: PointId, end: PointId) -> Result<LineId, SketchError> {
        self.require(start.into())?;
        self.require(end.into())?;
        let id = LineId(self.allocate());
        self.push_entity(SketchEntity::Line(Line {
            id,
            start,
            end,
            construction: false,
        }));
        Ok(id)
    }

    /// Add a circle around an existing center point
    pub fn add_circle(&mut self, center: PointId, radius: f64) -> Result<CircleId, SketchError> {
        self.require(center.into())?;
        let id = CircleId(self.allocate());
        check_radius(id.into(), radius)?;
        self.push_entity(SketchEntity::Circle(Circle {
            id,
            center,
            radius,
            construction: false,
        }));
        Ok(id)
    }

    /// Add an arc around an existing center point (angles in degrees)
    pub fn add_arc(
        &mut self,
        center: PointId,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    ) -> Result<ArcId, SketchError> {
        self.require(center.into())?;
        let id = ArcId(self.allocate());
        check_radius(id.into(), radius)?;
        check_finite(id.into(), "start angle", start_angle)?;
        check_finite(id.into(), "end angle", end_angle)?;
        self.push_entity(SketchEntity::Arc(Arc {
            id,
            center,
            radius,
            start_angle,
            end_angle,
            construction: false,
        }));
        Ok(id)
    }

    /// Add a constraint
    ///
    /// References are not checked here; structurally invalid constraints are
    /// reported by [`Sketch::invalid_constraints`] and by diagnostics.
    pub fn add_constraint(&mut self, kind: ConstraintKind) -> ConstraintId {
        let id = ConstraintId(self.next_constraint_id);
        self.next_constraint_id += 1;
        self.constraints.push(Constraint::new(id, kind));
        id
    }

    /// Pin a point at its current position
    pub fn fix_point(&mut self, point: PointId) -> Result<ConstraintId, SketchError> {
        let at = self
            .position(point)
            .ok_or(SketchError::EntityNotFound(point.into()))?;
        Ok(self.add_constraint(ConstraintKind::fixed(point, at)))
    }

    /// Add the constraint proposed by a diagnostics suggestion
    pub fn apply_suggestion(&mut self, suggestion: &SuggestionInfo) -> ConstraintId {
        self.add_constraint(suggestion.proposed.clone())
    }

    // ============== Lookup ==============

    /// Iterate over all entities in insertion order
    pub fn entities(&self) -> impl Iterator<Item = &SketchEntity> {
        self.entities.iter()
    }

    /// Get an entity by raw id
    pub fn entity(&self, raw: u32) -> Option<&SketchEntity> {
        self.index.get(&raw).map(|&i| &self.entities[i])
    }

    fn entity_mut(&mut self, raw: u32) -> Option<&mut SketchEntity> {
        match self.index.get(&raw) {
            Some(&i) => self.entities.get_mut(i),
            None => None,
        }
    }

    /// Whether `entity` resolves to an entity of the referenced kind
    pub fn contains(&self, entity: EntityRef) -> bool {
        self.entity(entity.raw())
            .is_some_and(|e| e.entity_ref() == entity)
    }

    fn require(&self, entity: EntityRef) -> Result<(), SketchError> {
        if self.contains(entity) {
            Ok(())
        } else {
            Err(SketchError::EntityNotFound(entity))
        }
    }

    /// Iterate over points
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.entities.iter().filter_map(|e| match e {
            SketchEntity::Point(p) => Some(p),
            _ => None,
        })
    }

    /// Iterate over lines
    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.entities.iter().filter_map(|e| match e {
            SketchEntity::Line(l) => Some(l),
            _ => None,
        })
    }

    /// Iterate over circles
    pub fn circles(&self) -> impl Iterator<Item = &Circle> {
        self.entities.iter().filter_map(|e| match e {
            SketchEntity::Circle(c) => Some(c),
            _ => None,
        })
    }

    /// Iterate over arcs
    pub fn arcs(&self) -> impl Iterator<Item = &Arc> {
        self.entities.iter().filter_map(|e| match e {
            SketchEntity::Arc(a) => Some(a),
            _ => None,
        })
    }

    pub fn point(&self, id: PointId) -> Option<&Point> {
        match self.entity(id.raw()) {
            Some(SketchEntity::Point(p)) => Some(p),
            _ => None,
        }
    }

    pub fn point_mut(&mut self, id: PointId) -> Option<&mut Point> {
        match self.entity_mut(id.raw()) {
            Some(SketchEntity::Point(p)) => Some(p),
            _ => None,
        }
    }

    pub fn line(&self, id: LineId) -> Option<&Line> {
        match self.entity(id.raw()) {
            Some(SketchEntity::Line(l)) => Some(l),
            _ => None,
        }
    }

    pub fn line_mut(&mut self, id: LineId) -> Option<&mut Line> {
        match self.entity_mut(id.raw()) {
            Some(SketchEntity::Line(l)) => Some(l),
            _ => None,
        }
    }

    pub fn circle(&self, id: CircleId) -> Option<&Circle> {
        match self.entity(id.raw()) {
            Some(SketchEntity::Circle(c)) => Some(c),
            _ => None,
        }
    }

    pub fn arc(&self, id: ArcId) -> Option<&Arc> {
        match self.entity(id.raw()) {
            Some(SketchEntity::Arc(a)) => Some(a),
            _ => None,
        }
    }

    /// Position of a point
    pub fn position(&self, id: PointId) -> Option<DVec2> {
        self.point(id).map(|p| p.position)
    }

    /// Move a point
    pub fn set_point_position(&mut self, id: PointId, position: DVec2) -> Result<(), SketchError> {
        let point = self
            .point_mut(id)
            .ok_or(SketchError::EntityNotFound(id.into()))?;
        point.position = position;
        Ok(())
    }

    /// Resolve a line into its endpoint positions
    pub fn segment(&self, id: LineId) -> Option<Segment> {
        let line = self.line(id)?;
        Some(Segment::new(self.position(line.start)?, self.position(line.end)?))
    }

    /// Center point of a circle or arc
    pub fn curve_center(&self, id: CurveId) -> Option<PointId> {
        match id {
            CurveId::Circle(c) => self.circle(c).map(|c| c.center),
            CurveId::Arc(a) => self.arc(a).map(|a| a.center),
        }
    }

    /// Radius of a circle or arc
    pub fn curve_radius(&self, id: CurveId) -> Option<f64> {
        match id {
            CurveId::Circle(c) => self.circle(c).map(|c| c.radius),
            CurveId::Arc(a) => self.arc(a).map(|a| a.radius),
        }
    }

    /// Resolve a circle or arc into its carrier circle
    pub fn curve_shape(&self, id: CurveId) -> Option<CircleShape> {
        let center = self.position(self.curve_center(id)?)?;
        Some(CircleShape::new(center, self.curve_radius(id)?))
    }

    /// Points a constraint touches, with lines and curves resolved to their
    /// defining points
    pub fn constraint_points(&self, kind: &ConstraintKind) -> Vec<PointId> {
        let mut points = Vec::new();
        for entity in kind.referenced_entities() {
            let touched = match entity {
                EntityRef::Point(p) => vec![p],
                other => self
                    .entity(other.raw())
                    .map(|e| e.referenced_points())
                    .unwrap_or_default(),
            };
            for p in touched {
                if !points.contains(&p) {
                    points.push(p);
                }
            }
        }
        points
    }

    // ============== Constraints ==============

    /// Iterate over constraints in insertion order
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    /// Number of constraints
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }

    pub fn constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.constraints.iter_mut().find(|c| c.id == id)
    }

    fn require_constraint(&mut self, id: ConstraintId) -> Result<&mut Constraint, SketchError> {
        self.constraint_mut(id)
            .ok_or(SketchError::ConstraintNotFound(id))
    }

    /// Enable or disable (suppress) a constraint
    pub fn set_constraint_enabled(
        &mut self,
        id: ConstraintId,
        enabled: bool,
    ) -> Result<(), SketchError> {
        self.require_constraint(id)?.enabled = enabled;
        Ok(())
    }

    /// Switch a constraint between driving and reference
    pub fn set_constraint_driving(
        &mut self,
        id: ConstraintId,
        driving: bool,
    ) -> Result<(), SketchError> {
        self.require_constraint(id)?.driving = driving;
        Ok(())
    }

    /// Edit the target value of a dimensional constraint
    pub fn set_constraint_value(
        &mut self,
        id: ConstraintId,
        value: f64,
    ) -> Result<(), SketchError> {
        let constraint = self.require_constraint(id)?;
        if constraint.kind.set_value(value) {
            Ok(())
        } else {
            Err(SketchError::NotDimensional(id))
        }
    }

    /// Remove a constraint
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Option<Constraint> {
        let index = self.constraints.iter().position(|c| c.id == id)?;
        Some(self.constraints.remove(index))
    }

    /// Constraints that fail structural validation, with the reason
    pub fn invalid_constraints(&self) -> Vec<(ConstraintId, String)> {
        self.constraints
            .iter()
            .filter(|c| c.enabled)
            .filter_map(|c| c.validate(self).err().map(|e| (c.id, e.to_string())))
            .collect()
    }

    // ============== Removal ==============

    /// Remove a point together with every curve built on it
    ///
    /// Constraints on removed entities stay until [`Sketch::purge_dangling`].
    pub fn remove_point(&mut self, id: PointId) -> Result<Point, SketchError> {
        let removed = match self.entity(id.raw()) {
            Some(SketchEntity::Point(p)) => p.clone(),
            _ => return Err(SketchError::EntityNotFound(id.into())),
        };
        let dependents: HashSet<u32> = self
            .entities
            .iter()
            .filter(|e| e.referenced_points().contains(&id))
            .map(|e| e.raw_id())
            .collect();
        self.removed.insert(id.raw());
        self.removed.extend(dependents.iter().copied());
        self.entities
            .retain(|e| e.raw_id() != id.raw() && !dependents.contains(&e.raw_id()));
        self.reindex();
        Ok(removed)
    }

    fn remove_curve(&mut self, entity: EntityRef) -> Result<SketchEntity, SketchError> {
        let index = match self.index.get(&entity.raw()) {
            Some(&i) if self.entities[i].entity_ref() == entity => i,
            _ => return Err(SketchError::EntityNotFound(entity)),
        };
        let removed = self.entities.remove(index);
        self.removed.insert(entity.raw());
        self.reindex();
        Ok(removed)
    }

    /// Remove a line; its endpoints stay
    pub fn remove_line(&mut self, id: LineId) -> Result<(), SketchError> {
        self.remove_curve(id.into()).map(|_| ())
    }

    /// Remove a circle; its center stays
    pub fn remove_circle(&mut self, id: CircleId) -> Result<(), SketchError> {
        self.remove_curve(id.into()).map(|_| ())
    }

    /// Remove an arc; its center stays
    pub fn remove_arc(&mut self, id: ArcId) -> Result<(), SketchError> {
        self.remove_curve(id.into()).map(|_| ())
    }

    /// Delete constraints that reference removed entities
    ///
    /// Returns the purged constraints in their original order.
    pub fn purge_dangling(&mut self) -> Vec<Constraint> {
        if self.removed.is_empty() {
            return Vec::new();
        }
        let removed = &self.removed;
        let (dangling, kept): (Vec<_>, Vec<_>) = self
            .constraints
            .drain(..)
            .partition(|c| c.kind.referenced_entities().iter().any(|e| removed.contains(&e.raw())));
        self.constraints = kept;
        for c in &dangling {
            tracing::debug!("Purged dangling constraint {}", c.label());
        }
        dangling
    }

    // ============== Solver support ==============

    /// Reject non-finite coordinates, radii and angles
    pub fn check_finite(&self) -> Result<(), SketchError> {
        for entity in &self.entities {
            let er = entity.entity_ref();
            match entity {
                SketchEntity::Point(p) => {
                    check_finite(er, "x coordinate", p.position.x)?;
                    check_finite(er, "y coordinate", p.position.y)?;
                }
                SketchEntity::Line(_) => {}
                SketchEntity::Circle(c) => check_finite(er, "radius", c.radius)?,
                SketchEntity::Arc(a) => {
                    check_finite(er, "radius", a.radius)?;
                    check_finite(er, "start angle", a.start_angle)?;
                    check_finite(er, "end angle", a.end_angle)?;
                }
            }
        }
        Ok(())
    }

    /// Points the solver must not move, with the position they are held at
    ///
    /// `fixed` points stay where they are; points targeted by an active
    /// `Fixed` constraint are held at the constraint's target.
    pub fn pinned_points(&self) -> HashMap<PointId, DVec2> {
        let mut pinned: HashMap<PointId, DVec2> = self
            .points()
            .filter(|p| p.fixed)
            .map(|p| (p.id, p.position))
            .collect();
        for c in self.constraints.iter().filter(|c| c.is_active()) {
            if let ConstraintKind::Fixed { point, at } = &c.kind
                && self.point(*point).is_some_and(|p| !p.fixed)
            {
                pinned.insert(*point, *at);
            }
        }
        pinned
    }

    /// Move pinned points onto their targets
    pub(crate) fn apply_pins(&mut self, pinned: &HashMap<PointId, DVec2>) {
        for (id, at) in pinned {
            if let Some(point) = self.point_mut(*id) {
                point.position = *at;
            }
        }
    }

    /// Solve the sketch with the default solver
    pub fn solve(&mut self) -> Result<SolverResult, SketchError> {
        SketchSolver::new().solve(self)
    }

    /// Run diagnostics with the default analyzer
    pub fn analyze(&self) -> Result<DiagnosticsResult, SketchError> {
        SketchAnalyzer::new().analyze(self)
    }
}

fn check_finite(entity: EntityRef, field: &'static str, value: f64) -> Result<(), SketchError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SketchError::NonFinite {
            entity,
            field,
            value,
        })
    }
}

fn check_radius(entity: EntityRef, radius: f64) -> Result<(), SketchError> {
    check_finite(entity, "radius", radius)?;
    if radius <= 0.0 {
        return Err(SketchError::InvalidRadius { entity, radius });
    }
    Ok(())
}
