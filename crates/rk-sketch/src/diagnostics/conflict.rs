//! Conflict detection
//!
//! Structural rules catch the common contradictions without solving:
//! two targets for one measured quantity, constraints between pinned points,
//! orientations that collapse a line, and axis orientations that disagree.
//! When no rule proves the failure, the numeric pass shrinks the constraints
//! around the unsatisfied ones to an irreducible infeasible subset with a
//! deletion filter.

use glam::DVec2;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use super::{ConflictCategory, ConflictInfo, DiagnosticsConfig, Severity};
use crate::sketch::residual::constraint_error;
use crate::sketch::{
    Constraint, ConstraintId, ConstraintKind, CurveId, EntityRef, LineId, PointId, Sketch,
};
use crate::solver::{SketchSolver, SolveStatus};

/// Tolerance in degrees for matching angle targets to axis angles
const ANGLE_EPSILON: f64 = 1e-6;

pub(crate) fn find_conflicts(
    sketch: &Sketch,
    solver: &SketchSolver,
    config: &DiagnosticsConfig,
    numeric: bool,
) -> Vec<ConflictInfo> {
    let active: Vec<&Constraint> = sketch
        .constraints()
        .filter(|c| c.is_active() && c.validate(sketch).is_ok())
        .collect();

    let mut conflicts = Vec::new();
    for conflict in dimension_conflicts(sketch, &active, config) {
        push(&mut conflicts, conflict);
    }
    for conflict in pinned_conflicts(sketch, &active, &conflicts, config) {
        push(&mut conflicts, conflict);
    }
    for conflict in degenerate_conflicts(sketch, &active, config) {
        push(&mut conflicts, conflict);
    }
    for conflict in axis_conflicts(sketch, &active) {
        push(&mut conflicts, conflict);
    }

    let explained = conflicts.iter().any(|c| c.severity == Severity::Critical);
    if numeric && !explained {
        if let Some(conflict) = localize(sketch, &active, solver, config) {
            push(&mut conflicts, conflict);
        }
    }

    conflicts.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.constraints.cmp(&b.constraints))
    });
    tracing::debug!("Found {} conflict(s)", conflicts.len());
    conflicts
}

/// Keep only conflicts that are not explained by a smaller one
fn push(conflicts: &mut Vec<ConflictInfo>, conflict: ConflictInfo) {
    let covered = conflicts
        .iter()
        .any(|c| c.constraints.iter().all(|id| conflict.constraints.contains(id)));
    if !covered {
        conflicts.push(conflict);
    }
}

fn label(sketch: &Sketch, id: ConstraintId) -> String {
    sketch
        .constraint(id)
        .map(|c| c.label())
        .unwrap_or_else(|| id.to_string())
}

fn labels(sketch: &Sketch, ids: &[ConstraintId]) -> String {
    ids.iter()
        .map(|id| label(sketch, *id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sorted(ids: impl IntoIterator<Item = ConstraintId>) -> Vec<ConstraintId> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

fn ordered<T: Ord>(a: T, b: T) -> (T, T) {
    if a <= b { (a, b) } else { (b, a) }
}

// ============== Dimension targets ==============

/// A measured quantity that several constraints may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Quantity {
    Separation(PointId, PointId),
    HorizontalGap(PointId, PointId),
    VerticalGap(PointId, PointId),
    Angle(LineId, LineId),
    Radius(CurveId),
    Position(PointId),
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Separation(a, b) => write!(f, "the distance between {} and {}", a, b),
            Quantity::HorizontalGap(a, b) => {
                write!(f, "the horizontal distance between {} and {}", a, b)
            }
            Quantity::VerticalGap(a, b) => {
                write!(f, "the vertical distance between {} and {}", a, b)
            }
            Quantity::Angle(a, b) => write!(f, "the angle between {} and {}", a, b),
            Quantity::Radius(c) => write!(f, "the radius of {}", c),
            Quantity::Position(p) => write!(f, "the position of {}", p),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Scalar(f64),
    Position(DVec2),
}

impl Target {
    fn agrees(self, other: Target, tolerance: f64) -> bool {
        match (self, other) {
            (Target::Scalar(a), Target::Scalar(b)) => {
                (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
            }
            (Target::Position(a), Target::Position(b)) => {
                a.distance(b) <= tolerance * a.length().max(b.length()).max(1.0)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Scalar(v) => write!(f, "{}", v),
            Target::Position(p) => write!(f, "({}, {})", p.x, p.y),
        }
    }
}

fn target_of(sketch: &Sketch, kind: &ConstraintKind) -> Option<(Quantity, Target)> {
    let found = match *kind {
        ConstraintKind::Fixed { point, at } => (Quantity::Position(point), Target::Position(at)),
        ConstraintKind::Coincident { point1, point2 } => {
            let (a, b) = ordered(point1, point2);
            (Quantity::Separation(a, b), Target::Scalar(0.0))
        }
        ConstraintKind::Length { line, value } => {
            let line = sketch.line(line)?;
            let (a, b) = ordered(line.start, line.end);
            (Quantity::Separation(a, b), Target::Scalar(value))
        }
        ConstraintKind::Distance {
            point1,
            point2,
            value,
        } => {
            let (a, b) = ordered(point1, point2);
            (Quantity::Separation(a, b), Target::Scalar(value))
        }
        ConstraintKind::HorizontalDistance {
            point1,
            point2,
            value,
        } => {
            let (a, b) = ordered(point1, point2);
            (Quantity::HorizontalGap(a, b), Target::Scalar(value))
        }
        ConstraintKind::VerticalDistance {
            point1,
            point2,
            value,
        } => {
            let (a, b) = ordered(point1, point2);
            (Quantity::VerticalGap(a, b), Target::Scalar(value))
        }
        ConstraintKind::Angle {
            line1,
            line2,
            value,
        } => {
            let (a, b) = ordered(line1, line2);
            (Quantity::Angle(a, b), Target::Scalar(value))
        }
        ConstraintKind::Radius { curve, value } => (Quantity::Radius(curve), Target::Scalar(value)),
        ConstraintKind::Diameter { curve, value } => {
            (Quantity::Radius(curve), Target::Scalar(value / 2.0))
        }
        _ => return None,
    };
    Some(found)
}

/// Different targets for one measured quantity
fn dimension_conflicts(
    sketch: &Sketch,
    active: &[&Constraint],
    config: &DiagnosticsConfig,
) -> Vec<ConflictInfo> {
    let tolerance = config.redundancy_tolerance;
    let mut groups: BTreeMap<Quantity, Vec<(&Constraint, Target)>> = BTreeMap::new();
    for c in active {
        if let Some((quantity, target)) = target_of(sketch, &c.kind) {
            groups.entry(quantity).or_default().push((c, target));
        }
    }

    let mut found = Vec::new();
    for (quantity, members) in groups {
        let Some(&(_, reference)) = members.first() else {
            continue;
        };
        if members.iter().all(|(_, t)| t.agrees(reference, tolerance)) {
            continue;
        }
        let Some(newest) = members.iter().map(|(c, _)| c.id).max() else {
            continue;
        };

        let rest: Vec<Target> = members
            .iter()
            .filter(|(c, _)| c.id != newest)
            .map(|(_, t)| *t)
            .collect();
        let auto_fixable = rest.iter().all(|t| t.agrees(rest[0], tolerance));

        let targets: Vec<String> = members
            .iter()
            .map(|(c, t)| format!("{} = {}", c.label(), t))
            .collect();
        let category = match quantity {
            Quantity::Position(_) => ConflictCategory::FixedPositionConflict,
            _ => ConflictCategory::ConflictingDimensions,
        };

        found.push(ConflictInfo {
            constraints: sorted(members.iter().map(|(c, _)| c.id)),
            category,
            severity: Severity::Critical,
            explanation: format!("Different targets for {}: {}", quantity, targets.join(", ")),
            resolution: format!("Remove {} or change its value to match", label(sketch, newest)),
            auto_fixable,
        });
    }
    found
}

// ============== Pinned geometry ==============

/// Constraints whose points are all pinned and that do not hold there
fn pinned_conflicts(
    sketch: &Sketch,
    active: &[&Constraint],
    existing: &[ConflictInfo],
    config: &DiagnosticsConfig,
) -> Vec<ConflictInfo> {
    let pinned = sketch.pinned_points();
    if pinned.is_empty() {
        return Vec::new();
    }
    let mut held = sketch.clone();
    held.apply_pins(&pinned);

    let flagged: HashSet<ConstraintId> = existing
        .iter()
        .filter(|c| c.severity == Severity::Critical)
        .flat_map(|c| c.constraints.iter().copied())
        .collect();

    let mut found = Vec::new();
    for c in active {
        if flagged.contains(&c.id) {
            continue;
        }
        let point_geometry_only = c
            .kind
            .referenced_entities()
            .iter()
            .all(|e| matches!(e, EntityRef::Point(_) | EntityRef::Line(_)));
        if !point_geometry_only {
            continue;
        }
        let points = sketch.constraint_points(&c.kind);
        if points.is_empty() || !points.iter().all(|p| pinned.contains_key(p)) {
            continue;
        }
        let error = constraint_error(&held, c);
        if error <= config.solver.max_error_tolerance {
            continue;
        }

        let pins = active.iter().filter(|f| {
            matches!(f.kind, ConstraintKind::Fixed { point, .. } if points.contains(&point))
        });
        let members = sorted(pins.map(|f| f.id).chain(std::iter::once(c.id)));
        let auto_fixable = members.last() == Some(&c.id);
        let point_names: Vec<String> = points.iter().map(|p| p.to_string()).collect();

        let resolution = if auto_fixable {
            format!("Remove {}", c.label())
        } else {
            format!("Remove {} or unpin {}", c.label(), point_names.join(", "))
        };
        found.push(ConflictInfo {
            constraints: members,
            category: ConflictCategory::FixedPositionConflict,
            severity: Severity::Critical,
            explanation: format!(
                "{} cannot hold because {} cannot move (error {:.3e})",
                c.label(),
                point_names.join(", "),
                error
            ),
            resolution,
            auto_fixable,
        });
    }
    found
}

// ============== Degenerate orientation ==============

/// Constraints requiring a non-zero length for `line`
fn length_requirements<'a>(
    sketch: &Sketch,
    active: &[&'a Constraint],
    line: LineId,
    tolerance: f64,
) -> Vec<&'a Constraint> {
    let Some(endpoints) = sketch.line(line).map(|l| ordered(l.start, l.end)) else {
        return Vec::new();
    };
    active
        .iter()
        .copied()
        .filter(|c| match c.kind {
            ConstraintKind::Length { line: l, value } => l == line && value > tolerance,
            ConstraintKind::Distance {
                point1,
                point2,
                value,
            } => ordered(point1, point2) == endpoints && value > tolerance,
            _ => false,
        })
        .collect()
}

/// Horizontal with Vertical on one line, Parallel with Perpendicular on one
/// pair
fn degenerate_conflicts(
    sketch: &Sketch,
    active: &[&Constraint],
    config: &DiagnosticsConfig,
) -> Vec<ConflictInfo> {
    let tolerance = config.redundancy_tolerance;
    let mut found = Vec::new();

    for line in sketch.lines() {
        let horizontal = active
            .iter()
            .find(|c| matches!(c.kind, ConstraintKind::Horizontal { line: l } if l == line.id));
        let vertical = active
            .iter()
            .find(|c| matches!(c.kind, ConstraintKind::Vertical { line: l } if l == line.id));
        let (Some(h), Some(v)) = (horizontal, vertical) else {
            continue;
        };

        let lengths = length_requirements(sketch, active, line.id, tolerance);
        let members = sorted([h.id, v.id].into_iter().chain(lengths.iter().map(|c| c.id)));
        let mut explanation = format!(
            "{} and {} on {} collapse it to a single point",
            h.label(),
            v.label(),
            line.id
        );
        let severity = if lengths.is_empty() {
            Severity::High
        } else {
            let names: Vec<String> = lengths.iter().map(|c| c.label()).collect();
            explanation.push_str(&format!(", but {} require a non-zero length", names.join(", ")));
            Severity::Critical
        };
        found.push(degenerate(sketch, members, [h.id, v.id], severity, explanation));
    }

    for par in active {
        let ConstraintKind::Parallel { line1, line2 } = par.kind else {
            continue;
        };
        let pair = ordered(line1, line2);
        for perp in active {
            let ConstraintKind::Perpendicular { line1: m1, line2: m2 } = perp.kind else {
                continue;
            };
            if ordered(m1, m2) != pair {
                continue;
            }

            let first = length_requirements(sketch, active, line1, tolerance);
            let second = length_requirements(sketch, active, line2, tolerance);
            let mut explanation = format!(
                "{} and {} on {} and {} only hold if one of the lines has zero length",
                par.label(),
                perp.label(),
                line1,
                line2
            );
            let (severity, members) = if first.is_empty() || second.is_empty() {
                (Severity::High, sorted([par.id, perp.id]))
            } else {
                let lengths: Vec<&Constraint> = first.into_iter().chain(second).collect();
                let names: Vec<String> = lengths.iter().map(|c| c.label()).collect();
                explanation.push_str(&format!(
                    ", but {} require both to have length",
                    names.join(", ")
                ));
                (
                    Severity::Critical,
                    sorted([par.id, perp.id].into_iter().chain(lengths.iter().map(|c| c.id))),
                )
            };
            found.push(degenerate(sketch, members, [par.id, perp.id], severity, explanation));
        }
    }
    found
}

/// Dropping either constraint of `pair` removes the degeneracy; the length
/// requirements alone never do
fn degenerate(
    sketch: &Sketch,
    members: Vec<ConstraintId>,
    pair: [ConstraintId; 2],
    severity: Severity,
    explanation: String,
) -> ConflictInfo {
    let newest_of_pair = pair[0].max(pair[1]);
    let auto_fixable = members.last() == Some(&newest_of_pair);
    ConflictInfo {
        constraints: members,
        category: ConflictCategory::DegenerateGeometry,
        severity,
        explanation,
        resolution: format!("Remove {}", label(sketch, newest_of_pair)),
        auto_fixable,
    }
}

// ============== Axis orientation ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn turned(self) -> Self {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Relation {
    Same,
    Turned,
    Angle(f64),
}

#[derive(Debug, Clone)]
struct Oriented {
    axis: Axis,
    because: BTreeSet<ConstraintId>,
}

/// Axis orientations from Horizontal/Vertical, carried through Parallel and
/// Perpendicular, that contradict a relation between two lines
fn axis_conflicts(sketch: &Sketch, active: &[&Constraint]) -> Vec<ConflictInfo> {
    let mut axes: HashMap<LineId, Oriented> = HashMap::new();
    let mut relations: Vec<(LineId, LineId, Relation, ConstraintId)> = Vec::new();

    for c in active {
        let (line, axis) = match c.kind {
            ConstraintKind::Horizontal { line } => (line, Axis::X),
            ConstraintKind::Vertical { line } => (line, Axis::Y),
            ConstraintKind::Parallel { line1, line2 } => {
                relations.push((line1, line2, Relation::Same, c.id));
                continue;
            }
            ConstraintKind::Perpendicular { line1, line2 } => {
                relations.push((line1, line2, Relation::Turned, c.id));
                continue;
            }
            ConstraintKind::Angle {
                line1,
                line2,
                value,
            } => {
                relations.push((line1, line2, Relation::Angle(value), c.id));
                continue;
            }
            _ => continue,
        };
        axes.entry(line).or_insert_with(|| Oriented {
            axis,
            because: BTreeSet::from([c.id]),
        });
    }

    loop {
        let mut changed = false;
        for &(a, b, relation, id) in &relations {
            let turn = match relation {
                Relation::Same => false,
                Relation::Turned => true,
                Relation::Angle(_) => continue,
            };
            let (from, to) = match (axes.get(&a), axes.get(&b)) {
                (Some(_), None) => (a, b),
                (None, Some(_)) => (b, a),
                _ => continue,
            };
            if let Some(source) = axes.get(&from).cloned() {
                let mut because = source.because;
                because.insert(id);
                let axis = if turn { source.axis.turned() } else { source.axis };
                axes.insert(to, Oriented { axis, because });
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let near = |value: f64, target: f64| (value - target).abs() <= ANGLE_EPSILON;
    let mut found = Vec::new();
    for &(a, b, relation, id) in &relations {
        let (Some(oa), Some(ob)) = (axes.get(&a), axes.get(&b)) else {
            continue;
        };
        let same = oa.axis == ob.axis;
        let holds = match relation {
            Relation::Same => same,
            Relation::Turned => !same,
            Relation::Angle(v) if same => near(v, 0.0) || near(v, 180.0),
            Relation::Angle(v) => near(v, 90.0),
        };
        if holds {
            continue;
        }

        let members = sorted(
            oa.because
                .iter()
                .chain(ob.because.iter())
                .copied()
                .chain(std::iter::once(id)),
        );
        let names = labels(sketch, &members);
        found.push(ConflictInfo {
            category: ConflictCategory::OrientationConflict,
            severity: Severity::High,
            explanation: format!(
                "Axis orientations forced by {} contradict each other on {} and {}",
                names, a, b
            ),
            resolution: format!("Remove or change one of {}", names),
            auto_fixable: false,
            constraints: members,
        });
    }
    found
}

// ============== Numeric localization ==============

/// Irreducible infeasible subset around the constraints a full solve
/// leaves unsatisfied
fn localize(
    sketch: &Sketch,
    active: &[&Constraint],
    solver: &SketchSolver,
    config: &DiagnosticsConfig,
) -> Option<ConflictInfo> {
    let trial = solver.trial(sketch, None);
    if trial.accepted || trial.result.status == SolveStatus::NoSolver {
        return None;
    }

    let mut unsatisfied: Vec<ConstraintId> = active
        .iter()
        .filter(|c| constraint_error(&trial.sketch, c) > config.solver.max_error_tolerance)
        .map(|c| c.id)
        .collect();
    if unsatisfied.is_empty() {
        unsatisfied.extend(trial.result.worst_constraint);
    }
    if unsatisfied.is_empty() {
        return None;
    }

    // Feasibility trials under a budget that cannot settle prove nothing
    if trial.result.status == SolveStatus::DidntConverge {
        tracing::debug!("Solve did not settle; reporting unsatisfied constraints unnarrowed");
        return Some(numeric_conflict(sketch, unsatisfied, false));
    }

    let connected = connected_to(sketch, active, &unsatisfied);
    if connected.len() > config.max_conflict_candidates {
        tracing::debug!(
            "{} constraints connected to the failure; not narrowing",
            connected.len()
        );
        return Some(numeric_conflict(sketch, unsatisfied, false));
    }
    if feasible(sketch, solver, &connected) {
        return None;
    }

    tracing::debug!("Narrowing {} connected constraints", connected.len());
    let mut core = connected.clone();
    for id in &connected {
        let without: Vec<ConstraintId> = core.iter().copied().filter(|c| c != id).collect();
        if !feasible(sketch, solver, &without) {
            core = without;
        }
    }
    Some(numeric_conflict(sketch, core, true))
}

/// Active constraints sharing points, transitively, with `seeds`
fn connected_to(
    sketch: &Sketch,
    active: &[&Constraint],
    seeds: &[ConstraintId],
) -> Vec<ConstraintId> {
    let touched: Vec<(ConstraintId, Vec<PointId>)> = active
        .iter()
        .map(|c| (c.id, sketch.constraint_points(&c.kind)))
        .collect();

    let mut keep: BTreeSet<ConstraintId> = seeds.iter().copied().collect();
    let mut frontier: HashSet<PointId> = touched
        .iter()
        .filter(|(id, _)| keep.contains(id))
        .flat_map(|(_, points)| points.iter().copied())
        .collect();

    loop {
        let before = keep.len();
        for (id, points) in &touched {
            if !keep.contains(id) && points.iter().any(|p| frontier.contains(p)) {
                keep.insert(*id);
                frontier.extend(points.iter().copied());
            }
        }
        if keep.len() == before {
            break;
        }
    }
    keep.into_iter().collect()
}

/// Whether `subset` alone can be satisfied
fn feasible(sketch: &Sketch, solver: &SketchSolver, subset: &[ConstraintId]) -> bool {
    let mut subsystem = sketch.clone();
    let others: Vec<ConstraintId> = sketch
        .constraints()
        .map(|c| c.id)
        .filter(|id| !subset.contains(id))
        .collect();
    for id in others {
        if let Some(c) = subsystem.constraint_mut(id) {
            c.enabled = false;
        }
    }
    solver.trial(&subsystem, None).accepted
}

fn numeric_conflict(sketch: &Sketch, members: Vec<ConstraintId>, narrowed: bool) -> ConflictInfo {
    let members = sorted(members);
    let names = labels(sketch, &members);
    let explanation = if narrowed {
        format!(
            "{} cannot all be satisfied; removing any one of them makes the rest solvable",
            names
        )
    } else {
        format!("{} are not satisfied at the best solution found", names)
    };
    let resolution = members
        .last()
        .map(|newest| format!("Remove or relax {}", label(sketch, *newest)))
        .unwrap_or_default();
    ConflictInfo {
        category: categorize(sketch, &members),
        severity: Severity::High,
        explanation,
        resolution,
        auto_fixable: false,
        constraints: members,
    }
}

fn categorize(sketch: &Sketch, members: &[ConstraintId]) -> ConflictCategory {
    let kinds: Vec<&ConstraintKind> = members
        .iter()
        .filter_map(|id| sketch.constraint(*id))
        .map(|c| &c.kind)
        .collect();
    let orientation = |k: &ConstraintKind| {
        matches!(
            k,
            ConstraintKind::Horizontal { .. }
                | ConstraintKind::Vertical { .. }
                | ConstraintKind::Parallel { .. }
                | ConstraintKind::Perpendicular { .. }
                | ConstraintKind::Angle { .. }
        )
    };

    if kinds.iter().any(|k| matches!(k, ConstraintKind::Fixed { .. })) {
        ConflictCategory::FixedPositionConflict
    } else if kinds.iter().all(|k| k.is_dimensional()) {
        ConflictCategory::ConflictingDimensions
    } else if kinds.iter().all(|k| orientation(k)) {
        ConflictCategory::OrientationConflict
    } else {
        ConflictCategory::UnsatisfiableSubset
    }
}
