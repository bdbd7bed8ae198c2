//! Redundancy detection
//!
//! A constraint is redundant when the rest of the system already implies
//! it. Two checks must both pass: the constraint holds at the solution of
//! the remaining constraints, and its Jacobian rows lie in the row space of
//! the remainder's Jacobian. The second check rejects constraints that only
//! hold because free geometry happens to sit in a satisfying spot.
//!
//! Candidates are tested newest first, and a constraint found redundant stays
//! excluded while testing older ones, so of two mutually implied constraints
//! only the later is reported.

use nalgebra::DMatrix;
use std::collections::HashSet;

use super::DiagnosticsConfig;
use crate::dof::DofAnalysis;
use crate::sketch::residual::{component_count, constraint_error};
use crate::sketch::{Constraint, ConstraintId, Sketch, VariableMap};
use crate::solver::SketchSolver;
use crate::solver::problem::SketchProblem;

pub(crate) struct Redundancy {
    pub id: ConstraintId,
    pub reason: String,
}

pub(crate) fn find_redundant(
    sketch: &Sketch,
    solver: &SketchSolver,
    config: &DiagnosticsConfig,
) -> Vec<Redundancy> {
    let candidates: Vec<ConstraintId> = sketch
        .constraints()
        .filter(|c| c.counts_toward_dof())
        .map(|c| c.id)
        .collect();
    tracing::debug!(
        "Testing {} of {} constraints for redundancy",
        candidates.len().min(config.max_redundancy_candidates),
        candidates.len()
    );

    let mut excluded: HashSet<ConstraintId> = HashSet::new();
    let mut found = Vec::new();

    for &id in candidates.iter().rev().take(config.max_redundancy_candidates) {
        let Some(candidate) = sketch.constraint(id) else {
            continue;
        };

        let mut remainder = sketch.clone();
        for c in excluded.iter().chain(std::iter::once(&id)) {
            if let Some(c) = remainder.constraint_mut(*c) {
                c.enabled = false;
            }
        }

        let trial = solver.trial(&remainder, None);
        if !trial.accepted {
            continue;
        }
        let error = constraint_error(&trial.sketch, candidate);
        if error > config.redundancy_tolerance {
            continue;
        }
        if !in_row_space(&trial.sketch, candidate, config.rank_tolerance) {
            tracing::debug!("{} holds but is not implied", candidate.label());
            continue;
        }

        let reason = describe(sketch, &remainder, candidate);
        tracing::debug!("{} is redundant: {}", candidate.label(), reason);
        excluded.insert(id);
        found.push(Redundancy { id, reason });
    }

    found.sort_by_key(|r| r.id);
    found
}

/// Whether the Jacobian rows of `candidate` are spanned by those of the
/// active constraints of `state`
fn in_row_space(state: &Sketch, candidate: &Constraint, tolerance: f64) -> bool {
    let vars = VariableMap::build(state);
    if vars.is_empty() {
        return true;
    }

    let remainder: Vec<Constraint> = state
        .constraints()
        .filter(|c| c.is_active())
        .cloned()
        .collect();
    let n_remainder: usize = remainder.iter().map(|c| component_count(&c.kind)).sum();
    let mut rows = remainder;
    rows.push(candidate.clone());

    let mut problem = SketchProblem::with_constraints(state.clone(), vars, rows, 0.0);
    let x = problem.initial_values();
    let jacobian = problem.constraint_jacobian(&x);

    let remainder_rank = numeric_rank(&jacobian.rows(0, n_remainder).into_owned(), tolerance);
    numeric_rank(&jacobian, tolerance) == remainder_rank
}

/// Number of singular values above `tolerance` relative to the largest
pub(crate) fn numeric_rank(matrix: &DMatrix<f64>, tolerance: f64) -> usize {
    if matrix.nrows() == 0 || matrix.ncols() == 0 {
        return 0;
    }
    let singular = matrix.clone().svd(false, false).singular_values;
    let cutoff = tolerance * singular.max().max(1.0);
    singular.iter().filter(|s| **s > cutoff).count()
}

fn describe(sketch: &Sketch, remainder: &Sketch, candidate: &Constraint) -> String {
    let points = sketch.constraint_points(&candidate.kind);
    let overlapping: Vec<String> = remainder
        .constraints()
        .filter(|c| c.is_active())
        .filter(|c| {
            remainder
                .constraint_points(&c.kind)
                .iter()
                .any(|p| points.contains(p))
        })
        .map(|c| c.label())
        .collect();
    let dof = DofAnalysis::of(remainder).dof;

    if overlapping.is_empty() {
        format!("Implied by the remaining constraints ({} DOF without it)", dof)
    } else {
        format!(
            "Implied by {} ({} DOF without it)",
            overlapping.join(", "),
            dof
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::ConstraintKind;
    use crate::test_support::rectangle;
    use glam::DVec2;

    #[test]
    fn test_numeric_rank() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(numeric_rank(&m, 1e-9), 2);
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert_eq!(numeric_rank(&m, 1e-9), 1);
        assert_eq!(numeric_rank(&DMatrix::zeros(0, 3), 1e-9), 0);
    }

    #[test]
    fn test_duplicate_horizontal_reports_newest() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(10.0, 2.0));
        let line = sketch.add_line(p1, p2).unwrap();
        let first = sketch.add_constraint(ConstraintKind::horizontal(line));
        let second = sketch.add_constraint(ConstraintKind::horizontal(line));

        let found = find_redundant(&sketch, &SketchSolver::new(), &DiagnosticsConfig::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, second);
        assert!(found[0].reason.contains(&format!("Horizontal {}", first)));
    }

    #[test]
    fn test_coincidentally_satisfied_is_not_redundant() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(10.0, 0.0));
        let line = sketch.add_line(p1, p2).unwrap();
        // Drawn exactly horizontal, but nothing else forces it
        sketch.add_constraint(ConstraintKind::horizontal(line));
        sketch.add_constraint(ConstraintKind::length(line, 10.0));

        let found = find_redundant(&sketch, &SketchSolver::new(), &DiagnosticsConfig::default());
        assert!(found.is_empty());
    }

    #[test]
    fn test_rectangle_diagonal() {
        let (mut sketch, rect) = rectangle();
        let diagonal = sketch.add_constraint(ConstraintKind::distance(
            rect.corners[0],
            rect.corners[2],
            50.0,
        ));
        let found = find_redundant(&sketch, &SketchSolver::new(), &DiagnosticsConfig::default());
        assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![diagonal]);
        assert!(found[0].reason.contains("0 DOF without it"));
    }
}
