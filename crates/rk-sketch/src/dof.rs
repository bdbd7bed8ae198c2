//! Degree-of-freedom analysis
//!
//! Counts free variables against weighted constraint equations. The count is
//! a cheap structural estimate: it decides the over-constrained gate before
//! any optimization, and classifies the outcome after a solve.

use serde::{Deserialize, Serialize};

use crate::sketch::{Sketch, VariableMap};
use crate::solver::SolveStatus;

/// Variable and equation counts of a sketch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofAnalysis {
    /// Number of free scalar variables
    pub n_vars: usize,
    /// Number of active (enabled, driving) constraints
    pub n_constraints: usize,
    /// Sum of DOF weights over active non-`Fixed` constraints
    pub n_weighted_constraints: usize,
    /// `n_vars - n_weighted_constraints`
    pub dof: i64,
}

impl DofAnalysis {
    /// Analyze the current sketch
    pub fn of(sketch: &Sketch) -> Self {
        let n_vars = VariableMap::build(sketch).len();
        Self::with_vars(sketch, n_vars)
    }

    pub(crate) fn with_vars(sketch: &Sketch, n_vars: usize) -> Self {
        let n_constraints = sketch.constraints().filter(|c| c.is_active()).count();
        let n_weighted_constraints = sketch
            .constraints()
            .filter(|c| c.counts_toward_dof())
            .map(|c| c.kind.dof_weight())
            .sum::<usize>();
        Self {
            n_vars,
            n_constraints,
            n_weighted_constraints,
            dof: n_vars as i64 - n_weighted_constraints as i64,
        }
    }

    /// More weighted equations than variables
    pub fn is_over_constrained(&self) -> bool {
        self.n_weighted_constraints > self.n_vars
    }

    /// Classify a finished solve
    pub fn classify(&self, solved: bool) -> SolveStatus {
        if self.is_over_constrained() {
            SolveStatus::OverConstrained
        } else if !solved {
            SolveStatus::Inconsistent
        } else if self.dof == 0 {
            SolveStatus::FullyConstrained
        } else {
            SolveStatus::UnderConstrained
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::ConstraintKind;
    use glam::DVec2;

    #[test]
    fn test_counts() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(5.0, 1.0));
        let line = sketch.add_line(p1, p2).unwrap();
        sketch.add_constraint(ConstraintKind::fixed(p1, DVec2::ZERO));
        sketch.add_constraint(ConstraintKind::horizontal(line));

        let dof = DofAnalysis::of(&sketch);
        assert_eq!(dof.n_vars, 2);
        assert_eq!(dof.n_constraints, 2);
        assert_eq!(dof.n_weighted_constraints, 1);
        assert_eq!(dof.dof, 1);
        assert!(!dof.is_over_constrained());
        assert_eq!(dof.classify(true), SolveStatus::UnderConstrained);
        assert_eq!(dof.classify(false), SolveStatus::Inconsistent);

        sketch.add_constraint(ConstraintKind::length(line, 5.0));
        let dof = DofAnalysis::of(&sketch);
        assert_eq!(dof.dof, 0);
        assert_eq!(dof.classify(true), SolveStatus::FullyConstrained);
    }

    #[test]
    fn test_disabled_and_reference_constraints_are_not_counted() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(5.0, 1.0));
        let line = sketch.add_line(p1, p2).unwrap();
        let h = sketch.add_constraint(ConstraintKind::horizontal(line));
        let l = sketch.add_constraint(ConstraintKind::length(line, 5.0));
        sketch.set_constraint_enabled(h, false).unwrap();
        sketch.set_constraint_driving(l, false).unwrap();

        let dof = DofAnalysis::of(&sketch);
        assert_eq!(dof.n_constraints, 0);
        assert_eq!(dof.n_weighted_constraints, 0);
        assert_eq!(dof.dof, 4);
    }

    #[test]
    fn test_over_constrained() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(5.0, 0.0));
        let line = sketch.add_line(p1, p2).unwrap();
        sketch.add_constraint(ConstraintKind::horizontal(line));
        sketch.add_constraint(ConstraintKind::length(line, 5.0));
        sketch.add_constraint(ConstraintKind::distance(p1, p2, 5.0));

        let dof = DofAnalysis::of(&sketch);
        assert_eq!(dof.dof, -1);
        assert!(dof.is_over_constrained());
        assert_eq!(dof.classify(true), SolveStatus::OverConstrained);
    }
}
