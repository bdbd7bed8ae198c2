//! Sketch as a least-squares problem
//!
//! Residual vector layout: weighted constraint components in sketch order,
//! followed by one damping row `λ·(xᵢ − anchorᵢ)` per free variable.

use nalgebra::{DMatrix, DVector};

use super::backend::{LeastSquaresProblem, forward_jacobian};
use crate::sketch::residual::{INVALID_PENALTY, component_count, components, constraint_error};
use crate::sketch::{Constraint, ConstraintId, Sketch, VariableMap};

pub(crate) struct SketchProblem {
    working: Sketch,
    vars: VariableMap,
    active: Vec<Constraint>,
    n_components: usize,
    anchor: DVector<f64>,
    damping: f64,
    buffer: Vec<f64>,
}

impl SketchProblem {
    /// Problem over every active constraint of `working`
    pub fn new(working: Sketch, vars: VariableMap, damping: f64) -> Self {
        let active: Vec<Constraint> = working
            .constraints()
            .filter(|c| c.is_active())
            .cloned()
            .collect();
        Self::with_constraints(working, vars, active, damping)
    }

    /// Problem over an explicit constraint list
    pub fn with_constraints(
        working: Sketch,
        vars: VariableMap,
        active: Vec<Constraint>,
        damping: f64,
    ) -> Self {
        let n_components = active.iter().map(|c| component_count(&c.kind)).sum();
        let anchor = DVector::from_vec(vars.values(&working));
        Self {
            working,
            vars,
            active,
            n_components,
            anchor,
            damping,
            buffer: Vec::new(),
        }
    }

    /// Current variable values of the working sketch
    pub fn initial_values(&self) -> DVector<f64> {
        DVector::from_vec(self.vars.values(&self.working))
    }

    pub fn anchor(&self) -> &DVector<f64> {
        &self.anchor
    }

    pub fn set_anchor(&mut self, anchor: DVector<f64>) {
        self.anchor = anchor;
    }

    /// Write `x` into the working sketch
    pub fn apply(&mut self, x: &DVector<f64>) {
        self.vars.write(&mut self.working, x.as_slice());
    }

    /// Unweighted error of each constraint at the working state
    pub fn constraint_errors(&self) -> Vec<(ConstraintId, f64)> {
        self.active
            .iter()
            .map(|c| (c.id, constraint_error(&self.working, c)))
            .collect()
    }

    /// Norm of the weighted constraint components at the working state
    pub fn constraint_norm(&self) -> f64 {
        self.active
            .iter()
            .map(|c| {
                let e = c.weight * constraint_error(&self.working, c);
                e * e
            })
            .sum::<f64>()
            .sqrt()
    }

    pub fn active(&self) -> &[Constraint] {
        &self.active
    }

    pub fn into_working(self) -> Sketch {
        self.working
    }

    /// Jacobian of the constraint components at `x`, without damping rows
    pub fn constraint_jacobian(&mut self, x: &DVector<f64>) -> DMatrix<f64> {
        let mut r0 = DVector::zeros(self.n_residuals());
        self.residuals(x, &mut r0);
        let full = forward_jacobian(self, x, &r0);
        self.apply(x);
        full.rows(0, self.n_components).into_owned()
    }

    /// Largest entry of the constraint gradient `Jᵀr` at `x`, damping rows
    /// excluded
    pub fn constraint_gradient(&mut self, x: &DVector<f64>) -> f64 {
        let mut r = DVector::zeros(self.n_residuals());
        self.residuals(x, &mut r);
        let jacobian = forward_jacobian(self, x, &r);
        self.apply(x);
        let n = self.n_components;
        jacobian.rows(0, n).tr_mul(&r.rows(0, n)).amax()
    }

    fn fill_components(&mut self) {
        self.buffer.clear();
        for c in &self.active {
            let start = self.buffer.len();
            if components(&self.working, &c.kind, &mut self.buffer).is_err() {
                self.buffer.truncate(start);
                self.buffer
                    .extend(std::iter::repeat_n(INVALID_PENALTY, component_count(&c.kind)));
            }
            for r in &mut self.buffer[start..] {
                *r *= c.weight;
            }
        }
    }
}

impl LeastSquaresProblem for SketchProblem {
    fn n_vars(&self) -> usize {
        self.vars.len()
    }

    fn n_residuals(&self) -> usize {
        self.n_components + self.vars.len()
    }

    fn residuals(&mut self, x: &DVector<f64>, out: &mut DVector<f64>) {
        self.apply(x);
        self.fill_components();
        for (i, r) in self.buffer.iter().enumerate() {
            out[i] = *r;
        }
        for i in 0..self.vars.len() {
            out[self.n_components + i] = self.damping * (x[i] - self.anchor[i]);
        }
    }

    fn aggregate_error(&self, r: &DVector<f64>) -> f64 {
        r.rows(0, self.n_components).norm()
    }
}
