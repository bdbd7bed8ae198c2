//! Constraint Solver
//!
//! Solves a sketch by damped nonlinear least squares. The solver gathers the
//! free variables, checks the DOF count, hands the residual vector to a
//! [`LeastSquaresBackend`] and writes the result back on success.
//!
//! The objective is the weighted constraint residuals plus a damping term
//! `λ·(x − anchor)` that keeps the solution close to the user's drawing. The
//! anchor starts at the drawn configuration and follows each converged run,
//! so the damping never leaves a biased residual behind.

mod backend;
mod levenberg;
pub(crate) mod problem;

pub use backend::{
    BackendError, BackendResult, Convergence, LeastSquaresBackend, LeastSquaresProblem,
    MinimizeOptions, Minimization, NullBackend, Termination, default_backend, forward_jacobian,
};
pub use levenberg::LevenbergMarquardt;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dof::DofAnalysis;
use crate::sketch::{ConstraintId, Sketch, SketchError, VariableMap};
use problem::SketchProblem;

/// Re-anchoring stops once a round cuts the residual by less than this share
const ROUND_STALL_RATIO: f64 = 1e-4;

/// Constraint gradient, relative to the residual, below which a run cut off
/// by the evaluation cap still counts as settled
const STATIONARY_GRADIENT: f64 = 1e-2;

/// Solver parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Weight λ of the damping term
    pub damping: f64,
    /// Relative objective reduction tolerance
    pub ftol: f64,
    /// Relative step size tolerance
    pub xtol: f64,
    /// Gradient tolerance
    pub gtol: f64,
    /// Cap on residual evaluations per solve
    pub max_evaluations: usize,
    /// Success requires the weighted aggregate error below this
    pub aggregate_tolerance: f64,
    /// Success requires every single constraint error below this
    pub max_error_tolerance: f64,
    /// Progress callback period in iterations (0 disables)
    pub progress_interval: usize,
    /// Cap on re-anchored optimizer runs
    pub max_rounds: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            damping: 0.01,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            max_evaluations: 1000,
            aggregate_tolerance: 1e-3,
            max_error_tolerance: 1e-2,
            progress_interval: 10,
            max_rounds: 20,
        }
    }
}

impl SolverConfig {
    /// Set the damping weight λ
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping.max(0.0);
        self
    }

    /// Set ftol, xtol and gtol together
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.ftol = tolerance;
        self.xtol = tolerance;
        self.gtol = tolerance;
        self
    }

    /// Set the evaluation cap
    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }

    /// Set the success thresholds
    pub fn with_success_tolerances(mut self, aggregate: f64, max_error: f64) -> Self {
        self.aggregate_tolerance = aggregate;
        self.max_error_tolerance = max_error;
        self
    }

    /// Set the progress callback period
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    fn accepts(&self, aggregate: f64, max_error: f64) -> bool {
        aggregate < self.aggregate_tolerance && max_error < self.max_error_tolerance
    }
}

/// Classification of a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Solved with no degrees of freedom left
    FullyConstrained,
    /// Solved with degrees of freedom left
    UnderConstrained,
    /// More weighted equations than variables; the optimizer was not run
    OverConstrained,
    /// No configuration satisfying the constraints was found
    Inconsistent,
    /// The evaluation budget ran out before the optimizer settled
    DidntConverge,
    /// No numeric backend is available
    NoSolver,
}

impl SolveStatus {
    /// Whether the geometry satisfies the constraints
    pub fn is_success(self) -> bool {
        matches!(self, SolveStatus::FullyConstrained | SolveStatus::UnderConstrained)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SolveStatus::FullyConstrained => "FULLY_CONSTRAINED",
            SolveStatus::UnderConstrained => "UNDER_CONSTRAINED",
            SolveStatus::OverConstrained => "OVER_CONSTRAINED",
            SolveStatus::Inconsistent => "INCONSISTENT",
            SolveStatus::DidntConverge => "DIDNT_CONVERGE",
            SolveStatus::NoSolver => "NO_SOLVER",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of solving sketch constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverResult {
    pub success: bool,
    pub status: SolveStatus,
    /// `n_vars - n_weighted_constraints`
    pub dof: i64,
    pub n_vars: usize,
    pub n_weighted_constraints: usize,
    /// Accepted optimizer steps over all rounds
    pub iterations: usize,
    /// Residual evaluations over all rounds
    pub evaluations: usize,
    /// Weighted aggregate error at the final state
    pub aggregate_error: f64,
    /// Largest single constraint error at the final state
    pub max_error: f64,
    /// Constraint with the largest error, if any constraint was evaluated
    pub worst_constraint: Option<ConstraintId>,
    /// Name of the backend that ran, if one did
    pub backend: Option<String>,
    pub message: String,
}

impl SolverResult {
    fn new(status: SolveStatus, dof: &DofAnalysis, message: impl Into<String>) -> Self {
        Self {
            success: status.is_success(),
            status,
            dof: dof.dof,
            n_vars: dof.n_vars,
            n_weighted_constraints: dof.n_weighted_constraints,
            iterations: 0,
            evaluations: 0,
            aggregate_error: 0.0,
            max_error: 0.0,
            worst_constraint: None,
            backend: None,
            message: message.into(),
        }
    }

    fn with_errors(mut self, errors: &ErrorSummary) -> Self {
        self.aggregate_error = errors.aggregate;
        self.max_error = errors.max;
        self.worst_constraint = errors.worst;
        self
    }
}

/// Progress report passed to [`SketchSolver::solve_with_progress`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveProgress {
    /// Accepted steps so far in the current round
    pub iteration: usize,
    /// Weighted aggregate constraint error
    pub error: f64,
}

struct ErrorSummary {
    aggregate: f64,
    max: f64,
    worst: Option<ConstraintId>,
    non_finite: Option<ConstraintId>,
}

impl ErrorSummary {
    fn of(problem: &SketchProblem) -> Self {
        let errors = problem.constraint_errors();
        let mut summary = ErrorSummary {
            aggregate: 0.0,
            max: 0.0,
            worst: None,
            non_finite: None,
        };
        let mut sum = 0.0;
        for ((id, error), c) in errors.iter().zip(problem.active()) {
            if !error.is_finite() {
                summary.non_finite.get_or_insert(*id);
                continue;
            }
            sum += (c.weight * error).powi(2);
            if summary.worst.is_none() || *error > summary.max {
                summary.max = *error;
                summary.worst = Some(*id);
            }
        }
        summary.aggregate = sum.sqrt();
        summary
    }
}

/// Sketch constraint solver
pub struct SketchSolver {
    config: SolverConfig,
    backend: Box<dyn LeastSquaresBackend>,
}

impl Default for SketchSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SketchSolver {
    /// Create a solver with the default config and backend
    pub fn new() -> Self {
        Self {
            config: SolverConfig::default(),
            backend: default_backend(),
        }
    }

    /// Replace the config
    pub fn with_config(mut self, config: SolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the numeric backend
    pub fn with_backend(mut self, backend: Box<dyn LeastSquaresBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn LeastSquaresBackend {
        self.backend.as_ref()
    }

    /// Solve the constraints in the given sketch
    ///
    /// Returns `Err` only for malformed input (non-finite coordinates).
    /// Every other outcome, including failure to solve, is a
    /// [`SolverResult`]. Geometry is written back only on success.
    pub fn solve(&self, sketch: &mut Sketch) -> Result<SolverResult, SketchError> {
        self.solve_inner(sketch, None)
    }

    /// Like [`SketchSolver::solve`], reporting progress every
    /// `progress_interval` iterations
    pub fn solve_with_progress(
        &self,
        sketch: &mut Sketch,
        progress: &mut dyn FnMut(SolveProgress),
    ) -> Result<SolverResult, SketchError> {
        self.solve_inner(sketch, Some(progress))
    }

    fn solve_inner(
        &self,
        sketch: &mut Sketch,
        progress: Option<&mut dyn FnMut(SolveProgress)>,
    ) -> Result<SolverResult, SketchError> {
        sketch.check_finite()?;

        let purged = sketch.purge_dangling();
        if !purged.is_empty() {
            tracing::info!("Purged {} dangling constraint(s) before solving", purged.len());
        }

        let dof = DofAnalysis::of(sketch);

        let invalid: Vec<String> = sketch
            .invalid_constraints()
            .into_iter()
            .filter(|(id, _)| sketch.constraint(*id).is_some_and(|c| c.is_active()))
            .map(|(_, reason)| reason)
            .collect();
        if !invalid.is_empty() {
            tracing::warn!("{} structurally invalid constraint(s)", invalid.len());
            return Ok(SolverResult::new(
                SolveStatus::Inconsistent,
                &dof,
                format!("Structurally invalid constraints: {}", invalid.join("; ")),
            ));
        }

        if dof.is_over_constrained() {
            tracing::info!(
                "Over-constrained: {} weighted constraints for {} variables",
                dof.n_weighted_constraints,
                dof.n_vars
            );
            return Ok(SolverResult::new(
                SolveStatus::OverConstrained,
                &dof,
                format!(
                    "Over-constrained: {} weighted constraints for {} variables",
                    dof.n_weighted_constraints, dof.n_vars
                ),
            ));
        }

        let trial = self.trial(sketch, progress);
        if trial.accepted {
            *sketch = trial.sketch;
        }
        Ok(trial.result)
    }

    /// Run the optimizer on every active constraint of a copy of `sketch`
    ///
    /// No DOF gate and no write-back: the returned [`Trial`] carries the
    /// final working state whether or not it was accepted.
    pub(crate) fn trial(
        &self,
        sketch: &Sketch,
        mut progress: Option<&mut dyn FnMut(SolveProgress)>,
    ) -> Trial {
        let pinned = sketch.pinned_points();
        let mut working = sketch.clone();
        working.apply_pins(&pinned);

        let vars = VariableMap::build(&working);
        let dof = DofAnalysis::with_vars(&working, vars.len());
        let needs_optimizer =
            !vars.is_empty() && working.constraints().any(|c| c.counts_toward_dof());

        let mut problem = SketchProblem::new(working, vars, self.config.damping);

        if !needs_optimizer {
            let errors = ErrorSummary::of(&problem);
            let accepted =
                errors.non_finite.is_none() && self.config.accepts(errors.aggregate, errors.max);
            let result = if accepted {
                let status = dof.classify(true);
                tracing::debug!("Nothing to optimize; {}", status);
                SolverResult::new(status, &dof, "Nothing to optimize")
            } else {
                SolverResult::new(
                    SolveStatus::Inconsistent,
                    &dof,
                    format!(
                        "No free variables can reduce the remaining error {:.3e}",
                        errors.aggregate
                    ),
                )
            };
            return Trial::new(result.with_errors(&errors), accepted, problem);
        }

        if !self.backend.is_available() {
            tracing::warn!("Least-squares backend '{}' is not available", self.backend.name());
            let result = SolverResult::new(
                SolveStatus::NoSolver,
                &dof,
                format!("Least-squares backend '{}' is not available", self.backend.name()),
            );
            return Trial::new(result, false, problem);
        }

        tracing::debug!(
            "Solving {} variables against {} weighted constraints with backend '{}'",
            dof.n_vars,
            dof.n_weighted_constraints,
            self.backend.name()
        );

        let mut x = problem.initial_values();
        let mut iterations = 0;
        let mut evaluations = 0;
        let mut termination = Termination::Converged(Convergence::Step);
        let mut settled = false;
        let mut previous: Option<f64> = None;

        for round in 0..self.config.max_rounds.max(1) {
            let options = MinimizeOptions {
                ftol: self.config.ftol,
                xtol: self.config.xtol,
                gtol: self.config.gtol,
                max_evaluations: self
                    .config
                    .max_evaluations
                    .saturating_sub(evaluations)
                    .max(1),
                progress_interval: self.config.progress_interval,
            };

            let mut report = |iteration: usize, error: f64| {
                if let Some(callback) = progress.as_mut() {
                    callback(SolveProgress { iteration, error });
                }
            };

            let run = match self
                .backend
                .minimize(&mut problem, &mut x, &options, Some(&mut report))
            {
                Ok(run) => run,
                Err(err) => {
                    tracing::warn!("Backend '{}' failed: {}", self.backend.name(), err);
                    let status = match err {
                        BackendError::NotAvailable(_) => SolveStatus::NoSolver,
                        BackendError::LinearSolve(_) => SolveStatus::DidntConverge,
                    };
                    let mut result = SolverResult::new(status, &dof, err.to_string());
                    result.backend = Some(self.backend.name().to_string());
                    problem.apply(&x);
                    return Trial::new(result, false, problem);
                }
            };

            iterations += run.iterations;
            evaluations += run.evaluations;
            termination = run.termination;
            if !matches!(termination, Termination::Converged(_)) {
                break;
            }
            settled = true;

            problem.apply(&x);
            let residual = problem.constraint_norm();
            let moved = (&x - problem.anchor()).amax();
            tracing::debug!(
                "Round {}: {:?} after {} iterations, residual {:.3e}, moved {:.3e}",
                round,
                run.termination,
                run.iterations,
                residual,
                moved
            );
            let stalled =
                previous.is_some_and(|last| last - residual <= ROUND_STALL_RATIO * last);
            if residual <= self.config.ftol * 1e-2
                || moved <= self.config.xtol * (1.0 + x.amax())
                || stalled
                || evaluations >= self.config.max_evaluations
            {
                break;
            }
            previous = Some(residual);
            problem.set_anchor(x.clone());
        }

        problem.apply(&x);
        if termination == Termination::MaxEvaluations && !settled {
            // Damping rows along a symmetry can keep the optimizer crawling
            // long after the constraints have stopped improving
            let gradient = problem.constraint_gradient(&x);
            let residual = problem.constraint_norm();
            settled = gradient <= STATIONARY_GRADIENT * residual.max(1.0);
            tracing::debug!(
                "Evaluation cap hit with constraint gradient {:.3e} at residual {:.3e}",
                gradient,
                residual
            );
        }

        let errors = ErrorSummary::of(&problem);
        let mut accepted = false;

        let mut result = if termination == Termination::NonFinite || errors.non_finite.is_some() {
            let culprit = errors
                .non_finite
                .map(|id| format!(" (constraint {})", id))
                .unwrap_or_default();
            SolverResult::new(
                SolveStatus::Inconsistent,
                &dof,
                format!("Residual evaluation produced a non-finite value{}", culprit),
            )
        } else if termination == Termination::MaxEvaluations && !settled {
            SolverResult::new(
                SolveStatus::DidntConverge,
                &dof,
                format!(
                    "Stopped after {} evaluations with aggregate error {:.3e}",
                    evaluations, errors.aggregate
                ),
            )
        } else if self.config.accepts(errors.aggregate, errors.max) {
            accepted = true;
            let status = dof.classify(true);
            SolverResult::new(status, &dof, format!("Solved: {}", status))
        } else {
            let worst = errors
                .worst
                .map(|id| format!(", worst constraint {}", id))
                .unwrap_or_default();
            SolverResult::new(
                SolveStatus::Inconsistent,
                &dof,
                format!(
                    "Converged to a non-zero residual: aggregate {:.3e}, max {:.3e}{}",
                    errors.aggregate, errors.max, worst
                ),
            )
        }
        .with_errors(&errors);

        result.iterations = iterations;
        result.evaluations = evaluations;
        result.backend = Some(self.backend.name().to_string());

        tracing::info!(
            "Solve finished: {} ({} iterations, {} evaluations, error {:.3e})",
            result.status,
            iterations,
            evaluations,
            errors.aggregate
        );

        Trial::new(result, accepted, problem)
    }
}

/// Outcome of [`SketchSolver::trial`]
pub(crate) struct Trial {
    pub result: SolverResult,
    /// Both success tolerances hold at the final state
    pub accepted: bool,
    /// Working copy at the final state, with pins applied
    pub sketch: Sketch,
}

impl Trial {
    fn new(result: SolverResult, accepted: bool, problem: SketchProblem) -> Self {
        Self {
            result,
            accepted,
            sketch: problem.into_working(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::{ConstraintKind, residual};
    use crate::test_support::{CountingBackend, init_tracing, rectangle};
    use approx::assert_abs_diff_eq;
    use glam::DVec2;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn counting_solver() -> (SketchSolver, Arc<std::sync::atomic::AtomicUsize>) {
        let backend = CountingBackend::new();
        let calls = backend.calls();
        (SketchSolver::new().with_backend(Box::new(backend)), calls)
    }

    #[test]
    fn test_simple_horizontal_constraint() {
        init_tracing();
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::new(0.0, 0.0));
        let p2 = sketch.add_point(DVec2::new(10.0, 5.0));
        let line = sketch.add_line(p1, p2).unwrap();
        sketch.add_constraint(ConstraintKind::horizontal(line));

        let result = sketch.solve().unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(result.status, SolveStatus::UnderConstrained);
        assert_eq!(result.dof, 3);

        let pos1 = sketch.position(p1).unwrap();
        let pos2 = sketch.position(p2).unwrap();
        assert_abs_diff_eq!(pos1.y, pos2.y, epsilon = 1e-6);
        // Damping keeps the line near where it was drawn
        assert_abs_diff_eq!(pos1.y, 2.5, epsilon = 1e-3);
        assert_abs_diff_eq!(pos2.x, 10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_fixed_constraint() {
        let mut sketch = Sketch::new("test");
        let p = sketch.add_point(DVec2::new(5.0, 5.0));
        sketch.add_constraint(ConstraintKind::fixed(p, DVec2::ZERO));

        let (solver, calls) = counting_solver();
        let result = solver.solve(&mut sketch).unwrap();
        assert_eq!(result.status, SolveStatus::FullyConstrained);
        assert_eq!(result.n_vars, 0);
        assert_eq!(sketch.position(p), Some(DVec2::ZERO));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_distance_constraint() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::new(0.0, 0.0));
        let p2 = sketch.add_point(DVec2::new(5.0, 0.0));
        sketch.fix_point(p1).unwrap();
        sketch.add_constraint(ConstraintKind::distance(p1, p2, 10.0));

        let result = sketch.solve().unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(result.dof, 1);

        let pos1 = sketch.position(p1).unwrap();
        let pos2 = sketch.position(p2).unwrap();
        assert_abs_diff_eq!((pos2 - pos1).length(), 10.0, epsilon = 1e-6);
        assert_eq!(pos1, DVec2::ZERO);
    }

    #[test]
    fn test_strict_config_still_solves() {
        assert_eq!(SolverConfig::default().with_damping(-1.0).damping, 0.0);

        let config = SolverConfig::default()
            .with_damping(0.05)
            .with_tolerance(1e-10)
            .with_success_tolerances(1e-8, 1e-8);
        assert_eq!(config.gtol, 1e-10);

        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(5.0, 0.0));
        sketch.add_constraint(ConstraintKind::distance(p1, p2, 10.0));

        let result = SketchSolver::new()
            .with_config(config)
            .solve(&mut sketch)
            .unwrap();
        assert!(result.success, "{}", result.message);
        assert!(result.max_error < 1e-8);
    }

    #[test]
    fn test_zero_constraints() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::new(1.0, 2.0));
        let p2 = sketch.add_point(DVec2::new(3.0, 4.0));
        sketch.add_line(p1, p2).unwrap();
        let center = sketch.add_point(DVec2::ZERO);
        sketch.add_circle(center, 2.0).unwrap();

        let (solver, calls) = counting_solver();
        let result = solver.solve(&mut sketch).unwrap();
        assert!(result.success);
        assert_eq!(result.status, SolveStatus::UnderConstrained);
        assert_eq!(result.dof, 7);
        assert_eq!(result.n_vars, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sketch.position(p1), Some(DVec2::new(1.0, 2.0)));
    }

    #[test]
    fn test_rectangle_is_fully_constrained() {
        init_tracing();
        let (mut sketch, rect) = rectangle();
        let result = sketch.solve().unwrap();

        assert!(result.success, "{}", result.message);
        assert_eq!(result.status, SolveStatus::FullyConstrained);
        assert_eq!(result.dof, 0);
        assert_eq!(result.backend.as_deref(), Some("levenberg-marquardt"));

        assert_eq!(sketch.position(rect.corners[0]), Some(DVec2::ZERO));
        let bottom = sketch.segment(rect.bottom).unwrap();
        let left = sketch.segment(rect.left).unwrap();
        let top = sketch.segment(rect.top).unwrap();
        let right = sketch.segment(rect.right).unwrap();
        assert_abs_diff_eq!(bottom.length(), 40.0, epsilon = 1e-6);
        assert_abs_diff_eq!(left.length(), 30.0, epsilon = 1e-6);
        for (a, b) in [(bottom, right), (right, top), (top, left), (left, bottom)] {
            let angle = crate::geometry::angle_between(a.direction(), b.direction());
            assert_abs_diff_eq!(angle, 90.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_solve_is_idempotent() {
        let (mut sketch, rect) = rectangle();
        sketch.solve().unwrap();
        let before: Vec<DVec2> = rect
            .corners
            .iter()
            .map(|p| sketch.position(*p).unwrap())
            .collect();

        let result = sketch.solve().unwrap();
        assert!(result.success);
        for (p, old) in rect.corners.iter().zip(&before) {
            let now = sketch.position(*p).unwrap();
            assert_abs_diff_eq!(now.x, old.x, epsilon = 1e-6);
            assert_abs_diff_eq!(now.y, old.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_over_constrained_skips_optimizer() {
        let (mut sketch, rect) = rectangle();
        sketch.add_constraint(ConstraintKind::distance(
            rect.corners[0],
            rect.corners[2],
            50.0,
        ));
        let before = sketch.position(rect.corners[2]);

        let (solver, calls) = counting_solver();
        let result = solver.solve(&mut sketch).unwrap();
        assert_eq!(result.status, SolveStatus::OverConstrained);
        assert!(!result.success);
        assert_eq!(result.dof, -1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sketch.position(rect.corners[2]), before);
    }

    #[test]
    fn test_inconsistent_leaves_geometry_untouched() {
        init_tracing();
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(5.0, 1.0));
        let p3 = sketch.add_point(DVec2::new(2.0, 2.0));
        sketch.add_constraint(ConstraintKind::distance(p1, p2, 5.0));
        sketch.add_constraint(ConstraintKind::distance(p1, p3, 1.0));
        sketch.add_constraint(ConstraintKind::distance(p2, p3, 10.0));

        let result = sketch.solve().unwrap();
        assert!(!result.success);
        assert_eq!(result.status, SolveStatus::Inconsistent, "{}", result.message);
        assert!(result.max_error > 1e-2);
        assert!(result.message.contains("non-zero residual"));
        // Stops re-anchoring once the rounds stall instead of spending the budget
        assert!(result.evaluations < SolverConfig::default().max_evaluations);
        assert_eq!(sketch.position(p2), Some(DVec2::new(5.0, 1.0)));
    }

    #[test]
    fn test_budget_spent_after_settling_is_inconsistent() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(5.0, 1.0));
        let p3 = sketch.add_point(DVec2::new(2.0, 2.0));
        sketch.add_constraint(ConstraintKind::distance(p1, p2, 5.0));
        sketch.add_constraint(ConstraintKind::distance(p1, p3, 1.0));
        sketch.add_constraint(ConstraintKind::distance(p2, p3, 10.0));

        let first = SketchSolver::new().solve(&mut sketch.clone()).unwrap();
        assert!(first.evaluations > 2);
        let config = SolverConfig::default().with_max_evaluations(first.evaluations - 1);
        let result = SketchSolver::new()
            .with_config(config)
            .solve(&mut sketch)
            .unwrap();
        assert_eq!(result.status, SolveStatus::Inconsistent, "{}", result.message);
        assert!(result.message.contains("non-zero residual"));
    }

    #[test]
    fn test_zero_variables_with_error_is_inconsistent() {
        let mut sketch = Sketch::new("test");
        let p = sketch.add_point(DVec2::new(0.5, 0.0));
        sketch.add_constraint(ConstraintKind::fixed(p, DVec2::ZERO));
        sketch.add_constraint(ConstraintKind::fixed(p, DVec2::new(1.0, 0.0)));

        let (solver, calls) = counting_solver();
        let result = solver.solve(&mut sketch).unwrap();
        assert_eq!(result.status, SolveStatus::Inconsistent);
        assert_eq!(result.n_vars, 0);
        assert_eq!(result.n_weighted_constraints, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.message.contains("No free variables"));
        // The later pin wins, leaving the earlier one a unit away
        assert_abs_diff_eq!(result.max_error, 1.0, epsilon = 1e-12);
        assert_eq!(sketch.position(p), Some(DVec2::new(0.5, 0.0)));
    }

    #[test]
    fn test_pinned_distance_is_over_constrained() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_fixed_point(DVec2::new(3.0, 0.0));
        sketch.add_constraint(ConstraintKind::distance(p1, p2, 5.0));

        let (solver, calls) = counting_solver();
        let result = solver.solve(&mut sketch).unwrap();
        assert_eq!(result.status, SolveStatus::OverConstrained);
        assert_eq!(result.dof, -1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_reference_is_inconsistent() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(1.0, 0.0));
        sketch.add_line(p1, p2).unwrap();
        let bad = sketch.add_constraint(ConstraintKind::length(crate::sketch::LineId(99), 10.0));

        let (solver, calls) = counting_solver();
        let result = solver.solve(&mut sketch).unwrap();
        assert_eq!(result.status, SolveStatus::Inconsistent);
        assert!(result.message.contains("missing line reference"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(residual::constraint_error(&sketch, sketch.constraint(bad).unwrap()) >= 1e5);
    }

    #[test]
    fn test_non_finite_coordinates_are_rejected() {
        let mut sketch = Sketch::new("test");
        let p = sketch.add_point(DVec2::new(f64::INFINITY, 0.0));
        let q = sketch.add_point(DVec2::ZERO);
        sketch.add_constraint(ConstraintKind::coincident(p, q));
        assert!(matches!(sketch.solve(), Err(SketchError::NonFinite { .. })));
    }

    #[test]
    fn test_no_solver() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(10.0, 5.0));
        let line = sketch.add_line(p1, p2).unwrap();
        sketch.add_constraint(ConstraintKind::horizontal(line));

        let solver = SketchSolver::new().with_backend(Box::new(NullBackend));
        let result = solver.solve(&mut sketch).unwrap();
        assert_eq!(result.status, SolveStatus::NoSolver);
        assert!(!result.success);
        assert_eq!(sketch.position(p2), Some(DVec2::new(10.0, 5.0)));
    }

    #[test]
    fn test_evaluation_cap_reports_didnt_converge() {
        let (mut sketch, _) = rectangle();
        let solver =
            SketchSolver::new().with_config(SolverConfig::default().with_max_evaluations(1));
        let result = solver.solve(&mut sketch).unwrap();
        assert_eq!(result.status, SolveStatus::DidntConverge);
        assert!(!result.success);
    }

    #[test]
    fn test_inactive_constraints_do_not_drive() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(10.0, 5.0));
        let line = sketch.add_line(p1, p2).unwrap();
        sketch.add_constraint(ConstraintKind::length(line, 20.0));
        let v = sketch.add_constraint(ConstraintKind::vertical(line));
        let r = sketch.add_constraint(ConstraintKind::horizontal(line));
        sketch.set_constraint_enabled(v, false).unwrap();
        sketch.set_constraint_driving(r, false).unwrap();

        let result = sketch.solve().unwrap();
        assert!(result.success, "{}", result.message);
        let seg = sketch.segment(line).unwrap();
        assert_abs_diff_eq!(seg.length(), 20.0, epsilon = 1e-6);
        // Neither the disabled vertical nor the reference horizontal moved it
        assert!(seg.vector().x.abs() > 1.0);
        assert!(seg.vector().y.abs() > 1.0);
    }

    #[test]
    fn test_progress_callback() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(3.0, 4.0));
        let c = sketch.add_circle(p1, 1.0).unwrap();
        sketch.add_constraint(ConstraintKind::point_on_circle(p2, c));
        sketch.add_constraint(ConstraintKind::radius(c, 100.0));

        let solver =
            SketchSolver::new().with_config(SolverConfig::default().with_progress_interval(1));
        let mut reports = Vec::new();
        let result = solver
            .solve_with_progress(&mut sketch, &mut |p| reports.push(p))
            .unwrap();
        assert!(result.success, "{}", result.message);
        assert!(!reports.is_empty());
        assert!(reports.iter().all(|p| p.error.is_finite()));
    }

    #[test]
    fn test_curves_solve() {
        let mut sketch = Sketch::new("test");
        let o = sketch.add_fixed_point(DVec2::ZERO);
        let c1 = sketch.add_circle(o, 3.0).unwrap();
        let center = sketch.add_point(DVec2::new(0.5, 0.2));
        let c2 = sketch.add_arc(center, 1.0, 0.0, 90.0).unwrap();
        let a = sketch.add_point(DVec2::new(-10.0, 4.5));
        let b = sketch.add_point(DVec2::new(10.0, 5.5));
        let line = sketch.add_line(a, b).unwrap();

        sketch.add_constraint(ConstraintKind::concentric(c1, c2));
        sketch.add_constraint(ConstraintKind::equal_radius(c1, c2));
        sketch.add_constraint(ConstraintKind::diameter(c1, 10.0));
        sketch.add_constraint(ConstraintKind::tangent(line, c1));

        let result = sketch.solve().unwrap();
        assert!(result.success, "{}", result.message);
        let arc = sketch.arc(c2).unwrap();
        assert_abs_diff_eq!(arc.radius, 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sketch.position(center).unwrap().length(), 0.0, epsilon = 1e-6);
        let seg = sketch.segment(line).unwrap();
        assert_abs_diff_eq!(seg.line_distance(DVec2::ZERO), 5.0, epsilon = 1e-6);
    }
}
