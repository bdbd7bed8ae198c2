//! Least-squares backend trait definitions
//!
//! The sketch solver reduces every solve to a dense nonlinear least-squares
//! problem and hands it to a backend. Backends are interchangeable; the
//! solver only asks for a name, availability and `minimize`.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Error type for backend operations
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Backend not available: {0}")]
    NotAvailable(String),

    #[error("Linear solve failed: {0}")]
    LinearSolve(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A problem of the form `minimize ‖r(x)‖²`
pub trait LeastSquaresProblem {
    /// Length of `x`
    fn n_vars(&self) -> usize;

    /// Length of `r(x)`
    fn n_residuals(&self) -> usize;

    /// Evaluate `r(x)` into `out`, which has length [`n_residuals`]
    ///
    /// [`n_residuals`]: LeastSquaresProblem::n_residuals
    fn residuals(&mut self, x: &DVector<f64>, out: &mut DVector<f64>);

    /// Error reported to progress callbacks for residual vector `r`
    fn aggregate_error(&self, r: &DVector<f64>) -> f64 {
        r.norm()
    }
}

/// Why a minimization stopped successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Relative reduction of the objective fell below `ftol`
    Objective,
    /// Step size fell below `xtol`
    Step,
    /// Largest gradient component fell below `gtol`
    Gradient,
    /// Residual vanished
    ZeroResidual,
}

/// How a minimization ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged(Convergence),
    /// The function evaluation budget ran out
    MaxEvaluations,
    /// A residual evaluated to NaN or infinity
    NonFinite,
}

/// Outcome of [`LeastSquaresBackend::minimize`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimization {
    pub termination: Termination,
    /// Accepted steps
    pub iterations: usize,
    /// Residual evaluations, excluding those spent on Jacobians
    pub evaluations: usize,
    /// Final value of `½‖r‖²`
    pub cost: f64,
}

/// Stopping criteria for one minimization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub max_evaluations: usize,
    /// Call the progress callback every this many iterations (0 = never)
    pub progress_interval: usize,
}

/// Numeric least-squares backend
pub trait LeastSquaresBackend: Send + Sync {
    /// Get the name of this backend
    fn name(&self) -> &str;

    /// Check if the backend is available
    fn is_available(&self) -> bool;

    /// Minimize `problem` starting from `x`, leaving the result in `x`
    ///
    /// `progress` receives `(iteration, aggregate error)`.
    fn minimize(
        &self,
        problem: &mut dyn LeastSquaresProblem,
        x: &mut DVector<f64>,
        options: &MinimizeOptions,
        progress: Option<&mut dyn FnMut(usize, f64)>,
    ) -> BackendResult<Minimization>;
}

/// Backend used when no numeric backend is compiled in
pub struct NullBackend;

impl LeastSquaresBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn minimize(
        &self,
        _problem: &mut dyn LeastSquaresProblem,
        _x: &mut DVector<f64>,
        _options: &MinimizeOptions,
        _progress: Option<&mut dyn FnMut(usize, f64)>,
    ) -> BackendResult<Minimization> {
        Err(BackendError::NotAvailable(
            "no least-squares backend compiled in (enable the `levenberg-marquardt` feature)"
                .to_string(),
        ))
    }
}

/// Get the default backend based on enabled features
pub fn default_backend() -> Box<dyn LeastSquaresBackend> {
    #[cfg(feature = "levenberg-marquardt")]
    {
        Box::new(super::LevenbergMarquardt::new())
    }

    #[cfg(not(feature = "levenberg-marquardt"))]
    {
        Box::new(NullBackend)
    }
}

/// Forward-difference Jacobian of `problem` at `x`
///
/// `r0` must hold `r(x)`. Each column costs one residual evaluation.
pub fn forward_jacobian(
    problem: &mut dyn LeastSquaresProblem,
    x: &DVector<f64>,
    r0: &DVector<f64>,
) -> DMatrix<f64> {
    let n = x.len();
    let m = r0.len();
    let mut jacobian = DMatrix::zeros(m, n);
    let mut perturbed = x.clone();
    let mut r = DVector::zeros(m);

    for j in 0..n {
        let h = f64::EPSILON.sqrt() * x[j].abs().max(1.0);
        perturbed[j] = x[j] + h;
        // Use the representable step
        let h = perturbed[j] - x[j];
        problem.residuals(&perturbed, &mut r);
        jacobian.set_column(j, &((&r - r0) / h));
        perturbed[j] = x[j];
    }

    jacobian
}
