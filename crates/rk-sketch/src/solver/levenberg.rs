//! Levenberg–Marquardt backend
//!
//! Dense LM with Marquardt diagonal scaling and Nielsen's damping update.
//! The normal equations `(JᵀJ + μ·D) h = -Jᵀr` are solved by Cholesky.
//! `D` is floored at a fraction of its largest entry, so columns the
//! Jacobian barely sees are still damped.

use nalgebra::DVector;

use super::backend::{
    BackendError, BackendResult, Convergence, LeastSquaresBackend, LeastSquaresProblem,
    MinimizeOptions, Minimization, Termination, forward_jacobian,
};

/// Levenberg–Marquardt least-squares backend
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Initial damping relative to the largest diagonal entry of JᵀJ
    tau: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl LevenbergMarquardt {
    /// Create a backend with default parameters
    pub fn new() -> Self {
        Self { tau: 1e-3 }
    }
}

/// Smallest diagonal scale relative to the largest
const SCALE_FLOOR: f64 = 1e-2;

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn finish(
    termination: Termination,
    iterations: usize,
    evaluations: usize,
    cost: f64,
) -> BackendResult<Minimization> {
    Ok(Minimization {
        termination,
        iterations,
        evaluations,
        cost,
    })
}

impl LeastSquaresBackend for LevenbergMarquardt {
    fn name(&self) -> &str {
        "levenberg-marquardt"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn minimize(
        &self,
        problem: &mut dyn LeastSquaresProblem,
        x: &mut DVector<f64>,
        options: &MinimizeOptions,
        mut progress: Option<&mut dyn FnMut(usize, f64)>,
    ) -> BackendResult<Minimization> {
        let n = x.len();
        let m = problem.n_residuals();

        let mut r = DVector::zeros(m);
        problem.residuals(x, &mut r);
        let mut evaluations = 1;
        let mut iterations = 0;
        let mut cost = 0.5 * r.norm_squared();

        if !all_finite(&r) {
            return finish(Termination::NonFinite, iterations, evaluations, cost);
        }
        if n == 0 {
            return finish(Termination::Converged(Convergence::Step), 0, evaluations, cost);
        }

        let mut trial_r = DVector::zeros(m);
        let mut mu = -1.0;
        let mut nu = 2.0;

        loop {
            if cost <= f64::MIN_POSITIVE {
                return finish(
                    Termination::Converged(Convergence::ZeroResidual),
                    iterations,
                    evaluations,
                    cost,
                );
            }

            let jacobian = forward_jacobian(problem, x, &r);
            if jacobian.iter().any(|v| !v.is_finite()) {
                return finish(Termination::NonFinite, iterations, evaluations, cost);
            }

            let gradient = jacobian.tr_mul(&r);
            if gradient.amax() <= options.gtol {
                return finish(
                    Termination::Converged(Convergence::Gradient),
                    iterations,
                    evaluations,
                    cost,
                );
            }

            let jtj = jacobian.tr_mul(&jacobian);
            let diagonal = jtj.diagonal();
            let floor = (diagonal.max() * SCALE_FLOOR).max(1e-12);
            let scale = diagonal.map(|d| d.max(floor));
            if mu < 0.0 {
                mu = self.tau * scale.max();
            }

            // Retry with more damping until a step lowers the objective
            loop {
                let mut lhs = jtj.clone();
                for i in 0..n {
                    lhs[(i, i)] += mu * scale[i];
                }

                let step = match lhs.cholesky() {
                    Some(factor) => factor.solve(&(-&gradient)),
                    None => {
                        mu *= nu;
                        nu *= 2.0;
                        if !mu.is_finite() {
                            return Err(BackendError::LinearSolve(
                                "normal equations stayed indefinite".to_string(),
                            ));
                        }
                        continue;
                    }
                };

                if step.norm() <= options.xtol * (x.norm() + options.xtol) {
                    return finish(
                        Termination::Converged(Convergence::Step),
                        iterations,
                        evaluations,
                        cost,
                    );
                }

                let candidate = &*x + &step;
                problem.residuals(&candidate, &mut trial_r);
                evaluations += 1;
                if !all_finite(&trial_r) {
                    return finish(Termination::NonFinite, iterations, evaluations, cost);
                }

                let trial_cost = 0.5 * trial_r.norm_squared();
                let predicted = 0.5 * step.dot(&(step.component_mul(&scale) * mu - &gradient));
                let rho = if predicted > 0.0 {
                    (cost - trial_cost) / predicted
                } else {
                    -1.0
                };

                if rho > 0.0 {
                    let reduction = cost - trial_cost;
                    let previous = cost;
                    *x = candidate;
                    std::mem::swap(&mut r, &mut trial_r);
                    cost = trial_cost;
                    mu *= (1.0f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                    nu = 2.0;
                    iterations += 1;

                    if options.progress_interval > 0
                        && iterations % options.progress_interval == 0
                        && let Some(callback) = progress.as_mut()
                    {
                        callback(iterations, problem.aggregate_error(&r));
                    }

                    if reduction <= options.ftol * previous {
                        return finish(
                            Termination::Converged(Convergence::Objective),
                            iterations,
                            evaluations,
                            cost,
                        );
                    }
                    break;
                }

                mu *= nu;
                nu *= 2.0;
                if evaluations >= options.max_evaluations {
                    return finish(Termination::MaxEvaluations, iterations, evaluations, cost);
                }
            }

            if evaluations >= options.max_evaluations {
                return finish(Termination::MaxEvaluations, iterations, evaluations, cost);
            }
        }
    }
}
