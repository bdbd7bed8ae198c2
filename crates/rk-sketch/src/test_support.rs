//! Shared fixtures for unit tests

use glam::DVec2;
use nalgebra::DVector;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use crate::sketch::{ConstraintId, ConstraintKind, LineId, PointId, Sketch};
use crate::solver::{
    BackendResult, LeastSquaresBackend, LeastSquaresProblem, LevenbergMarquardt, MinimizeOptions,
    Minimization,
};

/// Install a test subscriber once; filter with `RUST_LOG`
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rk_sketch=warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Levenberg–Marquardt that counts `minimize` calls
pub struct CountingBackend {
    inner: LevenbergMarquardt,
    calls: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self {
            inner: LevenbergMarquardt::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl LeastSquaresBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn minimize(
        &self,
        problem: &mut dyn LeastSquaresProblem,
        x: &mut DVector<f64>,
        options: &MinimizeOptions,
        progress: Option<&mut dyn FnMut(usize, f64)>,
    ) -> BackendResult<Minimization> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.minimize(problem, x, options, progress)
    }
}

/// Handles into the [`rectangle`] fixture
pub struct Rectangle {
    /// Counter-clockwise from the fixed origin corner
    pub corners: [PointId; 4],
    pub bottom: LineId,
    pub right: LineId,
    pub top: LineId,
    pub left: LineId,
    pub bottom_length: ConstraintId,
    pub left_length: ConstraintId,
}

/// A roughly drawn 40 x 30 rectangle: corner 0 fixed at the origin,
/// horizontal top and bottom, vertical sides, bottom 40 and left 30
pub fn rectangle() -> (Sketch, Rectangle) {
    let mut sketch = Sketch::new("rectangle");
    let c0 = sketch.add_point(DVec2::new(0.0, 0.0));
    let c1 = sketch.add_point(DVec2::new(38.0, 1.0));
    let c2 = sketch.add_point(DVec2::new(41.0, 29.0));
    let c3 = sketch.add_point(DVec2::new(-1.0, 31.0));

    let bottom = sketch.add_line(c0, c1).unwrap();
    let right = sketch.add_line(c1, c2).unwrap();
    let top = sketch.add_line(c2, c3).unwrap();
    let left = sketch.add_line(c3, c0).unwrap();

    sketch.add_constraint(ConstraintKind::fixed(c0, DVec2::ZERO));
    sketch.add_constraint(ConstraintKind::horizontal(top));
    sketch.add_constraint(ConstraintKind::horizontal(bottom));
    sketch.add_constraint(ConstraintKind::vertical(left));
    sketch.add_constraint(ConstraintKind::vertical(right));
    let bottom_length = sketch.add_constraint(ConstraintKind::length(bottom, 40.0));
    let left_length = sketch.add_constraint(ConstraintKind::length(left, 30.0));

    let rect = Rectangle {
        corners: [c0, c1, c2, c3],
        bottom,
        right,
        top,
        left,
        bottom_length,
        left_length,
    };
    (sketch, rect)
}
