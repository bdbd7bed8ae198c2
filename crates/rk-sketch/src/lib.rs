//! 2D Parametric Sketch Solver
//!
//! This crate provides:
//! - Geometry primitives and derived queries
//! - A sketch arena of points, lines, circles and arcs with typed constraints
//! - Residual evaluation and degree-of-freedom accounting
//! - A damped Levenberg–Marquardt solver behind a pluggable backend trait
//! - Diagnostics: redundant constraints, conflicts and missing-constraint
//!   suggestions, with a plain-text report

pub mod diagnostics;
pub mod dof;
pub mod geometry;
pub mod sketch;
pub mod solver;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use diagnostics::{
    ConflictCategory, ConflictInfo, ConstraintInfo, DiagnosticsConfig, DiagnosticsResult,
    Priority, Severity, SketchAnalyzer, SuggestionInfo,
};
pub use dof::DofAnalysis;
pub use geometry::{CircleShape, Segment};
pub use sketch::{
    Arc, ArcId, Circle, CircleId, Constraint, ConstraintId, ConstraintKind, CurveId, EntityRef,
    Line, LineId, Point, PointId, Sketch, SketchEntity, SketchError,
};
pub use solver::{
    BackendError, LeastSquaresBackend, LevenbergMarquardt, NullBackend, SketchSolver,
    SolveProgress, SolveStatus, SolverConfig, SolverResult, default_backend,
};
