//! Sketch Diagnostics
//!
//! Explains why a sketch solves the way it does. Analysis never mutates the
//! caller's sketch: it works on a copy and re-runs the solver on constraint
//! subsets.
//!
//! - Redundancy: constraints already implied by the rest of the system
//! - Conflicts: minimal groups of constraints that cannot hold together
//! - Suggestions: constraints that would remove remaining freedom

mod conflict;
mod redundancy;
mod report;
mod suggestion;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::dof::DofAnalysis;
use crate::sketch::residual::constraint_error;
use crate::sketch::{ConstraintId, ConstraintKind, EntityRef, Sketch, SketchError};
use crate::solver::{
    LeastSquaresBackend, SketchSolver, SolveStatus, SolverConfig, SolverResult,
};

/// Diagnostics parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Solver settings for the trial solves
    pub solver: SolverConfig,
    /// A constraint is implied when its error at the remainder's solution
    /// is at most this
    pub redundancy_tolerance: f64,
    /// Relative singular value cutoff for Jacobian rank
    pub rank_tolerance: f64,
    /// Lines within this many degrees of an axis get an axis suggestion
    pub axis_snap_degrees: f64,
    /// Cap on constraints tested for redundancy, newest first
    pub max_redundancy_candidates: usize,
    /// Cap on constraints entering conflict localization
    pub max_conflict_candidates: usize,
    /// Cap on reported suggestions
    pub max_suggestions: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            redundancy_tolerance: 1e-6,
            rank_tolerance: 1e-6,
            axis_snap_degrees: 5.0,
            max_redundancy_candidates: 64,
            max_conflict_candidates: 24,
            max_suggestions: 12,
        }
    }
}

impl DiagnosticsConfig {
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_axis_snap(mut self, degrees: f64) -> Self {
        self.axis_snap_degrees = degrees;
        self
    }

    pub fn with_max_suggestions(mut self, max: usize) -> Self {
        self.max_suggestions = max;
        self
    }
}

/// How certain a conflict is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// No configuration satisfies the constraints
    Critical,
    /// Degenerate or numerically unsatisfiable, but not provably infeasible
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggestion priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictCategory {
    /// Different targets for the same measured quantity
    ConflictingDimensions,
    /// Constraints that only hold on zero-length or collapsed geometry
    DegenerateGeometry,
    /// Contradictory axis orientations
    OrientationConflict,
    /// Pinned geometry that cannot satisfy its constraints
    FixedPositionConflict,
    /// Numerically located infeasible subset
    UnsatisfiableSubset,
}

impl ConflictCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictCategory::ConflictingDimensions => "conflicting_dimensions",
            ConflictCategory::DegenerateGeometry => "degenerate_geometry",
            ConflictCategory::OrientationConflict => "orientation_conflict",
            ConflictCategory::FixedPositionConflict => "fixed_position_conflict",
            ConflictCategory::UnsatisfiableSubset => "unsatisfiable_subset",
        }
    }
}

impl fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-constraint diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    pub id: ConstraintId,
    /// e.g. "Length #4"
    pub label: String,
    pub kind: ConstraintKind,
    /// Enabled and driving
    pub active: bool,
    pub dof_weight: usize,
    /// Error at the analyzed state
    pub error: f64,
    pub redundant: bool,
    pub redundancy_reason: Option<String>,
}

/// A group of constraints that cannot hold together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Members in ascending id order
    pub constraints: Vec<ConstraintId>,
    pub category: ConflictCategory,
    pub severity: Severity,
    pub explanation: String,
    pub resolution: String,
    /// Removing the most recently added member resolves the conflict
    pub auto_fixable: bool,
}

impl ConflictInfo {
    /// Most recently added member
    pub fn newest(&self) -> Option<ConstraintId> {
        self.constraints.iter().max().copied()
    }

    pub fn contains(&self, id: ConstraintId) -> bool {
        self.constraints.contains(&id)
    }
}

/// A constraint that would remove remaining freedom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionInfo {
    /// Constraint to add, see [`Sketch::apply_suggestion`]
    pub proposed: ConstraintKind,
    pub targets: Vec<EntityRef>,
    pub priority: Priority,
    /// DOF removed when added
    pub dof_reduction: usize,
    /// Safe to add without asking
    pub auto_addable: bool,
    pub description: String,
}

impl SuggestionInfo {
    fn new(
        proposed: ConstraintKind,
        priority: Priority,
        auto_addable: bool,
        description: String,
    ) -> Self {
        Self {
            targets: proposed.referenced_entities(),
            dof_reduction: proposed.dof_weight(),
            proposed,
            priority,
            auto_addable,
            description,
        }
    }
}

/// Output of [`SketchAnalyzer::analyze`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsResult {
    pub status: SolveStatus,
    pub dof: i64,
    pub n_vars: usize,
    pub n_constraints: usize,
    pub n_weighted_constraints: usize,
    pub constraints: Vec<ConstraintInfo>,
    pub redundant: Vec<ConstraintId>,
    pub conflicts: Vec<ConflictInfo>,
    pub suggestions: Vec<SuggestionInfo>,
    /// Structurally invalid constraints with the reason
    pub invalid: Vec<(ConstraintId, String)>,
    /// Constraints dropped because they referenced deleted entities
    pub purged: Vec<ConstraintId>,
    /// Trial solve, when one was attempted
    pub solve: Option<SolverResult>,
    /// Plain-text report
    pub report: String,
}

impl DiagnosticsResult {
    pub fn constraint_info(&self, id: ConstraintId) -> Option<&ConstraintInfo> {
        self.constraints.iter().find(|c| c.id == id)
    }

    pub fn is_redundant(&self, id: ConstraintId) -> bool {
        self.redundant.contains(&id)
    }

    pub fn is_conflicting(&self, id: ConstraintId) -> bool {
        self.conflicts.iter().any(|c| c.contains(id))
    }

    /// Label of a constraint as recorded at analysis time
    pub fn label(&self, id: ConstraintId) -> String {
        self.constraint_info(id)
            .map(|c| c.label.clone())
            .unwrap_or_else(|| format!("constraint {}", id))
    }
}

/// Sketch diagnostics engine
pub struct SketchAnalyzer {
    config: DiagnosticsConfig,
    solver: SketchSolver,
}

impl Default for SketchAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SketchAnalyzer {
    pub fn new() -> Self {
        let config = DiagnosticsConfig::default();
        Self {
            solver: SketchSolver::new().with_config(config.solver),
            config,
        }
    }

    pub fn with_config(mut self, config: DiagnosticsConfig) -> Self {
        self.solver = std::mem::take(&mut self.solver).with_config(config.solver);
        self.config = config;
        self
    }

    /// Numeric backend for the trial solves
    pub fn with_backend(mut self, backend: Box<dyn LeastSquaresBackend>) -> Self {
        self.solver = std::mem::take(&mut self.solver).with_backend(backend);
        self
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// Analyze a sketch
    ///
    /// Returns `Err` only for non-finite input. Every other state, however
    /// broken, produces a result with a rendered report.
    pub fn analyze(&self, sketch: &Sketch) -> Result<DiagnosticsResult, SketchError> {
        sketch.check_finite()?;

        let mut work = sketch.clone();
        let purged: Vec<ConstraintId> = work.purge_dangling().iter().map(|c| c.id).collect();
        let dof = DofAnalysis::of(&work);
        let invalid = work.invalid_constraints();
        let has_invalid = invalid
            .iter()
            .any(|(id, _)| work.constraint(*id).is_some_and(|c| c.is_active()));

        let (status, solve, state) = if has_invalid {
            (SolveStatus::Inconsistent, None, work.clone())
        } else if dof.is_over_constrained() {
            (SolveStatus::OverConstrained, None, work.clone())
        } else {
            let trial = self.solver.trial(&work, None);
            let state = if trial.accepted {
                trial.sketch
            } else {
                work.clone()
            };
            (trial.result.status, Some(trial.result), state)
        };

        tracing::debug!(
            "Analyzing '{}': {} ({} constraints, {} invalid)",
            work.name,
            status,
            work.constraint_count(),
            invalid.len()
        );

        let redundant = if has_invalid {
            Vec::new()
        } else {
            redundancy::find_redundant(&work, &self.solver, &self.config)
        };

        let conflicts = if matches!(
            status,
            SolveStatus::OverConstrained | SolveStatus::Inconsistent | SolveStatus::DidntConverge
        ) {
            conflict::find_conflicts(&work, &self.solver, &self.config, !has_invalid)
        } else {
            Vec::new()
        };

        let suggestions = if status == SolveStatus::UnderConstrained {
            suggestion::suggest(&state, &self.config)
        } else {
            Vec::new()
        };

        let reasons: HashMap<ConstraintId, &str> = redundant
            .iter()
            .map(|r| (r.id, r.reason.as_str()))
            .collect();
        let constraints = work
            .constraints()
            .map(|c| ConstraintInfo {
                id: c.id,
                label: c.label(),
                kind: c.kind.clone(),
                active: c.is_active(),
                dof_weight: c.kind.dof_weight(),
                error: constraint_error(&state, c),
                redundant: reasons.contains_key(&c.id),
                redundancy_reason: reasons.get(&c.id).map(|r| r.to_string()),
            })
            .collect();

        let mut result = DiagnosticsResult {
            status,
            dof: dof.dof,
            n_vars: dof.n_vars,
            n_constraints: dof.n_constraints,
            n_weighted_constraints: dof.n_weighted_constraints,
            constraints,
            redundant: redundant.iter().map(|r| r.id).collect(),
            conflicts,
            suggestions,
            invalid,
            purged,
            solve,
            report: String::new(),
        };
        result.report = report::render(&work.name, &result);

        tracing::info!(
            "Diagnostics for '{}': {}, {} redundant, {} conflicts, {} suggestions",
            work.name,
            result.status,
            result.redundant.len(),
            result.conflicts.len(),
            result.suggestions.len()
        );
        Ok(result)
    }
}
