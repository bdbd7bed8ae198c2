//! Missing-constraint suggestions
//!
//! Proposals for an under-constrained sketch, read off the current
//! geometry. Construction geometry never gets suggestions.

use super::{DiagnosticsConfig, Priority, SuggestionInfo};
use crate::geometry::angle_between;
use crate::sketch::{Constraint, ConstraintKind, CurveId, Line, LineId, Sketch};

pub(crate) fn suggest(sketch: &Sketch, config: &DiagnosticsConfig) -> Vec<SuggestionInfo> {
    let active: Vec<&Constraint> = sketch.constraints().filter(|c| c.is_active()).collect();

    let mut suggestions = Vec::new();
    anchor(sketch, &active, &mut suggestions);
    axis_alignment(sketch, &active, config.axis_snap_degrees, &mut suggestions);
    dimensions(sketch, &active, &mut suggestions);
    angles(sketch, &active, &mut suggestions);

    suggestions.sort_by_key(|s| s.priority);
    suggestions.truncate(config.max_suggestions);
    tracing::debug!("{} suggestion(s)", suggestions.len());
    suggestions
}

fn live_lines(sketch: &Sketch) -> impl Iterator<Item = &Line> {
    sketch.lines().filter(|l| !l.construction)
}

/// Fix the first free point when nothing pins the sketch in place
fn anchor(sketch: &Sketch, active: &[&Constraint], out: &mut Vec<SuggestionInfo>) {
    if !sketch.pinned_points().is_empty() {
        return;
    }
    let touched: Vec<_> = active
        .iter()
        .flat_map(|c| sketch.constraint_points(&c.kind))
        .collect();
    let live: Vec<_> = sketch.points().filter(|p| !p.construction).collect();
    let Some(point) = live
        .iter()
        .find(|p| !touched.contains(&p.id))
        .or_else(|| live.first())
    else {
        return;
    };

    out.push(SuggestionInfo::new(
        ConstraintKind::fixed(point.id, point.position),
        Priority::Critical,
        true,
        format!(
            "Fix {} at ({}, {}) to anchor the sketch",
            point.id, point.position.x, point.position.y
        ),
    ));
}

fn is_oriented(active: &[&Constraint], line: LineId) -> bool {
    active.iter().any(|c| match c.kind {
        ConstraintKind::Horizontal { line: l } | ConstraintKind::Vertical { line: l } => l == line,
        ConstraintKind::Parallel { line1, line2 }
        | ConstraintKind::Perpendicular { line1, line2 }
        | ConstraintKind::Angle { line1, line2, .. } => line1 == line || line2 == line,
        _ => false,
    })
}

/// Horizontal or Vertical for lines drawn close to an axis
fn axis_alignment(
    sketch: &Sketch,
    active: &[&Constraint],
    snap_degrees: f64,
    out: &mut Vec<SuggestionInfo>,
) {
    for line in live_lines(sketch) {
        let Some(segment) = sketch.segment(line.id) else {
            continue;
        };
        if segment.is_degenerate() || is_oriented(active, line.id) {
            continue;
        }
        let angle = segment.angle().abs();
        let off_horizontal = angle.min(180.0 - angle);
        let off_vertical = (90.0 - angle).abs();

        let (proposed, axis, off) = if off_horizontal <= snap_degrees {
            (ConstraintKind::horizontal(line.id), "horizontal", off_horizontal)
        } else if off_vertical <= snap_degrees {
            (ConstraintKind::vertical(line.id), "vertical", off_vertical)
        } else {
            continue;
        };
        out.push(SuggestionInfo::new(
            proposed,
            Priority::High,
            true,
            format!("Make {} {} (currently {:.2}° off)", line.id, axis, off),
        ));
    }
}

/// Length and Radius from the measured values
fn dimensions(sketch: &Sketch, active: &[&Constraint], out: &mut Vec<SuggestionInfo>) {
    for line in live_lines(sketch) {
        let Some(segment) = sketch.segment(line.id) else {
            continue;
        };
        if segment.is_degenerate() {
            continue;
        }
        let sized = active.iter().any(|c| match c.kind {
            ConstraintKind::Length { line: l, .. } => l == line.id,
            ConstraintKind::Distance { point1, point2, .. } => {
                (point1 == line.start && point2 == line.end)
                    || (point1 == line.end && point2 == line.start)
            }
            _ => false,
        });
        if sized {
            continue;
        }
        let length = segment.length();
        out.push(SuggestionInfo::new(
            ConstraintKind::length(line.id, length),
            Priority::Medium,
            false,
            format!("Set the length of {} to {:.4} (measured)", line.id, length),
        ));
    }

    let curves = sketch
        .circles()
        .filter(|c| !c.construction)
        .map(|c| (CurveId::from(c.id), c.radius))
        .chain(
            sketch
                .arcs()
                .filter(|a| !a.construction)
                .map(|a| (CurveId::from(a.id), a.radius)),
        );
    for (curve, radius) in curves {
        let sized = active.iter().any(|c| match c.kind {
            ConstraintKind::Radius { curve: k, .. } | ConstraintKind::Diameter { curve: k, .. } => {
                k == curve
            }
            _ => false,
        });
        if sized {
            continue;
        }
        out.push(SuggestionInfo::new(
            ConstraintKind::radius(curve, radius),
            Priority::Medium,
            false,
            format!("Set the radius of {} to {:.4} (measured)", curve, radius),
        ));
    }
}

/// Angle between lines sharing an endpoint
fn angles(sketch: &Sketch, active: &[&Constraint], out: &mut Vec<SuggestionInfo>) {
    let lines: Vec<&Line> = live_lines(sketch).collect();
    let related = |a: LineId, b: LineId| {
        active.iter().any(|c| match c.kind {
            ConstraintKind::Parallel { line1, line2 }
            | ConstraintKind::Perpendicular { line1, line2 }
            | ConstraintKind::Angle { line1, line2, .. } => {
                (line1 == a && line2 == b) || (line1 == b && line2 == a)
            }
            _ => false,
        })
    };
    let axis_bound = |line: LineId| {
        active.iter().any(|c| {
            matches!(
                c.kind,
                ConstraintKind::Horizontal { line: l } | ConstraintKind::Vertical { line: l }
                    if l == line
            )
        })
    };

    for (i, first) in lines.iter().enumerate() {
        for second in &lines[i + 1..] {
            let adjacent = [first.start, first.end]
                .iter()
                .any(|p| *p == second.start || *p == second.end);
            if !adjacent || related(first.id, second.id) {
                continue;
            }
            if axis_bound(first.id) && axis_bound(second.id) {
                continue;
            }
            let (Some(s1), Some(s2)) = (sketch.segment(first.id), sketch.segment(second.id)) else {
                continue;
            };
            if s1.is_degenerate() || s2.is_degenerate() {
                continue;
            }
            let angle = angle_between(s1.direction(), s2.direction());
            out.push(SuggestionInfo::new(
                ConstraintKind::angle(first.id, second.id, angle),
                Priority::Medium,
                false,
                format!(
                    "Set the angle between {} and {} to {:.2}° (measured)",
                    first.id, second.id, angle
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::DVec2;

    fn suggestions(sketch: &Sketch) -> Vec<SuggestionInfo> {
        suggest(sketch, &DiagnosticsConfig::default())
    }

    #[test]
    fn test_near_axis_lines() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(10.0, 0.3));
        let p3 = sketch.add_point(DVec2::new(-0.2, -8.0));
        let flat = sketch.add_line(p1, p2).unwrap();
        let upright = sketch.add_line(p3, p1).unwrap();

        let found = suggestions(&sketch);
        // Pinned sketch: no anchor suggestion
        assert!(found.iter().all(|s| s.priority != Priority::Critical));
        assert_eq!(found[0].proposed, ConstraintKind::horizontal(flat));
        assert_eq!(found[0].priority, Priority::High);
        assert!(found[0].auto_addable);
        assert_eq!(found[1].proposed, ConstraintKind::vertical(upright));
        assert_eq!(found[1].dof_reduction, 1);
    }

    #[test]
    fn test_adjacent_lines_get_angle() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_point(DVec2::new(0.0, 0.0));
        let p2 = sketch.add_point(DVec2::new(10.0, 4.0));
        let p3 = sketch.add_point(DVec2::new(3.0, 9.0));
        let a = sketch.add_line(p1, p2).unwrap();
        let b = sketch.add_line(p1, p3).unwrap();

        let found = suggestions(&sketch);
        let angle = found
            .iter()
            .find(|s| matches!(s.proposed, ConstraintKind::Angle { .. }))
            .unwrap();
        let expected = angle_between(DVec2::new(10.0, 4.0), DVec2::new(3.0, 9.0));
        assert_abs_diff_eq!(angle.proposed.value().unwrap(), expected, epsilon = 1e-9);
        assert_eq!(angle.priority, Priority::Medium);

        sketch.add_constraint(ConstraintKind::perpendicular(a, b));
        let found = suggestions(&sketch);
        assert!(found
            .iter()
            .all(|s| !matches!(s.proposed, ConstraintKind::Angle { .. })));
    }

    #[test]
    fn test_construction_geometry_is_skipped() {
        let mut sketch = Sketch::new("test");
        let p1 = sketch.add_fixed_point(DVec2::ZERO);
        let p2 = sketch.add_point(DVec2::new(10.0, 0.1));
        let line = sketch.add_line(p1, p2).unwrap();
        sketch.line_mut(line).unwrap().construction = true;
        let circle = sketch.add_circle(p1, 3.0).unwrap();

        let found = suggestions(&sketch);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].proposed, ConstraintKind::radius(circle, 3.0));
        assert!(!found[0].auto_addable);
    }

    #[test]
    fn test_priority_order_and_cap() {
        let mut sketch = Sketch::new("test");
        for i in 0..5 {
            let y = i as f64 * 10.0;
            let a = sketch.add_point(DVec2::new(0.0, y));
            let b = sketch.add_point(DVec2::new(7.0, y + 3.0));
            sketch.add_line(a, b).unwrap();
        }

        let found = suggest(&sketch, &DiagnosticsConfig::default().with_max_suggestions(3));
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].priority, Priority::Critical);
        assert!(found[1..].iter().all(|s| s.priority == Priority::Medium));
        assert!(found.windows(2).all(|w| w[0].priority <= w[1].priority));
    }
}
