//! Constraint residuals
//!
//! Each constraint kind maps current geometry to one or two signed residual
//! components that vanish exactly when the constraint holds. The optimizer
//! works on the signed components; callers that only need "how wrong is it"
//! use [`constraint_error`], the Euclidean norm of the components.

use glam::DVec2;

use super::{Constraint, ConstraintId, ConstraintKind, CurveId, EntityRef, LineId, PointId, Sketch};
use crate::geometry::{CircleShape, Segment, angle_between};

/// Error reported for a constraint whose references do not resolve
pub const INVALID_PENALTY: f64 = 1.0e6;

/// Number of residual components a constraint kind produces
pub fn component_count(kind: &ConstraintKind) -> usize {
    match kind {
        ConstraintKind::Fixed { .. }
        | ConstraintKind::Coincident { .. }
        | ConstraintKind::PointOnLine { .. }
        | ConstraintKind::Midpoint { .. }
        | ConstraintKind::Concentric { .. }
        | ConstraintKind::Symmetric { .. } => 2,
        _ => 1,
    }
}

fn point(sketch: &Sketch, id: PointId) -> Result<DVec2, EntityRef> {
    sketch.position(id).ok_or(EntityRef::Point(id))
}

fn segment(sketch: &Sketch, id: LineId) -> Result<Segment, EntityRef> {
    sketch.segment(id).ok_or(EntityRef::Line(id))
}

fn curve(sketch: &Sketch, id: CurveId) -> Result<CircleShape, EntityRef> {
    sketch.curve_shape(id).ok_or(EntityRef::from(id))
}

fn push_vec(out: &mut Vec<f64>, v: DVec2) {
    out.push(v.x);
    out.push(v.y);
}

/// Push the signed residual components of `kind` onto `out`
///
/// On an unresolved reference nothing is pushed and the missing entity is
/// returned.
pub fn components(
    sketch: &Sketch,
    kind: &ConstraintKind,
    out: &mut Vec<f64>,
) -> Result<(), EntityRef> {
    match kind {
        ConstraintKind::Fixed { point: p, at } => {
            push_vec(out, point(sketch, *p)? - *at);
        }
        ConstraintKind::Coincident { point1, point2 } => {
            push_vec(out, point(sketch, *point1)? - point(sketch, *point2)?);
        }
        ConstraintKind::Horizontal { line } => {
            out.push(segment(sketch, *line)?.vector().y);
        }
        ConstraintKind::Vertical { line } => {
            out.push(segment(sketch, *line)?.vector().x);
        }
        ConstraintKind::Parallel { line1, line2 } => {
            let d1 = segment(sketch, *line1)?.direction();
            let d2 = segment(sketch, *line2)?.direction();
            out.push(d1.perp_dot(d2));
        }
        ConstraintKind::Perpendicular { line1, line2 } => {
            let d1 = segment(sketch, *line1)?.direction();
            let d2 = segment(sketch, *line2)?.direction();
            out.push(d1.dot(d2));
        }
        ConstraintKind::EqualLength { line1, line2 } => {
            out.push(segment(sketch, *line1)?.length() - segment(sketch, *line2)?.length());
        }
        ConstraintKind::PointOnLine { point: p, line } => {
            let p = point(sketch, *p)?;
            push_vec(out, p - segment(sketch, *line)?.nearest_point(p));
        }
        ConstraintKind::Midpoint { point: p, line } => {
            push_vec(out, point(sketch, *p)? - segment(sketch, *line)?.midpoint());
        }
        ConstraintKind::Tangent { line, curve: c } => {
            let seg = segment(sketch, *line)?;
            let shape = curve(sketch, *c)?;
            out.push(seg.line_distance(shape.center) - shape.radius);
        }
        ConstraintKind::Concentric { curve1, curve2 } => {
            push_vec(out, curve(sketch, *curve1)?.center - curve(sketch, *curve2)?.center);
        }
        ConstraintKind::EqualRadius { curve1, curve2 } => {
            out.push(curve(sketch, *curve1)?.radius - curve(sketch, *curve2)?.radius);
        }
        ConstraintKind::PointOnCircle { point: p, curve: c } => {
            let p = point(sketch, *p)?;
            let shape = curve(sketch, *c)?;
            // Negative inside the circle so the residual stays smooth
            let inside = (p - shape.center).length() < shape.radius;
            let d = shape.distance_to(p);
            out.push(if inside { -d } else { d });
        }
        ConstraintKind::Symmetric {
            point1,
            point2,
            axis,
        } => {
            let axis = segment(sketch, *axis)?;
            let mirrored = axis.reflect(point(sketch, *point1)?);
            push_vec(out, point(sketch, *point2)? - mirrored);
        }
        ConstraintKind::Length { line, value } => {
            out.push(segment(sketch, *line)?.length() - value);
        }
        ConstraintKind::Distance {
            point1,
            point2,
            value,
        } => {
            out.push((point(sketch, *point2)? - point(sketch, *point1)?).length() - value);
        }
        ConstraintKind::HorizontalDistance {
            point1,
            point2,
            value,
        } => {
            out.push((point(sketch, *point2)?.x - point(sketch, *point1)?.x).abs() - value);
        }
        ConstraintKind::VerticalDistance {
            point1,
            point2,
            value,
        } => {
            out.push((point(sketch, *point2)?.y - point(sketch, *point1)?.y).abs() - value);
        }
        ConstraintKind::Angle {
            line1,
            line2,
            value,
        } => {
            let d1 = segment(sketch, *line1)?.direction();
            let d2 = segment(sketch, *line2)?.direction();
            out.push(angle_between(d1, d2) - value);
        }
        ConstraintKind::Radius { curve: c, value } => {
            out.push(curve(sketch, *c)?.radius - value);
        }
        ConstraintKind::Diameter { curve: c, value } => {
            out.push(2.0 * curve(sketch, *c)?.radius - value);
        }
    }
    Ok(())
}

/// Non-negative error of a single constraint kind
///
/// Returns [`INVALID_PENALTY`] when a reference does not resolve.
pub fn kind_error(sketch: &Sketch, kind: &ConstraintKind) -> f64 {
    let mut out = Vec::with_capacity(2);
    match components(sketch, kind, &mut out) {
        Ok(()) => out.iter().map(|r| r * r).sum::<f64>().sqrt(),
        Err(_) => INVALID_PENALTY,
    }
}

/// Non-negative error of a constraint against the current geometry
pub fn constraint_error(sketch: &Sketch, constraint: &Constraint) -> f64 {
    kind_error(sketch, &constraint.kind)
}

/// Error of every active constraint, in sketch order
pub fn evaluate_all(sketch: &Sketch) -> Vec<(ConstraintId, f64)> {
    sketch
        .constraints()
        .filter(|c| c.is_active())
        .map(|c| (c.id, constraint_error(sketch, c)))
        .collect()
}

/// Weighted aggregate error of the active constraints
///
/// The Euclidean norm of `weight * error` over every active constraint.
pub fn total_error(sketch: &Sketch) -> f64 {
    sketch
        .constraints()
        .filter(|c| c.is_active())
        .map(|c| {
            let e = c.weight * constraint_error(sketch, c);
            e * e
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line(sketch: &mut Sketch, a: DVec2, b: DVec2) -> (LineId, PointId, PointId) {
        let p1 = sketch.add_point(a);
        let p2 = sketch.add_point(b);
        (sketch.add_line(p1, p2).unwrap(), p1, p2)
    }

    #[test]
    fn test_orientation_residuals() {
        let mut sketch = Sketch::new("test");
        let (l1, _, _) = line(&mut sketch, DVec2::ZERO, DVec2::new(10.0, 2.0));
        let (l2, _, _) = line(&mut sketch, DVec2::ZERO, DVec2::new(0.0, 5.0));

        assert_abs_diff_eq!(kind_error(&sketch, &ConstraintKind::horizontal(l1)), 2.0);
        assert_abs_diff_eq!(kind_error(&sketch, &ConstraintKind::vertical(l2)), 0.0);
        assert_abs_diff_eq!(kind_error(&sketch, &ConstraintKind::horizontal(l2)), 5.0);

        let d1 = DVec2::new(10.0, 2.0).normalize();
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::perpendicular(l1, l2)),
            d1.y.abs(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::parallel(l1, l2)),
            d1.x.abs(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_dimensional_residuals() {
        let mut sketch = Sketch::new("test");
        let (l1, p1, p2) = line(&mut sketch, DVec2::ZERO, DVec2::new(3.0, 4.0));
        let (l2, _, _) = line(&mut sketch, DVec2::ZERO, DVec2::new(0.0, 7.0));

        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::length(l1, 5.0)),
            0.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::length(l1, 8.0)),
            3.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::distance(p1, p2, 4.0)),
            1.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::horizontal_distance(p2, p1, 3.0)),
            0.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::vertical_distance(p1, p2, 1.0)),
            3.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::equal_length(l1, l2)),
            2.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::angle(l1, l2, 90.0)),
            53.130_102_354,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_point_residuals() {
        let mut sketch = Sketch::new("test");
        let (l1, _, _) = line(&mut sketch, DVec2::ZERO, DVec2::new(10.0, 0.0));
        let p = sketch.add_point(DVec2::new(5.0, 3.0));
        let q = sketch.add_point(DVec2::new(5.0, -3.0));

        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::point_on_line(p, l1)),
            3.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::midpoint(p, l1)),
            3.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::coincident(p, q)),
            6.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::symmetric(p, q, l1)),
            0.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::fixed(p, DVec2::new(2.0, -1.0))),
            5.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_curve_residuals() {
        let mut sketch = Sketch::new("test");
        let (l1, _, _) = line(&mut sketch, DVec2::new(-10.0, 5.0), DVec2::new(10.0, 5.0));
        let c1 = sketch.add_point(DVec2::ZERO);
        let c2 = sketch.add_point(DVec2::new(1.0, 0.0));
        let circle = sketch.add_circle(c1, 5.0).unwrap();
        let arc = sketch.add_arc(c2, 2.0, 0.0, 90.0).unwrap();
        let on = sketch.add_point(DVec2::new(0.0, 7.0));

        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::tangent(l1, circle)),
            0.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::tangent(l1, arc)),
            3.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::concentric(circle, arc)),
            1.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::equal_radius(circle, arc)),
            3.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::point_on_circle(on, circle)),
            2.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::radius(circle, 4.0)),
            1.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            kind_error(&sketch, &ConstraintKind::diameter(arc, 4.0)),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_missing_reference_is_penalized() {
        let mut sketch = Sketch::new("test");
        let id = sketch.add_constraint(ConstraintKind::length(LineId(12), 10.0));
        let constraint = sketch.constraint(id).unwrap();
        let error = constraint_error(&sketch, constraint);
        assert!(error >= 1e5);
        assert!(error.is_finite());
        assert_eq!(evaluate_all(&sketch), vec![(id, INVALID_PENALTY)]);
    }

    #[test]
    fn test_component_counts_match() {
        let mut sketch = Sketch::new("test");
        let (l1, p1, p2) = line(&mut sketch, DVec2::ZERO, DVec2::new(1.0, 1.0));
        let center = sketch.add_point(DVec2::ZERO);
        let circle = sketch.add_circle(center, 1.0).unwrap();
        let kinds = [
            ConstraintKind::fixed(p1, DVec2::ZERO),
            ConstraintKind::coincident(p1, p2),
            ConstraintKind::horizontal(l1),
            ConstraintKind::point_on_line(p1, l1),
            ConstraintKind::midpoint(p1, l1),
            ConstraintKind::concentric(circle, circle),
            ConstraintKind::symmetric(p1, p2, l1),
            ConstraintKind::radius(circle, 1.0),
        ];
        for kind in &kinds {
            let mut out = Vec::new();
            components(&sketch, kind, &mut out).unwrap();
            assert_eq!(out.len(), component_count(kind), "{}", kind.name());
        }
    }

    #[test]
    fn test_total_error_skips_inactive() {
        let mut sketch = Sketch::new("test");
        let (l1, _, _) = line(&mut sketch, DVec2::ZERO, DVec2::new(4.0, 3.0));
        let h = sketch.add_constraint(ConstraintKind::horizontal(l1));
        sketch.add_constraint(ConstraintKind::vertical(l1));
        assert_abs_diff_eq!(total_error(&sketch), 5.0, epsilon = 1e-12);

        sketch.set_constraint_driving(h, false).unwrap();
        assert_abs_diff_eq!(total_error(&sketch), 4.0, epsilon = 1e-12);
    }
}
