//! Variable extraction
//!
//! Maps the free scalar parameters of a sketch onto a flat vector. Order is
//! stable: point coordinates in sketch order, then circle radii, then arc
//! radius, start angle and end angle.

use std::collections::HashSet;

use super::{PointId, Sketch, SketchEntity};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    PointX(usize),
    PointY(usize),
    CircleRadius(usize),
    ArcRadius(usize),
    ArcStart(usize),
    ArcEnd(usize),
}

impl Slot {
    fn entity_index(self) -> usize {
        match self {
            Slot::PointX(i)
            | Slot::PointY(i)
            | Slot::CircleRadius(i)
            | Slot::ArcRadius(i)
            | Slot::ArcStart(i)
            | Slot::ArcEnd(i) => i,
        }
    }
}

/// Maps sketch parameters to variable indices
#[derive(Debug, Clone, Default)]
pub(crate) struct VariableMap {
    slots: Vec<Slot>,
}

impl VariableMap {
    /// Build the variable map from the current sketch
    ///
    /// Pinned points are skipped, each point is visited once, and
    /// construction geometry that nothing live depends on is left out.
    pub fn build(sketch: &Sketch) -> Self {
        let pinned = sketch.pinned_points();

        let constrained: HashSet<u32> = sketch
            .constraints()
            .filter(|c| c.is_active())
            .flat_map(|c| c.kind.referenced_entities())
            .map(|e| e.raw())
            .collect();

        let curve_live =
            |e: &SketchEntity| !e.is_construction() || constrained.contains(&e.raw_id());

        let used_by_live_curve: HashSet<PointId> = sketch
            .entities
            .iter()
            .filter(|e| !matches!(e, SketchEntity::Point(_)) && curve_live(e))
            .flat_map(|e| e.referenced_points())
            .collect();

        let mut map = VariableMap::default();
        let mut seen = HashSet::new();

        for (i, entity) in sketch.entities.iter().enumerate() {
            if let SketchEntity::Point(p) = entity {
                if pinned.contains_key(&p.id) || !seen.insert(p.id) {
                    continue;
                }
                let live = !p.construction
                    || constrained.contains(&p.id.raw())
                    || used_by_live_curve.contains(&p.id);
                if live {
                    map.slots.push(Slot::PointX(i));
                    map.slots.push(Slot::PointY(i));
                }
            }
        }

        for (i, entity) in sketch.entities.iter().enumerate() {
            if let SketchEntity::Circle(_) = entity
                && curve_live(entity)
            {
                map.slots.push(Slot::CircleRadius(i));
            }
        }

        for (i, entity) in sketch.entities.iter().enumerate() {
            if let SketchEntity::Arc(_) = entity
                && curve_live(entity)
            {
                map.slots.push(Slot::ArcRadius(i));
                map.slots.push(Slot::ArcStart(i));
                map.slots.push(Slot::ArcEnd(i));
            }
        }

        map
    }

    /// Number of scalar variables
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read the current variable values from the sketch
    pub fn values(&self, sketch: &Sketch) -> Vec<f64> {
        self.slots
            .iter()
            .map(|slot| match (*slot, slot_entity(sketch, *slot)) {
                (Slot::PointX(_), Some(SketchEntity::Point(p))) => p.position.x,
                (Slot::PointY(_), Some(SketchEntity::Point(p))) => p.position.y,
                (Slot::CircleRadius(_), Some(SketchEntity::Circle(c))) => c.radius,
                (Slot::ArcRadius(_), Some(SketchEntity::Arc(a))) => a.radius,
                (Slot::ArcStart(_), Some(SketchEntity::Arc(a))) => a.start_angle,
                (Slot::ArcEnd(_), Some(SketchEntity::Arc(a))) => a.end_angle,
                _ => 0.0,
            })
            .collect()
    }

    /// Write variable values back into the sketch
    pub fn write(&self, sketch: &mut Sketch, values: &[f64]) {
        for (slot, &value) in self.slots.iter().zip(values) {
            match (*slot, sketch.entities.get_mut(slot.entity_index())) {
                (Slot::PointX(_), Some(SketchEntity::Point(p))) => p.position.x = value,
                (Slot::PointY(_), Some(SketchEntity::Point(p))) => p.position.y = value,
                (Slot::CircleRadius(_), Some(SketchEntity::Circle(c))) => c.radius = value,
                (Slot::ArcRadius(_), Some(SketchEntity::Arc(a))) => a.radius = value,
                (Slot::ArcStart(_), Some(SketchEntity::Arc(a))) => a.start_angle = value,
                (Slot::ArcEnd(_), Some(SketchEntity::Arc(a))) => a.end_angle = value,
                _ => {}
            }
        }
    }
}

fn slot_entity(sketch: &Sketch, slot: Slot) -> Option<&SketchEntity> {
    sketch.entities.get(slot.entity_index())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::ConstraintKind;
    use glam::DVec2;

    #[test]
    fn test_shared_points_are_counted_once() {
        let mut sketch = Sketch::new("test");
        let a = sketch.add_point(DVec2::ZERO);
        let b = sketch.add_point(DVec2::new(1.0, 0.0));
        let c = sketch.add_point(DVec2::new(1.0, 1.0));
        sketch.add_line(a, b).unwrap();
        sketch.add_line(b, c).unwrap();
        sketch.add_line(c, a).unwrap();

        let map = VariableMap::build(&sketch);
        assert_eq!(map.len(), 6);
        assert_eq!(map.values(&sketch), vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_order_and_pinning() {
        let mut sketch = Sketch::new("test");
        let center = sketch.add_point(DVec2::new(1.0, 2.0));
        let arc_center = sketch.add_fixed_point(DVec2::ZERO);
        let arc = sketch.add_arc(arc_center, 3.0, 10.0, 80.0).unwrap();
        let circle = sketch.add_circle(center, 4.0).unwrap();
        let _ = (arc, circle);

        let map = VariableMap::build(&sketch);
        // center x/y, circle radius, arc radius/start/end
        assert_eq!(map.values(&sketch), vec![1.0, 2.0, 4.0, 3.0, 10.0, 80.0]);

        sketch.add_constraint(ConstraintKind::fixed(center, DVec2::ZERO));
        let map = VariableMap::build(&sketch);
        assert_eq!(map.values(&sketch), vec![4.0, 3.0, 10.0, 80.0]);
    }

    #[test]
    fn test_write_round_trip() {
        let mut sketch = Sketch::new("test");
        let p = sketch.add_point(DVec2::new(1.0, 2.0));
        let circle = sketch.add_circle(p, 4.0).unwrap();
        let map = VariableMap::build(&sketch);
        map.write(&mut sketch, &[5.0, 6.0, 7.0]);
        assert_eq!(sketch.position(p), Some(DVec2::new(5.0, 6.0)));
        assert_eq!(sketch.circle(circle).unwrap().radius, 7.0);
    }

    #[test]
    fn test_unreferenced_construction_point_is_display_only() {
        let mut sketch = Sketch::new("test");
        let helper = sketch.add_point(DVec2::new(3.0, 3.0));
        sketch.point_mut(helper).unwrap().construction = true;
        assert!(VariableMap::build(&sketch).is_empty());

        let other = sketch.add_point(DVec2::ZERO);
        sketch.add_constraint(ConstraintKind::coincident(helper, other));
        assert_eq!(VariableMap::build(&sketch).len(), 4);
    }
}
