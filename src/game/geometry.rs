//! Axis-aligned boxes, ray casts and reflection on the play plane

use glam::Vec2;

/// Direction components smaller than this are treated as parallel to a slab
const PARALLEL_EPSILON: f32 = 1e-7;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

/// Where a ray entered a box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin along its (unit) direction
    pub distance: f32,
    /// Outward normal of the face the ray entered through
    pub normal: Vec2,
}

impl Aabb {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center(center: Vec2, half_extents: Vec2) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    #[cfg(test)]
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Slab test. Rays that start inside the box report no hit: only entries count.
    pub fn ray_entry(&self, origin: Vec2, dir: Vec2, max_distance: f32) -> Option<RayHit> {
        let origin = origin.to_array();
        let dir = dir.to_array();
        let lo = self.min.to_array();
        let hi = self.max.to_array();

        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;
        let mut normal = [0.0f32; 2];

        for axis in 0..2 {
            if dir[axis].abs() < PARALLEL_EPSILON {
                if origin[axis] < lo[axis] || origin[axis] > hi[axis] {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / dir[axis];
            let mut near = (lo[axis] - origin[axis]) * inv;
            let mut far = (hi[axis] - origin[axis]) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }

            if near > t_enter {
                t_enter = near;
                normal = [0.0, 0.0];
                normal[axis] = -dir[axis].signum();
            }
            t_exit = t_exit.min(far);
            if t_enter > t_exit {
                return None;
            }
        }

        if t_enter < 0.0 || t_enter > max_distance {
            return None;
        }

        Some(RayHit {
            distance: t_enter,
            normal: Vec2::from_array(normal),
        })
    }
}

/// Mirror `dir` about the surface with unit `normal`: `d - 2(d·n)n`
pub fn reflect(dir: Vec2, normal: Vec2) -> Vec2 {
    dir - 2.0 * dir.dot(normal) * normal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::from_center(Vec2::ZERO, Vec2::splat(1.0))
    }

    #[test]
    fn ray_hits_near_face_with_outward_normal() {
        let hit = unit_box()
            .ray_entry(Vec2::new(-5.0, 0.0), Vec2::X, 10.0)
            .expect("ray should hit");
        assert!((hit.distance - 4.0).abs() < 1e-5);
        assert_eq!(hit.normal, Vec2::new(-1.0, 0.0));

        let hit = unit_box()
            .ray_entry(Vec2::new(0.5, 3.0), Vec2::NEG_Y, 10.0)
            .expect("ray should hit");
        assert!((hit.distance - 2.0).abs() < 1e-5);
        assert_eq!(hit.normal, Vec2::Y);
    }

    #[test]
    fn ray_respects_max_distance() {
        assert!(unit_box()
            .ray_entry(Vec2::new(-5.0, 0.0), Vec2::X, 3.9)
            .is_none());
    }

    #[test]
    fn ray_starting_inside_or_pointing_away_misses() {
        assert!(unit_box().ray_entry(Vec2::ZERO, Vec2::X, 10.0).is_none());
        assert!(unit_box()
            .ray_entry(Vec2::new(-5.0, 0.0), Vec2::NEG_X, 10.0)
            .is_none());
        assert!(unit_box()
            .ray_entry(Vec2::new(-5.0, 2.0), Vec2::X, 10.0)
            .is_none());
    }

    #[test]
    fn diagonal_ray_picks_the_face_entered_last() {
        let dir = Vec2::new(1.0, 0.2).normalize();
        let hit = unit_box()
            .ray_entry(Vec2::new(-3.0, -0.5), dir, 10.0)
            .expect("ray should hit");
        assert_eq!(hit.normal, Vec2::NEG_X);
    }

    #[test]
    fn reflection_preserves_length_and_angle() {
        let dir = Vec2::new(0.6, -0.8);
        let normal = Vec2::Y;
        let out = reflect(dir, normal);
        assert!((out.length() - dir.length()).abs() < 1e-6);
        // angle_between is signed; the two sides of the normal differ only in sign.
        let incidence = (-dir).angle_between(normal).abs();
        let reflection = out.angle_between(normal).abs();
        assert!((incidence - reflection).abs() < 1e-5);
        assert_eq!(out, Vec2::new(0.6, 0.8));
    }
}
