//! Oriented bounding boxes, SAT overlap and the forward sensing beam.

use crate::math::{normalize_or, rot90, Point2d, Vector2d};
use crate::util::Interval;
use cgmath::prelude::*;

/// Spacing of perimeter and centreline samples in m.
const SAMPLE_SPACING: f64 = 0.5; // m

/// An oriented rectangle with cached geometry for the sensing passes.
#[derive(Clone, Debug)]
pub struct Obb {
    pub center: Point2d,
    /// The two front corners then the two rear corners, in winding order.
    pub corners: [Point2d; 4],
    /// Unit edge axes: longitudinal then lateral.
    pub axes: [Vector2d; 2],
    pub half_len: f64,
    pub half_wid: f64,
    /// Points spaced along the perimeter, for gap measurement.
    pub perimeter: Vec<Point2d>,
    /// Points spaced along the longitudinal centreline.
    pub centerline: Vec<Point2d>,
}

impl Obb {
    /// Builds a box centred at `center` with its long axis along `heading`.
    pub fn new(center: Point2d, heading: Vector2d, length: f64, width: f64) -> Self {
        let axis = normalize_or(heading, Vector2d::new(1.0, 0.0));
        let lat = rot90(axis);
        let half_len = 0.5 * length;
        let half_wid = 0.5 * width;
        let fwd = axis * half_len;
        let side = lat * half_wid;
        let corners = [
            center + fwd + side,
            center + fwd - side,
            center - fwd - side,
            center - fwd + side,
        ];

        let mut perimeter = Vec::new();
        for i in 0..4 {
            let a = corners[i];
            let b = corners[(i + 1) % 4];
            let len = a.distance(b);
            let steps = ((len / SAMPLE_SPACING).ceil() as usize).max(1);
            for s in 0..steps {
                perimeter.push(a + (b - a) * (s as f64 / steps as f64));
            }
        }

        let rear = center - fwd;
        let front = center + fwd;
        let steps = ((length / SAMPLE_SPACING).ceil() as usize).max(1);
        let centerline = (0..=steps)
            .map(|s| rear + (front - rear) * (s as f64 / steps as f64))
            .collect();

        Self {
            center,
            corners,
            axes: [axis, lat],
            half_len,
            half_wid,
            perimeter,
            centerline,
        }
    }

    /// The middle of the front edge.
    pub fn front(&self) -> Point2d {
        self.center + self.axes[0] * self.half_len
    }

    /// The middle of the rear edge.
    pub fn rear(&self) -> Point2d {
        self.center - self.axes[0] * self.half_len
    }

    /// Half the diagonal, the radius of the bounding circle.
    pub fn radius(&self) -> f64 {
        (self.half_len * self.half_len + self.half_wid * self.half_wid).sqrt()
    }

    /// Projects the box, displaced by `delta`, onto an axis.
    fn project(&self, axis: Vector2d, delta: Vector2d) -> Interval<f64> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for corner in self.corners {
            let v = (corner + delta).to_vec().dot(axis);
            min = min.min(v);
            max = max.max(v);
        }
        Interval::new(min, max)
    }

    /// Separating-axis overlap test between two boxes.
    pub fn overlaps(&self, other: &Obb) -> bool {
        self.overlaps_shifted(Vector2d::zero(), other, Vector2d::zero())
    }

    /// Separating-axis overlap test with each box displaced by its delta.
    ///
    /// For rectangles the edge normals coincide with the other edge axis,
    /// so the four edge axes are the complete axis set.
    pub fn overlaps_shifted(&self, delta: Vector2d, other: &Obb, other_delta: Vector2d) -> bool {
        for axis in self.axes.into_iter().chain(other.axes) {
            let a = self.project(axis, delta);
            let b = other.project(axis, other_delta);
            if !a.overlaps(&b) {
                return false;
            }
        }
        true
    }
}

/// A single forward ray.
#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: Point2d,
    pub dir: Vector2d,
    pub length: f64,
}

impl Ray {
    pub fn end(&self) -> Point2d {
        self.origin + self.dir * self.length
    }
}

/// Three parallel forward rays: front centre and both front corners.
#[derive(Clone, Debug)]
pub struct Beam {
    pub rays: [Ray; 3],
}

impl Beam {
    /// Casts the beam forward from the front edge of a box.
    pub fn from_box(obb: &Obb, length: f64) -> Self {
        let dir = obb.axes[0];
        let rays = [
            Ray {
                origin: obb.front(),
                dir,
                length,
            },
            Ray {
                origin: obb.corners[1],
                dir,
                length,
            },
            Ray {
                origin: obb.corners[0],
                dir,
                length,
            },
        ];
        Self { rays }
    }

    /// The nearest intersection of any ray with the target box's edges.
    ///
    /// Returns the distance along the ray and the hit point.
    pub fn nearest_hit(&self, target: &Obb) -> Option<(f64, Point2d)> {
        let mut best: Option<(f64, Point2d)> = None;
        for ray in &self.rays {
            for i in 0..4 {
                let a = target.corners[i];
                let b = target.corners[(i + 1) % 4];
                if let Some(t) = ray_segment_intersection(ray, a, b) {
                    if best.map_or(true, |(d, _)| t < d) {
                        best = Some((t, ray.origin + ray.dir * t));
                    }
                }
            }
        }
        best
    }
}

/// Intersects a finite ray with a segment, returning the distance along
/// the ray when they cross.
pub fn ray_segment_intersection(ray: &Ray, a: Point2d, b: Point2d) -> Option<f64> {
    let r = ray.dir * ray.length;
    let s = b - a;
    let denom = r.x * s.y - r.y * s.x;
    if denom.abs() < 1e-12 {
        return None;
    }
    let ap = a - ray.origin;
    let t = (ap.x * s.y - ap.y * s.x) / denom;
    let u = (ap.x * r.y - ap.y * r.x) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(t * ray.length)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn axis_box(x: f64, y: f64) -> Obb {
        Obb::new(Point2d::new(x, y), Vector2d::new(1.0, 0.0), 4.0, 2.0)
    }

    #[test]
    fn corners_and_edges() {
        let obb = axis_box(0.0, 0.0);
        assert_approx_eq!(obb.front().x, 2.0, 1e-9);
        assert_approx_eq!(obb.rear().x, -2.0, 1e-9);
        assert_approx_eq!(obb.corners[1].y, -1.0, 1e-9);
    }

    #[test]
    fn sat_overlap() {
        let a = axis_box(0.0, 0.0);
        assert!(a.overlaps(&axis_box(3.0, 0.0)));
        assert!(!a.overlaps(&axis_box(5.0, 0.0)));
        assert!(!a.overlaps(&axis_box(0.0, 3.0)));

        // A rotated box slotting into the diagonal gap.
        let rot = Obb::new(
            Point2d::new(3.5, 0.0),
            Vector2d::new(1.0, 1.0),
            4.0,
            2.0,
        );
        assert!(axis_box(0.0, 0.0).overlaps(&rot));
    }

    #[test]
    fn sat_overlap_shifted() {
        let a = axis_box(0.0, 0.0);
        let b = axis_box(6.0, 0.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps_shifted(Vector2d::new(2.5, 0.0), &b, Vector2d::zero()));
    }

    #[test]
    fn beam_hits_box_ahead() {
        let a = axis_box(0.0, 0.0);
        let beam = Beam::from_box(&a, 10.0);
        let (dist, point) = beam.nearest_hit(&axis_box(7.0, 0.0)).unwrap();
        // Front edge at x=2, target rear edge at x=5.
        assert_approx_eq!(dist, 3.0, 1e-9);
        assert_approx_eq!(point.x, 5.0, 1e-9);

        assert!(beam.nearest_hit(&axis_box(20.0, 0.0)).is_none());
        assert!(beam.nearest_hit(&axis_box(7.0, 5.0)).is_none());
    }
}
