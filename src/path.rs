//! Vehicle routes through the junction and queries along them.

use crate::geometry::{Approach, Turn};
use crate::math::{normalize_or, ArcLengthTable, PathSegment, Point2d, Vector2d};
use arrayvec::ArrayVec;
use cgmath::prelude::*;
use log::warn;

/// A route never has more than approach line, manoeuvre and departure line.
const MAX_SEGMENTS: usize = 4;

/// Segments below this length are treated as degenerate.
const DEGENERATE_LEN: f64 = 1e-9; // m

/// Bracket radius for closest-point refinement, as a share of path length.
const REFINE_SHARE: f64 = 0.002;

/// Minimum bracket radius for closest-point refinement in m.
const REFINE_MIN: f64 = 0.1; // m

/// Subdivisions of the refinement bracket.
const REFINE_STEPS: usize = 30;

/// Coarse closest-point samples per metre of path.
const COARSE_PER_M: f64 = 0.5;

/// A position on a path with its unit tangent.
#[derive(Copy, Clone, Debug)]
pub struct PathSample {
    pub pos: Point2d,
    pub tan: Vector2d,
}

/// The result of projecting a point onto a path.
#[derive(Copy, Clone, Debug)]
pub struct ClosestPoint {
    /// Distance along the path in m.
    pub distance: f64,
    /// The closest position on the path.
    pub pos: Point2d,
    /// Distance from the query point to the path in m.
    pub offset: f64,
}

/// An immutable polyline-of-curves route with arc-length parametrisation.
#[derive(Clone, Debug)]
pub struct Path {
    segments: ArrayVec<PathSegment, MAX_SEGMENTS>,
    tables: ArrayVec<ArcLengthTable, MAX_SEGMENTS>,
    /// Cumulative length at the start of each segment.
    starts: ArrayVec<f64, MAX_SEGMENTS>,
    length: f64,
}

impl Path {
    /// Creates a path from segments, dropping degenerate ones.
    pub fn new(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        let mut kept = ArrayVec::new();
        let mut tables: ArrayVec<ArcLengthTable, MAX_SEGMENTS> = ArrayVec::new();
        let mut starts = ArrayVec::new();
        let mut length = 0.0;
        for segment in segments {
            let table = ArcLengthTable::build(&segment);
            if table.length() < DEGENERATE_LEN {
                continue;
            }
            if kept.is_full() {
                warn!("path segment limit reached, dropping remainder");
                break;
            }
            starts.push(length);
            length += table.length();
            kept.push(segment);
            tables.push(table);
        }
        Self {
            segments: kept,
            tables,
            starts,
            length,
        }
    }

    /// The total arc length of the path in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Samples the position and unit tangent at a distance along the path.
    ///
    /// The distance is clamped to `[0, length]`. Degenerate tangents fall
    /// back to the segment chord, then to the x-axis. An empty path
    /// answers with the origin and the default tangent.
    pub fn sample_at(&self, dist: f64) -> PathSample {
        if self.is_empty() {
            return PathSample {
                pos: Point2d::new(0.0, 0.0),
                tan: Vector2d::new(1.0, 0.0),
            };
        }
        let dist = dist.clamp(0.0, self.length);
        let idx = self.segment_at(dist);
        let segment = &self.segments[idx];
        let local = dist - self.starts[idx];
        let t = self.tables[idx].param_at(local);
        let pos = segment.sample(t);
        let chord = normalize_or(segment.end() - segment.start(), Vector2d::new(1.0, 0.0));
        let tan = normalize_or(segment.sample_dt(t), chord);
        PathSample { pos, tan }
    }

    /// Finds the closest point on the path to the given point.
    ///
    /// Coarse samples proportional to path length bracket the minimum,
    /// which is then refined by subdividing a small window around it.
    pub fn closest_to(&self, point: Point2d) -> ClosestPoint {
        if self.is_empty() || self.length < DEGENERATE_LEN {
            return ClosestPoint {
                distance: 0.0,
                pos: point,
                offset: 0.0,
            };
        }

        let coarse = ((self.length * COARSE_PER_M).ceil() as usize).clamp(8, 400);
        let mut best_dist = 0.0;
        let mut best_d2 = f64::INFINITY;
        for i in 0..=coarse {
            let d = self.length * i as f64 / coarse as f64;
            let d2 = self.sample_at(d).pos.distance2(point);
            if d2 < best_d2 {
                best_d2 = d2;
                best_dist = d;
            }
        }

        let radius = f64::max(REFINE_SHARE * self.length, REFINE_MIN);
        let lo = (best_dist - radius).max(0.0);
        let hi = (best_dist + radius).min(self.length);
        for i in 0..=REFINE_STEPS {
            let d = lo + (hi - lo) * i as f64 / REFINE_STEPS as f64;
            let d2 = self.sample_at(d).pos.distance2(point);
            if d2 < best_d2 {
                best_d2 = d2;
                best_dist = d;
            }
        }

        let pos = self.sample_at(best_dist).pos;
        ClosestPoint {
            distance: best_dist,
            pos,
            offset: pos.distance(point),
        }
    }

    /// Index of the segment containing the given (clamped) distance.
    fn segment_at(&self, dist: f64) -> usize {
        let mut idx = self.segments.len() - 1;
        for (i, start) in self.starts.iter().enumerate().skip(1) {
            if dist < *start {
                idx = i - 1;
                break;
            }
        }
        idx
    }
}

/// Builds the manoeuvre curve from an entry anchor to an exit anchor.
///
/// Straight movements use a cubic whose inner control points sit at the
/// midpoint of the dominant axis; turns use a quadratic whose control
/// point is the axis-aligned corner of the two roads.
pub fn maneuver_segment(
    entry: Point2d,
    exit: Point2d,
    entry_leg: Approach,
    exit_leg: Approach,
    turn: Turn,
) -> PathSegment {
    if entry.distance(exit) < 1e-3 {
        return PathSegment::Line {
            p0: entry,
            p1: exit,
        };
    }

    match turn {
        Turn::Straight => {
            let delta = exit - entry;
            let (p1, p2) = if delta.x.abs() >= delta.y.abs() {
                let mid_x = 0.5 * (entry.x + exit.x);
                (Point2d::new(mid_x, entry.y), Point2d::new(mid_x, exit.y))
            } else {
                let mid_y = 0.5 * (entry.y + exit.y);
                (Point2d::new(entry.x, mid_y), Point2d::new(exit.x, mid_y))
            };
            PathSegment::Cubic {
                p0: entry,
                p1,
                p2,
                p3: exit,
            }
        }
        Turn::Left | Turn::Right => {
            // The corner control point keeps the entry road's axis, then
            // the exit road's axis.
            let mut px = 0.5 * (entry.x + exit.x);
            let mut py = 0.5 * (entry.y + exit.y);
            if entry_leg.is_vertical() {
                px = entry.x;
            } else {
                py = entry.y;
            }
            if exit_leg.is_vertical() {
                px = exit.x;
            } else {
                py = exit.y;
            }
            PathSegment::Quadratic {
                p0: entry,
                p1: Point2d::new(px, py),
                p2: exit,
            }
        }
    }
}

/// Builds a full route: approach line, manoeuvre, then a departure line
/// carrying the vehicle out of the simulated bounds.
pub fn build_route(
    rear: Point2d,
    entry: Point2d,
    exit: Point2d,
    entry_leg: Approach,
    exit_leg: Approach,
    turn: Turn,
    depart_len: f64,
) -> Path {
    let maneuver = maneuver_segment(entry, exit, entry_leg, exit_leg, turn);
    let out = exit + exit_leg.outbound() * depart_len;
    Path::new([
        PathSegment::Line {
            p0: rear,
            p1: entry,
        },
        maneuver,
        PathSegment::Line { p0: exit, p1: out },
    ])
}

/// Builds the straight-ahead fallback route used when lane anchors are
/// missing: a single line through the junction and out of bounds.
pub fn fallback_route(rear: Point2d, dir: Vector2d, depart_len: f64) -> Path {
    Path::new([PathSegment::Line {
        p0: rear,
        p1: rear + dir * depart_len,
    }])
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn straight_route() -> Path {
        build_route(
            Point2d::new(1.5, 60.0),
            Point2d::new(1.5, 10.0),
            Point2d::new(1.5, -10.0),
            Approach::North,
            Approach::South,
            Turn::Straight,
            40.0,
        )
    }

    #[test]
    fn starts_at_first_segment_start() {
        let path = straight_route();
        let sample = path.sample_at(0.0);
        assert_approx_eq!(sample.pos.x, 1.5, 1e-9);
        assert_approx_eq!(sample.pos.y, 60.0, 1e-9);
    }

    #[test]
    fn straight_route_keeps_heading() {
        let path = straight_route();
        let n = 20;
        for i in 0..=n {
            let d = path.length() * i as f64 / n as f64;
            let sample = path.sample_at(d);
            assert_approx_eq!(sample.pos.x, 1.5, 1e-3);
            assert_approx_eq!(sample.tan.y, -1.0, 1e-6);
        }
    }

    #[test]
    fn sample_clamps_to_ends() {
        let path = straight_route();
        let end = path.sample_at(path.length() + 100.0);
        assert_approx_eq!(end.pos.y, -50.0, 1e-6);
        let start = path.sample_at(-5.0);
        assert_approx_eq!(start.pos.y, 60.0, 1e-6);
    }

    #[test]
    fn closest_point_projects_laterally() {
        let path = straight_route();
        let hit = path.closest_to(Point2d::new(3.0, 40.0));
        assert_approx_eq!(hit.pos.x, 1.5, 1e-2);
        assert_approx_eq!(hit.pos.y, 40.0, 0.1);
        assert_approx_eq!(hit.offset, 1.5, 1e-2);
    }

    #[test]
    fn turn_route_bends_through_corner() {
        // North entry turning left exits east.
        let path = build_route(
            Point2d::new(1.5, 60.0),
            Point2d::new(1.5, 10.0),
            Point2d::new(10.0, 1.5),
            Approach::North,
            Approach::East,
            Turn::Left,
            40.0,
        );
        // Endpoint tangents follow the two roads.
        let start = path.sample_at(45.0);
        assert_approx_eq!(start.tan.y, -1.0, 1e-3);
        let end = path.sample_at(path.length());
        assert_approx_eq!(end.tan.x, 1.0, 1e-6);
    }

    #[test]
    fn fully_degenerate_path_answers_identity() {
        let p = Point2d::new(5.0, 5.0);
        let path = Path::new([PathSegment::Line { p0: p, p1: p }]);
        assert!(path.is_empty());
        let sample = path.sample_at(3.0);
        assert_approx_eq!(sample.tan.x, 1.0, 1e-9);
        let hit = path.closest_to(Point2d::new(3.0, 4.0));
        assert_approx_eq!(hit.distance, 0.0, 1e-9);
        assert_approx_eq!(hit.offset, 0.0, 1e-9);
    }

    #[test]
    fn degenerate_segments_are_dropped() {
        let p = Point2d::new(5.0, 5.0);
        let path = Path::new([
            PathSegment::Line { p0: p, p1: p },
            PathSegment::Line {
                p0: p,
                p1: Point2d::new(15.0, 5.0),
            },
        ]);
        assert_approx_eq!(path.length(), 10.0, 1e-6);
        assert_approx_eq!(path.sample_at(0.0).pos.x, 5.0, 1e-9);
    }
}
