use super::{Point2d, Vector2d};
use cgmath::prelude::*;

/// Sample count bounds for an arc-length table.
const TABLE_SAMPLES_MIN: usize = 12;
const TABLE_SAMPLES_MAX: usize = 200;

/// Spacing between arc-length table samples in m.
const TABLE_SPACING: f64 = 0.8; // m

/// One segment of a vehicle route: a straight line or a Bézier curve.
#[derive(Copy, Clone, Debug)]
pub enum PathSegment {
    Line {
        p0: Point2d,
        p1: Point2d,
    },
    Quadratic {
        p0: Point2d,
        p1: Point2d,
        p2: Point2d,
    },
    Cubic {
        p0: Point2d,
        p1: Point2d,
        p2: Point2d,
        p3: Point2d,
    },
}

impl PathSegment {
    /// Samples the segment at parameter `t` in `[0, 1]`.
    pub fn sample(&self, t: f64) -> Point2d {
        match *self {
            PathSegment::Line { p0, p1 } => p0 + t * (p1 - p0),
            PathSegment::Quadratic { p0, p1, p2 } => {
                let t1 = 1.0 - t;
                Point2d::from_vec(
                    t1 * t1 * p0.to_vec() + 2.0 * t1 * t * p1.to_vec() + t * t * p2.to_vec(),
                )
            }
            PathSegment::Cubic { p0, p1, p2, p3 } => {
                let t1 = 1.0 - t;
                Point2d::from_vec(
                    t1 * t1 * t1 * p0.to_vec()
                        + 3.0 * t1 * t1 * t * p1.to_vec()
                        + 3.0 * t1 * t * t * p2.to_vec()
                        + t * t * t * p3.to_vec(),
                )
            }
        }
    }

    /// Samples the derivative of the segment with respect to `t`.
    pub fn sample_dt(&self, t: f64) -> Vector2d {
        match *self {
            PathSegment::Line { p0, p1 } => p1 - p0,
            PathSegment::Quadratic { p0, p1, p2 } => {
                let t1 = 1.0 - t;
                -2.0 * t1 * p0.to_vec() + (2.0 - 4.0 * t) * p1.to_vec() + 2.0 * t * p2.to_vec()
            }
            PathSegment::Cubic { p0, p1, p2, p3 } => {
                let t1 = 1.0 - t;
                (-3.0 * t1 * t1) * p0.to_vec()
                    + (9.0 * t * t - 12.0 * t + 3.0) * p1.to_vec()
                    + (-9.0 * t * t + 6.0 * t) * p2.to_vec()
                    + (3.0 * t * t) * p3.to_vec()
            }
        }
    }

    /// The start point of the segment.
    pub fn start(&self) -> Point2d {
        match *self {
            PathSegment::Line { p0, .. } => p0,
            PathSegment::Quadratic { p0, .. } => p0,
            PathSegment::Cubic { p0, .. } => p0,
        }
    }

    /// The end point of the segment.
    pub fn end(&self) -> Point2d {
        match *self {
            PathSegment::Line { p1, .. } => p1,
            PathSegment::Quadratic { p2, .. } => p2,
            PathSegment::Cubic { p3, .. } => p3,
        }
    }

    /// Approximates the segment length by chord sampling.
    pub fn approx_length(&self) -> f64 {
        if let PathSegment::Line { p0, p1 } = *self {
            return p0.distance(p1);
        }
        let steps = 16;
        let mut len = 0.0;
        let mut prev = self.start();
        for i in 1..=steps {
            let p = self.sample(i as f64 / steps as f64);
            len += prev.distance(p);
            prev = p;
        }
        len
    }
}

/// Maps distance along a segment back to the curve parameter.
///
/// Bézier parameters do not advance linearly with arc length, so each
/// curved segment carries a sampled table that is inverted with a
/// binary search plus linear interpolation.
#[derive(Clone, Debug)]
pub struct ArcLengthTable {
    /// Cumulative arc length at each sampled parameter.
    arcs: Vec<f64>,
    /// Total arc length of the segment in m.
    length: f64,
}

impl ArcLengthTable {
    /// Builds a table for the given segment.
    pub fn build(segment: &PathSegment) -> Self {
        let approx = segment.approx_length();
        let samples = ((approx / TABLE_SPACING).round() as usize)
            .clamp(TABLE_SAMPLES_MIN, TABLE_SAMPLES_MAX);

        let mut arcs = Vec::with_capacity(samples + 1);
        arcs.push(0.0);
        let mut acc = 0.0;
        let mut prev = segment.start();
        for i in 1..=samples {
            let p = segment.sample(i as f64 / samples as f64);
            acc += prev.distance(p);
            arcs.push(acc);
            prev = p;
        }

        Self { length: acc, arcs }
    }

    /// The arc length of the segment in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Recovers the curve parameter at the given distance along the segment.
    pub fn param_at(&self, dist: f64) -> f64 {
        let n = self.arcs.len() - 1;
        if dist <= 0.0 || self.length <= 0.0 {
            return 0.0;
        }
        if dist >= self.length {
            return 1.0;
        }
        let idx = match self
            .arcs
            .binary_search_by(|arc| arc.partial_cmp(&dist).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let idx = idx.min(n - 1);
        let lo = self.arcs[idx];
        let hi = self.arcs[idx + 1];
        let frac = if hi > lo { (dist - lo) / (hi - lo) } else { 0.0 };
        (idx as f64 + frac) / n as f64
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn line_length_and_param() {
        let seg = PathSegment::Line {
            p0: Point2d::new(0.0, 0.0),
            p1: Point2d::new(10.0, 0.0),
        };
        let table = ArcLengthTable::build(&seg);
        assert_approx_eq!(table.length(), 10.0, 1e-6);
        assert_approx_eq!(table.param_at(5.0), 0.5, 1e-6);
        assert_approx_eq!(table.param_at(-1.0), 0.0);
        assert_approx_eq!(table.param_at(20.0), 1.0);
    }

    #[test]
    fn quadratic_param_advances_with_distance() {
        let seg = PathSegment::Quadratic {
            p0: Point2d::new(0.0, 0.0),
            p1: Point2d::new(10.0, 0.0),
            p2: Point2d::new(10.0, 10.0),
        };
        let table = ArcLengthTable::build(&seg);
        let quarter = table.param_at(0.25 * table.length());
        let half = table.param_at(0.5 * table.length());
        let three_quarters = table.param_at(0.75 * table.length());
        assert!(quarter < half && half < three_quarters);
        // Walking the recovered parameters covers the whole segment.
        assert_approx_eq!(seg.sample(table.param_at(table.length())).x, 10.0, 1e-6);
    }

    #[test]
    fn cubic_straight_line_is_arc_linear() {
        let seg = PathSegment::Cubic {
            p0: Point2d::new(0.0, 0.0),
            p1: Point2d::new(2.0, 0.0),
            p2: Point2d::new(4.0, 0.0),
            p3: Point2d::new(6.0, 0.0),
        };
        let table = ArcLengthTable::build(&seg);
        assert_approx_eq!(table.length(), 6.0, 1e-3);
        let p = seg.sample(table.param_at(3.0));
        assert_approx_eq!(p.x, 3.0, 0.05);
    }
}
