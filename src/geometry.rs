//! The four-leg intersection geometry: approaches, turns and lane anchors.

use crate::math::{Point2d, Vector2d};
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One leg of the intersection, named by compass direction.
///
/// The approach names the leg a vehicle *enters from*; the same values name
/// the leg a vehicle *exits to*.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Approach {
    North,
    East,
    South,
    West,
}

impl Approach {
    /// All approaches, in signal rotation order.
    pub const ALL: [Approach; 4] = [
        Approach::North,
        Approach::East,
        Approach::South,
        Approach::West,
    ];

    /// The unit direction of travel for vehicles entering from this leg.
    pub fn inbound(self) -> Vector2d {
        match self {
            Approach::North => Vector2d::new(0.0, -1.0),
            Approach::East => Vector2d::new(-1.0, 0.0),
            Approach::South => Vector2d::new(0.0, 1.0),
            Approach::West => Vector2d::new(1.0, 0.0),
        }
    }

    /// The unit direction of travel for vehicles exiting to this leg.
    pub fn outbound(self) -> Vector2d {
        -self.inbound()
    }

    /// True if this leg's road runs north-south.
    pub fn is_vertical(self) -> bool {
        matches!(self, Approach::North | Approach::South)
    }

    /// The leg a vehicle exits to when making the given turn from this leg.
    pub fn exit_for(self, turn: Turn) -> Approach {
        let idx = self.index();
        let offset = match turn {
            Turn::Left => 1,
            Turn::Straight => 2,
            Turn::Right => 3,
        };
        Approach::ALL[(idx + offset) % 4]
    }

    /// Index in [Approach::ALL].
    pub fn index(self) -> usize {
        match self {
            Approach::North => 0,
            Approach::East => 1,
            Approach::South => 2,
            Approach::West => 3,
        }
    }

    /// A single-letter label for reporting ids.
    pub fn letter(self) -> char {
        match self {
            Approach::North => 'N',
            Approach::East => 'E',
            Approach::South => 'S',
            Approach::West => 'W',
        }
    }
}

/// The manoeuvre a vehicle makes through the junction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Turn {
    Straight,
    Left,
    Right,
}

/// The world geometry of the intersection.
///
/// Anchors are keyed by `(leg, lane)` with lanes numbered from 1 at the
/// road centre. Entry anchors sit on the stop line of an inbound lane;
/// exit anchors sit on the stop line of an outbound lane.
#[derive(Clone, Debug)]
pub struct LaneLayout {
    entries: HashMap<(Approach, usize), Point2d>,
    exits: HashMap<(Approach, usize), Point2d>,
    /// World bounds as (min corner, max corner).
    bounds: (Point2d, Point2d),
    /// Distance upstream of the stop line at which vehicles enter, in m.
    spawn_margin: f64,
}

impl LaneLayout {
    /// Creates an empty layout with the given bounds and spawn margin.
    pub fn new(min: Point2d, max: Point2d, spawn_margin: f64) -> Self {
        Self {
            entries: HashMap::new(),
            exits: HashMap::new(),
            bounds: (min, max),
            spawn_margin,
        }
    }

    /// Builds a symmetric four-leg layout.
    ///
    /// # Parameters
    /// * `lane_width` - Width of a single lane in m.
    /// * `lanes_in` - Number of inbound lanes on every leg.
    /// * `lanes_out` - Number of outbound lanes on every leg.
    /// * `stop_offset` - Distance from the junction centre to each stop line in m.
    /// * `approach_len` - Road length upstream of each stop line in m.
    pub fn four_leg(
        lane_width: f64,
        lanes_in: usize,
        lanes_out: usize,
        stop_offset: f64,
        approach_len: f64,
    ) -> Self {
        let extent = stop_offset + approach_len;
        let mut layout = Self::new(
            Point2d::new(-extent, -extent),
            Point2d::new(extent, extent),
            approach_len,
        );
        for leg in Approach::ALL {
            let inbound = leg.inbound();
            let lateral = crate::math::rot90(inbound);
            // Stop line centre of the inbound carriageway.
            let stop = Point2d::new(0.0, 0.0) - inbound * stop_offset;
            for lane in 1..=lanes_in {
                let off = (lane as f64 - 0.5) * lane_width;
                layout.insert_entry(leg, lane, stop + lateral * off);
            }
            // Exit anchors mirror the entries across the road axis.
            for lane in 1..=lanes_out {
                let off = (lane as f64 - 0.5) * lane_width;
                layout.insert_exit(leg, lane, stop - lateral * off);
            }
        }
        layout
    }

    /// Registers an entry anchor.
    pub fn insert_entry(&mut self, leg: Approach, lane: usize, point: Point2d) {
        self.entries.insert((leg, lane), point);
    }

    /// Registers an exit anchor.
    pub fn insert_exit(&mut self, leg: Approach, lane: usize, point: Point2d) {
        self.exits.insert((leg, lane), point);
    }

    /// The entry anchor of the given inbound lane.
    pub fn entry(&self, leg: Approach, lane: usize) -> Option<Point2d> {
        self.entries.get(&(leg, lane)).copied()
    }

    /// The exit anchor of the given outbound lane.
    pub fn exit(&self, leg: Approach, lane: usize) -> Option<Point2d> {
        self.exits.get(&(leg, lane)).copied()
    }

    /// The exit anchor on the given leg whose lane number is closest to `lane`.
    pub fn nearest_exit(&self, leg: Approach, lane: usize) -> Option<(usize, Point2d)> {
        self.exits
            .iter()
            .filter(|((l, _), _)| *l == leg)
            .min_by_key(|((_, n), _)| n.abs_diff(lane))
            .map(|((_, n), p)| (*n, *p))
    }

    /// Any exit anchor not on the given leg. Last-ditch route fallback.
    pub fn any_exit_but(&self, leg: Approach) -> Option<(Approach, usize, Point2d)> {
        self.exits
            .iter()
            .filter(|((l, _), _)| *l != leg)
            .min_by_key(|((l, n), _)| (l.index(), *n))
            .map(|((l, n), p)| (*l, *n, *p))
    }

    /// The number of inbound lanes registered for a leg.
    pub fn lanes_in(&self, leg: Approach) -> usize {
        self.entries.keys().filter(|(l, _)| *l == leg).count()
    }

    /// Where a vehicle entering the given lane is placed, and its heading.
    pub fn spawn_pose(&self, leg: Approach, lane: usize) -> Option<(Point2d, Vector2d)> {
        let dir = leg.inbound();
        self.entry(leg, lane)
            .map(|anchor| (anchor - dir * self.spawn_margin, dir))
    }

    /// Distance upstream of the stop line at which vehicles enter, in m.
    pub fn spawn_margin(&self) -> f64 {
        self.spawn_margin
    }

    /// The diagonal of the world bounds in m.
    pub fn diagonal(&self) -> f64 {
        let (min, max) = self.bounds;
        let d = max - min;
        (d.x * d.x + d.y * d.y).sqrt()
    }

    /// True if the point lies within the bounds grown by `margin` on all sides.
    pub fn contains_with_margin(&self, point: Point2d, margin: f64) -> bool {
        let (min, max) = self.bounds;
        point.x >= min.x - margin
            && point.x <= max.x + margin
            && point.y >= min.y - margin
            && point.y <= max.y + margin
    }
}
