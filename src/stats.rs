//! Per-frame reporting: stop-line crossings and real-time queue lengths.

use crate::geometry::{Approach, LaneLayout};
use crate::vehicle::VehicleCategory;
use crate::{VehicleId, VehicleSet};
use cgmath::prelude::*;
use itertools::Itertools;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tolerance past the stop line before a crossing is counted, in m.
const CROSS_TOLERANCE: f64 = 0.5; // m

/// Vehicles younger than this never count toward a queue, in s.
const QUEUE_MIN_AGE: f64 = 2.0; // s

/// The queue head must be within this distance of the stop line, in m.
const HEAD_MAX_DIST: f64 = 20.0; // m

/// Maximum speed of a queued vehicle in m/s.
const QUEUE_MAX_SPEED: f64 = 2.0; // m/s

/// Maximum bumper-to-bumper gap inside a queue, in m.
const CHAIN_GAP: f64 = 5.0; // m

/// A vehicle's first passage of its stop line.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrossingEvent {
    #[cfg_attr(feature = "serde", serde(skip))]
    pub vehicle: VehicleId,
    pub display_id: String,
    pub category: VehicleCategory,
    pub approach: Approach,
    pub lane: usize,
}

/// A vehicle leaving the simulated bounds.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepartureEvent {
    #[cfg_attr(feature = "serde", serde(skip))]
    pub vehicle: VehicleId,
    pub display_id: String,
    pub category: VehicleCategory,
    pub approach: Approach,
}

/// Everything reported from one simulation step.
#[derive(Clone, Debug, Default)]
pub struct FrameStats {
    pub crossings: Vec<CrossingEvent>,
    pub departures: Vec<DepartureEvent>,
    /// Queue length in m per inbound lane. Absent lanes have no queue.
    pub queues: HashMap<(Approach, usize), f64>,
}

impl FrameStats {
    /// Queue length of a lane in m, zero when no queue formed.
    pub fn queue(&self, approach: Approach, lane: usize) -> f64 {
        self.queues.get(&(approach, lane)).copied().unwrap_or(0.0)
    }
}

/// Emits a crossing event for every vehicle whose centre passed its stop
/// line this frame, and marks the vehicle as crossed.
pub(crate) fn record_crossings(
    vehicles: &mut VehicleSet,
    layout: &LaneLayout,
) -> Vec<CrossingEvent> {
    let mut events = vec![];
    for (id, vehicle) in vehicles.iter_mut() {
        if vehicle.crossed {
            continue;
        }
        let Some(entry) = layout.entry(vehicle.approach, vehicle.lane) else {
            continue;
        };
        let axis = vehicle.approach.inbound();
        let past = (vehicle.position() - entry).dot(axis);
        if past >= CROSS_TOLERANCE {
            vehicle.crossed = true;
            events.push(CrossingEvent {
                vehicle: id,
                display_id: vehicle.display_id().to_owned(),
                category: vehicle.category(),
                approach: vehicle.approach,
                lane: vehicle.lane,
            });
        }
    }
    events
}

/// Measures the standing queue of every inbound lane.
///
/// The queue is a chain anchored by a head within [HEAD_MAX_DIST] of the
/// stop line; it extends rearwards while vehicles are slow and closely
/// spaced, and its length is the head's front bumper to the tail's rear
/// bumper in m.
pub(crate) fn measure_queues(
    vehicles: &VehicleSet,
    layout: &LaneLayout,
) -> HashMap<(Approach, usize), f64> {
    let lanes = vehicles
        .values()
        .filter(|v| !v.crossed && v.age() >= QUEUE_MIN_AGE)
        .map(|v| ((v.approach, v.lane), v))
        .into_group_map();

    let mut queues = HashMap::new();
    for ((approach, lane), group) in lanes {
        let Some(entry) = layout.entry(approach, lane) else {
            continue;
        };
        let axis = approach.inbound();

        // Front bumper distance to the stop line, line-ward first.
        let mut ordered: Vec<(f64, f64, f64)> = group
            .iter()
            .map(|v| {
                let dist = (entry - v.obb().front()).dot(axis);
                (dist, v.speed(), v.category().length())
            })
            .filter(|(dist, _, _)| *dist >= 0.0)
            .collect();
        ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let Some(head_idx) = ordered
            .iter()
            .position(|(dist, speed, _)| *dist <= HEAD_MAX_DIST && *speed <= QUEUE_MAX_SPEED)
        else {
            continue;
        };

        let (head_dist, _, head_len) = ordered[head_idx];
        let mut tail_rear = head_dist + head_len;
        for (dist, speed, len) in ordered.iter().skip(head_idx + 1) {
            if *speed > QUEUE_MAX_SPEED || dist - tail_rear > CHAIN_GAP {
                break;
            }
            tail_rear = dist + len;
        }

        let length = (tail_rear - head_dist).max(0.0);
        if length > 0.0 {
            queues.insert((approach, lane), length);
        }
    }
    queues
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::Turn;
    use crate::math::{Point2d, Vector2d};
    use crate::vehicle::Vehicle;

    fn insert(
        vehicles: &mut VehicleSet,
        y: f64,
        speed: f64,
        age: f64,
        category: VehicleCategory,
    ) -> VehicleId {
        let id = vehicles.insert_with_key(|id| {
            Vehicle::new(
                id,
                format!("{}1N", category.label()),
                category,
                Approach::North,
                1,
                Turn::Straight,
                Point2d::new(1.5, y),
                Vector2d::new(0.0, -1.0),
                8.0,
            )
        });
        let vehicle = &mut vehicles[id];
        vehicle.speed = speed;
        vehicle.age = age;
        vehicle.refresh_geometry();
        id
    }

    fn layout() -> LaneLayout {
        LaneLayout::four_leg(3.0, 2, 2, 10.0, 60.0)
    }

    #[test]
    fn crossing_emitted_once() {
        let mut vehicles = VehicleSet::default();
        // Stop line at y=10; centre just past it.
        let id = insert(&mut vehicles, 9.4, 5.0, 10.0, VehicleCategory::Car);
        let layout = layout();

        let events = record_crossings(&mut vehicles, &layout);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vehicle, id);
        assert_eq!(events[0].approach, Approach::North);
        assert!(vehicles[id].has_crossed());

        assert!(record_crossings(&mut vehicles, &layout).is_empty());
    }

    #[test]
    fn centre_short_of_tolerance_does_not_cross() {
        let mut vehicles = VehicleSet::default();
        insert(&mut vehicles, 9.6, 5.0, 10.0, VehicleCategory::Car);
        assert!(record_crossings(&mut vehicles, &layout()).is_empty());
    }

    #[test]
    fn queue_chains_slow_vehicles() {
        let mut vehicles = VehicleSet::default();
        // Head car: front bumper 1.9m from the line.
        insert(&mut vehicles, 14.0, 0.0, 10.0, VehicleCategory::Car);
        // Second car 1.8m behind the head's rear bumper.
        insert(&mut vehicles, 20.0, 0.5, 10.0, VehicleCategory::Car);
        // A fast mover further back does not extend the chain.
        insert(&mut vehicles, 30.0, 6.0, 10.0, VehicleCategory::Car);

        let queues = measure_queues(&vehicles, &layout());
        let len = queues[&(Approach::North, 1)];
        // Head front at 1.9m, tail rear at 12.1m.
        assert!((len - 10.2).abs() < 1e-6, "queue length {len}");
    }

    #[test]
    fn distant_stopped_vehicle_is_not_a_queue() {
        let mut vehicles = VehicleSet::default();
        // Front bumper 27.9m out: beyond the head window.
        insert(&mut vehicles, 40.0, 0.0, 10.0, VehicleCategory::Car);
        assert!(measure_queues(&vehicles, &layout()).is_empty());
    }

    #[test]
    fn young_vehicles_do_not_queue() {
        let mut vehicles = VehicleSet::default();
        insert(&mut vehicles, 14.0, 0.0, 0.5, VehicleCategory::Car);
        assert!(measure_queues(&vehicles, &layout()).is_empty());
    }
}
