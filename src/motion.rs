//! Two-axle kinematics: how a vehicle consumes its per-tick move budget.
//!
//! A vehicle is in one of four regimes. Off the route it heads for the
//! closest point on it; once close enough it either snaps on or blends
//! laterally over a short distance; on the route it tracks arc length with
//! both axles pinned to the curve; past the route end it coasts in a
//! straight line until it leaves the bounds.

use crate::math::normalize_or;
use crate::vehicle::{BlendState, MotionRegime, Vehicle};
use cgmath::prelude::*;

/// Lateral offset below which a vehicle snaps straight onto its route, in m.
const SNAP_TOLERANCE: f64 = 0.1; // m

/// Bounds of the blend distance in m.
const BLEND_MIN: f64 = 0.2; // m
const BLEND_MAX_FLOOR: f64 = 2.0; // m

/// Distance at which a blend is considered landed, in m.
const BLEND_ARRIVAL: f64 = 0.1; // m

const EPS: f64 = 1e-9;

/// Moves the vehicle through `dt` seconds at its already-fused speed.
pub(crate) fn integrate(vehicle: &mut Vehicle, dt: f64) {
    let mut budget = vehicle.speed * dt;

    loop {
        match vehicle.regime {
            MotionRegime::Approach => {
                begin_approach(vehicle);
                continue;
            }
            MotionRegime::Blend(state) => {
                if !advance_blend(vehicle, state, &mut budget) {
                    continue;
                }
                break;
            }
            MotionRegime::OnPath => {
                if !advance_on_path(vehicle, &mut budget) {
                    continue;
                }
                break;
            }
            MotionRegime::Free => {
                vehicle.pos += vehicle.free_dir * budget;
                vehicle.heading = vehicle.free_dir;
                break;
            }
        }
    }

    vehicle.age += dt;
    vehicle.refresh_geometry();
}

/// Transitions out of the approach regime; always lands in another regime.
fn begin_approach(vehicle: &mut Vehicle) {
    let Some(path) = vehicle.path.as_ref() else {
        vehicle.free_dir = vehicle.heading;
        vehicle.regime = MotionRegime::Free;
        return;
    };

    let wheel_base = vehicle.category().wheel_base();
    let rear = vehicle.rear_axle();
    let closest = path.closest_to(rear);

    if closest.offset <= SNAP_TOLERANCE {
        vehicle.travelled = closest.distance;
        vehicle.regime = MotionRegime::OnPath;
        adopt_path_pose(vehicle);
        return;
    }

    let blend_len = closest
        .offset
        .clamp(BLEND_MIN, f64::max(BLEND_MAX_FLOOR, 0.5 * wheel_base));
    let landing = path.sample_at(closest.distance);
    vehicle.regime = MotionRegime::Blend(BlendState {
        target_center: landing.pos + landing.tan * (0.5 * wheel_base),
        target_heading: landing.tan,
        landing_distance: closest.distance,
        remaining: blend_len,
    });
}

/// Consumes budget easing toward the blend target. Returns true when the
/// budget is spent; false to continue in a new regime.
fn advance_blend(vehicle: &mut Vehicle, mut state: BlendState, budget: &mut f64) -> bool {
    let to_target = state.target_center - vehicle.pos;
    let dist = to_target.magnitude();

    if dist <= BLEND_ARRIVAL || state.remaining <= EPS {
        land_blend(vehicle, &state);
        return false;
    }
    if *budget <= EPS {
        return true;
    }

    let used = budget.min(dist).min(state.remaining);
    vehicle.heading = normalize_or(to_target, vehicle.heading);
    vehicle.pos += vehicle.heading * used;
    *budget -= used;
    state.remaining -= used;

    if dist - used <= BLEND_ARRIVAL || state.remaining <= EPS {
        land_blend(vehicle, &state);
        return *budget <= EPS;
    }
    vehicle.regime = MotionRegime::Blend(state);
    true
}

fn land_blend(vehicle: &mut Vehicle, state: &BlendState) {
    vehicle.pos = state.target_center;
    vehicle.heading = state.target_heading;
    vehicle.travelled = state.landing_distance;
    vehicle.regime = MotionRegime::OnPath;
}

/// Consumes budget tracking the route. Returns true when the budget is
/// spent; false to continue in the free regime.
fn advance_on_path(vehicle: &mut Vehicle, budget: &mut f64) -> bool {
    let Some(path) = vehicle.path.as_ref() else {
        vehicle.free_dir = vehicle.heading;
        vehicle.regime = MotionRegime::Free;
        return false;
    };

    let remaining = path.length() - vehicle.travelled;
    if remaining <= EPS {
        vehicle.free_dir = vehicle.heading;
        vehicle.path = None;
        vehicle.regime = MotionRegime::Free;
        return false;
    }

    let used = budget.min(remaining);
    vehicle.travelled += used;
    *budget -= used;
    adopt_path_pose(vehicle);

    if path_finished(vehicle) {
        vehicle.free_dir = vehicle.heading;
        vehicle.path = None;
        vehicle.regime = MotionRegime::Free;
        // Leftover budget is spent in the free regime.
        return *budget <= EPS;
    }
    true
}

fn path_finished(vehicle: &Vehicle) -> bool {
    vehicle
        .path
        .as_ref()
        .map_or(true, |path| path.length() - vehicle.travelled <= EPS)
}

/// Pins both axles to the route and derives the body pose from them.
fn adopt_path_pose(vehicle: &mut Vehicle) {
    let Some(path) = vehicle.path.as_ref() else {
        return;
    };
    let wheel_base = vehicle.category().wheel_base();
    let rear = path.sample_at(vehicle.travelled);
    let front = path.sample_at(f64::min(vehicle.travelled + wheel_base, path.length()));
    vehicle.heading = normalize_or(front.pos - rear.pos, rear.tan);
    vehicle.pos = rear.pos + vehicle.heading * (0.5 * wheel_base);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{Approach, Turn};
    use crate::math::{Point2d, Vector2d};
    use crate::path::{build_route, fallback_route};
    use crate::vehicle::VehicleCategory;
    use crate::VehicleId;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::Key;

    fn car_at(pos: Point2d, heading: Vector2d) -> Vehicle {
        Vehicle::new(
            VehicleId::null(),
            "LV1N".into(),
            VehicleCategory::Car,
            Approach::North,
            1,
            Turn::Straight,
            pos,
            heading,
            8.0,
        )
    }

    #[test]
    fn snaps_onto_route_and_tracks_it() {
        let mut vehicle = car_at(Point2d::new(1.5, 58.675), Vector2d::new(0.0, -1.0));
        // Rear axle starts exactly on the route start.
        vehicle.path = Some(build_route(
            vehicle.rear_axle(),
            Point2d::new(1.5, 10.0),
            Point2d::new(1.5, -10.0),
            Approach::North,
            Approach::South,
            Turn::Straight,
            40.0,
        ));
        vehicle.speed = 10.0;

        integrate(&mut vehicle, 0.1);
        assert!(matches!(vehicle.regime, MotionRegime::OnPath));
        assert_approx_eq!(vehicle.travelled, 1.0, 1e-6);
        assert_approx_eq!(vehicle.pos.x, 1.5, 1e-3);
        // Moved 1m south from the starting centre.
        assert_approx_eq!(vehicle.pos.y, 58.675 - 1.0, 1e-3);
        assert_approx_eq!(vehicle.heading.y, -1.0, 1e-6);
    }

    #[test]
    fn blends_toward_offset_route() {
        let start = Point2d::new(4.5, 58.675);
        let mut vehicle = car_at(start, Vector2d::new(0.0, -1.0));
        // Route runs 3m to the west of the vehicle.
        vehicle.path = Some(fallback_route(
            Point2d::new(1.5, 60.0),
            Vector2d::new(0.0, -1.0),
            100.0,
        ));
        vehicle.speed = 5.0;

        integrate(&mut vehicle, 0.1);
        assert!(matches!(
            vehicle.regime,
            MotionRegime::Blend(_) | MotionRegime::OnPath
        ));
        // Heading swings toward the route rather than straight down.
        assert!(vehicle.pos.x < start.x);

        // Enough ticks to finish the blend and land on the route.
        for _ in 0..100 {
            integrate(&mut vehicle, 0.1);
        }
        assert!(matches!(
            vehicle.regime,
            MotionRegime::OnPath | MotionRegime::Free
        ));
        assert_approx_eq!(vehicle.pos.x, 1.5, 0.2);
    }

    #[test]
    fn leaves_route_into_free_motion() {
        let mut vehicle = car_at(Point2d::new(0.0, 1.325), Vector2d::new(0.0, -1.0));
        vehicle.path = Some(fallback_route(
            vehicle.rear_axle(),
            Vector2d::new(0.0, -1.0),
            5.0,
        ));
        vehicle.speed = 10.0;

        integrate(&mut vehicle, 1.0);
        assert!(matches!(vehicle.regime, MotionRegime::Free));
        assert!(vehicle.path.is_none());
        assert_approx_eq!(vehicle.free_dir.y, -1.0, 1e-6);
    }

    #[test]
    fn zero_speed_stays_put() {
        let start = Point2d::new(1.5, 30.0);
        let mut vehicle = car_at(start, Vector2d::new(0.0, -1.0));
        vehicle.path = Some(fallback_route(
            vehicle.rear_axle(),
            Vector2d::new(0.0, -1.0),
            100.0,
        ));
        vehicle.speed = 0.0;
        integrate(&mut vehicle, 0.1);
        assert_approx_eq!(vehicle.pos.distance(start), 0.0, 1e-6);
        assert_approx_eq!(vehicle.age, 0.1, 1e-12);
    }
}
