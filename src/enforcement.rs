//! The per-tick speed enforcement passes.
//!
//! Four passes each propose a speed for every vehicle: car following,
//! signal enforcement, the forward beam and overlap avoidance. The fusion
//! step takes the minimum, rate-limits it against the current speed and
//! applies the hard stop floors. Passes read the whole fleet immutably and
//! write their results back in a separate sweep.

use crate::config::SimulationConfig;
use crate::geometry::{LaneLayout, Turn};
use crate::math::Vector2d;
use crate::signal::{SignalColor, TrafficSignal};
use crate::vehicle::{BeamHit, CandidateSpeeds, Vehicle, BEAM_LENGTH};
use crate::{VehicleId, VehicleSet};
use cgmath::prelude::*;
use itertools::Itertools;

pub use idm::IdmParams;

mod idm;

/// Net gap kept behind a leader in m.
const SAFETY_BUFFER: f64 = 0.3; // m

/// How far ahead the leader's rear is predicted when measuring gaps, in s.
const LEADER_PREDICT: f64 = 0.12; // s

/// A leader this far through its route no longer constrains its lane.
const PROGRESS_CLEAR: f64 = 0.85;

/// Cosine of the heading difference beyond which car following disengages.
const ANGLE_RELAX_COS: f64 = 0.866; // cos 30 deg

/// Distance from the stop line at which the signal starts to bite, in m.
const SIGNAL_LOOKAHEAD: f64 = 10.0; // m

/// Target standstill distance short of the stop line in m.
const SIGNAL_STOP_GAP: f64 = 1.5; // m

/// Within this distance of the line a yellow is always taken, in m.
const YELLOW_COMMIT_DIST: f64 = 4.0; // m

/// Slack subtracted from the remaining yellow when judging clearance, in s.
const YELLOW_TIME_MARGIN: f64 = 0.3; // s

/// Extra distance inside which the hard stop floors engage, in m.
const HARD_STOP_EXTRA: f64 = 0.2; // m

/// Clearance the beam tries to preserve in m.
const BEAM_SAFE_STOP: f64 = 1.5; // m

/// Exponential smoothing factor of the beam cap.
const BEAM_ALPHA: f64 = 0.45;

/// A held signal cap at or below this speed pins the vehicle, in m/s.
const HELD_ZERO: f64 = 0.02; // m/s

/// Fused speeds at or below this floor collapse to zero, in m/s.
const STOP_FLOOR: f64 = 1e-3; // m/s

/// Binary search iterations of the overlap pass.
const OVERLAP_ITERS: usize = 24;

/// Extra radius of the overlap pass culling circle in m.
const CULL_EXTRA: f64 = 8.0; // m

/// Read-only state shared by the passes.
pub(crate) struct EnforcementContext<'a> {
    pub layout: &'a LaneLayout,
    pub signal: &'a TrafficSignal,
    pub config: &'a SimulationConfig,
}

/// Runs all passes and fuses their results into each vehicle's speed.
pub(crate) fn apply(vehicles: &mut VehicleSet, ctx: &EnforcementContext<'_>, dt: f64) {
    follow_pass(vehicles, dt);
    signal_pass(vehicles, ctx, dt);
    beam_pass(vehicles, dt);
    overlap_pass(vehicles, dt);
    fuse_pass(vehicles, dt);
}

/// Car following: vehicles are grouped per inbound lane, ordered leader
/// first, and each follows the one ahead with the IDM.
fn follow_pass(vehicles: &mut VehicleSet, dt: f64) {
    let idm = IdmParams::default();
    let groups = vehicles
        .iter()
        .map(|(id, v)| ((v.approach, v.lane), id))
        .into_group_map();

    let mut results = Vec::with_capacity(vehicles.len());
    for (_, mut ids) in groups {
        ids.sort_by(|a, b| {
            let pa = lane_progress(&vehicles[*a]);
            let pb = lane_progress(&vehicles[*b]);
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
        });

        for (i, &id) in ids.iter().enumerate() {
            let vehicle = &vehicles[id];
            let leader = (i > 0).then(|| &vehicles[ids[i - 1]]);
            let gap = leader.and_then(|l| longitudinal_gap(vehicle, l));
            let leader_vel = leader.map_or(0.0, |l| l.speed);

            let acc = idm.acceleration(vehicle.speed, vehicle.free_speed, gap, leader_vel);
            let mut speed = (vehicle.speed + acc * dt).clamp(0.0, vehicle.free_speed);

            // Regardless of the model, never move past the buffered gap.
            if let (Some(gap), Some(leader)) = (gap, leader) {
                let max_move = (gap + leader.speed * dt - SAFETY_BUFFER).max(0.0);
                speed = speed.min(max_move / dt);
                if gap <= 0.5 * SAFETY_BUFFER {
                    speed = 0.0;
                }
            }
            results.push((id, speed));
        }
    }

    for (id, speed) in results {
        vehicles[id].candidates = CandidateSpeeds {
            following: speed,
            ..Default::default()
        };
    }
}

/// Distance along the approach axis, used to order a lane leader-first.
fn lane_progress(vehicle: &Vehicle) -> f64 {
    vehicle.pos.to_vec().dot(vehicle.approach.inbound())
}

/// Measures the net gap from the follower's front edge to the nearest
/// point of the leader's footprint along the follower's axis.
///
/// Returns `None` when the leader no longer constrains the follower:
/// nearly done with its route, leaving the map, or headed elsewhere.
fn longitudinal_gap(follower: &Vehicle, leader: &Vehicle) -> Option<f64> {
    match leader.path.as_ref() {
        None => return None,
        Some(path) if path.length() > 0.0 && leader.travelled / path.length() >= PROGRESS_CLEAR => {
            return None
        }
        _ => {}
    }

    let axis = follower.heading;
    if axis.dot(leader.heading) < ANGLE_RELAX_COS {
        return None;
    }

    let front = follower.obb.front();
    let mut nearest = f64::INFINITY;
    for point in &leader.obb.perimeter {
        let d = (*point - front).dot(axis);
        if d >= 0.0 {
            nearest = nearest.min(d);
        }
    }
    nearest
        .is_finite()
        .then(|| nearest + leader.speed * LEADER_PREDICT)
}

/// The outcome of the signal pass for one vehicle.
#[derive(Copy, Clone, Default)]
struct SignalDecision {
    cap: Option<f64>,
    held: Option<f64>,
    committed: bool,
    stop_dist: Option<f64>,
}

/// Signal enforcement: decelerate to the stop line on red, commit or stop
/// on yellow, release on green.
fn signal_pass(vehicles: &mut VehicleSet, ctx: &EnforcementContext<'_>, dt: f64) {
    let mut results = Vec::with_capacity(vehicles.len());
    for (id, vehicle) in vehicles.iter() {
        results.push((id, decide_signal(vehicle, ctx, dt)));
    }
    for (id, decision) in results {
        let vehicle = &mut vehicles[id];
        vehicle.candidates.signal = decision.cap;
        vehicle.held_signal_cap = decision.held;
        vehicle.committed_on_yellow = decision.committed;
        vehicle.signal_stop_dist = decision.stop_dist;
    }
}

fn decide_signal(vehicle: &Vehicle, ctx: &EnforcementContext<'_>, dt: f64) -> SignalDecision {
    let clear = SignalDecision::default();
    let committed = SignalDecision {
        committed: true,
        ..clear
    };

    let Some(entry) = ctx.layout.entry(vehicle.approach, vehicle.lane) else {
        return clear;
    };
    let axis = vehicle.approach.inbound();

    // Once the rear edge is past the line the signal no longer applies.
    let rear_dist = (entry - vehicle.obb.rear()).dot(axis);
    if rear_dist < 0.0 {
        return clear;
    }
    let front_dist = (entry - vehicle.obb.front()).dot(axis);

    match ctx.signal.color(vehicle.approach) {
        SignalColor::Green => clear,
        SignalColor::Yellow => {
            if vehicle.committed_on_yellow || front_dist <= YELLOW_COMMIT_DIST {
                return committed;
            }
            let time_left = (ctx.signal.remaining_phase_time() - YELLOW_TIME_MARGIN).max(0.0);
            let needed = front_dist + 2.0 * vehicle.obb.half_len;
            if vehicle.speed * time_left >= needed {
                return committed;
            }
            stop_decision(vehicle, front_dist, dt)
        }
        SignalColor::Red => {
            // A commitment made on yellow carries through the turn to red.
            if vehicle.committed_on_yellow {
                return committed;
            }
            if ltor_bypass(vehicle, ctx) {
                return clear;
            }
            stop_decision(vehicle, front_dist, dt)
        }
    }
}

/// Builds the decelerate-and-hold decision for a stopping vehicle.
fn stop_decision(vehicle: &Vehicle, front_dist: f64, dt: f64) -> SignalDecision {
    if front_dist > SIGNAL_LOOKAHEAD {
        return SignalDecision::default();
    }
    let idm = IdmParams::default();
    let dist_eff = (front_dist - SIGNAL_STOP_GAP).max(0.0);
    let ramp = vehicle.free_speed * (front_dist / SIGNAL_LOOKAHEAD).clamp(0.0, 1.0);
    let allowed = idm
        .stoppable_speed(dist_eff)
        .min(dist_eff / dt)
        .min(ramp);
    // The cap only ever ratchets down while in the stopping zone,
    // so a queued vehicle cannot creep back up to the line.
    let held = match vehicle.held_signal_cap {
        Some(prev) => prev.min(allowed),
        None => allowed,
    };
    SignalDecision {
        cap: Some(held),
        held: Some(held),
        committed: false,
        stop_dist: Some(front_dist),
    }
}

fn ltor_bypass(vehicle: &Vehicle, ctx: &EnforcementContext<'_>) -> bool {
    ctx.config.left_turn_on_red
        && vehicle.turn == Turn::Left
        && ctx
            .config
            .approach(vehicle.approach)
            .lane(vehicle.lane)
            .map_or(false, |lane| lane.arrows.left)
}

/// Forward beam: three rays cast from the front edge, capped by the
/// nearest hit on any other vehicle's footprint.
fn beam_pass(vehicles: &mut VehicleSet, dt: f64) {
    let idm = IdmParams::default();
    let ids: Vec<VehicleId> = vehicles.keys().collect();

    let mut results = Vec::with_capacity(ids.len());
    for &id in &ids {
        let vehicle = &vehicles[id];
        let mut best: Option<BeamHit> = None;
        for &other_id in &ids {
            if other_id == id {
                continue;
            }
            let other = &vehicles[other_id];
            let reach = BEAM_LENGTH + vehicle.obb.radius() + other.obb.radius();
            if vehicle.pos.distance2(other.pos) > reach * reach {
                continue;
            }
            if let Some((distance, point)) = vehicle.beam.nearest_hit(&other.obb) {
                if best.map_or(true, |b| distance < b.distance) {
                    best = Some(BeamHit {
                        distance,
                        point,
                        vehicle: other_id,
                    });
                }
            }
        }
        results.push((id, best));
    }

    for (id, hit) in results {
        let vehicle = &mut vehicles[id];
        vehicle.beam_hit = hit;
        let Some(hit) = hit else {
            vehicle.beam_cap = None;
            vehicle.candidates.beam = None;
            continue;
        };

        crate::debug::debug_line("beam_hit", vehicle.obb.front(), hit.point);

        let clearance = (hit.distance - BEAM_SAFE_STOP).max(0.0);
        let raw = idm.stoppable_speed(clearance).min(clearance / dt);
        let mut smoothed = match vehicle.beam_cap {
            Some(prev) => BEAM_ALPHA * raw + (1.0 - BEAM_ALPHA) * prev,
            None => raw,
        };
        if hit.distance <= BEAM_SAFE_STOP + HARD_STOP_EXTRA {
            smoothed = 0.0;
        }
        vehicle.beam_cap = Some(smoothed);
        vehicle.candidates.beam = Some(smoothed);
    }
}

/// Overlap avoidance: the provisional step is scaled back to the largest
/// collision-free fraction against every nearby footprint.
fn overlap_pass(vehicles: &mut VehicleSet, dt: f64) {
    let ids: Vec<VehicleId> = vehicles.keys().collect();

    let mut results = Vec::with_capacity(ids.len());
    for &id in &ids {
        let vehicle = &vehicles[id];
        let provisional = vehicle.candidates.fused();
        let step = vehicle.heading * (provisional * dt);

        let mut scale: f64 = 1.0;
        let mut candidate = None;
        for &other_id in &ids {
            if other_id == id {
                continue;
            }
            let other = &vehicles[other_id];
            let reach = vehicle.obb.radius() + other.obb.radius() + CULL_EXTRA;
            if vehicle.pos.distance2(other.pos) > reach * reach {
                continue;
            }

            if vehicle.obb.overlaps(&other.obb) {
                scale = 0.0;
                candidate = Some(other_id);
                break;
            }
            if !vehicle
                .obb
                .overlaps_shifted(step, &other.obb, Vector2d::zero())
            {
                continue;
            }

            // Binary search the motion fraction against this footprint.
            let mut lo = 0.0;
            let mut hi = 1.0;
            for _ in 0..OVERLAP_ITERS {
                let mid = 0.5 * (lo + hi);
                if vehicle
                    .obb
                    .overlaps_shifted(step * mid, &other.obb, Vector2d::zero())
                {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            if lo < scale {
                scale = lo;
                candidate = Some(other_id);
            }
        }
        results.push((id, scale, candidate, provisional));
    }

    for (id, scale, candidate, provisional) in results {
        let vehicle = &mut vehicles[id];
        if scale < 1.0 {
            crate::debug::debug_box("overlap", &vehicle.obb);
        }
        vehicle.overlap_scale = scale;
        vehicle.overlap_candidate = candidate;
        vehicle.candidates.overlap = (scale < 1.0).then(|| provisional * scale);
    }
}

/// Fuses the candidates into the final speed with rate limits and floors.
fn fuse_pass(vehicles: &mut VehicleSet, dt: f64) {
    let idm = IdmParams::default();
    for (_, vehicle) in vehicles.iter_mut() {
        let mut speed = vehicle.candidates.fused();

        if let Some(held) = vehicle.held_signal_cap {
            if held <= HELD_ZERO {
                speed = 0.0;
            } else {
                speed = speed.min(held);
            }
        }

        // Rate limit against the current speed.
        let max_up = vehicle.speed + 4.0 * idm.max_acc * dt;
        let max_down = (vehicle.speed - 6.0 * idm.comf_dec * dt).max(0.0);
        speed = speed.clamp(max_down, max_up.max(max_down));

        // The overlap cap is exempt from the deceleration floor:
        // footprints must not intersect after the move.
        if let Some(cap) = vehicle.candidates.overlap {
            speed = speed.min(cap);
        }

        if let Some(dist) = vehicle.signal_stop_dist {
            if dist <= SIGNAL_STOP_GAP + HARD_STOP_EXTRA {
                speed = 0.0;
            }
        }
        if let Some(hit) = vehicle.beam_hit {
            if hit.distance <= BEAM_SAFE_STOP + HARD_STOP_EXTRA {
                speed = 0.0;
            }
        }
        if speed <= STOP_FLOOR {
            speed = 0.0;
        }
        vehicle.speed = speed;
    }
}
