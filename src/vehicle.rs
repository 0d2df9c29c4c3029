//! The simulated vehicle and its per-tick state.

use crate::geometry::{Approach, Turn};
use crate::math::{Point2d, Vector2d};
use crate::obb::{Beam, Obb};
use crate::path::Path;
use crate::VehicleId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Length of the forward sensing beam in m.
pub(crate) const BEAM_LENGTH: f64 = 3.0; // m

/// The fixed classes of simulated vehicle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VehicleCategory {
    Motorcycle,
    Car,
    Truck,
}

impl VehicleCategory {
    pub const ALL: [VehicleCategory; 3] = [
        VehicleCategory::Motorcycle,
        VehicleCategory::Car,
        VehicleCategory::Truck,
    ];

    /// Body length in m.
    pub fn length(self) -> f64 {
        match self {
            VehicleCategory::Motorcycle => 1.75,
            VehicleCategory::Car => 4.2,
            VehicleCategory::Truck => 12.0,
        }
    }

    /// Body width in m.
    pub fn width(self) -> f64 {
        match self {
            VehicleCategory::Motorcycle => 0.7,
            VehicleCategory::Car => 2.1,
            VehicleCategory::Truck => 2.5,
        }
    }

    /// Distance between the two axles in m.
    pub fn wheel_base(self) -> f64 {
        match self {
            VehicleCategory::Motorcycle => 1.3,
            VehicleCategory::Car => 2.65,
            VehicleCategory::Truck => 5.8,
        }
    }

    /// The free-flow speed range sampled at spawn, in m/s.
    pub fn free_speed_range(self) -> (f64, f64) {
        match self {
            VehicleCategory::Motorcycle => (25.0 / 3.6, 35.0 / 3.6),
            VehicleCategory::Car => (20.0 / 3.6, 30.0 / 3.6),
            VehicleCategory::Truck => (15.0 / 3.6, 20.0 / 3.6),
        }
    }

    /// Class label used in reporting ids: MC, LV, HV.
    pub fn label(self) -> &'static str {
        match self {
            VehicleCategory::Motorcycle => "MC",
            VehicleCategory::Car => "LV",
            VehicleCategory::Truck => "HV",
        }
    }

    pub fn index(self) -> usize {
        match self {
            VehicleCategory::Motorcycle => 0,
            VehicleCategory::Car => 1,
            VehicleCategory::Truck => 2,
        }
    }
}

/// How the vehicle is currently being moved.
#[derive(Copy, Clone, Debug)]
pub(crate) enum MotionRegime {
    /// Heading for its route but not yet on it.
    Approach,
    /// Easing laterally onto the route.
    Blend(BlendState),
    /// Tracking the route by arc length.
    OnPath,
    /// Past the route end; straight-line motion until out of bounds.
    Free,
}

/// In-progress blend onto the route.
#[derive(Copy, Clone, Debug)]
pub(crate) struct BlendState {
    /// Where the centre lands when the blend completes.
    pub target_center: Point2d,
    /// Heading at the landing point.
    pub target_heading: Vector2d,
    /// Arc-length distance to adopt on completion.
    pub landing_distance: f64,
    /// Blend distance still to travel in m.
    pub remaining: f64,
}

/// The nearest obstruction seen by the forward beam this tick.
#[derive(Copy, Clone, Debug)]
pub struct BeamHit {
    /// Distance from the front edge in m.
    pub distance: f64,
    /// World position of the hit.
    pub point: Point2d,
    /// The vehicle that was hit.
    pub vehicle: VehicleId,
}

/// Per-tick candidate speeds produced by the enforcement passes.
/// The final speed is the minimum of those present.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct CandidateSpeeds {
    /// Car-following result, always produced.
    pub following: f64,
    /// Signal-enforcement cap.
    pub signal: Option<f64>,
    /// Forward-beam cap.
    pub beam: Option<f64>,
    /// Overlap-avoidance cap.
    pub overlap: Option<f64>,
}

impl CandidateSpeeds {
    /// Minimum over all candidates, floored at zero.
    pub fn fused(&self) -> f64 {
        let mut speed = self.following;
        for cap in [self.signal, self.beam, self.overlap].into_iter().flatten() {
            speed = speed.min(cap);
        }
        speed.max(0.0)
    }
}

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    id: VehicleId,
    /// Reporting id, e.g. `LV3N`.
    display_id: String,
    category: VehicleCategory,
    pub(crate) approach: Approach,
    pub(crate) lane: usize,
    pub(crate) turn: Turn,
    pub(crate) exit_approach: Approach,

    /// Centre of the body.
    pub(crate) pos: Point2d,
    /// Unit heading.
    pub(crate) heading: Vector2d,
    pub(crate) speed: f64,      // m/s
    pub(crate) free_speed: f64, // m/s

    pub(crate) path: Option<Path>,
    /// Arc-length progress along the path in m.
    pub(crate) travelled: f64,
    pub(crate) regime: MotionRegime,
    /// Direction of travel once the path is exhausted.
    pub(crate) free_dir: Vector2d,

    pub(crate) obb: Obb,
    pub(crate) beam: Beam,
    pub(crate) beam_hit: Option<BeamHit>,
    /// Smoothed beam speed cap carried across ticks.
    pub(crate) beam_cap: Option<f64>,

    /// Motion fraction granted by the overlap pass this tick.
    pub(crate) overlap_scale: f64,
    pub(crate) overlap_candidate: Option<VehicleId>,

    /// Signal cap held across ticks while stopped at the line.
    pub(crate) held_signal_cap: Option<f64>,
    /// Committed to clearing the junction on yellow.
    pub(crate) committed_on_yellow: bool,
    /// Red-light hard stop requested this tick, with front distance.
    pub(crate) signal_stop_dist: Option<f64>,

    /// Set once the centre passes the stop line.
    pub(crate) crossed: bool,
    /// Time since spawn in s.
    pub(crate) age: f64,

    pub(crate) candidates: CandidateSpeeds,
}

impl Vehicle {
    pub(crate) fn new(
        id: VehicleId,
        display_id: String,
        category: VehicleCategory,
        approach: Approach,
        lane: usize,
        turn: Turn,
        pos: Point2d,
        heading: Vector2d,
        free_speed: f64,
    ) -> Self {
        let obb = Obb::new(pos, heading, category.length(), category.width());
        let beam = Beam::from_box(&obb, BEAM_LENGTH);
        Self {
            id,
            display_id,
            category,
            approach,
            lane,
            turn,
            exit_approach: approach.exit_for(turn),
            pos,
            heading,
            speed: 0.0,
            free_speed,
            path: None,
            travelled: 0.0,
            regime: MotionRegime::Approach,
            free_dir: heading,
            obb,
            beam,
            beam_hit: None,
            beam_cap: None,
            overlap_scale: 1.0,
            overlap_candidate: None,
            held_signal_cap: None,
            committed_on_yellow: false,
            signal_stop_dist: None,
            crossed: false,
            age: 0.0,
            candidates: CandidateSpeeds::default(),
        }
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The reporting id, e.g. `LV3N`.
    pub fn display_id(&self) -> &str {
        &self.display_id
    }

    pub fn category(&self) -> VehicleCategory {
        self.category
    }

    /// The leg this vehicle entered from.
    pub fn approach(&self) -> Approach {
        self.approach
    }

    /// The inbound lane, numbered from 1 at the road centre.
    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn turn(&self) -> Turn {
        self.turn
    }

    /// The centre of the vehicle body.
    pub fn position(&self) -> Point2d {
        self.pos
    }

    /// The unit heading.
    pub fn heading(&self) -> Vector2d {
        self.heading
    }

    /// The current speed in m/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// The sampled free-flow speed in m/s.
    pub fn free_speed(&self) -> f64 {
        self.free_speed
    }

    /// The vehicle footprint.
    pub fn obb(&self) -> &Obb {
        &self.obb
    }

    /// The forward sensing beam.
    pub fn beam(&self) -> &Beam {
        &self.beam
    }

    /// The nearest beam obstruction seen this tick.
    pub fn beam_hit(&self) -> Option<BeamHit> {
        self.beam_hit
    }

    /// True once the vehicle has passed its stop line.
    pub fn has_crossed(&self) -> bool {
        self.crossed
    }

    /// Time since spawn in s.
    pub fn age(&self) -> f64 {
        self.age
    }

    /// The front axle position.
    pub fn front_axle(&self) -> Point2d {
        self.pos + self.heading * (0.5 * self.category.wheel_base())
    }

    /// The rear axle position.
    pub fn rear_axle(&self) -> Point2d {
        self.pos - self.heading * (0.5 * self.category.wheel_base())
    }

    /// Rebuilds the cached footprint and beam after the pose changed.
    pub(crate) fn refresh_geometry(&mut self) {
        self.obb = Obb::new(
            self.pos,
            self.heading,
            self.category.length(),
            self.category.width(),
        );
        self.beam = Beam::from_box(&self.obb, BEAM_LENGTH);
    }
}
