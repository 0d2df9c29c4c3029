pub use cgmath;
pub use config::{ApproachConfig, LaneArrows, LaneTraffic, SimulationConfig};
pub use geometry::{Approach, LaneLayout, Turn};
pub use obb::{Beam, Obb, Ray};
pub use path::{ClosestPoint, Path, PathSample};
pub use signal::{Phase, PhaseMode, SignalColor, SignalTiming, TrafficSignal};
pub use simulation::Simulation;
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use spawn::SpawnRadarConfig;
pub use stats::{CrossingEvent, DepartureEvent, FrameStats};
pub use util::Interval;
pub use vehicle::{BeamHit, Vehicle, VehicleCategory};

mod config;
mod debug;
mod enforcement;
mod geometry;
pub mod math;
mod motion;
mod obb;
mod path;
mod signal;
mod simulation;
mod spawn;
mod stats;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
}

type VehicleSet = SlotMap<VehicleId, Vehicle>;
