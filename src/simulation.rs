//! The owning simulation context and the per-frame update order.

use crate::config::SimulationConfig;
#[cfg(feature = "debug")]
use crate::debug::take_debug_frame;
use crate::enforcement::{self, EnforcementContext};
use crate::geometry::{Approach, LaneLayout, Turn};
use crate::motion;
use crate::path::{build_route, fallback_route};
use crate::signal::TrafficSignal;
use crate::spawn::SpawnManager;
use crate::stats::{self, DepartureEvent, FrameStats};
use crate::vehicle::{Vehicle, VehicleCategory};
use crate::{VehicleId, VehicleSet};
use log::warn;

/// Margin beyond the spawn margin before a vehicle is removed, in m.
const REMOVAL_MARGIN: f64 = 6.0; // m

/// Age below which a misplaced spawn may be cleaned up, in s.
const CLEANUP_MAX_AGE: f64 = 1.0; // s

/// Spawn deferral on the affected leg after a cleanup, in s.
const CLEANUP_DEFER: f64 = 1.0; // s

/// A four-leg signalised intersection simulation.
pub struct Simulation {
    config: SimulationConfig,
    layout: LaneLayout,
    /// The vehicles being simulated.
    vehicles: VehicleSet,
    signal: TrafficSignal,
    spawner: SpawnManager,
    /// Simulated time in s.
    time: f64,
    /// The current frame of simulation.
    frame: usize,
    /// Reporting from the previously simulated frame.
    stats: FrameStats,
    /// Debugging information from the previously simulated frame.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl Simulation {
    /// Creates a new simulation with an entropy-seeded spawner.
    pub fn new(layout: LaneLayout, config: SimulationConfig) -> Self {
        Self::with_seed(layout, config, None)
    }

    /// Creates a new simulation with a reproducible spawn sequence.
    pub fn with_seed(layout: LaneLayout, config: SimulationConfig, seed: Option<u64>) -> Self {
        let signal = TrafficSignal::new(config.signal, config.phase_mode);
        Self {
            config,
            layout,
            vehicles: VehicleSet::default(),
            signal,
            spawner: SpawnManager::new(seed),
            time: 0.0,
            frame: 0,
            stats: FrameStats::default(),
            #[cfg(feature = "debug")]
            debug: serde_json::Value::Null,
        }
    }

    /// Advances the simulation by `dt` seconds.
    ///
    /// For a realistic simulation, do not use a time step greater than around 0.2.
    pub fn step(&mut self, dt: f64) -> &FrameStats {
        let now = self.time;

        self.spawner
            .update_radars(&self.vehicles, &self.layout, &self.config, now);
        self.cleanup_misplaced_spawns(now);
        self.spawn_arrivals(now);

        for (_, vehicle) in &mut self.vehicles {
            motion::integrate(vehicle, dt);
        }
        let departures = self.remove_departed();

        let ctx = EnforcementContext {
            layout: &self.layout,
            signal: &self.signal,
            config: &self.config,
        };
        enforcement::apply(&mut self.vehicles, &ctx, dt);

        let crossings = stats::record_crossings(&mut self.vehicles, &self.layout);
        let queues = stats::measure_queues(&self.vehicles, &self.layout);
        self.stats = FrameStats {
            crossings,
            departures,
            queues,
        };

        self.signal.step(dt);
        self.time += dt;
        self.frame += 1;

        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }

        &self.stats
    }

    /// Replaces the configuration, restarting the signal cycle when its
    /// grouping or timing changed.
    pub fn apply_config(&mut self, config: SimulationConfig) {
        if config.phase_mode != self.config.phase_mode {
            self.signal.set_phase_mode(config.phase_mode);
        }
        self.signal.set_timing(config.signal);
        self.config = config;
    }

    /// Replaces the geometry and rebuilds every vehicle's route on it.
    pub fn set_layout(&mut self, layout: LaneLayout) {
        self.layout = layout;
        let ids: Vec<VehicleId> = self.vehicles.keys().collect();
        for id in ids {
            self.assign_route(id);
        }
    }

    /// Removes all vehicles and restarts the clock, signal and spawner.
    pub fn reset(&mut self) {
        self.vehicles.clear();
        self.spawner.reset();
        self.signal.reset();
        self.stats = FrameStats::default();
        self.time = 0.0;
        self.frame = 0;
    }

    /// Manually adds a vehicle on the given lane, bypassing demand.
    pub fn spawn_vehicle(
        &mut self,
        approach: Approach,
        lane: usize,
        category: VehicleCategory,
        turn: Turn,
    ) -> Option<VehicleId> {
        let Some((pos, dir)) = self.layout.spawn_pose(approach, lane) else {
            warn!("no spawn anchor for {:?} lane {}", approach, lane);
            return None;
        };
        let display_id = self.spawner.register(approach, category);
        let free_speed = self.spawner.sample_free_speed(category);
        let id = self.vehicles.insert_with_key(|id| {
            Vehicle::new(
                id, display_id, category, approach, lane, turn, pos, dir, free_speed,
            )
        });
        self.assign_route(id);
        Some(id)
    }

    /// Gets the current simulated time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gets the current simulation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn get_vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(vehicle_id)
    }

    pub fn num_vehicles(&self) -> usize {
        self.vehicles.len()
    }

    /// The traffic signal.
    pub fn signal(&self) -> &TrafficSignal {
        &self.signal
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn layout(&self) -> &LaneLayout {
        &self.layout
    }

    /// Reporting from the previously simulated frame.
    pub fn last_stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Gets the debugging information for the previously simulated frame as JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&self) -> serde_json::Value {
        self.debug.clone()
    }

    /// Spawns due arrivals and schedules the next ones.
    fn spawn_arrivals(&mut self, now: f64) {
        for approach in Approach::ALL {
            if !self.spawner.due(approach, now) {
                continue;
            }
            if let Some(plan) = self.spawner.plan_spawn(approach, &self.config) {
                let Some((pos, dir)) = self.layout.spawn_pose(plan.approach, plan.lane) else {
                    warn!("no spawn anchor for {:?} lane {}", plan.approach, plan.lane);
                    self.spawner.schedule_next(approach, now, &self.config);
                    continue;
                };
                let id = self.vehicles.insert_with_key(|id| {
                    Vehicle::new(
                        id,
                        plan.display_id.clone(),
                        plan.category,
                        plan.approach,
                        plan.lane,
                        plan.turn,
                        pos,
                        dir,
                        plan.free_speed,
                    )
                });
                self.assign_route(id);
            }
            self.spawner.schedule_next(approach, now, &self.config);
        }
    }

    /// Builds the vehicle's route from its lane anchors, degrading to the
    /// nearest usable exit and finally to a straight line out of bounds.
    fn assign_route(&mut self, id: VehicleId) {
        let depart_len = self.layout.diagonal() * 1.5 + 20.0;
        let Some(vehicle) = self.vehicles.get_mut(id) else {
            return;
        };
        let rear = vehicle.rear_axle();

        let Some(entry) = self.layout.entry(vehicle.approach, vehicle.lane) else {
            warn!(
                "{} has no entry anchor on {:?} lane {}, running straight out",
                vehicle.display_id(),
                vehicle.approach,
                vehicle.lane
            );
            vehicle.path = Some(fallback_route(rear, vehicle.heading, depart_len));
            return;
        };

        let mut exit_leg = vehicle.exit_approach;
        let exit = self
            .layout
            .exit(exit_leg, vehicle.lane)
            .or_else(|| self.layout.nearest_exit(exit_leg, vehicle.lane).map(|(_, p)| p))
            .or_else(|| {
                self.layout.any_exit_but(vehicle.approach).map(|(leg, _, p)| {
                    exit_leg = leg;
                    p
                })
            });
        let Some(exit) = exit else {
            warn!(
                "{} has no exit anchor anywhere, running straight out",
                vehicle.display_id()
            );
            vehicle.path = Some(fallback_route(rear, vehicle.heading, depart_len));
            return;
        };

        vehicle.path = Some(build_route(
            rear,
            entry,
            exit,
            vehicle.approach,
            exit_leg,
            vehicle.turn,
            depart_len,
        ));
    }

    /// Removes newborn vehicles that spawned inside another footprint,
    /// and defers the next arrival on their leg. A newborn whose move is
    /// merely scaled back is left alone; only the already-overlapping
    /// case, pinned at zero speed, is repaired by deletion.
    fn cleanup_misplaced_spawns(&mut self, now: f64) {
        let misplaced: Vec<VehicleId> = self
            .vehicles
            .iter()
            .filter(|(_, v)| {
                v.age() < CLEANUP_MAX_AGE
                    && v.speed() <= 1e-4
                    && v.overlap_scale <= 0.0
                    && v.overlap_candidate.is_some()
            })
            .map(|(id, _)| id)
            .collect();

        for id in misplaced {
            if let Some(vehicle) = self.vehicles.remove(id) {
                warn!(
                    "removing misplaced spawn {} on {:?}",
                    vehicle.display_id(),
                    vehicle.approach()
                );
                self.spawner
                    .defer(vehicle.approach(), now, CLEANUP_DEFER);
            }
        }
    }

    /// Removes vehicles that left the simulated bounds.
    fn remove_departed(&mut self) -> Vec<DepartureEvent> {
        let margin = self.layout.spawn_margin() + REMOVAL_MARGIN;
        let layout = &self.layout;
        let mut departed = vec![];
        self.vehicles.retain(|id, vehicle| {
            if layout.contains_with_margin(vehicle.position(), margin) {
                true
            } else {
                departed.push(DepartureEvent {
                    vehicle: id,
                    display_id: vehicle.display_id().to_owned(),
                    category: vehicle.category(),
                    approach: vehicle.approach(),
                });
                false
            }
        });
        departed
    }
}
