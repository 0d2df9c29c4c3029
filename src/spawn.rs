//! Vehicle arrivals: headway sampling, lane choice and spawn gating.

use crate::config::SimulationConfig;
use crate::geometry::{Approach, LaneLayout, Turn};
use crate::vehicle::VehicleCategory;
use crate::VehicleSet;
use cgmath::prelude::*;
use log::debug;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_distr::Exp;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The spawn radar: blocks arrivals while the entry area is occupied.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpawnRadarConfig {
    /// Radius of the scanned disc around the spawn point, in m.
    pub radius: f64,
    /// Vehicles younger than this are invisible to the radar, in s.
    pub grace: f64,
    /// Occupancy at which the lane is paused.
    pub threshold: usize,
    /// A pause older than this is force-lifted, in s.
    pub max_pause: f64,
}

impl Default for SpawnRadarConfig {
    fn default() -> Self {
        Self {
            radius: 45.0,
            grace: 1.0,
            threshold: 1,
            max_pause: 30.0,
        }
    }
}

/// Per-lane radar state.
#[derive(Copy, Clone, Debug, Default)]
struct RadarState {
    paused: bool,
    /// Absolute time the pause began, in s.
    paused_at: f64,
}

/// Everything needed to materialise one arrival.
#[derive(Clone, Debug)]
pub(crate) struct SpawnPlan {
    pub approach: Approach,
    pub lane: usize,
    pub turn: Turn,
    pub category: VehicleCategory,
    /// Sampled free-flow speed in m/s.
    pub free_speed: f64,
    /// Reporting id, e.g. `LV3N`.
    pub display_id: String,
}

/// Draws arrival times and arrival attributes for all four legs.
pub(crate) struct SpawnManager {
    rng: StdRng,
    /// Absolute time of the next arrival per approach, in s.
    next_spawn: [f64; 4],
    radars: HashMap<(Approach, usize), RadarState>,
    /// Per approach, per category spawn counters for reporting ids.
    counters: [[usize; 3]; 4],
}

impl SpawnManager {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            next_spawn: [0.0; 4],
            radars: HashMap::new(),
            counters: [[0; 3]; 4],
        }
    }

    /// Clears scheduled arrivals, radar pauses and counters.
    pub fn reset(&mut self) {
        self.next_spawn = [0.0; 4];
        self.radars.clear();
        self.counters = [[0; 3]; 4];
    }

    /// True if the approach has an arrival due at `now`.
    pub fn due(&self, approach: Approach, now: f64) -> bool {
        now >= self.next_spawn[approach.index()]
    }

    /// Samples a headway for the given demand: a minimum interval plus an
    /// exponential tail so the mean matches `3600 / flow` seconds.
    pub fn headway(&mut self, flow: f64, min_headway: f64) -> f64 {
        if flow <= 0.0 {
            return f64::INFINITY;
        }
        let mean = 3600.0 / flow;
        if mean <= min_headway {
            return min_headway;
        }
        match Exp::new(1.0 / (mean - min_headway)) {
            Ok(exp) => min_headway + exp.sample(&mut self.rng),
            Err(_) => min_headway,
        }
    }

    /// Schedules the next arrival on an approach from its total demand.
    pub fn schedule_next(&mut self, approach: Approach, now: f64, config: &SimulationConfig) {
        let flow = config.approach(approach).total_flow();
        self.next_spawn[approach.index()] = now + self.headway(flow, config.min_headway);
    }

    /// Pushes the next arrival on an approach at least `delay` seconds out.
    pub fn defer(&mut self, approach: Approach, now: f64, delay: f64) {
        let slot = &mut self.next_spawn[approach.index()];
        *slot = slot.max(now + delay);
    }

    /// Rescans every entry area and updates the per-lane pauses.
    pub fn update_radars(
        &mut self,
        vehicles: &VehicleSet,
        layout: &LaneLayout,
        config: &SimulationConfig,
        now: f64,
    ) {
        let radar = config.radar;
        for approach in Approach::ALL {
            for lane in 1..=config.approach(approach).lanes_in() {
                let Some((center, _)) = layout.spawn_pose(approach, lane) else {
                    continue;
                };
                let occupancy = vehicles
                    .values()
                    .filter(|v| v.approach() == approach && v.lane() == lane)
                    .filter(|v| v.age() >= radar.grace)
                    .filter(|v| v.position().distance2(center) <= radar.radius * radar.radius)
                    .count();

                let state = self.radars.entry((approach, lane)).or_default();
                if state.paused {
                    let expired = now - state.paused_at >= radar.max_pause;
                    if occupancy < radar.threshold || expired {
                        if expired {
                            debug!("radar pause on {:?} lane {} force-lifted", approach, lane);
                        }
                        state.paused = false;
                    }
                } else if occupancy >= radar.threshold {
                    state.paused = true;
                    state.paused_at = now;
                }
            }
        }
    }

    fn lane_paused(&self, approach: Approach, lane: usize) -> bool {
        self.radars
            .get(&(approach, lane))
            .map_or(false, |state| state.paused)
    }

    /// Samples a free-flow speed from the category's range, in m/s.
    pub fn sample_free_speed(&mut self, category: VehicleCategory) -> f64 {
        let (lo, hi) = category.free_speed_range();
        self.rng.gen_range(lo..hi)
    }

    /// Issues the next reporting id for an arrival, e.g. `LV3N`.
    pub fn register(&mut self, approach: Approach, category: VehicleCategory) -> String {
        let counter = &mut self.counters[approach.index()][category.index()];
        *counter += 1;
        format!("{}{}{}", category.label(), counter, approach.letter())
    }

    /// Plans one arrival on an approach: weighted lane choice over every
    /// lane with demand, category drawn from the lane mix, free speed
    /// from the category range. Returns `None` when no lane carries
    /// demand or when the drawn lane's radar is paused.
    pub fn plan_spawn(
        &mut self,
        approach: Approach,
        config: &SimulationConfig,
    ) -> Option<SpawnPlan> {
        let approach_cfg = config.approach(approach);
        let candidates: Vec<(usize, f64)> = approach_cfg
            .lanes
            .iter()
            .enumerate()
            .map(|(i, lane)| (i + 1, lane.flow))
            .filter(|(_, flow)| *flow > 0.0)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let lane = match WeightedIndex::new(candidates.iter().map(|(_, flow)| *flow)) {
            Ok(dist) => candidates[dist.sample(&mut self.rng)].0,
            Err(_) => candidates[self.rng.gen_range(0..candidates.len())].0,
        };
        // A paused radar cancels the arrival rather than moving it to
        // a neighbouring lane.
        if self.lane_paused(approach, lane) {
            return None;
        }
        let traffic = approach_cfg.lane(lane)?;

        let (moto, car, _) = traffic.normalized_mix();
        let draw = self.rng.gen_range(0.0..100.0);
        let category = if draw < moto {
            VehicleCategory::Motorcycle
        } else if draw < moto + car {
            VehicleCategory::Car
        } else {
            VehicleCategory::Truck
        };

        let turns = traffic.arrows.allowed_turns();
        let turn = turns[self.rng.gen_range(0..turns.len())];
        let free_speed = self.sample_free_speed(category);
        let display_id = self.register(approach, category);

        Some(SpawnPlan {
            approach,
            lane,
            turn,
            category,
            free_speed,
            display_id,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LaneTraffic;
    use crate::vehicle::Vehicle;

    #[test]
    fn zero_flow_never_schedules() {
        let mut spawner = SpawnManager::new(Some(7));
        assert!(spawner.headway(0.0, 3.5).is_infinite());
        assert!(spawner.headway(-10.0, 3.5).is_infinite());
    }

    #[test]
    fn headway_respects_minimum_and_mean() {
        let mut spawner = SpawnManager::new(Some(7));
        // 1000 veh/h: mean 3.6s with a 3.5s floor.
        let n = 4000;
        let mut sum = 0.0;
        for _ in 0..n {
            let h = spawner.headway(1000.0, 3.5);
            assert!(h >= 3.5);
            sum += h;
        }
        let mean = sum / n as f64;
        assert!((mean - 3.6).abs() < 0.05, "mean headway {mean}");
    }

    #[test]
    fn saturated_demand_pins_to_minimum() {
        let mut spawner = SpawnManager::new(Some(7));
        // 2000 veh/h wants 1.8s; the floor wins.
        assert_eq!(spawner.headway(2000.0, 3.5), 3.5);
    }

    #[test]
    fn plan_draws_from_configured_lanes() {
        let mut spawner = SpawnManager::new(Some(42));
        let mut config = SimulationConfig::default();
        let approach = config.approach_mut(Approach::North);
        approach.lanes[0] = LaneTraffic {
            flow: 500.0,
            motorcycle_pct: 0.0,
            car_pct: 100.0,
            truck_pct: 0.0,
            ..Default::default()
        };
        approach.lanes[1].flow = 0.0;

        for _ in 0..10 {
            let plan = spawner.plan_spawn(Approach::North, &config).unwrap();
            assert_eq!(plan.lane, 1);
            assert_eq!(plan.category, VehicleCategory::Car);
            assert_eq!(plan.turn, Turn::Straight);
            let (lo, hi) = VehicleCategory::Car.free_speed_range();
            assert!(plan.free_speed >= lo && plan.free_speed < hi);
        }
        // Counters flow into the display id.
        let plan = spawner.plan_spawn(Approach::North, &config).unwrap();
        assert_eq!(plan.display_id, "LV11N");
    }

    #[test]
    fn paused_radar_cancels_the_drawn_arrival() {
        let mut spawner = SpawnManager::new(Some(3));
        let mut config = SimulationConfig::default();
        config.approach_mut(Approach::North).lanes = vec![LaneTraffic {
            flow: 600.0,
            ..Default::default()
        }];
        let layout = LaneLayout::four_leg(3.0, 2, 2, 10.0, 60.0);

        // A settled vehicle parked on the spawn point pauses the lane.
        let mut vehicles = VehicleSet::default();
        let (center, dir) = layout.spawn_pose(Approach::North, 1).unwrap();
        let id = vehicles.insert_with_key(|id| {
            Vehicle::new(
                id,
                "LV1N".into(),
                VehicleCategory::Car,
                Approach::North,
                1,
                Turn::Straight,
                center,
                dir,
                8.0,
            )
        });
        vehicles[id].age = 5.0;

        spawner.update_radars(&vehicles, &layout, &config, 10.0);
        assert!(spawner.plan_spawn(Approach::North, &config).is_none());

        // An empty entry area lifts the pause again.
        vehicles.clear();
        spawner.update_radars(&vehicles, &layout, &config, 11.0);
        assert!(spawner.plan_spawn(Approach::North, &config).is_some());
    }

    #[test]
    fn deferral_pushes_next_arrival_out() {
        let mut spawner = SpawnManager::new(Some(7));
        let config = SimulationConfig::default();
        spawner.schedule_next(Approach::East, 0.0, &config);
        let before = spawner.next_spawn[Approach::East.index()];
        spawner.defer(Approach::East, before + 1.0, 1.0);
        assert!(spawner.next_spawn[Approach::East.index()] >= before + 2.0);
    }
}
