//! Runtime configuration of demand, lane discipline and signal timing.

use crate::geometry::{Approach, Turn};
use crate::signal::{PhaseMode, SignalTiming};
use crate::spawn::SpawnRadarConfig;
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The turning movements a lane permits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneArrows {
    pub straight: bool,
    pub left: bool,
    pub right: bool,
}

impl Default for LaneArrows {
    fn default() -> Self {
        Self {
            straight: true,
            left: false,
            right: false,
        }
    }
}

impl LaneArrows {
    pub fn all() -> Self {
        Self {
            straight: true,
            left: true,
            right: true,
        }
    }

    pub fn permits(&self, turn: Turn) -> bool {
        match turn {
            Turn::Straight => self.straight,
            Turn::Left => self.left,
            Turn::Right => self.right,
        }
    }

    /// The permitted turns, falling back to straight for a blank lane.
    pub fn allowed_turns(&self) -> SmallVec<[Turn; 3]> {
        let mut turns = SmallVec::new();
        if self.straight {
            turns.push(Turn::Straight);
        }
        if self.left {
            turns.push(Turn::Left);
        }
        if self.right {
            turns.push(Turn::Right);
        }
        if turns.is_empty() {
            turns.push(Turn::Straight);
        }
        turns
    }
}

/// Demand and discipline for one inbound lane.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneTraffic {
    /// Demand in vehicles per hour.
    pub flow: f64,
    /// Category mix in percent. Normalised before use.
    pub motorcycle_pct: f64,
    pub car_pct: f64,
    pub truck_pct: f64,
    pub arrows: LaneArrows,
}

impl Default for LaneTraffic {
    fn default() -> Self {
        Self {
            flow: 300.0,
            motorcycle_pct: 60.0,
            car_pct: 30.0,
            truck_pct: 10.0,
            arrows: LaneArrows::default(),
        }
    }
}

impl LaneTraffic {
    /// The category mix normalised to sum to 100.
    pub fn normalized_mix(&self) -> (f64, f64, f64) {
        let sum = self.motorcycle_pct + self.car_pct + self.truck_pct;
        if sum <= 0.0 {
            return (0.0, 100.0, 0.0);
        }
        let k = 100.0 / sum;
        (
            self.motorcycle_pct * k,
            self.car_pct * k,
            self.truck_pct * k,
        )
    }
}

/// Configuration of one approach leg.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ApproachConfig {
    /// Per-lane demand, indexed by lane number minus one.
    pub lanes: Vec<LaneTraffic>,
    /// Number of outbound lanes on this leg.
    pub lanes_out: usize,
}

impl Default for ApproachConfig {
    fn default() -> Self {
        Self {
            lanes: vec![LaneTraffic::default(), LaneTraffic::default()],
            lanes_out: 2,
        }
    }
}

impl ApproachConfig {
    pub fn lanes_in(&self) -> usize {
        self.lanes.len()
    }

    /// The lane demand, numbered from 1.
    pub fn lane(&self, lane: usize) -> Option<&LaneTraffic> {
        lane.checked_sub(1).and_then(|i| self.lanes.get(i))
    }

    /// Total inbound demand in vehicles per hour.
    pub fn total_flow(&self) -> f64 {
        self.lanes.iter().map(|l| l.flow).sum()
    }
}

/// The full simulation configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    approaches: [ApproachConfig; 4],
    pub signal: SignalTiming,
    pub phase_mode: PhaseMode,
    /// Permit left turns past a red signal from lanes arrowed for it.
    pub left_turn_on_red: bool,
    /// Minimum headway between spawns on one leg, in s.
    pub min_headway: f64,
    pub radar: SpawnRadarConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            approaches: Default::default(),
            signal: SignalTiming::default(),
            phase_mode: PhaseMode::Sequential,
            left_turn_on_red: false,
            min_headway: 3.5,
            radar: SpawnRadarConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn approach(&self, leg: Approach) -> &ApproachConfig {
        &self.approaches[leg.index()]
    }

    pub fn approach_mut(&mut self, leg: Approach) -> &mut ApproachConfig {
        &mut self.approaches[leg.index()]
    }

    /// Sets every lane of every approach to the same demand.
    pub fn set_uniform_demand(&mut self, traffic: LaneTraffic) {
        for approach in &mut self.approaches {
            for lane in &mut approach.lanes {
                *lane = traffic;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn mix_normalises_to_100() {
        let lane = LaneTraffic {
            motorcycle_pct: 2.0,
            car_pct: 1.0,
            truck_pct: 1.0,
            ..Default::default()
        };
        let (m, c, t) = lane.normalized_mix();
        assert_approx_eq!(m, 50.0, 1e-9);
        assert_approx_eq!(c, 25.0, 1e-9);
        assert_approx_eq!(t, 25.0, 1e-9);
    }

    #[test]
    fn blank_arrows_fall_back_to_straight() {
        let arrows = LaneArrows {
            straight: false,
            left: false,
            right: false,
        };
        assert_eq!(arrows.allowed_turns().as_slice(), &[Turn::Straight]);
    }
}
