//! The intelligent driver model used by the car-following pass.

/// Minimum standstill gap in m.
const MIN_GAP: f64 = 2.0; // m

/// Free-acceleration exponent.
const DELTA: i32 = 4;

/// IDM parameters shared by all vehicle categories.
#[derive(Copy, Clone, Debug)]
pub struct IdmParams {
    /// Maximum acceleration in m/s^2.
    pub max_acc: f64,
    /// Comfortable deceleration in m/s^2.
    pub comf_dec: f64,
    /// Desired time headway in s.
    pub headway: f64,
}

impl Default for IdmParams {
    fn default() -> Self {
        Self {
            max_acc: 1.5,
            comf_dec: 2.5,
            headway: 1.2,
        }
    }
}

impl IdmParams {
    /// Computes the IDM acceleration, clamped to `[-6b, 4a]`.
    ///
    /// # Arguments
    /// * `vel` - Own speed in m/s.
    /// * `free_vel` - Desired free-flow speed in m/s.
    /// * `gap` - Net gap to the leader in m, if there is a leader.
    /// * `leader_vel` - Leader speed in m/s.
    pub fn acceleration(&self, vel: f64, free_vel: f64, gap: Option<f64>, leader_vel: f64) -> f64 {
        let free_term = (vel / free_vel.max(0.1)).powi(DELTA);
        let interaction = match gap {
            Some(gap) if gap <= 0.0 => return -6.0 * self.comf_dec,
            Some(gap) => {
                let appr = vel - leader_vel;
                let factor = 1.0 / (2.0 * (self.max_acc * self.comf_dec).sqrt());
                let ss = MIN_GAP + f64::max(0.0, vel * self.headway + vel * appr * factor);
                (ss / gap).powi(2)
            }
            None => 0.0,
        };
        let acc = self.max_acc * (1.0 - free_term - interaction);
        acc.clamp(-6.0 * self.comf_dec, 4.0 * self.max_acc)
    }

    /// Speed from which the vehicle can still stop within `dist` at
    /// comfortable deceleration.
    pub fn stoppable_speed(&self, dist: f64) -> f64 {
        (2.0 * self.comf_dec * dist.max(0.0)).sqrt()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn accelerates_on_free_road() {
        let idm = IdmParams::default();
        let acc = idm.acceleration(0.0, 8.0, None, 0.0);
        assert_approx_eq!(acc, idm.max_acc, 1e-9);
    }

    #[test]
    fn holds_free_speed() {
        let idm = IdmParams::default();
        let acc = idm.acceleration(8.0, 8.0, None, 0.0);
        assert_approx_eq!(acc, 0.0, 1e-9);
    }

    #[test]
    fn brakes_when_close_behind_stopped_leader() {
        let idm = IdmParams::default();
        let acc = idm.acceleration(8.0, 8.0, Some(5.0), 0.0);
        assert!(acc < -idm.comf_dec);
        // A vanished gap demands the full emergency clamp.
        assert_approx_eq!(idm.acceleration(8.0, 8.0, Some(0.0), 0.0), -15.0, 1e-9);
    }

    #[test]
    fn relaxes_with_distance() {
        let idm = IdmParams::default();
        let near = idm.acceleration(5.0, 8.0, Some(10.0), 5.0);
        let far = idm.acceleration(5.0, 8.0, Some(50.0), 5.0);
        assert!(far > near);
    }

    #[test]
    fn stoppable_speed_is_monotone() {
        let idm = IdmParams::default();
        assert_approx_eq!(idm.stoppable_speed(0.0), 0.0, 1e-9);
        assert!(idm.stoppable_speed(4.0) < idm.stoppable_speed(9.0));
    }
}
