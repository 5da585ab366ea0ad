//! # Position control delegate
//!
//! The waypoint navigation core does not convert target kinematics into
//! steering and throttle demands itself, that is the job of the downstream
//! position controller. [`PosControl`] is the seam to that collaborator:
//! the track manager feeds it the moving target point each cycle and reads
//! back the desired speed, turn rate and lateral acceleration.
//!
//! [`SimplePosControl`] is a velocity-feedforward pursuit controller used by
//! the mission simulator and the tests. A real vehicle integration would
//! provide its own implementation of the trait.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;
use serde::Deserialize;

// Internal
use crate::loc::VehicleState;
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Downstream position controller interface.
///
/// All positions are in the local NE frame in meters. Implementations must
/// not block, the trait is called from the cyclic navigation update.
pub trait PosControl {
    /// Update the kinematic limits, called whenever the navigation layer is
    /// (re)initialised.
    fn set_limits(
        &mut self,
        speed_max_ms: f64,
        accel_max_mss: f64,
        lat_accel_max_mss: f64,
        jerk_max_msss: f64,
    );

    /// Proportional gain of the position error controller, used by the
    /// navigation time-scaling loop.
    fn get_pos_p_gain(&self) -> f64;

    /// Set the target kinematics for the next control cycle.
    fn set_pos_vel_accel_target(
        &mut self,
        pos_m: Vector2<f64>,
        vel_ms: Vector2<f64>,
        accel_mss: Vector2<f64>,
    );

    /// The last commanded target velocity, read back by the navigation
    /// time-scaling loop.
    fn get_desired_velocity(&self) -> Vector2<f64>;

    /// Target position minus vehicle position, from the last `update`.
    fn get_pos_error(&self) -> Vector2<f64>;

    /// Seed the internal speed-limiter state, called when the navigation
    /// layer resumes after a gap so the demand ramps from the speed the
    /// vehicle actually has.
    fn seed_desired_speed(&mut self, speed_ms: f64);

    /// Run one control cycle against the given vehicle state.
    fn update(&mut self, state: &VehicleState, dt: f64);

    fn get_desired_speed(&self) -> f64;

    fn get_desired_turn_rate_rads(&self) -> f64;

    fn get_desired_lat_accel(&self) -> f64;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the simple pursuit controller
#[derive(Debug, Clone, Deserialize)]
pub struct PosControlParams {
    /// Proportional gain from position error to velocity demand [1/s]
    pub pos_kp: f64,

    /// Proportional gain from course error to turn rate [1/s]
    pub heading_kp: f64,
}

/// A velocity-feedforward pursuit controller.
///
/// Velocity demand is the target velocity plus a proportional pull toward
/// the target point; the turn rate chases the demanded course and the speed
/// demand is slewed with the acceleration limit.
pub struct SimplePosControl {
    params: PosControlParams,

    speed_max_ms: f64,
    accel_max_mss: f64,
    lat_accel_max_mss: f64,

    target_pos_m: Vector2<f64>,
    target_vel_ms: Vector2<f64>,
    target_accel_mss: Vector2<f64>,

    pos_error_m: Vector2<f64>,

    desired_speed_ms: f64,
    desired_turn_rate_rads: f64,
    desired_lat_accel_mss: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimplePosControl {
    pub fn new(params: PosControlParams) -> Self {
        Self {
            params,
            speed_max_ms: 0.0,
            accel_max_mss: 0.0,
            lat_accel_max_mss: 0.0,
            target_pos_m: Vector2::zeros(),
            target_vel_ms: Vector2::zeros(),
            target_accel_mss: Vector2::zeros(),
            pos_error_m: Vector2::zeros(),
            desired_speed_ms: 0.0,
            desired_turn_rate_rads: 0.0,
            desired_lat_accel_mss: 0.0,
        }
    }

    fn zero_outputs(&mut self) {
        self.desired_speed_ms = 0.0;
        self.desired_turn_rate_rads = 0.0;
        self.desired_lat_accel_mss = 0.0;
    }
}

impl PosControl for SimplePosControl {
    fn set_limits(
        &mut self,
        speed_max_ms: f64,
        accel_max_mss: f64,
        lat_accel_max_mss: f64,
        _jerk_max_msss: f64,
    ) {
        self.speed_max_ms = speed_max_ms;
        self.accel_max_mss = accel_max_mss;
        self.lat_accel_max_mss = lat_accel_max_mss;
    }

    fn get_pos_p_gain(&self) -> f64 {
        self.params.pos_kp
    }

    fn set_pos_vel_accel_target(
        &mut self,
        pos_m: Vector2<f64>,
        vel_ms: Vector2<f64>,
        accel_mss: Vector2<f64>,
    ) {
        self.target_pos_m = pos_m;
        self.target_vel_ms = vel_ms;
        self.target_accel_mss = accel_mss;
    }

    fn get_desired_velocity(&self) -> Vector2<f64> {
        self.target_vel_ms
    }

    fn get_pos_error(&self) -> Vector2<f64> {
        self.pos_error_m
    }

    fn seed_desired_speed(&mut self, speed_ms: f64) {
        self.desired_speed_ms = speed_ms;
    }

    fn update(&mut self, state: &VehicleState, dt: f64) {
        let (location, nav_origin, heading_rad) =
            match (state.location, state.nav_origin, state.heading_rad) {
                (Some(l), Some(o), Some(h)) => (l, o, h),
                _ => {
                    self.zero_outputs();
                    return;
                }
            };

        let pos_m = location.ne_from(&nav_origin);
        self.pos_error_m = self.target_pos_m - pos_m;

        // Velocity demand: feedforward plus proportional pull onto the
        // target point
        let vel_dem_ms = self.target_vel_ms + self.pos_error_m * self.params.pos_kp;
        let speed_dem_ms = vel_dem_ms.norm().min(self.speed_max_ms);

        if speed_dem_ms > 1.0e-3 {
            let course_rad = vel_dem_ms[1].atan2(vel_dem_ms[0]);
            let course_error_rad = wrap_pi(course_rad - heading_rad);

            // Turn rate chases the demanded course, bounded by what the
            // lateral acceleration limit allows at the current speed
            let rate_limit_rads = self.lat_accel_max_mss / speed_dem_ms.max(0.1);
            self.desired_turn_rate_rads = (self.params.heading_kp * course_error_rad)
                .clamp(-rate_limit_rads, rate_limit_rads);

            self.desired_lat_accel_mss = (speed_dem_ms * self.desired_turn_rate_rads)
                .clamp(-self.lat_accel_max_mss, self.lat_accel_max_mss);
        } else {
            self.desired_turn_rate_rads = 0.0;
            self.desired_lat_accel_mss = 0.0;
        }

        // Accel-limited slew of the speed demand
        if dt > 0.0 {
            let max_delta = self.accel_max_mss * dt;
            self.desired_speed_ms +=
                (speed_dem_ms - self.desired_speed_ms).clamp(-max_delta, max_delta);
        } else {
            self.desired_speed_ms = speed_dem_ms;
        }
    }

    fn get_desired_speed(&self) -> f64 {
        self.desired_speed_ms
    }

    fn get_desired_turn_rate_rads(&self) -> f64 {
        self.desired_turn_rate_rads
    }

    fn get_desired_lat_accel(&self) -> f64 {
        self.desired_lat_accel_mss
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::loc::Location;
    use nalgebra::Vector3;

    fn test_state(north_m: f64, east_m: f64, heading_rad: f64) -> VehicleState {
        let origin = Location::new(45.0, 9.0);
        let mut location = origin;
        location.offset(north_m, east_m);
        VehicleState {
            armed: true,
            location: Some(location),
            nav_origin: Some(origin),
            velocity_ned: Some(Vector3::zeros()),
            heading_rad: Some(heading_rad),
        }
    }

    fn test_ctrl() -> SimplePosControl {
        let mut ctrl = SimplePosControl::new(PosControlParams {
            pos_kp: 1.0,
            heading_kp: 2.0,
        });
        ctrl.set_limits(2.0, 1.0, 1.0, 1.0);
        ctrl
    }

    #[test]
    fn test_pulls_toward_target() {
        let mut ctrl = test_ctrl();
        ctrl.set_pos_vel_accel_target(
            Vector2::new(10.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::zeros(),
        );

        // Vehicle at the frame origin facing north, target 10 m north
        ctrl.update(&test_state(0.0, 0.0, 0.0), 0.1);

        assert!(ctrl.get_desired_speed() > 0.0);
        assert!(ctrl.get_desired_turn_rate_rads().abs() < 1e-6);
        assert!((ctrl.get_pos_error() - Vector2::new(10.0, 0.0)).norm() < 0.01);
    }

    #[test]
    fn test_turns_toward_offset_target() {
        let mut ctrl = test_ctrl();
        ctrl.set_pos_vel_accel_target(
            Vector2::new(0.0, 10.0),
            Vector2::new(0.0, 1.0),
            Vector2::zeros(),
        );

        // Target due east, vehicle facing north: expect a right turn
        ctrl.update(&test_state(0.0, 0.0, 0.0), 0.1);
        assert!(ctrl.get_desired_turn_rate_rads() > 0.0);
        assert!(ctrl.get_desired_lat_accel() > 0.0);
    }

    #[test]
    fn test_unavailable_state_zeroes_outputs() {
        let mut ctrl = test_ctrl();
        ctrl.set_pos_vel_accel_target(
            Vector2::new(10.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::zeros(),
        );
        ctrl.update(&test_state(0.0, 0.0, 0.0), 0.1);
        assert!(ctrl.get_desired_speed() > 0.0);

        let mut state = test_state(0.0, 0.0, 0.0);
        state.location = None;
        ctrl.update(&state, 0.1);
        assert!((ctrl.get_desired_speed() - 0.0).abs() < 1e-12);
        assert!((ctrl.get_desired_turn_rate_rads() - 0.0).abs() < 1e-12);
    }
}
