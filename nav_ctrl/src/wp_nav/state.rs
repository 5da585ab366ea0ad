//! Waypoint navigation state and cyclic processing

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;
use nalgebra::Vector2;
use std::time::Instant;

// Internal
use super::{Params, WpNavError, WP_NAV_TIMEOUT_MS};
use crate::loc::{get_corner_angle, Location, VehicleState, MIN_TRACK_LENGTH_M};
use crate::pivot::PivotTurn;
use crate::pos_ctrl::PosControl;
use crate::scurve::SCurve;
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Waypoint navigation controller.
///
/// Generic over the downstream position controller so the guidance logic can
/// be exercised against the simple pursuit controller in tests and the
/// simulator, and against a vehicle-specific controller on hardware.
pub struct WpNav<P: PosControl> {
    params: Params,

    /// Downstream position controller
    pos_ctrl: P,

    /// Pivot turn manager
    pivot: PivotTurn,

    // Limits in force, resolved from `init` arguments and parameters
    speed_max_ms: f64,
    accel_max_mss: f64,
    decel_max_mss: f64,
    lat_accel_max_mss: f64,
    jerk_max_msss: f64,

    /// Minimum steered turn radius, zero for vehicles which can pivot
    turn_radius_m: f64,

    // Previous/current/next leg ring
    scurve_prev_leg: SCurve,
    scurve_this_leg: SCurve,
    scurve_next_leg: SCurve,

    origin: Location,
    destination: Location,
    next_destination: Option<Location>,
    orig_and_dest_valid: bool,

    /// Obstacle-avoidance adjusted leg endpoints, used for cross-track
    /// reporting when an avoidance layer has bent the leg
    oa_origin: Option<Location>,
    oa_destination: Option<Location>,

    /// True when the current waypoint will be chained through without
    /// stopping
    fast_waypoint: bool,

    /// True when the lookahead decision marked the corner at the current
    /// destination for a pivot turn, carried into the next leg's activation
    /// check
    pivot_at_next_wp: bool,

    reached_destination: bool,

    // Moving target kinematics in the local NE frame
    target_pos_m: Vector2<f64>,
    target_vel_ms: Vector2<f64>,
    target_accel_mss: Vector2<f64>,

    /// Filtered profile time scaler, 1.0 when tracking well
    track_scalar_dt: f64,

    distance_to_destination_m: f64,
    bearing_to_destination_rad: f64,
    crosstrack_error_m: f64,

    // Outputs for the steering/throttle layer
    desired_speed_ms: f64,
    desired_turn_rate_rads: f64,
    desired_lat_accel_mss: f64,

    /// Time of the last `update` call, `None` before the first
    last_update: Option<Instant>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<P: PosControl> WpNav<P> {
    /// Create a new controller from already loaded parameters.
    pub fn new(params: Params, pos_ctrl: P) -> Self {
        let pivot = PivotTurn::new(params.pivot.clone());
        let mut wp_nav = Self {
            params,
            pos_ctrl,
            pivot,
            speed_max_ms: 0.0,
            accel_max_mss: 0.0,
            decel_max_mss: 0.0,
            lat_accel_max_mss: 0.0,
            jerk_max_msss: 0.0,
            turn_radius_m: 0.0,
            scurve_prev_leg: SCurve::new(),
            scurve_this_leg: SCurve::new(),
            scurve_next_leg: SCurve::new(),
            origin: Location::default(),
            destination: Location::default(),
            next_destination: None,
            orig_and_dest_valid: false,
            oa_origin: None,
            oa_destination: None,
            fast_waypoint: false,
            pivot_at_next_wp: false,
            reached_destination: false,
            target_pos_m: Vector2::zeros(),
            target_vel_ms: Vector2::zeros(),
            target_accel_mss: Vector2::zeros(),
            track_scalar_dt: 1.0,
            distance_to_destination_m: 0.0,
            bearing_to_destination_rad: 0.0,
            crosstrack_error_m: 0.0,
            desired_speed_ms: 0.0,
            desired_turn_rate_rads: 0.0,
            desired_lat_accel_mss: 0.0,
            last_update: None,
        };
        wp_nav.init(&VehicleState::default(), 0.0, 0.0, 0.0, 0.0);
        wp_nav
    }

    /// Create a new controller, loading parameters from the given file in
    /// the software root parameter directory.
    pub fn from_file(param_file_path: &str, pos_ctrl: P) -> Result<Self, WpNavError> {
        Ok(Self::new(util::params::load(param_file_path)?, pos_ctrl))
    }

    /// (Re)initialise the controller, resolving the limits in force and
    /// clearing any leg in progress.
    ///
    /// Non-positive arguments select the parameter file value. A zero
    /// acceleration parameter falls back to half the maximum speed, a zero
    /// jerk or lateral acceleration parameter falls back to the resolved
    /// acceleration limit.
    ///
    /// When a position estimate is available the origin and destination are
    /// seeded with the stopping location so the vehicle holds station,
    /// otherwise they are left invalid and `update` degrades until a
    /// waypoint is set.
    pub fn init(
        &mut self,
        state: &VehicleState,
        speed_max_ms: f64,
        accel_max_mss: f64,
        lat_accel_max_mss: f64,
        jerk_max_msss: f64,
    ) {
        self.speed_max_ms = if speed_max_ms > 0.0 {
            speed_max_ms
        } else {
            self.params.speed_max_ms
        };
        self.accel_max_mss = if accel_max_mss > 0.0 {
            accel_max_mss
        } else if self.params.accel_max_mss > 0.0 {
            self.params.accel_max_mss
        } else {
            self.speed_max_ms / 2.0
        };
        self.decel_max_mss = if self.params.decel_max_mss > 0.0 {
            self.params.decel_max_mss
        } else {
            self.accel_max_mss
        };
        self.lat_accel_max_mss = if lat_accel_max_mss > 0.0 {
            lat_accel_max_mss
        } else if self.params.lat_accel_max_mss > 0.0 {
            self.params.lat_accel_max_mss
        } else {
            self.accel_max_mss
        };
        self.jerk_max_msss = if jerk_max_msss > 0.0 {
            jerk_max_msss
        } else if self.params.jerk_max_msss > 0.0 {
            self.params.jerk_max_msss
        } else {
            self.accel_max_mss
        };

        self.pos_ctrl.set_limits(
            self.speed_max_ms,
            self.accel_max_mss,
            self.lat_accel_max_mss,
            self.jerk_max_msss,
        );

        self.scurve_prev_leg.init();
        self.scurve_this_leg.init();
        self.scurve_next_leg.init();
        self.next_destination = None;
        self.oa_origin = None;
        self.oa_destination = None;
        self.fast_waypoint = false;
        self.pivot_at_next_wp = false;
        self.reached_destination = false;

        // Hold station at the stopping point if we know where we are
        match self.get_stopping_location(state) {
            Ok(stopping) => {
                self.origin = stopping;
                self.destination = stopping;
                self.orig_and_dest_valid = true;
            }
            Err(_) => self.orig_and_dest_valid = false,
        }
        self.target_pos_m = Vector2::zeros();
        self.target_vel_ms = Vector2::zeros();
        self.target_accel_mss = Vector2::zeros();
        self.track_scalar_dt = 1.0;
        self.pivot.deactivate();
    }

    /// Set the next waypoint, with an optional lookahead waypoint enabling
    /// fast chaining through the corner.
    ///
    /// A reached destination becomes the origin of the new leg, and on a
    /// fast waypoint handover the precomputed lookahead leg is shifted in
    /// rather than recalculated. An interrupted or inactive leg re-initialises
    /// the controller first, so the new leg starts from the point the
    /// vehicle can stop at.
    pub fn set_desired_location(
        &mut self,
        state: &VehicleState,
        destination: Location,
        next_destination: Option<Location>,
    ) -> Result<(), WpNavError> {
        let location = state.location.ok_or(WpNavError::NoLocation)?;
        let nav_origin = state.nav_origin.ok_or(WpNavError::NoNavOrigin)?;
        if !destination.initialised() {
            return Err(WpNavError::UninitialisedLocation);
        }

        // Re-sending the leg already being tracked is a no-op
        if self.is_active()
            && self.orig_and_dest_valid
            && !self.reached_destination
            && destination == self.destination
            && next_destination == self.next_destination
        {
            return Ok(());
        }

        // Re-initialise if the previous destination was interrupted, which
        // seeds the destination with the stopping location
        if !self.is_active() || !self.orig_and_dest_valid || !self.reached_destination {
            self.init(state, 0.0, 0.0, 0.0, 0.0);
        }

        // Shift this leg to the previous leg so its residual deceleration is
        // superimposed on the new one, and start the new leg from the
        // previous destination
        self.scurve_prev_leg = self.scurve_this_leg;
        self.origin = self.destination;
        self.destination = destination;
        self.orig_and_dest_valid = true;
        self.reached_destination = false;

        self.distance_to_destination_m = location.get_distance(&destination);
        self.bearing_to_destination_rad = location.get_bearing_to(&destination);

        // Pivot onto the new leg if the heading change demands it, or if the
        // corner was already marked for pivoting when it was the lookahead.
        // Skipped on a fast chain continuation, pivoting mid-chain is not
        // allowed
        if !self.fast_waypoint {
            self.pivot.deactivate();
            if let Some(heading_rad) = state.heading_rad {
                self.pivot.check_activation(
                    wrap_pi(self.bearing_to_destination_rad - heading_rad),
                    self.pivot_at_next_wp,
                );
            }
        }

        let origin_ne = self.origin.ne_from(&nav_origin);
        let dest_ne = destination.ne_from(&nav_origin);

        if self.fast_waypoint
            && self.next_destination == Some(destination)
            && !self.scurve_next_leg.is_empty()
        {
            // Chain continuation: the leg was already computed as the
            // lookahead, shift it in instead of recalculating
            self.scurve_this_leg = self.scurve_next_leg;
        } else {
            self.scurve_this_leg.calculate_track(
                origin_ne,
                dest_ne,
                self.speed_max_ms,
                self.accel_max_mss,
                self.params.jerk_time_s,
                self.jerk_max_msss,
            );
        }

        // Lookahead leg, only computed when the corner at `destination`
        // will not demand a pivot
        self.scurve_next_leg.init();
        self.next_destination = None;
        self.fast_waypoint = false;
        self.pivot_at_next_wp = false;
        if let Some(next) = next_destination {
            if next.initialised() && destination.get_distance(&next) >= MIN_TRACK_LENGTH_M {
                let corner_angle_rad = get_corner_angle(&self.origin, &destination, &next);
                self.pivot_at_next_wp = self.pivot.would_activate(corner_angle_rad);
                if !self.pivot_at_next_wp {
                    let next_ne = next.ne_from(&nav_origin);
                    self.scurve_next_leg.calculate_track(
                        dest_ne,
                        next_ne,
                        self.speed_max_ms,
                        self.accel_max_mss,
                        self.params.jerk_time_s,
                        self.jerk_max_msss,
                    );
                    self.fast_waypoint = true;
                }
                self.next_destination = Some(next);
            }
        }

        self.oa_origin = None;
        self.oa_destination = None;
        self.target_pos_m = origin_ne;
        self.target_vel_ms = Vector2::zeros();
        self.target_accel_mss = Vector2::zeros();

        debug!(
            "New waypoint ({:.7}, {:.7}), leg length {:.2} m, fast: {}, pivot: {}",
            destination.lat_deg,
            destination.lon_deg,
            self.scurve_this_leg.get_length(),
            self.fast_waypoint,
            self.pivot.active()
        );

        Ok(())
    }

    /// Set the next waypoint as a north-east offset in meters from the
    /// navigation frame origin, with an optional lookahead offset.
    pub fn set_desired_location_ne(
        &mut self,
        state: &VehicleState,
        offset_ne_m: Vector2<f64>,
        next_offset_ne_m: Option<Vector2<f64>>,
    ) -> Result<(), WpNavError> {
        let nav_origin = state.nav_origin.ok_or(WpNavError::NoNavOrigin)?;

        let mut destination = nav_origin;
        destination.offset(offset_ne_m[0], offset_ne_m[1]);

        let next_destination = next_offset_ne_m.map(|offset| {
            let mut next = nav_origin;
            next.offset(offset[0], offset[1]);
            next
        });

        self.set_desired_location(state, destination, next_destination)
    }

    /// Replace the current waypoint with the point the vehicle can stop at,
    /// bringing it to a controlled halt.
    pub fn set_desired_location_to_stopping_location(
        &mut self,
        state: &VehicleState,
    ) -> Result<(), WpNavError> {
        let stopping = self.get_stopping_location(state)?;
        self.set_desired_location(state, stopping, None)
    }

    /// The point the vehicle would come to rest at if asked to stop now,
    /// projected along the current ground velocity.
    pub fn get_stopping_location(&self, state: &VehicleState) -> Result<Location, WpNavError> {
        let location = state.location.ok_or(WpNavError::NoLocation)?;

        let velocity = match state.groundspeed_vector() {
            Some(v) => v,
            None => return Ok(location),
        };
        let speed_ms = velocity.norm();
        if speed_ms < 1.0e-3 || self.decel_max_mss <= 0.0 {
            return Ok(location);
        }

        let stopping_dist_m = speed_ms * speed_ms / (2.0 * self.decel_max_mss);
        let direction = velocity / speed_ms;
        let mut stopping = location;
        stopping.offset(direction[0] * stopping_dist_m, direction[1] * stopping_dist_m);
        Ok(stopping)
    }

    /// Run one navigation cycle.
    ///
    /// Never fails: if a required input is unavailable, there is no leg to
    /// track or the vehicle is disarmed, the outputs degrade to a controlled
    /// stop instead.
    pub fn update(&mut self, state: &VehicleState, dt: f64) {
        let was_active = self.is_active();
        self.last_update = Some(Instant::now());

        let inputs = match (
            state.location,
            state.nav_origin,
            state.groundspeed_vector(),
        ) {
            (Some(l), Some(o), Some(v)) => Some((l, o, v)),
            _ => None,
        };

        let (location, _nav_origin, groundspeed) = match inputs {
            Some(i) if state.armed && self.orig_and_dest_valid && !self.reached_destination => i,
            _ => {
                self.stop_outputs(dt);
                return;
            }
        };

        // Resuming after a gap: seed the speed limiting from the speed the
        // vehicle actually has so the demand does not jump
        if !was_active {
            if let Some(forward_speed_ms) = state.forward_speed() {
                let forward_speed_ms = forward_speed_ms.max(0.0);
                self.desired_speed_ms = forward_speed_ms;
                self.pos_ctrl.seed_desired_speed(forward_speed_ms);
            }
        }

        self.distance_to_destination_m = location.get_distance(&self.destination);
        self.bearing_to_destination_rad = location.get_bearing_to(&self.destination);

        // A pivoting vehicle holds position, the profile does not advance
        // until it is back on the leg heading
        if !self.pivot.active() {
            self.advance_wp_target_along_track(&location, &groundspeed, dt);
        }
        self.update_steering_and_speed(state, &location, dt);

        self.crosstrack_error_m = self.calc_crosstrack_error(&location);
    }

    /// True if `update` has been called within the activity timeout.
    pub fn is_active(&self) -> bool {
        match self.last_update {
            Some(t) => t.elapsed().as_millis() < WP_NAV_TIMEOUT_MS,
            None => false,
        }
    }

    /// Set the steering geometry of the vehicle. A vehicle which can pivot
    /// in place is modelled with a zero turn radius.
    pub fn set_turn_params(&mut self, turn_radius_m: f64, pivot_possible: bool) {
        self.turn_radius_m = if pivot_possible { 0.0 } else { turn_radius_m };
        self.pivot.enable(pivot_possible);
    }

    /// Override the leg speed for subsequent waypoints.
    pub fn set_speed_max(&mut self, speed_max_ms: f64) {
        if speed_max_ms > 0.0 {
            self.speed_max_ms = speed_max_ms;
            self.pos_ctrl.set_limits(
                self.speed_max_ms,
                self.accel_max_mss,
                self.lat_accel_max_mss,
                self.jerk_max_msss,
            );
        }
    }

    pub fn reached_destination(&self) -> bool {
        self.reached_destination
    }

    pub fn is_fast_waypoint(&self) -> bool {
        self.fast_waypoint
    }

    pub fn pivot_active(&self) -> bool {
        self.pivot.active()
    }

    pub fn get_destination(&self) -> Option<Location> {
        if self.orig_and_dest_valid {
            Some(self.destination)
        } else {
            None
        }
    }

    pub fn get_distance_to_destination(&self) -> f64 {
        self.distance_to_destination_m
    }

    pub fn get_bearing_to_destination(&self) -> f64 {
        self.bearing_to_destination_rad
    }

    pub fn get_crosstrack_error(&self) -> f64 {
        self.crosstrack_error_m
    }

    pub fn get_desired_speed(&self) -> f64 {
        self.desired_speed_ms
    }

    pub fn get_desired_turn_rate_rads(&self) -> f64 {
        self.desired_turn_rate_rads
    }

    pub fn get_desired_lat_accel(&self) -> f64 {
        self.desired_lat_accel_mss
    }

    pub fn get_speed_max(&self) -> f64 {
        self.speed_max_ms
    }

    /// Arrival radius in force: the configured radius, widened to the turn
    /// radius for vehicles which cannot pivot.
    pub fn get_radius(&self) -> f64 {
        self.params.radius_m.max(self.turn_radius_m)
    }

    /// Provide obstacle-avoidance adjusted endpoints for the current leg,
    /// used only for cross-track reporting. Cleared on every new waypoint.
    pub fn set_oa_adjusted(&mut self, origin: Option<Location>, destination: Option<Location>) {
        self.oa_origin = origin;
        self.oa_destination = destination;
    }

    pub fn pos_control(&self) -> &P {
        &self.pos_ctrl
    }

    /// Advance the moving target along the current leg by scaled time, feed
    /// it to the position controller and handle leg completion.
    fn advance_wp_target_along_track(
        &mut self,
        location: &Location,
        groundspeed: &Vector2<f64>,
        dt: f64,
    ) {
        self.update_track_scaler(groundspeed, dt);

        let scaled_dt = dt * self.track_scalar_dt;
        let wp_radius_m = self.get_radius();
        let leg_complete = self.scurve_this_leg.advance_target_along_track(
            &mut self.scurve_prev_leg,
            &self.scurve_next_leg,
            wp_radius_m,
            self.fast_waypoint,
            scaled_dt,
            &mut self.target_pos_m,
            &mut self.target_vel_ms,
            &mut self.target_accel_mss,
        );

        self.pos_ctrl.set_pos_vel_accel_target(
            self.target_pos_m,
            self.target_vel_ms,
            self.target_accel_mss,
        );

        if leg_complete && !self.reached_destination {
            if self.fast_waypoint {
                // Handover: reported immediately so the caller can send the
                // next waypoint and pick up the precomputed leg
                debug!(
                    "Fast handover at ({:.7}, {:.7})",
                    self.destination.lat_deg, self.destination.lon_deg
                );
                self.reached_destination = true;
            } else {
                // The profile has delivered the target to the destination,
                // arrival is declared once the vehicle itself is there
                let arrived = self.distance_to_destination_m <= wp_radius_m
                    || location.past_interval_finish_line(&self.origin, &self.destination);
                if arrived {
                    debug!(
                        "Reached waypoint ({:.7}, {:.7})",
                        self.destination.lat_deg, self.destination.lon_deg
                    );
                    self.reached_destination = true;
                }
            }
        }
    }

    /// Recompute the profile time scaler from the tracking error.
    ///
    /// Profile time slows down when the vehicle falls behind the target and
    /// recovers smoothly as the error is closed.
    fn update_track_scaler(&mut self, groundspeed: &Vector2<f64>, dt: f64) {
        let target_vel_ms = self.pos_ctrl.get_desired_velocity();
        let target_speed_ms = target_vel_ms.norm();

        let mut scaler = 1.0;
        if target_speed_ms > 1.0e-3 {
            let track_direction = target_vel_ms / target_speed_ms;
            let track_error_m = self.pos_ctrl.get_pos_error().dot(&track_direction);
            let track_velocity_ms = groundspeed.dot(&track_direction);

            scaler = (self.params.track_scalar_bias
                + (track_velocity_ms - self.pos_ctrl.get_pos_p_gain() * track_error_m)
                    / target_speed_ms)
                .clamp(self.params.track_scalar_min, self.params.track_scalar_max);
        }

        // Low-pass with the natural time constant of the profile
        let tc_s = if self.jerk_max_msss > 0.0 {
            self.accel_max_mss / self.jerk_max_msss
        } else {
            1.0
        };
        self.track_scalar_dt += (scaler - self.track_scalar_dt) * (dt / tc_s).min(1.0);
    }

    /// Produce the speed/turn-rate/lateral-accel outputs for this cycle.
    fn update_steering_and_speed(&mut self, state: &VehicleState, location: &Location, dt: f64) {
        if self.pivot.active() {
            match state.heading_rad {
                Some(heading_rad) => {
                    let bearing_rad = location.get_bearing_to(&self.destination);
                    self.desired_turn_rate_rads = self
                        .pivot
                        .get_turn_rate_rads(wrap_pi(bearing_rad - heading_rad), dt);
                }
                None => {
                    self.pivot.deactivate();
                    self.desired_turn_rate_rads = 0.0;
                }
            }
            // Hold position while rotating
            self.slew_speed_to_zero(dt);
            self.desired_lat_accel_mss = 0.0;
            return;
        }

        self.pos_ctrl.update(state, dt);
        self.desired_speed_ms =
            self.apply_speed_min(self.pos_ctrl.get_desired_speed().min(self.speed_max_ms));
        self.desired_turn_rate_rads = self.pos_ctrl.get_desired_turn_rate_rads();
        self.desired_lat_accel_mss = self.pos_ctrl.get_desired_lat_accel();
    }

    /// Degrade all outputs to a controlled stop.
    fn stop_outputs(&mut self, dt: f64) {
        self.slew_speed_to_zero(dt);
        self.desired_turn_rate_rads = 0.0;
        self.desired_lat_accel_mss = 0.0;
        self.crosstrack_error_m = 0.0;
    }

    fn slew_speed_to_zero(&mut self, dt: f64) {
        if dt > 0.0 && self.decel_max_mss > 0.0 {
            let max_delta = self.decel_max_mss * dt;
            self.desired_speed_ms += (0.0 - self.desired_speed_ms).clamp(-max_delta, max_delta);
        } else {
            self.desired_speed_ms = 0.0;
        }
    }

    /// Raise low but non-zero speed demands to the configured minimum, used
    /// by vehicles whose drivetrain stalls below a threshold speed.
    fn apply_speed_min(&self, desired_speed_ms: f64) -> f64 {
        if self.params.speed_min_ms <= 0.0 || self.params.speed_min_ms > self.speed_max_ms {
            return desired_speed_ms;
        }
        desired_speed_ms.max(self.params.speed_min_ms)
    }

    /// Signed distance from the leg, positive when right of track, using
    /// the avoidance-adjusted endpoints where provided. A degenerate leg
    /// degrades to the distance to the destination.
    fn calc_crosstrack_error(&self, location: &Location) -> f64 {
        if !self.orig_and_dest_valid {
            return 0.0;
        }
        let origin = self.oa_origin.unwrap_or(self.origin);
        let destination = self.oa_destination.unwrap_or(self.destination);

        let track = origin.get_distance_ne(&destination);
        let length_m = track.norm();
        if length_m < MIN_TRACK_LENGTH_M {
            return location.get_distance(&destination);
        }
        let unit = track / length_m;
        let offset = origin.get_distance_ne(location);
        unit[0] * offset[1] - unit[1] * offset[0]
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
