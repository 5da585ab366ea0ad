//! Closed-loop mission tests for the waypoint navigation controller.
//!
//! These run the controller against a kinematic unicycle model which tracks
//! the speed and turn rate demands perfectly, checking the end-to-end
//! behaviours: arrival, fast chaining through gentle corners, pivoting at
//! sharp ones and degrading safely when the position fix is lost.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;

use nav_ctrl::loc::{Location, VehicleState};
use nav_ctrl::pos_ctrl::{PosControlParams, SimplePosControl};
use nav_ctrl::wp_nav::{Params, WpNav};
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const DT_S: f64 = 0.02;

// ---------------------------------------------------------------------------
// HELPERS
// ---------------------------------------------------------------------------

struct Plant {
    location: Location,
    heading_rad: f64,
    speed_ms: f64,
}

impl Plant {
    fn new(location: Location, heading_rad: f64) -> Self {
        Self {
            location,
            heading_rad,
            speed_ms: 0.0,
        }
    }

    fn state(&self, nav_origin: Location) -> VehicleState {
        VehicleState {
            armed: true,
            location: Some(self.location),
            nav_origin: Some(nav_origin),
            velocity_ned: Some(Vector3::new(
                self.speed_ms * self.heading_rad.cos(),
                self.speed_ms * self.heading_rad.sin(),
                0.0,
            )),
            heading_rad: Some(self.heading_rad),
        }
    }

    fn step(&mut self, speed_dem_ms: f64, turn_rate_dem_rads: f64, dt: f64) {
        self.speed_ms = speed_dem_ms;
        self.heading_rad = wrap_pi(self.heading_rad + turn_rate_dem_rads * dt);
        self.location.offset(
            self.speed_ms * self.heading_rad.cos() * dt,
            self.speed_ms * self.heading_rad.sin() * dt,
        );
    }
}

fn mission_params() -> Params {
    use nav_ctrl::pivot::PivotParams;

    Params {
        speed_max_ms: 2.0,
        speed_min_ms: 0.0,
        radius_m: 2.0,
        accel_max_mss: 1.0,
        decel_max_mss: 0.0,
        lat_accel_max_mss: 1.0,
        jerk_max_msss: 1.0,
        jerk_time_s: 1.0,
        track_scalar_bias: 0.05,
        track_scalar_min: 0.1,
        track_scalar_max: 1.0,
        pivot: PivotParams {
            angle_threshold_rad: 60f64.to_radians(),
            done_threshold_rad: 5f64.to_radians(),
            heading_kp: 2.0,
            rate_max_rads: 1.0,
            accel_max_radss: 2.0,
        },
    }
}

fn mission_nav() -> WpNav<SimplePosControl> {
    let mut wp_nav = WpNav::new(
        mission_params(),
        SimplePosControl::new(PosControlParams {
            pos_kp: 1.0,
            heading_kp: 2.0,
        }),
    );
    wp_nav.set_turn_params(0.0, true);
    wp_nav
}

fn offset_from(origin: &Location, north_m: f64, east_m: f64) -> Location {
    let mut loc = *origin;
    loc.offset(north_m, east_m);
    loc
}

/// Run until arrival at the current destination, returning the number of
/// cycles taken. Panics if the leg takes longer than `max_steps`.
fn run_to_arrival(
    wp_nav: &mut WpNav<SimplePosControl>,
    plant: &mut Plant,
    nav_origin: Location,
    max_steps: usize,
) -> usize {
    let mut steps = 0;
    while !wp_nav.reached_destination() {
        wp_nav.update(&plant.state(nav_origin), DT_S);
        plant.step(
            wp_nav.get_desired_speed(),
            wp_nav.get_desired_turn_rate_rads(),
            DT_S,
        );
        steps += 1;
        assert!(steps < max_steps, "leg did not complete");
    }
    steps
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[test]
fn straight_leg_arrives_within_radius() {
    let nav_origin = Location::new(52.4068, -0.3247);
    let mut plant = Plant::new(nav_origin, 0.0);
    let mut wp_nav = mission_nav();

    let destination = offset_from(&nav_origin, 40.0, 0.0);
    wp_nav
        .set_desired_location(&plant.state(nav_origin), destination, None)
        .unwrap();

    run_to_arrival(&mut wp_nav, &mut plant, nav_origin, 20_000);

    assert!(plant.location.get_distance(&destination) <= wp_nav.get_radius() + 0.1);
    // Arrived at a controlled speed, not a crash stop
    assert!(plant.speed_ms < 0.5);
}

#[test]
fn fast_corner_chains_without_stopping() {
    let nav_origin = Location::new(52.4068, -0.3247);
    let mut plant = Plant::new(nav_origin, 0.0);
    let mut wp_nav = mission_nav();

    // 40 m north then a gentle 45 degree corner to the north-east
    let wp_a = offset_from(&nav_origin, 40.0, 0.0);
    let wp_b = offset_from(&nav_origin, 80.0, 40.0);
    wp_nav
        .set_desired_location(&plant.state(nav_origin), wp_a, Some(wp_b))
        .unwrap();
    assert!(wp_nav.is_fast_waypoint());

    // Run to the handover, which is reported as reaching the first waypoint
    let mut last_speed = 0.0;
    let mut steps = 0;
    while !wp_nav.reached_destination() {
        wp_nav.update(&plant.state(nav_origin), DT_S);
        plant.step(
            wp_nav.get_desired_speed(),
            wp_nav.get_desired_turn_rate_rads(),
            DT_S,
        );

        // Demands never jump: bounded by the accel limit per cycle
        let speed = wp_nav.get_desired_speed();
        assert!((speed - last_speed).abs() <= 1.0 * DT_S + 1e-6);
        last_speed = speed;

        steps += 1;
        assert!(steps < 20_000, "first leg did not complete");
    }

    // Handed over near the corner while still moving
    assert!(wp_nav.get_desired_speed() > 0.2);
    assert!(plant.location.get_distance(&wp_a) <= wp_nav.get_radius() + 1.0);

    // Sending the lookahead waypoint picks up the precomputed leg, the speed
    // demand stays continuous through the corner and no pivot is triggered
    wp_nav
        .set_desired_location(&plant.state(nav_origin), wp_b, None)
        .unwrap();
    assert!(!wp_nav.pivot_active());

    let mut steps = 0;
    while !wp_nav.reached_destination() {
        wp_nav.update(&plant.state(nav_origin), DT_S);
        plant.step(
            wp_nav.get_desired_speed(),
            wp_nav.get_desired_turn_rate_rads(),
            DT_S,
        );

        let speed = wp_nav.get_desired_speed();
        assert!((speed - last_speed).abs() <= 1.0 * DT_S + 1e-6);
        last_speed = speed;

        steps += 1;
        assert!(steps < 20_000, "second leg did not complete");
    }
    assert!(plant.location.get_distance(&wp_b) <= wp_nav.get_radius() + 0.1);
}

#[test]
fn sharp_corner_pivots_in_place() {
    let nav_origin = Location::new(52.4068, -0.3247);
    let mut plant = Plant::new(nav_origin, 0.0);
    let mut wp_nav = mission_nav();

    // Out 30 m north, then straight back south: a 180 degree corner
    let wp_a = offset_from(&nav_origin, 30.0, 0.0);
    wp_nav
        .set_desired_location(&plant.state(nav_origin), wp_a, None)
        .unwrap();
    run_to_arrival(&mut wp_nav, &mut plant, nav_origin, 20_000);

    let wp_b = offset_from(&nav_origin, 0.0, 0.0);
    wp_nav
        .set_desired_location(&plant.state(nav_origin), wp_b, None)
        .unwrap();
    assert!(wp_nav.pivot_active(), "sharp corner must trigger a pivot");

    // While pivoting the vehicle holds position and rotates
    let pivot_start = plant.location;
    let mut steps = 0;
    while wp_nav.pivot_active() {
        wp_nav.update(&plant.state(nav_origin), DT_S);
        plant.step(
            wp_nav.get_desired_speed(),
            wp_nav.get_desired_turn_rate_rads(),
            DT_S,
        );
        steps += 1;
        assert!(steps < 20_000, "pivot never completed");
    }
    assert!(plant.location.get_distance(&pivot_start) < 1.0);

    // Heading is now roughly onto the new leg
    let bearing = plant.location.get_bearing_to(&wp_b);
    assert!(wrap_pi(bearing - plant.heading_rad).abs() < 10f64.to_radians());

    run_to_arrival(&mut wp_nav, &mut plant, nav_origin, 20_000);
    assert!(plant.location.get_distance(&wp_b) <= wp_nav.get_radius() + 0.1);
}

#[test]
fn lost_fix_degrades_to_stop_and_mission_resumes() {
    let nav_origin = Location::new(52.4068, -0.3247);
    let mut plant = Plant::new(nav_origin, 0.0);
    let mut wp_nav = mission_nav();

    let destination = offset_from(&nav_origin, 60.0, 0.0);
    wp_nav
        .set_desired_location(&plant.state(nav_origin), destination, None)
        .unwrap();

    // Drive for a while to get up to speed
    for _ in 0..500 {
        wp_nav.update(&plant.state(nav_origin), DT_S);
        plant.step(
            wp_nav.get_desired_speed(),
            wp_nav.get_desired_turn_rate_rads(),
            DT_S,
        );
    }
    assert!(wp_nav.get_desired_speed() > 1.0);

    // Lose the fix: the speed demand ramps down to zero and steering is
    // zeroed immediately
    for i in 0..500 {
        let mut state = plant.state(nav_origin);
        state.location = None;
        wp_nav.update(&state, DT_S);
        plant.step(
            wp_nav.get_desired_speed(),
            wp_nav.get_desired_turn_rate_rads(),
            DT_S,
        );
        if i == 0 {
            assert!((wp_nav.get_desired_turn_rate_rads() - 0.0).abs() < 1e-12);
        }
    }
    assert!((wp_nav.get_desired_speed() - 0.0).abs() < 1e-9);

    // Fix recovers: the mission continues to the destination
    run_to_arrival(&mut wp_nav, &mut plant, nav_origin, 40_000);
    assert!(plant.location.get_distance(&destination) <= wp_nav.get_radius() + 0.1);
}
