//! # Waypoint navigation simulator
//!
//! Runs the waypoint navigation controller closed-loop against a simple
//! kinematic vehicle model over a square survey mission, logging progress
//! into a timestamped session directory. Useful for eyeballing tuning
//! changes without hardware.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, LevelFilter};
use nalgebra::Vector3;

// Internal
use nav_ctrl::loc::{Location, VehicleState};
use nav_ctrl::pos_ctrl::{PosControlParams, SimplePosControl};
use nav_ctrl::wp_nav::WpNav;
use util::logger::logger_init;
use util::maths::wrap_pi;
use util::session::Session;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Control cycle period of the simulation [s]
const CYCLE_PERIOD_S: f64 = 0.02;

/// Abort the simulation if a leg takes longer than this [s]
const LEG_TIMEOUT_S: f64 = 300.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Kinematic unicycle model which tracks the speed and turn rate demands
/// perfectly.
struct Plant {
    location: Location,
    heading_rad: f64,
    speed_ms: f64,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let session =
        Session::new("wp_sim", "sessions").wrap_err("Failed to create the session")?;
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise the logger")?;

    info!("Waypoint navigation simulator");
    info!("");

    let pos_ctrl_params: PosControlParams = util::params::load("pos_ctrl.toml")
        .wrap_err("Failed to load position control parameters")?;
    let mut wp_nav = WpNav::from_file("wp_nav.toml", SimplePosControl::new(pos_ctrl_params))
        .wrap_err("Failed to initialise waypoint navigation")?;
    wp_nav.set_turn_params(0.0, true);

    // Mission with a gentle corner (chained through fast) and a sharp one
    // (pivoted), anchored a little away from the frame origin
    let nav_origin = Location::new(52.4068, -0.3247);
    let mut start = nav_origin;
    start.offset(5.0, 5.0);

    let waypoints: Vec<Location> = [
        (45.0, 5.0),
        (85.0, 45.0),
        (85.0, 95.0),
        (45.0, 95.0),
    ]
    .iter()
    .map(|&(north_m, east_m)| {
        let mut wp = nav_origin;
        wp.offset(north_m, east_m);
        wp
    })
    .collect();

    let mut plant = Plant::new(start, 0.0);
    let mut sim_time_s = 0.0;
    let mut max_crosstrack_m: f64 = 0.0;

    let mut wp_idx = 0;
    while wp_idx < waypoints.len() {
        let next = waypoints.get(wp_idx + 1).copied();
        wp_nav
            .set_desired_location(&plant.state(nav_origin), waypoints[wp_idx], next)
            .wrap_err("Failed to set the next waypoint")?;
        info!(
            "Leg to waypoint {} ({:.1} m), fast: {}",
            wp_idx,
            wp_nav.get_distance_to_destination(),
            wp_nav.is_fast_waypoint()
        );

        let leg_start_s = sim_time_s;
        let mut last_report_s = sim_time_s;
        while !wp_nav.reached_destination() {
            wp_nav.update(&plant.state(nav_origin), CYCLE_PERIOD_S);
            plant.step(
                wp_nav.get_desired_speed(),
                wp_nav.get_desired_turn_rate_rads(),
                CYCLE_PERIOD_S,
            );
            sim_time_s += CYCLE_PERIOD_S;
            max_crosstrack_m = max_crosstrack_m.max(wp_nav.get_crosstrack_error().abs());

            if sim_time_s - last_report_s >= 5.0 {
                info!(
                    "t = {:6.1} s: {:5.1} m to go, speed {:4.2} m/s, crosstrack {:+5.2} m",
                    sim_time_s,
                    wp_nav.get_distance_to_destination(),
                    wp_nav.get_desired_speed(),
                    wp_nav.get_crosstrack_error()
                );
                last_report_s = sim_time_s;
            }

            if sim_time_s - leg_start_s > LEG_TIMEOUT_S {
                util::raise_error!(
                    "Leg to waypoint {} did not complete within {} s",
                    wp_idx,
                    LEG_TIMEOUT_S
                );
            }
        }

        // At a fast handover the follow-up waypoint picks up the precomputed
        // leg, so the corner is driven through without stopping
        wp_idx += 1;
    }

    info!("");
    info!(
        "Mission complete in {:.1} s, max crosstrack {:.2} m",
        sim_time_s, max_crosstrack_m
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

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
