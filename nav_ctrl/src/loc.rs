//! # Location and vehicle state
//!
//! Waypoints are geodetic locations. Internally the navigation core works in
//! a local north-east tangent plane anchored at the navigation origin, using
//! an equirectangular approximation which is plenty for the distances a
//! ground vehicle covers between waypoints.
//!
//! Bearings and headings are in radians, zero pointing north with positive
//! angles towards east.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

// Internal
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Meters per degree of latitude.
const LATLON_TO_M: f64 = 111_319.49;

/// Track lengths below this are considered degenerate.
pub const MIN_TRACK_LENGTH_M: f64 = 1.0e-6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A geodetic position used for waypoint origins and destinations.
///
/// A default-constructed location (zero latitude and longitude) is treated
/// as uninitialised.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees, positive north
    pub lat_deg: f64,

    /// Longitude in degrees, positive east
    pub lon_deg: f64,
}

/// Snapshot of the externally estimated vehicle state consumed each cycle.
///
/// Every field that comes from a sensor or estimator is optional, the
/// navigation core degrades to a safe stop when something is unavailable.
#[derive(Debug, Copy, Clone, Default)]
pub struct VehicleState {
    /// True when the vehicle is armed and allowed to move
    pub armed: bool,

    /// Current position estimate, `None` when there is no fix
    pub location: Option<Location>,

    /// Origin of the local navigation frame, `None` before the estimator has
    /// set one
    pub nav_origin: Option<Location>,

    /// Velocity in the NED frame in m/s
    pub velocity_ned: Option<Vector3<f64>>,

    /// Heading in radians, zero north, positive east
    pub heading_rad: Option<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Location {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat_deg, lon_deg }
    }

    /// True if this location has been set to something other than the
    /// all-zero default.
    pub fn initialised(&self) -> bool {
        self.lat_deg != 0.0 || self.lon_deg != 0.0
    }

    /// Get the north-east offset in meters of `other` relative to `self`.
    pub fn get_distance_ne(&self, other: &Location) -> Vector2<f64> {
        let north_m = (other.lat_deg - self.lat_deg) * LATLON_TO_M;
        let east_m =
            (other.lon_deg - self.lon_deg) * LATLON_TO_M * self.lat_deg.to_radians().cos();
        Vector2::new(north_m, east_m)
    }

    /// Get the distance in meters between `self` and `other`.
    pub fn get_distance(&self, other: &Location) -> f64 {
        self.get_distance_ne(other).norm()
    }

    /// Get the bearing from `self` to `other` in radians.
    ///
    /// Returns zero for coincident locations.
    pub fn get_bearing_to(&self, other: &Location) -> f64 {
        let ne = self.get_distance_ne(other);
        if ne.norm() < MIN_TRACK_LENGTH_M {
            return 0.0;
        }
        ne[1].atan2(ne[0])
    }

    /// Offset this location by the given number of meters north and east.
    pub fn offset(&mut self, north_m: f64, east_m: f64) {
        // Longitude scale from the latitude before the move, floored to keep
        // the division sane near the poles
        let lon_scale = self.lat_deg.to_radians().cos().max(0.01);
        self.lat_deg += north_m / LATLON_TO_M;
        self.lon_deg += east_m / (LATLON_TO_M * lon_scale);
    }

    /// Position of `self` in the local NE frame anchored at `origin`.
    pub fn ne_from(&self, origin: &Location) -> Vector2<f64> {
        origin.get_distance_ne(self)
    }

    /// True if `self` has passed the "finish line" perpendicular to the leg
    /// from `origin` to `destination`, passing through `destination`.
    ///
    /// A degenerate (zero length) leg is considered passed.
    pub fn past_interval_finish_line(&self, origin: &Location, destination: &Location) -> bool {
        let track = origin.get_distance_ne(destination);
        if track.norm() < MIN_TRACK_LENGTH_M {
            return true;
        }
        let beyond_dest = destination.get_distance_ne(self);
        track.dot(&beyond_dest) >= 0.0
    }
}

/// Signed heading change at `mid` when travelling `prev -> mid -> next`,
/// wrapped into [-pi, pi).
///
/// Degenerate geometry (either pair coincident) returns zero rather than
/// failing.
pub fn get_corner_angle(prev: &Location, mid: &Location, next: &Location) -> f64 {
    if prev.get_distance(mid) < MIN_TRACK_LENGTH_M || mid.get_distance(next) < MIN_TRACK_LENGTH_M
    {
        return 0.0;
    }
    wrap_pi(mid.get_bearing_to(next) - prev.get_bearing_to(mid))
}

impl VehicleState {
    /// Ground velocity in the NE plane, `None` when no velocity estimate is
    /// available.
    pub fn groundspeed_vector(&self) -> Option<Vector2<f64>> {
        self.velocity_ned.map(|v| Vector2::new(v[0], v[1]))
    }

    /// Forward speed estimate: the ground velocity projected onto the
    /// heading direction. Negative when moving backwards.
    pub fn forward_speed(&self) -> Option<f64> {
        let vel = self.groundspeed_vector()?;
        let heading = self.heading_rad?;
        Some(vel.dot(&Vector2::new(heading.cos(), heading.sin())))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
