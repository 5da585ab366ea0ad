//! Waypoint navigation parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// Internal
use crate::pivot::PivotParams;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Waypoint navigation parameters.
///
/// Limits set to zero here fall back to a derived value at `init` time, see
/// [`super::WpNav::init`].
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Default speed along a leg [m/s]
    pub speed_max_ms: f64,

    /// Minimum commanded speed while tracking a leg, zero to disable [m/s]
    pub speed_min_ms: f64,

    /// Waypoint acceptance radius [m]
    pub radius_m: f64,

    /// Longitudinal acceleration limit [m/s^2]
    pub accel_max_mss: f64,

    /// Deceleration limit used for stopping distance estimates, zero to use
    /// the acceleration limit [m/s^2]
    pub decel_max_mss: f64,

    /// Lateral acceleration limit in corners [m/s^2]
    pub lat_accel_max_mss: f64,

    /// Jerk limit of the speed profile, zero to match the acceleration
    /// limit [m/s^3]
    pub jerk_max_msss: f64,

    /// Cap on the duration of each jerk phase of the profile [s]
    pub jerk_time_s: f64,

    /// Bias term of the profile time scaler
    pub track_scalar_bias: f64,

    /// Lower clamp of the profile time scaler
    pub track_scalar_min: f64,

    /// Upper clamp of the profile time scaler
    pub track_scalar_max: f64,

    /// Pivot turn parameters
    pub pivot: PivotParams,
}
