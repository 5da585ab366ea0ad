//! # Waypoint navigation
//!
//! Track manager for waypoint following. Owns the previous/current/next leg
//! ring of jerk-limited speed profiles, advances the moving target along the
//! current leg each control cycle, chains fast waypoints where the corner
//! geometry allows it, pivots in place where it does not, and degrades to a
//! controlled stop whenever a required input is unavailable.
//!
//! The module is designed for a single-threaded cyclic executive: all entry
//! points take the vehicle state snapshot by reference and return quickly.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use params::Params;
pub use state::WpNav;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// The controller is considered inactive if `update` has not been called
/// within this window.
pub const WP_NAV_TIMEOUT_MS: u128 = 100;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur in waypoint navigation
#[derive(Debug, Error)]
pub enum WpNavError {
    #[error("Could not load waypoint navigation parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    #[error("No navigation frame origin has been set by the estimator")]
    NoNavOrigin,

    #[error("No vehicle position estimate is available")]
    NoLocation,

    #[error("The given waypoint location is uninitialised")]
    UninitialisedLocation,
}
