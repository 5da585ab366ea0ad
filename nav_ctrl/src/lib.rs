//! # UGV navigation control library
//!
//! This library is the guidance core of the ground vehicle software. Given a
//! sequence of waypoints and the vehicle's estimated state it produces, at a
//! fixed control rate, the desired speed, lateral acceleration and turn rate
//! that the downstream steering/throttle layer must track.
//!
//! The flow through the library is:
//!
//! - [`wp_nav`] owns the previous/current/next leg ring and drives leg
//!   transitions, chaining fast waypoints where the corner allows it.
//! - [`scurve`] turns each leg into a jerk-limited speed profile which is
//!   advanced by scaled time each cycle.
//! - [`pivot`] intercepts the flow when the heading change at a waypoint
//!   is too large to steer through, substituting an in-place rotation.
//! - [`pos_ctrl`] is the seam to the downstream position controller which
//!   converts the moving target point into steering/speed demands.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod loc;
pub mod pivot;
pub mod pos_ctrl;
pub mod scurve;
pub mod wp_nav;
