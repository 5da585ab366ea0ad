//! # Pivot turn decision unit
//!
//! Skid-steer style vehicles can rotate in place rather than steering
//! through a corner. This module decides when a pending heading change is
//! large enough to warrant that, and while a pivot is active produces the
//! bounded turn rate command driving the vehicle onto the new heading.
//!
//! The track manager deactivates the pivot whenever a fast waypoint chain is
//! taken, pivoting mid-chain is not allowed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// Internal
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Pivot turn parameters
#[derive(Debug, Clone, Deserialize)]
pub struct PivotParams {
    /// Heading change above which a pivot turn is triggered [rad]
    pub angle_threshold_rad: f64,

    /// Heading error below which an active pivot is complete [rad]
    pub done_threshold_rad: f64,

    /// Proportional gain from heading error to turn rate [1/s]
    pub heading_kp: f64,

    /// Turn rate limit [rad/s]
    pub rate_max_rads: f64,

    /// Turn rate slew limit [rad/s^2]
    pub accel_max_radss: f64,
}

/// In-place rotation manager.
///
/// State transitions only happen through `check_activation`, `deactivate`
/// and completion inside `get_turn_rate_rads`.
#[derive(Debug, Clone)]
pub struct PivotTurn {
    params: PivotParams,

    /// False when the vehicle class cannot pivot (Ackermann steering)
    enabled: bool,

    active: bool,

    /// Last commanded turn rate, kept for slew limiting
    turn_rate_rads: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PivotTurn {
    pub fn new(params: PivotParams) -> Self {
        Self {
            params,
            enabled: true,
            active: false,
            turn_rate_rads: 0.0,
        }
    }

    /// Enable or disable pivoting for the vehicle class. Disabling also
    /// deactivates any pivot in progress.
    pub fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.deactivate();
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.turn_rate_rads = 0.0;
    }

    /// Pure predicate: would the given heading change trigger a pivot?
    ///
    /// Used for lookahead cornering decisions without mutating state.
    pub fn would_activate(&self, heading_change_rad: f64) -> bool {
        self.enabled && wrap_pi(heading_change_rad).abs() >= self.params.angle_threshold_rad
    }

    /// Activate if the heading error to the new leg exceeds the threshold,
    /// or unconditionally when a pivot was already planned for this corner
    /// (`planned` carries the lookahead decision made when the corner was
    /// still the next waypoint).
    pub fn check_activation(&mut self, heading_error_rad: f64, planned: bool) {
        if self.would_activate(heading_error_rad) || (self.enabled && planned) {
            self.active = true;
            self.turn_rate_rads = 0.0;
        }
    }

    /// Bounded turn rate command driving the heading error to zero.
    ///
    /// Deactivates (and returns zero) once the error drops below the
    /// completion threshold. Returns zero while inactive.
    pub fn get_turn_rate_rads(&mut self, heading_error_rad: f64, dt: f64) -> f64 {
        if !self.active {
            return 0.0;
        }

        let error = wrap_pi(heading_error_rad);
        if error.abs() < self.params.done_threshold_rad {
            self.deactivate();
            return 0.0;
        }

        let desired = (self.params.heading_kp * error)
            .clamp(-self.params.rate_max_rads, self.params.rate_max_rads);

        if dt > 0.0 {
            // Slew toward the desired rate with the angular accel limit
            let max_delta = self.params.accel_max_radss * dt;
            self.turn_rate_rads += (desired - self.turn_rate_rads).clamp(-max_delta, max_delta);
        } else {
            self.turn_rate_rads = desired;
        }

        self.turn_rate_rads
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const PI: f64 = std::f64::consts::PI;

    fn test_params() -> PivotParams {
        PivotParams {
            angle_threshold_rad: 60f64.to_radians(),
            done_threshold_rad: 5f64.to_radians(),
            heading_kp: 2.0,
            rate_max_rads: 1.0,
            accel_max_radss: 2.0,
        }
    }

    #[test]
    fn test_would_activate() {
        let pivot = PivotTurn::new(test_params());

        assert!(!pivot.would_activate(30f64.to_radians()));
        assert!(pivot.would_activate(90f64.to_radians()));
        assert!(pivot.would_activate(-90f64.to_radians()));

        // Wrapping: a 300 degree change is really -60 degrees
        assert!(pivot.would_activate(300f64.to_radians()));
    }

    #[test]
    fn test_disabled_never_activates() {
        let mut pivot = PivotTurn::new(test_params());
        pivot.enable(false);

        assert!(!pivot.would_activate(PI));
        pivot.check_activation(PI, false);
        assert!(!pivot.active());
    }

    #[test]
    fn test_planned_pivot_activates_below_threshold() {
        // A pivot planned for this corner fires even if the vehicle has
        // already swung most of the way onto the new heading
        let mut pivot = PivotTurn::new(test_params());
        pivot.check_activation(30f64.to_radians(), true);
        assert!(pivot.active());

        // But never on a vehicle which cannot pivot
        let mut pivot = PivotTurn::new(test_params());
        pivot.enable(false);
        pivot.check_activation(30f64.to_radians(), true);
        assert!(!pivot.active());
    }

    #[test]
    fn test_activation_and_completion() {
        let mut pivot = PivotTurn::new(test_params());

        pivot.check_activation(PI / 2.0, false);
        assert!(pivot.active());

        // Large error commands a bounded, slewed rate
        let rate = pivot.get_turn_rate_rads(PI / 2.0, 0.1);
        assert!(rate > 0.0);
        assert!(rate <= 2.0 * 0.1 + 1e-9);

        // Rate never exceeds the maximum
        for _ in 0..100 {
            let rate = pivot.get_turn_rate_rads(PI / 2.0, 0.1);
            assert!(rate.abs() <= 1.0 + 1e-9);
        }

        // Small error completes the pivot
        let rate = pivot.get_turn_rate_rads(1f64.to_radians(), 0.1);
        assert!((rate - 0.0).abs() < 1e-12);
        assert!(!pivot.active());
    }

    #[test]
    fn test_deactivate_clears_rate() {
        let mut pivot = PivotTurn::new(test_params());
        pivot.check_activation(PI, false);
        pivot.get_turn_rate_rads(PI, 0.1);

        pivot.deactivate();
        assert!(!pivot.active());
        assert!((pivot.get_turn_rate_rads(PI, 0.1) - 0.0).abs() < 1e-12);
    }
}
