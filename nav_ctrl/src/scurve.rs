//! # S-curve motion profile
//!
//! A leg is a straight line segment between two waypoints in the local NE
//! frame. Along the leg a jerk-limited speed profile is built from up to
//! seven constant-jerk phases: jerk up, constant acceleration, jerk down,
//! cruise, jerk down, constant deceleration, jerk up. Phases which are not
//! needed (a leg too short to cruise, for example) get zero duration.
//!
//! The profile is advanced incrementally by the navigation update loop and
//! queried for the instantaneous target position, velocity and acceleration.
//! When a fast waypoint is passed the previous leg is still decelerating
//! while the new leg accelerates, the two contributions are superimposed so
//! the commanded kinematics stay continuous through the corner.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;

// Internal
use crate::loc::MIN_TRACK_LENGTH_M;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Maximum number of constant-jerk phases in a profile.
const NUM_SEGMENTS: usize = 7;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One constant-jerk phase of the profile, with the kinematic state at the
/// end of the phase precomputed so queries only integrate within a phase.
#[derive(Debug, Copy, Clone, Default)]
struct Segment {
    /// Time at the end of this phase, seconds from the start of the leg
    end_time_s: f64,

    /// Jerk applied through this phase in m/s^3
    jerk_msss: f64,

    /// Acceleration at the end of this phase in m/s^2
    end_accel_mss: f64,

    /// Speed along the track at the end of this phase in m/s
    end_vel_ms: f64,

    /// Distance along the track at the end of this phase in m
    end_pos_m: f64,
}

/// A jerk-limited speed profile along a straight leg.
///
/// An empty (`init`ed) profile reports `finished` immediately. The type is
/// `Copy` so the previous/current/next leg ring can be shift-assigned
/// without allocation.
#[derive(Debug, Copy, Clone)]
pub struct SCurve {
    /// Leg origin in the local NE frame
    origin_m: Vector2<f64>,

    /// Leg destination in the local NE frame
    destination_m: Vector2<f64>,

    /// Unit vector from origin to destination
    track_unit: Vector2<f64>,

    /// Length of the leg in meters
    track_length_m: f64,

    /// Peak speed the profile actually reaches in m/s
    vel_peak_ms: f64,

    segments: [Segment; NUM_SEGMENTS],
    num_segments: usize,

    /// Elapsed (scaled) profile time in seconds
    time_s: f64,
}

impl Default for SCurve {
    fn default() -> Self {
        Self {
            origin_m: Vector2::zeros(),
            destination_m: Vector2::zeros(),
            track_unit: Vector2::zeros(),
            track_length_m: 0.0,
            vel_peak_ms: 0.0,
            segments: [Segment::default(); NUM_SEGMENTS],
            num_segments: 0,
            time_s: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SCurve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the leg to the empty/finished state.
    pub fn init(&mut self) {
        *self = Self::default();
    }

    /// True if the leg has no profile to run.
    pub fn is_empty(&self) -> bool {
        self.num_segments == 0
    }

    /// True once the profile has been fully advanced (or never held one).
    pub fn finished(&self) -> bool {
        self.num_segments == 0 || self.time_s >= self.total_time()
    }

    /// Total nominal duration of the profile in seconds.
    pub fn total_time(&self) -> f64 {
        if self.num_segments == 0 {
            0.0
        } else {
            self.segments[self.num_segments - 1].end_time_s
        }
    }

    /// Elapsed (scaled) profile time in seconds.
    pub fn time(&self) -> f64 {
        self.time_s
    }

    /// Peak speed the profile reaches, which may be below the requested
    /// maximum for short legs.
    pub fn peak_speed(&self) -> f64 {
        self.vel_peak_ms
    }

    pub fn get_origin(&self) -> Vector2<f64> {
        self.origin_m
    }

    pub fn get_destination(&self) -> Vector2<f64> {
        self.destination_m
    }

    /// Length of the leg in meters.
    pub fn get_length(&self) -> f64 {
        self.track_length_m
    }

    /// Build the profile for the leg from `origin_m` to `destination_m`.
    ///
    /// `jerk_time_s` caps the duration of each jerk phase. A zero-length leg
    /// or any non-positive limit produces the empty/finished profile, the
    /// caller is expected to have substituted its defaults already.
    pub fn calculate_track(
        &mut self,
        origin_m: Vector2<f64>,
        destination_m: Vector2<f64>,
        speed_max_ms: f64,
        accel_max_mss: f64,
        jerk_time_s: f64,
        jerk_max_msss: f64,
    ) {
        self.init();
        self.origin_m = origin_m;
        self.destination_m = destination_m;

        let track = destination_m - origin_m;
        let length_m = track.norm();

        if length_m < MIN_TRACK_LENGTH_M
            || speed_max_ms <= 0.0
            || accel_max_mss <= 0.0
            || jerk_max_msss <= 0.0
            || jerk_time_s <= 0.0
        {
            return;
        }

        self.track_unit = track / length_m;
        self.track_length_m = length_m;

        // Duration of a jerk phase, capped by the configured jerk time
        let mut tj = (accel_max_mss / jerk_max_msss).min(jerk_time_s);
        let mut accel_peak = jerk_max_msss * tj;

        let mut vel_peak = speed_max_ms;

        // If the speed limit is reached before the acceleration limit the
        // jerk phases shorten and there is no constant-acceleration phase
        if vel_peak < accel_peak * tj {
            tj = (vel_peak / jerk_max_msss).sqrt();
            accel_peak = jerk_max_msss * tj;
        }
        let mut ta = (vel_peak / accel_peak - tj).max(0.0);

        // Distance covered ramping from rest to the peak speed
        let mut accel_dist = 0.5 * vel_peak * (2.0 * tj + ta);

        if 2.0 * accel_dist > length_m {
            // Leg too short to reach the requested speed, solve for the
            // reduced peak keeping the current jerk phase duration:
            //   length = v^2 / accel_peak + v * tj
            let v = 0.5
                * (-tj * accel_peak
                    + (tj * tj * accel_peak * accel_peak + 4.0 * accel_peak * length_m).sqrt());

            if v >= accel_peak * tj {
                vel_peak = v;
                ta = v / accel_peak - tj;
            } else {
                // Shorter still, the acceleration limit is never reached:
                //   length = 2 * jerk * tj^3
                tj = (length_m / (2.0 * jerk_max_msss)).cbrt();
                vel_peak = jerk_max_msss * tj * tj;
                ta = 0.0;
            }
            accel_dist = 0.5 * vel_peak * (2.0 * tj + ta);
        }

        // Cruise phase fills whatever distance is left
        let tv = ((length_m - 2.0 * accel_dist) / vel_peak).max(0.0);

        self.vel_peak_ms = vel_peak;

        let durations = [tj, ta, tj, tv, tj, ta, tj];
        let jerks = [
            jerk_max_msss,
            0.0,
            -jerk_max_msss,
            0.0,
            -jerk_max_msss,
            0.0,
            jerk_max_msss,
        ];

        // Integrate the phase checkpoints
        let mut t = 0.0;
        let mut a = 0.0;
        let mut v = 0.0;
        let mut p = 0.0;
        for i in 0..NUM_SEGMENTS {
            let dt = durations[i];
            let j = jerks[i];
            t += dt;
            p += v * dt + 0.5 * a * dt * dt + j * dt * dt * dt / 6.0;
            v += a * dt + 0.5 * j * dt * dt;
            a += j * dt;
            self.segments[i] = Segment {
                end_time_s: t,
                jerk_msss: j,
                end_accel_mss: a,
                end_vel_ms: v,
                end_pos_m: p,
            };
        }
        self.num_segments = NUM_SEGMENTS;
    }

    /// Advance the moving target along the track by `dt` seconds of scaled
    /// time and write the instantaneous target kinematics.
    ///
    /// `target_pos_m` must be seeded with the leg origin by the caller, an
    /// empty profile leaves it unchanged. While `prev_leg` is still
    /// decelerating its residual contribution is superimposed so a fast
    /// waypoint handover stays continuous.
    ///
    /// Returns true once the terminal condition is reached: the profile is
    /// complete for a regular waypoint, or, when chaining through a fast
    /// waypoint, the target is within `wp_radius_m` of the destination with
    /// a residual speed the next leg can absorb.
    pub fn advance_target_along_track(
        &mut self,
        prev_leg: &mut SCurve,
        next_leg: &SCurve,
        wp_radius_m: f64,
        fast_waypoint: bool,
        dt: f64,
        target_pos_m: &mut Vector2<f64>,
        target_vel_ms: &mut Vector2<f64>,
        target_accel_mss: &mut Vector2<f64>,
    ) -> bool {
        if self.num_segments == 0 {
            *target_vel_ms = Vector2::zeros();
            *target_accel_mss = Vector2::zeros();
            return true;
        }

        self.time_s += dt;
        let (p, v, a) = self.sample(self.time_s);

        *target_pos_m = self.origin_m + self.track_unit * p;
        *target_vel_ms = self.track_unit * v;
        *target_accel_mss = self.track_unit * a;

        // Residual deceleration of the previous leg, relative to its
        // destination (which is this leg's origin)
        if !prev_leg.finished() {
            prev_leg.time_s += dt;
            let (pp, pv, pa) = prev_leg.sample(prev_leg.time_s);
            *target_pos_m += prev_leg.track_unit * (pp - prev_leg.track_length_m);
            *target_vel_ms += prev_leg.track_unit * pv;
            *target_accel_mss += prev_leg.track_unit * pa;
        }

        if fast_waypoint && !next_leg.is_empty() {
            let remaining_m = self.track_length_m - p;
            remaining_m <= wp_radius_m && v <= next_leg.peak_speed()
        } else {
            self.finished()
        }
    }

    /// Sample the profile at time `t`, returning distance along the track,
    /// speed and acceleration.
    ///
    /// Before the start this is all zeros, past the end it pins to the track
    /// length at rest.
    fn sample(&self, t: f64) -> (f64, f64, f64) {
        if self.num_segments == 0 || t <= 0.0 {
            return (0.0, 0.0, 0.0);
        }

        let mut t0 = 0.0;
        let mut a0 = 0.0;
        let mut v0 = 0.0;
        let mut p0 = 0.0;
        for seg in self.segments[..self.num_segments].iter() {
            if t <= seg.end_time_s {
                let dt = t - t0;
                let j = seg.jerk_msss;
                let p = p0 + v0 * dt + 0.5 * a0 * dt * dt + j * dt * dt * dt / 6.0;
                let v = v0 + a0 * dt + 0.5 * j * dt * dt;
                let a = a0 + j * dt;
                return (p, v, a);
            }
            t0 = seg.end_time_s;
            a0 = seg.end_accel_mss;
            v0 = seg.end_vel_ms;
            p0 = seg.end_pos_m;
        }

        (self.track_length_m, 0.0, 0.0)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn straight_leg(length_m: f64, speed_ms: f64) -> SCurve {
        let mut leg = SCurve::new();
        leg.calculate_track(
            Vector2::zeros(),
            Vector2::new(length_m, 0.0),
            speed_ms,
            1.0,
            1.0,
            1.0,
        );
        leg
    }

    #[test]
    fn test_empty_profile_is_finished() {
        let mut leg = SCurve::new();
        assert!(leg.finished());

        // Zero length legs degenerate to finished
        leg.calculate_track(
            Vector2::new(3.0, 4.0),
            Vector2::new(3.0, 4.0),
            2.0,
            1.0,
            1.0,
            1.0,
        );
        assert!(leg.finished());

        // As do non-positive limits
        leg.calculate_track(Vector2::zeros(), Vector2::new(10.0, 0.0), 2.0, 0.0, 1.0, 1.0);
        assert!(leg.finished());
    }

    #[test]
    fn test_profile_duration() {
        // 10 m at 2 m/s, 1 m/s^2, 1 m/s^3: 1 s jerk phases, 1 s constant
        // accel, 2 m cruise -> 8 s total
        let leg = straight_leg(10.0, 2.0);
        assert!((leg.total_time() - 8.0).abs() < 1e-6);
        assert!((leg.peak_speed() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_reaches_destination_at_nominal_rate() {
        let mut leg = straight_leg(10.0, 2.0);
        let mut prev = SCurve::new();
        let next = SCurve::new();

        let mut pos = leg.get_origin();
        let mut vel = Vector2::zeros();
        let mut accel = Vector2::zeros();

        let dt = 0.01;
        let mut steps = 0;
        while !leg.advance_target_along_track(
            &mut prev, &next, 2.0, false, dt, &mut pos, &mut vel, &mut accel,
        ) {
            steps += 1;
            assert!(steps < 10_000, "profile never finished");

            // Limits hold throughout
            assert!(vel.norm() <= 2.0 + 1e-6);
            assert!(accel.norm() <= 1.0 + 1e-6);
        }

        assert!((pos - Vector2::new(10.0, 0.0)).norm() < 1e-6);
        assert!(vel.norm() < 1e-6);
    }

    #[test]
    fn test_position_monotonic() {
        let mut leg = straight_leg(10.0, 2.0);
        let mut prev = SCurve::new();
        let next = SCurve::new();

        let mut pos = leg.get_origin();
        let mut vel = Vector2::zeros();
        let mut accel = Vector2::zeros();

        let mut last_x = 0.0;
        for _ in 0..1000 {
            leg.advance_target_along_track(
                &mut prev, &next, 2.0, false, 0.01, &mut pos, &mut vel, &mut accel,
            );
            assert!(pos[0] >= last_x - 1e-9);
            last_x = pos[0];
        }
    }

    #[test]
    fn test_short_leg_reduces_peak_speed() {
        let leg = straight_leg(1.0, 2.0);
        assert!(leg.peak_speed() < 1.0);
        assert!(leg.peak_speed() > 0.0);
    }

    #[test]
    fn test_fast_waypoint_hands_over_with_residual_speed() {
        let mut leg = straight_leg(10.0, 2.0);
        let mut prev = SCurve::new();
        let mut next = SCurve::new();
        next.calculate_track(
            Vector2::new(10.0, 0.0),
            Vector2::new(20.0, 0.0),
            2.0,
            1.0,
            1.0,
            1.0,
        );

        let mut pos = leg.get_origin();
        let mut vel = Vector2::zeros();
        let mut accel = Vector2::zeros();

        let mut steps = 0;
        while !leg.advance_target_along_track(
            &mut prev, &next, 2.0, true, 0.01, &mut pos, &mut vel, &mut accel,
        ) {
            steps += 1;
            assert!(steps < 10_000, "handover never happened");
        }

        // Handed over inside the radius, before the full stop
        assert!((pos - Vector2::new(10.0, 0.0)).norm() <= 2.0 + 1e-6);
        assert!(vel.norm() > 0.0);
        assert!(!leg.finished());
    }

    #[test]
    fn test_prev_leg_superposition_is_continuous() {
        // Run the first leg to its handover point, then shift and check the
        // commanded velocity does not jump
        let mut this_leg = straight_leg(10.0, 2.0);
        let mut prev = SCurve::new();
        let mut next = SCurve::new();
        next.calculate_track(
            Vector2::new(10.0, 0.0),
            Vector2::new(20.0, 10.0),
            2.0,
            1.0,
            1.0,
            1.0,
        );

        let mut pos = this_leg.get_origin();
        let mut vel = Vector2::zeros();
        let mut accel = Vector2::zeros();
        while !this_leg.advance_target_along_track(
            &mut prev, &next, 2.0, true, 0.01, &mut pos, &mut vel, &mut accel,
        ) {}
        let handover_vel = vel;

        // Shift the ring as the track manager would
        let mut prev = this_leg;
        let mut this_leg = next;
        let next = SCurve::new();

        let mut pos = this_leg.get_origin();
        this_leg.advance_target_along_track(
            &mut prev, &next, 2.0, false, 0.01, &mut pos, &mut vel, &mut accel,
        );

        // Across the shift the commanded speed can only change by one tick
        // of accel-limited motion (1 m/s^2 * 10 ms) per leg
        assert!((vel - handover_vel).norm() < 0.03);
    }
}
