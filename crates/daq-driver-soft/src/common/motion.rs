//! Simulated motion for soft motors.
//!
//! A move follows a symmetric trapezoidal velocity profile: accelerate to
//! `speed`, cruise, decelerate. Short moves never reach `speed` and follow a
//! triangle instead. A zero speed completes every move instantly and a zero
//! acceleration cruises at `speed` for the whole move.

use std::time::{Duration, Instant};

/// Velocity profile of a simulated axis, in raw units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    /// Cruise speed, units/s. Zero means moves are instantaneous.
    pub speed: f64,
    /// Acceleration and deceleration, units/s². Zero means no ramps.
    pub acceleration: f64,
}

impl MotionProfile {
    /// Profile with the given cruise speed and ramps.
    pub fn new(speed: f64, acceleration: f64) -> Self {
        Self {
            speed: speed.abs(),
            acceleration: acceleration.abs(),
        }
    }

    fn instant(&self) -> bool {
        self.speed <= 0.0 || !self.speed.is_finite()
    }

    fn ramped(&self) -> bool {
        self.acceleration > 0.0 && self.acceleration.is_finite()
    }

    /// Time a move over `distance` takes.
    pub fn duration(&self, distance: f64) -> Duration {
        let distance = distance.abs();
        if self.instant() || distance == 0.0 {
            return Duration::ZERO;
        }
        if !self.ramped() {
            return seconds(distance / self.speed);
        }
        let ramp_time = self.speed / self.acceleration;
        let ramp_distance = 0.5 * self.acceleration * ramp_time * ramp_time;
        let total = if 2.0 * ramp_distance <= distance {
            2.0 * ramp_time + (distance - 2.0 * ramp_distance) / self.speed
        } else {
            2.0 * (distance / self.acceleration).sqrt()
        };
        seconds(total)
    }

    /// Distance covered `elapsed` into a move over `distance`.
    pub fn travelled(&self, distance: f64, elapsed: Duration) -> f64 {
        let distance = distance.abs();
        let total = self.duration(distance).as_secs_f64();
        let t = elapsed.as_secs_f64();
        if t >= total {
            return distance;
        }
        if !self.ramped() {
            return self.speed * t;
        }
        let a = self.acceleration;
        let ramp_time = (total / 2.0).min(self.speed / a);
        let peak = a * ramp_time;
        let ramp_distance = 0.5 * a * ramp_time * ramp_time;
        if t < ramp_time {
            0.5 * a * t * t
        } else if t < total - ramp_time {
            ramp_distance + peak * (t - ramp_time)
        } else {
            let remaining = total - t;
            distance - 0.5 * a * remaining * remaining
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// One move in progress.
#[derive(Debug, Clone, Copy)]
pub struct Motion {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
    profile: MotionProfile,
}

impl Motion {
    /// Start moving from `from` to `to` now.
    pub fn start(from: f64, to: f64, profile: MotionProfile) -> Self {
        Self::start_at(from, to, profile, Instant::now())
    }

    /// Start moving from `from` to `to` at `started`.
    pub fn start_at(from: f64, to: f64, profile: MotionProfile, started: Instant) -> Self {
        Self {
            from,
            to,
            started,
            duration: profile.duration(to - from),
            profile,
        }
    }

    /// Destination.
    pub fn target(&self) -> f64 {
        self.to
    }

    /// Position at `now`.
    pub fn position_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started);
        let travelled = self.profile.travelled(self.to - self.from, elapsed);
        if self.to >= self.from {
            self.from + travelled
        } else {
            self.from - travelled
        }
    }

    /// True once the move has ended at `now`.
    pub fn finished_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_speed_is_instant() {
        let profile = MotionProfile::new(0.0, 10.0);
        assert_eq!(profile.duration(100.0), Duration::ZERO);
        let motion = Motion::start(0.0, 5.0, profile);
        assert!(motion.finished_at(Instant::now()));
        assert_eq!(motion.position_at(Instant::now()), 5.0);
    }

    #[test]
    fn test_trapezoid_and_triangle_durations() {
        // 1 s ramps covering 5 units each, 10 units of cruise at 10 units/s.
        let profile = MotionProfile::new(10.0, 10.0);
        let trapezoid = profile.duration(20.0).as_secs_f64();
        assert!((trapezoid - 3.0).abs() < 1e-9);

        // Too short to reach cruise speed: 2 * sqrt(d / a).
        let triangle = profile.duration(2.5).as_secs_f64();
        assert!((triangle - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_ramps_moves_at_constant_speed() {
        let profile = MotionProfile::new(4.0, 0.0);
        assert_eq!(profile.duration(-8.0), Duration::from_secs(2));
        assert!((profile.travelled(8.0, Duration::from_millis(500)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_motion_positions_in_both_directions() {
        let now = Instant::now();
        let profile = MotionProfile::new(10.0, 10.0);
        let forward = Motion::start_at(0.0, 20.0, profile, now);
        assert!((forward.position_at(now + Duration::from_secs(1)) - 5.0).abs() < 1e-9);
        assert!((forward.position_at(now + Duration::from_millis(1500)) - 10.0).abs() < 1e-9);
        assert!(!forward.finished_at(now + Duration::from_secs(2)));
        assert_eq!(forward.position_at(now + Duration::from_secs(4)), 20.0);

        let back = Motion::start_at(20.0, 0.0, profile, now);
        assert!((back.position_at(now + Duration::from_secs(1)) - 15.0).abs() < 1e-9);
        assert_eq!(back.target(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_travel_is_monotonic_and_bounded(
            distance in 0.001f64..1000.0,
            speed in 0.1f64..100.0,
            acceleration in 0.0f64..100.0,
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
        ) {
            let profile = MotionProfile::new(speed, acceleration);
            let total = profile.duration(distance).as_secs_f64();
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            let x_early = profile.travelled(distance, Duration::from_secs_f64(early * total));
            let x_late = profile.travelled(distance, Duration::from_secs_f64(late * total));
            // Durations are rounded to nanoseconds.
            let tolerance = 1e-6 * (1.0 + distance);
            prop_assert!(x_early <= x_late + tolerance);
            prop_assert!(x_late <= distance + tolerance);
            prop_assert!(x_early >= -tolerance);
        }
    }
}
