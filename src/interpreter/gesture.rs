//! Continuous gesture sampling
//!
//! Swipes and drags are synthesized as a start event, a sequence of moves
//! linearly interpolated between the endpoints, and an end event.

use std::time::Duration;

use crate::host::Point;

/// Sampled path of a gesture
#[derive(Debug, Clone, Copy)]
pub struct GesturePath {
    pub from: Point,
    pub to: Point,
    /// Number of move samples; the last one lands on `to`
    pub steps: u32,
    /// Pause before each move sample
    pub step_delay: Duration,
}

impl GesturePath {
    pub fn new(from: Point, to: Point, duration: Duration, steps_per_sec: u64) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let steps = u32::try_from(millis.saturating_mul(steps_per_sec) / 1000)
            .unwrap_or(u32::MAX)
            .max(1);
        Self {
            from,
            to,
            steps,
            step_delay: duration / steps,
        }
    }

    /// Move samples, excluding the start point
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        (1..=self.steps).map(move |i| self.from.lerp(self.to, f64::from(i) / f64::from(self.steps)))
    }
}
