use std::time::{Duration, Instant};

pub const SIXTY_FPS: u64 = 16_666_666;
pub const ONE_FPS: u64 = 1_000_000_000;

/// Longest delta a single frame may report. Longer stalls (debugger breaks, window drags) are
/// clamped so the simulation doesn't take one enormous step.
pub const MAX_DELTA: Duration = Duration::from_millis(250);

/// The frame clock driving [`Scene::update`](crate::scene::Scene::update).
///
/// Each frame captures total elapsed time as well as the delta time since the last frame, and
/// accumulates time for fixed-step work. New frames are produced from the previous one with
/// [`next`](Time::next), typically once per iteration of the main loop.
#[derive(Debug, Copy, Clone)]
pub struct Time {
    instant: Instant,
    pub fixed_time_step: u64,
    /// The time delta since the last frame
    pub delta: Duration,
    /// The total elapsed time since the first frame
    pub time: Duration,
    /// The total elapsed time since the first frame but incremented by the fixed time step
    pub fixed_time: Duration,
    /// Frames produced so far
    pub frame: u64,
    accumulator: u64,
}

impl Time {
    /// Construct a clock with delta and time set to `0`. The fixed time step is in nanoseconds.
    pub fn new(fixed_time_step: u64) -> Self {
        Self {
            fixed_time_step,
            instant: Instant::now(),
            delta: Duration::ZERO,
            time: Duration::ZERO,
            fixed_time: Duration::ZERO,
            frame: 0,
            accumulator: 0,
        }
    }

    /// Consume one fixed step from the accumulator.
    pub fn increment_fixed(&mut self) {
        self.fixed_time += Duration::from_nanos(self.fixed_time_step);
        self.accumulator = self.accumulator.saturating_sub(self.fixed_time_step);
    }

    /// Produce the next frame, measuring the wall-clock delta since this one.
    pub fn next(self) -> Self {
        self.advance(self.instant.elapsed())
    }

    /// Produce the next frame with an explicit delta. Used for deterministic stepping.
    pub fn advance(self, delta: Duration) -> Self {
        let delta = delta.min(MAX_DELTA);
        Self {
            fixed_time_step: self.fixed_time_step,
            instant: Instant::now(),
            delta,
            time: self.time + delta,
            fixed_time: self.fixed_time,
            frame: self.frame + 1,
            accumulator: self.accumulator + delta.as_nanos() as u64,
        }
    }

    /// Whether enough time accumulated for another fixed step.
    pub fn has_fixed(&self) -> bool {
        self.fixed_time_step > 0 && self.accumulator >= self.fixed_time_step
    }

    /// Delta in seconds, the unit scene systems work in.
    #[inline]
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Reset the clock to now with an empty accumulator, e.g. after a pause.
    pub fn reset_now(&mut self) {
        self.instant = Instant::now();
        self.accumulator = 0;
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new(SIXTY_FPS)
    }
}
