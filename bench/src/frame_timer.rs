//! Frame time measurement for scenario runs.
//!
//! [`measure_frames`] times a plain loop. [`measure_game_loop`] drives a [`Time`] clock with a
//! constant frame delta and runs fixed steps from its accumulator, so slow frames are followed
//! by catch-up steps the way a real main loop behaves.

use std::time::{Duration, Instant};

use tessel_engine::core::time::Time;

/// Statistics over a set of frame times.
#[derive(Debug, Clone)]
pub struct FrameTimes {
    pub frame_count: usize,
    pub total: Duration,
    sorted: Vec<Duration>,
}

impl FrameTimes {
    pub fn from_times(mut times: Vec<Duration>) -> Self {
        times.sort_unstable();
        Self {
            frame_count: times.len(),
            total: times.iter().sum(),
            sorted: times,
        }
    }

    pub fn min(&self) -> Duration {
        self.sorted.first().copied().unwrap_or_default()
    }

    pub fn max(&self) -> Duration {
        self.sorted.last().copied().unwrap_or_default()
    }

    pub fn average(&self) -> Duration {
        match u32::try_from(self.frame_count) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.total / count,
        }
    }

    /// Frame time at percentile `p` (clamped to 100).
    pub fn percentile(&self, p: usize) -> Duration {
        let Some(last) = self.sorted.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        self.sorted[(self.sorted.len() * p.min(100) / 100).min(last)]
    }

    pub fn median(&self) -> Duration {
        self.percentile(50)
    }

    /// The worst 1% of frames.
    pub fn p99(&self) -> Duration {
        self.percentile(99)
    }

    pub fn fps(&self) -> f64 {
        let average = self.average();
        if average.is_zero() { 0.0 } else { 1.0 / average.as_secs_f64() }
    }
}

impl std::fmt::Display for FrameTimes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        write!(
            f,
            "{} frames, avg {:.2}ms ({:.1} fps), median {:.2}ms, p99 {:.2}ms, max {:.2}ms",
            self.frame_count,
            ms(self.average()),
            self.fps(),
            ms(self.median()),
            ms(self.p99()),
            ms(self.max()),
        )
    }
}

/// Records the duration of each frame between `begin_frame` and `end_frame`.
pub struct FrameTimer {
    times: Vec<Duration>,
    started: Option<Instant>,
}

impl FrameTimer {
    pub fn new(expected_frames: usize) -> Self {
        Self {
            times: Vec::with_capacity(expected_frames),
            started: None,
        }
    }

    pub fn begin_frame(&mut self) {
        self.started = Some(Instant::now());
    }

    /// A frame without a matching `begin_frame` isn't recorded.
    pub fn end_frame(&mut self) {
        if let Some(started) = self.started.take() {
            self.times.push(started.elapsed());
        }
    }

    pub fn frame_count(&self) -> usize {
        self.times.len()
    }

    pub fn finish(self) -> FrameTimes {
        FrameTimes::from_times(self.times)
    }
}

/// Time `frame_count` calls of `frame`.
pub fn measure_frames<F>(frame_count: usize, mut frame: F) -> FrameTimes
where
    F: FnMut(usize),
{
    let mut timer = FrameTimer::new(frame_count);
    for index in 0..frame_count {
        timer.begin_frame();
        frame(index);
        timer.end_frame();
    }
    timer.finish()
}

/// Run `frame_count` frames of `frame_delta` each.
///
/// Every frame first runs as many fixed steps as the clock accumulated, then the variable
/// update. Both receive the clock. Returns the timings of the variable updates and of the
/// fixed steps.
pub fn measure_game_loop<U, F>(
    frame_count: usize,
    frame_delta: Duration,
    fixed_step: Duration,
    mut update: U,
    mut fixed_update: F,
) -> (FrameTimes, FrameTimes)
where
    U: FnMut(&Time),
    F: FnMut(&Time),
{
    let mut time = Time::new(u64::try_from(fixed_step.as_nanos()).unwrap_or(u64::MAX));
    let mut update_timer = FrameTimer::new(frame_count);
    let mut fixed_timer = FrameTimer::new(frame_count);

    for _ in 0..frame_count {
        time = time.advance(frame_delta);
        while time.has_fixed() {
            fixed_timer.begin_frame();
            fixed_update(&time);
            fixed_timer.end_frame();
            time.increment_fixed();
        }

        update_timer.begin_frame();
        update(&time);
        update_timer.end_frame();
    }

    (update_timer.finish(), fixed_timer.finish())
}
