//! Frame timing

use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_millis(500);

/// Tracks delta time, elapsed time and a smoothed frame rate.
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
    last: Instant,
    delta: Duration,
    frame_count: u64,
    window_start: Instant,
    window_frames: u32,
    fps: f32,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            delta: Duration::ZERO,
            frame_count: 0,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
        }
    }

    /// Mark the start of a new frame; returns the delta in seconds.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> f32 {
        self.delta = now.saturating_duration_since(self.last);
        self.last = now;
        self.frame_count += 1;

        self.window_frames += 1;
        let window = now.saturating_duration_since(self.window_start);
        if window >= FPS_WINDOW {
            self.fps = self.window_frames as f32 / window.as_secs_f32();
            self.window_start = now;
            self.window_frames = 0;
        }
        self.delta.as_secs_f32()
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Seconds since the timer was created
    pub fn elapsed_seconds(&self) -> f32 {
        self.last.saturating_duration_since(self.start).as_secs_f32()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second averaged over the last half second
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_measures_delta() {
        let mut timer = Timer::new();
        let start = timer.start;
        let dt = timer.tick_at(start + Duration::from_millis(16));
        assert!((dt - 0.016).abs() < 1e-6);
        assert!((timer.elapsed_seconds() - 0.016).abs() < 1e-6);
        assert_eq!(timer.frame_count(), 1);
    }

    #[test]
    fn test_fps_updates_after_window() {
        let mut timer = Timer::new();
        let start = timer.start;
        for i in 1..=30 {
            timer.tick_at(start + Duration::from_millis(20 * i));
        }
        assert!((timer.fps() - 50.0).abs() < 0.5, "fps {}", timer.fps());
    }

    #[test]
    fn test_clock_going_backwards_is_zero_delta() {
        let mut timer = Timer::new();
        let start = timer.start;
        timer.tick_at(start + Duration::from_millis(10));
        let dt = timer.tick_at(start);
        assert_eq!(dt, 0.0);
    }
}
