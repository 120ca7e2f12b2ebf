// THEORY:
// The `HealthMonitor` watches the camera rather than the scene. A detector fed
// by a camera that delivers eight frames a second, a picture that is almost
// black, or a stream of undecodable frames will miss shots without any error
// ever being raised. This module notices those conditions and turns them into
// advisory `CameraEvent`s.
//
// Key architectural principles:
// 1.  **Windows, not single frames**: each measurement is taken over a window
//     of `window` frames, so one slow frame or one dark frame raises nothing.
// 2.  **Episodes**: a warning is raised when a condition starts and not again
//     until the condition has cleared and come back.
// 3.  **Advisory only**: nothing here stops a session.

use crate::core_modules::frame_source::SessionMode;
use crate::reporter::CameraEvent;
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthLimits {
    pub min_fps: f64,
    pub min_average_luminance: f64,
    pub max_corrupt_ratio: f64,
    pub window: usize,
}

/// Tracks whether a condition is currently in a degraded episode.
#[derive(Debug, Default)]
struct Episode {
    active: bool,
}

impl Episode {
    /// True only on the transition into a degraded state.
    fn enter(&mut self, degraded: bool) -> bool {
        let started = degraded && !self.active;
        self.active = degraded;
        started
    }
}

#[derive(Debug)]
pub struct HealthMonitor {
    camera: String,
    mode: SessionMode,
    limits: HealthLimits,
    frame_times: VecDeque<Instant>,
    luminance_sum: f64,
    luminance_frames: usize,
    outcomes: VecDeque<bool>,
    fps: Episode,
    brightness: Episode,
    corruption: Episode,
}

impl HealthMonitor {
    pub fn new(camera: impl Into<String>, mode: SessionMode, limits: HealthLimits) -> Self {
        let window = limits.window.max(2);
        Self {
            camera: camera.into(),
            mode,
            limits: HealthLimits { window, ..limits },
            frame_times: VecDeque::with_capacity(window),
            luminance_sum: 0.0,
            luminance_frames: 0,
            outcomes: VecDeque::with_capacity(window),
            fps: Episode::default(),
            brightness: Episode::default(),
            corruption: Episode::default(),
        }
    }

    /// Records a good frame seen at `now` with the given mean luminance.
    pub fn record_frame(&mut self, now: Instant, mean_luminance: f64) -> Vec<CameraEvent> {
        let mut events = Vec::new();
        let window = self.limits.window;

        if self.mode == SessionMode::Continuous {
            self.frame_times.push_back(now);
            if self.frame_times.len() > window {
                self.frame_times.pop_front();
            }
            if let Some(fps) = self.measured_fps() {
                if self.fps.enter(fps < self.limits.min_fps) {
                    events.push(CameraEvent::LowFrameRate {
                        camera: self.camera.clone(),
                        fps,
                    });
                }
            }
        }

        self.luminance_sum += mean_luminance;
        self.luminance_frames += 1;
        if self.luminance_frames == window {
            let mean = self.luminance_sum / window as f64;
            self.luminance_sum = 0.0;
            self.luminance_frames = 0;
            if self.brightness.enter(mean < self.limits.min_average_luminance) {
                events.push(CameraEvent::LowBrightness {
                    camera: self.camera.clone(),
                    mean_luminance: mean,
                });
            }
        }

        events.extend(self.record_outcome(false));
        events
    }

    /// Records a unit that could not be decoded.
    pub fn record_corrupt(&mut self) -> Vec<CameraEvent> {
        self.record_outcome(true).into_iter().collect()
    }

    /// Frames per second over the current window, once the window is full.
    pub fn measured_fps(&self) -> Option<f64> {
        if self.frame_times.len() < self.limits.window {
            return None;
        }
        let first = self.frame_times.front()?;
        let last = self.frame_times.back()?;
        let elapsed = last.duration_since(*first).as_secs_f64();
        (elapsed > 0.0).then(|| (self.frame_times.len() - 1) as f64 / elapsed)
    }

    pub fn reset(&mut self) {
        self.frame_times.clear();
        self.luminance_sum = 0.0;
        self.luminance_frames = 0;
        self.outcomes.clear();
        self.fps = Episode::default();
        self.brightness = Episode::default();
        self.corruption = Episode::default();
    }

    fn record_outcome(&mut self, corrupt: bool) -> Option<CameraEvent> {
        self.outcomes.push_back(corrupt);
        if self.outcomes.len() > self.limits.window {
            self.outcomes.pop_front();
        }
        if self.outcomes.len() < self.limits.window {
            return None;
        }
        let ratio =
            self.outcomes.iter().filter(|&&c| c).count() as f64 / self.outcomes.len() as f64;
        self.corruption
            .enter(ratio > self.limits.max_corrupt_ratio)
            .then(|| CameraEvent::ExcessiveCorruption {
                camera: self.camera.clone(),
                ratio,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn limits() -> HealthLimits {
        HealthLimits {
            min_fps: 15.0,
            min_average_luminance: 20.0,
            max_corrupt_ratio: 0.1,
            window: 10,
        }
    }

    fn feed(
        monitor: &mut HealthMonitor,
        start: Instant,
        frames: u32,
        interval: Duration,
        luminance: f64,
    ) -> Vec<CameraEvent> {
        (0..frames)
            .flat_map(|i| monitor.record_frame(start + interval * i, luminance))
            .collect()
    }

    #[test]
    fn low_frame_rate_is_reported_once_per_episode() {
        let mut monitor = HealthMonitor::new("cam", SessionMode::Continuous, limits());
        let start = Instant::now();

        let events = feed(&mut monitor, start, 30, Duration::from_millis(100), 128.0);
        assert_eq!(events.len(), 1);
        let CameraEvent::LowFrameRate { fps, .. } = events[0] else {
            panic!("unexpected {:?}", events[0]);
        };
        assert_relative_eq!(fps, 10.0, max_relative = 1e-6);

        // Recovery, then a second degradation.
        let later = start + Duration::from_secs(3);
        assert!(feed(&mut monitor, later, 20, Duration::from_millis(20), 128.0).is_empty());
        let again = start + Duration::from_secs(4);
        assert_eq!(
            feed(&mut monitor, again, 20, Duration::from_millis(100), 128.0).len(),
            1
        );
    }

    #[test]
    fn bounded_sources_are_not_timed() {
        let mut monitor = HealthMonitor::new("file", SessionMode::Bounded, limits());
        let events = feed(
            &mut monitor,
            Instant::now(),
            30,
            Duration::from_millis(500),
            128.0,
        );
        assert!(events.is_empty());
        assert_eq!(monitor.measured_fps(), None);
    }

    #[test]
    fn sustained_darkness_is_reported() {
        let mut monitor = HealthMonitor::new("cam", SessionMode::Bounded, limits());
        let start = Instant::now();
        assert!(feed(&mut monitor, start, 9, Duration::from_millis(33), 5.0).is_empty());
        let events = feed(&mut monitor, start, 21, Duration::from_millis(33), 5.0);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CameraEvent::LowBrightness { .. }));
    }

    #[test]
    fn corrupt_ratio_over_window() {
        let mut monitor = HealthMonitor::new("cam", SessionMode::Bounded, limits());
        let start = Instant::now();
        feed(&mut monitor, start, 8, Duration::from_millis(33), 128.0);
        assert!(monitor.record_corrupt().is_empty());
        let events = monitor.record_corrupt();
        assert_eq!(events.len(), 1);
        let CameraEvent::ExcessiveCorruption { ratio, .. } = events[0] else {
            panic!("unexpected {:?}", events[0]);
        };
        assert_relative_eq!(ratio, 0.2);
        assert!(monitor.record_corrupt().is_empty());
    }
}
