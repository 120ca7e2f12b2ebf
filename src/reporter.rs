//! Outbound interfaces: where shots and camera problems go.
//!
//! A session never decides what a shot means or how a problem is shown to a
//! person. It hands shots to a [`ShotListener`] and problems to an
//! [`ErrorReporter`], both owned by the embedder.

use crate::core_modules::shot::Shot;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A camera or configuration problem worth telling the operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    /// The device is held by another process. `all_cameras_failed` is set when
    /// it was the only configured camera, so nothing can run.
    DeviceLocked {
        camera: String,
        all_cameras_failed: bool,
    },
    /// The device could not be found, or vanished while running.
    DeviceMissing { camera: String },
    LowFrameRate { camera: String, fps: f64 },
    LowBrightness { camera: String, mean_luminance: f64 },
    ExcessiveCorruption { camera: String, ratio: f64 },
    ConfigurationRejected { field: String, reason: String },
}

impl CameraEvent {
    /// Advisories leave the session running; everything else ended it or an update.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            CameraEvent::LowFrameRate { .. }
                | CameraEvent::LowBrightness { .. }
                | CameraEvent::ExcessiveCorruption { .. }
        )
    }
}

impl fmt::Display for CameraEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraEvent::DeviceLocked {
                camera,
                all_cameras_failed: true,
            } => write!(
                f,
                "Cannot open the camera {camera}. It is being used by another program or \
                 needs different credentials. This is the only configured camera, so shot \
                 detection cannot run."
            ),
            CameraEvent::DeviceLocked { camera, .. } => write!(
                f,
                "Cannot open the camera {camera}. It is being used by another program, \
                 needs different credentials, or is already open in another session."
            ),
            CameraEvent::DeviceMissing { camera } => write!(
                f,
                "The camera {camera} is not available. Check that it is plugged in."
            ),
            CameraEvent::LowFrameRate { camera, fps } => write!(
                f,
                "The camera {camera} is only delivering {fps:.1} frames per second. \
                 Short laser flashes may be missed."
            ),
            CameraEvent::LowBrightness { camera, mean_luminance } => write!(
                f,
                "The picture from {camera} is very dark (average brightness {mean_luminance:.0}). \
                 Turn up the lights or the camera exposure."
            ),
            CameraEvent::ExcessiveCorruption { camera, ratio } => write!(
                f,
                "{:.0}% of recent frames from {camera} could not be decoded.",
                ratio * 100.0
            ),
            CameraEvent::ConfigurationRejected { field, reason } => {
                write!(f, "Rejected setting {field}: {reason}")
            }
        }
    }
}

/// Receives finalized shots, in non-decreasing timestamp order per session.
pub trait ShotListener: Send + Sync {
    fn on_shot(&self, shot: Shot);
}

impl<F> ShotListener for F
where
    F: Fn(Shot) + Send + Sync,
{
    fn on_shot(&self, shot: Shot) {
        self(shot)
    }
}

/// Receives camera problems and advisories.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, event: CameraEvent);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, event: CameraEvent) {
        if event.is_warning() {
            log::warn!("{event}");
        } else {
            log::error!("{event}");
        }
    }
}

/// Keeps every event it receives. Cheap to clone; clones share storage.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<CameraEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CameraEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorReporter for EventRecorder {
    fn report(&self, event: CameraEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Keeps every shot it receives. Cheap to clone; clones share storage.
#[derive(Debug, Default, Clone)]
pub struct ShotCollector {
    shots: Arc<Mutex<Vec<Shot>>>,
}

impl ShotCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shots(&self) -> Vec<Shot> {
        self.shots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.shots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.shots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ShotListener for ShotCollector {
    fn on_shot(&self, shot: Shot) {
        self.shots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(shot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::shot::ShotColor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn shot() -> Shot {
        Shot {
            x: 1.0,
            y: 2.0,
            color: ShotColor::Green,
            frame_index: 7,
            timestamp: Duration::from_millis(230),
            duration_frames: 2,
            marker_radius: 2,
        }
    }

    #[test]
    fn closures_are_listeners() {
        let seen = AtomicUsize::new(0);
        let listener = |_shot: Shot| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        listener.on_shot(shot());
        listener.on_shot(shot());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn collector_clones_share_storage() {
        let collector = ShotCollector::new();
        let handle = collector.clone();
        handle.on_shot(shot());
        assert_eq!(collector.shots(), vec![shot()]);
        collector.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn lock_message_depends_on_remaining_cameras() {
        let only = CameraEvent::DeviceLocked {
            camera: "cam0".into(),
            all_cameras_failed: true,
        };
        let one_of_many = CameraEvent::DeviceLocked {
            camera: "cam0".into(),
            all_cameras_failed: false,
        };
        assert!(only.to_string().contains("only configured camera"));
        assert!(!one_of_many.to_string().contains("only configured camera"));
        assert!(!only.is_warning());
        assert!(
            CameraEvent::LowFrameRate {
                camera: "cam0".into(),
                fps: 9.5
            }
            .to_string()
            .contains("9.5")
        );
    }

    #[test]
    fn recorder_keeps_order() {
        let recorder = EventRecorder::new();
        recorder.report(CameraEvent::DeviceMissing {
            camera: "a".into(),
        });
        recorder.report(CameraEvent::LowBrightness {
            camera: "a".into(),
            mean_luminance: 4.0,
        });
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CameraEvent::DeviceMissing { .. }));
    }
}
